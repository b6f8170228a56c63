//! Fetching and parsing of marketplace listing pages.

use crate::session::MarketClient;
use crate::{ClientError, Result};
use regex::Regex;
use std::sync::OnceLock;
use tracing::debug;
use types::Listing;

/// Present whenever the back-office legitimately has nothing to show. Zero
/// parsed rows without this marker is a fetch failure, not an extinct item.
const NO_SELLERS_MARKER: &str = ">No sellers<";

fn backoffice_row() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"<td><b>([\d,]+)</b>(?:\(([\d,]+)/day\))? x([\d,]+)</td>")
            .expect("hardcoded regex")
    })
}

fn search_row() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"<td class="small stock">([\d,]+)</td><td class="small">(?:([\d,]+)&nbsp;/&nbsp;day)?(?:&nbsp;)*</td><td class="small price"><a class=nounder href="storefront\.php\?store=\d+&item=\d+&price=\d+">([\d,]+)</a>"#,
        )
        .expect("hardcoded regex")
    })
}

/// Parse a digit run that may carry thousands separators. Saturates instead
/// of panicking on absurd input.
fn digits(text: &str) -> i64 {
    text.bytes()
        .filter(u8::is_ascii_digit)
        .fold(0_i64, |acc, b| {
            acc.saturating_mul(10).saturating_add(i64::from(b - b'0'))
        })
}

/// Parse the back-office price table for one item.
pub fn parse_backoffice(item_id: u32, page: &str) -> Result<Vec<Listing>> {
    let listings: Vec<Listing> = backoffice_row()
        .captures_iter(page)
        .map(|caps| Listing {
            price: digits(&caps[1]),
            limit: caps.get(2).map(|m| digits(m.as_str())).unwrap_or(0),
            quantity: digits(&caps[3]),
        })
        .collect();

    if listings.is_empty() && !page.contains(NO_SELLERS_MARKER) {
        return Err(ClientError::EmptyResponse(item_id));
    }

    Ok(listings)
}

/// Parse the storefront rows of a marketplace search results page.
pub fn parse_search(page: &str) -> Vec<Listing> {
    search_row()
        .captures_iter(page)
        .map(|caps| Listing {
            quantity: digits(&caps[1]),
            limit: caps.get(2).map(|m| digits(m.as_str())).unwrap_or(0),
            price: digits(&caps[3]),
        })
        .collect()
}

impl MarketClient {
    /// Cheap aggregated listing snapshot from the seller back-office.
    pub async fn aggregated_listings(&self, item_id: u32) -> Result<Vec<Listing>> {
        let credentials = self.credentials().await.ok_or(ClientError::NotLoggedIn)?;

        debug!("Fetching back-office listings for item {}", item_id);

        let page = self
            .http()
            .post(format!(
                "{}/{}",
                self.config().base_url.trim_end_matches('/'),
                self.config().backoffice_path
            ))
            .query(&[
                ("iid", item_id.to_string()),
                ("action", "prices".to_string()),
                ("ajax", "1".to_string()),
                ("pwd", credentials.pwdhash),
            ])
            .send()
            .await?
            .text()
            .await?;

        parse_backoffice(item_id, &page)
    }

    /// Full marketplace search for an item by exact name. Slower but
    /// exhaustive; used when the aggregated snapshot cannot be trusted.
    pub async fn live_search(&self, item_name: &str) -> Result<Vec<Listing>> {
        if self.credentials().await.is_none() {
            return Err(ClientError::NotLoggedIn);
        }

        debug!("Searching marketplace for {:?}", item_name);

        let page = self
            .http()
            .get(format!(
                "{}/{}",
                self.config().base_url.trim_end_matches('/'),
                self.config().search_path
            ))
            .query(&[
                ("justitems", "0".to_string()),
                ("searchstring", format!("\"{}\"", item_name)),
            ])
            .send()
            .await?
            .text()
            .await?;

        Ok(parse_search(&page))
    }
}
