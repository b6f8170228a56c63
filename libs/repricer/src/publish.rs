//! Rendering and publication of the public price feed.

use crate::store::RecordStore;
use crate::Result;
use market_data::SalesLedger;
use std::path::Path;
use tracing::{info, warn};
use types::PublicQuote;

const PUBLISH_WINDOW_DAYS: i64 = 7;

const DISCLAIMER: &str = "\
# This is a list of item prices maintained by the price feed bot and updated on every run
# The prices contained in this are not identical to the ones in the marketplace, but are roughly equal. This is meant to tell you what items are worth, not what you can sell them for
# The difference can be said as, if you sold using the prices in here, you shouldn't expect to be making a profit vs selling them by hand.
# The prices provided in here do not respect stock levels, do not respect purchase limits and do not understand when someone is selling at a loss.
# The prices listed are meant for informational purposes. They are not intended to be usable for maximizing profits";

/// One quote per record: the public price, its verification age and the units
/// sold in the trailing week. Sorted by item id.
pub fn build_quotes(store: &RecordStore, ledger: &SalesLedger, now: i64) -> Vec<PublicQuote> {
    let mut quotes: Vec<PublicQuote> = store
        .iter()
        .map(|rec| PublicQuote {
            item_id: rec.item_id,
            age: rec.last_verified_at,
            price: rec.public_price,
            volume: ledger.volume_for(rec.item_id, PUBLISH_WINDOW_DAYS, now),
        })
        .collect();

    quotes.sort_by_key(|q| q.item_id);
    quotes
}

/// Render the feed. The publish stamp is floored to the hour so consumers
/// polling the file see a stable header between runs within the same hour.
pub fn render_feed(quotes: &[PublicQuote], published_at: i64) -> String {
    let stamp = (published_at / 3600) * 3600;

    let mut out = format!(
        "Last Updated:\t{stamp}\n\n{DISCLAIMER}\n\n# Item ID\tLast Checked\tPrice\tSold in last week\n"
    );

    for quote in quotes {
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\n",
            quote.item_id, quote.age, quote.price, quote.volume
        ));
    }

    out
}

pub fn write_feed(path: impl AsRef<Path>, content: &str) -> Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;

    info!("Wrote public feed to {}", path.display());
    Ok(())
}

/// Commit and push the feed checkout. Publication is best effort; a broken
/// remote should never fail the run.
pub async fn git_push(dir: impl AsRef<Path>) {
    let dir = dir.as_ref();

    for args in [
        &["add", "--all"][..],
        &["commit", "-m", "Update prices"][..],
        &["push"][..],
    ] {
        let output = tokio::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .await;

        match output {
            Ok(output) if output.status.success() => {}
            Ok(output) => {
                warn!(
                    "git {:?} exited with {}: {}",
                    args,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                return;
            }
            Err(err) => {
                warn!("git {:?} failed to spawn: {}", args, err);
                return;
            }
        }
    }

    info!("Pushed public feed");
}
