//! Crowd-sourced price database snapshot and the correction bundle we build
//! for it.
//!
//! The snapshot is a versioned tab-separated map. We only know how to correct
//! the version we were built against; any other version marks the whole
//! snapshot outdated for the run — reads come up empty and nothing is
//! submitted — while selection and live resolution continue on the other
//! sources.

use crate::Result;
use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::OnceLock;
use tracing::{info, warn};
use types::Listing;

const PAYLOAD_BOUNDARY: &str = "--pricefeedbotboundary";

fn snapshot_row() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(\d+)\t(\d+)\t(\d+)$").expect("hardcoded regex"))
}

/// One crowd-database entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrowdPrice {
    pub price: i64,
    pub as_of: i64,
}

pub struct CrowdPriceBook {
    raw_lines: Vec<String>,
    prices: HashMap<u32, CrowdPrice>,
    corrections: HashMap<u32, CrowdPrice>,
    notes: HashMap<u32, String>,
    outdated: bool,
    /// Fetch stamp used for the archive filenames.
    stamp: String,
}

impl CrowdPriceBook {
    /// Download the snapshot, archiving the raw text under `archive_dir`.
    pub async fn fetch(
        http: &reqwest::Client,
        url: &str,
        expected_version: &str,
        archive_dir: impl AsRef<Path>,
        stamp: String,
    ) -> Result<Self> {
        let text = http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;

        let archive_dir = archive_dir.as_ref();
        std::fs::create_dir_all(archive_dir)?;
        std::fs::write(archive_dir.join(format!("{stamp}.txt")), &text)?;

        let book = Self::from_text(&text, expected_version, stamp);
        if !book.outdated {
            info!("Crowd snapshot holds {} prices", book.prices.len());
        }
        Ok(book)
    }

    pub fn from_text(text: &str, expected_version: &str, stamp: String) -> Self {
        let raw_lines: Vec<String> = text.lines().map(str::to_string).collect();
        let version = raw_lines.first().map(String::as_str).unwrap_or("");
        let outdated = version != expected_version;

        let mut prices = HashMap::new();

        if outdated {
            warn!(
                "Crowd snapshot version {:?} does not match expected {:?}; treating as outdated",
                version, expected_version
            );
        } else {
            for line in &raw_lines {
                let Some(caps) = snapshot_row().captures(line) else {
                    continue;
                };
                let (Ok(id), Ok(as_of), Ok(price)) = (
                    caps[1].parse::<u32>(),
                    caps[2].parse::<i64>(),
                    caps[3].parse::<i64>(),
                ) else {
                    continue;
                };
                prices.insert(id, CrowdPrice { price, as_of });
            }
        }

        Self {
            raw_lines,
            prices,
            corrections: HashMap::new(),
            notes: HashMap::new(),
            outdated,
            stamp,
        }
    }

    /// True when the snapshot version was not the one we can correct.
    pub fn is_outdated(&self) -> bool {
        self.outdated
    }

    pub fn get(&self, item_id: u32) -> Option<CrowdPrice> {
        self.prices.get(&item_id).copied()
    }

    /// Queue a corrected price, with the supporting listings as the note.
    pub fn record_correction(&mut self, item_id: u32, as_of: i64, price: i64, listings: &[Listing]) {
        if self.outdated {
            return;
        }

        self.corrections.insert(item_id, CrowdPrice { price, as_of });
        if let Ok(note) = serde_json::to_string(listings) {
            self.notes.insert(item_id, note);
        }
    }

    pub fn correction_count(&self) -> usize {
        self.corrections.len()
    }

    /// Re-render the snapshot with our corrections spliced into their lines.
    pub fn corrected_snapshot(&self) -> String {
        let mut out = String::new();

        for line in &self.raw_lines {
            let corrected = snapshot_row()
                .captures(line)
                .and_then(|caps| caps[1].parse::<u32>().ok())
                .and_then(|id| self.corrections.get(&id).map(|c| (id, c)));

            match corrected {
                Some((id, c)) => {
                    out.push_str(&format!("{}\t{}\t{}", id, c.as_of, c.price));
                }
                None => out.push_str(line),
            }
            out.push('\n');
        }

        out
    }

    /// Human-readable notes: one `item_id \t json-listings` line per
    /// correction, sorted by item id.
    pub fn notes_text(&self) -> String {
        let mut ids: Vec<u32> = self.notes.keys().copied().collect();
        ids.sort_unstable();

        let mut out = String::new();
        for id in ids {
            out.push_str(&format!("{}\t{}\n", id, self.notes[&id]));
        }
        out
    }

    /// Frame the corrected snapshot the way the upstream upload endpoint
    /// expects it. Built for inspection; never transmitted.
    pub fn multipart_payload(data: &str) -> String {
        format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"upload\"; filename=\"prices.txt\"\r\n\r\n{data}\r\n--{b}--\r\n",
            b = PAYLOAD_BOUNDARY,
        )
    }

    /// Write the corrected snapshot, the notes file and the would-be upload
    /// payload next to the archived raw snapshot.
    pub fn write_submission_bundle(&self, dir: impl AsRef<Path>) -> Result<()> {
        if self.outdated || self.corrections.is_empty() {
            return Ok(());
        }

        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;

        let snapshot = self.corrected_snapshot();
        std::fs::write(dir.join(format!("{}_updated.txt", self.stamp)), &snapshot)?;
        std::fs::write(
            dir.join(format!("{}_notes.txt", self.stamp)),
            self.notes_text(),
        )?;
        std::fs::write(
            dir.join(format!("{}_payload.txt", self.stamp)),
            Self::multipart_payload(&snapshot),
        )?;

        info!(
            "Wrote correction bundle for {} items (not transmitted)",
            self.corrections.len()
        );
        Ok(())
    }
}
