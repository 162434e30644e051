//! Harvest subsystem — CRM sessions → dated lead artifact
//!
//! Pages through the session listing until the CRM returns an empty page,
//! repeats the previous page, fails, or the page cap is hit. Whatever was
//! accumulated is then filtered to the retention window and written to
//! `leads_YYYYMMDD.json`.
//!
//! Fetch failures are terminal for the paging loop but not for the run:
//! partial results are still filtered and saved.

use chrono::{DateTime, TimeZone, Utc};
use leads_core::{
    crm, store, FetchWindow, Lead, LeadsConfig, LeadsError, SessionRecord, SessionSource, SkipReason,
};
use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// PUBLIC API
// ============================================================================

#[derive(Debug, Clone)]
pub struct HarvestSettings {
    pub fetch_range_days: i64,
    pub retention_days: i64,
    pub page_delay: Duration,
    pub max_pages: u32,
    pub artifact_dir: PathBuf,
}

impl From<&LeadsConfig> for HarvestSettings {
    fn from(config: &LeadsConfig) -> Self {
        Self {
            fetch_range_days: config.crm.fetch_range_days,
            retention_days: config.harvest.retention_days,
            page_delay: Duration::from_millis(config.crm.page_delay_ms),
            max_pages: config.crm.max_pages,
            artifact_dir: config.harvest.artifact_dir(),
        }
    }
}

/// Why the paging loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The CRM returned a page with no items.
    Exhausted,
    /// The page carried the same ids as the page before it.
    RepeatedPage,
    /// Transport error, non-success status or undecodable body.
    FetchFailed,
    /// `max_pages` pages were accumulated.
    PageLimit,
}

/// Raw output of the paging loop.
#[derive(Debug, Clone)]
pub struct PageHarvest {
    pub records: Vec<SessionRecord>,
    pub pages: u32,
    pub stop: StopReason,
}

/// Per-reason counts of records that did not become leads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SkipTally {
    pub missing_id: usize,
    pub missing_timestamp: usize,
    pub invalid_timestamp: usize,
    pub before_cutoff: usize,
}

impl SkipTally {
    fn add(&mut self, reason: &SkipReason) {
        match reason {
            SkipReason::MissingId => self.missing_id += 1,
            SkipReason::MissingTimestamp => self.missing_timestamp += 1,
            SkipReason::InvalidTimestamp(_) => self.invalid_timestamp += 1,
            SkipReason::BeforeCutoff => self.before_cutoff += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.missing_id + self.missing_timestamp + self.invalid_timestamp + self.before_cutoff
    }
}

/// Result of a harvest run
#[derive(Debug, Clone)]
pub struct HarvestReport {
    pub pages: u32,
    pub records_fetched: usize,
    pub stop: StopReason,
    pub skipped: SkipTally,
    pub leads: usize,
    /// `None` when no lead survived the filter.
    pub artifact: Option<PathBuf>,
}

// ============================================================================
// PAGING
// ============================================================================

/// Accumulate session pages starting at page 0.
///
/// The repeat guard only compares against the immediately preceding page.
pub async fn collect_sessions(
    source: &dyn SessionSource,
    window: &FetchWindow,
    page_delay: Duration,
    max_pages: u32,
) -> PageHarvest {
    let mut records = Vec::new();
    let mut page: u32 = 0;
    let mut last_ids: Option<HashSet<String>> = None;

    let stop = loop {
        if page >= max_pages {
            tracing::warn!(max_pages, "Page limit reached, stopping pagination");
            break StopReason::PageLimit;
        }

        let items = match source.fetch_page(window, page).await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(page, source = source.name(), error = %e, "Page fetch failed, stopping pagination");
                break StopReason::FetchFailed;
            }
        };

        if items.is_empty() {
            tracing::info!(page, "No items returned, pagination ended");
            break StopReason::Exhausted;
        }

        let ids: HashSet<String> = items
            .iter()
            .filter_map(|r| r.id().map(str::to_string))
            .collect();
        if last_ids.as_ref() == Some(&ids) {
            tracing::warn!(page, "Duplicate page detected, stopping pagination");
            break StopReason::RepeatedPage;
        }

        tracing::info!(
            page,
            items = items.len(),
            first = items.first().and_then(|r| r.created_at.as_deref()).unwrap_or("-"),
            last = items.last().and_then(|r| r.created_at.as_deref()).unwrap_or("-"),
            "Page accumulated"
        );

        last_ids = Some(ids);
        records.extend(items);
        page += 1;

        if !page_delay.is_zero() {
            tokio::time::sleep(page_delay).await;
        }
    };

    PageHarvest {
        records,
        pages: page,
        stop,
    }
}

// ============================================================================
// FILTERING
// ============================================================================

/// Project records created at or after `cutoff` into leads, in input order.
pub fn select_leads(records: &[SessionRecord], cutoff: DateTime<Utc>) -> (Vec<Lead>, SkipTally) {
    let mut leads = Vec::new();
    let mut skipped = SkipTally::default();

    for record in records {
        match Lead::from_session(record, cutoff) {
            Ok(lead) => leads.push(lead),
            Err(reason) => {
                if let SkipReason::InvalidTimestamp(raw) = &reason {
                    tracing::debug!(id = record.id().unwrap_or("-"), raw = %raw, "Skipping record with unparsable createdAt");
                }
                skipped.add(&reason);
            }
        }
    }

    (leads, skipped)
}

// ============================================================================
// RUN
// ============================================================================

/// One full harvest. `now` fixes both windows and, in its own time zone, the
/// artifact date.
pub async fn run_harvest<Tz: TimeZone>(
    source: &dyn SessionSource,
    settings: &HarvestSettings,
    now: DateTime<Tz>,
) -> Result<HarvestReport, LeadsError> {
    let now_utc = now.with_timezone(&Utc);
    let window = FetchWindow::trailing_days(now_utc, settings.fetch_range_days);

    tracing::info!(
        start = %window.start,
        end = %window.end,
        source = source.name(),
        "Fetching recent sessions"
    );

    let harvest = collect_sessions(source, &window, settings.page_delay, settings.max_pages).await;
    let records_fetched = harvest.records.len();

    let cutoff = crm::days_before(now_utc, settings.retention_days);
    let (leads, skipped) = select_leads(&harvest.records, cutoff);

    tracing::info!(
        pages = harvest.pages,
        records = records_fetched,
        leads = leads.len(),
        skipped = skipped.total(),
        before_cutoff = skipped.before_cutoff,
        "Harvest filtered"
    );

    let artifact = if leads.is_empty() {
        tracing::warn!(retention_days = settings.retention_days, "No recent leads, artifact not written");
        None
    } else {
        let path = store::write_artifact(&settings.artifact_dir, now.date_naive(), &leads)?;
        tracing::info!(count = leads.len(), path = %path.display(), "Leads saved");
        Some(path)
    };

    Ok(HarvestReport {
        pages: harvest.pages,
        records_fetched,
        stop: harvest.stop,
        skipped,
        leads: leads.len(),
        artifact,
    })
}

// ============================================================================
// TESTS
// ============================================================================
