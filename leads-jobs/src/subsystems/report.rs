//! Report subsystem — newest lead artifact → document + spreadsheet
//!
//! Only leads whose id is not yet in the sent ledger are reported. They are
//! bucketed by local hour of creation and delivered as a text summary
//! (inserted at the head of the document) and as rows appended to the
//! spreadsheet.
//!
//! Ledger timing follows `LedgerCommit`: by default the ledger is rewritten
//! before the sinks are contacted, so a failed delivery is not retried by the
//! next run.

use chrono::{DateTime, TimeZone, Timelike};
use leads_core::sinks::DOCUMENT_START_INDEX;
use leads_core::{
    store, DocumentSink, Lead, LeadsConfig, LeadsError, Ledger, LedgerCommit, Row, SinkError,
    SpreadsheetSink,
};
use serde_json::json;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ============================================================================
// PUBLIC API
// ============================================================================

#[derive(Debug, Clone)]
pub struct ReportSettings {
    pub artifact_dir: PathBuf,
    pub ledger_path: PathBuf,
    pub ledger_commit: LedgerCommit,
}

impl From<&LeadsConfig> for ReportSettings {
    fn from(config: &LeadsConfig) -> Self {
        Self {
            artifact_dir: config.harvest.artifact_dir(),
            ledger_path: config.report.ledger_path(),
            ledger_commit: config.report.ledger_commit,
        }
    }
}

/// `"HH:00"` → number of leads created in that local hour.
pub type HourBuckets = BTreeMap<String, usize>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HourGrouping {
    pub buckets: HourBuckets,
    /// Leads left out because their timestamp did not parse.
    pub ungrouped: usize,
}

impl HourGrouping {
    /// Sum of all buckets. Ungrouped leads are not part of the total.
    pub fn total(&self) -> usize {
        self.buckets.values().sum()
    }
}

#[derive(Debug, Clone)]
pub struct DeliveredReport {
    pub artifact: PathBuf,
    pub new_leads: usize,
    pub grouping: HourGrouping,
    pub summary: String,
}

#[derive(Debug, Clone)]
pub enum ReportOutcome {
    /// No artifact to report from.
    NoArtifact,
    /// Every lead in the artifact was already delivered.
    NothingNew { artifact: PathBuf },
    Delivered(DeliveredReport),
}

// ============================================================================
// PURE STEPS
// ============================================================================

/// Leads not yet in the ledger, artifact order preserved.
pub fn unsent_leads(leads: Vec<Lead>, ledger: &Ledger) -> Vec<Lead> {
    leads
        .into_iter()
        .filter(|lead| !ledger.contains(&lead.id))
        .collect()
}

pub fn group_by_hour<Tz: TimeZone>(leads: &[Lead], tz: &Tz) -> HourGrouping {
    let mut grouping = HourGrouping::default();

    for lead in leads {
        match lead.created_at_utc() {
            Ok(created) => {
                let hour = created.with_timezone(tz).hour();
                *grouping.buckets.entry(format!("{hour:02}:00")).or_insert(0) += 1;
            }
            Err(reason) => {
                tracing::debug!(id = %lead.id, reason = %reason, "Lead left out of hourly grouping");
                grouping.ungrouped += 1;
            }
        }
    }

    grouping
}

pub fn render_summary(date_label: &str, grouping: &HourGrouping) -> String {
    let mut lines = vec![format!("📅 {date_label}")];
    for (hour, count) in &grouping.buckets {
        lines.push(format!("🕓 {hour} → {count} leads"));
    }
    lines.push(format!("\n👥 Total leads of the day: {}\n", grouping.total()));
    lines.join("\n")
}

/// One `[date, hour, count]` row per bucket, then `["", "Daily total", total]`.
pub fn sheet_rows(date_label: &str, grouping: &HourGrouping) -> Vec<Row> {
    let mut rows: Vec<Row> = grouping
        .buckets
        .iter()
        .map(|(hour, count)| vec![json!(date_label), json!(hour), json!(count)])
        .collect();
    rows.push(vec![json!(""), json!("Daily total"), json!(grouping.total())]);
    rows
}

/// Document first, then spreadsheet. The first failure aborts delivery.
pub async fn deliver(
    docs: &dyn DocumentSink,
    sheets: &dyn SpreadsheetSink,
    summary: &str,
    rows: &[Row],
) -> Result<(), SinkError> {
    docs.insert_text(DOCUMENT_START_INDEX, &format!("{summary}\n\n"))
        .await?;
    tracing::info!(sink = docs.name(), "Summary inserted");

    sheets.append_rows(rows).await?;
    tracing::info!(sink = sheets.name(), rows = rows.len(), "Rows appended");

    Ok(())
}

fn resolve_artifact(
    settings: &ReportSettings,
    artifact_override: Option<&Path>,
) -> Result<Option<PathBuf>, LeadsError> {
    match artifact_override {
        Some(path) if path.is_file() => Ok(Some(path.to_path_buf())),
        Some(path) => {
            tracing::warn!(path = %path.display(), "Requested artifact does not exist");
            Ok(None)
        }
        None => Ok(store::latest_artifact(&settings.artifact_dir)?),
    }
}

// ============================================================================
// RUN
// ============================================================================

/// One full report. `now` supplies the report date and the time zone used
/// for hourly buckets.
pub async fn run_report<Tz: TimeZone>(
    settings: &ReportSettings,
    artifact_override: Option<&Path>,
    docs: &dyn DocumentSink,
    sheets: &dyn SpreadsheetSink,
    now: DateTime<Tz>,
) -> Result<ReportOutcome, LeadsError> {
    let Some(artifact) = resolve_artifact(settings, artifact_override)? else {
        tracing::warn!(dir = %settings.artifact_dir.display(), "No lead artifact found, nothing to report");
        return Ok(ReportOutcome::NoArtifact);
    };

    let leads = store::read_artifact(&artifact)?;
    let mut ledger = Ledger::load(&settings.ledger_path);
    let in_artifact = leads.len();
    let fresh = unsent_leads(leads, &ledger);
    let added = ledger.record(fresh.iter().map(|lead| lead.id.clone()));

    tracing::info!(
        artifact = %artifact.display(),
        in_artifact,
        new_leads = fresh.len(),
        ledger_before = ledger.len() - added,
        ledger_after = ledger.len(),
        "Computed unsent leads"
    );

    if settings.ledger_commit == LedgerCommit::BeforeDelivery || fresh.is_empty() {
        ledger.save()?;
    }

    if fresh.is_empty() {
        tracing::info!("No new leads to include in the report");
        return Ok(ReportOutcome::NothingNew { artifact });
    }

    let grouping = group_by_hour(&fresh, &now.timezone());
    if grouping.ungrouped > 0 {
        tracing::warn!(
            ungrouped = grouping.ungrouped,
            "Leads with unparsable timestamps were marked sent but left out of the totals"
        );
    }

    let date_label = now.date_naive().format("%d/%m/%Y").to_string();
    let summary = render_summary(&date_label, &grouping);
    let rows = sheet_rows(&date_label, &grouping);

    deliver(docs, sheets, &summary, &rows).await?;

    if settings.ledger_commit == LedgerCommit::AfterDelivery {
        ledger.save()?;
    }

    tracing::info!(total = grouping.total(), "Report delivered");

    Ok(ReportOutcome::Delivered(DeliveredReport {
        artifact,
        new_leads: fresh.len(),
        grouping,
        summary,
    }))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, Utc};

    fn lead(id: &str, created_at: &str) -> Lead {
        Lead {
            id: id.to_string(),
            created_at: created_at.to_string(),
            status: None,
            last_message: None,
            chat_link: None,
        }
    }

    fn buckets(pairs: &[(&str, usize)]) -> HourBuckets {
        pairs.iter().map(|(h, c)| (h.to_string(), *c)).collect()
    }

    #[test]
    fn test_group_by_hour_counts_per_hour() {
        let leads = vec![
            lead("a", "2026-10-18T09:05:00Z"),
            lead("b", "2026-10-18T09:59:59Z"),
            lead("c", "2026-10-18T10:00:00Z"),
        ];

        let grouping = group_by_hour(&leads, &Utc);

        assert_eq!(grouping.buckets, buckets(&[("09:00", 2), ("10:00", 1)]));
        assert_eq!(grouping.total(), 3);
        assert_eq!(grouping.ungrouped, 0);
    }

    #[test]
    fn test_group_by_hour_uses_local_offset() {
        let sao_paulo = FixedOffset::west_opt(3 * 3600).unwrap();
        let leads = vec![lead("a", "2026-10-18T12:30:00Z"), lead("b", "2026-10-18T02:00:00Z")];

        let grouping = group_by_hour(&leads, &sao_paulo);

        assert_eq!(grouping.buckets, buckets(&[("09:00", 1), ("23:00", 1)]));
    }

    #[test]
    fn test_unparsable_timestamps_are_left_out_of_total() {
        let leads = vec![lead("a", "2026-10-18T09:05:00Z"), lead("b", "soon")];

        let grouping = group_by_hour(&leads, &Utc);

        assert_eq!(grouping.total(), 1);
        assert_eq!(grouping.ungrouped, 1);
    }

    #[test]
    fn test_render_summary_layout() {
        let grouping = HourGrouping {
            buckets: buckets(&[("10:00", 1), ("09:00", 2)]),
            ungrouped: 0,
        };

        let summary = render_summary("18/10/2026", &grouping);

        assert_eq!(
            summary,
            "📅 18/10/2026\n🕓 09:00 → 2 leads\n🕓 10:00 → 1 leads\n\n👥 Total leads of the day: 3\n"
        );
    }

    #[test]
    fn test_sheet_rows_end_with_total() {
        let grouping = HourGrouping {
            buckets: buckets(&[("09:00", 2), ("10:00", 1)]),
            ungrouped: 0,
        };

        let rows = sheet_rows("18/10/2026", &grouping);

        assert_eq!(
            rows,
            vec![
                vec![json!("18/10/2026"), json!("09:00"), json!(2)],
                vec![json!("18/10/2026"), json!("10:00"), json!(1)],
                vec![json!(""), json!("Daily total"), json!(3)],
            ]
        );
    }

    #[test]
    fn test_unsent_leads_preserves_order() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut ledger = Ledger::load(&dir.path().join("sent.json"));
        ledger.record(["b"]);

        let fresh = unsent_leads(
            vec![
                lead("c", "2026-10-18T09:00:00Z"),
                lead("b", "2026-10-18T09:00:00Z"),
                lead("a", "2026-10-18T09:00:00Z"),
            ],
            &ledger,
        );

        let ids: Vec<_> = fresh.iter().map(|l| l.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }
}
