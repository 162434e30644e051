use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_CRM_BASE_URL: &str = "https://api.chat.resultplus.com.br";
pub const DEFAULT_SESSION_PATH: &str = "/chat/v1/session";
pub const DEFAULT_DOCS_BASE_URL: &str = "https://docs.googleapis.com";
pub const DEFAULT_SHEETS_BASE_URL: &str = "https://sheets.googleapis.com";

/// Upper bound for day-count settings, far inside chrono's representable range.
pub const MAX_WINDOW_DAYS: i64 = 36_500;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct LeadsConfig {
    #[serde(default)]
    pub crm: CrmConfig,
    #[serde(default)]
    pub harvest: HarvestConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub google: GoogleConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CrmConfig {
    pub base_url: String,
    pub session_path: String,
    pub token: String,
    pub fetch_range_days: i64,
    pub page_delay_ms: u64,
    pub max_pages: u32,
    pub timeout_secs: u64,
}

impl Default for CrmConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_CRM_BASE_URL.to_string(),
            session_path: DEFAULT_SESSION_PATH.to_string(),
            token: String::new(),
            fetch_range_days: 30,
            page_delay_ms: 300,
            max_pages: 1000,
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HarvestConfig {
    pub retention_days: i64,
    pub artifact_dir: String,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            retention_days: 7,
            artifact_dir: ".".to_string(),
        }
    }
}

impl HarvestConfig {
    pub fn artifact_dir(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.artifact_dir).into_owned())
    }
}

/// When the reporter rewrites the sent ledger relative to sink delivery.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LedgerCommit {
    /// Ledger is rewritten before the sinks are contacted. A failed delivery
    /// leaves those leads marked as sent.
    #[default]
    BeforeDelivery,
    /// Ledger is rewritten only once both sinks accepted the report.
    AfterDelivery,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReportConfig {
    pub ledger_path: String,
    pub ledger_commit: LedgerCommit,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            ledger_path: "sent.json".to_string(),
            ledger_commit: LedgerCommit::default(),
        }
    }
}

impl ReportConfig {
    pub fn ledger_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.ledger_path).into_owned())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GoogleConfig {
    pub docs_base_url: String,
    pub sheets_base_url: String,
    pub document_id: String,
    pub spreadsheet_id: String,
    pub sheet_range: String,
    pub access_token: String,
    pub timeout_secs: u64,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            docs_base_url: DEFAULT_DOCS_BASE_URL.to_string(),
            sheets_base_url: DEFAULT_SHEETS_BASE_URL.to_string(),
            document_id: String::new(),
            spreadsheet_id: String::new(),
            sheet_range: "A1".to_string(),
            access_token: String::new(),
            timeout_secs: 30,
        }
    }
}

impl LeadsConfig {
    /// Load from an optional TOML file layered with `LEADS_*` environment
    /// variables (`LEADS_CRM__PAGE_DELAY_MS` → `crm.page_delay_ms`), then fill
    /// credentials from the conventional variables when still empty.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("LEADS")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;
        let mut config: LeadsConfig = s.try_deserialize()?;
        config.apply_env_fallbacks(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()?;
        Ok(s.try_deserialize()?)
    }

    /// Fill empty credential fields from `HELENA_API_KEY`, `HELENA_API_URL`,
    /// `DOC_ID`, `SPREADSHEET_ID` and `GOOGLE_ACCESS_TOKEN`.
    pub fn apply_env_fallbacks<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if self.crm.token.is_empty() {
            if let Some(token) = non_empty("HELENA_API_KEY") {
                self.crm.token = token;
            }
        }
        if let Some(url) = non_empty("HELENA_API_URL") {
            if self.crm.base_url == DEFAULT_CRM_BASE_URL {
                self.crm.base_url = url;
            }
        }
        if self.google.document_id.is_empty() {
            if let Some(id) = non_empty("DOC_ID") {
                self.google.document_id = id;
            }
        }
        if self.google.spreadsheet_id.is_empty() {
            if let Some(id) = non_empty("SPREADSHEET_ID") {
                self.google.spreadsheet_id = id;
            }
        }
        if self.google.access_token.is_empty() {
            if let Some(token) = non_empty("GOOGLE_ACCESS_TOKEN") {
                self.google.access_token = token;
            }
        }
    }

    /// Checks required before any CRM traffic. The fetch range must cover the
    /// retention window or leads near the boundary are never fetched.
    pub fn validate_harvest(&self) -> Result<(), ConfigError> {
        if self.crm.token.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "crm.token is empty (set it or HELENA_API_KEY)".to_string(),
            ));
        }
        if self.harvest.retention_days <= 0 {
            return Err(ConfigError::Invalid(format!(
                "harvest.retention_days must be positive, got {}",
                self.harvest.retention_days
            )));
        }
        if self.crm.fetch_range_days < self.harvest.retention_days {
            return Err(ConfigError::Invalid(format!(
                "crm.fetch_range_days ({}) must be >= harvest.retention_days ({})",
                self.crm.fetch_range_days, self.harvest.retention_days
            )));
        }
        if self.crm.fetch_range_days > MAX_WINDOW_DAYS {
            return Err(ConfigError::Invalid(format!(
                "crm.fetch_range_days must be <= {MAX_WINDOW_DAYS}, got {}",
                self.crm.fetch_range_days
            )));
        }
        if self.crm.max_pages == 0 {
            return Err(ConfigError::Invalid("crm.max_pages must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn validate_report(&self) -> Result<(), ConfigError> {
        let required = [
            ("google.document_id", &self.google.document_id, "DOC_ID"),
            ("google.spreadsheet_id", &self.google.spreadsheet_id, "SPREADSHEET_ID"),
            ("google.access_token", &self.google.access_token, "GOOGLE_ACCESS_TOKEN"),
        ];
        for (key, value, env) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{key} is empty (set it or {env})")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_apply_for_empty_file() {
        let config = LeadsConfig::from_toml_str("").unwrap();
        assert_eq!(config.crm.base_url, DEFAULT_CRM_BASE_URL);
        assert_eq!(config.crm.session_path, DEFAULT_SESSION_PATH);
        assert_eq!(config.crm.fetch_range_days, 30);
        assert_eq!(config.crm.page_delay_ms, 300);
        assert_eq!(config.harvest.retention_days, 7);
        assert_eq!(config.report.ledger_commit, LedgerCommit::BeforeDelivery);
        assert_eq!(config.google.sheet_range, "A1");
    }

    #[test]
    fn test_toml_overrides_and_commit_policy() {
        let config = LeadsConfig::from_toml_str(
            r#"
            [crm]
            token = "abc"
            fetch_range_days = 14
            page_delay_ms = 0

            [report]
            ledger_path = "state/sent.json"
            ledger_commit = "after_delivery"
            "#,
        )
        .unwrap();

        assert_eq!(config.crm.token, "abc");
        assert_eq!(config.crm.fetch_range_days, 14);
        assert_eq!(config.crm.page_delay_ms, 0);
        assert_eq!(config.crm.max_pages, 1000);
        assert_eq!(config.report.ledger_path(), PathBuf::from("state/sent.json"));
        assert_eq!(config.report.ledger_commit, LedgerCommit::AfterDelivery);
    }

    #[test]
    fn test_env_fallbacks_fill_only_missing_values() {
        let mut config = LeadsConfig::from_toml_str(
            r#"
            [google]
            document_id = "doc-from-file"
            "#,
        )
        .unwrap();
        let env: HashMap<&str, &str> = [
            ("HELENA_API_KEY", "token-from-env"),
            ("HELENA_API_URL", "https://crm.example"),
            ("DOC_ID", "doc-from-env"),
            ("SPREADSHEET_ID", "sheet-from-env"),
            ("GOOGLE_ACCESS_TOKEN", "  "),
        ]
        .into_iter()
        .collect();

        config.apply_env_fallbacks(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.crm.token, "token-from-env");
        assert_eq!(config.crm.base_url, "https://crm.example");
        assert_eq!(config.google.document_id, "doc-from-file");
        assert_eq!(config.google.spreadsheet_id, "sheet-from-env");
        assert!(config.google.access_token.is_empty());
    }

    #[test]
    fn test_fetch_range_narrower_than_retention_is_rejected() {
        let config = LeadsConfig::from_toml_str(
            r#"
            [crm]
            token = "abc"
            fetch_range_days = 3
            "#,
        )
        .unwrap();

        match config.validate_harvest() {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("fetch_range_days")),
            other => panic!("Expected Invalid error, got {:?}", other),
        }
    }

    #[test]
    fn test_day_counts_are_bounded() {
        let mut config = LeadsConfig::from_toml_str(
            r#"
            [crm]
            token = "abc"
            "#,
        )
        .unwrap();
        config.harvest.retention_days = i64::MAX;
        config.crm.fetch_range_days = i64::MAX;

        match config.validate_harvest() {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains("fetch_range_days")),
            other => panic!("Expected Invalid error, got {:?}", other),
        }

        config.harvest.retention_days = MAX_WINDOW_DAYS;
        config.crm.fetch_range_days = MAX_WINDOW_DAYS;
        assert!(config.validate_harvest().is_ok());
    }

    #[test]
    fn test_harvest_requires_token() {
        let config = LeadsConfig::from_toml_str("").unwrap();
        assert!(config.validate_harvest().is_err());
    }

    #[test]
    fn test_report_requires_sink_identifiers() {
        let mut config = LeadsConfig::from_toml_str(
            r#"
            [google]
            document_id = "doc"
            spreadsheet_id = "sheet"
            "#,
        )
        .unwrap();
        assert!(config.validate_report().is_err());

        config.google.access_token = "ya29.token".to_string();
        assert!(config.validate_report().is_ok());
    }

    // The only test touching `LEADS_*` variables, so it cannot race another.
    #[test]
    fn test_load_layers_file_and_env_without_coercing_strings() {
        let dir = tempfile::TempDir::new().unwrap();

        let missing = dir.path().join("absent.toml");
        let config = LeadsConfig::load(missing.to_str().unwrap()).unwrap();
        assert_eq!(config.crm.page_delay_ms, 300);
        assert_eq!(config.harvest.retention_days, 7);

        let path = dir.path().join("leads.toml");
        std::fs::write(
            &path,
            r#"
            [crm]
            token = "file-token"
            page_delay_ms = 100
            max_pages = 20

            [google]
            spreadsheet_id = "sheet-from-file"
            "#,
        )
        .unwrap();

        std::env::set_var("LEADS_CRM__TOKEN", "00123");
        std::env::set_var("LEADS_GOOGLE__DOCUMENT_ID", "1e5");
        std::env::set_var("LEADS_CRM__PAGE_DELAY_MS", "50");
        let loaded = LeadsConfig::load(path.to_str().unwrap());
        std::env::remove_var("LEADS_CRM__TOKEN");
        std::env::remove_var("LEADS_GOOGLE__DOCUMENT_ID");
        std::env::remove_var("LEADS_CRM__PAGE_DELAY_MS");

        let config = loaded.unwrap();
        assert_eq!(config.crm.token, "00123");
        assert_eq!(config.google.document_id, "1e5");
        assert_eq!(config.crm.page_delay_ms, 50);
        assert_eq!(config.crm.max_pages, 20);
        assert_eq!(config.google.spreadsheet_id, "sheet-from-file");
    }
}
