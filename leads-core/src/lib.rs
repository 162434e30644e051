pub mod config;
pub mod crm;
pub mod error;
pub mod models;
pub mod sinks;
pub mod store;

pub use crate::config::{ConfigError, LeadsConfig, LedgerCommit};
pub use crm::{CrmClient, CrmError, FetchWindow, SessionSource};
pub use error::LeadsError;
pub use models::{Lead, SessionRecord, SkipReason};
pub use sinks::{DocumentSink, GoogleDocsClient, GoogleSheetsClient, Row, SinkError, SpreadsheetSink};
pub use store::{Ledger, StoreError};
