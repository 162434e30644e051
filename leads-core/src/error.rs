use thiserror::Error;

use crate::config::ConfigError;
use crate::crm::CrmError;
use crate::sinks::SinkError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum LeadsError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("CRM error: {0}")]
    Crm(#[from] CrmError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}
