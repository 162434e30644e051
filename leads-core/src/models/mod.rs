pub mod lead;
pub mod session;

pub use lead::{parse_created_at, Lead, SkipReason};
pub use session::{SessionPage, SessionRecord};
