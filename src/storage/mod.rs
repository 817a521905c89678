pub mod database;
pub mod memory;
pub mod traits;

pub use database::{DatabaseManager, DatabaseStorage};
pub use traits::{AuditSummaryRow, Storage};
