//! Services for receivables-service.

pub mod allocation;
pub mod database;
pub mod debt;
mod invoices;
pub(crate) mod ledger;
pub mod metrics;
mod payments;
pub mod returns;

pub use database::Database;
pub use metrics::{get_metrics, init_metrics};
