//! Accumulates category tables extracted from free-form text into
//! per-category CSV datasets whose column set grows over time.

pub mod acquire;
pub mod config;
pub mod driver;
pub mod error;
pub mod export;
pub mod process;
pub mod schema;
pub mod store;

pub use config::Config;
pub use driver::{AccumulationDriver, BatchItem, BatchReport, Outcome};
pub use error::{DriverError, ParseError, StoreError};
pub use schema::{merge, normalize_key, Table};
pub use store::{Commit, DatasetStore, Location};
