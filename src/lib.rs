//! Site ledger calculator: sites holding up to three forms each, a balance
//! formula with history, and debounced key-value persistence.

pub mod amount;
pub mod autosave;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod history;
pub mod kv;
pub mod model;
pub mod rows;
pub mod stats;
pub mod store;
pub mod voice;

pub use error::{LedgerError, Result};
pub use model::{LedgerForm, Multiplier, ScalarField, Site, SiteColor, SitePatch};
pub use rows::{Edit, RowField, RowKind};
pub use store::{Direction, EditTicket, SiteStore, StoreOptions};
