//! SQLite backend for the Quire knowledge-base store.
//!
//! Every [`SqliteStore`] owns one [`rusqlite::Connection`]. Opening a store
//! brings its schema up to date first, so callers never see an older layout.

mod encode;
mod migrate;
mod schema;
mod search;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use search::SearchStrategy;
pub use store::SqliteStore;
