//! Core types and algorithms for the Quire knowledge-base store.
//!
//! This crate is deliberately free of database dependencies. Everything that
//! can be decided without touching storage lives here: type inheritance,
//! polymorphic subtree resolution, relation extraction and reassembly, payload
//! validation, and the filter vocabulary shared by listing and search.

pub mod error;
pub mod input;
pub mod item;
pub mod payload;
pub mod query;
pub mod registry;
pub mod schema;
pub mod store;

pub use error::{Error, ErrorKind, Result};
