//! # LocalSync Testkit
//!
//! Test utilities for localsync.
//!
//! This crate provides:
//! - [`FauxServer`], an in-process REST backend that can be switched off
//! - Cache fixtures over in-memory and temporary file stores
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust
//! use localsync_core::OperationConfig;
//! use localsync_testkit::prelude::*;
//!
//! with_book_cache(|cache, server| {
//!     let mut book = book_with_id(4);
//!     cache.fetch(&mut book, OperationConfig::fetch()).unwrap();
//!     assert_eq!(book.get("author").unwrap(), "John Steinbeck");
//!     assert_eq!(server.call_count(), 1);
//! });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faux_server;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faux_server::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use faux_server::*;
pub use fixtures::*;
pub use generators::*;
