//! modmigrate: portable export and import of learning modules
//!
//! Moves a module (its pages, media, authors, taxonomy terms and comments)
//! between sites through a self-describing archive:
//! - Content graph discovery with media URL resolution
//! - Streaming XML document writer and pull parser
//! - Zip packaging with a readme manifest
//! - Idempotent import with old-to-new identity remapping
//! - Deferred relationship fixups and cross-reference rewriting
//! - Structured progress events for long-running imports

pub mod archive;
pub mod config;
pub mod export;
pub mod import;
pub mod store;
pub mod types;
pub mod util;

pub use config::Config;
pub use types::*;
