//! shroud-core: shared types, configuration, and the error taxonomy.
//!
//! Everything here is dependency-light so the other crates (crypto, format,
//! fs) can agree on error and config types without pulling each other in.

pub mod config;
pub mod error;
pub mod types;
pub mod validation;

pub use config::{Config, FilenameMode, ParallelConfig};
pub use error::{Error, Result};
pub use types::CipherSuite;
