//! Core types shared by the spvfuzz crates: the error taxonomy, session
//! configuration and the fresh-id allocator.

pub mod config;
pub mod error;
pub mod ids;

pub use config::*;
pub use error::{Error, Result};
pub use ids::{FreshIdAllocator, Id};
