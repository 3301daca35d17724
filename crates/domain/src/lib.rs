//! Shared types for every LinkHub crate: configuration, the error
//! taxonomy, structured trace events and the media pipeline seam.

pub mod config;
pub mod error;
pub mod media;
pub mod trace;

pub use error::{Error, Result};
