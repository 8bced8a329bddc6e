//! Core types for the unpsp package unpacker
//!
//! This crate provides the error taxonomy, configuration, logging setup and
//! the progress/cancellation collaborators shared by the extraction crates.

pub mod config;
pub mod error;
pub mod logging;
pub mod progress;

pub use config::Config;
pub use error::{FormatError, RangeDecodeError, Result, UnpackError};
pub use progress::{CancelFlag, Cancellation, ExtractContext, NoProgress, Progress, TracingProgress};
