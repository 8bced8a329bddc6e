//! Package installation for unpsp
//!
//! This crate ties the loader pipelines to the storage layer: it decides
//! which items of a package are extracted, where they go and what happens
//! to half-written output when an item fails.

pub mod installer;
pub mod layout;

pub use installer::{InstallOptions, InstallReport, ItemFailure, PkgInstaller};
pub use layout::{route_item, ItemTarget, Pipeline};
