//! Storage layer for unpsp
//!
//! All file access done by the extractors goes through [`Storage`]; disc
//! images are written through an [`ImageSink`], which either copies sectors
//! verbatim (ISO) or deflates them one by one into a CSO container.

pub mod formats;
pub mod image;
pub mod storage;

pub use formats::ciso::{CisoWriter, CISO_HEADER_SIZE, CISO_SECTOR_SIZE, CISO_STORED_FLAG};
pub use image::ImageSink;
pub use storage::{LocalStorage, Storage};
