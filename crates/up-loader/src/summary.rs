//! Package summary for display

use crate::pkg::{ContentKind, PkgContainer};
use serde::Serialize;
use std::io::{Read, Seek};
use up_core::Result;

/// What a package contains, read without decrypting any item
#[derive(Debug, Clone, Serialize)]
pub struct PkgSummary {
    pub content_id: String,
    pub title_id: String,
    pub label: String,
    pub content_type: u32,
    /// `None` for content this unpacker cannot extract
    pub kind: Option<ContentKind>,
    pub drm_type: Option<u32>,
    pub item_count: u32,
    pub total_size: u64,
    pub key_type: u8,
}

/// Summarize an open package
pub fn inspect<R: Read + Seek>(pkg: &mut PkgContainer<R>) -> Result<PkgSummary> {
    let metadata = pkg.metadata()?;
    let header = pkg.header();

    Ok(PkgSummary {
        content_id: header.content_id.clone(),
        title_id: header.title_id(),
        label: header.label(),
        content_type: metadata.content_type,
        kind: ContentKind::from_content_type(metadata.content_type),
        drm_type: metadata.drm_type,
        item_count: header.item_count,
        total_size: header.total_size,
        key_type: header.key_type,
    })
}
