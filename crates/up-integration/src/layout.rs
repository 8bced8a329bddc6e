//! Output layout on the storage device
//!
//! - disc images: `ISO/<label> [<title id>].iso|cso`
//! - themes: `PSP/THEME/<item name>`
//! - PSX titles: `PSP/GAME/<title id>/{EBOOT.PBP,DOCUMENT.DAT}`

use std::path::{Component, Path, PathBuf};
use up_core::config::ImageFormat;
use up_core::{FormatError, Result};
use up_loader::{ContentKind, PkgHeader};

pub const ISO_DIR: &str = "ISO";
pub const THEME_DIR: &str = "PSP/THEME";
pub const GAME_DIR: &str = "PSP/GAME";

const CONTENT_EBOOT: &str = "USRDIR/CONTENT/EBOOT.PBP";
const CONTENT_DOCUMENT: &str = "USRDIR/CONTENT/DOCUMENT.DAT";

/// Extraction pipeline for an item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pipeline {
    /// EBOOT.PBP disc image to ISO or CSO
    DiscImage,
    /// PGD-wrapped file
    Edat,
    /// Verbatim copy
    Copy,
}

/// Where and how one item is extracted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemTarget {
    /// Output path relative to the storage root
    pub path: PathBuf,
    pub pipeline: Pipeline,
}

/// Directory created before any item of `kind` is written
pub fn content_root(kind: ContentKind, header: &PkgHeader) -> Result<PathBuf> {
    Ok(match kind {
        ContentKind::DiscImage => PathBuf::from(ISO_DIR),
        ContentKind::Theme => PathBuf::from(THEME_DIR),
        ContentKind::Psx => Path::new(GAME_DIR).join(header_field("title id", &header.title_id())?),
    })
}

/// Header text used inside a file name: printable ASCII, no separators, no `..`
fn header_field(what: &str, value: &str) -> Result<String> {
    let printable = value.bytes().all(|b| (0x20..0x7F).contains(&b));
    if !printable || value.contains(|c| c == '/' || c == '\\') || value.contains("..") {
        return Err(FormatError::Corrupted(format!("unsafe {} {:?}", what, value)).into());
    }
    Ok(value.to_string())
}

/// Decide the target of item `name`; `Ok(None)` means the item is skipped
pub fn route_item(
    kind: ContentKind,
    header: &PkgHeader,
    name: &str,
    format: ImageFormat,
) -> Result<Option<ItemTarget>> {
    let target = match kind {
        ContentKind::DiscImage if name == CONTENT_EBOOT => Some(ItemTarget {
            path: Path::new(ISO_DIR).join(format!(
                "{} [{}].{}",
                header_field("label", &header.label())?,
                header_field("title id", &header.title_id())?,
                format.extension()
            )),
            pipeline: Pipeline::DiscImage,
        }),
        ContentKind::DiscImage => None,
        ContentKind::Theme => Some(ItemTarget {
            path: Path::new(THEME_DIR).join(relative_name(name)?),
            pipeline: Pipeline::Edat,
        }),
        ContentKind::Psx => {
            let file = match name {
                CONTENT_DOCUMENT => Some("DOCUMENT.DAT"),
                CONTENT_EBOOT => Some("EBOOT.PBP"),
                _ => None,
            };
            match file {
                Some(file) => Some(ItemTarget {
                    path: content_root(kind, header)?.join(file),
                    pipeline: Pipeline::Copy,
                }),
                None => None,
            }
        }
    };
    Ok(target)
}

/// Item names must stay below their output directory
fn relative_name(name: &str) -> Result<PathBuf> {
    let path = Path::new(name);
    let escapes = path.components().any(|c| !matches!(c, Component::Normal(_)));
    if name.is_empty() || escapes {
        return Err(FormatError::Corrupted(format!("unsafe item name {:?}", name)).into());
    }
    Ok(path.to_path_buf())
}
