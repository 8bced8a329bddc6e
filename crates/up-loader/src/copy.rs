//! Plain item copy (package CTR layer only)

use crate::pkg::{PkgContainer, PkgItem};
use std::io::{Read, Seek, Write};
use tracing::debug;
use up_core::{ExtractContext, Result};
use up_crypto::Key;

const COPY_CHUNK: usize = 1 << 16;

/// Decrypt an item verbatim into `out` in 64 KiB chunks, returning its size
pub fn copy_item<R: Read + Seek, W: Write>(
    pkg: &mut PkgContainer<R>,
    key: &Key,
    item: &PkgItem,
    out: &mut W,
    ctx: &ExtractContext<'_>,
    label: &str,
) -> Result<u64> {
    let mut buffer = vec![0u8; COPY_CHUNK];
    let mut offset = item.data_offset;
    let mut remaining = item.data_size;

    while remaining != 0 {
        let size = remaining.min(COPY_CHUNK as u64) as usize;
        ctx.checkpoint(label, pkg.header().absolute(offset))?;

        let chunk = &mut buffer[..size];
        pkg.read_decrypted(key, offset, chunk)?;
        out.write_all(chunk)?;

        offset += size as u64;
        remaining -= size as u64;
    }

    out.flush()?;
    debug!("copied {} ({} bytes)", item.name, item.data_size);
    Ok(item.data_size)
}
