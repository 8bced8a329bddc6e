//! PKG loader for unpsp
//!
//! [`pkg`] parses the container and decrypts its item table; [`eboot`],
//! [`edat`] and [`copy`] are the per-item extraction pipelines.

pub mod copy;
pub mod eboot;
pub mod edat;
pub mod pkg;
pub mod summary;

#[cfg(any(test, feature = "fixtures"))]
pub mod fixtures;

pub use copy::copy_item;
pub use eboot::{EbootExtractor, IsoBlockEntry, PsarImage};
pub use edat::{EdatExtractor, EdatHeader};
pub use pkg::{ContentKind, MetaBlock, PkgContainer, PkgHeader, PkgItem, PkgKeys, PkgMetadata};
pub use summary::{inspect, PkgSummary};

pub(crate) fn be32(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

pub(crate) fn be64(data: &[u8], offset: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[offset..offset + 8]);
    u64::from_be_bytes(bytes)
}

pub(crate) fn block_at(data: &[u8], offset: usize) -> up_crypto::Block {
    let mut block = [0u8; 16];
    block.copy_from_slice(&data[offset..offset + 16]);
    block
}

pub(crate) fn le32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}
