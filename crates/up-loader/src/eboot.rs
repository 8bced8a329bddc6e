//! EBOOT.PBP disc image reconstruction
//!
//! A PSP title ships its disc image inside EBOOT.PBP as an NPUMDIMG archive
//! (the PSAR). Its header carries the super-block size, the sector range and
//! the location of an offset table; every super-block can be found, sized
//! and flagged through that table. Extraction runs in stages:
//!
//! 1. EBOOT header: magic `\0PBP`, PSAR offset
//! 2. PSAR header: magic `NPUMDIMG`, content key unwrap, image geometry
//! 3. per super-block: table entry, package CTR layer, optional content-key
//!    layer, optional LZRC, then the image sink

use crate::{block_at, le32};
use crate::pkg::{PkgContainer, PkgItem};
use std::io::{Read, Seek, Write};
use tracing::{debug, info, trace};
use up_core::{ExtractContext, FormatError, Result};
use up_crypto::keys::KIRK7_KEY38;
use up_crypto::{cmac, Key, PspCipher, PspContainer};
use up_vfs::ImageSink;

pub const EBOOT_HEADER_SIZE: u64 = 0x28;
pub const PSAR_HEADER_SIZE: usize = 0x100;
pub const ISO_SECTOR_SIZE: usize = 2048;

/// Largest supported super-block, in sectors
pub const MAX_ISO_BLOCK: u32 = 16;

const EBOOT_MAGIC: [u8; 4] = *b"\0PBP";
const PSAR_MAGIC: [u8; 8] = *b"NPUMDIMG";
const TABLE_ENTRY_SIZE: u64 = 32;

/// Table flag: the block has no content-key layer
const BLOCK_FLAG_PLAIN: u32 = 4;

/// One offset table entry
///
/// Entries are eight little-endian words; the real values are XOR folds of
/// three of them. This hides the table from casual inspection and has no
/// cryptographic strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IsoBlockEntry {
    /// Offset from the start of the PSAR
    pub offset: u32,
    pub size: u32,
    pub flags: u32,
}

impl IsoBlockEntry {
    pub fn from_table(raw: &[u8; 32]) -> Self {
        let t: [u32; 8] = std::array::from_fn(|k| le32(raw, k * 4));
        Self {
            offset: t[4] ^ t[2] ^ t[3],
            size: t[5] ^ t[1] ^ t[2],
            flags: t[6] ^ t[0] ^ t[3],
        }
    }

    /// Whether the content-key layer applies
    pub fn has_content_layer(&self) -> bool {
        self.flags & BLOCK_FLAG_PLAIN == 0
    }
}

/// Parsed PSAR header and its content key
#[derive(Debug, Clone)]
pub struct PsarImage {
    /// PSAR offset inside the EBOOT
    pub psar_offset: u32,
    /// Sectors per super-block
    pub iso_block: u32,
    pub iso_start: u32,
    pub iso_end: u32,
    /// Offset table position inside the PSAR
    pub iso_table: u32,
    pub block_count: u32,
    cipher: PspCipher,
}

impl PsarImage {
    /// Decompressed size of one super-block
    pub fn super_block_size(&self) -> usize {
        self.iso_block as usize * ISO_SECTOR_SIZE
    }

    /// Size of the reconstructed image
    pub fn image_size(&self) -> u64 {
        u64::from(self.block_count) * self.super_block_size() as u64
    }
}

/// Rebuilds the disc image of one EBOOT.PBP item
pub struct EbootExtractor<'a, R: Read + Seek> {
    pkg: &'a mut PkgContainer<R>,
    key: Key,
    item: &'a PkgItem,
}

impl<'a, R: Read + Seek> EbootExtractor<'a, R> {
    pub fn new(pkg: &'a mut PkgContainer<R>, key: &Key, item: &'a PkgItem) -> Self {
        Self {
            pkg,
            key: *key,
            item,
        }
    }

    /// Validate the EBOOT and PSAR headers and unwrap the content key
    pub fn read_psar(&mut self) -> Result<PsarImage> {
        let item_size = self.item.data_size;
        if item_size < EBOOT_HEADER_SIZE {
            return Err(FormatError::TooSmall {
                what: "EBOOT header",
                needed: EBOOT_HEADER_SIZE,
                available: item_size,
            }
            .into());
        }

        let mut eboot = [0u8; EBOOT_HEADER_SIZE as usize];
        self.pkg
            .read_decrypted(&self.key, self.item.data_offset, &mut eboot)?;

        if eboot[0..4] != EBOOT_MAGIC {
            return Err(FormatError::BadMagic {
                structure: "EBOOT",
                found: u32::from_be_bytes([eboot[0], eboot[1], eboot[2], eboot[3]]),
            }
            .into());
        }

        let psar_offset = le32(&eboot, 0x24);
        let psar_end = u64::from(psar_offset) + PSAR_HEADER_SIZE as u64;
        if psar_end > item_size {
            return Err(FormatError::TooSmall {
                what: "PSAR header",
                needed: psar_end,
                available: item_size,
            }
            .into());
        }
        if psar_offset % 16 != 0 {
            return Err(FormatError::Corrupted(format!(
                "PSAR offset 0x{:x} is not 16-byte aligned",
                psar_offset
            ))
            .into());
        }

        let mut psar = [0u8; PSAR_HEADER_SIZE];
        self.pkg.read_decrypted(
            &self.key,
            self.item.data_offset + u64::from(psar_offset),
            &mut psar,
        )?;

        if psar[0..8] != PSAR_MAGIC {
            return Err(FormatError::BadMagic {
                structure: "PSAR",
                found: u32::from_be_bytes([psar[0], psar[1], psar[2], psar[3]]),
            }
            .into());
        }

        let iso_block = le32(&psar, 0x0C);
        if iso_block == 0 || iso_block > MAX_ISO_BLOCK {
            return Err(FormatError::UnsupportedBlockSize(iso_block).into());
        }

        let mac = cmac(&KIRK7_KEY38, &psar[..0xC0]);
        let cipher = PspCipher::derive(
            &mac,
            &block_at(&psar, 0xC0),
            &block_at(&psar, 0xA0),
            PspContainer::Psar,
        );
        cipher.decrypt(0, &mut psar[0x40..0xA0])?;

        let iso_start = le32(&psar, 0x54);
        let iso_end = le32(&psar, 0x64);
        let iso_table = le32(&psar, 0x6C);

        let sectors = iso_end
            .checked_sub(iso_start)
            .and_then(|n| n.checked_sub(1))
            .ok_or_else(|| {
                FormatError::Corrupted(format!(
                    "PSAR sector range {}..{} is empty",
                    iso_start, iso_end
                ))
            })?;
        let block_count = sectors.div_ceil(iso_block);

        let table_end = u64::from(psar_offset)
            + u64::from(iso_table)
            + u64::from(block_count) * TABLE_ENTRY_SIZE;
        if table_end > item_size {
            return Err(FormatError::TooSmall {
                what: "PSAR offset table",
                needed: table_end,
                available: item_size,
            }
            .into());
        }

        info!(
            "PSAR: {} sectors in {} blocks of {} sectors",
            sectors, block_count, iso_block
        );

        Ok(PsarImage {
            psar_offset,
            iso_block,
            iso_start,
            iso_end,
            iso_table,
            block_count,
            cipher,
        })
    }

    /// Decode offset table entry `index`
    pub fn block_entry(&mut self, psar: &PsarImage, index: u32) -> Result<IsoBlockEntry> {
        let offset = self.item.data_offset
            + u64::from(psar.psar_offset)
            + u64::from(psar.iso_table)
            + TABLE_ENTRY_SIZE * u64::from(index);

        let mut raw = [0u8; TABLE_ENTRY_SIZE as usize];
        self.pkg.read_decrypted(&self.key, offset, &mut raw)?;
        Ok(IsoBlockEntry::from_table(&raw))
    }

    /// Decrypt and decompress every super-block into `sink`, returning the image size
    pub fn extract<W: Write + Seek>(
        &mut self,
        psar: &PsarImage,
        sink: &mut ImageSink<W>,
        ctx: &ExtractContext<'_>,
        label: &str,
    ) -> Result<u64> {
        let block_size = psar.super_block_size();
        let max_size = MAX_ISO_BLOCK as usize * ISO_SECTOR_SIZE;
        let mut data = vec![0u8; max_size];
        let mut plain = vec![0u8; max_size];

        for index in 0..psar.block_count {
            let entry = self.block_entry(psar, index)?;
            let size = entry.size as usize;

            let end = u64::from(psar.psar_offset) + u64::from(entry.offset) + u64::from(entry.size);
            if size > max_size || end > self.item.data_size {
                return Err(FormatError::Corrupted(format!(
                    "PSAR block {} at 0x{:x} ({} bytes) lies outside the item",
                    index, entry.offset, entry.size
                ))
                .into());
            }

            let offset =
                self.item.data_offset + u64::from(psar.psar_offset) + u64::from(entry.offset);
            ctx.checkpoint(label, self.pkg.header().absolute(offset))?;

            let block = &mut data[..size];
            self.pkg.read_decrypted(&self.key, offset, block)?;

            if entry.has_content_layer() {
                if size % 16 != 0 {
                    return Err(FormatError::Corrupted(format!(
                        "PSAR block {} size {} is not a multiple of 16",
                        index, size
                    ))
                    .into());
                }
                psar.cipher.decrypt(entry.offset / 16, block)?;
            }

            if size == block_size {
                trace!("PSAR block {}: stored", index);
                sink.write_sectors(block)?;
            } else {
                trace!("PSAR block {}: {} bytes compressed", index, size);
                let out = &mut plain[..block_size];
                up_lzrc::decompress_exact(block, out)?;
                sink.write_sectors(out)?;
            }
        }

        debug!("PSAR: wrote {} bytes", psar.image_size());
        Ok(psar.image_size())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{sample_sectors, EbootBuilder, PkgBuilder};
    use crate::pkg::{ContentKind, PkgKeys};
    use std::io::Cursor;
    use up_core::config::ImageFormat;
    use up_core::{RangeDecodeError, UnpackError};

    const EBOOT: &str = "USRDIR/CONTENT/EBOOT.PBP";

    fn open_item(eboot: Vec<u8>) -> (PkgContainer<Cursor<Vec<u8>>>, PkgKeys, PkgItem) {
        let bytes = PkgBuilder::new(7).file(EBOOT, eboot).build();
        let size = bytes.len() as u64;
        let mut pkg = PkgContainer::open(Cursor::new(bytes), size).unwrap();
        let keys = PkgKeys::for_header(pkg.header()).unwrap();
        let item = pkg.decrypt_item(&keys, ContentKind::DiscImage, 0, 0).unwrap();
        (pkg, keys, item)
    }

    fn extract(eboot: Vec<u8>) -> Result<Vec<u8>> {
        let (mut pkg, keys, item) = open_item(eboot);
        let mut extractor = EbootExtractor::new(&mut pkg, &keys.main, &item);
        let psar = extractor.read_psar()?;
        let mut sink = ImageSink::new(Cursor::new(Vec::new()), ImageFormat::Iso, psar.image_size())?;
        extractor.extract(&psar, &mut sink, &ExtractContext::silent(), "test.iso")?;
        Ok(sink.finish()?.into_inner())
    }

    #[test]
    fn test_table_entry_fold() {
        let words: [u32; 8] = [1, 2, 4, 8, 0x100 ^ 4 ^ 8, 0x800 ^ 2 ^ 4, 4 ^ 1 ^ 8, 0];
        let mut raw = [0u8; 32];
        for (k, w) in words.iter().enumerate() {
            raw[k * 4..k * 4 + 4].copy_from_slice(&w.to_le_bytes());
        }
        let entry = IsoBlockEntry::from_table(&raw);
        assert_eq!(
            entry,
            IsoBlockEntry {
                offset: 0x100,
                size: 0x800,
                flags: 4
            }
        );
        assert!(!entry.has_content_layer());
    }

    #[test]
    fn test_psar_geometry() {
        let eboot = EbootBuilder::new(2)
            .raw_block(sample_sectors(2, 1), true)
            .raw_block(sample_sectors(2, 2), false)
            .build();
        let (mut pkg, keys, item) = open_item(eboot);
        let psar = EbootExtractor::new(&mut pkg, &keys.main, &item).read_psar().unwrap();

        assert_eq!(psar.iso_block, 2);
        assert_eq!(psar.block_count, 2);
        assert_eq!(psar.iso_start, 0);
        assert_eq!(psar.iso_end, 5);
        assert_eq!(psar.image_size(), 4 * 2048);
    }

    #[test]
    fn test_raw_blocks_both_layers() {
        let a = sample_sectors(1, 3);
        let b = sample_sectors(1, 5);
        let eboot = EbootBuilder::new(1)
            .raw_block(a.clone(), true)
            .raw_block(b.clone(), false)
            .build();

        let image = extract(eboot).unwrap();
        assert_eq!(image, [a, b].concat());
    }

    #[test]
    fn test_compressed_blocks() {
        let a = sample_sectors(4, 7);
        let b = sample_sectors(4, 9);
        let eboot = EbootBuilder::new(4)
            .stored_block(a.clone(), true)
            .stored_block(b.clone(), false)
            .build();

        let image = extract(eboot).unwrap();
        assert_eq!(image, [a, b].concat());
    }

    #[test]
    fn test_short_decompression_fails() {
        let mut payload = vec![0x80, 0, 0, 0, 0x10];
        payload.extend_from_slice(&[0u8; 16]);
        let eboot = EbootBuilder::new(1).compressed_block(payload, false).build();

        assert!(matches!(
            extract(eboot),
            Err(UnpackError::RangeDecode(RangeDecodeError::SizeMismatch {
                expected: 2048,
                actual: 16
            }))
        ));
    }

    #[test]
    fn test_bad_eboot_magic() {
        let mut eboot = EbootBuilder::new(1).raw_block(sample_sectors(1, 1), false).build();
        eboot[1] = b'X';
        assert!(matches!(
            extract(eboot),
            Err(UnpackError::Format(FormatError::BadMagic { structure: "EBOOT", .. }))
        ));
    }

    #[test]
    fn test_bad_psar_magic() {
        let mut eboot = EbootBuilder::new(1).raw_block(sample_sectors(1, 1), false).build();
        eboot[0x30] = b'X';
        assert!(matches!(
            extract(eboot),
            Err(UnpackError::Format(FormatError::BadMagic { structure: "PSAR", .. }))
        ));
    }

    #[test]
    fn test_block_size_limit() {
        let eboot = EbootBuilder::new(17).raw_block(sample_sectors(17, 1), false).build();
        assert!(matches!(
            extract(eboot),
            Err(UnpackError::Format(FormatError::UnsupportedBlockSize(17)))
        ));
    }

    #[test]
    fn test_short_eboot() {
        assert!(matches!(
            extract(vec![0u8; 0x20]),
            Err(UnpackError::Format(FormatError::TooSmall { what: "EBOOT header", .. }))
        ));
    }

    #[test]
    fn test_psar_beyond_item() {
        let mut eboot = EbootBuilder::new(1).raw_block(sample_sectors(1, 1), false).build();
        let len = eboot.len() as u32;
        eboot[0x24..0x28].copy_from_slice(&len.to_le_bytes());
        assert!(matches!(
            extract(eboot),
            Err(UnpackError::Format(FormatError::TooSmall { what: "PSAR header", .. }))
        ));
    }

    #[test]
    fn test_cancel_between_blocks() {
        use std::cell::Cell;
        use up_core::Cancellation;

        struct AfterFirst(Cell<u32>);
        impl Cancellation for AfterFirst {
            fn is_cancelled(&self) -> bool {
                let n = self.0.get() + 1;
                self.0.set(n);
                n > 1
            }
        }

        let eboot = EbootBuilder::new(1)
            .raw_block(sample_sectors(1, 1), false)
            .raw_block(sample_sectors(1, 2), false)
            .build();
        let (mut pkg, keys, item) = open_item(eboot);
        let mut extractor = EbootExtractor::new(&mut pkg, &keys.main, &item);
        let psar = extractor.read_psar().unwrap();
        let mut sink = ImageSink::new(Cursor::new(Vec::new()), ImageFormat::Iso, psar.image_size()).unwrap();

        let cancel = AfterFirst(Cell::new(0));
        let ctx = ExtractContext::new(&up_core::NoProgress, &cancel);
        assert!(matches!(
            extractor.extract(&psar, &mut sink, &ctx, "x.iso"),
            Err(UnpackError::Cancelled)
        ));
        assert_eq!(sink.finish().unwrap().into_inner(), sample_sectors(1, 1));
    }
}
