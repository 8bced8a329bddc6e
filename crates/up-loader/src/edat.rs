//! EDAT (PGD-wrapped) file decryption
//!
//! Only key index 1 with DRM type 1 is supported; that is what PSP themes
//! use. The item starts with a small header whose byte 0x0C points at the
//! 0xA0-byte PGD key header. Data follows 0x90 bytes after the key header
//! in 16-byte blocks, each under the package CTR layer and the content key.

use crate::{block_at, le32};
use crate::pkg::{PkgContainer, PkgItem};
use std::io::{Read, Seek, Write};
use tracing::{debug, info};
use up_core::{ExtractContext, FormatError, Result};
use up_crypto::keys::KIRK7_KEY38;
use up_crypto::{cmac, Key, PspCipher, PspContainer};

const PGD_MAGIC: [u8; 4] = *b"\0PGD";
const ITEM_HEADER_SIZE: usize = 0x10;
const KEY_HEADER_SIZE: usize = 0xA0;

/// Offset of the data from the key header
const DATA_OFFSET: u32 = 0x90;

/// Smallest possible EDAT item
pub const EDAT_MIN_SIZE: u64 = 0x90 + KEY_HEADER_SIZE as u64;

/// Blocks decrypted between progress reports (128 KiB)
const BLOCKS_PER_REPORT: usize = 0x2000;
const EDAT_BLOCK_SIZE: usize = 16;

/// Validated PGD key header
#[derive(Debug, Clone)]
pub struct EdatHeader {
    /// Key header offset inside the item
    pub key_header_offset: u8,
    /// Plaintext size
    pub data_size: u32,
    cipher: PspCipher,
}

impl EdatHeader {
    fn block_count(&self) -> usize {
        (self.data_size as usize).div_ceil(EDAT_BLOCK_SIZE)
    }
}

/// Decrypts one EDAT item
pub struct EdatExtractor<'a, R: Read + Seek> {
    pkg: &'a mut PkgContainer<R>,
    key: Key,
    item: &'a PkgItem,
}

impl<'a, R: Read + Seek> EdatExtractor<'a, R> {
    pub fn new(pkg: &'a mut PkgContainer<R>, key: &Key, item: &'a PkgItem) -> Self {
        Self {
            pkg,
            key: *key,
            item,
        }
    }

    /// Locate and validate the key header and unwrap the data key
    pub fn read_header(&mut self) -> Result<EdatHeader> {
        let item_size = self.item.data_size;
        if item_size < EDAT_MIN_SIZE {
            return Err(FormatError::TooSmall {
                what: "EDAT file",
                needed: EDAT_MIN_SIZE,
                available: item_size,
            }
            .into());
        }

        let mut item_header = [0u8; ITEM_HEADER_SIZE];
        self.pkg
            .read_decrypted(&self.key, self.item.data_offset, &mut item_header)?;
        let key_header_offset = item_header[0x0C];

        let key_header_end = u64::from(key_header_offset) + KEY_HEADER_SIZE as u64;
        if key_header_end > item_size {
            return Err(FormatError::TooSmall {
                what: "EDAT key header",
                needed: key_header_end,
                available: item_size,
            }
            .into());
        }

        let mut kh = [0u8; KEY_HEADER_SIZE];
        self.pkg.read_decrypted(
            &self.key,
            self.item.data_offset + u64::from(key_header_offset),
            &mut kh,
        )?;

        if kh[0..4] != PGD_MAGIC {
            return Err(FormatError::BadMagic {
                structure: "EDAT",
                found: u32::from_be_bytes([kh[0], kh[1], kh[2], kh[3]]),
            }
            .into());
        }

        let key_index = le32(&kh, 4);
        let drm_type = le32(&kh, 8);
        if key_index != 1 || drm_type != 1 {
            return Err(FormatError::UnsupportedEdat(format!(
                "key index {}, drm type {}",
                key_index, drm_type
            ))
            .into());
        }

        let mac = cmac(&KIRK7_KEY38, &kh[..0x70]);
        let key_seed = block_at(&kh, 0x70);
        let header_cipher = PspCipher::derive(
            &mac,
            &key_seed,
            &block_at(&kh, 0x10),
            PspContainer::Edat,
        );
        header_cipher.decrypt(0, &mut kh[0x30..0x60])?;

        let data_size = le32(&kh, 0x44);
        let data_offset = le32(&kh, 0x4C);
        if data_offset != DATA_OFFSET {
            return Err(FormatError::UnsupportedEdat(format!(
                "data offset 0x{:x}",
                data_offset
            ))
            .into());
        }

        let data_end = u64::from(key_header_offset)
            + u64::from(DATA_OFFSET)
            + u64::from(data_size).div_ceil(16) * 16;
        if data_end > item_size {
            return Err(FormatError::TooSmall {
                what: "EDAT data",
                needed: data_end,
                available: item_size,
            }
            .into());
        }

        // The data key uses the decrypted header field at 0x30 as its seed
        let cipher = PspCipher::derive(
            &mac,
            &key_seed,
            &block_at(&kh, 0x30),
            PspContainer::Edat,
        );

        info!("EDAT: {} bytes of data", data_size);

        Ok(EdatHeader {
            key_header_offset,
            data_size,
            cipher,
        })
    }

    /// Decrypt the data into `out`, returning the number of bytes written
    pub fn extract<W: Write>(
        &mut self,
        header: &EdatHeader,
        out: &mut W,
        ctx: &ExtractContext<'_>,
        label: &str,
    ) -> Result<u64> {
        let base = self.item.data_offset
            + u64::from(header.key_header_offset)
            + u64::from(DATA_OFFSET);
        let block_count = header.block_count();
        let mut remaining = header.data_size as usize;
        let mut buffer = vec![0u8; BLOCKS_PER_REPORT * EDAT_BLOCK_SIZE];

        // A run of blocks decrypts the same as block by block: the CTR
        // counter and the content-key index both advance by one per block
        let mut block = 0;
        while block < block_count {
            let count = (block_count - block).min(BLOCKS_PER_REPORT);
            let offset = base + (block * EDAT_BLOCK_SIZE) as u64;
            ctx.checkpoint(label, self.pkg.header().absolute(offset))?;

            let chunk = &mut buffer[..count * EDAT_BLOCK_SIZE];
            self.pkg.read_decrypted(&self.key, offset, chunk)?;
            header.cipher.decrypt(block as u32, chunk)?;

            let len = remaining.min(chunk.len());
            out.write_all(&chunk[..len])?;
            remaining -= len;
            block += count;
        }

        out.flush()?;
        debug!("EDAT: wrote {} bytes", header.data_size);
        Ok(u64::from(header.data_size))
    }
}
