//! PlayStation package (.pkg) container
//!
//! Layout (all integers big-endian):
//! - 0x00..0xC0 header: magic, metadata location, item count, sizes,
//!   content id at 0x30, CTR IV at 0x70, key type in the low bits of 0xE7
//! - 0xC0..0x100 extension header, magic `\x7Fext`
//! - plaintext metadata blocks at `meta_offset`
//! - the encrypted region at `enc_offset`: item table, names, file data
//!
//! Everything inside the encrypted region is AES-128-CTR with the header IV
//! and the counter set to the byte offset inside the region divided by 16.

use crate::{be32, be64};
use serde::Serialize;
use std::io::{Read, Seek, SeekFrom};
use tracing::{debug, info, warn};
use up_core::{FormatError, Result};
use up_crypto::keys::{PKG_PS3_KEY, PKG_PSP_KEY};
use up_crypto::{ctr_xor, Block, Key};

/// PKG file magic ("\x7FPKG")
pub const PKG_MAGIC: u32 = 0x7F50_4B47;

/// Extension header magic ("\x7Fext")
pub const PKG_EXT_MAGIC: u32 = 0x7F65_7874;

pub const PKG_HEADER_SIZE: usize = 0xC0;
pub const PKG_EXT_HEADER_SIZE: usize = 0x40;

/// Size of one item table entry
pub const ITEM_ENTRY_SIZE: u64 = 32;

/// Item names at or above this length are rejected
pub const MAX_NAME_SIZE: u32 = 1024;

/// Item `psp_type` selecting the PSP package key for disc images and PSX titles
pub const PSP_TYPE_MAIN_KEY: u8 = 0x90;

/// Metadata block types
pub mod meta {
    pub const DRM_TYPE: u32 = 1;
    pub const CONTENT_TYPE: u32 = 2;
    pub const ITEM_TABLE: u32 = 13;
    pub const PARAM_SFO: u32 = 14;
}

/// Parsed package header
#[derive(Debug, Clone)]
pub struct PkgHeader {
    pub meta_offset: u64,
    pub meta_count: u32,
    pub item_count: u32,
    pub total_size: u64,
    pub enc_offset: u64,
    pub enc_size: u64,
    /// Content id, e.g. `UP9000-NPUZ00001_00-LOCOROCO00000001`
    pub content_id: String,
    pub key_type: u8,
    pub iv: Block,
    raw: [u8; PKG_HEADER_SIZE + PKG_EXT_HEADER_SIZE],
}

impl PkgHeader {
    /// Parse and validate the header of a package of `file_size` bytes
    pub fn parse(data: &[u8], file_size: u64) -> Result<Self> {
        let needed = PKG_HEADER_SIZE + PKG_EXT_HEADER_SIZE;
        if data.len() < needed {
            return Err(FormatError::TooSmall {
                what: "PKG header",
                needed: needed as u64,
                available: data.len() as u64,
            }
            .into());
        }

        let magic = be32(data, 0);
        if magic != PKG_MAGIC {
            return Err(FormatError::BadMagic {
                structure: "PKG",
                found: magic,
            }
            .into());
        }

        let ext_magic = be32(data, PKG_HEADER_SIZE);
        if ext_magic != PKG_EXT_MAGIC {
            return Err(FormatError::BadMagic {
                structure: "PKG extension header",
                found: ext_magic,
            }
            .into());
        }

        let meta_offset = u64::from(be32(data, 8));
        let meta_count = be32(data, 12);
        let item_count = be32(data, 20);
        let total_size = be64(data, 24);
        let enc_offset = be64(data, 32);
        let enc_size = be64(data, 40);

        if file_size < total_size {
            return Err(FormatError::TooSmall {
                what: "PKG file",
                needed: total_size,
                available: file_size,
            }
            .into());
        }

        let table_end = enc_offset.saturating_add(u64::from(item_count) * ITEM_ENTRY_SIZE);
        if file_size < table_end {
            return Err(FormatError::TooSmall {
                what: "PKG item table",
                needed: table_end,
                available: file_size,
            }
            .into());
        }

        let content_id = text_field(&data[0x30..0x60]);

        let mut iv = [0u8; 16];
        iv.copy_from_slice(&data[0x70..0x80]);

        let mut raw = [0u8; PKG_HEADER_SIZE + PKG_EXT_HEADER_SIZE];
        raw.copy_from_slice(&data[..needed]);

        let header = Self {
            meta_offset,
            meta_count,
            item_count,
            total_size,
            enc_offset,
            enc_size,
            content_id,
            key_type: data[0xE7] & 7,
            iv,
            raw,
        };

        info!(
            "PKG header: content_id={}, items={}, size={}, key_type={}",
            header.content_id, header.item_count, header.total_size, header.key_type
        );

        Ok(header)
    }

    /// Nine-character title id embedded in the content id (`NPUZ00001`)
    pub fn title_id(&self) -> String {
        String::from_utf8_lossy(&self.raw[0x37..0x40]).into_owned()
    }

    /// Label part of the content id, used to name disc images
    pub fn label(&self) -> String {
        text_field(&self.raw[0x44..0x54])
    }

    /// Absolute file offset of a position inside the encrypted region
    pub fn absolute(&self, offset: u64) -> u64 {
        self.enc_offset + offset
    }
}

/// NUL-terminated text field
fn text_field(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// One metadata block: type, declared size and payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaBlock {
    pub block_type: u32,
    pub size: u32,
    pub payload: Vec<u8>,
}

impl MetaBlock {
    /// Big-endian u32 at `offset` inside the payload
    pub fn u32_at(&self, offset: usize) -> Option<u32> {
        self.payload
            .get(offset..offset + 4)
            .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Lazy, single-pass walk over the metadata blocks
pub struct MetaBlocks<'a, R: Read + Seek> {
    pkg: &'a mut PkgContainer<R>,
    offset: u64,
    remaining: u32,
}

impl<'a, R: Read + Seek> Iterator for MetaBlocks<'a, R> {
    type Item = Result<MetaBlock>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;

        let result = self.read_block();
        if result.is_err() {
            self.remaining = 0;
        }
        Some(result)
    }
}

impl<'a, R: Read + Seek> MetaBlocks<'a, R> {
    fn read_block(&mut self) -> Result<MetaBlock> {
        let mut head = [0u8; 8];
        self.pkg.read_at(self.offset, &mut head)?;

        let block_type = be32(&head, 0);
        let size = be32(&head, 4);

        let end = self.offset + 8 + u64::from(size);
        if end > self.pkg.file_size {
            return Err(FormatError::TooSmall {
                what: "PKG metadata block",
                needed: end,
                available: self.pkg.file_size,
            }
            .into());
        }

        let mut payload = vec![0u8; size as usize];
        self.pkg.read_at(self.offset + 8, &mut payload)?;

        debug!("PKG metadata: type={}, size={}", block_type, size);
        self.offset = end;

        Ok(MetaBlock {
            block_type,
            size,
            payload,
        })
    }
}

/// The metadata values extraction needs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PkgMetadata {
    pub drm_type: Option<u32>,
    pub content_type: u32,
    /// Item table location inside the encrypted region
    pub items_offset: u64,
    pub items_size: u32,
    /// param.sfo location (offset, size)
    pub sfo: Option<(u32, u32)>,
}

impl PkgMetadata {
    /// Fold a metadata walk; later blocks override earlier ones
    pub fn collect<I>(blocks: I) -> Result<Self>
    where
        I: IntoIterator<Item = Result<MetaBlock>>,
    {
        let mut metadata = Self::default();
        for block in blocks {
            let block = block?;
            match block.block_type {
                meta::DRM_TYPE => metadata.drm_type = block.u32_at(0),
                meta::CONTENT_TYPE => {
                    if let Some(value) = block.u32_at(0) {
                        metadata.content_type = value;
                    }
                }
                meta::ITEM_TABLE => {
                    if let (Some(offset), Some(size)) = (block.u32_at(0), block.u32_at(4)) {
                        metadata.items_offset = u64::from(offset);
                        metadata.items_size = size;
                    }
                }
                meta::PARAM_SFO => {
                    if let (Some(offset), Some(size)) = (block.u32_at(0), block.u32_at(4)) {
                        metadata.sfo = Some((offset, size));
                    }
                }
                _ => {}
            }
        }
        Ok(metadata)
    }

    /// Container kind for the content type
    pub fn kind(&self) -> Result<ContentKind> {
        ContentKind::from_content_type(self.content_type)
            .ok_or_else(|| FormatError::UnsupportedContentType(self.content_type).into())
    }
}

/// Supported package contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ContentKind {
    /// PSP title shipped as a disc image (including PC Engine, Go, Minis, NeoGeo)
    DiscImage,
    /// PSP theme (EDAT-wrapped files)
    Theme,
    /// PS1 title for the PSP emulator
    Psx,
}

impl ContentKind {
    pub fn from_content_type(content_type: u32) -> Option<Self> {
        match content_type {
            6 => Some(Self::Psx),
            7 | 0xE | 0xF | 0x10 => Some(Self::DiscImage),
            9 => Some(Self::Theme),
            _ => None,
        }
    }
}

/// CTR keys and IV of one package
#[derive(Debug, Clone)]
pub struct PkgKeys {
    pub main: Key,
    pub secondary: Key,
    pub iv: Block,
}

impl PkgKeys {
    pub fn for_header(header: &PkgHeader) -> Result<Self> {
        match header.key_type {
            1 => Ok(Self {
                main: PKG_PSP_KEY,
                secondary: PKG_PS3_KEY,
                iv: header.iv,
            }),
            other => Err(FormatError::UnsupportedKeyType(other).into()),
        }
    }

    /// Key protecting an item's name and data
    pub fn item_key(&self, kind: ContentKind, psp_type: u8) -> &Key {
        match kind {
            ContentKind::DiscImage | ContentKind::Psx if psp_type != PSP_TYPE_MAIN_KEY => {
                &self.secondary
            }
            _ => &self.main,
        }
    }
}

/// Decrypted item table entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkgItem {
    pub index: u32,
    pub name: String,
    pub name_offset: u32,
    pub name_size: u32,
    /// Offset inside the encrypted region
    pub data_offset: u64,
    pub data_size: u64,
    pub psp_type: u8,
    pub flags: u8,
}

impl PkgItem {
    /// Directories and metadata entries carry flags 4 or 18
    pub fn is_file(&self) -> bool {
        self.flags != 4 && self.flags != 18
    }
}

/// An open package: the validated header over a random-access reader
pub struct PkgContainer<R: Read + Seek> {
    reader: R,
    header: PkgHeader,
    file_size: u64,
}

impl<R: Read + Seek> PkgContainer<R> {
    /// Read and validate the header
    pub fn open(mut reader: R, file_size: u64) -> Result<Self> {
        let needed = (PKG_HEADER_SIZE + PKG_EXT_HEADER_SIZE) as u64;
        if file_size < needed {
            return Err(FormatError::TooSmall {
                what: "PKG header",
                needed,
                available: file_size,
            }
            .into());
        }

        let mut data = [0u8; PKG_HEADER_SIZE + PKG_EXT_HEADER_SIZE];
        reader.seek(SeekFrom::Start(0))?;
        reader.read_exact(&mut data)?;

        let header = PkgHeader::parse(&data, file_size)?;
        Ok(Self {
            reader,
            header,
            file_size,
        })
    }

    pub fn header(&self) -> &PkgHeader {
        &self.header
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    /// Walk the metadata blocks
    pub fn meta_blocks(&mut self) -> MetaBlocks<'_, R> {
        let offset = self.header.meta_offset;
        let remaining = self.header.meta_count;
        MetaBlocks {
            pkg: self,
            offset,
            remaining,
        }
    }

    /// Walk the metadata and keep the fields extraction needs
    pub fn metadata(&mut self) -> Result<PkgMetadata> {
        let metadata = PkgMetadata::collect(self.meta_blocks())?;
        debug!(
            "PKG content_type=0x{:x}, items at 0x{:x} ({} bytes)",
            metadata.content_type, metadata.items_offset, metadata.items_size
        );
        Ok(metadata)
    }

    /// Read raw bytes at an absolute file offset
    pub fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.reader.seek(SeekFrom::Start(offset))?;
        self.reader.read_exact(buf)?;
        Ok(())
    }

    /// Read and decrypt bytes at `offset` inside the encrypted region
    pub fn read_decrypted(&mut self, key: &Key, offset: u64, buf: &mut [u8]) -> Result<()> {
        self.read_at(self.header.absolute(offset), buf)?;
        ctr_xor(key, &self.header.iv, offset / 16, buf);
        Ok(())
    }

    /// Decrypt item table entry `index` and its name
    pub fn decrypt_item(
        &mut self,
        keys: &PkgKeys,
        kind: ContentKind,
        items_offset: u64,
        index: u32,
    ) -> Result<PkgItem> {
        let entry_offset = items_offset + u64::from(index) * ITEM_ENTRY_SIZE;
        let mut entry = [0u8; ITEM_ENTRY_SIZE as usize];
        self.read_decrypted(&keys.main, entry_offset, &mut entry)?;

        let name_offset = be32(&entry, 0);
        let name_size = be32(&entry, 4);
        let data_offset = be64(&entry, 8);
        let data_size = be64(&entry, 16);
        let psp_type = entry[24];
        let flags = entry[27];

        if name_offset % 16 != 0 || data_offset % 16 != 0 {
            return Err(FormatError::Corrupted(format!(
                "item {} has unaligned offsets (name 0x{:x}, data 0x{:x})",
                index, name_offset, data_offset
            ))
            .into());
        }

        let enc_offset = self.header.enc_offset;
        let name_end = enc_offset + u64::from(name_offset) + u64::from(name_size);
        let data_end = enc_offset
            .saturating_add(data_offset)
            .saturating_add(data_size);
        for (what, end) in [("PKG item name", name_end), ("PKG item data", data_end)] {
            if end > self.file_size {
                return Err(FormatError::TooSmall {
                    what,
                    needed: end,
                    available: self.file_size,
                }
                .into());
            }
        }

        if name_size >= MAX_NAME_SIZE {
            return Err(FormatError::Corrupted(format!(
                "item {} name is {} bytes long",
                index, name_size
            ))
            .into());
        }

        let key = *keys.item_key(kind, psp_type);
        let mut name = vec![0u8; name_size as usize];
        self.read_decrypted(&key, u64::from(name_offset), &mut name)?;
        let name = text_field(&name);

        if name.contains("..") {
            warn!("item {} has a suspicious name: {}", index, name);
        }

        debug!(
            "PKG item {}: {} (offset=0x{:x}, size={}, psp_type=0x{:02x}, flags={})",
            index, name, data_offset, data_size, psp_type, flags
        );

        Ok(PkgItem {
            index,
            name,
            name_offset,
            name_size,
            data_offset,
            data_size,
            psp_type,
            flags,
        })
    }
}
