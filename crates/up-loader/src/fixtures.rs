//! Synthetic package builders for tests
//!
//! Both cipher layers are XOR keystreams, so a package is built by running
//! the decryption primitives over plaintext. The PSP key chain is one-way in
//! the other direction: the builders pick the content IV first and solve
//! the wrapped key seed backwards from the header MAC.

use crate::pkg::{ContentKind, PkgKeys, PKG_EXT_MAGIC, PKG_HEADER_SIZE, PKG_MAGIC};
use up_crypto::keys::{
    AMCTL_HASHKEY_3, AMCTL_HASHKEY_4, AMCTL_HASHKEY_5, KIRK7_KEY38, KIRK7_KEY39, KIRK7_KEY63,
    PKG_PS3_KEY, PKG_PSP_KEY,
};
use up_crypto::{cmac, ctr_xor, ecb_encrypt, Block, PspCipher, PspContainer};

pub const CONTENT_ID: &str = "UP9000-NPUZ00001_00-LOCOROCO00000001";
pub const PKG_IV: Block = [
    0x5a, 0x1e, 0x9c, 0x03, 0x77, 0x42, 0xd1, 0x0b, 0x6e, 0x88, 0x13, 0xf4, 0xff, 0xff, 0xff, 0xf0,
];

const META_OFFSET: usize = 0x100;
const SECTOR: usize = 2048;

fn pad16(len: usize) -> usize {
    (len + 15) & !15
}

/// Solve the wrapped key seed so that `PspCipher::derive` yields `target`
pub fn solve_key_seed(mac: &Block, iv_seed: &Block, target: &Block, container: PspContainer) -> Block {
    let mut unwrapped = *target;
    for (b, h) in unwrapped.iter_mut().zip(AMCTL_HASHKEY_4.iter()) {
        *b ^= h;
    }
    let mixed = ecb_encrypt(&KIRK7_KEY39, &unwrapped);

    let mut tmp = [0u8; 16];
    for i in 0..16 {
        tmp[i] = mixed[i] ^ mac[i] ^ iv_seed[i] ^ AMCTL_HASHKEY_3[i] ^ AMCTL_HASHKEY_5[i];
    }

    let seed = ecb_encrypt(&KIRK7_KEY38, &tmp);
    match container {
        PspContainer::Psar => ecb_encrypt(&KIRK7_KEY63, &seed),
        PspContainer::Edat => seed,
    }
}

struct FixtureItem {
    name: String,
    data: Vec<u8>,
    psp_type: u8,
    flags: u8,
}

type EntryPatch = Box<dyn Fn(&mut [u8; 32])>;

/// Builds an encrypted package with key type 1
pub struct PkgBuilder {
    content_type: u32,
    items: Vec<FixtureItem>,
    patches: Vec<(usize, EntryPatch)>,
}

impl PkgBuilder {
    pub fn new(content_type: u32) -> Self {
        Self {
            content_type,
            items: Vec::new(),
            patches: Vec::new(),
        }
    }

    /// Add an item with explicit key selector and flags
    pub fn item(mut self, name: &str, data: Vec<u8>, psp_type: u8, flags: u8) -> Self {
        self.items.push(FixtureItem {
            name: name.to_string(),
            data,
            psp_type,
            flags,
        });
        self
    }

    /// Regular file protected by the main key
    pub fn file(self, name: &str, data: Vec<u8>) -> Self {
        self.item(name, data, 0x90, 0)
    }

    /// Directory entry (flags 4)
    pub fn directory(self, name: &str) -> Self {
        self.item(name, Vec::new(), 0x90, 4)
    }

    /// Modify the plaintext of an item table entry before encryption
    pub fn patch_entry<F: Fn(&mut [u8; 32]) + 'static>(mut self, index: usize, patch: F) -> Self {
        self.patches.push((index, Box::new(patch)));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let keys = PkgKeys {
            main: PKG_PSP_KEY,
            secondary: PKG_PS3_KEY,
            iv: PKG_IV,
        };
        let kind = ContentKind::from_content_type(self.content_type);
        let item_key = |psp_type: u8| match kind {
            Some(kind) => *keys.item_key(kind, psp_type),
            None => keys.main,
        };

        let item_count = self.items.len();
        let table_size = item_count * 32;

        // Encrypted region: table, names, data
        let mut names = Vec::new();
        let mut cursor = table_size;
        for item in &self.items {
            names.push(cursor);
            cursor += pad16(item.name.len());
        }
        let mut data_offsets = Vec::new();
        for item in &self.items {
            data_offsets.push(cursor);
            cursor += pad16(item.data.len());
        }
        let mut region = vec![0u8; cursor];

        for (i, item) in self.items.iter().enumerate() {
            let mut entry = [0u8; 32];
            entry[0..4].copy_from_slice(&(names[i] as u32).to_be_bytes());
            entry[4..8].copy_from_slice(&(item.name.len() as u32).to_be_bytes());
            entry[8..16].copy_from_slice(&(data_offsets[i] as u64).to_be_bytes());
            entry[16..24].copy_from_slice(&(item.data.len() as u64).to_be_bytes());
            entry[24] = item.psp_type;
            entry[27] = item.flags;
            for (index, patch) in &self.patches {
                if *index == i {
                    patch(&mut entry);
                }
            }
            ctr_xor(&keys.main, &keys.iv, (i * 32 / 16) as u64, &mut entry);
            region[i * 32..i * 32 + 32].copy_from_slice(&entry);

            let key = item_key(item.psp_type);
            let name = &mut region[names[i]..names[i] + item.name.len()];
            name.copy_from_slice(item.name.as_bytes());
            ctr_xor(&key, &keys.iv, (names[i] / 16) as u64, name);

            let data = &mut region[data_offsets[i]..data_offsets[i] + item.data.len()];
            data.copy_from_slice(&item.data);
            ctr_xor(&key, &keys.iv, (data_offsets[i] / 16) as u64, data);
        }

        // Plaintext metadata blocks
        let mut meta = Vec::new();
        meta.extend_from_slice(&2u32.to_be_bytes());
        meta.extend_from_slice(&4u32.to_be_bytes());
        meta.extend_from_slice(&self.content_type.to_be_bytes());
        meta.extend_from_slice(&13u32.to_be_bytes());
        meta.extend_from_slice(&8u32.to_be_bytes());
        meta.extend_from_slice(&0u32.to_be_bytes());
        meta.extend_from_slice(&(table_size as u32).to_be_bytes());
        meta.extend_from_slice(&14u32.to_be_bytes());
        meta.extend_from_slice(&8u32.to_be_bytes());
        meta.extend_from_slice(&[0u8; 8]);

        let enc_offset = pad16(META_OFFSET + meta.len());
        let total = enc_offset + region.len();

        let mut pkg = vec![0u8; enc_offset];
        pkg[0..4].copy_from_slice(&PKG_MAGIC.to_be_bytes());
        pkg[4..6].copy_from_slice(&0x8000u16.to_be_bytes());
        pkg[6..8].copy_from_slice(&2u16.to_be_bytes());
        pkg[8..12].copy_from_slice(&(META_OFFSET as u32).to_be_bytes());
        pkg[12..16].copy_from_slice(&3u32.to_be_bytes());
        pkg[16..20].copy_from_slice(&(meta.len() as u32).to_be_bytes());
        pkg[20..24].copy_from_slice(&(item_count as u32).to_be_bytes());
        pkg[24..32].copy_from_slice(&(total as u64).to_be_bytes());
        pkg[32..40].copy_from_slice(&(enc_offset as u64).to_be_bytes());
        pkg[40..48].copy_from_slice(&(region.len() as u64).to_be_bytes());
        pkg[0x30..0x30 + CONTENT_ID.len()].copy_from_slice(CONTENT_ID.as_bytes());
        pkg[0x70..0x80].copy_from_slice(&PKG_IV);
        pkg[0xE7] = 1;
        pkg[PKG_HEADER_SIZE..PKG_HEADER_SIZE + 4].copy_from_slice(&PKG_EXT_MAGIC.to_be_bytes());
        pkg[META_OFFSET..META_OFFSET + meta.len()].copy_from_slice(&meta);

        pkg.extend_from_slice(&region);
        pkg
    }
}

/// Content IV of fixture disc images
pub const PSAR_CONTENT_IV: Block = [
    0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xaa, 0xbb, 0xcc, 0, 0, 0, 0,
];
const PSAR_IV_SEED: Block = [0xa5; 16];

/// Offset of the PSAR inside fixture EBOOTs
pub const PSAR_OFFSET: usize = 0x30;
const ISO_TABLE: usize = 0x100;

/// How a super-block is laid out inside the PSAR
#[derive(Debug, Clone)]
enum BlockPayload {
    /// Plaintext super-block, `iso_block` sectors
    Raw(Vec<u8>),
    /// Arbitrary compressed bytes handed to the LZRC decoder
    Compressed(Vec<u8>),
}

/// Builds an EBOOT.PBP with an NPUMDIMG disc image
pub struct EbootBuilder {
    iso_block: u32,
    blocks: Vec<(BlockPayload, bool)>,
}

impl EbootBuilder {
    pub fn new(iso_block: u32) -> Self {
        Self {
            iso_block,
            blocks: Vec::new(),
        }
    }

    /// Uncompressed super-block; `psp_layer` adds the content-key layer
    pub fn raw_block(mut self, data: Vec<u8>, psp_layer: bool) -> Self {
        self.blocks.push((BlockPayload::Raw(data), psp_layer));
        self
    }

    /// Super-block in LZRC stored form (escape byte, be32 length, bytes)
    pub fn stored_block(self, data: Vec<u8>, psp_layer: bool) -> Self {
        let mut payload = vec![0x80];
        payload.extend_from_slice(&(data.len() as u32).to_be_bytes());
        payload.extend_from_slice(&data);
        self.compressed_block(payload, psp_layer)
    }

    /// Super-block with explicit LZRC input
    pub fn compressed_block(mut self, payload: Vec<u8>, psp_layer: bool) -> Self {
        self.blocks.push((BlockPayload::Compressed(payload), psp_layer));
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let cipher = PspCipher::new(&KIRK7_KEY63, PSAR_CONTENT_IV);
        let block_count = self.blocks.len();
        let sectors = block_count as u32 * self.iso_block;

        let mut psar = vec![0u8; pad16(ISO_TABLE + block_count * 32)];
        let mut table = Vec::new();

        for (payload, psp_layer) in &self.blocks {
            let mut data = match payload {
                BlockPayload::Raw(data) => data.clone(),
                BlockPayload::Compressed(data) => data.clone(),
            };
            // The PSP layer works on whole 16-byte blocks
            if *psp_layer {
                data.resize(pad16(data.len()), 0);
            }

            let offset = psar.len();
            if *psp_layer {
                cipher
                    .decrypt((offset / 16) as u32, &mut data)
                    .expect("fixture buffers hold whole blocks");
            }
            table.push((offset as u32, data.len() as u32, if *psp_layer { 0 } else { 4 }));
            psar.extend_from_slice(&data);
            psar.resize(pad16(psar.len()), 0);
        }

        for (i, &(offset, size, flags)) in table.iter().enumerate() {
            // Any t0..t3 work; offset, size and flags fold out of t4..t6
            let t0 = 0x0101_0101u32.wrapping_mul(i as u32 + 3);
            let t1 = 0xdead_beef ^ i as u32;
            let t2 = 0x1357_9bdf;
            let t3 = 0x2468_ace0u32.rotate_left(i as u32);
            let words = [
                t0,
                t1,
                t2,
                t3,
                offset ^ t2 ^ t3,
                size ^ t1 ^ t2,
                flags ^ t0 ^ t3,
                0x5555_aaaa,
            ];
            let at = ISO_TABLE + i * 32;
            for (k, w) in words.iter().enumerate() {
                psar[at + k * 4..at + k * 4 + 4].copy_from_slice(&w.to_le_bytes());
            }
        }

        psar[0..8].copy_from_slice(b"NPUMDIMG");
        psar[0x0C..0x10].copy_from_slice(&self.iso_block.to_le_bytes());
        psar[0x54..0x58].copy_from_slice(&0u32.to_le_bytes());
        psar[0x64..0x68].copy_from_slice(&(sectors + 1).to_le_bytes());
        psar[0x6C..0x70].copy_from_slice(&(ISO_TABLE as u32).to_le_bytes());
        cipher
            .decrypt(0, &mut psar[0x40..0xA0])
            .expect("fixture buffers hold whole blocks");
        psar[0xA0..0xB0].copy_from_slice(&PSAR_IV_SEED);

        let mac = cmac(&KIRK7_KEY38, &psar[..0xC0]);
        let key_seed = solve_key_seed(&mac, &PSAR_IV_SEED, &PSAR_CONTENT_IV, PspContainer::Psar);
        psar[0xC0..0xD0].copy_from_slice(&key_seed);

        let mut eboot = vec![0u8; PSAR_OFFSET];
        eboot[0..4].copy_from_slice(b"\0PBP");
        eboot[4..8].copy_from_slice(&0x0001_0000u32.to_le_bytes());
        eboot[0x24..0x28].copy_from_slice(&(PSAR_OFFSET as u32).to_le_bytes());
        eboot.extend_from_slice(&psar);
        eboot
    }
}

/// `count` sectors of recognisable content
pub fn sample_sectors(count: usize, seed: u8) -> Vec<u8> {
    let mut data = vec![0u8; count * SECTOR];
    for (i, sector) in data.chunks_mut(SECTOR).enumerate() {
        for (k, byte) in sector.iter_mut().enumerate() {
            *byte = (k as u8).wrapping_mul(seed | 1).wrapping_add(i as u8);
        }
        sector[..8].copy_from_slice(&(i as u64).to_be_bytes());
    }
    data
}

const EDAT_HEADER_IV: Block = [
    0xe0, 0xd1, 0xc2, 0xb3, 0xa4, 0x95, 0x86, 0x77, 0x68, 0x59, 0x4a, 0x3b, 0, 0, 0, 0,
];
const EDAT_IV_SEED: Block = [0x3c; 16];
const EDAT_DATA_SEED: Block = [
    0x10, 0x32, 0x54, 0x76, 0x98, 0xba, 0xdc, 0xfe, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab, 0xcd, 0xef,
];

/// Offset of the PGD key header inside fixture EDATs
pub const EDAT_KEY_HEADER_OFFSET: usize = 0x90;

/// Builds a PGD-wrapped EDAT file
pub struct EdatBuilder {
    data: Vec<u8>,
    magic: [u8; 4],
    key_index: u32,
    drm_type: u32,
    data_offset: u32,
}

impl EdatBuilder {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            magic: *b"\0PGD",
            key_index: 1,
            drm_type: 1,
            data_offset: 0x90,
        }
    }

    pub fn magic(mut self, magic: [u8; 4]) -> Self {
        self.magic = magic;
        self
    }

    pub fn key_index(mut self, key_index: u32) -> Self {
        self.key_index = key_index;
        self
    }

    pub fn drm_type(mut self, drm_type: u32) -> Self {
        self.drm_type = drm_type;
        self
    }

    pub fn data_offset(mut self, data_offset: u32) -> Self {
        self.data_offset = data_offset;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        let kho = EDAT_KEY_HEADER_OFFSET;
        let data_start = kho + 0x90;
        let size = (kho + 0xA0).max(data_start + pad16(self.data.len()));

        let mut edat = vec![0u8; size];
        edat[0..4].copy_from_slice(b"\0NPD");
        edat[0x0C] = kho as u8;

        let mut kh = [0u8; 0x90];
        kh[0..4].copy_from_slice(&self.magic);
        kh[4..8].copy_from_slice(&self.key_index.to_le_bytes());
        kh[8..12].copy_from_slice(&self.drm_type.to_le_bytes());
        kh[0x10..0x20].copy_from_slice(&EDAT_IV_SEED);
        kh[0x30..0x40].copy_from_slice(&EDAT_DATA_SEED);
        kh[0x44..0x48].copy_from_slice(&(self.data.len() as u32).to_le_bytes());
        kh[0x4C..0x50].copy_from_slice(&self.data_offset.to_le_bytes());
        PspCipher::new(&KIRK7_KEY63, EDAT_HEADER_IV)
            .decrypt(0, &mut kh[0x30..0x60])
            .expect("fixture buffers hold whole blocks");

        let mac = cmac(&KIRK7_KEY38, &kh[..0x70]);
        let key_seed = solve_key_seed(&mac, &EDAT_IV_SEED, &EDAT_HEADER_IV, PspContainer::Edat);
        kh[0x70..0x80].copy_from_slice(&key_seed);
        edat[kho..kho + 0x90].copy_from_slice(&kh);

        let mut data = self.data.clone();
        data.resize(pad16(data.len()), 0);
        PspCipher::derive(&mac, &key_seed, &EDAT_DATA_SEED, PspContainer::Edat)
            .decrypt(0, &mut data)
            .expect("fixture buffers hold whole blocks");
        edat[data_start..data_start + data.len()].copy_from_slice(&data);
        edat
    }
}
