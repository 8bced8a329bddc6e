//! Fixed vendor keys
//!
//! Values as published on the PSP/Vita developer wikis (Kirk command 7
//! keys, AMCTL hash keys, package keys).

/// Kirk command 7 key slot 0x38
pub const KIRK7_KEY38: [u8; 16] = [
    0x12, 0x46, 0x8d, 0x7e, 0x1c, 0x42, 0x20, 0x9b, 0xba, 0x54, 0x26, 0x83, 0x5e, 0xb0, 0x33, 0x03,
];

/// Kirk command 7 key slot 0x39
pub const KIRK7_KEY39: [u8; 16] = [
    0xc4, 0x3b, 0xb6, 0xd6, 0x53, 0xee, 0x67, 0x49, 0x3e, 0xa9, 0x5f, 0xbc, 0x0c, 0xed, 0x6f, 0x8a,
];

/// Kirk command 7 key slot 0x63, also the content key of the PSP keystream
pub const KIRK7_KEY63: [u8; 16] = [
    0x9c, 0x9b, 0x13, 0x72, 0xf8, 0xc6, 0x40, 0xcf, 0x1c, 0x62, 0xf5, 0xd5, 0x92, 0xdd, 0xb5, 0x82,
];

pub const AMCTL_HASHKEY_3: [u8; 16] = [
    0xe3, 0x50, 0xed, 0x1d, 0x91, 0x0a, 0x1f, 0xd0, 0x29, 0xbb, 0x1c, 0x3e, 0xf3, 0x40, 0x77, 0xfb,
];

pub const AMCTL_HASHKEY_4: [u8; 16] = [
    0x13, 0x5f, 0xa4, 0x7c, 0xab, 0x39, 0x5b, 0xa4, 0x76, 0xb8, 0xcc, 0xa9, 0x8f, 0x3a, 0x04, 0x45,
];

pub const AMCTL_HASHKEY_5: [u8; 16] = [
    0x67, 0x8d, 0x7f, 0xa3, 0x2a, 0x9c, 0xa0, 0xd1, 0x50, 0x8a, 0xd8, 0x38, 0x5e, 0x4b, 0x01, 0x7e,
];

/// PS3 package key, applied to non-PSP items
pub const PKG_PS3_KEY: [u8; 16] = [
    0x2e, 0x7b, 0x71, 0xd7, 0xc9, 0xc9, 0xa1, 0x4e, 0xa3, 0x22, 0x1f, 0x18, 0x88, 0x28, 0xb8, 0xf8,
];

/// PSP package key (key type 1)
pub const PKG_PSP_KEY: [u8; 16] = [
    0x07, 0xf2, 0xc6, 0x82, 0x90, 0xb5, 0x0d, 0x2c, 0x33, 0x81, 0x8d, 0x70, 0x9b, 0x60, 0xe6, 0x2b,
];
