//! AES primitives and the PSP key chain for PlayStation packages
//!
//! Every operation here is a pure function over fixed-size keys and caller
//! buffers. The package payload is protected by AES-128-CTR keyed by one of
//! the fixed package keys; disc images and DRM files inside it carry a
//! second layer, the PSP keystream (see [`psp`]).

pub mod cmac;
pub mod keys;
pub mod psp;

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, KeyIvInit, StreamCipher};
use aes::Aes128;

pub use cmac::cmac;
pub use psp::{PspCipher, PspContainer};

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// AES-128 key
pub type Key = [u8; 16];

/// Single AES block
pub type Block = [u8; 16];

type Aes128Ctr = ctr::Ctr128BE<Aes128>;

/// Encrypt one block with AES-128 (no chaining)
pub fn ecb_encrypt(key: &Key, input: &Block) -> Block {
    let cipher = Aes128::new(key.into());
    let mut block = aes::Block::from(*input);
    cipher.encrypt_block(&mut block);
    to_block(&block)
}

/// Decrypt one block with AES-128 (no chaining)
pub fn ecb_decrypt(key: &Key, input: &Block) -> Block {
    let cipher = Aes128::new(key.into());
    let mut block = aes::Block::from(*input);
    cipher.decrypt_block(&mut block);
    to_block(&block)
}

/// XOR the AES-128-CTR keystream into `buffer`.
///
/// The first counter block is `iv + counter_block`, a big-endian 128-bit
/// addition carrying across all 16 bytes and wrapping at 2^128. Packages key
/// the counter by absolute position, so `counter_block` is the byte offset
/// inside the encrypted region divided by 16. A trailing partial block uses
/// the prefix of its keystream block. Applying the same call twice restores
/// the input.
pub fn ctr_xor(key: &Key, iv: &Block, counter_block: u64, buffer: &mut [u8]) {
    let counter = counter_add(iv, counter_block);
    let mut cipher = Aes128Ctr::new(key.into(), (&counter).into());
    cipher.apply_keystream(buffer);
}

/// Big-endian 128-bit `iv + n`, wrapping
pub fn counter_add(iv: &Block, n: u64) -> Block {
    u128::from_be_bytes(*iv)
        .wrapping_add(u128::from(n))
        .to_be_bytes()
}

/// Copy the first 16 bytes of `bytes` into a block; `bytes` must hold at least 16
pub(crate) fn to_block(bytes: &[u8]) -> Block {
    let mut out = [0u8; BLOCK_SIZE];
    out.copy_from_slice(&bytes[..BLOCK_SIZE]);
    out
}

#[cfg(test)]
pub(crate) fn hex(s: &str) -> Vec<u8> {
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
        .collect()
}

#[cfg(test)]
pub(crate) fn hex16(s: &str) -> [u8; 16] {
    to_block(&hex(s))
}
