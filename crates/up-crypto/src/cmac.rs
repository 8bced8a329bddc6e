//! AES-CMAC (RFC 4493)

use crate::{to_block, Block, Key, BLOCK_SIZE};
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;

/// Reduction constant for doubling in GF(2^128)
const RB: u8 = 0x87;

/// Compute the 16-byte AES-128 CMAC of `data`
pub fn cmac(key: &Key, data: &[u8]) -> Block {
    let cipher = Aes128::new(key.into());
    let encrypt = |block: &Block| -> Block {
        let mut b = aes::Block::from(*block);
        cipher.encrypt_block(&mut b);
        to_block(&b)
    };

    let (k1, k2) = subkeys(&encrypt(&[0u8; BLOCK_SIZE]));

    let block_count = data.len().div_ceil(BLOCK_SIZE).max(1);
    let complete = !data.is_empty() && data.len() % BLOCK_SIZE == 0;

    let tail = &data[(block_count - 1) * BLOCK_SIZE..];
    let mut last = [0u8; BLOCK_SIZE];
    if complete {
        for (i, byte) in last.iter_mut().enumerate() {
            *byte = tail[i] ^ k1[i];
        }
    } else {
        last[..tail.len()].copy_from_slice(tail);
        last[tail.len()] = 0x80;
        for (byte, k) in last.iter_mut().zip(k2.iter()) {
            *byte ^= k;
        }
    }

    let mut x = [0u8; BLOCK_SIZE];
    for chunk in data.chunks(BLOCK_SIZE).take(block_count - 1) {
        for (xb, cb) in x.iter_mut().zip(chunk) {
            *xb ^= cb;
        }
        x = encrypt(&x);
    }

    for (xb, lb) in x.iter_mut().zip(last.iter()) {
        *xb ^= lb;
    }
    encrypt(&x)
}

/// Derive K1 and K2 from L = E(K, 0^128)
fn subkeys(l: &Block) -> (Block, Block) {
    let k1 = double(l);
    let k2 = double(&k1);
    (k1, k2)
}

/// Multiply by x in GF(2^128)
fn double(block: &Block) -> Block {
    let mut out = [0u8; BLOCK_SIZE];
    let mut carry = 0u8;
    for i in (0..BLOCK_SIZE).rev() {
        out[i] = (block[i] << 1) | carry;
        carry = block[i] >> 7;
    }
    if carry != 0 {
        out[BLOCK_SIZE - 1] ^= RB;
    }
    out
}
