//! PSP content keystream and its key chain
//!
//! Disc images (PSAR) and DRM files (EDAT) carry an inner encryption layer
//! on top of the package CTR layer. Its key is fixed (Kirk key 0x63); the
//! per-content IV is unwrapped from header material with a chain of ECB
//! decryptions and XORs against fixed AMCTL hash keys, bound to the header
//! through a CMAC.
//!
//! The keystream itself works on a counter block `iv[0..12] || le32(n)`: for
//! each 16-byte chunk the counter is incremented, AES-decrypted, and XORed
//! into the data together with the previous counter block. The very first
//! chunk at index 0 pairs with an all-zero previous block instead.

use crate::keys::{
    AMCTL_HASHKEY_3, AMCTL_HASHKEY_4, AMCTL_HASHKEY_5, KIRK7_KEY38, KIRK7_KEY39, KIRK7_KEY63,
};
use crate::{ecb_decrypt, to_block, Block, Key, BLOCK_SIZE};
use aes::cipher::{BlockDecrypt, KeyInit};
use aes::Aes128;
use tracing::trace;
use up_core::{FormatError, Result};

/// Which container the key material comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PspContainer {
    /// NPUMDIMG header inside an EBOOT.PBP; the key seed is wrapped twice
    Psar,
    /// PGD key header of an EDAT file; the key seed is wrapped once
    Edat,
}

/// Keyed PSP content keystream
#[derive(Clone)]
pub struct PspCipher {
    cipher: Aes128,
    iv: Block,
}

impl std::fmt::Debug for PspCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PspCipher").field("iv", &self.iv).finish_non_exhaustive()
    }
}

impl PspCipher {
    /// Create a keystream from an explicit key and IV
    pub fn new(key: &Key, iv: Block) -> Self {
        Self {
            cipher: Aes128::new(key.into()),
            iv,
        }
    }

    /// Unwrap the content IV from header material.
    ///
    /// `mac` is the CMAC (Kirk key 0x38) over the signed part of the header,
    /// `key_seed` and `iv_seed` are the two 16-byte header fields the
    /// container designates. The resulting keystream uses Kirk key 0x63.
    pub fn derive(mac: &Block, key_seed: &Block, iv_seed: &Block, container: PspContainer) -> Self {
        let seed = match container {
            PspContainer::Psar => ecb_decrypt(&KIRK7_KEY63, key_seed),
            PspContainer::Edat => *key_seed,
        };
        let tmp = ecb_decrypt(&KIRK7_KEY38, &seed);

        let mut iv = [0u8; BLOCK_SIZE];
        for i in 0..BLOCK_SIZE {
            iv[i] = mac[i] ^ tmp[i] ^ iv_seed[i] ^ AMCTL_HASHKEY_3[i] ^ AMCTL_HASHKEY_5[i];
        }

        let mut iv = ecb_decrypt(&KIRK7_KEY39, &iv);
        for (byte, hash) in iv.iter_mut().zip(AMCTL_HASHKEY_4.iter()) {
            *byte ^= hash;
        }

        trace!("derived PSP content iv {:02x?}", iv);
        Self::new(&KIRK7_KEY63, iv)
    }

    /// Content IV
    pub fn iv(&self) -> &Block {
        &self.iv
    }

    /// Apply the keystream to `buffer`, which starts at 16-byte block `index`
    /// of the content.
    ///
    /// A buffer that is not a multiple of 16 bytes is rejected untouched.
    /// The operation is its own inverse, and decrypting a buffer in one call
    /// equals decrypting its blocks one by one at consecutive indices.
    pub fn decrypt(&self, index: u32, buffer: &mut [u8]) -> Result<()> {
        if buffer.len() % BLOCK_SIZE != 0 {
            return Err(FormatError::UnalignedLength(buffer.len()).into());
        }

        let mut counter = self.iv;
        counter[12..].copy_from_slice(&index.to_le_bytes());
        let mut prev = if index == 0 { [0u8; BLOCK_SIZE] } else { counter };

        for chunk in buffer.chunks_exact_mut(BLOCK_SIZE) {
            let n = u32::from_le_bytes([counter[12], counter[13], counter[14], counter[15]]);
            counter[12..].copy_from_slice(&n.wrapping_add(1).to_le_bytes());

            let mut out = aes::Block::from(counter);
            self.cipher.decrypt_block(&mut out);
            let out = to_block(&out);

            for k in 0..BLOCK_SIZE {
                chunk[k] ^= prev[k] ^ out[k];
            }
            prev = counter;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ecb_encrypt, hex16};

    fn sample_cipher(iv_tail: [u8; 4]) -> PspCipher {
        let mut iv = hex16("00112233445566778899aabbccddeeff");
        iv[12..].copy_from_slice(&iv_tail);
        PspCipher::new(&KIRK7_KEY63, iv)
    }

    #[test]
    fn test_first_block_at_index_zero() {
        let cipher = sample_cipher([0; 4]);
        let mut data = [0u8; 16];
        cipher.decrypt(0, &mut data).unwrap();

        let mut counter = *cipher.iv();
        counter[12..].copy_from_slice(&1u32.to_le_bytes());
        assert_eq!(data, ecb_decrypt(&KIRK7_KEY63, &counter));
    }

    #[test]
    fn test_nonzero_index_uses_iv_seed() {
        let cipher = sample_cipher([0; 4]);
        let mut data = [0u8; 16];
        cipher.decrypt(5, &mut data).unwrap();

        let mut prev = *cipher.iv();
        prev[12..].copy_from_slice(&5u32.to_le_bytes());
        let mut counter = prev;
        counter[12..].copy_from_slice(&6u32.to_le_bytes());
        let out = ecb_decrypt(&KIRK7_KEY63, &counter);

        let expected: Vec<u8> = prev.iter().zip(out.iter()).map(|(a, b)| a ^ b).collect();
        assert_eq!(data.to_vec(), expected);
    }

    #[test]
    fn test_index_zero_ignores_iv_tail() {
        let a = sample_cipher([0, 0, 0, 0]);
        let b = sample_cipher([0xde, 0xad, 0xbe, 0xef]);

        let mut da = [0x5au8; 64];
        let mut db = [0x5au8; 64];
        a.decrypt(0, &mut da).unwrap();
        b.decrypt(0, &mut db).unwrap();
        assert_eq!(da, db);
    }

    #[test]
    fn test_iv_prefix_changes_output() {
        let a = sample_cipher([0; 4]);
        let mut other_iv = *a.iv();
        other_iv[0] ^= 1;
        let b = PspCipher::new(&KIRK7_KEY63, other_iv);

        let mut da = [0u8; 32];
        let mut db = [0u8; 32];
        a.decrypt(3, &mut da).unwrap();
        b.decrypt(3, &mut db).unwrap();
        assert_ne!(da, db);
    }

    #[test]
    fn test_self_inverse() {
        let cipher = sample_cipher([1, 2, 3, 4]);
        let original: Vec<u8> = (0..256u32).map(|i| (i * 7) as u8).collect();
        let mut data = original.clone();
        cipher.decrypt(17, &mut data).unwrap();
        assert_ne!(data, original);
        cipher.decrypt(17, &mut data).unwrap();
        assert_eq!(data, original);
    }

    #[test]
    fn test_chunked_equals_single_pass() {
        let cipher = sample_cipher([0; 4]);
        let mut whole = [0x33u8; 64];
        cipher.decrypt(0, &mut whole).unwrap();

        let mut pieces = [0x33u8; 64];
        for (i, chunk) in pieces.chunks_mut(16).enumerate() {
            cipher.decrypt(i as u32, chunk).unwrap();
        }
        assert_eq!(whole, pieces);
    }

    #[test]
    fn test_unaligned_buffer_rejected() {
        let cipher = sample_cipher([0; 4]);
        let mut data = [0x77u8; 40];
        assert!(matches!(
            cipher.decrypt(1, &mut data),
            Err(up_core::UnpackError::Format(FormatError::UnalignedLength(40)))
        ));
        assert_eq!(data, [0x77u8; 40]);
    }

    #[test]
    fn test_derive_inverts() {
        // Wrapping a chosen IV backwards through the chain must derive it again
        let mac = hex16("0f0e0d0c0b0a09080706050403020100");
        let iv_seed = hex16("a0a1a2a3a4a5a6a7a8a9aaabacadaeaf");
        let target = hex16("1234567890abcdef1234567890abcdef");

        let mut unwrapped = target;
        for (b, h) in unwrapped.iter_mut().zip(AMCTL_HASHKEY_4.iter()) {
            *b ^= h;
        }
        let mixed = ecb_encrypt(&KIRK7_KEY39, &unwrapped);
        let mut tmp = [0u8; 16];
        for i in 0..16 {
            tmp[i] = mixed[i] ^ mac[i] ^ iv_seed[i] ^ AMCTL_HASHKEY_3[i] ^ AMCTL_HASHKEY_5[i];
        }

        let edat_seed = ecb_encrypt(&KIRK7_KEY38, &tmp);
        let edat = PspCipher::derive(&mac, &edat_seed, &iv_seed, PspContainer::Edat);
        assert_eq!(edat.iv(), &target);

        let psar_seed = ecb_encrypt(&KIRK7_KEY63, &edat_seed);
        let psar = PspCipher::derive(&mac, &psar_seed, &iv_seed, PspContainer::Psar);
        assert_eq!(psar.iv(), &target);
    }
}
