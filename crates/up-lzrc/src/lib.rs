//! LZRC block decompressor
//!
//! LZRC is the LZ77 + adaptive binary range coder used for compressed
//! super-blocks of PSP disc images. A block starts with a 5-byte prefix:
//! one byte selecting the literal context shift (or, with bit 7 set, a raw
//! copy) and the big-endian initial code register.
//!
//! Each symbol is a literal (8 bits through a context chosen by the previous
//! output byte) or a back-reference: a unary count of length bits, the
//! length, a count of distance bits, the distance, then `length + 1` bytes
//! copied from `distance` bytes back in the output. A length of 0xFF ends
//! the stream.

use tracing::trace;
use up_core::RangeDecodeError;

/// Input prefix: literal context shift + 4-byte code register
pub const PREFIX_SIZE: usize = 5;

/// Length value that terminates the stream
const END_OF_STREAM: u64 = 0xFF;

// Probability tables share one contiguous region in this order. Distance-bit
// trees for long matches index past their own rows into the following
// tables, and encoded streams rely on those shared counters.
const LITERAL: usize = 0;
const LITERAL_ROW: usize = 256;
const DIST_BITS: usize = LITERAL + 8 * LITERAL_ROW;
const DIST_BITS_ROW: usize = 39;
const DIST: usize = DIST_BITS + 8 * DIST_BITS_ROW;
const DIST_ROW: usize = 8;
const MATCH: usize = DIST + 18 * DIST_ROW;
const MATCH_ROW: usize = 8;
const LEN: usize = MATCH + 8 * MATCH_ROW;
const LEN_ROW: usize = 31;
const PROBS_SIZE: usize = LEN + 8 * LEN_ROW;

const PROB_INIT: u8 = 0x80;
const TOP: u32 = 1 << 24;

/// Adaptive binary range decoder
struct RangeDecoder<'a> {
    input: &'a [u8],
    pos: usize,
    range: u32,
    code: u32,
}

impl<'a> RangeDecoder<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: PREFIX_SIZE,
            range: 0xFFFF_FFFF,
            code: u32::from_be_bytes([input[1], input[2], input[3], input[4]]),
        }
    }

    /// Shift in one byte when the range gets too narrow. Reads past the end
    /// of the block shift in zeros.
    fn normalize(&mut self) {
        if self.range < TOP {
            let byte = self.input.get(self.pos).copied().unwrap_or(0);
            self.range <<= 8;
            self.code = (self.code << 8) | u32::from(byte);
            self.pos += 1;
        }
    }

    /// Decode one bit and adapt its probability. `1` is the lower sub-range.
    fn bit(&mut self, prob: &mut u8) -> u64 {
        self.normalize();

        let bound = (self.range >> 8) * u32::from(*prob);
        *prob -= *prob >> 3;

        if self.code < bound {
            self.range = bound;
            *prob += 31;
            1
        } else {
            self.code -= bound;
            self.range -= bound;
            0
        }
    }
}

/// Decoder state for one block
struct Lzrc<'a> {
    rc: RangeDecoder<'a>,
    probs: [u8; PROBS_SIZE],
}

impl<'a> Lzrc<'a> {
    fn bit(&mut self, index: usize) -> u64 {
        self.rc.bit(&mut self.probs[index])
    }

    /// Walk a bit tree from 1 until the value reaches `limit`; the result is in `limit..2*limit`
    fn bit_tree(&mut self, base: usize, limit: u64) -> u64 {
        let mut number = 1u64;
        loop {
            number = (number << 1) + self.bit(base + number as usize);
            if number >= limit {
                return number;
            }
        }
    }

    /// Decode an `n`-bit number with an implicit leading one. The top bits
    /// share one counter, the middle bits are direct, the low three bits
    /// each have their own counter.
    fn number(&mut self, base: usize, n: u32) -> u64 {
        let mut number = 1u64;

        if n > 3 {
            number = (number << 1) + self.bit(base + 3);
            if n > 4 {
                number = (number << 1) + self.bit(base + 3);
                if n > 5 {
                    self.rc.normalize();
                    for _ in 0..n - 5 {
                        self.rc.range >>= 1;
                        number <<= 1;
                        if self.rc.code < self.rc.range {
                            number += 1;
                        } else {
                            self.rc.code -= self.rc.range;
                        }
                    }
                }
            }
        }

        if n > 0 {
            number = (number << 1) + self.bit(base);
            if n > 1 {
                number = (number << 1) + self.bit(base + 1);
                if n > 2 {
                    number = (number << 1) + self.bit(base + 2);
                }
            }
        }

        number
    }
}

/// Decompress one LZRC block into `output`, returning the number of bytes produced.
///
/// Decoding stops at the end-of-stream marker. Fails if the input is
/// shorter than the prefix, if a back-reference reaches before the start
/// of the output, or if the output buffer would overflow.
pub fn decompress(input: &[u8], output: &mut [u8]) -> Result<usize, RangeDecodeError> {
    if input.len() < PREFIX_SIZE {
        return Err(RangeDecodeError::TruncatedInput {
            needed: PREFIX_SIZE,
            available: input.len(),
        });
    }

    let lc = input[0];
    let rc = RangeDecoder::new(input);

    if lc & 0x80 != 0 {
        // Stored block: the code register holds the byte count
        let len = rc.code as usize;
        let end = PREFIX_SIZE.saturating_add(len);
        if end > input.len() {
            return Err(RangeDecodeError::TruncatedInput {
                needed: end,
                available: input.len(),
            });
        }
        if len > output.len() {
            return Err(RangeDecodeError::OutputOverflow {
                position: len,
                capacity: output.len(),
            });
        }
        output[..len].copy_from_slice(&input[PREFIX_SIZE..end]);
        trace!("lzrc stored block of {} bytes", len);
        return Ok(len);
    }

    let mut lz = Lzrc {
        rc,
        probs: [PROB_INIT; PROBS_SIZE],
    };

    let mut state = 0usize;
    let mut last_byte = 0u8;
    let mut out_ptr = 0usize;

    loop {
        let match_row = MATCH + state * MATCH_ROW;

        if lz.bit(match_row) == 0 {
            state = state.saturating_sub(1);

            let context = (u32::from(last_byte).checked_shr(u32::from(lc)).unwrap_or(0) & 0x07) as usize;
            let byte = (lz.bit_tree(LITERAL + context * LITERAL_ROW, 0x100) - 0x100) as u8;

            if out_ptr == output.len() {
                return Err(RangeDecodeError::OutputOverflow {
                    position: out_ptr,
                    capacity: output.len(),
                });
            }
            output[out_ptr] = byte;
            out_ptr += 1;
            last_byte = byte;
            continue;
        }

        let mut len_bits = 0u32;
        for step in 1..=7 {
            if lz.bit(match_row + step) == 0 {
                break;
            }
            len_bits += 1;
        }

        let match_len = if len_bits == 0 {
            1
        } else {
            let position_bits = ((out_ptr as u32).wrapping_shl(len_bits - 1) & 0x03) as usize;
            let len_state = (((len_bits - 1) << 2) as usize) + position_bits;
            let len = lz.number(LEN + state * LEN_ROW + len_state, len_bits);
            if len == END_OF_STREAM {
                trace!("lzrc end of stream after {} bytes", out_ptr);
                return Ok(out_ptr);
            }
            len
        };

        let (dist_state, limit) = if match_len > 2 { (7, 44) } else { (0, 8) };
        let tree = DIST_BITS + len_bits as usize * DIST_BITS_ROW + dist_state;
        let dist_bits = lz.bit_tree(tree, limit) - limit;

        let match_dist = if dist_bits > 0 {
            lz.number(DIST + dist_bits as usize * DIST_ROW, dist_bits as u32)
        } else {
            1
        };

        let distance = usize::try_from(match_dist).unwrap_or(usize::MAX);
        if distance > out_ptr {
            return Err(RangeDecodeError::DistanceOutOfRange {
                distance,
                produced: out_ptr,
            });
        }

        let count = match_len as usize + 1;
        if out_ptr + count > output.len() {
            return Err(RangeDecodeError::OutputOverflow {
                position: out_ptr + count,
                capacity: output.len(),
            });
        }

        // Byte by byte: source and destination overlap when distance < count
        let start = out_ptr - distance;
        for i in 0..count {
            output[out_ptr + i] = output[start + i];
        }
        out_ptr += count;
        last_byte = output[out_ptr - 1];

        state = 6 + ((out_ptr + 1) & 1);
    }
}

/// Decompress a block that must fill `output` exactly
pub fn decompress_exact(input: &[u8], output: &mut [u8]) -> Result<(), RangeDecodeError> {
    let produced = decompress(input, output)?;
    if produced != output.len() {
        return Err(RangeDecodeError::SizeMismatch {
            expected: output.len(),
            actual: produced,
        });
    }
    Ok(())
}
