//! Bit-width conversion for packed code streams
//!
//! Re-packs a sequence of `input_bits`-wide words into `output_bits`-wide
//! words, most significant bit first. Packing codes into bytes and unpacking
//! them again are the same operation with the widths swapped.

use thiserror::Error;

/// Errors raised while packing or decoding cell data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("bit width {0} is outside 1..=32")]
    InvalidBitWidth(u32),

    #[error("cannot convert an empty word sequence")]
    EmptyInput,

    #[error("truncated {section}: needed {needed} bytes, found {found}")]
    Truncated {
        section: &'static str,
        needed: usize,
        found: usize,
    },

    #[error("palette code {code} exceeds palette size {palette_size}")]
    InvalidCode { code: u32, palette_size: usize },

    #[error("atlas coordinate ({atlas_x}, {atlas_y}) does not fit in one byte")]
    AtlasOutOfRange { atlas_x: i32, atlas_y: i32 },

    #[error("malformed header: {0}")]
    MalformedHeader(String),
}

fn mask(bits: u32) -> u64 {
    (1u64 << bits) - 1
}

/// Convert a stream of `input_bits`-wide words into `output_bits`-wide words.
///
/// Bits above `input_bits` in each input word are ignored. When the input does
/// not fill a whole number of output words the tail is zero-padded into one
/// last word, unless `expect_full_words` is set, in which case the partial
/// tail is dropped.
pub fn convert_between_codes(
    input: &[u32],
    input_bits: u32,
    output_bits: u32,
    expect_full_words: bool,
) -> Result<Vec<u32>, CodecError> {
    for bits in [input_bits, output_bits] {
        if !(1..=32).contains(&bits) {
            return Err(CodecError::InvalidBitWidth(bits));
        }
    }
    if input.is_empty() {
        return Err(CodecError::EmptyInput);
    }

    let total_bits = input.len() as u64 * u64::from(input_bits);
    let mut output = Vec::with_capacity((total_bits / u64::from(output_bits)) as usize + 1);

    // Never holds more than output_bits - 1 + input_bits bits, so 63 at most
    let mut acc: u64 = 0;
    let mut acc_bits: u32 = 0;

    for &word in input {
        acc = (acc << input_bits) | (u64::from(word) & mask(input_bits));
        acc_bits += input_bits;

        while acc_bits >= output_bits {
            acc_bits -= output_bits;
            output.push(((acc >> acc_bits) & mask(output_bits)) as u32);
            acc &= mask(acc_bits);
        }
    }

    if acc_bits > 0 && !expect_full_words {
        output.push(((acc << (output_bits - acc_bits)) & mask(output_bits)) as u32);
    }

    Ok(output)
}

/// Bits needed to distinguish `count` different codes (at least one)
pub fn representative_bits(count: usize) -> u32 {
    if count <= 2 {
        return 1;
    }
    usize::BITS - (count - 1).leading_zeros()
}

/// Pack codes into bytes, zero-padding the final byte
pub fn pack_codes(codes: &[u32], bits_per_code: u32) -> Result<Vec<u8>, CodecError> {
    let words = convert_between_codes(codes, bits_per_code, 8, false)?;
    Ok(words.into_iter().map(|w| w as u8).collect())
}

/// Unpack exactly `count` codes from a packed byte stream
pub fn unpack_codes(bytes: &[u8], bits_per_code: u32, count: usize) -> Result<Vec<u32>, CodecError> {
    let words: Vec<u32> = bytes.iter().map(|&b| u32::from(b)).collect();
    let mut codes = convert_between_codes(&words, 8, bits_per_code, true)?;
    if codes.len() < count {
        return Err(CodecError::Truncated {
            section: "code stream",
            needed: count,
            found: codes.len(),
        });
    }
    codes.truncate(count);
    Ok(codes)
}
