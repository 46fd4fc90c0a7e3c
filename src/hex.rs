use core::{fmt, num::ParseIntError};
use heapless::{String, Vec};

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Lower-case hex representation of `bytes`, as expected by `AT+MPUB` in HEX mode.
pub fn encode_hex<const N: usize>(bytes: &[u8]) -> Result<String<N>, EncodeHexError> {
    let mut out = String::new();
    for b in bytes {
        out.push(HEX_DIGITS[(b >> 4) as usize] as char)
            .map_err(|_| EncodeHexError::Capacity)?;
        out.push(HEX_DIGITS[(b & 0x0f) as usize] as char)
            .map_err(|_| EncodeHexError::Capacity)?;
    }
    Ok(out)
}

pub fn decode_hex<const N: usize>(s: &str) -> Result<Vec<u8, N>, DecodeHexError> {
    if s.len() % 2 != 0 {
        return Err(DecodeHexError::OddLength);
    }

    let mut out = Vec::new();
    for i in (0..s.len()).step_by(2) {
        let digits = s.get(i..i + 2).ok_or(DecodeHexError::OddLength)?;
        let byte = u8::from_str_radix(digits, 16).map_err(DecodeHexError::ParseInt)?;
        out.push(byte).map_err(|_| DecodeHexError::Capacity)?;
    }
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeHexError {
    Capacity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeHexError {
    OddLength,
    Capacity,
    ParseInt(ParseIntError),
}

impl fmt::Display for DecodeHexError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DecodeHexError::OddLength => "input string has an odd number of bytes".fmt(f),
            DecodeHexError::Capacity => "decoded data does not fit the buffer".fmt(f),
            DecodeHexError::ParseInt(e) => e.fmt(f),
        }
    }
}
