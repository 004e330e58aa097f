//! CompactSize integers: the self-describing length prefix used ahead of
//! variable-length fields (solutions, transaction lists).

const MARKER_U16: u8 = 0xfd;
const MARKER_U32: u8 = 0xfe;
const MARKER_U64: u8 = 0xff;

/// Number of bytes needed to encode `value` as a CompactSize prefix.
pub const fn compact_size_len(value: u64) -> usize {
    if value < MARKER_U16 as u64 {
        1
    } else if value <= 0xffff {
        3
    } else if value <= 0xffff_ffff {
        5
    } else {
        9
    }
}

/// Total bytes taken by `length` payload bytes plus their CompactSize prefix.
pub const fn compact_length_prefixed_len(length: usize) -> usize {
    compact_size_len(length as u64) + length
}

pub fn write_compact_size(buf: &mut Vec<u8>, value: u64) {
    if value < MARKER_U16 as u64 {
        buf.push(value as u8);
    } else if value <= 0xffff {
        buf.push(MARKER_U16);
        buf.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= 0xffff_ffff {
        buf.push(MARKER_U32);
        buf.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        buf.push(MARKER_U64);
        buf.extend_from_slice(&value.to_le_bytes());
    }
}

pub fn write_compact_length_prefixed(buf: &mut Vec<u8>, payload: &[u8]) {
    write_compact_size(buf, payload.len() as u64);
    buf.extend_from_slice(payload);
}

/// Outcome of reading a prefix off the front of a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactSizeRead {
    /// Decoded value and the number of bytes consumed.
    Value(u64, usize),
    /// Not enough bytes for the marker's width.
    Truncated,
    /// The value fits a shorter encoding than the one used.
    NonCanonical,
}

/// Reads a CompactSize prefix from the start of `input`.
pub fn read_compact_size(input: &[u8]) -> CompactSizeRead {
    let Some((&first, rest)) = input.split_first() else {
        return CompactSizeRead::Truncated;
    };
    let (value, width, min) = match first {
        MARKER_U16 => match rest.get(..2) {
            Some(b) => (u16::from_le_bytes([b[0], b[1]]) as u64, 2, MARKER_U16 as u64),
            None => return CompactSizeRead::Truncated,
        },
        MARKER_U32 => match rest.get(..4) {
            Some(b) => (u32::from_le_bytes([b[0], b[1], b[2], b[3]]) as u64, 4, 0x1_0000),
            None => return CompactSizeRead::Truncated,
        },
        MARKER_U64 => match rest.get(..8) {
            Some(b) => {
                let mut arr = [0u8; 8];
                arr.copy_from_slice(b);
                (u64::from_le_bytes(arr), 8, 0x1_0000_0000)
            }
            None => return CompactSizeRead::Truncated,
        },
        small => return CompactSizeRead::Value(small as u64, 1),
    };
    if value < min {
        return CompactSizeRead::NonCanonical;
    }
    CompactSizeRead::Value(value, 1 + width)
}
