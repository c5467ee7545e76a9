use core::fmt;

/// Byte order of the binary payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Endian {
    Little,
    /// Scanner default when no `bigendian` flag is declared.
    #[default]
    Big,
}

impl Endian {
    /// Normalises the header's integer `bigendian` flag.
    #[inline]
    pub fn from_flag(flag: i64) -> Self {
        if flag != 0 { Self::Big } else { Self::Little }
    }

    /// Prefix used in the pack descriptor, `<` or `>`.
    #[inline]
    pub fn prefix(&self) -> char {
        match self {
            Self::Little => '<',
            Self::Big => '>',
        }
    }
}

/// How the payload is packed: byte order plus a count of 4-byte floats.
///
/// Displays as a struct-style descriptor, e.g. `<16f`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackFormat {
    pub endian: Endian,
    pub count: usize,
}

impl PackFormat {
    /// Size of one element; FDF payloads are always 32-bit floats.
    pub const ELEMENT_SIZE: usize = 4;
    pub const TYPE_CODE: char = 'f';

    #[inline]
    pub const fn new(endian: Endian, count: usize) -> Self {
        Self { endian, count }
    }

    /// Size in bytes of the payload, `None` on overflow.
    #[inline]
    pub fn byte_size(&self) -> Option<usize> {
        self.count.checked_mul(Self::ELEMENT_SIZE)
    }

    /// Converts one raw 4-byte payload word to a float in native order.
    #[inline]
    pub(crate) fn decode_word(&self, word: &[u8]) -> f32 {
        let raw: u32 = bytemuck::pod_read_unaligned(word);
        let bits = match self.endian {
            Endian::Little => u32::from_le(raw),
            Endian::Big => u32::from_be(raw),
        };
        f32::from_bits(bits)
    }
}

impl fmt::Display for PackFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.endian.prefix(), self.count, Self::TYPE_CODE)
    }
}
