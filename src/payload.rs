use std::io::{Read, Seek, SeekFrom};

use crate::{Error, PackFormat, Result};

/// Borrowed view of a packed float payload.
pub struct Payload<'a> {
    format: PackFormat,
    data: &'a [u8],
}

impl<'a> Payload<'a> {
    /// Wraps exactly `format.count` packed floats.
    #[inline]
    pub fn new(format: PackFormat, data: &'a [u8]) -> Result<Self> {
        let expected = expected_size(format)?;
        if data.len() != expected {
            return Err(Error::PayloadSize {
                expected,
                available: data.len(),
            });
        }
        Ok(Self { format, data })
    }

    /// Takes the payload from the end of a complete file image whose header
    /// form feed sits at `header_end`.
    #[inline]
    pub fn from_tail(format: PackFormat, file: &'a [u8], header_end: u64) -> Result<Self> {
        let expected = expected_size(format)?;
        let start = payload_start(file.len() as u64, expected, header_end)?;
        // start <= file.len() was checked above
        Self::new(format, &file[start as usize..])
    }

    #[inline]
    pub fn format(&self) -> PackFormat {
        self.format
    }

    #[inline]
    pub fn data(&self) -> &[u8] {
        self.data
    }

    /// Number of floats.
    #[inline]
    pub fn len(&self) -> usize {
        self.format.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.format.count == 0
    }

    /// Unpacks the payload into native-order floats.
    pub fn to_vec_f32(&self) -> Vec<f32> {
        self.data
            .chunks_exact(PackFormat::ELEMENT_SIZE)
            .map(|word| self.format.decode_word(word))
            .collect()
    }
}

#[inline]
fn expected_size(format: PackFormat) -> Result<usize> {
    format
        .byte_size()
        .ok_or_else(|| Error::Shape(format!("{format} overflows")))
}

/// Offset of a payload of `expected` bytes at the end of a `file_len` byte
/// stream. The payload may not reach back into the header.
fn payload_start(file_len: u64, expected: usize, header_end: u64) -> Result<u64> {
    let available = file_len.saturating_sub(header_end.saturating_add(1));
    if (expected as u64) > available {
        return Err(Error::PayloadSize {
            expected,
            available: usize::try_from(available).unwrap_or(usize::MAX),
        });
    }
    Ok(file_len - expected as u64)
}

/// Reads the payload described by `format` from the end of `reader`.
///
/// The header length is variable, so the payload is located by seeking
/// `count * 4` bytes back from the end of the stream. `header_end` is the
/// offset of the form feed returned by [`parse_header`](crate::parse_header).
pub fn read_payload<R: Read + Seek>(
    reader: &mut R,
    format: PackFormat,
    header_end: u64,
) -> Result<Vec<f32>> {
    let expected = expected_size(format)?;
    let file_len = reader.seek(SeekFrom::End(0))?;
    payload_start(file_len, expected, header_end)?;

    let back = i64::try_from(expected).map_err(|_| Error::Shape(format!("{format} overflows")))?;
    reader.seek(SeekFrom::End(-back))?;

    let mut buffer = vec![0u8; expected];
    reader.read_exact(&mut buffer)?;

    Ok(Payload::new(format, &buffer)?.to_vec_f32())
}
