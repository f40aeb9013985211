use crate::binary::error::{BinaryError, Result};
use flate2::read::ZlibDecoder;
use std::borrow::Cow;
use std::io::Read;

/// Strips the stanza flag byte and inflates zlib-compressed payloads.
pub fn unpack(data: &[u8]) -> Result<Cow<'_, [u8]>> {
    if data.is_empty() {
        return Err(BinaryError::EmptyData);
    }
    let flags = data[0];
    let body = &data[1..];

    if flags & 2 != 0 {
        let mut decoder = ZlibDecoder::new(body);
        let mut decompressed = Vec::new();
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| BinaryError::Zlib(e.to_string()))?;
        Ok(Cow::Owned(decompressed))
    } else {
        Ok(Cow::Borrowed(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::ZlibEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_unpack_plain() {
        let unpacked = unpack(&[0, 1, 2, 3]).unwrap();
        assert_eq!(unpacked.as_ref(), &[1, 2, 3]);
    }

    #[test]
    fn test_unpack_compressed() {
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&[9, 8, 7]).unwrap();
        let mut data = vec![2];
        data.extend_from_slice(&encoder.finish().unwrap());

        let unpacked = unpack(&data).unwrap();
        assert_eq!(unpacked.as_ref(), &[9, 8, 7]);
    }

    #[test]
    fn test_unpack_empty_is_error() {
        assert!(matches!(unpack(&[]), Err(BinaryError::EmptyData)));
    }
}
