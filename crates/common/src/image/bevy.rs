//! Bevy segment layout
//!
//! A bevy is stored as two segments named after the stream and the bevy
//! index:
//!
//! ```text
//! <stream>/00000003         transformed chunks, concatenated
//! <stream>/00000003.index   per chunk: offset (u64 LE) || length (u32 LE)
//! ```
//!
//! Chunks are variable length once compressed or encrypted, so the index is
//! the only way to find chunk boundaries inside the data segment.

use bytes::Bytes;

use super::error::ImageError;
use crate::urn::Urn;

/// Bytes per index entry
pub const INDEX_ENTRY_SIZE: usize = 12;

pub fn data_segment_name(stream: &Urn, bevy: u64) -> String {
    format!("{}/{:08}", stream, bevy)
}

pub fn index_segment_name(stream: &Urn, bevy: u64) -> String {
    format!("{}/{:08}.index", stream, bevy)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub offset: u64,
    pub length: u32,
}

/// Accumulates transformed chunks into a data segment and its index
#[derive(Debug, Default)]
pub struct BevyWriter {
    data: Vec<u8>,
    index: Vec<u8>,
}

impl BevyWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Result<(), ImageError> {
        let length = u32::try_from(chunk.len()).map_err(|_| {
            ImageError::Configuration(format!("chunk of {} bytes is too large", chunk.len()))
        })?;
        let offset = self.data.len() as u64;
        self.index.extend_from_slice(&offset.to_le_bytes());
        self.index.extend_from_slice(&length.to_le_bytes());
        self.data.extend_from_slice(chunk);
        Ok(())
    }

    pub fn chunk_count(&self) -> usize {
        self.index.len() / INDEX_ENTRY_SIZE
    }

    /// `(data, index)` segment contents
    pub fn finish(self) -> (Bytes, Bytes) {
        (Bytes::from(self.data), Bytes::from(self.index))
    }
}

pub fn decode_index(index: &[u8]) -> Result<Vec<IndexEntry>, ImageError> {
    if index.len() % INDEX_ENTRY_SIZE != 0 {
        return Err(ImageError::Corrupt(format!(
            "bevy index of {} bytes is not a multiple of {}",
            index.len(),
            INDEX_ENTRY_SIZE
        )));
    }
    Ok(index
        .chunks_exact(INDEX_ENTRY_SIZE)
        .map(|entry| {
            let mut offset = [0u8; 8];
            offset.copy_from_slice(&entry[..8]);
            let mut length = [0u8; 4];
            length.copy_from_slice(&entry[8..]);
            IndexEntry {
                offset: u64::from_le_bytes(offset),
                length: u32::from_le_bytes(length),
            }
        })
        .collect())
}

/// Split a data segment into its chunks, checking every entry is in bounds
pub fn split_chunks(data: &Bytes, index: &[IndexEntry]) -> Result<Vec<Bytes>, ImageError> {
    index
        .iter()
        .enumerate()
        .map(|(slot, entry)| {
            let start = usize::try_from(entry.offset).ok();
            let end = start.and_then(|s| s.checked_add(entry.length as usize));
            match (start, end) {
                (Some(start), Some(end)) if end <= data.len() => Ok(data.slice(start..end)),
                _ => Err(ImageError::Corrupt(format!(
                    "index entry {} ({} + {}) outside data segment of {} bytes",
                    slot,
                    entry.offset,
                    entry.length,
                    data.len()
                ))),
            }
        })
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_segment_names() {
        let stream = Urn::new("aff4://volume/image.dd");
        assert_eq!(data_segment_name(&stream, 3), "aff4://volume/image.dd/00000003");
        assert_eq!(
            index_segment_name(&stream, 12),
            "aff4://volume/image.dd/00000012.index"
        );
    }

    #[test]
    fn test_write_split() {
        let mut writer = BevyWriter::new();
        writer.push(b"first").unwrap();
        writer.push(b"").unwrap();
        writer.push(b"third chunk").unwrap();
        assert_eq!(writer.chunk_count(), 3);

        let (data, index) = writer.finish();
        assert_eq!(index.len(), 3 * INDEX_ENTRY_SIZE);
        let entries = decode_index(&index).unwrap();
        assert_eq!(entries[2], IndexEntry { offset: 5, length: 11 });

        let chunks = split_chunks(&data, &entries).unwrap();
        assert_eq!(&chunks[0][..], b"first");
        assert!(chunks[1].is_empty());
        assert_eq!(&chunks[2][..], b"third chunk");
    }

    #[test]
    fn test_corrupt_index() {
        assert!(matches!(decode_index(&[0u8; 13]), Err(ImageError::Corrupt(_))));

        let data = Bytes::from_static(b"short");
        let entries = [IndexEntry { offset: 2, length: 10 }];
        assert!(matches!(split_chunks(&data, &entries), Err(ImageError::Corrupt(_))));
        let entries = [IndexEntry { offset: u64::MAX, length: 1 }];
        assert!(matches!(split_chunks(&data, &entries), Err(ImageError::Corrupt(_))));
    }
}
