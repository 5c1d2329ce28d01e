use std::cmp::{max, min};
use std::fmt;
use std::io::{self, SeekFrom};
use std::sync::Arc;

use bytes::Bytes;
use segment_store::SegmentStore;

use super::bevy::{self, BevyWriter};
use super::cache::{BevyCache, DecodedBevy};
use super::compression::{CodecError, CompressionMethod};
use super::encrypted::EncryptedStream;
use super::error::ImageError;
use super::WriteMode;
use crate::config::{self, ImageConfig};
use crate::crypto::{CipherId, ContentKey, KdfParams, KeyBag, KeyBagError};
use crate::lexicon;
use crate::resolver::{Graph, Resolver, Value};
use crate::urn::Urn;

/// Decoded bevies kept by a stream opened with [`ImageStream::open`]
pub const DEFAULT_CACHE_BEVIES: usize = 4;

/// Plaintext of the one bevy currently being written
struct WorkingBevy {
    index: u64,
    chunks: Vec<Vec<u8>>,
    /// Stored form of chunks untouched since they were last read or flushed
    stored: Vec<Option<Bytes>>,
    /// Last revision of each slot found in the store, may extend past `chunks`
    revisions: Vec<Option<u32>>,
    dirty: bool,
}

impl WorkingBevy {
    fn empty(index: u64) -> Self {
        Self {
            index,
            chunks: Vec::new(),
            stored: Vec::new(),
            revisions: Vec::new(),
            dirty: false,
        }
    }

    fn from_decoded(index: u64, decoded: &DecodedBevy) -> Self {
        Self {
            index,
            chunks: decoded.chunks.clone(),
            stored: decoded.stored.iter().cloned().map(Some).collect(),
            revisions: decoded.revisions.clone(),
            dirty: false,
        }
    }

    fn revision(&self, slot: usize) -> Option<u32> {
        self.revisions.get(slot).copied().flatten()
    }

    fn patch(&mut self, slot: usize, within: usize, data: &[u8]) {
        if self.chunks.len() <= slot {
            self.chunks.resize_with(slot + 1, Vec::new);
            self.stored.resize(slot + 1, None);
        }
        let chunk = &mut self.chunks[slot];
        let end = within + data.len();
        if chunk.len() < end {
            chunk.resize(end, 0);
        }
        chunk[within..end].copy_from_slice(data);
        self.stored[slot] = None;
        self.dirty = true;
    }
}

/// Persisted description of an existing stream
struct StreamMetadata {
    volume: Urn,
    size: u64,
    chunk_size: u64,
    chunks_per_segment: u64,
    compression: CompressionMethod,
    encryption: Option<EncryptedStream>,
}

impl StreamMetadata {
    fn load(resolver: &Resolver, urn: &Urn) -> Result<Self, ImageError> {
        let stream_type = resolver.get_urn(urn, &lexicon::TYPE)?;
        let encryption = if stream_type == lexicon::ENCRYPTED_STREAM_TYPE {
            let cipher = resolver
                .get_string(urn, &lexicon::ENCRYPTION_CIPHER)?
                .parse::<CipherId>()?;
            let integrity = resolver.get_bool(urn, &lexicon::CHUNK_INTEGRITY)?;
            let mut encryption = EncryptedStream::from_declared(cipher, integrity)?;
            match resolver.get_optional(urn, &lexicon::KEY_BAG)? {
                Some(Value::Urn(key_bag)) => encryption.set_key_bag(key_bag),
                Some(other) => {
                    return Err(ImageError::Corrupt(format!(
                        "key bag reference of {} is a {}",
                        urn,
                        other.kind()
                    )))
                }
                None => {}
            }
            Some(encryption)
        } else if stream_type == lexicon::IMAGE_STREAM_TYPE {
            None
        } else {
            return Err(ImageError::Configuration(format!(
                "{} is a {}, not an image stream",
                urn, stream_type
            )));
        };

        let metadata = Self {
            volume: resolver.get_urn(urn, &lexicon::STORED)?,
            size: resolver.get_u64(urn, &lexicon::SIZE)?,
            chunk_size: resolver.get_u64(urn, &lexicon::CHUNK_SIZE)?,
            chunks_per_segment: resolver.get_u64(urn, &lexicon::CHUNKS_PER_SEGMENT)?,
            compression: resolver
                .get_string(urn, &lexicon::COMPRESSION_METHOD)?
                .parse()?,
            encryption,
        };
        config::validate_chunking(metadata.chunk_size, metadata.chunks_per_segment)
            .map_err(|e| ImageError::Corrupt(e.to_string()))?;

        if resolver.get_optional(urn, &lexicon::BEVY_COUNT)?.is_some() {
            let declared = resolver.get_u64(urn, &lexicon::BEVY_COUNT)?;
            let expected = bevy_count(
                metadata.size,
                metadata.chunk_size * metadata.chunks_per_segment,
            );
            if declared != expected {
                return Err(ImageError::Corrupt(format!(
                    "{} declares {} bevies but {} bytes need {}",
                    urn, declared, metadata.size, expected
                )));
            }
        }
        Ok(metadata)
    }
}

/// A linear byte stream stored as chunked, compressed and optionally
/// encrypted bevies
///
/// The stream has independent read and write cursors. Writes land in a
/// single in-memory working bevy which is flushed to the segment store when
/// it fills up, when the write cursor moves to another bevy, on [`flush`]
/// and on [`close`]. Metadata is recorded in the resolver's persisted graph.
///
/// A stream opened for writing must be closed; dropping it logs a warning and
/// makes a best-effort close.
///
/// [`flush`]: ImageStream::flush
/// [`close`]: ImageStream::close
pub struct ImageStream {
    urn: Urn,
    volume: Urn,
    resolver: Resolver,
    store: Arc<dyn SegmentStore>,
    chunk_size: u64,
    chunks_per_segment: u64,
    compression: CompressionMethod,
    encryption: Option<EncryptedStream>,
    size: u64,
    read_offset: u64,
    write_offset: u64,
    working: Option<WorkingBevy>,
    cache: BevyCache,
    // None for read-only streams
    write_mode: Option<WriteMode>,
    /// Lowest revision a chunk written in this session may use
    revision_floor: u32,
    /// Highest revision used by this or any earlier incarnation
    max_revision: Option<u32>,
    closed: bool,
}

impl fmt::Debug for ImageStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageStream")
            .field("urn", &self.urn)
            .field("volume", &self.volume)
            .field("size", &self.size)
            .field("chunk_size", &self.chunk_size)
            .field("chunks_per_segment", &self.chunks_per_segment)
            .field("compression", &self.compression)
            .field("encryption", &self.encryption)
            .field("write_mode", &self.write_mode)
            .finish_non_exhaustive()
    }
}

impl ImageStream {
    /// Create a stream for writing
    ///
    /// The write mode is taken from the volume's transient `writeMode` fact
    ///  when there is one, otherwise from `config`. Appending to a stream the
    ///  resolver already knows keeps its persisted geometry and cipher and
    ///  places the write cursor at its end.
    pub fn create(
        resolver: Resolver,
        store: Arc<dyn SegmentStore>,
        urn: Urn,
        volume: Urn,
        config: ImageConfig,
    ) -> Result<Self, ImageError> {
        config
            .validate()
            .map_err(|e| ImageError::Configuration(e.to_string()))?;
        let mode = requested_write_mode(&resolver, &volume)?.unwrap_or(config.write_mode);
        let exists = !resolver
            .get(Graph::Persisted, &urn, &lexicon::SIZE)
            .is_empty();
        let max_revision = stored_max_revision(&resolver, &urn)?;
        let revision_floor = match max_revision {
            None => 0,
            Some(r) => r.checked_add(1).ok_or_else(|| {
                ImageError::Configuration(format!("{} has used up its chunk revisions", urn))
            })?,
        };

        let metadata = if mode == WriteMode::Append && exists {
            let metadata = StreamMetadata::load(&resolver, &urn)?;
            if metadata.volume != volume {
                return Err(ImageError::Configuration(format!(
                    "{} is stored in {}, not {}",
                    urn, metadata.volume, volume
                )));
            }
            metadata
        } else {
            StreamMetadata {
                volume,
                size: 0,
                chunk_size: config.chunk_size,
                chunks_per_segment: config.chunks_per_segment,
                compression: config.compression,
                encryption: config.cipher.map(EncryptedStream::new),
            }
        };

        let mut stream = Self::from_metadata(resolver, store, urn, metadata, config.cache_bevies);
        stream.write_offset = stream.size;
        stream.write_mode = Some(mode);
        stream.revision_floor = revision_floor;
        stream.max_revision = max_revision;
        tracing::debug!(
            stream = %stream.urn,
            mode = %mode,
            size = stream.size,
            chunk_size = stream.chunk_size,
            chunks_per_segment = stream.chunks_per_segment,
            encrypted = stream.encryption.is_some(),
            revision_floor,
            "created image stream"
        );
        Ok(stream)
    }

    /// Open an existing stream read-only from its persisted facts
    pub fn open(
        resolver: Resolver,
        store: Arc<dyn SegmentStore>,
        urn: Urn,
    ) -> Result<Self, ImageError> {
        let metadata = StreamMetadata::load(&resolver, &urn)?;
        let stream = Self::from_metadata(resolver, store, urn, metadata, DEFAULT_CACHE_BEVIES);
        tracing::debug!(stream = %stream.urn, size = stream.size, "opened image stream");
        Ok(stream)
    }

    fn from_metadata(
        resolver: Resolver,
        store: Arc<dyn SegmentStore>,
        urn: Urn,
        metadata: StreamMetadata,
        cache_bevies: usize,
    ) -> Self {
        Self {
            urn,
            volume: metadata.volume,
            resolver,
            store,
            chunk_size: metadata.chunk_size,
            chunks_per_segment: metadata.chunks_per_segment,
            compression: metadata.compression,
            encryption: metadata.encryption,
            size: metadata.size,
            read_offset: 0,
            write_offset: 0,
            working: None,
            cache: BevyCache::new(cache_bevies),
            write_mode: None,
            revision_floor: 0,
            max_revision: None,
            closed: false,
        }
    }

    pub fn urn(&self) -> &Urn {
        &self.urn
    }

    pub fn volume(&self) -> &Urn {
        &self.volume
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn chunks_per_segment(&self) -> u64 {
        self.chunks_per_segment
    }

    pub fn compression(&self) -> CompressionMethod {
        self.compression
    }

    pub fn encryption(&self) -> Option<&EncryptedStream> {
        self.encryption.as_ref()
    }

    pub fn is_encrypted(&self) -> bool {
        self.encryption.is_some()
    }

    /// `None` when the stream is read-only
    pub fn write_mode(&self) -> Option<WriteMode> {
        self.write_mode
    }

    pub fn read_offset(&self) -> u64 {
        self.read_offset
    }

    pub fn write_offset(&self) -> u64 {
        self.write_offset
    }

    /// Number of bevies the current size occupies
    pub fn bevy_count(&self) -> u64 {
        bevy_count(self.size, self.bevy_span())
    }

    pub fn set_chunk_size(&mut self, chunk_size: u64) -> Result<(), ImageError> {
        self.ensure_empty("chunk size")?;
        config::validate_chunking(chunk_size, self.chunks_per_segment)
            .map_err(|e| ImageError::Configuration(e.to_string()))?;
        self.chunk_size = chunk_size;
        self.working = None;
        Ok(())
    }

    pub fn set_chunks_per_segment(&mut self, chunks_per_segment: u64) -> Result<(), ImageError> {
        self.ensure_empty("chunks per segment")?;
        config::validate_chunking(self.chunk_size, chunks_per_segment)
            .map_err(|e| ImageError::Configuration(e.to_string()))?;
        self.chunks_per_segment = chunks_per_segment;
        self.working = None;
        Ok(())
    }

    pub fn set_compression(&mut self, compression: CompressionMethod) -> Result<(), ImageError> {
        self.ensure_empty("compression")?;
        self.compression = compression;
        Ok(())
    }

    /// Use `key` for every chunk of this stream
    pub fn set_key(&mut self, key: ContentKey) -> Result<(), ImageError> {
        self.encryption
            .as_mut()
            .ok_or_else(|| not_encrypted(&self.urn))?
            .set_key(key);
        Ok(())
    }

    /// Record `key_bag` as the way to recover this stream's content key
    pub fn set_key_bag(&mut self, key_bag: &KeyBag) -> Result<(), ImageError> {
        self.ensure_empty("key bag")?;
        let encryption = self
            .encryption
            .as_mut()
            .ok_or_else(|| not_encrypted(&self.urn))?;
        key_bag.save(&self.resolver, &self.volume);
        encryption.set_key_bag(key_bag.urn().clone());
        Ok(())
    }

    /// Generate a content key, protect it with `password` and start using it
    pub fn set_password(&mut self, password: &str, kdf: KdfParams) -> Result<KeyBag, ImageError> {
        let key = ContentKey::generate().map_err(KeyBagError::from)?;
        let key_bag = KeyBag::wrap(&key, password, kdf)?;
        self.set_key_bag(&key_bag)?;
        self.set_key(key)?;
        Ok(key_bag)
    }

    /// Unwrap the stream's key bag with `password`
    ///
    /// # Errors
    ///
    /// A wrong password is [`KeyBagError::BadPassword`], reported before any
    ///  chunk is decrypted.
    pub fn unlock(&mut self, password: &str) -> Result<(), ImageError> {
        let encryption = self
            .encryption
            .as_mut()
            .ok_or_else(|| not_encrypted(&self.urn))?;
        let key_bag = encryption.key_bag().cloned().ok_or_else(|| {
            ImageError::Configuration(format!("{} has no key bag", self.urn))
        })?;
        let bag = KeyBag::load_from_resolver(&self.resolver, &self.volume, &key_bag)?;
        encryption.set_key(bag.unwrap_key(password)?);
        tracing::debug!(stream = %self.urn, key_bag = %key_bag, "unlocked image stream");
        Ok(())
    }

    /// Write at the write cursor, overwriting existing bytes and growing the
    ///  stream past its end
    ///
    /// Returns the number of bytes accepted. If storing a bevy fails after
    ///  some bytes were accepted the count is short, the bevy stays buffered
    ///  and the error is returned by the next write, flush or close.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, ImageError> {
        self.ensure_writable()?;
        if let Some(encryption) = &self.encryption {
            if !encryption.has_key() {
                return Err(ImageError::Configuration(format!(
                    "{} has no content key, call unlock or set_key first",
                    self.urn
                )));
            }
        }

        let mut written = 0;
        while written < data.len() {
            match self.write_chunk(&data[written..]) {
                Ok(n) => written += n,
                Err(e) if written > 0 => {
                    tracing::warn!(stream = %self.urn, written, error = %e, "short write");
                    break;
                }
                Err(e) => return Err(e),
            }

            if self.working_is_full() {
                if let Err(e) = self.flush_working() {
                    tracing::warn!(stream = %self.urn, written, error = %e, "failed to store full bevy");
                    break;
                }
            }
        }
        Ok(written)
    }

    /// Write up to the end of the chunk under the write cursor
    fn write_chunk(&mut self, data: &[u8]) -> Result<usize, ImageError> {
        let offset = self.write_offset;
        let chunk = offset / self.chunk_size;
        let bevy = chunk / self.chunks_per_segment;
        let slot = (chunk % self.chunks_per_segment) as usize;
        let within = (offset % self.chunk_size) as usize;
        let n = min(self.chunk_size as usize - within, data.len());

        self.prepare_working(bevy)?.patch(slot, within, &data[..n]);
        self.write_offset += n as u64;
        self.size = max(self.size, self.write_offset);
        tracing::trace!(stream = %self.urn, chunk, bevy, within, len = n, "patched chunk");
        Ok(n)
    }

    fn working_is_full(&self) -> bool {
        self.working.as_ref().map_or(false, |working| {
            working.dirty
                && working.chunks.len() as u64 == self.chunks_per_segment
                && working
                    .chunks
                    .last()
                    .map_or(false, |chunk| chunk.len() as u64 == self.chunk_size)
        })
    }

    pub fn seek_write(&mut self, pos: SeekFrom) -> Result<u64, ImageError> {
        self.ensure_writable()?;
        self.write_offset = self.resolve_seek(pos, self.write_offset)?;
        Ok(self.write_offset)
    }

    /// Read up to `len` bytes at the read cursor. Fewer bytes are returned
    ///  near the end of the stream, none at its end.
    pub fn read(&mut self, len: usize) -> Result<Vec<u8>, ImageError> {
        let available = self.size.saturating_sub(self.read_offset);
        let len = min(len as u64, available) as usize;
        let mut buf = vec![0u8; len];
        let n = self.read_into(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// Everything from the read cursor to the end of the stream
    pub fn read_all(&mut self) -> Result<Vec<u8>, ImageError> {
        let remaining = self.size.saturating_sub(self.read_offset);
        let len = usize::try_from(remaining).map_err(|_| {
            ImageError::Configuration(format!("{} bytes do not fit in memory", remaining))
        })?;
        self.read(len)
    }

    pub fn read_into(&mut self, buf: &mut [u8]) -> Result<usize, ImageError> {
        let end = min(self.read_offset.saturating_add(buf.len() as u64), self.size);
        let mut filled = 0;
        while self.read_offset < end {
            let offset = self.read_offset;
            let chunk = offset / self.chunk_size;
            let bevy = chunk / self.chunks_per_segment;
            let slot = (chunk % self.chunks_per_segment) as usize;
            let within = (offset % self.chunk_size) as usize;
            let take = min(self.chunk_size - within as u64, end - offset) as usize;

            self.copy_from_chunk(bevy, slot, within, &mut buf[filled..filled + take])?;
            filled += take;
            self.read_offset += take as u64;
        }
        Ok(filled)
    }

    pub fn seek_read(&mut self, pos: SeekFrom) -> Result<u64, ImageError> {
        self.read_offset = self.resolve_seek(pos, self.read_offset)?;
        Ok(self.read_offset)
    }

    /// Store the working bevy and record the stream's metadata
    pub fn flush(&mut self) -> Result<(), ImageError> {
        if self.write_mode.is_none() {
            return Ok(());
        }
        self.flush_working()?;
        self.persist_metadata()
    }

    /// Flush and release the stream. On error the stream is dropped with
    ///  another best-effort close attempt.
    pub fn close(mut self) -> Result<(), ImageError> {
        self.finish()
    }

    fn finish(&mut self) -> Result<(), ImageError> {
        if self.closed {
            return Ok(());
        }
        self.flush()?;
        self.closed = true;
        tracing::debug!(
            stream = %self.urn,
            size = self.size,
            bevies = self.bevy_count(),
            "closed image stream"
        );
        Ok(())
    }

    fn ensure_writable(&self) -> Result<(), ImageError> {
        if self.write_mode.is_none() {
            return Err(ImageError::Configuration(format!("{} is read-only", self.urn)));
        }
        Ok(())
    }

    fn ensure_empty(&self, what: &str) -> Result<(), ImageError> {
        self.ensure_writable()?;
        if self.size > 0 {
            return Err(ImageError::Configuration(format!(
                "cannot change {} of {} once it holds data",
                what, self.urn
            )));
        }
        Ok(())
    }

    fn resolve_seek(&self, pos: SeekFrom, current: u64) -> Result<u64, ImageError> {
        let target = match pos {
            SeekFrom::Start(n) => i128::from(n),
            SeekFrom::Current(delta) => i128::from(current) + i128::from(delta),
            SeekFrom::End(delta) => i128::from(self.size) + i128::from(delta),
        };
        if target < 0 || target > i128::from(self.size) {
            return Err(ImageError::InvalidSeek {
                offset: target,
                size: self.size,
            });
        }
        Ok(target as u64)
    }

    fn bevy_span(&self) -> u64 {
        self.chunk_size * self.chunks_per_segment
    }

    /// Chunks of `bevy` covered by the current size
    fn chunks_in_bevy(&self, bevy: u64) -> u64 {
        let total = self.size / self.chunk_size + u64::from(self.size % self.chunk_size != 0);
        let first = bevy * self.chunks_per_segment;
        min(total.saturating_sub(first), self.chunks_per_segment)
    }

    /// True length of a chunk, shorter than the chunk size only at the end
    fn chunk_len(&self, chunk: u64) -> usize {
        let start = chunk * self.chunk_size;
        min(self.chunk_size, self.size.saturating_sub(start)) as usize
    }

    fn prepare_working(&mut self, bevy: u64) -> Result<&mut WorkingBevy, ImageError> {
        if self.working.as_ref().map_or(true, |working| working.index != bevy) {
            self.flush_working()?;
            let loaded = self.load_working(bevy)?;
            self.working = Some(loaded);
        }
        Ok(self.working.get_or_insert_with(|| WorkingBevy::empty(bevy)))
    }

    fn load_working(&mut self, bevy: u64) -> Result<WorkingBevy, ImageError> {
        if bevy * self.bevy_span() < self.size {
            let decoded = self.decoded_bevy(bevy)?;
            tracing::debug!(stream = %self.urn, bevy, "rewriting stored bevy");
            return Ok(WorkingBevy::from_decoded(bevy, &decoded));
        }
        let mut working = WorkingBevy::empty(bevy);
        if self.encryption.is_some() {
            working.revisions = self.stale_revisions(bevy)?;
        }
        Ok(working)
    }

    /// Revisions of chunks left in the store by an earlier, truncated
    ///  incarnation of this stream
    fn stale_revisions(&self, bevy: u64) -> Result<Vec<Option<u32>>, ImageError> {
        let data_name = bevy::data_segment_name(&self.urn, bevy);
        let index_name = bevy::index_segment_name(&self.urn, bevy);
        if !self.store.has_segment(&data_name)? || !self.store.has_segment(&index_name)? {
            return Ok(Vec::new());
        }

        let data = self.store.read_segment(&data_name)?;
        let index = self.store.read_segment(&index_name)?;
        let chunks = match bevy::decode_index(&index).and_then(|e| bevy::split_chunks(&data, &e)) {
            Ok(chunks) => chunks,
            Err(e) => {
                tracing::warn!(stream = %self.urn, bevy, error = %e, "ignoring unreadable stale bevy");
                return Ok(Vec::new());
            }
        };
        tracing::debug!(stream = %self.urn, bevy, chunks = chunks.len(), "continuing revisions of stale bevy");

        let first = bevy * self.chunks_per_segment;
        Ok(chunks
            .iter()
            .enumerate()
            .map(|(slot, stored)| EncryptedStream::revision_of(first + slot as u64, stored).ok())
            .collect())
    }

    /// Write the working bevy to the store if it has unsaved changes. On
    ///  failure the bevy stays dirty, but the revisions it used are kept so a
    ///  retry never encrypts new data under an IV that may already be stored.
    fn flush_working(&mut self) -> Result<(), ImageError> {
        let (bevy, writer, stored, revisions) = match self.working.as_ref() {
            Some(working) if working.dirty => {
                let (writer, stored, revisions) = self.encode_bevy(working)?;
                (working.index, writer, stored, revisions)
            }
            _ => return Ok(()),
        };

        let chunks = writer.chunk_count();
        let (data, index) = writer.finish();
        let bytes = data.len();
        let result = self
            .store
            .write_segment(&bevy::data_segment_name(&self.urn, bevy), data)
            .and_then(|()| {
                self.store
                    .write_segment(&bevy::index_segment_name(&self.urn, bevy), index)
            });

        let Some(working) = self.working.as_mut() else {
            return Ok(result?);
        };
        let used = working.revisions.iter().chain(&revisions).flatten().max().copied();
        self.max_revision = max(self.max_revision, used);
        working.revisions = revisions;
        result?;
        working.stored = stored.into_iter().map(Some).collect();
        working.dirty = false;
        self.cache.invalidate(bevy);
        tracing::debug!(stream = %self.urn, bevy, chunks, bytes, "flushed bevy");
        Ok(())
    }

    fn encode_bevy(
        &self,
        working: &WorkingBevy,
    ) -> Result<(BevyWriter, Vec<Bytes>, Vec<Option<u32>>), ImageError> {
        let first = working.index * self.chunks_per_segment;
        let mut writer = BevyWriter::new();
        let mut stored = Vec::with_capacity(working.chunks.len());
        let mut revisions = working.revisions.clone();
        if revisions.len() < working.chunks.len() {
            revisions.resize(working.chunks.len(), None);
        }

        for (slot, plaintext) in working.chunks.iter().enumerate() {
            let chunk = first + slot as u64;
            let bytes = match working.stored.get(slot).cloned().flatten() {
                Some(bytes) => bytes,
                None => {
                    let revision = match &self.encryption {
                        Some(_) => Some(max(
                            EncryptedStream::next_revision(chunk, working.revision(slot))?,
                            self.revision_floor,
                        )),
                        None => None,
                    };
                    revisions[slot] = revision;
                    Bytes::from(self.encode_chunk(chunk, revision.unwrap_or(0), plaintext)?)
                }
            };
            writer.push(&bytes)?;
            stored.push(bytes);
        }
        Ok((writer, stored, revisions))
    }

    fn encode_chunk(&self, chunk: u64, revision: u32, plaintext: &[u8]) -> Result<Vec<u8>, ImageError> {
        let packed = self.compression.compress(chunk, plaintext)?;
        // raw unless compression actually helps; decode relies on this
        let body = if packed.len() < plaintext.len() {
            packed
        } else {
            plaintext.to_vec()
        };
        match &self.encryption {
            Some(encryption) => Ok(encryption.encrypt_chunk(chunk, revision, &body)?),
            None => Ok(body),
        }
    }

    fn decode_chunk(
        &self,
        chunk: u64,
        stored: &[u8],
        expected: usize,
    ) -> Result<(Option<u32>, Vec<u8>), ImageError> {
        let (revision, body) = match &self.encryption {
            Some(encryption) => {
                let (revision, body) = encryption.decrypt_chunk(chunk, stored)?;
                (Some(revision), body)
            }
            None => (None, stored.to_vec()),
        };

        if body.len() == expected {
            return Ok((revision, body));
        }
        if body.len() > expected {
            return Err(ImageError::Corrupt(format!(
                "chunk {} holds {} bytes, expected {}",
                chunk,
                body.len(),
                expected
            )));
        }
        let plaintext = self
            .compression
            .decompress(chunk, &body, expected)
            .map_err(|e| match e {
                e @ CodecError::Length { .. } => ImageError::Corrupt(e.to_string()),
                other => ImageError::Codec(other),
            })?;
        Ok((revision, plaintext))
    }

    fn decoded_bevy(&mut self, bevy: u64) -> Result<Arc<DecodedBevy>, ImageError> {
        if let Some(hit) = self.cache.get(bevy) {
            return Ok(hit);
        }
        let decoded = Arc::new(self.decode_bevy(bevy)?);
        self.cache.insert(bevy, Arc::clone(&decoded));
        Ok(decoded)
    }

    fn decode_bevy(&self, bevy: u64) -> Result<DecodedBevy, ImageError> {
        let expected = self.chunks_in_bevy(bevy);
        let data = self
            .store
            .read_segment(&bevy::data_segment_name(&self.urn, bevy))?;
        let index = bevy::decode_index(
            &self
                .store
                .read_segment(&bevy::index_segment_name(&self.urn, bevy))?,
        )?;
        if index.len() as u64 != expected {
            return Err(ImageError::Corrupt(format!(
                "bevy {} of {} has {} chunks, expected {}",
                bevy,
                self.urn,
                index.len(),
                expected
            )));
        }

        let stored = bevy::split_chunks(&data, &index)?;
        let first = bevy * self.chunks_per_segment;
        let mut chunks = Vec::with_capacity(stored.len());
        let mut revisions = Vec::with_capacity(stored.len());
        for (slot, bytes) in stored.iter().enumerate() {
            let chunk = first + slot as u64;
            let (revision, plaintext) = self.decode_chunk(chunk, bytes, self.chunk_len(chunk))?;
            chunks.push(plaintext);
            revisions.push(revision);
        }
        tracing::debug!(stream = %self.urn, bevy, chunks = chunks.len(), "loaded bevy");
        Ok(DecodedBevy {
            chunks,
            stored,
            revisions,
        })
    }

    fn copy_from_chunk(
        &mut self,
        bevy: u64,
        slot: usize,
        within: usize,
        out: &mut [u8],
    ) -> Result<(), ImageError> {
        let in_working = self
            .working
            .as_ref()
            .map_or(false, |working| working.index == bevy);
        if in_working {
            let chunk = self
                .working
                .as_ref()
                .and_then(|working| working.chunks.get(slot));
            return copy_range(chunk.map(Vec::as_slice), within, out, bevy, slot);
        }
        let decoded = self.decoded_bevy(bevy)?;
        copy_range(decoded.chunks.get(slot).map(Vec::as_slice), within, out, bevy, slot)
    }

    fn persist_metadata(&self) -> Result<(), ImageError> {
        let g = Graph::Persisted;
        let s = &self.urn;
        let r = &self.resolver;

        let stream_type = if self.encryption.is_some() {
            lexicon::ENCRYPTED_STREAM_TYPE
        } else {
            lexicon::IMAGE_STREAM_TYPE
        };
        r.set(g, s, &lexicon::TYPE, stream_type);
        r.set(g, s, &lexicon::STORED, &self.volume);
        r.set(g, s, &lexicon::SIZE, stored_int(self.size)?);
        r.set(g, s, &lexicon::CHUNK_SIZE, stored_int(self.chunk_size)?);
        r.set(g, s, &lexicon::CHUNKS_PER_SEGMENT, stored_int(self.chunks_per_segment)?);
        r.set(g, s, &lexicon::COMPRESSION_METHOD, self.compression.as_str());
        r.set(g, s, &lexicon::BEVY_COUNT, stored_int(self.bevy_count())?);
        if let Some(revision) = self.max_revision {
            r.set(g, s, &lexicon::MAX_REVISION, i64::from(revision));
        }

        match &self.encryption {
            Some(encryption) => {
                r.set(g, s, &lexicon::ENCRYPTION_CIPHER, encryption.cipher().as_str());
                r.set(g, s, &lexicon::CHUNK_INTEGRITY, encryption.integrity());
                match encryption.key_bag() {
                    Some(key_bag) => r.set(g, s, &lexicon::KEY_BAG, key_bag),
                    None => {
                        r.remove(g, s, &lexicon::KEY_BAG);
                    }
                }
            }
            None => {
                r.remove(g, s, &lexicon::ENCRYPTION_CIPHER);
                r.remove(g, s, &lexicon::CHUNK_INTEGRITY);
                r.remove(g, s, &lexicon::KEY_BAG);
            }
        }
        Ok(())
    }
}

impl Drop for ImageStream {
    fn drop(&mut self) {
        if self.closed || self.write_mode.is_none() {
            return;
        }
        tracing::warn!(stream = %self.urn, "image stream dropped without close");
        if let Err(e) = self.finish() {
            tracing::error!(stream = %self.urn, error = %e, "failed to close dropped image stream");
        }
    }
}

impl io::Read for ImageStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Ok(self.read_into(buf)?)
    }
}

impl io::Write for ImageStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(ImageStream::write(self, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(ImageStream::flush(self)?)
    }
}

fn requested_write_mode(resolver: &Resolver, volume: &Urn) -> Result<Option<WriteMode>, ImageError> {
    match resolver
        .get(Graph::Transient, volume, &lexicon::STREAM_WRITE_MODE)
        .as_slice()
    {
        [] => Ok(None),
        [Value::String(mode)] => mode.parse().map(Some),
        other => Err(ImageError::Configuration(format!(
            "invalid write mode for {}: {:?}",
            volume, other
        ))),
    }
}

fn bevy_count(size: u64, bevy_span: u64) -> u64 {
    size / bevy_span + u64::from(size % bevy_span != 0)
}

fn stored_int(value: u64) -> Result<i64, ImageError> {
    i64::try_from(value)
        .map_err(|_| ImageError::Configuration(format!("{} does not fit a stored integer", value)))
}

/// Revision high-water mark left by earlier incarnations of `urn`
fn stored_max_revision(resolver: &Resolver, urn: &Urn) -> Result<Option<u32>, ImageError> {
    if resolver.get_optional(urn, &lexicon::MAX_REVISION)?.is_none() {
        return Ok(None);
    }
    let revision = resolver.get_u64(urn, &lexicon::MAX_REVISION)?;
    u32::try_from(revision)
        .map(Some)
        .map_err(|_| ImageError::Corrupt(format!("{} records revision {}", urn, revision)))
}

fn not_encrypted(urn: &Urn) -> ImageError {
    ImageError::Configuration(format!("{} is not an encrypted stream", urn))
}

fn copy_range(
    chunk: Option<&[u8]>,
    within: usize,
    out: &mut [u8],
    bevy: u64,
    slot: usize,
) -> Result<(), ImageError> {
    let src = chunk
        .and_then(|chunk| chunk.get(within..within + out.len()))
        .ok_or_else(|| {
            ImageError::Corrupt(format!(
                "chunk {} of bevy {} is shorter than the stream",
                slot, bevy
            ))
        })?;
    out.copy_from_slice(src);
    Ok(())
}
