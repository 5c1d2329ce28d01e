use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bytes::Bytes;

use crate::error::{Result, SegmentStoreError};
use crate::store::SegmentStore;

/// Suffix for in-flight writes. `~` is always escaped in segment file names,
///  so this can never collide with a stored segment.
const TEMP_SUFFIX: &str = ".~tmp";

/// Segment store keeping one file per segment below a root directory
///
/// Segment names are arbitrary strings (usually URNs), so they are escaped
/// into a single flat file name: ASCII alphanumerics, `-`, `_` and `.` are
/// kept, everything else is written as `%XX`. A leading `.` is escaped too.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
}

impl DirectoryStore {
    /// Open (and create if needed) a store rooted at `root`.
    pub fn new(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        if !root.is_dir() {
            return Err(SegmentStoreError::Path(root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() {
            return Err(SegmentStoreError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(escape_name(name)))
    }
}

impl SegmentStore for DirectoryStore {
    fn write_segment(&self, name: &str, data: Bytes) -> Result<()> {
        let path = self.path_for(name)?;
        let mut temp = path.clone().into_os_string();
        temp.push(TEMP_SUFFIX);
        let temp = PathBuf::from(temp);

        {
            let mut file = fs::File::create(&temp)?;
            file.write_all(&data)?;
            file.sync_data()?;
        }
        fs::rename(&temp, &path)?;
        tracing::trace!(segment = name, len = data.len(), "directory store write");
        Ok(())
    }

    fn read_segment(&self, name: &str) -> Result<Bytes> {
        let path = self.path_for(name)?;
        match fs::read(&path) {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(SegmentStoreError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn has_segment(&self, name: &str) -> Result<bool> {
        Ok(self.path_for(name)?.is_file())
    }

    fn list_segments(&self, prefix: &str) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if file_name.ends_with(TEMP_SUFFIX) {
                continue;
            }
            match unescape_name(file_name) {
                Some(name) if name.starts_with(prefix) => names.push(name),
                Some(_) => {}
                None => tracing::warn!(file = file_name, "skipping foreign file in segment store"),
            }
        }
        names.sort();
        Ok(names)
    }
}

fn escape_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for (i, byte) in name.bytes().enumerate() {
        let keep = byte.is_ascii_alphanumeric()
            || byte == b'-'
            || byte == b'_'
            || (byte == b'.' && i > 0);
        if keep {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    out
}

fn unescape_name(file_name: &str) -> Option<String> {
    let bytes = file_name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = file_name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
