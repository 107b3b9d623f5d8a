use anyhow::{bail, Result};
use std::io::{Seek, SeekFrom, Write};

use super::{HEADER_LEN, MAGIC, VERSION};

/// Streaming writer for the snapshot container.
///
/// Contents are appended as they arrive; the file table and the final
/// header land in `finish`. Callers write to a temporary file and rename
/// it into place so readers never observe a partial snapshot.
pub struct SnapshotWriter<W: Write + Seek> {
    w: W,
    entries: Vec<(String, u64, u64)>,
    off: u64,
}

impl<W: Write + Seek> SnapshotWriter<W> {
    pub fn new(mut w: W) -> Result<Self> {
        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend(&MAGIC.to_le_bytes());
        header.extend(&VERSION.to_le_bytes());
        header.extend(&0u32.to_le_bytes()); // file count, patched in finish
        header.extend(&0u64.to_le_bytes()); // table offset, patched in finish
        w.write_all(&header)?;
        Ok(Self {
            w,
            entries: Vec::new(),
            off: HEADER_LEN as u64,
        })
    }

    /// Append one file. An empty `content` records the path name only
    /// (used for entries whose bytes were filtered out, e.g. binaries).
    pub fn append(&mut self, path: &str, content: &[u8]) -> Result<()> {
        if path.len() > u16::MAX as usize {
            bail!("path too long: {} bytes", path.len());
        }
        self.w.write_all(content)?;
        self.entries
            .push((path.to_string(), self.off, content.len() as u64));
        self.off += content.len() as u64;
        Ok(())
    }

    pub fn file_count(&self) -> usize {
        self.entries.len()
    }

    /// Write the file table and patch the header.
    pub fn finish(mut self) -> Result<()> {
        let table_off = self.off;
        let mut table: Vec<u8> = Vec::new();
        for (path, off, len) in &self.entries {
            let b = path.as_bytes();
            table.extend(&(b.len() as u16).to_le_bytes());
            table.extend(b);
            table.extend(&off.to_le_bytes());
            table.extend(&len.to_le_bytes());
        }
        self.w.write_all(&table)?;

        self.w.flush()?;
        self.w.seek(SeekFrom::Start(0))?;
        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend(&MAGIC.to_le_bytes());
        header.extend(&VERSION.to_le_bytes());
        header.extend(&(self.entries.len() as u32).to_le_bytes());
        header.extend(&table_off.to_le_bytes());
        self.w.write_all(&header)?;
        self.w.flush()?;
        Ok(())
    }
}
