use memmap2::Mmap;
use std::fs::File;
use std::path::Path;

use super::{SnapshotError, HEADER_LEN, MAGIC, VERSION};

/// One file inside an open snapshot: its repository-relative path and the
/// byte range of its content in the backing map.
#[derive(Debug, Clone)]
pub struct FileEntry {
    pub path: String,
    off: u64,
    len: u64,
}

/// An open snapshot: the mapped container plus an in-memory index of its
/// file table. Read-only and safely shared by all matcher workers of one
/// search; dropped when the search completes.
#[derive(Debug)]
pub struct Snapshot {
    mmap: Mmap,
    entries: Vec<FileEntry>,
}

impl Snapshot {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let file = File::open(path.as_ref())?;
        let mmap = unsafe { Mmap::map(&file)? };
        if mmap.len() < HEADER_LEN {
            return Err(SnapshotError::Corrupt(format!(
                "file too small ({} bytes)",
                mmap.len()
            )));
        }
        let magic = u32::from_le_bytes(mmap[0..4].try_into().unwrap());
        let version = u32::from_le_bytes(mmap[4..8].try_into().unwrap());
        if magic != MAGIC {
            return Err(SnapshotError::Corrupt("bad magic".to_string()));
        }
        if version != VERSION {
            return Err(SnapshotError::Corrupt(format!(
                "unsupported version {}",
                version
            )));
        }
        let count = u32::from_le_bytes(mmap[8..12].try_into().unwrap()) as usize;
        let table_off = u64::from_le_bytes(mmap[12..20].try_into().unwrap()) as usize;
        if table_off > mmap.len() {
            return Err(SnapshotError::Corrupt(format!(
                "table offset {} beyond file end {}",
                table_off,
                mmap.len()
            )));
        }

        let mut entries = Vec::with_capacity(count);
        let mut pos = table_off;
        for i in 0..count {
            let path_len = read_u16(&mmap, &mut pos, i)? as usize;
            if pos + path_len > mmap.len() {
                return Err(corrupt_entry(i, "path"));
            }
            let path = std::str::from_utf8(&mmap[pos..pos + path_len])
                .map_err(|_| corrupt_entry(i, "path not valid UTF-8"))?
                .to_string();
            pos += path_len;
            let off = read_u64(&mmap, &mut pos, i)?;
            let len = read_u64(&mmap, &mut pos, i)?;
            let end = off.checked_add(len).ok_or_else(|| corrupt_entry(i, "range"))?;
            if end > table_off as u64 {
                return Err(corrupt_entry(i, "content range"));
            }
            entries.push(FileEntry { path, off, len });
        }
        Ok(Self { mmap, entries })
    }

    pub fn files(&self) -> &[FileEntry] {
        &self.entries
    }

    pub fn file_count(&self) -> usize {
        self.entries.len()
    }

    /// Content bytes for the `i`th file. Ranges were validated at open,
    /// so a failure here means the handle outlived its backing file.
    pub fn content(&self, i: usize) -> Result<&[u8], SnapshotError> {
        let e = self
            .entries
            .get(i)
            .ok_or_else(|| SnapshotError::Io(format!("no such file index {}", i)))?;
        let (start, end) = (e.off as usize, (e.off + e.len) as usize);
        if end > self.mmap.len() {
            return Err(SnapshotError::Corrupt(format!(
                "content range {}..{} beyond map end {}",
                start,
                end,
                self.mmap.len()
            )));
        }
        Ok(&self.mmap[start..end])
    }
}

fn corrupt_entry(i: usize, what: &str) -> SnapshotError {
    SnapshotError::Corrupt(format!("truncated or malformed table entry {} ({})", i, what))
}

fn read_u16(mmap: &Mmap, pos: &mut usize, entry: usize) -> Result<u16, SnapshotError> {
    if *pos + 2 > mmap.len() {
        return Err(corrupt_entry(entry, "u16"));
    }
    let v = u16::from_le_bytes(mmap[*pos..*pos + 2].try_into().unwrap());
    *pos += 2;
    Ok(v)
}

fn read_u64(mmap: &Mmap, pos: &mut usize, entry: usize) -> Result<u64, SnapshotError> {
    if *pos + 8 > mmap.len() {
        return Err(corrupt_entry(entry, "u64"));
    }
    let v = u64::from_le_bytes(mmap[*pos..*pos + 8].try_into().unwrap());
    *pos += 8;
    Ok(v)
}
