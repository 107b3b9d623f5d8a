use snapgrep::{PatternSpec, Snapshot, SnapshotWriter};
use std::fs::File;
use std::path::Path;

/// Pack `files` into a snapshot container under `dir` and open it.
pub fn build_snapshot(dir: &Path, files: &[(&str, &[u8])]) -> Snapshot {
    let path = dir.join("fixture.snap");
    let f = File::create(&path).unwrap();
    let mut w = SnapshotWriter::new(f).unwrap();
    for (name, content) in files {
        w.append(name, content).unwrap();
    }
    w.finish().unwrap();
    Snapshot::open(&path).unwrap()
}

pub fn content_spec(pattern: &str) -> PatternSpec {
    PatternSpec {
        pattern: pattern.to_string(),
        is_case_sensitive: true,
        ..Default::default()
    }
}
