//! Per-domain drop snapshots and the files external dashboards read.
//!
//! Both files are replaced atomically: written next to the target and renamed
//! over it, so a reader never sees a half-written file.

use std::{
    fs::{self, File},
    io::{self, BufWriter, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use crate::tables::GlobalStats;

/// `(domain, drops)` rows with non-zero drops, in registration order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DropSnapshot {
    rows: Vec<(String, u64)>,
}

impl DropSnapshot {
    pub fn new(rows: Vec<(String, u64)>) -> Self {
        Self { rows }
    }

    /// Each call starts a fresh pass over the same rows.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.rows.iter().map(|(name, drops)| (name.as_str(), *drops))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// `name:count\n` per row.
    pub fn write_to<W: Write>(&self, mut out: W) -> io::Result<()> {
        for (name, drops) in self.iter() {
            writeln!(out, "{name}:{drops}")?;
        }
        out.flush()
    }
}

pub trait SnapshotSink: Send + Sync {
    fn publish(&self, snapshot: &DropSnapshot) -> io::Result<()>;
}

/// Writes each snapshot to a file, replacing the previous one.
#[derive(Debug, Clone)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotSink for FileSink {
    fn publish(&self, snapshot: &DropSnapshot) -> io::Result<()> {
        replace_file(&self.path, |out| snapshot.write_to(out))
    }
}

/// Keeps the latest snapshot in memory. Used by dry runs and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    last: Mutex<Option<DropSnapshot>>,
    published: Mutex<usize>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last(&self) -> Option<DropSnapshot> {
        self.last.lock().expect("snapshot sink mutex poisoned").clone()
    }

    pub fn published(&self) -> usize {
        *self.published.lock().expect("snapshot sink mutex poisoned")
    }
}

impl SnapshotSink for MemorySink {
    fn publish(&self, snapshot: &DropSnapshot) -> io::Result<()> {
        *self.last.lock().expect("snapshot sink mutex poisoned") = Some(snapshot.clone());
        *self.published.lock().expect("snapshot sink mutex poisoned") += 1;
        Ok(())
    }
}

/// `total:N\nblocked:M\n`.
pub fn write_stats_file(path: &Path, stats: GlobalStats) -> io::Result<()> {
    replace_file(path, |out| {
        writeln!(out, "total:{}", stats.total)?;
        writeln!(out, "blocked:{}", stats.blocked)?;
        out.flush()
    })
}

fn replace_file<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> io::Result<()>,
{
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    let mut out = BufWriter::new(File::create(&tmp)?);
    write(&mut out)?;
    out.into_inner().map_err(io::IntoInnerError::into_error)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot() -> DropSnapshot {
        DropSnapshot::new(vec![("a.test".into(), 3), ("b.test".into(), 1)])
    }

    #[test]
    fn iteration_is_restartable() {
        let snap = snapshot();
        let first: Vec<_> = snap.iter().collect();
        let second: Vec<_> = snap.iter().collect();
        assert_eq!(first, second);
        assert_eq!(first, vec![("a.test", 3), ("b.test", 1)]);
    }

    #[test]
    fn file_sink_writes_name_count_lines() {
        let dir = tempfile::tempdir().unwrap();
        let sink = FileSink::new(dir.path().join("domains.dat"));
        sink.publish(&snapshot()).unwrap();
        assert_eq!(
            fs::read_to_string(sink.path()).unwrap(),
            "a.test:3\nb.test:1\n"
        );

        sink.publish(&DropSnapshot::default()).unwrap();
        assert_eq!(fs::read_to_string(sink.path()).unwrap(), "");
    }

    #[test]
    fn stats_file_format() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.dat");
        write_stats_file(
            &path,
            GlobalStats {
                total: 42,
                blocked: 7,
            },
        )
        .unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "total:42\nblocked:7\n");
    }

    #[test]
    fn memory_sink_keeps_latest() {
        let sink = MemorySink::new();
        assert!(sink.last().is_none());
        sink.publish(&snapshot()).unwrap();
        sink.publish(&DropSnapshot::default()).unwrap();
        assert_eq!(sink.published(), 2);
        assert!(sink.last().unwrap().is_empty());
    }
}
