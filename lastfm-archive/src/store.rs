use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crate::model::Scrobble;

/// Calendar day (UTC) a timestamp falls on; names the archive file.
pub fn day_of(timestamp: i64) -> NaiveDate {
    DateTime::from_timestamp(timestamp, 0)
        .map(|dt| dt.date_naive())
        .unwrap_or_default()
}

/// Directory of per-day archives, one `YYYY-MM-DD.json` array per day.
pub struct Store {
    dir: PathBuf,
}

/// What an existing day file turned out to contain. The file's state is
/// detected by parsing it, never by searching for the closing bracket.
enum Probe {
    Absent,
    /// A complete JSON array from an earlier, finished session.
    Finalized(Vec<Scrobble>),
    /// Leftover from an interrupted session; raw content kept for appending.
    Unterminated(String),
}

impl Store {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create archive directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Opens the archive for `date`, ready for appends.
    ///
    /// A fresh file starts empty and gets its `[` with the first record. A
    /// previously finalized file is parsed to recover the high-water mark,
    /// then rewritten without its closing bracket so appends can continue
    /// the array. A file that fails to parse is an interrupted leftover:
    /// it is opened for raw appending with no high-water mark, so duplicate
    /// detection is unavailable until the next successful finalize.
    pub fn open_or_resume(&self, date: NaiveDate) -> Result<DayFile> {
        let path = self.dir.join(format!("{date}.json"));

        match probe(&path)? {
            Probe::Absent => {
                let file = OpenOptions::new()
                    .write(true)
                    .create(true)
                    .truncate(true)
                    .open(&path)
                    .with_context(|| format!("Failed to create day file {}", path.display()))?;
                Ok(DayFile {
                    date,
                    path,
                    file,
                    high_water: None,
                    prefix: Prefix::Open,
                    degraded: false,
                })
            }
            Probe::Finalized(records) => {
                let high_water = records.iter().map(|r| r.timestamp).max();

                let mut body = String::from("[");
                for (i, record) in records.iter().enumerate() {
                    if i > 0 {
                        body.push(',');
                    }
                    body.push_str(&serde_json::to_string(record)?);
                }

                let mut file = OpenOptions::new()
                    .write(true)
                    .truncate(true)
                    .open(&path)
                    .with_context(|| format!("Failed to reopen day file {}", path.display()))?;
                file.write_all(body.as_bytes())
                    .with_context(|| format!("Failed to rewrite day file {}", path.display()))?;

                let prefix = if records.is_empty() {
                    Prefix::Bare
                } else {
                    Prefix::Comma
                };
                Ok(DayFile {
                    date,
                    path,
                    file,
                    high_water,
                    prefix,
                    degraded: false,
                })
            }
            Probe::Unterminated(content) => {
                tracing::warn!(
                    path = %path.display(),
                    "day file was left unterminated; appending without duplicate detection"
                );
                let file = OpenOptions::new()
                    .append(true)
                    .open(&path)
                    .with_context(|| format!("Failed to reopen day file {}", path.display()))?;

                let trimmed = content.trim();
                let prefix = if trimmed.is_empty() {
                    Prefix::Open
                } else if trimmed == "[" {
                    Prefix::Bare
                } else {
                    Prefix::Comma
                };
                Ok(DayFile {
                    date,
                    path,
                    file,
                    high_water: None,
                    prefix,
                    degraded: true,
                })
            }
        }
    }
}

fn probe(path: &Path) -> Result<Probe> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Probe::Absent),
        Err(err) => {
            return Err(err)
                .with_context(|| format!("Failed to read day file {}", path.display()));
        }
    };

    match serde_json::from_str(&content) {
        Ok(records) => Ok(Probe::Finalized(records)),
        Err(_) => Ok(Probe::Unterminated(content)),
    }
}

/// What to write before the next element.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Prefix {
    /// First element of a brand-new file: opens the array.
    Open,
    /// The `[` is already on disk with nothing after it.
    Bare,
    Comma,
}

impl Prefix {
    fn as_str(self) -> &'static str {
        match self {
            Prefix::Open => "[",
            Prefix::Bare => "",
            Prefix::Comma => ",",
        }
    }
}

/// An open day archive. Owning a `DayFile` means the underlying array is
/// unterminated on disk; `finalize` consumes the handle, so at most one
/// archive can be mid-write per owner.
pub struct DayFile {
    date: NaiveDate,
    path: PathBuf,
    file: File,
    high_water: Option<i64>,
    prefix: Prefix,
    degraded: bool,
}

impl DayFile {
    pub fn date(&self) -> NaiveDate {
        self.date
    }

    /// Highest timestamp already stored when this file was resumed, if the
    /// previous session finalized cleanly.
    pub fn high_water(&self) -> Option<i64> {
        self.high_water
    }

    /// True when `timestamp` is already covered by a previous session.
    /// Always false in degraded mode; duplicates cannot be detected there.
    pub fn is_duplicate(&self, timestamp: i64) -> bool {
        self.high_water.is_some_and(|mark| timestamp <= mark)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Appends one record to the unterminated array. The caller is
    /// responsible for duplicate checks via `is_duplicate`.
    pub fn append(&mut self, record: &Scrobble) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.file
            .write_all(self.prefix.as_str().as_bytes())
            .and_then(|()| self.file.write_all(json.as_bytes()))
            .with_context(|| format!("Failed to append to day file {}", self.path.display()))?;
        self.prefix = Prefix::Comma;
        Ok(())
    }

    /// Closes the array, then rewrites the file as a complete JSON array
    /// sorted ascending by timestamp. Records arrive newest first from the
    /// API, so the sort is what establishes the stored order. The rewrite
    /// goes through a temp file in the same directory and a rename.
    ///
    /// If the content still does not parse after closing (possible after a
    /// degraded-mode session appended to a half-written record), the file
    /// is left as appended; the next clean finalize will sort it.
    pub fn finalize(mut self) -> Result<()> {
        self.file
            .write_all(b"]")
            .and_then(|()| self.file.flush())
            .with_context(|| format!("Failed to close day file {}", self.path.display()))?;

        let DayFile { path, file, .. } = self;
        drop(file);

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read back day file {}", path.display()))?;
        let mut records: Vec<Scrobble> = match serde_json::from_str(&content) {
            Ok(records) => records,
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    %err,
                    "day file still malformed after closing; leaving it unsorted"
                );
                return Ok(());
            }
        };
        records.sort_by_key(|r| r.timestamp);

        let dir = path
            .parent()
            .with_context(|| format!("Day file {} has no parent directory", path.display()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .context("Failed to create temp file for rewrite")?;
        tmp.write_all(serde_json::to_string(&records)?.as_bytes())
            .context("Failed to write sorted day file")?;
        tmp.persist(&path)
            .with_context(|| format!("Failed to replace day file {}", path.display()))?;

        Ok(())
    }
}
