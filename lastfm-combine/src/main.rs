use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};

use lastfm_archive::model::Scrobble;

#[derive(Parser, Debug)]
#[command(name = "lastfm-combine")]
#[command(
    about = "Merge per-day scrobble archives into one JSON file per user",
    long_about = None
)]
struct Args {
    /// Directory containing the per-day archives
    #[arg(short, long, default_value = "backup")]
    backup: PathBuf,

    /// Username; the combined file is written as <user>.json
    #[arg(short, long, default_value = "user")]
    user: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let (path, count) = combine(&args.backup, &args.user)?;
    println!("Wrote {} scrobbles to {}", count, path.display());

    Ok(())
}

/// Concatenates every day archive in `dir`, in file-name order (which is
/// chronological for `YYYY-MM-DD` names), into `<user>.json` in the same
/// directory. Files that fail to parse are skipped; a previously combined
/// output file is never re-ingested.
fn combine(dir: &Path, user: &str) -> Result<(PathBuf, usize)> {
    let output_name = format!("{user}.json");

    let mut paths = Vec::new();
    let entries = fs::read_dir(dir)
        .with_context(|| format!("Failed to read archive directory {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        let is_json = path.extension().and_then(|ext| ext.to_str()) == Some("json");
        let is_output =
            path.file_name().and_then(|name| name.to_str()) == Some(output_name.as_str());
        if path.is_file() && is_json && !is_output {
            paths.push(path);
        }
    }
    paths.sort();

    let mut combined: Vec<Scrobble> = Vec::new();
    for path in &paths {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        match serde_json::from_str::<Vec<Scrobble>>(&content) {
            Ok(records) => combined.extend(records),
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "skipping malformed day file");
            }
        }
    }

    let output_path = dir.join(output_name);
    let count = combined.len();
    fs::write(&output_path, serde_json::to_string(&combined)?)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    Ok((output_path, count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scrobble(timestamp: i64) -> Scrobble {
        Scrobble {
            timestamp,
            album: String::from("album"),
            artist: String::from("artist"),
            title: format!("track-{timestamp}"),
            cover: String::new(),
        }
    }

    fn write_day(dir: &Path, name: &str, records: &[Scrobble]) {
        fs::write(dir.join(name), serde_json::to_string(records).unwrap()).unwrap();
    }

    #[test]
    fn combines_in_filename_order() {
        let tmp = tempfile::tempdir().unwrap();
        write_day(tmp.path(), "2019-06-01.json", &[scrobble(300)]);
        write_day(tmp.path(), "2019-05-30.json", &[scrobble(100), scrobble(150)]);
        write_day(tmp.path(), "2019-05-31.json", &[scrobble(200)]);

        let (path, count) = combine(tmp.path(), "someone").unwrap();
        assert_eq!(count, 4);

        let records: Vec<Scrobble> =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        let stamps: Vec<i64> = records.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![100, 150, 200, 300]);
    }

    #[test]
    fn skips_malformed_files() {
        let tmp = tempfile::tempdir().unwrap();
        write_day(tmp.path(), "2019-05-30.json", &[scrobble(100)]);
        fs::write(tmp.path().join("2019-05-31.json"), "[{\"timestamp\":").unwrap();

        let (_, count) = combine(tmp.path(), "someone").unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn rerun_does_not_ingest_its_own_output() {
        let tmp = tempfile::tempdir().unwrap();
        write_day(tmp.path(), "2019-05-30.json", &[scrobble(100)]);

        let (_, first) = combine(tmp.path(), "someone").unwrap();
        let (_, second) = combine(tmp.path(), "someone").unwrap();
        assert_eq!(first, 1);
        assert_eq!(second, 1);
    }

    #[test]
    fn empty_directory_yields_empty_array() {
        let tmp = tempfile::tempdir().unwrap();

        let (path, count) = combine(tmp.path(), "someone").unwrap();
        assert_eq!(count, 0);
        assert_eq!(fs::read_to_string(path).unwrap(), "[]");
    }
}
