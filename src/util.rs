use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;

/// Append one line to a log file, creating it on first use. Flushes on every
/// write so a crash mid-run cannot corrupt prior entries.
pub fn append_line(path: &Path, text: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open log file {}", path.display()))?;
    writeln!(file, "{}", text)?;
    file.flush()?;
    Ok(())
}

/// Append raw captured output (already newline-terminated or not) verbatim.
pub fn append_raw(path: &Path, text: &str) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("cannot open log file {}", path.display()))?;
    file.write_all(text.as_bytes())?;
    file.flush()?;
    Ok(())
}

pub fn timestamp() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Dated block written to the combined log before each transfer attempt.
pub fn run_header(run: &str) -> String {
    format!("\n#########\nDate: {}\nRun_folder: {}", timestamp(), run)
}

/// Join a remote directory and an entry name with exactly one separator.
pub fn join_remote(dir: &str, entry: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), entry)
}

#[cfg(test)]
pub fn test_dir(tag: &str) -> std::path::PathBuf {
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::{SystemTime, UNIX_EPOCH};
    static COUNTER: AtomicU64 = AtomicU64::new(1);
    let now_ns = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "dxsync_test_{}_{}_{}_{}",
        tag,
        now_ns,
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::create_dir_all(&dir).expect("failed to create test dir");
    dir
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_remote_inserts_single_separator() {
        assert_eq!(join_remote("/hpc/upload/Exomes/", "run1"), "/hpc/upload/Exomes/run1");
        assert_eq!(join_remote("/hpc/upload/Exomes", "run1"), "/hpc/upload/Exomes/run1");
    }

    #[test]
    fn append_line_accumulates() {
        let dir = test_dir("append");
        let path = dir.join("log.txt");
        append_line(&path, "first").unwrap();
        append_line(&path, "second").unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, "first\nsecond\n");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
