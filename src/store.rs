use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub const STORE_FILE_NAME: &str = "transferred_runs.txt";

/// Final outcome tag recorded next to a run key. Informational only: the
/// presence of the key is what gates reprocessing, never the tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Ok,
    VcfUploadWarning,
    VcfUploadError,
}

impl TransferOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferOutcome::Ok => "ok",
            TransferOutcome::VcfUploadWarning => "vcf_upload_warning",
            TransferOutcome::VcfUploadError => "vcf_upload_error",
        }
    }
}

impl std::fmt::Display for TransferOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of which (run, destination) pairs have been processed.
/// Append-only line file: `«run»_«destination»` optionally followed by a tab
/// and the outcome tag. Read fully at invocation start, appended to, never
/// rewritten. The daemon lock serializes writers.
#[derive(Debug)]
pub struct TransferredStore {
    path: PathBuf,
    keys: HashSet<String>,
}

impl TransferredStore {
    /// Load the record file from the work dir. A missing file is not an
    /// error: it is created empty. An unreadable file is.
    pub fn load(workdir: &Path) -> Result<Self> {
        let path = workdir.join(STORE_FILE_NAME);
        if !path.exists() {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("cannot create record file {}", path.display()))?;
            return Ok(Self { path, keys: HashSet::new() });
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("cannot read record file {}", path.display()))?;
        let keys = content
            .lines()
            .map(|line| line.split('\t').next().unwrap_or(line).trim().to_string())
            .filter(|key| !key.is_empty())
            .collect();
        Ok(Self { path, keys })
    }

    pub fn contains(&self, run_key: &str) -> bool {
        self.keys.contains(run_key)
    }

    pub fn keys(&self) -> &HashSet<String> {
        &self.keys
    }

    /// Append one record line and flush immediately. Called only after the
    /// transfer step completed with a classified ok state; failed transfers
    /// and skipped runs are never recorded so they stay eligible for retry.
    pub fn record(&mut self, run_key: &str, outcome: TransferOutcome) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("cannot open record file {}", self.path.display()))?;
        writeln!(file, "{}\t{}", run_key, outcome.as_str())?;
        file.flush()?;
        self.keys.insert(run_key.to_string());
        Ok(())
    }
}
