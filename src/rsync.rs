use std::process::Command;

use anyhow::{Context, Result};

/// One directory copy: remote source spec, local destination directory and
/// the optional filter patterns carried by the transfer target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyJob {
    pub source: String,
    pub dest: String,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

/// What the copy primitive reported back: its own verdict plus the captured
/// streams. Classification happens in the sync layer, which also owns the
/// log sinks.
#[derive(Debug, Clone)]
pub struct CopyReport {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// The external transfer primitive behind a seam so the orchestration logic
/// can be exercised without a network or an rsync binary.
pub trait CopyTool {
    fn copy(&self, job: &CopyJob) -> Result<CopyReport>;
}

/// Real rsync invocation. Arguments are passed as a discrete vector, never a
/// shell string, so filenames with spaces or metacharacters cannot change the
/// command.
pub struct RsyncTool;

impl RsyncTool {
    pub fn args(job: &CopyJob) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "--recursive".into(),
            "--archive".into(),
            "--human-readable".into(),
            "--update".into(),
            "--copy-links".into(),
            "--stats".into(),
        ];
        for pattern in &job.include {
            args.push("--include".into());
            args.push(pattern.clone());
        }
        for pattern in &job.exclude {
            args.push("--exclude".into());
            args.push(pattern.clone());
        }
        args.push(job.source.clone());
        args.push(job.dest.clone());
        args
    }
}

impl CopyTool for RsyncTool {
    fn copy(&self, job: &CopyJob) -> Result<CopyReport> {
        let output = Command::new("rsync")
            .args(Self::args(job))
            .output()
            .with_context(|| format!("cannot execute rsync for {}", job.source))?;
        Ok(CopyReport {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
