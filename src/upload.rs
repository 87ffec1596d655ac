use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::store::TransferOutcome;

pub const GATK_VCF_TYPE: &str = "VCF_FILE";
pub const EXOMEDEPTH_VCF_TYPE: &str = "UMCU CNV VCF v1";

const GATK_VCF_SUBDIR: &str = "single_sample_vcf";
const EXOMEDEPTH_VCF_SUBDIR: &str = "exomedepth/HC";
const EXOMEDEPTH_SUMMARY_SUBDIR: &str = "QC/CNV";

/// Aggregated verdict of one upload pass over a run folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Ok,
    Warning,
    Error,
}

/// The external upload tool behind a seam: one invocation per VCF file,
/// returning the tool's output lines.
pub trait UploadRunner {
    fn upload(&self, vcf: &Path, vcf_type: &str, run: &str) -> Result<Vec<String>>;
}

/// Real invocation of the upload tool with (file, type tag, run id) as
/// discrete arguments.
pub struct VcfUploadTool {
    pub tool: PathBuf,
}

impl UploadRunner for VcfUploadTool {
    fn upload(&self, vcf: &Path, vcf_type: &str, run: &str) -> Result<Vec<String>> {
        let output = Command::new(&self.tool)
            .arg(vcf)
            .arg(vcf_type)
            .arg(run)
            .output()
            .with_context(|| format!("cannot execute upload tool {}", self.tool.display()))?;
        let mut lines: Vec<String> =
            String::from_utf8_lossy(&output.stdout).lines().map(|l| l.to_string()).collect();
        if !output.status.success() {
            lines.push(format!(
                "ERROR: upload tool exited with {} for {}: {}",
                output.status.code().unwrap_or(-1),
                vcf.display(),
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(lines)
    }
}

/// Sequencer run id without any trailing project/index suffix: the first
/// four underscore-delimited segments.
pub fn normalize_run_id(run: &str) -> String {
    run.split('_').take(4).collect::<Vec<_>>().join("_")
}

/// Scan aggregated tool output case-insensitively. Any "error" wins over any
/// "warning" regardless of position; otherwise the pass is clean.
pub fn get_upload_state(lines: &[String]) -> UploadState {
    let mut saw_warning = false;
    for line in lines {
        let lower = line.to_lowercase();
        if lower.contains("error") {
            return UploadState::Error;
        }
        if lower.contains("warning") {
            saw_warning = true;
        }
    }
    if saw_warning { UploadState::Warning } else { UploadState::Ok }
}

/// Fold the states of the uploaders that actually ran into the recorded
/// outcome tag: error dominates, then warning, then plain ok.
pub fn combine_outcomes(states: &[UploadState]) -> TransferOutcome {
    if states.contains(&UploadState::Error) {
        TransferOutcome::VcfUploadError
    } else if states.contains(&UploadState::Warning) {
        TransferOutcome::VcfUploadWarning
    } else {
        TransferOutcome::Ok
    }
}

fn vcf_files(dir: &Path) -> Vec<PathBuf> {
    if !dir.is_dir() {
        return Vec::new();
    }
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "vcf"))
        .collect()
}

fn run_one(runner: &dyn UploadRunner, vcf: &Path, vcf_type: &str, run: &str) -> Vec<String> {
    match runner.upload(vcf, vcf_type, run) {
        Ok(lines) => lines,
        Err(e) => vec![format!("ERROR: upload of {} failed: {e:#}", vcf.display())],
    }
}

/// Upload every GATK single-sample VCF found in the transferred run folder.
/// Problems never abort the pass; they surface as error lines in the result.
pub fn upload_gatk_vcf(
    runner: &dyn UploadRunner,
    run: &str,
    run_folder: &Path,
) -> (UploadState, Vec<String>) {
    let normalized = normalize_run_id(run);
    let mut result = Vec::new();
    for vcf in vcf_files(&run_folder.join(GATK_VCF_SUBDIR)) {
        result.extend(run_one(runner, &vcf, GATK_VCF_TYPE, &normalized));
    }
    (get_upload_state(&result), result)
}

/// Upload the ExomeDepth VCFs listed in the per-run summary file. Each
/// non-comment line describes one sample (sample id up to the first `;`).
/// Samples flagged with a WARNING are reported as not uploaded and the tool
/// is not invoked for them; every other sample is matched to the first VCF
/// whose filename contains the sample id.
pub fn upload_exomedepth_vcf(
    runner: &dyn UploadRunner,
    run: &str,
    run_folder: &Path,
) -> (UploadState, Vec<String>) {
    let normalized = normalize_run_id(run);
    let folder_name = run_folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| run.to_string());
    let summary_path = run_folder
        .join(EXOMEDEPTH_SUMMARY_SUBDIR)
        .join(format!("{}_exomedepth_summary.txt", folder_name));

    let summary = match std::fs::read_to_string(&summary_path) {
        Ok(content) => content,
        Err(e) => {
            let line =
                format!("ERROR: cannot read exomedepth summary {}: {}", summary_path.display(), e);
            return (UploadState::Error, vec![line]);
        }
    };

    let vcfs = vcf_files(&run_folder.join(EXOMEDEPTH_VCF_SUBDIR));
    let mut result = Vec::new();
    for line in summary.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let sample = line.split(';').next().unwrap_or(line).trim();
        if let Some(pos) = line.find("WARNING") {
            result.push(format!("{} not uploaded: {}", sample, &line[pos..]));
            continue;
        }
        // first filename match wins when several VCFs carry the sample id
        let matched = vcfs
            .iter()
            .find(|vcf| vcf.file_name().is_some_and(|n| n.to_string_lossy().contains(sample)));
        match matched {
            Some(vcf) => {
                result.extend(run_one(runner, vcf, EXOMEDEPTH_VCF_TYPE, &normalized));
            }
            None => result.push(format!("ERROR: no VCF file found for sample {}", sample)),
        }
    }
    (get_upload_state(&result), result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normalize_keeps_first_four_segments() {
        assert_eq!(
            normalize_run_id("230920_A01131_0356_AHKM7VDRX3_1"),
            "230920_A01131_0356_AHKM7VDRX3"
        );
        assert_eq!(
            normalize_run_id("230920_A01131_0356_AHKM7VDRX3"),
            "230920_A01131_0356_AHKM7VDRX3"
        );
        assert_eq!(normalize_run_id("short_run"), "short_run");
    }

    #[test]
    fn upload_state_error_wins_over_warning() {
        assert_eq!(get_upload_state(&lines(&["x error y"])), UploadState::Error);
        assert_eq!(get_upload_state(&lines(&["all good", "minor warning"])), UploadState::Warning);
        assert_eq!(get_upload_state(&lines(&["ok", "done"])), UploadState::Ok);
        assert_eq!(
            get_upload_state(&lines(&["some warning here", "then an ERROR"])),
            UploadState::Error
        );
        assert_eq!(get_upload_state(&lines(&["vcf_upload_error"])), UploadState::Error);
        assert_eq!(get_upload_state(&lines(&["Warning"])), UploadState::Warning);
        assert_eq!(get_upload_state(&[]), UploadState::Ok);
    }

    #[test]
    fn combine_outcomes_follows_precedence() {
        use UploadState::*;
        assert_eq!(combine_outcomes(&[Ok, Error]), TransferOutcome::VcfUploadError);
        assert_eq!(combine_outcomes(&[Warning, Error]), TransferOutcome::VcfUploadError);
        assert_eq!(combine_outcomes(&[Ok, Warning]), TransferOutcome::VcfUploadWarning);
        assert_eq!(combine_outcomes(&[Ok, Ok]), TransferOutcome::Ok);
        assert_eq!(combine_outcomes(&[]), TransferOutcome::Ok);
    }
}
