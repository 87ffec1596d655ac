use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::config::{Mount, Settings, TransferTarget};
use crate::mail::{Notification, Notifier};
use crate::remote::RemoteShell;
use crate::rsync::{CopyJob, CopyTool};
use crate::store::TransferredStore;
use crate::upload::{UploadRunner, combine_outcomes, upload_exomedepth_vcf, upload_gatk_vcf};
use crate::util::{append_line, append_raw, join_remote, run_header};

/// A run listed remotely whose key is not yet in the transferred set.
#[derive(Debug)]
pub struct Candidate<'a> {
    pub run: String,
    pub target: &'a TransferTarget,
}

/// Classification of one copy attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Ok,
    Error,
}

/// What to do about a run with missing required files.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingFileAction {
    /// Silent skip; the run stays a candidate for the next invocation.
    Skip,
    /// Stakeholders were notified and the lock marker must stay behind.
    Block,
}

/// The three stderr sinks of the copy primitive plus the combined log that
/// also receives stdout and the dated per-run headers.
#[derive(Debug, Clone)]
pub struct SyncLogs {
    pub combined: PathBuf,
    pub errors: PathBuf,
    pub temp: PathBuf,
}

impl SyncLogs {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            combined: settings.log_path.clone(),
            errors: settings.errorlog_path.clone(),
            temp: settings.temp_error_path.clone(),
        }
    }
}

/// Collaborators of one invocation, injected so tests can fake every
/// external effect.
pub struct SyncCtx<'a> {
    pub copy: &'a dyn CopyTool,
    pub uploader: &'a dyn UploadRunner,
    pub notifier: &'a dyn Notifier,
    pub logs: SyncLogs,
    pub marker: PathBuf,
    pub user: String,
}

/// List every run directory under each target's input path and keep the ones
/// whose `«run»_«target-name»` key is not in the transferred set. A remote
/// failure aborts the whole invocation; the caller removes the lock marker
/// because nothing here needs an operator.
pub fn list_candidates<'a>(
    remote: &dyn RemoteShell,
    targets: &'a [TransferTarget],
    transferred: &HashSet<String>,
) -> Result<BTreeMap<String, Candidate<'a>>> {
    let mut candidates = BTreeMap::new();
    for target in targets {
        let output = remote.exec(&format!("ls {}", target.input))?;
        if output.exit_status != 0 {
            tracing::warn!(
                "listing {} exited with {}: {}",
                target.input,
                output.exit_status,
                output.stderr.trim()
            );
        }
        for run in output.stdout.split_whitespace() {
            let run_key = format!("{}_{}", run, target.name);
            if transferred.contains(&run_key) {
                continue;
            }
            candidates.insert(run_key, Candidate { run: run.to_string(), target });
        }
    }
    Ok(candidates)
}

/// Check each required marker file in the remote run folder and collect the
/// ones reported absent.
pub fn missing_files(
    remote: &dyn RemoteShell,
    required: &[&str],
    run_path: &str,
) -> Result<Vec<String>> {
    let mut missing = Vec::new();
    for file in required {
        let command =
            format!("[ -f {}/{} ] && echo Present || echo Absent", run_path, file);
        let output = remote.exec(&command)?;
        if output.stdout.trim() != "Present" {
            missing.push((*file).to_string());
        }
    }
    Ok(missing)
}

/// Apply the target's missing-file policy. `Some(true)` skips silently,
/// `Some(false)` notifies and blocks, and `None` (flag absent or not a
/// boolean in the settings) is a settings error that also blocks.
pub fn decide_on_missing(
    target: &TransferTarget,
    missing: &[String],
    run: &str,
    marker: &Path,
    notifier: &dyn Notifier,
) -> MissingFileAction {
    match target.continue_without_email {
        Some(true) => MissingFileAction::Skip,
        Some(false) => {
            notify(
                notifier,
                &Notification::Incomplete {
                    run: run.to_string(),
                    missing: missing.to_vec(),
                    marker: marker.to_path_buf(),
                },
            );
            MissingFileAction::Block
        }
        None => {
            notify(
                notifier,
                &Notification::SettingsError {
                    target: target.name.clone(),
                    run: run.to_string(),
                    marker: marker.to_path_buf(),
                },
            );
            MissingFileAction::Block
        }
    }
}

/// Run the copy primitive and classify the attempt. The captured stderr goes
/// to the persistent error log, the combined log and a per-attempt temp
/// buffer; the attempt is ok only when that buffer stayed empty and the tool
/// reported success.
pub fn execute_and_classify(
    copy: &dyn CopyTool,
    job: &CopyJob,
    logs: &SyncLogs,
    run_key: &str,
) -> Result<TransferState> {
    let report = copy.copy(job)?;
    if !report.stdout.is_empty() {
        append_raw(&logs.combined, &report.stdout)?;
    }
    std::fs::write(&logs.temp, &report.stderr)?;
    if !report.stderr.is_empty() {
        append_raw(&logs.errors, &report.stderr)?;
        append_raw(&logs.combined, &report.stderr)?;
    }
    let buffer_empty =
        std::fs::metadata(&logs.temp).map(|m| m.len() == 0).unwrap_or(false);
    if buffer_empty && report.success {
        let _ = std::fs::remove_file(&logs.temp);
        append_line(&logs.combined, "\n>>> No errors detected <<<")?;
        Ok(TransferState::Ok)
    } else {
        append_line(
            &logs.combined,
            &format!(">>> {} errors detected in transfer, not added to completed runs <<<", run_key),
        )?;
        Ok(TransferState::Error)
    }
}

/// Process every eligible run of one mount, in key order. Returns whether
/// any run requires the lock marker to stay behind.
pub fn process_mount(
    ctx: &SyncCtx,
    remote: &dyn RemoteShell,
    mount: &Mount,
    store: &mut TransferredStore,
) -> Result<bool> {
    let candidates = list_candidates(remote, &mount.transfers, store.keys())?;
    tracing::info!(
        "{} candidate run(s) for mount {}",
        candidates.len(),
        mount.mount_path.display()
    );

    let mut block_lock = false;
    for (run_key, candidate) in &candidates {
        let target = candidate.target;
        let run = &candidate.run;
        let run_path = join_remote(&target.input, run);

        let required: Vec<&str> = target.required_files().collect();
        let missing = missing_files(remote, &required, &run_path)?;
        if !missing.is_empty() {
            match decide_on_missing(target, &missing, run, &ctx.marker, ctx.notifier) {
                MissingFileAction::Skip => {
                    tracing::info!("skipping {}: missing {}", run_key, missing.join(", "));
                }
                MissingFileAction::Block => {
                    tracing::warn!(
                        "run {} incomplete (missing {}); operator action required",
                        run_key,
                        missing.join(", ")
                    );
                    block_lock = true;
                }
            }
            continue;
        }

        append_line(&ctx.logs.combined, &run_header(run))?;
        let dest_dir = mount.mount_path.join(&target.output);
        let job = CopyJob {
            source: format!("{}@{}:{}", ctx.user, remote.host(), run_path),
            dest: format!("{}/", dest_dir.display().to_string().trim_end_matches('/')),
            include: target.include.clone(),
            exclude: target.exclude.clone(),
        };
        tracing::info!("transferring {} -> {}", job.source, job.dest);

        if execute_and_classify(ctx.copy, &job, &ctx.logs, run_key)? == TransferState::Error {
            tracing::warn!("transfer of {} failed; eligible for retry next invocation", run_key);
            notify(
                ctx.notifier,
                &Notification::TransferFailed { run: run.clone(), target: target.name.clone() },
            );
            continue;
        }

        // the transfer itself succeeded and must never be repeated, whatever
        // the uploads report below
        let local_run_folder = dest_dir.join(run);
        let mut states = Vec::new();
        let mut gatk_result = Vec::new();
        let mut exomedepth_result = Vec::new();
        if target.upload_gatk_vcf {
            let (state, lines) = upload_gatk_vcf(ctx.uploader, run, &local_run_folder);
            states.push(state);
            gatk_result = lines;
        }
        if target.upload_exomedepth_vcf {
            let (state, lines) = upload_exomedepth_vcf(ctx.uploader, run, &local_run_folder);
            states.push(state);
            exomedepth_result = lines;
        }
        let outcome = combine_outcomes(&states);
        store.record(run_key, outcome)?;
        notify(
            ctx.notifier,
            &Notification::TransferState {
                outcome,
                run_path: run_path.clone(),
                gatk_result,
                exomedepth_result,
            },
        );
    }
    Ok(block_lock)
}

/// Mail delivery problems are logged, never fatal: the outcome is already
/// durable by the time stakeholders are told about it.
pub fn notify(notifier: &dyn Notifier, notification: &Notification) {
    if let Err(e) = notifier.notify(notification) {
        tracing::warn!("failed to send '{}' notification: {:#}", notification.kind(), e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::ExecOutput;
    use crate::rsync::CopyReport;
    use crate::util::test_dir;
    use std::cell::RefCell;
    use std::collections::HashMap;

    struct FakeRemote {
        responses: HashMap<String, String>,
    }

    impl FakeRemote {
        fn new(responses: &[(&str, &str)]) -> Self {
            Self {
                responses: responses
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            }
        }
    }

    impl RemoteShell for FakeRemote {
        fn host(&self) -> &str {
            "hpct04"
        }

        fn exec(&self, command: &str) -> Result<ExecOutput> {
            match self.responses.get(command) {
                Some(stdout) => Ok(ExecOutput {
                    stdout: stdout.clone(),
                    stderr: String::new(),
                    exit_status: 0,
                }),
                None => anyhow::bail!("unexpected command: {}", command),
            }
        }
    }

    struct FakeCopy {
        stderr: &'static str,
        success: bool,
    }

    impl CopyTool for FakeCopy {
        fn copy(&self, _job: &CopyJob) -> Result<CopyReport> {
            Ok(CopyReport {
                success: self.success,
                stdout: "sent 1 file\n".into(),
                stderr: self.stderr.into(),
            })
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: RefCell<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify(&self, notification: &Notification) -> Result<()> {
            self.sent.borrow_mut().push(notification.kind().to_string());
            Ok(())
        }
    }

    fn target(name: &str, flag: Option<bool>) -> TransferTarget {
        TransferTarget {
            name: name.to_string(),
            input: format!("/hpc/upload/{}/", name),
            output: format!("Illumina/{}/", name),
            files_required: vec!["workflow.done".to_string()],
            continue_without_email: flag,
            upload_gatk_vcf: false,
            upload_exomedepth_vcf: false,
            include: vec![],
            exclude: vec![],
        }
    }

    fn logs_in(dir: &Path) -> SyncLogs {
        SyncLogs {
            combined: dir.join("Rsync_Dx.log"),
            errors: dir.join("Rsync_Dx.errorlog"),
            temp: dir.join("temp.error"),
        }
    }

    #[test]
    fn list_candidates_skips_transferred_keys() {
        let remote = FakeRemote::new(&[("ls /hpc/upload/Exomes/", "runA\nrunB\n")]);
        let targets = vec![target("Exomes", Some(false))];
        let transferred: HashSet<String> = ["runA_Exomes".to_string()].into();
        let candidates = list_candidates(&remote, &targets, &transferred).unwrap();
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates["runB_Exomes"].run, "runB");
    }

    #[test]
    fn list_candidates_aborts_on_remote_failure() {
        let remote = FakeRemote::new(&[]);
        let targets = vec![target("Exomes", Some(false))];
        assert!(list_candidates(&remote, &targets, &HashSet::new()).is_err());
    }

    #[test]
    fn missing_files_collects_absent_markers() {
        let remote = FakeRemote::new(&[
            ("[ -f /run/workflow.done ] && echo Present || echo Absent", "Absent\n"),
            ("[ -f /run/md5sum.txt ] && echo Present || echo Absent", "Present\n"),
        ]);
        let missing =
            missing_files(&remote, &["workflow.done", "md5sum.txt"], "/run").unwrap();
        assert_eq!(missing, vec!["workflow.done".to_string()]);
    }

    #[test]
    fn decide_on_missing_silent_policy_skips_without_mail() {
        let notifier = RecordingNotifier::default();
        let action = decide_on_missing(
            &target("Exomes", Some(true)),
            &["workflow.done".to_string()],
            "runB",
            Path::new("/w/transfer.running"),
            &notifier,
        );
        assert_eq!(action, MissingFileAction::Skip);
        assert!(notifier.sent.borrow().is_empty());
    }

    #[test]
    fn decide_on_missing_notify_policy_blocks_once() {
        let notifier = RecordingNotifier::default();
        let action = decide_on_missing(
            &target("Exomes", Some(false)),
            &["workflow.done".to_string()],
            "runB",
            Path::new("/w/transfer.running"),
            &notifier,
        );
        assert_eq!(action, MissingFileAction::Block);
        assert_eq!(*notifier.sent.borrow(), vec!["incomplete".to_string()]);
    }

    #[test]
    fn decide_on_missing_bad_flag_is_a_settings_error() {
        let notifier = RecordingNotifier::default();
        let action = decide_on_missing(
            &target("Exomes", None),
            &["workflow.done".to_string()],
            "runB",
            Path::new("/w/transfer.running"),
            &notifier,
        );
        assert_eq!(action, MissingFileAction::Block);
        assert_eq!(*notifier.sent.borrow(), vec!["settings_error".to_string()]);
    }

    #[test]
    fn classify_ok_clears_temp_buffer_and_marks_log() {
        let dir = test_dir("classify_ok");
        let logs = logs_in(&dir);
        let copy = FakeCopy { stderr: "", success: true };
        let job = CopyJob {
            source: "u@h:/in/run".into(),
            dest: "/out/".into(),
            include: vec![],
            exclude: vec![],
        };
        let state = execute_and_classify(&copy, &job, &logs, "run_Exomes").unwrap();
        assert_eq!(state, TransferState::Ok);
        assert!(!logs.temp.exists());
        let combined = std::fs::read_to_string(&logs.combined).unwrap();
        assert!(combined.contains("No errors detected"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn classify_error_keeps_buffer_and_names_run() {
        let dir = test_dir("classify_err");
        let logs = logs_in(&dir);
        let copy = FakeCopy { stderr: "rsync: connection unexpectedly closed\n", success: false };
        let job = CopyJob {
            source: "u@h:/in/run".into(),
            dest: "/out/".into(),
            include: vec![],
            exclude: vec![],
        };
        let state = execute_and_classify(&copy, &job, &logs, "run_Exomes").unwrap();
        assert_eq!(state, TransferState::Error);
        assert!(logs.temp.exists());
        let combined = std::fs::read_to_string(&logs.combined).unwrap();
        assert!(combined.contains("run_Exomes errors detected"));
        let errors = std::fs::read_to_string(&logs.errors).unwrap();
        assert!(errors.contains("connection unexpectedly closed"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn classify_error_when_tool_fails_with_quiet_stderr() {
        let dir = test_dir("classify_quiet");
        let logs = logs_in(&dir);
        let copy = FakeCopy { stderr: "", success: false };
        let job = CopyJob {
            source: "u@h:/in/run".into(),
            dest: "/out/".into(),
            include: vec![],
            exclude: vec![],
        };
        let state = execute_and_classify(&copy, &job, &logs, "run_Exomes").unwrap();
        assert_eq!(state, TransferState::Error);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
