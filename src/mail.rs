use std::path::PathBuf;

use anyhow::{Context, Result};
use lettre::message::header::ContentType;
use lettre::{Message, SmtpTransport, Transport};

use crate::config::MailSettings;
use crate::store::TransferOutcome;

/// Everything stakeholders get mailed about, as a closed set. Each variant
/// carries exactly the payload its message needs; rendering lives here so the
/// rest of the daemon only ever constructs a value and hands it over.
#[derive(Debug, Clone)]
pub enum Notification {
    /// Transfer completed; the outcome tag reflects any VCF upload problems.
    TransferState {
        outcome: TransferOutcome,
        run_path: String,
        gatk_result: Vec<String>,
        exomedepth_result: Vec<String>,
    },
    /// The copy primitive failed; the run stays eligible for retry.
    TransferFailed { run: String, target: String },
    /// Required marker files are missing and the target's policy says stop.
    Incomplete { run: String, missing: Vec<String>, marker: PathBuf },
    /// The target's missing-file policy flag is absent or not a boolean.
    SettingsError { target: String, run: String, marker: PathBuf },
    LostMount { mount: String, path: PathBuf, marker: PathBuf },
    LostHpc { hosts: Vec<String>, marker: PathBuf },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::TransferState { outcome, .. } => outcome.as_str(),
            Notification::TransferFailed { .. } => "error",
            Notification::Incomplete { .. } => "incomplete",
            Notification::SettingsError { .. } => "settings_error",
            Notification::LostMount { .. } => "lost_mount",
            Notification::LostHpc { .. } => "lost_hpc",
        }
    }

    pub fn subject(&self) -> String {
        match self {
            Notification::TransferState { outcome: TransferOutcome::Ok, run_path, .. } => {
                format!("COMPLETED: transfer to long-term storage finished for {}", run_path)
            }
            Notification::TransferState {
                outcome: TransferOutcome::VcfUploadWarning,
                run_path,
                ..
            } => format!("WARNING: transfer finished for {}, VCF upload reported warnings", run_path),
            Notification::TransferState {
                outcome: TransferOutcome::VcfUploadError, run_path, ..
            } => format!("ERROR: transfer finished for {}, VCF upload failed", run_path),
            Notification::TransferFailed { run, target } => {
                format!("ERROR: transfer to long-term storage failed for {} ({})", run, target)
            }
            Notification::Incomplete { run, .. } => {
                format!("Analysis not complete for run {}", run)
            }
            Notification::SettingsError { run, .. } => {
                format!("Unknown status for run {}: check transfer settings", run)
            }
            Notification::LostMount { mount, .. } => {
                format!("ERROR: mount '{}' is lost", mount)
            }
            Notification::LostHpc { .. } => {
                "ERROR: connection to HPC transfer nodes is lost".to_string()
            }
        }
    }

    pub fn body_html(&self) -> String {
        match self {
            Notification::TransferState { outcome, run_path, gatk_result, exomedepth_result } => {
                let mut body = format!(
                    "<p>Transfer to long-term storage finished for {} with state '{}'.</p>",
                    run_path, outcome
                );
                if !gatk_result.is_empty() {
                    body.push_str(&format!(
                        "<p>GATK VCF upload:<br>{}</p>",
                        gatk_result.join("<br>")
                    ));
                }
                if !exomedepth_result.is_empty() {
                    body.push_str(&format!(
                        "<p>ExomeDepth VCF upload:<br>{}</p>",
                        exomedepth_result.join("<br>")
                    ));
                }
                body
            }
            Notification::TransferFailed { run, target } => format!(
                "<p>Transfer of run {} ({}) failed; check the error log. \
                 The run will be retried on the next scheduled invocation.</p>",
                run, target
            ),
            Notification::Incomplete { run, missing, marker } => format!(
                "<p>Data not transferred for run {}: missing required file(s) {}.</p>{}",
                run,
                missing.join(", "),
                remove_marker_note(marker)
            ),
            Notification::SettingsError { target, run, marker } => format!(
                "<p>Transfer target '{}' has an unusable continue_without_email setting; \
                 run {} was not transferred. Fix the settings file.</p>{}",
                target,
                run,
                remove_marker_note(marker)
            ),
            Notification::LostMount { mount, path, marker } => format!(
                "<p>Mount '{}' at {} is lost; transfers are halted until it is restored.</p>{}",
                mount,
                path.display(),
                remove_marker_note(marker)
            ),
            Notification::LostHpc { hosts, marker } => format!(
                "<p>None of the transfer nodes ({}) could be reached.</p>{}",
                hosts.join(", "),
                remove_marker_note(marker)
            ),
        }
    }
}

/// Every marker-keeping message tells the operator exactly what to remove
/// once the underlying issue is fixed.
fn remove_marker_note(marker: &std::path::Path) -> String {
    format!(
        "<p>After fixing the issue, remove the lock marker {} to resume scheduled transfers.</p>",
        marker.display()
    )
}

pub trait Notifier {
    fn notify(&self, notification: &Notification) -> Result<()>;
}

/// Plain SMTP relay delivery, HTML body, no authentication — the relay is an
/// internal host.
pub struct SmtpNotifier {
    settings: MailSettings,
}

impl SmtpNotifier {
    pub fn new(settings: MailSettings) -> Self {
        Self { settings }
    }
}

impl Notifier for SmtpNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        let mut builder = Message::builder()
            .from(self.settings.from.parse().context("invalid sender address")?)
            .subject(notification.subject())
            .header(ContentType::TEXT_HTML);
        for to in &self.settings.to {
            builder =
                builder.to(to.parse().with_context(|| format!("invalid recipient {}", to))?);
        }
        let email = builder.body(notification.body_html())?;
        let mailer = SmtpTransport::builder_dangerous(self.settings.smtp_host.as_str())
            .port(self.settings.smtp_port)
            .build();
        mailer
            .send(&email)
            .with_context(|| format!("cannot send '{}' mail", notification.kind()))?;
        tracing::info!("sent '{}' notification: {}", notification.kind(), notification.subject());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_cover_the_notifier_contract() {
        let marker = PathBuf::from("/work/transfer.running");
        let cases: Vec<(Notification, &str)> = vec![
            (
                Notification::TransferState {
                    outcome: TransferOutcome::Ok,
                    run_path: "/hpc/upload/Exomes/run1".into(),
                    gatk_result: vec![],
                    exomedepth_result: vec![],
                },
                "ok",
            ),
            (
                Notification::TransferState {
                    outcome: TransferOutcome::VcfUploadError,
                    run_path: "p".into(),
                    gatk_result: vec![],
                    exomedepth_result: vec![],
                },
                "vcf_upload_error",
            ),
            (
                Notification::TransferFailed { run: "run1".into(), target: "Exomes".into() },
                "error",
            ),
            (
                Notification::Incomplete {
                    run: "run1".into(),
                    missing: vec!["workflow.done".into()],
                    marker: marker.clone(),
                },
                "incomplete",
            ),
            (
                Notification::SettingsError {
                    target: "Exomes".into(),
                    run: "run1".into(),
                    marker: marker.clone(),
                },
                "settings_error",
            ),
            (
                Notification::LostMount {
                    mount: "bgarray".into(),
                    path: "/mnt/bgarray".into(),
                    marker: marker.clone(),
                },
                "lost_mount",
            ),
            (
                Notification::LostHpc { hosts: vec!["hpct04".into()], marker: marker.clone() },
                "lost_hpc",
            ),
        ];
        for (notification, kind) in &cases {
            assert_eq!(&notification.kind(), kind);
        }
    }

    #[test]
    fn blocking_messages_reference_the_marker_path() {
        let marker = PathBuf::from("/work/transfer.running");
        let blocking = [
            Notification::Incomplete {
                run: "run1".into(),
                missing: vec!["workflow.done".into()],
                marker: marker.clone(),
            },
            Notification::SettingsError {
                target: "Exomes".into(),
                run: "run1".into(),
                marker: marker.clone(),
            },
            Notification::LostMount {
                mount: "bgarray".into(),
                path: "/mnt/bgarray".into(),
                marker: marker.clone(),
            },
            Notification::LostHpc { hosts: vec!["hpct04".into()], marker: marker.clone() },
        ];
        for notification in &blocking {
            assert!(
                notification.body_html().contains("/work/transfer.running"),
                "{} body must name the marker",
                notification.kind()
            );
        }
    }

    #[test]
    fn incomplete_subject_names_the_run() {
        let notification = Notification::Incomplete {
            run: "230920_A01131_0356_AHKM7VDRX3_2".into(),
            missing: vec!["workflow.done".into()],
            marker: PathBuf::from("/w/transfer.running"),
        };
        assert!(notification.subject().starts_with("Analysis not complete"));
        assert!(notification.subject().contains("230920_A01131_0356_AHKM7VDRX3_2"));
        assert!(notification.body_html().contains("workflow.done"));
    }
}
