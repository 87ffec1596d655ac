use anyhow::Result;

use crate::SyncError;
use crate::config::Settings;
use crate::lock::DaemonLock;
use crate::mail::{Notification, Notifier, SmtpNotifier};
use crate::remote::{RemoteShell, SshRemote};
use crate::rsync::{CopyTool, RsyncTool};
use crate::store::TransferredStore;
use crate::sync::{self, SyncCtx, SyncLogs};
use crate::upload::{UploadRunner, VcfUploadTool};

/// One scheduled invocation with the real collaborators wired in.
pub fn run(settings: &Settings) -> Result<()> {
    let copy = RsyncTool;
    let uploader = VcfUploadTool { tool: settings.vcf_upload_tool.clone() };
    let notifier = SmtpNotifier::new(settings.mail.clone());
    run_with(settings, &copy, &uploader, &notifier, |hosts, user| {
        SshRemote::connect(hosts, user).map(|remote| Box::new(remote) as Box<dyn RemoteShell>)
    })
}

/// One scheduled invocation: lock, reconcile every mount, then release the
/// lock marker unless something needs an operator first.
pub fn run_with<C>(
    settings: &Settings,
    copy: &dyn CopyTool,
    uploader: &dyn UploadRunner,
    notifier: &dyn Notifier,
    connect: C,
) -> Result<()>
where
    C: Fn(&[String], &str) -> Result<Box<dyn RemoteShell>>,
{
    let lock = DaemonLock::acquire(&settings.workdir)?;
    tracing::info!("invocation started, lock marker {}", lock.path().display());

    let ctx = SyncCtx {
        copy,
        uploader,
        notifier,
        logs: SyncLogs::from_settings(settings),
        marker: lock.path().to_path_buf(),
        user: settings.user.clone(),
    };

    let mut block_lock = false;
    match invocation(settings, &ctx, &connect, &mut block_lock) {
        Ok(()) => {
            if block_lock {
                lock.keep();
            } else {
                lock.release()?;
                tracing::info!("invocation finished");
            }
            Ok(())
        }
        Err(e) => {
            let keep = e
                .downcast_ref::<SyncError>()
                .map(|s| s.keeps_lock_marker())
                .unwrap_or(false);
            if keep {
                lock.keep();
            } else if let Err(rm) = lock.release() {
                tracing::warn!("failed to remove lock marker on abort: {:#}", rm);
            }
            Err(e)
        }
    }
}

fn invocation<C>(
    settings: &Settings,
    ctx: &SyncCtx,
    connect: &C,
    block_lock: &mut bool,
) -> Result<()>
where
    C: Fn(&[String], &str) -> Result<Box<dyn RemoteShell>>,
{
    let mut store = TransferredStore::load(&settings.workdir)?;

    for (name, mount) in &settings.mounts {
        if !mount.mount_path.is_dir() {
            sync::notify(
                ctx.notifier,
                &Notification::LostMount {
                    mount: name.clone(),
                    path: mount.mount_path.clone(),
                    marker: ctx.marker.clone(),
                },
            );
            return Err(SyncError::MountLost {
                mount: name.clone(),
                path: mount.mount_path.clone(),
            }
            .into());
        }

        let remote = match connect(&settings.servers, &settings.user) {
            Ok(remote) => remote,
            Err(e) => {
                if matches!(
                    e.downcast_ref::<SyncError>(),
                    Some(SyncError::AllHostsUnreachable(_))
                ) {
                    sync::notify(
                        ctx.notifier,
                        &Notification::LostHpc {
                            hosts: settings.servers.clone(),
                            marker: ctx.marker.clone(),
                        },
                    );
                }
                return Err(e);
            }
        };

        *block_lock |= sync::process_mount(ctx, remote.as_ref(), mount, &mut store)?;
    }
    Ok(())
}

/// `dxsync check`: validate the settings and the external tools without
/// touching locks, mounts or remotes.
pub fn check(settings: &Settings) -> Result<()> {
    settings.validate()?;
    if which::which("rsync").is_err() {
        anyhow::bail!("rsync binary not found in PATH");
    }
    if !settings.vcf_upload_tool.exists() {
        tracing::warn!(
            "vcf upload tool {} not found on this host",
            settings.vcf_upload_tool.display()
        );
    }
    let targets: usize = settings.mounts.values().map(|m| m.transfers.len()).sum();
    println!(
        "settings ok: {} mount(s), {} transfer target(s), {} transfer node(s)",
        settings.mounts.len(),
        targets,
        settings.servers.len()
    );
    Ok(())
}
