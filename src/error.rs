/// Repository-wide structured errors for invocation-level failures.
///
/// Per-run conditions (a failed rsync, a missing marker file, a degraded VCF
/// upload) are not errors at this level — they are classified states handled
/// inside the sync loop. This enum covers the conditions that abort the whole
/// invocation, and each variant knows its exit code and whether the daemon
/// lock marker must be left behind for an operator.
#[derive(Debug, Clone)]
pub enum SyncError {
    /// The lock marker already exists: another invocation is in progress.
    LockHeld(std::path::PathBuf),
    /// A storage mount is not reachable from this host.
    MountLost { mount: String, path: std::path::PathBuf },
    /// Every configured transfer node refused or timed out at the TCP level.
    AllHostsUnreachable(Vec<String>),
    /// Handshake or authentication failed against a reachable host.
    SshAuthFailed { host: String, detail: String },
    /// A remote command died mid-flight (connection reset, timeout).
    RemoteCommandFailed { host: String, detail: String },
    /// Settings were structurally valid JSON but unusable.
    ConfigError(String),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        use SyncError::*;
        match self {
            LockHeld(p) => {
                write!(f, "transfer already running (lock marker {} exists)", p.display())
            }
            MountLost { mount, path } => {
                write!(f, "mount '{}' is lost: {} is not available", mount, path.display())
            }
            AllHostsUnreachable(hosts) => {
                write!(f, "connection to transfer nodes lost: {}", hosts.join(", "))
            }
            SshAuthFailed { host, detail } => {
                write!(f, "SSH handshake/authentication failed for {}: {}", host, detail)
            }
            RemoteCommandFailed { host, detail } => {
                write!(f, "remote command failed on {}: {}", host, detail)
            }
            ConfigError(msg) => write!(f, "settings error: {}", msg),
        }
    }
}

impl std::error::Error for SyncError {}

impl SyncError {
    /// Whether the lock marker must stay behind so the next cron tick exits
    /// quietly until an operator has fixed the underlying condition.
    /// Transient network failures release the marker: the next scheduled run
    /// retries naturally and nobody has to clean anything up.
    pub fn keeps_lock_marker(&self) -> bool {
        use SyncError::*;
        match self {
            // the marker belongs to the running peer; never touch it
            LockHeld(_) => true,
            // operator must restore the mount / the node before retrying
            MountLost { .. } | AllHostsUnreachable(_) => true,
            ConfigError(_) => true,
            // transient: release and let the next tick retry
            SshAuthFailed { .. } | RemoteCommandFailed { .. } => false,
        }
    }

    pub fn exit_code(&self) -> i32 {
        use SyncError::*;
        match self {
            LockHeld(_) => 2,
            MountLost { .. } => 3,
            AllHostsUnreachable(_) | SshAuthFailed { .. } => 4,
            RemoteCommandFailed { .. } => 5,
            ConfigError(_) => 1,
        }
    }
}
