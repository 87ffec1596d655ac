use std::io::Read;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use anyhow::Result;

use crate::SyncError;

/// Captured result of one remote command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: i32,
}

/// The remote side of the daemon, narrow on purpose so tests can fake it:
/// one connected host, one blocking command channel.
pub trait RemoteShell {
    /// Host this shell is connected to, used to build rsync source specs.
    fn host(&self) -> &str;
    fn exec(&self, command: &str) -> Result<ExecOutput>;
}

enum HostFailure {
    /// TCP-level refusal or timeout; the next host in the list gets a try.
    Unreachable(String),
    /// Handshake or authentication failure on a reachable host; aborts
    /// immediately, no point probing the remaining hosts with the same key.
    Protocol(String),
}

pub struct SshRemote {
    sess: ssh2::Session,
    host: String,
}

impl SshRemote {
    /// Connect to the first reachable transfer node, trying hosts in order.
    pub fn connect(hosts: &[String], user: &str) -> Result<Self> {
        for host in hosts {
            match Self::connect_host(host, user) {
                Ok(remote) => {
                    tracing::info!("connected to {} as {}", host, user);
                    return Ok(remote);
                }
                Err(HostFailure::Unreachable(detail)) => {
                    tracing::warn!("transfer node {} unreachable: {}", host, detail);
                    continue;
                }
                Err(HostFailure::Protocol(detail)) => {
                    return Err(SyncError::SshAuthFailed { host: host.clone(), detail }.into());
                }
            }
        }
        Err(SyncError::AllHostsUnreachable(hosts.to_vec()).into())
    }

    fn connect_host(host: &str, user: &str) -> std::result::Result<Self, HostFailure> {
        let addr =
            if host.contains(':') { host.to_string() } else { format!("{}:22", host) };
        let mut addrs = addr
            .to_socket_addrs()
            .map_err(|e| HostFailure::Unreachable(e.to_string()))?;
        let sock = addrs
            .next()
            .ok_or_else(|| HostFailure::Unreachable(format!("cannot resolve {}", addr)))?;
        let tcp = TcpStream::connect_timeout(&sock, Duration::from_secs(10))
            .map_err(|e| HostFailure::Unreachable(e.to_string()))?;
        let _ = tcp.set_read_timeout(Some(Duration::from_secs(30)));
        let _ = tcp.set_write_timeout(Some(Duration::from_secs(30)));

        let mut sess = ssh2::Session::new()
            .map_err(|e| HostFailure::Protocol(format!("cannot create session: {}", e)))?;
        sess.set_tcp_stream(tcp);
        sess.handshake()
            .map_err(|e| HostFailure::Protocol(format!("handshake failed: {}", e)))?;

        if try_key_authentication(&mut sess, user) {
            Ok(Self { sess, host: host.to_string() })
        } else {
            Err(HostFailure::Protocol("authentication failed".to_string()))
        }
    }
}

/// Agent first, then the usual key files.
fn try_key_authentication(sess: &mut ssh2::Session, username: &str) -> bool {
    if sess.userauth_agent(username).is_ok() && sess.authenticated() {
        return true;
    }
    if let Some(home) = dirs::home_dir() {
        for name in ["id_ed25519", "id_rsa", "id_ecdsa"] {
            let key = home.join(".ssh").join(name);
            if key.exists() {
                let _ = sess.userauth_pubkey_file(username, None, &key, None);
                if sess.authenticated() {
                    return true;
                }
            }
        }
    }
    false
}

impl RemoteShell for SshRemote {
    fn host(&self) -> &str {
        &self.host
    }

    fn exec(&self, command: &str) -> Result<ExecOutput> {
        let run = || -> Result<ExecOutput> {
            let mut channel = self.sess.channel_session()?;
            channel.exec(command)?;
            let mut stdout = String::new();
            channel.read_to_string(&mut stdout)?;
            let mut stderr = String::new();
            channel.stderr().read_to_string(&mut stderr)?;
            channel.wait_close()?;
            let exit_status = channel.exit_status()?;
            Ok(ExecOutput { stdout, stderr, exit_status })
        };
        run().map_err(|e| {
            SyncError::RemoteCommandFailed { host: self.host.clone(), detail: e.to_string() }
                .into()
        })
    }
}
