use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize};

use crate::SyncError;

/// Immutable settings value loaded once per invocation and passed into every
/// component. There is no mutable global; everything downstream borrows this.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Settings {
    /// Working directory holding the lock marker, the transferred-runs file
    /// and the transfer logs.
    pub workdir: PathBuf,
    pub temp_error_path: PathBuf,
    pub log_path: PathBuf,
    pub errorlog_path: PathBuf,
    /// External VCF upload tool, invoked per file with (vcf, type-tag, run).
    pub vcf_upload_tool: PathBuf,
    /// Remote transfer nodes, tried in order until one accepts a connection.
    pub servers: Vec<String>,
    pub user: String,
    pub mail: MailSettings,
    /// Storage mounts, each carrying its own list of transfer targets.
    pub mounts: BTreeMap<String, Mount>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MailSettings {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub from: String,
    pub to: Vec<String>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Mount {
    pub mount_path: PathBuf,
    pub transfers: Vec<TransferTarget>,
}

/// One category of data to transfer: where it lives on the cluster, where it
/// lands under the mount, and the policy knobs applied per run.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct TransferTarget {
    pub name: String,
    pub input: String,
    pub output: String,
    /// Marker files that must exist in the remote run folder before the run
    /// is eligible. Empty strings are "no requirement" sentinels.
    #[serde(default)]
    pub files_required: Vec<String>,
    /// Tri-state on purpose: `None` covers both an absent key and a
    /// non-boolean value, and the policy layer reports it as a settings
    /// error instead of failing the whole load.
    #[serde(default, deserialize_with = "lenient_bool")]
    pub continue_without_email: Option<bool>,
    #[serde(default)]
    pub upload_gatk_vcf: bool,
    #[serde(default)]
    pub upload_exomedepth_vcf: bool,
    #[serde(default)]
    pub include: Vec<String>,
    #[serde(default)]
    pub exclude: Vec<String>,
}

impl TransferTarget {
    /// Required files with the empty-string sentinels filtered out.
    pub fn required_files(&self) -> impl Iterator<Item = &str> {
        self.files_required.iter().map(|f| f.as_str()).filter(|f| !f.is_empty())
    }
}

fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(value.as_bool())
}

impl Settings {
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(".dxsync").join("config.json"))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read settings file {}", path.display()))?;
        let settings: Settings = serde_json::from_str(&content)
            .with_context(|| format!("cannot parse settings file {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(SyncError::ConfigError("no transfer servers listed".to_string()).into());
        }
        if self.mounts.is_empty() {
            return Err(SyncError::ConfigError("no mounts listed".to_string()).into());
        }
        for (name, mount) in &self.mounts {
            if mount.transfers.is_empty() {
                return Err(SyncError::ConfigError(format!(
                    "mount '{}' lists no transfer targets",
                    name
                ))
                .into());
            }
        }
        Ok(())
    }
}
