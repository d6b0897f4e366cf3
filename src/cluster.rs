//! Cluster definitions
//!
//! A Clusterfile describes the machines an image is meant to run on (and,
//! for cloud builds, the host the build itself is delegated to). Builds
//! attach the discovered definition to the image metadata so consumers of
//! the image can recover it.

use crate::config::Layout;
use crate::error::{StrataError, StrataResult};
use crate::image::{ImageStore, Layer, LayerKind, CLUSTERFILE_ANNOTATION};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Conventional file name in a build context
pub const CLUSTERFILE_NAME: &str = "Clusterfile";

/// A parsed cluster definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,

    /// Infra provider responsible for the hosts
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default)]
    pub hosts: Vec<Host>,

    #[serde(default)]
    pub ssh: SshConfig,
}

fn default_provider() -> String {
    "pre-provisioned".to_string()
}

/// One machine in the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Host {
    pub ip: String,

    #[serde(default)]
    pub roles: Vec<String>,
}

/// How to reach the cluster's hosts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SshConfig {
    pub user: String,
    pub port: u16,
    pub identity_file: Option<PathBuf>,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: "root".to_string(),
            port: 22,
            identity_file: None,
        }
    }
}

impl Cluster {
    /// Parse a Clusterfile document
    pub fn parse(yaml: &str) -> StrataResult<Self> {
        serde_yaml::from_str(yaml).map_err(|e| StrataError::ClusterfileInvalid(e.to_string()))
    }

    /// Load a Clusterfile from disk
    pub async fn load(path: &Path) -> StrataResult<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| StrataError::io(format!("reading {}", path.display()), e))?;
        Self::parse(&content)
    }

    /// The host a cloud build is delegated to: the first master, falling
    /// back to the first host
    pub fn build_host(&self) -> StrataResult<&Host> {
        self.hosts
            .iter()
            .find(|h| h.roles.iter().any(|r| r == "master"))
            .or_else(|| self.hosts.first())
            .ok_or_else(|| StrataError::NoBuildHost {
                name: self.name.clone(),
            })
    }

    pub fn to_yaml(&self) -> StrataResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// Find the raw cluster definition for a build, in order: a Clusterfile
/// in the build context, a COPY instruction that copies one, then the
/// base image's attached definition. Returns None when nowhere defines
/// one.
pub async fn discover(context: &Path, layers: &[Layer], layout: &Layout) -> Option<String> {
    let direct = context.join(CLUSTERFILE_NAME);
    if let Ok(content) = fs::read_to_string(&direct).await {
        debug!("clusterfile found in build context");
        return Some(content);
    }

    for layer in layers {
        if layer.kind != LayerKind::Copy {
            continue;
        }
        let Ok((src, _)) = layer.copy_src_dst() else {
            continue;
        };
        if Path::new(src).file_name() == Some(std::ffi::OsStr::new(CLUSTERFILE_NAME)) {
            if let Ok(content) = fs::read_to_string(context.join(src)).await {
                debug!("clusterfile found via COPY {src}");
                return Some(content);
            }
        }
    }

    let from = layers.first()?;
    if from.kind != LayerKind::From || from.is_scratch_from() {
        return None;
    }
    match ImageStore::new(layout.clone()).by_name(&from.value).await {
        Ok(base) => {
            let found = base.annotations.get(CLUSTERFILE_ANNOTATION).cloned();
            if found.is_some() {
                debug!("clusterfile found in base image {}", from.value);
            }
            found
        }
        Err(e) => {
            debug!("no clusterfile from base image: {e}");
            None
        }
    }
}
