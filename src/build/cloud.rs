//! Cloud build pipeline
//!
//! Wraps the same local build behind remote delegation: resolve and write
//! the cluster definition, bring up the infra it names, open a command
//! channel to the build host, ship the build context there, invoke the
//! identical local build remotely, then tear everything down. Stages run
//! in order and the first failure aborts the pipeline.

use crate::build::builder::BuildRequest;
use crate::cluster::{self, Cluster, Host, CLUSTERFILE_NAME};
use crate::config::schema::CloudConfig;
use crate::config::Layout;
use crate::error::{StrataError, StrataResult};
use crate::infra::{provider_for, InfraProvider};
use crate::kubefile;
use crate::remote::{CommandChannel, SshChannel};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Builds a cluster image by delegating to a remote host
pub struct CloudBuilder {
    layout: Layout,
    cloud: CloudConfig,
    request: BuildRequest,
    provider: Option<Arc<dyn InfraProvider>>,
    channel: Option<Arc<dyn CommandChannel>>,
}

impl CloudBuilder {
    pub fn new(layout: Layout, cloud: CloudConfig, request: BuildRequest) -> Self {
        Self {
            layout,
            cloud,
            request,
            provider: None,
            channel: None,
        }
    }

    /// Substitute the infra provider (tests)
    pub fn with_provider(mut self, provider: Arc<dyn InfraProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Substitute the command channel (tests)
    pub fn with_channel(mut self, channel: Arc<dyn CommandChannel>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Run the whole cloud pipeline
    pub async fn build(self) -> StrataResult<()> {
        if !self.request.context.is_dir() {
            return Err(StrataError::ContextInvalid {
                path: self.request.context.clone(),
            });
        }
        self.layout.ensure().await?;

        info!("stage: init image spec");
        let layers = kubefile::parse_file(&self.request.kubefile).await?;

        info!("stage: resolve cluster definition");
        let definition = cluster::discover(&self.request.context, &layers, &self.layout)
            .await
            .ok_or(StrataError::ClusterfileNotFound)?;
        let cluster = Cluster::parse(&definition)?;
        let clusterfile_path = self.write_tmp_clusterfile(&definition).await?;

        info!("stage: apply infra");
        let provider = match self.provider.clone() {
            Some(provider) => provider,
            None => provider_for(&cluster)?,
        };
        let outcome = self.delegate(&cluster, &clusterfile_path, provider.as_ref()).await;

        info!("stage: tear down");
        if let Err(e) = provider.destroy(&cluster).await {
            warn!("failed to destroy infra for {}: {e}", cluster.name);
        }
        if let Err(e) = tokio::fs::remove_file(&clusterfile_path).await {
            warn!(
                "failed to remove {}: {e}",
                clusterfile_path.display()
            );
        }

        outcome
    }

    /// The provisioned part of the pipeline, separated so teardown always
    /// runs after it
    async fn delegate(
        &self,
        cluster: &Cluster,
        clusterfile_path: &Path,
        provider: &dyn InfraProvider,
    ) -> StrataResult<()> {
        let hosts = provider.apply(cluster).await?;
        let build_host = pick_build_host(&hosts).ok_or_else(|| StrataError::NoBuildHost {
            name: cluster.name.clone(),
        })?;
        info!("delegating build to {}", build_host.ip);

        info!("stage: open command channel");
        let channel: Arc<dyn CommandChannel> = match self.channel.clone() {
            Some(channel) => channel,
            None => Arc::new(SshChannel::new(&build_host.ip, cluster.ssh.clone())),
        };
        if !channel.exists(&self.cloud.remote_bin).await? {
            return Err(StrataError::RemoteBinaryMissing {
                host: build_host.ip.clone(),
                path: self.cloud.remote_bin.clone(),
            });
        }

        info!("stage: send build context");
        let archive = self.pack_context().await?;
        let shipped = self
            .ship_context(channel.as_ref(), &archive, clusterfile_path)
            .await;
        if let Err(e) = tokio::fs::remove_file(&archive).await {
            warn!("failed to remove {}: {e}", archive.display());
        }
        shipped?;

        info!("stage: remote build");
        let output = channel.run(&self.remote_build_command()).await?;
        if !output.trim().is_empty() {
            info!("{}", output.trim_end());
        }
        info!("remote build of {} finished", self.request.name);
        Ok(())
    }

    /// Persist the resolved definition so teardown has it even if the
    /// discovery source (context, base image) changes mid-build
    async fn write_tmp_clusterfile(&self, definition: &str) -> StrataResult<PathBuf> {
        let path = self
            .layout
            .tmp_dir()
            .join(format!("Clusterfile-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&path, definition)
            .await
            .map_err(|e| StrataError::io(format!("writing {}", path.display()), e))?;
        Ok(path)
    }

    /// Gzip the Kubefile plus the whole context into one archive
    async fn pack_context(&self) -> StrataResult<PathBuf> {
        let path = self
            .layout
            .tmp_dir()
            .join(format!("context-{}.tar.gz", uuid::Uuid::new_v4().simple()));

        let file = std::fs::File::create(&path)
            .map_err(|e| StrataError::io(format!("creating {}", path.display()), e))?;
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);

        builder
            .append_dir_all(".", &self.request.context)
            .map_err(|e| StrataError::io("archiving build context".to_string(), e))?;

        if !self.request.kubefile.starts_with(&self.request.context) {
            builder
                .append_path_with_name(&self.request.kubefile, self.remote_kubefile_name())
                .map_err(|e| StrataError::io("archiving Kubefile".to_string(), e))?;
        }

        let encoder = builder
            .into_inner()
            .map_err(|e| StrataError::io("finalizing context archive".to_string(), e))?;
        encoder
            .finish()
            .map_err(|e| StrataError::io("compressing context archive".to_string(), e))?;
        Ok(path)
    }

    async fn ship_context(
        &self,
        channel: &dyn CommandChannel,
        archive: &Path,
        clusterfile_path: &Path,
    ) -> StrataResult<()> {
        let workdir = &self.cloud.remote_workdir;
        channel.run(&format!("mkdir -p {workdir}")).await?;

        let remote_archive = format!("{workdir}/.context.tar.gz");
        channel.upload(archive, &remote_archive).await?;
        channel
            .run(&format!(
                "cd {workdir} && tar -xzf .context.tar.gz && rm .context.tar.gz"
            ))
            .await?;

        // Make sure the remote build can discover the cluster definition
        // even when it came from a base image on this machine
        if !self.request.context.join(CLUSTERFILE_NAME).exists() {
            channel
                .upload(clusterfile_path, &format!("{workdir}/{CLUSTERFILE_NAME}"))
                .await?;
        }
        Ok(())
    }

    fn remote_kubefile_name(&self) -> String {
        match self.request.kubefile.strip_prefix(&self.request.context) {
            Ok(rel) => rel.display().to_string(),
            Err(_) => self
                .request
                .kubefile
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "Kubefile".to_string()),
        }
    }

    fn remote_build_command(&self) -> String {
        let mut command = format!(
            "cd {} && {} build -f {} -t {} --mode local",
            self.cloud.remote_workdir,
            self.cloud.remote_bin,
            self.remote_kubefile_name(),
            self.request.name,
        );
        if self.request.no_cache {
            command.push_str(" --no-cache");
        }
        if self.request.ignore_error {
            command.push_str(" --ignore-error");
        }
        command.push_str(" .");
        command
    }
}

fn pick_build_host(hosts: &[Host]) -> Option<&Host> {
    hosts
        .iter()
        .find(|h| h.roles.iter().any(|r| r == "master"))
        .or_else(|| hosts.first())
}
