//! Error types for Strata
//!
//! All modules use `StrataResult<T>` as their return type.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for Strata operations
pub type StrataResult<T> = Result<T, StrataError>;

/// All errors that can occur in Strata
#[derive(Error, Debug)]
pub enum StrataError {
    // Instruction file errors
    #[error("Kubefile not found: {0}")]
    KubefileNotFound(PathBuf),

    #[error("Invalid Kubefile at line {line}: {reason}")]
    KubefileInvalid { line: usize, reason: String },

    #[error("First instruction must be FROM, found {0}")]
    FirstInstructionNotFrom(String),

    #[error("Kubefile contains no instructions")]
    EmptyInstructionList,

    // Image errors
    #[error("Image not found: {name}. No remote registry is configured; build or import it first")]
    ImageNotFound { name: String },

    #[error("Invalid image metadata at {path}: {reason}")]
    MetadataInvalid { path: PathBuf, reason: String },

    #[error("Base image {name} declares its own FROM base, which is not allowed")]
    BaseImageHasBase { name: String },

    #[error("Base image {name} has no layers")]
    BaseImageEmpty { name: String },

    #[error("Layer stack would exceed {limit} layers ({count} requested)")]
    LayerDepthExceeded { count: usize, limit: usize },

    // Layer store errors
    #[error("Layer {digest} missing from layer store")]
    LayerMissing { digest: String },

    // Mount errors
    #[error("Cannot mount with zero lower layers: nothing to build on")]
    NoLowerLayers,

    #[error("Failed to mount overlay at {target}: {reason}")]
    MountFailed { target: PathBuf, reason: String },

    #[error("Failed to unmount {target}: {reason}")]
    UnmountFailed { target: PathBuf, reason: String },

    // Instruction execution errors
    #[error("Instruction `{kind} {value}` failed: {source}")]
    InstructionFailed {
        kind: String,
        value: String,
        #[source]
        source: Box<StrataError>,
    },

    #[error("COPY expects `src dst`, got `{0}`")]
    CopyValueInvalid(String),

    #[error("COPY source not found: {0}")]
    CopySourceMissing(PathBuf),

    // Build context errors
    #[error("Build context {path} is not a directory")]
    ContextInvalid { path: PathBuf },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    // Cluster / cloud errors
    #[error("Clusterfile not found in build context or base image")]
    ClusterfileNotFound,

    #[error("Invalid Clusterfile: {0}")]
    ClusterfileInvalid(String),

    #[error("Cluster {name} defines no hosts to build on")]
    NoBuildHost { name: String },

    #[error("Unknown infra provider: {0}")]
    UnknownProvider(String),

    #[error("Remote command on {host} failed: {reason}")]
    RemoteCommand { host: String, reason: String },

    #[error("Remote host {host} has no strata binary at {path}")]
    RemoteBinaryMissing { host: String, path: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Process errors
    #[error("Command failed to start: {command}")]
    CommandFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command exited non-zero: {command}, stderr: {stderr}")]
    CommandExecution { command: String, stderr: String },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl StrataError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a command failed error
    pub fn command_failed(command: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            command: command.into(),
            source,
        }
    }

    /// Create a command execution error
    pub fn command_exec(command: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self::CommandExecution {
            command: command.into(),
            stderr: stderr.into(),
        }
    }

    /// Wrap an error with the instruction that triggered it
    pub fn instruction(kind: impl std::fmt::Display, value: impl Into<String>, source: Self) -> Self {
        Self::InstructionFailed {
            kind: kind.to_string(),
            value: value.into(),
            source: Box::new(source),
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::InstructionFailed { source, .. } => source.hint(),
            Self::MountFailed { .. } => {
                Some("Overlay mounts require root; re-run with sudo or use --mode cloud")
            }
            Self::RemoteBinaryMissing { .. } => {
                Some("Install strata on the build host before running a cloud build")
            }
            Self::KubefileNotFound(_) => Some("Pass the instruction file with -f <path>"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = StrataError::NoLowerLayers;
        assert!(err.to_string().contains("nothing to build on"));
    }

    #[test]
    fn error_hint() {
        let err = StrataError::MountFailed {
            target: PathBuf::from("/tmp/x"),
            reason: "permission denied".to_string(),
        };
        assert!(err.hint().unwrap().contains("root"));
        assert!(StrataError::NoLowerLayers.hint().is_none());
    }

    #[test]
    fn instruction_failure_names_the_instruction() {
        let err = StrataError::instruction(
            "RUN",
            "make install",
            StrataError::command_exec("sh -c 'make install'", "exit status 2"),
        );
        assert!(err.to_string().contains("RUN make install"));
    }

    #[test]
    fn instruction_failure_keeps_inner_hint() {
        let inner = StrataError::MountFailed {
            target: PathBuf::from("/tmp/x"),
            reason: "permission denied".to_string(),
        };
        let err = StrataError::instruction("RUN", "true", inner);
        assert!(err.hint().unwrap().contains("root"));
    }
}
