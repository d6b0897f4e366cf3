//! Image layers
//!
//! A cluster image is an ordered sequence of layers, each produced by one
//! Kubefile instruction. Layers are immutable once their content hash is
//! set; a rebuild either reuses a hash from cache or replaces it entirely.

use crate::error::{StrataError, StrataResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sentinel FROM value meaning "no base image"
pub const SCRATCH: &str = "scratch";

/// The four instruction kinds a Kubefile can contain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LayerKind {
    From,
    Copy,
    Run,
    Cmd,
}

impl fmt::Display for LayerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::From => "FROM",
            Self::Copy => "COPY",
            Self::Run => "RUN",
            Self::Cmd => "CMD",
        };
        f.write_str(s)
    }
}

impl FromStr for LayerKind {
    type Err = StrataError;

    fn from_str(s: &str) -> StrataResult<Self> {
        match s {
            "FROM" => Ok(Self::From),
            "COPY" => Ok(Self::Copy),
            "RUN" => Ok(Self::Run),
            "CMD" => Ok(Self::Cmd),
            other => Err(StrataError::Internal(format!(
                "unknown instruction kind {other}"
            ))),
        }
    }
}

/// One layer of a cluster image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    /// Instruction kind
    pub kind: LayerKind,

    /// Instruction text: a base image reference for FROM, `src dst` for
    /// COPY, a shell command for RUN/CMD
    pub value: String,

    /// Content hash of the layer's filesystem effect. None until the layer
    /// is executed or resolved from cache; also None when the instruction
    /// changed nothing (CMD layers never carry a hash).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    /// Digest of the COPY source files at build time. Recorded so cache
    /// chains can be recomputed from stored metadata; None for non-COPY
    /// layers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_id: Option<String>,
}

impl Layer {
    /// Create an unexecuted layer
    pub fn new(kind: LayerKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            hash: None,
            cache_id: None,
        }
    }

    /// Whether this is `FROM scratch`
    pub fn is_scratch_from(&self) -> bool {
        self.kind == LayerKind::From && self.value == SCRATCH
    }

    /// Split a COPY value into (src, dst)
    pub fn copy_src_dst(&self) -> StrataResult<(&str, &str)> {
        let mut fields = self.value.split_whitespace();
        match (fields.next(), fields.next(), fields.next()) {
            (Some(src), Some(dst), None) => Ok((src, dst)),
            _ => Err(StrataError::CopyValueInvalid(self.value.clone())),
        }
    }
}
