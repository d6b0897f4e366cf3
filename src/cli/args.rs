//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Strata - layered cluster image builder
///
/// Builds immutable cluster images from FROM/COPY/RUN/CMD instruction
/// files, caching each layer content-addressably for reuse.
#[derive(Parser, Debug)]
#[command(name = "strata")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "STRATA_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a cluster image from a Kubefile
    Build(BuildArgs),

    /// List built images
    Images,

    /// Print one image's metadata
    Inspect(InspectArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

/// Where the build runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BuildMode {
    /// Build on this machine
    Local,

    /// Delegate the build to a provisioned remote host
    Cloud,
}

/// Arguments for the build command
#[derive(Parser, Debug)]
pub struct BuildArgs {
    /// Instruction file path
    #[arg(short = 'f', long = "file", default_value = "Kubefile")]
    pub kubefile: PathBuf,

    /// Name for the built image
    #[arg(short = 't', long = "tag")]
    pub name: String,

    /// Build mode
    #[arg(long, value_enum, default_value_t = BuildMode::Local)]
    pub mode: BuildMode,

    /// Disable layer caching for this build
    #[arg(long)]
    pub no_cache: bool,

    /// Continue past failing RUN/CMD instructions
    #[arg(long)]
    pub ignore_error: bool,

    /// Build context directory
    #[arg(default_value = ".")]
    pub context: PathBuf,
}

/// Arguments for the inspect command
#[derive(Parser, Debug)]
pub struct InspectArgs {
    /// Image name or id
    pub image: String,
}

/// Arguments for the completions command
#[derive(Parser, Debug)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}
