//! Build stage definitions and command templating.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// The ordered build stages.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum StageKind {
    /// Resolve and download dependencies
    FetchDependencies,

    /// Turn the source tree into a native executable
    Compile,

    /// Pack the executable (optional)
    Compress,

    /// Copy the executable alone into a fresh image layer
    Package,
}

impl StageKind {
    /// Get the stage name as a string.
    pub const fn name(self) -> &'static str {
        match self {
            Self::FetchDependencies => "fetch-dependencies",
            Self::Compile => "compile",
            Self::Compress => "compress",
            Self::Package => "package",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Values substituted into stage command templates.
#[derive(Debug, Clone, Default)]
pub struct Placeholders {
    pub source: PathBuf,
    pub workdir: PathBuf,
    pub name: String,
    pub tag: String,
    /// Compile target triple
    pub triple: String,
    pub input: Option<PathBuf>,
    pub output: Option<PathBuf>,
    pub layer: Option<PathBuf>,
}

impl Placeholders {
    /// Expand every `{placeholder}` in every argument.
    ///
    /// Placeholders without a value for this stage expand to nothing.
    pub fn expand(&self, template: &[String]) -> Vec<String> {
        template.iter().map(|arg| self.expand_arg(arg)).collect()
    }

    fn expand_arg(&self, arg: &str) -> String {
        let path = |p: &Option<PathBuf>| {
            p.as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        };
        arg.replace("{source}", &self.source.display().to_string())
            .replace("{workdir}", &self.workdir.display().to_string())
            .replace("{name}", &self.name)
            .replace("{tag}", &self.tag)
            .replace("{triple}", &self.triple)
            .replace("{input}", &path(&self.input))
            .replace("{output}", &path(&self.output))
            .replace("{layer}", &path(&self.layer))
    }
}

/// One stage run as handed to a [`StageExecutor`](super::StageExecutor).
#[derive(Debug, Clone)]
pub struct StageInvocation {
    pub stage: StageKind,
    /// Expanded command; first element is the executable
    pub command: Vec<String>,
    /// Working directory of the child process
    pub cwd: PathBuf,
    pub input: Option<PathBuf>,
    /// Temporary path the stage must write its artifact to
    pub output: Option<PathBuf>,
    pub timeout: Duration,
}

/// Captured result of a successful stage.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

/// A build stage that did not produce its output.
#[derive(Debug, Error)]
pub enum StageFailure {
    #[error("stage {stage} has an empty command")]
    EmptyCommand { stage: StageKind },

    #[error("stage {stage} could not start {program}: {source}")]
    Spawn {
        stage: StageKind,
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("stage {stage} timed out after {} seconds", .timeout.as_secs())]
    TimedOut { stage: StageKind, timeout: Duration },

    #[error("stage {stage} exited with code {exit_code}")]
    NonZeroExit {
        stage: StageKind,
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("stage {stage} succeeded but did not write {}", .path.display())]
    MissingOutput { stage: StageKind, path: PathBuf },

    #[error("stage {stage}: {context}: {source}")]
    Io {
        stage: StageKind,
        context: String,
        #[source]
        source: io::Error,
    },
}

impl StageFailure {
    pub const fn stage(&self) -> StageKind {
        match self {
            Self::EmptyCommand { stage }
            | Self::Spawn { stage, .. }
            | Self::TimedOut { stage, .. }
            | Self::NonZeroExit { stage, .. }
            | Self::MissingOutput { stage, .. }
            | Self::Io { stage, .. } => *stage,
        }
    }

    /// Captured (stdout, stderr) of the failed command, when it ran to completion
    pub fn captured_output(&self) -> Option<(&str, &str)> {
        match self {
            Self::NonZeroExit { stdout, stderr, .. } => Some((stdout, stderr)),
            _ => None,
        }
    }

    pub fn io(stage: StageKind, context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            stage,
            context: context.into(),
            source,
        }
    }
}

/// Temporary output path for a stage inside the work directory
pub fn partial_path(workdir: &Path, stage: StageKind) -> PathBuf {
    workdir.join(format!(".{}.partial", stage.name()))
}
