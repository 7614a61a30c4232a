//! Staged build pipeline
//!
//! Turns a source tree into a verified, packaged native executable:
//! fetch dependencies, compile, optionally compress, package into a minimal
//! image layer, then smoke-test the packaged executable.

pub mod artifact;
pub mod config;
pub mod executor;
pub mod package;
pub mod runner;
pub mod stage;
pub mod state;
pub mod verify;

pub use artifact::{Artifact, ArtifactManifest, StageRecord, StageStatus};
pub use config::{CommandStage, PackageSettings, PipelineConfig, Probe, VerifySettings};
pub use executor::{CommandExecutor, StageExecutor};
pub use package::ImageLayer;
pub use runner::{BuildPipeline, PipelineError, PipelineReport};
pub use stage::{StageFailure, StageKind};
pub use state::PipelineState;
pub use verify::{verify_artifact, VerificationFailure, VerifyReport};
