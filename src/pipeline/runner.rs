//! Build pipeline orchestration.
//!
//! Drives [`PipelineState`] from `Init` to `Done` or `Failed`, running each
//! stage through a [`StageExecutor`]. Stage outputs are written to a partial
//! path and renamed into place only on success; the user's target path is
//! written only after verification passed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;

use super::artifact::{Artifact, ArtifactManifest, StageRecord, StageStatus};
use super::config::{CommandStage, PipelineConfig};
use super::executor::StageExecutor;
use super::package::{assemble_layer, ImageLayer};
use super::stage::{partial_path, Placeholders, StageFailure, StageInvocation, StageKind, StageOutput};
use super::state::PipelineState;
use super::verify::{verify_artifact, VerificationFailure, VerifyReport};
use crate::logger;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid pipeline configuration: {0}")]
    Config(String),

    #[error("{context}: {source}")]
    Setup {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Stage(#[from] StageFailure),

    #[error("verification failed: {0}")]
    Verification(#[from] VerificationFailure),

    #[error("publishing {}: {source}", .path.display())]
    Publish {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl PipelineError {
    /// Name of the state the pipeline failed in
    pub const fn failed_stage(&self) -> &'static str {
        match self {
            Self::Config(_) | Self::Setup { .. } => PipelineState::Init.name(),
            Self::Stage(failure) => failure.stage().name(),
            Self::Verification(_) => PipelineState::Verify.name(),
            Self::Publish { .. } => "publish",
        }
    }

    fn setup(context: impl Into<String>, source: io::Error) -> Self {
        Self::Setup {
            context: context.into(),
            source,
        }
    }
}

/// Outcome of a successful run
#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub state: PipelineState,
    pub workdir: PathBuf,
    /// The published artifact at the target path
    pub artifact: Artifact,
    pub layer: ImageLayer,
    pub manifest_path: PathBuf,
    pub stages: Vec<StageRecord>,
    pub verify: Option<VerifyReport>,
    pub duration_ms: u64,
}

/// Paths fixed for one run
struct RunContext {
    source: PathBuf,
    workdir: PathBuf,
    target: PathBuf,
}

/// What the stages produced so far
#[derive(Default)]
struct Progress {
    stages: Vec<StageRecord>,
    artifact: Option<Artifact>,
    layer: Option<ImageLayer>,
    verify: Option<VerifyReport>,
}

impl Progress {
    fn record(&mut self, name: &str, status: StageStatus, duration_ms: u64) {
        self.stages.push(StageRecord {
            name: name.to_string(),
            status,
            duration_ms,
        });
    }
}

/// Removes a stage's partial output unless the stage completed
struct PartialGuard {
    path: Option<PathBuf>,
}

impl PartialGuard {
    fn new(path: PathBuf) -> Self {
        remove_path(&path);
        Self { path: Some(path) }
    }

    fn disarm(&mut self) {
        self.path = None;
    }
}

impl Drop for PartialGuard {
    fn drop(&mut self) {
        if let Some(p) = &self.path {
            remove_path(p);
        }
    }
}

fn remove_path(path: &Path) {
    if path.is_dir() {
        let _ = fs::remove_dir_all(path);
    } else if path.exists() {
        let _ = fs::remove_file(path);
    }
}

/// Staged build of one executable into a verified, packaged artifact
pub struct BuildPipeline<E> {
    config: PipelineConfig,
    executor: E,
    workdir: Option<PathBuf>,
}

impl<E: StageExecutor> BuildPipeline<E> {
    pub const fn new(config: PipelineConfig, executor: E) -> Self {
        Self {
            config,
            executor,
            workdir: None,
        }
    }

    /// Use `dir` instead of `<target dir>/.<target name>.build`
    #[must_use]
    pub fn with_workdir(mut self, dir: PathBuf) -> Self {
        self.workdir = Some(dir);
        self
    }

    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Build `source` into `target`.
    ///
    /// The work directory is recreated on every run and kept afterwards for
    /// inspection. A run that fails after setup removes whatever an earlier
    /// run published at `target`.
    pub async fn run(&self, source: &Path, target: &Path) -> Result<PipelineReport, PipelineError> {
        let started = Instant::now();
        let ctx = self.prepare(source, target)?;
        logger::log_pipeline_start(
            &ctx.source.display().to_string(),
            &ctx.workdir.display().to_string(),
        );

        let compress = self.config.compress.enabled;
        let verify = self.config.verify.enabled;
        let mut progress = Progress::default();
        let mut state = PipelineState::Init;

        while !state.is_terminal() {
            let next = state.next(compress, verify);
            if state == PipelineState::Compile && next == PipelineState::Package {
                logger::log_stage_skipped(StageKind::Compress.name());
                progress.record(StageKind::Compress.name(), StageStatus::Skipped, 0);
            }
            state = next;

            let result = match state {
                PipelineState::FetchDependencies => self.fetch(&ctx, &mut progress).await,
                PipelineState::Compile => self.compile(&ctx, &mut progress).await,
                PipelineState::Compress => self.compress(&ctx, &mut progress).await,
                PipelineState::Package => self.package(&ctx, &mut progress).await,
                PipelineState::Verify => self.verify(&ctx, &mut progress).await,
                PipelineState::Init | PipelineState::Done | PipelineState::Failed(_) => Ok(()),
            };

            if let Err(e) = result {
                report_failure(state, &e);
                discard_published(&ctx.target);
                logger::log_pipeline_finished(&state.fail().to_string(), elapsed_ms(started));
                return Err(e);
            }
        }

        let report = match self.publish(&ctx, progress, state, started) {
            Ok(report) => report,
            Err(e) => {
                let failed = PipelineState::Failed(e.failed_stage());
                logger::log_stage_failed(e.failed_stage(), &e.to_string());
                discard_published(&ctx.target);
                logger::log_pipeline_finished(&failed.to_string(), elapsed_ms(started));
                return Err(e);
            }
        };
        logger::log_pipeline_finished(&report.state.to_string(), report.duration_ms);
        Ok(report)
    }

    fn prepare(&self, source: &Path, target: &Path) -> Result<RunContext, PipelineError> {
        if !self.config.compile.enabled {
            return Err(PipelineError::Config(
                "the compile stage cannot be disabled".to_string(),
            ));
        }
        if self.config.name.is_empty() || self.config.name.contains(['/', '\\']) {
            return Err(PipelineError::Config(format!(
                "executable name {:?} is not a file name",
                self.config.name
            )));
        }

        let source = fs::canonicalize(source)
            .map_err(|e| PipelineError::setup(format!("source {}", source.display()), e))?;
        let target = std::path::absolute(target)
            .map_err(|e| PipelineError::setup(format!("target {}", target.display()), e))?;
        let Some(file_name) = target.file_name() else {
            return Err(PipelineError::Config(format!(
                "target {} has no file name",
                target.display()
            )));
        };

        let workdir = match &self.workdir {
            Some(dir) => std::path::absolute(dir)
                .map_err(|e| PipelineError::setup(format!("work dir {}", dir.display()), e))?,
            None => target
                .with_file_name(format!(".{}.build", file_name.to_string_lossy())),
        };
        let resolved = resolve(&workdir);
        if source.starts_with(&resolved) || resolve(&target).starts_with(&resolved) {
            return Err(PipelineError::Config(format!(
                "work dir {} would contain the source or the target",
                workdir.display()
            )));
        }
        prepare_workdir(&workdir)?;

        Ok(RunContext {
            source,
            workdir,
            target,
        })
    }

    async fn fetch(&self, ctx: &RunContext, progress: &mut Progress) -> Result<(), PipelineError> {
        let stage = StageKind::FetchDependencies;
        if !self.config.fetch.enabled {
            logger::log_stage_skipped(stage.name());
            progress.record(stage.name(), StageStatus::Skipped, 0);
            return Ok(());
        }
        let output = self
            .execute(ctx, stage, &self.config.fetch, None, None, &ctx.source)
            .await?;
        passed(progress, stage, &output);
        Ok(())
    }

    async fn compile(&self, ctx: &RunContext, progress: &mut Progress) -> Result<(), PipelineError> {
        let stage = StageKind::Compile;
        let (output, artifact) = self
            .produce(ctx, stage, &self.config.compile, None, &ctx.source)
            .await?;
        progress.artifact = Some(artifact);
        passed(progress, stage, &output);
        Ok(())
    }

    async fn compress(&self, ctx: &RunContext, progress: &mut Progress) -> Result<(), PipelineError> {
        let stage = StageKind::Compress;
        let input = current_artifact(progress, stage, &ctx.workdir)?.path.clone();
        let (output, artifact) = self
            .produce(ctx, stage, &self.config.compress, Some(&input), &ctx.workdir)
            .await?;
        progress.artifact = Some(artifact);
        passed(progress, stage, &output);
        Ok(())
    }

    async fn package(&self, ctx: &RunContext, progress: &mut Progress) -> Result<(), PipelineError> {
        let stage = StageKind::Package;
        let started = Instant::now();
        let settings = &self.config.package;

        let artifact = current_artifact(progress, stage, &ctx.workdir)?.clone();
        let layer = assemble_layer(artifact, &ctx.workdir, &self.config.name, settings)?;
        logger::log_artifact(
            "image layer",
            &layer.root.display().to_string(),
            layer.executable.size,
            &layer.executable.sha256,
        );

        if settings.build_image {
            let build = CommandStage {
                command: settings.build_command.clone(),
                timeout_secs: settings.build_timeout_secs,
                enabled: true,
            };
            let mut placeholders = self.placeholders(ctx, None, None);
            placeholders.layer = Some(layer.root.clone());
            let invocation = StageInvocation {
                stage,
                command: placeholders.expand(&build.command),
                cwd: layer.root.clone(),
                input: Some(layer.executable.path.clone()),
                output: None,
                timeout: build.timeout(),
            };
            logger::log_stage_started(stage.name(), &invocation.command);
            self.executor.execute(&invocation).await?;
        }

        logger::log_stage_passed(stage.name(), elapsed_ms(started));
        progress.record(stage.name(), StageStatus::Passed, elapsed_ms(started));
        progress.layer = Some(layer);
        Ok(())
    }

    async fn verify(&self, ctx: &RunContext, progress: &mut Progress) -> Result<(), PipelineError> {
        let name = PipelineState::Verify.name();
        let started = Instant::now();
        let Some(layer) = &progress.layer else {
            return Err(StageFailure::MissingOutput {
                stage: StageKind::Package,
                path: ctx.workdir.join("image"),
            }
            .into());
        };

        logger::log_stage_started(name, &[layer.executable.path.display().to_string()]);
        let report = verify_artifact(
            &self.config.verify,
            &layer.executable.path,
            &ctx.workdir.join("sandbox"),
        )
        .await?;

        logger::log_stage_passed(name, elapsed_ms(started));
        progress.record(name, StageStatus::Passed, elapsed_ms(started));
        progress.verify = Some(report);
        Ok(())
    }

    /// Copy the executable to the target path and write its manifest.
    ///
    /// Both files are staged next to the target; the manifest is moved into
    /// place first and the executable last, so a target path never holds an
    /// executable without its manifest.
    fn publish(
        &self,
        ctx: &RunContext,
        progress: Progress,
        state: PipelineState,
        started: Instant,
    ) -> Result<PipelineReport, PipelineError> {
        let Some(layer) = progress.layer else {
            return Err(StageFailure::MissingOutput {
                stage: StageKind::Package,
                path: ctx.workdir.join("image"),
            }
            .into());
        };
        let target = &ctx.target;
        let manifest_path = ArtifactManifest::manifest_path(target);
        let staged_exe = staging_path(target);
        let staged_manifest = staging_path(&manifest_path);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(publish_error(parent))?;
        }
        fs::copy(&layer.executable.path, &staged_exe).map_err(publish_error(target))?;

        let mut artifact = Artifact::inspect(
            &staged_exe,
            self.config.target_os(),
            self.config.target_arch(),
        )
        .map_err(publish_error(target))?;
        if !artifact.same_contents(&layer.executable) {
            return Err(publish_error(target)(io::Error::new(
                io::ErrorKind::InvalidData,
                "checksum changed while copying",
            )));
        }
        artifact.path.clone_from(target);

        let verified = progress.verify.is_some();
        if !verified {
            logger::log_warning(&format!(
                "Publishing {} without verification",
                target.display()
            ));
        }
        let manifest = ArtifactManifest {
            name: self.config.name.clone(),
            compressed: self.config.compress.enabled,
            verified,
            built_at: chrono::Local::now().to_rfc3339(),
            image_tag: self.config.package.image_tag.clone(),
            artifact: artifact.clone(),
            stages: progress.stages.clone(),
        };
        let text = manifest
            .to_toml()
            .map_err(|e| publish_error(&manifest_path)(io::Error::other(e)))?;
        fs::write(&staged_manifest, text)
            .and_then(|()| fs::rename(&staged_manifest, &manifest_path))
            .map_err(publish_error(&manifest_path))?;
        fs::rename(&staged_exe, target).map_err(publish_error(target))?;

        logger::log_artifact(
            "published",
            &target.display().to_string(),
            artifact.size,
            &artifact.sha256,
        );

        Ok(PipelineReport {
            state,
            workdir: ctx.workdir.clone(),
            artifact,
            layer,
            manifest_path,
            stages: progress.stages,
            verify: progress.verify,
            duration_ms: elapsed_ms(started),
        })
    }

    /// Run one external command stage that produces no artifact
    async fn execute(
        &self,
        ctx: &RunContext,
        stage: StageKind,
        settings: &CommandStage,
        input: Option<&Path>,
        output: Option<&Path>,
        cwd: &Path,
    ) -> Result<StageOutput, StageFailure> {
        let invocation = StageInvocation {
            stage,
            command: self.placeholders(ctx, input, output).expand(&settings.command),
            cwd: cwd.to_path_buf(),
            input: input.map(Path::to_path_buf),
            output: output.map(Path::to_path_buf),
            timeout: settings.timeout(),
        };
        logger::log_stage_started(stage.name(), &invocation.command);
        self.executor.execute(&invocation).await
    }

    /// Run a stage that writes a new executable.
    ///
    /// The command writes `<workdir>/.<stage>.partial`, which is renamed to
    /// `<workdir>/<stage>/<name>` once it succeeded. Any other outcome,
    /// including the future being dropped, removes the partial file.
    async fn produce(
        &self,
        ctx: &RunContext,
        stage: StageKind,
        settings: &CommandStage,
        input: Option<&Path>,
        cwd: &Path,
    ) -> Result<(StageOutput, Artifact), StageFailure> {
        let partial = partial_path(&ctx.workdir, stage);
        let mut guard = PartialGuard::new(partial.clone());

        let output = self
            .execute(ctx, stage, settings, input, Some(&partial), cwd)
            .await?;
        if !partial.is_file() {
            return Err(StageFailure::MissingOutput {
                stage,
                path: partial,
            });
        }

        let dir = ctx.workdir.join(stage.name());
        let final_path = dir.join(&self.config.name);
        fs::create_dir_all(&dir)
            .and_then(|()| fs::rename(&partial, &final_path))
            .map_err(|e| StageFailure::io(stage, "moving stage output into place", e))?;
        guard.disarm();

        let artifact = Artifact::inspect(&final_path, self.config.target_os(), self.config.target_arch())
            .map_err(|e| StageFailure::io(stage, "inspecting stage output", e))?;
        logger::log_artifact(
            stage.name(),
            &artifact.path.display().to_string(),
            artifact.size,
            &artifact.sha256,
        );
        Ok((output, artifact))
    }

    fn placeholders(&self, ctx: &RunContext, input: Option<&Path>, output: Option<&Path>) -> Placeholders {
        Placeholders {
            source: ctx.source.clone(),
            workdir: ctx.workdir.clone(),
            name: self.config.name.clone(),
            tag: self.config.package.image_tag.clone(),
            triple: self.config.target.clone(),
            input: input.map(Path::to_path_buf),
            output: output.map(Path::to_path_buf),
            layer: None,
        }
    }
}

/// Marks a directory as a pipeline work dir that may be wiped
pub const WORKDIR_MARKER: &str = ".native-pipeline-workdir";

/// Start from an empty work dir.
///
/// Only a directory that is empty or carries [`WORKDIR_MARKER`] is cleared;
/// anything else is refused.
fn prepare_workdir(dir: &Path) -> Result<(), PipelineError> {
    if dir.exists() {
        let owned = dir.join(WORKDIR_MARKER).is_file();
        let empty = fs::read_dir(dir)
            .map_err(|e| PipelineError::setup(format!("work dir {}", dir.display()), e))?
            .next()
            .is_none();
        if !owned && !empty {
            return Err(PipelineError::Config(format!(
                "work dir {} is not empty and was not created by a pipeline run",
                dir.display()
            )));
        }
        if owned {
            fs::remove_dir_all(dir).map_err(|e| PipelineError::setup("clearing work dir", e))?;
        }
    }
    fs::create_dir_all(dir).map_err(|e| PipelineError::setup("creating work dir", e))?;
    fs::write(dir.join(WORKDIR_MARKER), b"")
        .map_err(|e| PipelineError::setup("marking work dir", e))
}

/// Canonical form of an absolute path whose tail may not exist yet
fn resolve(path: &Path) -> PathBuf {
    let mut existing = path;
    let mut tail = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                tail.push(name);
                existing = parent;
            }
            _ => return path.to_path_buf(),
        }
    }
    let mut resolved = fs::canonicalize(existing).unwrap_or_else(|_| existing.to_path_buf());
    resolved.extend(tail.iter().rev());
    resolved
}

/// Remove a published artifact, its manifest and their staged copies.
///
/// Directories in those places are left alone.
fn discard_published(target: &Path) {
    let manifest = ArtifactManifest::manifest_path(target);
    for path in [
        staging_path(target),
        staging_path(&manifest),
        manifest,
        target.to_path_buf(),
    ] {
        if path.is_file() {
            let _ = fs::remove_file(&path);
        }
    }
}

fn current_artifact<'a>(
    progress: &'a Progress,
    stage: StageKind,
    workdir: &Path,
) -> Result<&'a Artifact, StageFailure> {
    progress.artifact.as_ref().ok_or_else(|| StageFailure::MissingOutput {
        stage,
        path: workdir.join(StageKind::Compile.name()),
    })
}

fn passed(progress: &mut Progress, stage: StageKind, output: &StageOutput) {
    logger::log_stage_passed(stage.name(), output.duration_ms);
    progress.record(stage.name(), StageStatus::Passed, output.duration_ms);
}

fn report_failure(state: PipelineState, err: &PipelineError) {
    logger::log_stage_failed(state.name(), &err.to_string());
    if let PipelineError::Stage(failure) = err {
        if let Some((stdout, stderr)) = failure.captured_output() {
            logger::log_stage_output(state.name(), "stdout", stdout);
            logger::log_stage_output(state.name(), "stderr", stderr);
        }
    }
}

fn publish_error(path: &Path) -> impl FnOnce(io::Error) -> PipelineError {
    let path = path.to_path_buf();
    move |source| PipelineError::Publish { path, source }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".partial");
    PathBuf::from(name)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
