//! `native-pipeline`: build, package and verify the service
//!
//! Runs fetch, compile, compress and package stages against a source tree,
//! smoke-tests the packaged executable and copies it to the target path.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;

use hello_native::logger;
use hello_native::pipeline::config::DEFAULT_PIPELINE_CONFIG;
use hello_native::pipeline::{BuildPipeline, CommandExecutor, PipelineConfig};

#[derive(Parser, Debug)]
#[command(name = "native-pipeline")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build a minimal native image of the service and verify it", long_about = None)]
struct Cli {
    /// Source tree to build (the directory holding Cargo.toml)
    source_dir: PathBuf,

    /// Where the verified executable is written
    artifact_path: PathBuf,

    /// Pipeline configuration file
    #[arg(short, long, env = "PIPELINE_CONFIG", default_value = DEFAULT_PIPELINE_CONFIG)]
    config: String,

    /// Work directory (default: next to the artifact)
    #[arg(long)]
    work_dir: Option<PathBuf>,

    /// Pass the compiled executable through uncompressed
    #[arg(long)]
    skip_compress: bool,

    /// Skip smoke-testing the packaged executable (recorded as `verified = false`)
    #[arg(long)]
    no_verify: bool,

    /// Run the image builder on the assembled layer
    #[arg(long)]
    build_image: bool,

    /// Image tag for the image builder
    #[arg(long)]
    image_tag: Option<String>,
}

impl Cli {
    /// CLI flags win over file and environment settings
    fn apply(&self, config: &mut PipelineConfig) {
        if self.skip_compress {
            config.compress.enabled = false;
        }
        if self.no_verify {
            config.verify.enabled = false;
        }
        if self.build_image {
            config.package.build_image = true;
        }
        if let Some(tag) = &self.image_tag {
            config.package.image_tag.clone_from(tag);
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match PipelineConfig::load_from(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            logger::log_error(&format!("stage failed: init: configuration: {e}"));
            return ExitCode::FAILURE;
        }
    };
    cli.apply(&mut config);

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            logger::log_error(&format!("stage failed: init: runtime: {e}"));
            return ExitCode::FAILURE;
        }
    };

    let mut pipeline = BuildPipeline::new(config, CommandExecutor);
    if let Some(dir) = cli.work_dir.clone() {
        pipeline = pipeline.with_workdir(dir);
    }

    match runtime.block_on(pipeline.run(&cli.source_dir, &cli.artifact_path)) {
        Ok(report) => {
            println!("{}", report.artifact.path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            logger::log_error(&format!("stage failed: {}: {e}", e.failed_stage()));
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "native-pipeline",
            "src-dir",
            "dist/hello-native",
            "--skip-compress",
            "--no-verify",
            "--image-tag",
            "hello:dev",
        ]);
        let mut config = PipelineConfig::default();
        cli.apply(&mut config);

        assert_eq!(cli.source_dir, PathBuf::from("src-dir"));
        assert!(!config.compress.enabled);
        assert!(!config.verify.enabled);
        assert!(!config.package.build_image);
        assert_eq!(config.package.image_tag, "hello:dev");
    }

    #[test]
    fn test_defaults_leave_config_alone() {
        let cli = Cli::parse_from(["native-pipeline", ".", "out"]);
        let mut config = PipelineConfig::default();
        cli.apply(&mut config);
        assert!(config.compress.enabled);
        assert!(config.verify.enabled);
        assert_eq!(cli.config, DEFAULT_PIPELINE_CONFIG);
    }
}
