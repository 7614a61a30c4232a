//! Pipeline configuration
//!
//! Loaded from an optional `pipeline.toml` plus `PIPELINE__SECTION__KEY`
//! environment variables; every key has a default so an empty file builds
//! this repository's own service.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default config file name (extension resolved by the `config` crate)
pub const DEFAULT_PIPELINE_CONFIG: &str = "pipeline";

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Executable name inside the image (`/app/<name>`)
    pub name: String,
    /// Compile target triple (`{triple}`); static musl so the binary runs on
    /// the minimal base image
    pub target: String,
    pub fetch: CommandStage,
    pub compile: CommandStage,
    pub compress: CommandStage,
    pub package: PackageSettings,
    pub verify: VerifySettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME").to_string(),
            target: format!("{}-unknown-linux-musl", std::env::consts::ARCH),
            fetch: CommandStage::new(
                &[
                    "cargo",
                    "fetch",
                    "--locked",
                    "--target",
                    "{triple}",
                    "--manifest-path",
                    "{source}/Cargo.toml",
                ],
                600,
            ),
            compile: CommandStage::new(
                &[
                    "sh",
                    "-c",
                    "cargo build --release --locked --target {triple} --bin {name} \
                     --manifest-path {source}/Cargo.toml --target-dir {workdir}/target \
                     && cp {workdir}/target/{triple}/release/{name} {output}",
                ],
                1800,
            ),
            compress: CommandStage::new(&["upx", "--best", "--lzma", "-o", "{output}", "{input}"], 600),
            package: PackageSettings::default(),
            verify: VerifySettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Architecture component of the target triple
    pub fn target_arch(&self) -> &str {
        self.target.split('-').next().unwrap_or_default()
    }

    /// Operating system component of the target triple (`linux` in
    /// `x86_64-unknown-linux-musl`)
    pub fn target_os(&self) -> &str {
        self.target.split('-').nth(2).unwrap_or("unknown")
    }

    /// Load from specified file path (extension optional, file optional)
    pub fn load_from(config_path: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(
                config::Environment::with_prefix("PIPELINE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }
}

/// An external tool invocation with placeholders
///
/// Placeholders: `{source}`, `{workdir}`, `{input}`, `{output}`, `{layer}`,
/// `{tag}`, `{name}`, `{triple}`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CommandStage {
    pub command: Vec<String>,
    pub timeout_secs: u64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

#[allow(clippy::missing_const_for_fn)]
fn default_enabled() -> bool {
    true
}

impl CommandStage {
    pub fn new(command: &[&str], timeout_secs: u64) -> Self {
        Self {
            command: command.iter().map(ToString::to_string).collect(),
            timeout_secs,
            enabled: true,
        }
    }

    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PackageSettings {
    pub base_image: String,
    pub exposed_port: u16,
    pub image_tag: String,
    /// Run the image builder after the layer is assembled
    pub build_image: bool,
    pub build_command: Vec<String>,
    pub build_timeout_secs: u64,
}

impl Default for PackageSettings {
    fn default() -> Self {
        Self {
            base_image: "alpine:3.20".to_string(),
            exposed_port: 8080,
            image_tag: format!("{}:latest", env!("CARGO_PKG_NAME")),
            build_image: false,
            build_command: ["docker", "build", "-t", "{tag}", "{layer}"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            build_timeout_secs: 600,
        }
    }
}

/// One liveness request and the answer it must get
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct Probe {
    #[serde(default = "default_probe_method")]
    pub method: String,
    pub path: String,
    pub expect_status: u16,
    #[serde(default)]
    pub expect_body: Option<String>,
}

#[allow(clippy::missing_const_for_fn)]
fn default_probe_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct VerifySettings {
    pub enabled: bool,
    pub startup_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub probes: Vec<Probe>,
    /// Extra `KEY=VALUE` environment for the sandboxed artifact (the
    /// sandbox starts empty). A list rather than a table: config keys are
    /// case-folded, variable names must not be.
    pub env: Vec<String>,
}

impl Default for VerifySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            startup_timeout_secs: 10,
            request_timeout_secs: 5,
            probes: vec![
                Probe {
                    method: "GET".to_string(),
                    path: "/hello".to_string(),
                    expect_status: 200,
                    expect_body: Some(crate::handler::hello::GREETING.to_string()),
                },
                Probe {
                    method: "GET".to_string(),
                    path: "/not-a-route".to_string(),
                    expect_status: 404,
                    expect_body: None,
                },
            ],
            env: Vec::new(),
        }
    }
}

impl VerifySettings {
    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Split `env` entries into (name, value) pairs, skipping malformed ones
    pub fn env_pairs(&self) -> impl Iterator<Item = (&str, &str)> {
        self.env
            .iter()
            .filter_map(|entry| entry.split_once('='))
            .filter(|(name, _)| !name.is_empty())
    }
}
