//! Artifacts and the build manifest.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

/// A single self-contained executable and its metadata.
///
/// Artifacts are never modified in place: every stage that transforms one
/// writes a new file and inspects it into a new `Artifact`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: PathBuf,
    pub size: u64,
    pub target_os: String,
    pub target_arch: String,
    /// Lowercase hex SHA-256 of the file contents
    pub sha256: String,
}

impl Artifact {
    /// Read a file and record its size and checksum
    pub fn inspect(path: &Path, target_os: &str, target_arch: &str) -> io::Result<Self> {
        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        let mut size = 0u64;
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            size += n as u64;
        }

        Ok(Self {
            path: path.to_path_buf(),
            size,
            target_os: target_os.to_string(),
            target_arch: target_arch.to_string(),
            sha256: hex::encode(hasher.finalize()),
        })
    }

    /// Same executable, observed at a different path
    pub fn same_contents(&self, other: &Self) -> bool {
        self.size == other.size && self.sha256 == other.sha256
    }
}

/// One executed or skipped stage, as recorded in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRecord {
    pub name: String,
    pub status: StageStatus,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Passed,
    Skipped,
}

/// Written next to the published artifact as `<artifact>.manifest.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub name: String,
    pub compressed: bool,
    /// Passed the sandboxed smoke test; `false` only when verification was switched off
    pub verified: bool,
    /// Build time; the only field expected to differ between identical builds
    pub built_at: String,
    pub image_tag: String,
    pub artifact: Artifact,
    pub stages: Vec<StageRecord>,
}

impl ArtifactManifest {
    pub fn manifest_path(artifact_path: &Path) -> PathBuf {
        let mut name = artifact_path.as_os_str().to_owned();
        name.push(".manifest.toml");
        PathBuf::from(name)
    }

    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inspect_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bin");
        std::fs::write(&path, b"hello").unwrap();

        let artifact = Artifact::inspect(&path, "linux", "x86_64").unwrap();
        assert_eq!(artifact.size, 5);
        assert_eq!(
            artifact.sha256,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );

        let copy = dir.path().join("copy");
        std::fs::write(&copy, b"hello").unwrap();
        let other = Artifact::inspect(&copy, "linux", "x86_64").unwrap();
        assert!(artifact.same_contents(&other));
        assert_ne!(artifact, other);
    }

    #[test]
    fn test_inspect_missing_file() {
        assert!(Artifact::inspect(Path::new("/nonexistent/bin"), "linux", "x86_64").is_err());
    }

    #[test]
    fn test_manifest_toml() {
        let manifest = ArtifactManifest {
            name: "hello-native".to_string(),
            compressed: true,
            verified: true,
            built_at: "2026-01-01T00:00:00+00:00".to_string(),
            artifact: Artifact {
                path: PathBuf::from("dist/hello-native"),
                size: 42,
                target_os: "linux".to_string(),
                target_arch: "x86_64".to_string(),
                sha256: "ab".repeat(32),
            },
            image_tag: "hello-native:latest".to_string(),
            stages: vec![StageRecord {
                name: "compress".to_string(),
                status: StageStatus::Passed,
                duration_ms: 7,
            }],
        };

        let text = manifest.to_toml().unwrap();
        assert!(text.contains("compressed = true"));
        assert!(text.contains("verified = true"));
        assert!(text.contains("status = \"passed\""));

        let parsed = ArtifactManifest::from_toml(&text).unwrap();
        assert_eq!(parsed.artifact, manifest.artifact);
        assert_eq!(parsed.stages, manifest.stages);
    }

    #[test]
    fn test_manifest_path() {
        assert_eq!(
            ArtifactManifest::manifest_path(Path::new("dist/hello-native")),
            PathBuf::from("dist/hello-native.manifest.toml")
        );
    }
}
