//! Image layer assembly.
//!
//! The layer holds the final executable and nothing else; no toolchain
//! state from the build directory is carried over.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use super::artifact::Artifact;
use super::config::PackageSettings;
use super::stage::{partial_path, StageFailure, StageKind};

/// Directory inside the image holding the executable
pub const APP_DIR: &str = "app";

/// An assembled, immutable runtime layer
#[derive(Debug, Clone)]
pub struct ImageLayer {
    /// Build context root (`Containerfile` + `rootfs/`)
    pub root: PathBuf,
    /// The executable at `rootfs/app/<name>`
    pub executable: Artifact,
    pub containerfile: PathBuf,
    pub exposed_port: u16,
}

impl ImageLayer {
    /// Path of the executable inside the running image
    pub fn image_path(&self) -> String {
        let name = self
            .executable
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("/{APP_DIR}/{name}")
    }
}

/// Render the container build file for the layer
pub fn containerfile(name: &str, settings: &PackageSettings) -> String {
    format!(
        "# Runtime image: the {name} executable on a minimal base, nothing else\n\
         FROM {base}\n\
         COPY rootfs/{APP_DIR}/{name} /{APP_DIR}/{name}\n\
         ENV PORT={port}\n\
         EXPOSE {port}\n\
         USER 65534\n\
         ENTRYPOINT [\"/{APP_DIR}/{name}\"]\n",
        base = settings.base_image,
        port = settings.exposed_port,
    )
}

/// Move `artifact` into a fresh layer under `<workdir>/image`.
///
/// The layer is built in a partial directory and renamed into place, so a
/// failed or interrupted package step never leaves a half-built layer.
pub fn assemble_layer(
    artifact: Artifact,
    workdir: &Path,
    name: &str,
    settings: &PackageSettings,
) -> Result<ImageLayer, StageFailure> {
    let stage = StageKind::Package;
    let partial = partial_path(workdir, stage);
    let root = workdir.join("image");

    let result = build_partial(&artifact, &partial, name, settings)
        .and_then(|()| replace_dir(&partial, &root))
        .map_err(|e| StageFailure::io(stage, "assembling image layer", e));
    if result.is_err() {
        let _ = fs::remove_dir_all(&partial);
    }
    result?;

    let exe_path = root.join("rootfs").join(APP_DIR).join(name);
    let executable = Artifact::inspect(&exe_path, &artifact.target_os, &artifact.target_arch)
        .map_err(|e| StageFailure::io(stage, "inspecting packaged executable", e))?;
    if !executable.same_contents(&artifact) {
        return Err(StageFailure::io(
            stage,
            "verifying packaged executable",
            io::Error::new(io::ErrorKind::InvalidData, "checksum changed while copying"),
        ));
    }

    Ok(ImageLayer {
        containerfile: root.join("Containerfile"),
        root,
        executable,
        exposed_port: settings.exposed_port,
    })
}

fn build_partial(
    artifact: &Artifact,
    partial: &Path,
    name: &str,
    settings: &PackageSettings,
) -> io::Result<()> {
    if partial.exists() {
        fs::remove_dir_all(partial)?;
    }
    let app_dir = partial.join("rootfs").join(APP_DIR);
    fs::create_dir_all(&app_dir)?;

    let exe = app_dir.join(name);
    fs::copy(&artifact.path, &exe)?;
    set_executable(&exe)?;

    fs::write(partial.join("Containerfile"), containerfile(name, settings))
}

fn replace_dir(from: &Path, to: &Path) -> io::Result<()> {
    if to.exists() {
        fs::remove_dir_all(to)?;
    }
    fs::rename(from, to)
}

#[cfg(unix)]
fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
#[allow(clippy::unnecessary_wraps)]
fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact_in(dir: &Path) -> Artifact {
        let build = dir.join("compile");
        fs::create_dir_all(&build).unwrap();
        let path = build.join("svc");
        fs::write(&path, b"\x7fELF fake executable").unwrap();
        Artifact::inspect(&path, "linux", "x86_64").unwrap()
    }

    #[test]
    fn test_containerfile_contents() {
        let text = containerfile("svc", &PackageSettings::default());
        assert!(text.contains("FROM alpine:3.20\n"));
        assert!(text.contains("COPY rootfs/app/svc /app/svc\n"));
        assert!(text.contains("EXPOSE 8080\n"));
        assert!(text.contains("ENTRYPOINT [\"/app/svc\"]\n"));
    }

    #[test]
    fn test_layer_contains_only_the_executable() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = artifact_in(dir.path());
        // Toolchain leftovers in the work dir must not leak into the layer
        fs::create_dir_all(dir.path().join("target/release/deps")).unwrap();

        let layer =
            assemble_layer(artifact.clone(), dir.path(), "svc", &PackageSettings::default())
                .unwrap();

        assert_eq!(layer.root, dir.path().join("image"));
        assert!(layer.executable.same_contents(&artifact));
        assert_eq!(layer.image_path(), "/app/svc");
        assert!(!dir.path().join(".package.partial").exists());

        let mut entries: Vec<String> = walk(&layer.root)
            .into_iter()
            .map(|p| p.strip_prefix(&layer.root).unwrap().display().to_string())
            .collect();
        entries.sort();
        assert_eq!(entries, vec!["Containerfile", "rootfs/app/svc"]);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&layer.executable.path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }

        // The input artifact is untouched
        assert!(artifact.path.exists());
    }

    #[test]
    fn test_missing_artifact_leaves_no_layer() {
        let dir = tempfile::tempdir().unwrap();
        let mut artifact = artifact_in(dir.path());
        artifact.path = dir.path().join("gone");

        let err = assemble_layer(artifact, dir.path(), "svc", &PackageSettings::default())
            .unwrap_err();
        assert_eq!(err.stage(), StageKind::Package);
        assert!(!dir.path().join("image").exists());
        assert!(!dir.path().join(".package.partial").exists());
    }

    fn walk(dir: &Path) -> Vec<PathBuf> {
        let mut files = Vec::new();
        for entry in fs::read_dir(dir).unwrap() {
            let path = entry.unwrap().path();
            if path.is_dir() {
                files.extend(walk(&path));
            } else {
                files.push(path);
            }
        }
        files
    }
}
