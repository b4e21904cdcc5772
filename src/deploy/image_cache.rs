use std::path::{Path, PathBuf};
use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::errors::DeployError;
use crate::models::{ImageReference, ImageTag};
use crate::platform::{is_not_found, Gcloud};
use crate::process::CommandRunner;

/// Build descriptor written into the context for remote builds. Never hashed,
/// so a leftover copy cannot change the tag.
pub const DESCRIPTOR_FILE_NAME: &str = ".cjr.Dockerfile";

/// Compute the content-addressed tag for a build context directory.
///
/// Files are visited in lexicographic order of their `/`-separated relative
/// paths; each contributes its path bytes, a NUL terminator, the content
/// length as a little-endian `u64`, then the content bytes. The framing keeps
/// bytes from moving between a name and a body without changing the tag.
pub fn hash_build_context(root: &Path) -> Result<ImageTag, DeployError> {
    if !root.is_dir() {
        return Err(DeployError::Setup(format!(
            "Build context is not a directory: {}",
            root.display()
        )));
    }

    let mut files = Vec::new();
    collect_files(root, root, &mut files).map_err(|e| {
        DeployError::Storage(format!("Failed to walk {}: {}", root.display(), e))
    })?;
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (relative, path) in &files {
        let content = std::fs::read(path).map_err(|e| {
            DeployError::Storage(format!("Failed to read {}: {}", path.display(), e))
        })?;
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update((content.len() as u64).to_le_bytes());
        hasher.update(&content);
    }

    let digest = hex::encode(hasher.finalize());
    tracing::debug!(
        "Hashed {} files in {}: {}",
        files.len(),
        root.display(),
        digest
    );
    Ok(ImageTag::from_digest(&digest))
}

fn collect_files(
    root: &Path,
    dir: &Path,
    out: &mut Vec<(String, PathBuf)>,
) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            collect_files(root, &path, out)?;
        } else if file_type.is_file() {
            if entry.file_name() == DESCRIPTOR_FILE_NAME {
                continue;
            }
            let relative = path
                .strip_prefix(root)
                .unwrap_or(&path)
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            out.push((relative, path));
        }
    }
    Ok(())
}

/// Registry lookups for content-addressed images.
pub struct ImageCache {
    runner: Arc<dyn CommandRunner>,
    gcloud: Gcloud,
}

impl ImageCache {
    pub fn new(runner: Arc<dyn CommandRunner>, gcloud: Gcloud) -> Self {
        Self { runner, gcloud }
    }

    /// Whether `image` is already present in the registry.
    ///
    /// A lookup that fails for any reason other than "not found" is an error
    /// unless `ignore_errors` is set, in which case it reads as absent.
    pub async fn exists(
        &self,
        image: &ImageReference,
        ignore_errors: bool,
    ) -> Result<bool, DeployError> {
        let cmd = self.gcloud.project_command([
            "artifacts".to_string(),
            "docker".to_string(),
            "images".to_string(),
            "describe".to_string(),
            image.to_string(),
            "--format=json".to_string(),
        ]);

        let failure = match self.runner.run(&cmd).await {
            Ok(output) if output.is_success() => return Ok(true),
            Ok(output) if is_not_found(&output) => return Ok(false),
            Ok(output) => format!(
                "registry lookup for {} exited with code {}: {}",
                image,
                output.code_display(),
                output.combined()
            ),
            Err(e) => format!("Failed to run {}: {}", self.gcloud.bin, e),
        };

        if ignore_errors {
            tracing::warn!("{}; treating image as absent", failure);
            Ok(false)
        } else {
            Err(DeployError::Registry(failure))
        }
    }
}
