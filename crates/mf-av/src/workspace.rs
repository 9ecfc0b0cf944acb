//! Per-job scratch directories.
//!
//! A [`Workspace`] is a temporary directory holding the intermediate files of
//! one job (downloaded tracks, muxer output). The directory and everything
//! left in it are removed when the workspace is dropped, so a failed or
//! abandoned job cleans up after itself. Only [`Workspace::finalize`] moves a
//! file out before that happens.

use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Scratch space for a single job.
///
/// # Example
///
/// ```no_run
/// use mf_av::Workspace;
///
/// let ws = Workspace::new(std::path::Path::new("/tmp/muxfetch-work"), "job-1").unwrap();
/// let output = ws.temp_file("output.mp4");
/// // ... write output ...
/// ws.finalize(&output, std::path::Path::new("/tmp/muxfetch-artifacts/job-1.mp4")).unwrap();
/// ```
#[derive(Debug)]
pub struct Workspace {
    temp_dir: TempDir,
}

impl Workspace {
    /// Create a workspace directory under `parent`, named after `label`.
    ///
    /// `parent` is created if it does not exist yet.
    pub fn new(parent: &Path, label: &str) -> mf_core::Result<Self> {
        std::fs::create_dir_all(parent).map_err(|e| {
            mf_core::Error::tool(
                "workspace",
                format!("failed to create {}: {e}", parent.display()),
            )
        })?;

        let temp_dir = tempfile::Builder::new()
            .prefix(&format!("{label}-"))
            .tempdir_in(parent)
            .map_err(|e| mf_core::Error::tool("workspace", format!("failed to create temp dir: {e}")))?;

        tracing::debug!(path = %temp_dir.path().display(), "Workspace created");
        Ok(Self { temp_dir })
    }

    /// Path to the workspace directory.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Create a path for a named file inside the workspace.
    pub fn temp_file(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Move `output` (a file inside this workspace) to `dest`, then remove the
    /// workspace.
    ///
    /// Tries a rename first and falls back to copy + remove when `dest` is on
    /// another filesystem. Returns `dest`.
    pub fn finalize(self, output: &Path, dest: &Path) -> mf_core::Result<PathBuf> {
        if !output.exists() {
            return Err(mf_core::Error::tool(
                "workspace",
                format!("output file does not exist: {}", output.display()),
            ));
        }

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                mf_core::Error::tool(
                    "workspace",
                    format!("failed to create {}: {e}", parent.display()),
                )
            })?;
        }

        if std::fs::rename(output, dest).is_err() {
            copy_across(output, dest)?;
        }

        Ok(dest.to_path_buf())
    }
}

/// Copy `output` to `dest` and remove the source. A failed copy leaves no
/// partial file at `dest`.
fn copy_across(output: &Path, dest: &Path) -> mf_core::Result<()> {
    if let Err(e) = std::fs::copy(output, dest) {
        let _ = std::fs::remove_file(dest);
        return Err(mf_core::Error::tool(
            "workspace",
            format!("failed to copy output to destination: {e}"),
        ));
    }
    let _ = std::fs::remove_file(output);
    Ok(())
}
