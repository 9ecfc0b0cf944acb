//! Application configuration types.
//!
//! The top-level [`Config`] struct is deserialized from JSON and carries all
//! sub-configs for the server, external tools, job lifecycle, stream source,
//! and progress polling. Every section defaults sensibly so a completely
//! empty `{}` file is valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::Result;
use crate::Error;

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub tools: ToolsConfig,
    pub jobs: JobsConfig,
    pub source: SourceConfig,
    pub progress: ProgressConfig,
}

impl Config {
    /// Deserialize a `Config` from a JSON string.
    pub fn from_json(json_str: &str) -> Result<Self> {
        serde_json::from_str(json_str)
            .map_err(|e| Error::Validation(format!("config parse error: {e}")))
    }

    /// Load configuration from a file path, falling back to defaults if the
    /// path is `None` or the file does not exist.
    pub fn load_or_default(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_json(&contents).unwrap_or_else(|e| {
                tracing::warn!("Failed to parse config file {}: {e}", path.display());
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No config file at {}; using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                tracing::warn!("Failed to read config file {}: {e}", path.display());
                Self::default()
            }
        }
    }

    /// Return a list of validation warnings (non-fatal issues).
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.server.port == 0 {
            warnings.push("server.port is 0; a random port will be assigned".into());
        }

        if self.jobs.retention_secs == 0 {
            warnings.push("jobs.retention_secs is 0; jobs are reclaimed on every sweep".into());
        }

        if self.jobs.sweep_interval_secs == 0 {
            warnings.push("jobs.sweep_interval_secs is 0; falling back to 1 second".into());
        }

        if self.jobs.execution_timeout_secs > self.jobs.retention_secs {
            warnings.push(format!(
                "jobs.execution_timeout_secs ({}) exceeds jobs.retention_secs ({}); \
                 long jobs may be reclaimed while running",
                self.jobs.execution_timeout_secs, self.jobs.retention_secs
            ));
        }

        if self.progress.poll_interval_ms == 0 {
            warnings.push("progress.poll_interval_ms is 0; falling back to 100 ms".into());
        }

        for (name, path) in [
            ("tools.ffmpeg_path", &self.tools.ffmpeg_path),
            ("tools.ytdlp_path", &self.tools.ytdlp_path),
        ] {
            if let Some(p) = path {
                if !p.exists() {
                    warnings.push(format!(
                        "{name} {} does not exist; falling back to PATH lookup",
                        p.display()
                    ));
                }
            }
        }

        warnings
    }
}

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 4000,
        }
    }
}

/// Paths to external CLI tools.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub ffmpeg_path: Option<PathBuf>,
    pub ytdlp_path: Option<PathBuf>,
}

/// What happens to an artifact once it has been retrieved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactPolicy {
    /// The first successful retrieval consumes and deletes the artifact.
    #[default]
    SingleUse,
    /// Retrieval is repeatable until the retention sweep reclaims the job.
    Ttl,
}

/// Job lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Jobs (and their artifacts) older than this are reclaimed.
    pub retention_secs: u64,
    /// How often the retention sweep runs.
    pub sweep_interval_secs: u64,
    /// Wall-clock ceiling for a single job execution.
    pub execution_timeout_secs: u64,
    /// Parent directory for per-job scratch space (system temp dir if unset).
    pub work_dir: Option<PathBuf>,
    /// Directory holding finished artifacts (system temp dir if unset).
    pub artifact_dir: Option<PathBuf>,
    pub artifact_policy: ArtifactPolicy,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            retention_secs: 3600,
            sweep_interval_secs: 60,
            execution_timeout_secs: 1800,
            work_dir: None,
            artifact_dir: None,
            artifact_policy: ArtifactPolicy::SingleUse,
        }
    }
}

impl JobsConfig {
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_secs)
    }

    /// Resolved scratch directory.
    pub fn work_dir(&self) -> PathBuf {
        self.work_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("muxfetch-work"))
    }

    /// Resolved artifact directory.
    pub fn artifact_dir(&self) -> PathBuf {
        self.artifact_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("muxfetch-artifacts"))
    }
}

/// Stream source settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Timeout for a single metadata extraction.
    pub metadata_timeout_secs: u64,
    /// How long extracted metadata is reused for stream opens.
    pub metadata_cache_secs: u64,
    /// User agent for stream fetches when the provider supplies none.
    pub user_agent: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            metadata_timeout_secs: 60,
            metadata_cache_secs: 300,
            user_agent: format!("muxfetch/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Client-side progress polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    pub poll_interval_ms: u64,
    /// Upper bound on how long a poller keeps waiting for a terminal state.
    pub max_wait_secs: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            max_wait_secs: 3600,
        }
    }
}

impl ProgressConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(100))
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }
}
