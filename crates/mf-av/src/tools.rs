//! External tool detection and management.
//!
//! The [`ToolRegistry`] discovers and caches the locations of the external
//! CLI tools muxfetch shells out to (`ffmpeg` for muxing, `yt-dlp` for
//! metadata extraction) and provides lookup methods for the rest of the
//! workspace.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// An external program muxfetch shells out to.
#[derive(Debug, Clone, Copy)]
struct KnownTool {
    name: &'static str,
    /// Flag that prints the version banner on stdout.
    version_flag: &'static str,
}

const TOOLS: &[KnownTool] = &[
    KnownTool {
        name: "ffmpeg",
        version_flag: "-version",
    },
    KnownTool {
        name: "yt-dlp",
        version_flag: "--version",
    },
];

/// Known tool names that the registry manages.
pub fn known_tools() -> impl Iterator<Item = &'static str> {
    TOOLS.iter().map(|t| t.name)
}

fn override_for<'a>(config: &'a mf_core::config::ToolsConfig, name: &str) -> Option<&'a Path> {
    match name {
        "ffmpeg" => config.ffmpeg_path.as_deref(),
        "yt-dlp" => config.ytdlp_path.as_deref(),
        _ => None,
    }
}

/// A discovered external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    /// Human-readable tool name (e.g. "ffmpeg").
    pub name: String,
    /// Resolved path to the executable.
    pub path: PathBuf,
}

/// Availability information for a tool, returned by [`ToolRegistry::check_all`].
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ToolInfo {
    /// Tool name.
    pub name: String,
    /// Whether the tool was found.
    pub available: bool,
    /// Version string (first line of the version output), if available.
    pub version: Option<String>,
    /// Resolved path to the executable.
    #[schema(value_type = Option<String>)]
    pub path: Option<PathBuf>,
}

/// Registry holding discovered tool configurations.
#[derive(Debug, Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, ToolConfig>,
}

impl ToolRegistry {
    /// Discover tools by searching `PATH` (or using overrides from config).
    ///
    /// For each known tool, if the [`mf_core::config::ToolsConfig`] supplies a
    /// custom path **and** that path exists, it is used directly. Otherwise
    /// [`which::which`] is used to locate the tool in `PATH`. Tools that are
    /// not found are omitted from the registry.
    pub fn discover(tools_config: &mf_core::config::ToolsConfig) -> Self {
        let tools = known_tools()
            .filter_map(|name| {
                let path = override_for(tools_config, name)
                    .filter(|p| p.exists())
                    .map(Path::to_path_buf)
                    .or_else(|| which::which(name).ok());
                match &path {
                    Some(p) => tracing::debug!(tool = name, path = %p.display(), "Tool discovered"),
                    None => tracing::debug!(tool = name, "Tool not found"),
                }
                let path = path?;
                Some((name.to_string(), ToolConfig { name: name.to_string(), path }))
            })
            .collect();

        Self { tools }
    }

    /// Build a registry from explicit paths, bypassing discovery.
    pub fn from_paths(entries: impl IntoIterator<Item = (String, PathBuf)>) -> Self {
        let tools = entries
            .into_iter()
            .map(|(name, path)| (name.clone(), ToolConfig { name, path }))
            .collect();
        Self { tools }
    }

    /// Return a reference to the [`ToolConfig`] for the given tool, or an
    /// [`mf_core::Error::Tool`] if the tool was not found during discovery.
    pub fn require(&self, name: &str) -> mf_core::Result<&ToolConfig> {
        self.tools.get(name).ok_or_else(|| {
            mf_core::Error::tool(name, format!("{name} not found; is it installed and in PATH?"))
        })
    }

    /// Availability of every known tool, in a fixed order.
    pub fn check_all(&self) -> Vec<ToolInfo> {
        TOOLS
            .iter()
            .map(|tool| {
                let found = self.tools.get(tool.name);
                ToolInfo {
                    name: tool.name.to_string(),
                    available: found.is_some(),
                    version: found.and_then(|cfg| version_banner(&cfg.path, tool.version_flag)),
                    path: found.map(|cfg| cfg.path.clone()),
                }
            })
            .collect()
    }
}

/// First stdout line of `<path> <flag>`, if the program runs cleanly.
fn version_banner(path: &Path, flag: &str) -> Option<String> {
    let output = std::process::Command::new(path).arg(flag).output().ok()?;
    if !output.status.success() {
        return None;
    }
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .next()
        .map(str::to_string)
}
