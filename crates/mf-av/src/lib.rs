//! # mf-av
//!
//! External tool management and muxing for muxfetch.
//!
//! This crate provides:
//!
//! - **Tool discovery** ([`ToolRegistry`]) -- find and cache paths to ffmpeg
//!   and yt-dlp.
//! - **Command execution** ([`ToolCommand`]) -- async builder with timeout,
//!   cancellation, and streamed stderr for running external processes.
//! - **Workspace management** ([`Workspace`]) -- per-job temporary
//!   directories removed on drop.
//! - **Muxing** ([`Muxer`], [`FfmpegMuxer`]) -- combine a video-only and an
//!   audio-only track with a stream copy, reporting progress.

pub mod actions;
pub mod command;
pub mod tools;
pub mod workspace;

// ---- Re-exports for convenience ----

pub use actions::{validate_output, FfmpegMuxer, MuxProgressFn, MuxRequest, Muxer, ProgressParser};
pub use command::{ToolCommand, ToolOutput};
pub use tools::{ToolConfig, ToolInfo, ToolRegistry};
pub use workspace::Workspace;
