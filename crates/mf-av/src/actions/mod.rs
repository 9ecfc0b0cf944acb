//! Media actions built on external tools.

mod mux;

pub use mux::{validate_output, FfmpegMuxer, MuxProgressFn, MuxRequest, Muxer, ProgressParser};
