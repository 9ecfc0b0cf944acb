//! mf-jobs: download job lifecycle and delivery.
//!
//! - [`JobManager`] -- job registry, exclusive execution leases, retention.
//! - [`MuxPipeline`] -- fetch video, fetch audio, mux, register artifact.
//! - [`DirectRelay`] -- stream a complete rendition straight through.
//! - [`ArtifactStore`] -- finished outputs awaiting retrieval.
//! - [`ProgressPoller`] -- bounded, cancellable progress polling.
//! - [`DownloadService`] -- the operations the server and CLI call.

pub mod artifact;
pub mod job;
pub mod manager;
pub mod mux;
pub mod progress;
pub mod relay;
pub mod service;
pub mod sweeper;

pub use artifact::{ArtifactPayload, ArtifactStore, RetrievedArtifact};
pub use job::{stage, DownloadJob, JobState, NewJob, MAX_ACTIVE_PERCENTAGE};
pub use manager::{JobCounts, JobHandle, JobManager, ProgressReporter};
pub use mux::{MuxPipeline, MuxPlan};
pub use progress::{within_band, ProgressPoller, TransferProgress};
pub use relay::{DirectRelay, RelayStream};
pub use service::{DirectDownload, DownloadService, ProbeOutcome};
pub use sweeper::run_retention_sweeper;
