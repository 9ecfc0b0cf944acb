//! Direct relay of a rendition that already carries its content.
//!
//! The first chunk is read before the relay is handed out, so a provider that
//! fails up front is reported as an error instead of a broken body. After
//! that, bytes are pulled from the provider only as the returned stream is
//! polled, so the caller's connection sets the pace. The job finishes when the
//! provider stream ends, fails on the first provider error, and is marked
//! abandoned if the stream is dropped early.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use mf_core::Error;
use mf_source::StreamSource;

use crate::job::{stage, JobState};
use crate::manager::JobHandle;
use crate::progress::TransferProgress;

/// An open relay, ready to be handed to a response body.
pub struct RelayStream {
    /// Provider-declared size, if any.
    pub total: Option<u64>,
    pub stream: BoxStream<'static, mf_core::Result<Bytes>>,
}

impl std::fmt::Debug for RelayStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayStream")
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

/// Opens relays under a job lease.
#[derive(Clone)]
pub struct DirectRelay {
    source: Arc<dyn StreamSource>,
    ceiling: Duration,
}

struct RelayState {
    chunks: BoxStream<'static, mf_core::Result<Bytes>>,
    /// Chunk read ahead by `open`, yielded before pulling again.
    first: Option<Bytes>,
    /// The provider stream already returned `None`.
    drained: bool,
    handle: Option<JobHandle>,
    progress: TransferProgress,
    deadline: Instant,
    cancel: CancellationToken,
}

impl DirectRelay {
    pub fn new(source: Arc<dyn StreamSource>, ceiling: Duration) -> Self {
        Self { source, ceiling }
    }

    /// Open the provider stream for `rendition_id` and wrap it so every
    /// chunk reports progress on `handle`'s job.
    ///
    /// # Errors
    ///
    /// The provider error if the stream cannot be opened or fails before its
    /// first chunk, or [`Error::ResourceExhausted`] if no chunk arrives within
    /// the ceiling. The job is failed before the error is returned.
    pub async fn open(
        &self,
        handle: JobHandle,
        source_url: &str,
        rendition_id: &str,
    ) -> mf_core::Result<RelayStream> {
        let job_id = handle.job_id();
        handle.update_progress(0.0, JobState::Fetching, stage::RELAY);

        let opened = match self.source.open_stream(source_url, rendition_id).await {
            Ok(s) => s,
            Err(e) => {
                handle.fail(&e);
                return Err(e);
            }
        };
        tracing::info!(job_id = %job_id, rendition = rendition_id, total = ?opened.total, "Relay opened");

        let mut state = RelayState {
            chunks: opened.chunks,
            first: None,
            drained: false,
            progress: TransferProgress::new(opened.total),
            deadline: Instant::now() + self.ceiling,
            cancel: handle.cancellation(),
            handle: None,
        };

        // Nothing is committed to the caller yet, so an early failure can
        // still become an error status.
        let early = match state.pull().await {
            Ok(Some(chunk)) => {
                state.first = Some(chunk);
                None
            }
            Ok(None) => {
                state.drained = true;
                state.shortfall()
            }
            Err(e) => Some(e),
        };
        if let Some(e) = early {
            handle.fail(&e);
            return Err(e);
        }
        state.handle = Some(handle);

        let stream = futures::stream::unfold(state, |mut st| async move {
            // The handle is gone once the job finished; that ends the body.
            let handle = st.handle.take()?;

            let next = match st.first.take() {
                Some(chunk) => Ok(Some(chunk)),
                None if st.drained => Ok(None),
                None => st.pull().await,
            };

            match next {
                Ok(Some(chunk)) => {
                    st.progress.advance(chunk.len());
                    handle.update_progress(
                        st.progress.fraction() * 100.0,
                        JobState::Fetching,
                        stage::RELAY,
                    );
                    st.handle = Some(handle);
                    Some((Ok(chunk), st))
                }
                Ok(None) => match st.shortfall() {
                    Some(err) => {
                        handle.fail(&err);
                        Some((Err(err), st))
                    }
                    None => {
                        tracing::debug!(
                            job_id = %handle.job_id(),
                            bytes = st.progress.transferred(),
                            "Relay finished"
                        );
                        handle.complete(None);
                        None
                    }
                },
                Err(e) => {
                    handle.fail(&e);
                    Some((Err(e), st))
                }
            }
        });

        Ok(RelayStream {
            total: opened.total,
            stream: stream.boxed(),
        })
    }
}

impl RelayState {
    /// Next provider chunk, bounded by the ceiling and the job's cancellation.
    async fn pull(&mut self) -> mf_core::Result<Option<Bytes>> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::ResourceExhausted(
                "relay was reclaimed while streaming".into(),
            )),
            res = tokio::time::timeout_at(self.deadline, self.chunks.next()) => match res {
                Ok(Some(Ok(chunk))) => Ok(Some(chunk)),
                Ok(Some(Err(e))) => Err(e.at_stage(stage::RELAY)),
                Ok(None) => Ok(None),
                Err(_) => Err(Error::ResourceExhausted(
                    "relay exceeded the execution ceiling".into(),
                )),
            },
        }
    }

    /// The error for a stream that ended short of its declared total.
    fn shortfall(&self) -> Option<Error> {
        let total = self.progress.total()?;
        let transferred = self.progress.transferred();
        (transferred < total).then(|| {
            Error::pipeline(
                stage::RELAY,
                format!("provider stream ended after {transferred} of {total} bytes"),
            )
        })
    }
}
