//! Job lifecycle integration tests.
//!
//! Drives the [`DownloadService`](mf_jobs::DownloadService) directly (no
//! HTTP) and follows jobs with [`ProgressPoller`].

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use common::{body_for, TestHarness, VIDEO_URL};
use mf_core::config::{ArtifactPolicy, Config};
use mf_core::DownloadKind;
use mf_jobs::{JobState, ProgressPoller};

fn poller(harness: &TestHarness, id: mf_core::JobId, cancel: CancellationToken) -> ProgressPoller {
    ProgressPoller::new(
        Arc::clone(harness.ctx.jobs()),
        id,
        Duration::from_millis(5),
        Duration::from_secs(10),
        cancel,
    )
}

#[tokio::test]
async fn probe_routes_by_tracks() {
    let harness = TestHarness::new();
    let svc = harness.downloads();

    let audio = svc.probe(VIDEO_URL, "140").await.unwrap();
    assert_eq!(audio.kind, DownloadKind::Direct);
    assert!(audio.job_id.is_none());
    assert_eq!(audio.filename, "Never-Gonna-Give-You-Up-Official-Video.m4a");

    let combined = svc.probe(VIDEO_URL, "18").await.unwrap();
    assert_eq!(combined.kind, DownloadKind::Direct);

    let video = svc.probe(VIDEO_URL, "299").await.unwrap();
    assert_eq!(video.kind, DownloadKind::Mux);
    let id = video.job_id.unwrap();
    let job = svc.progress(id).unwrap();
    assert_eq!(job.state, JobState::Starting);
    assert_eq!(job.audio_rendition.unwrap().id, "140");
    assert_eq!(job.filename, "Never-Gonna-Give-You-Up-Official-Video.mp4");
}

#[tokio::test]
async fn poller_follows_mux_job_to_completion() {
    let harness = TestHarness::new();
    let svc = harness.downloads();
    let id = svc.probe(VIDEO_URL, "299").await.unwrap().job_id.unwrap();
    svc.start(id, Some(VIDEO_URL), Some("299")).unwrap();

    let mut seen = Vec::new();
    let done = poller(&harness, id, CancellationToken::new())
        .wait(|job| seen.push((job.state, job.percentage, job.stage.clone())))
        .await
        .unwrap();

    assert_eq!(done.state, JobState::Completed);
    assert_eq!(done.percentage, 100.0);
    assert!(seen.windows(2).all(|w| w[0].1 <= w[1].1));
    assert!(seen
        .iter()
        .all(|(state, pct, _)| (*pct == 100.0) == (*state == JobState::Completed)));

    let artifact = svc.retrieve(id).await.unwrap();
    assert_eq!(artifact.filename, "Never-Gonna-Give-You-Up-Official-Video.mp4");
    assert_eq!(artifact.content_type, "video/mp4");
    assert!(svc.retrieve(id).await.is_err());
}

#[tokio::test]
async fn starting_unknown_job_is_input_error() {
    let harness = TestHarness::new();
    let err = harness
        .downloads()
        .start(mf_core::JobId::new(), None, None)
        .unwrap_err();
    assert!(matches!(err, mf_core::Error::Validation(_)));
    assert_eq!(err.http_status(), 400);
    assert_eq!(harness.muxer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn poller_stops_on_cancel() {
    let harness = TestHarness::new();
    let id = harness
        .downloads()
        .probe(VIDEO_URL, "299")
        .await
        .unwrap()
        .job_id
        .unwrap();

    // Never started, so the job stays `starting` until the poller is cancelled.
    let cancel = CancellationToken::new();
    let mut p = poller(&harness, id, cancel.clone());
    assert_eq!(p.next().await.unwrap().unwrap().state, JobState::Starting);
    cancel.cancel();
    assert!(p.next().await.is_none());
}

#[tokio::test]
async fn poller_gives_up_after_max_wait() {
    let harness = TestHarness::new();
    let id = harness
        .downloads()
        .probe(VIDEO_URL, "299")
        .await
        .unwrap()
        .job_id
        .unwrap();

    let p = ProgressPoller::new(
        Arc::clone(harness.ctx.jobs()),
        id,
        Duration::from_millis(5),
        Duration::from_millis(30),
        CancellationToken::new(),
    );
    let err = p.wait(|_| {}).await.unwrap_err();
    assert_eq!(err.http_status(), 503);
}

#[tokio::test]
async fn poller_reports_missing_job() {
    let harness = TestHarness::new();
    let mut p = poller(&harness, mf_core::JobId::new(), CancellationToken::new());
    assert_eq!(p.next().await.unwrap().unwrap_err().http_status(), 404);
    assert!(p.next().await.is_none());
}

#[tokio::test]
async fn direct_stream_completes_job_after_last_chunk() {
    let harness = TestHarness::new();
    let svc = harness.downloads();

    let direct = svc.stream_direct(VIDEO_URL, "140").await.unwrap();
    assert_eq!(direct.total, Some(4096));
    assert_eq!(direct.content_type, "audio/mp4");
    let id = direct.job_id;

    let mut body = Vec::new();
    let mut stream = direct.stream;
    while let Some(chunk) = stream.next().await {
        let pct = svc.progress(id).unwrap().percentage;
        assert!(pct < 100.0);
        body.extend_from_slice(&chunk.unwrap());
    }
    assert_eq!(body, body_for("140"));
    assert_eq!(svc.progress(id).unwrap().state, JobState::Completed);
}

#[tokio::test]
async fn abandoned_direct_stream_fails_job() {
    let harness = TestHarness::new();
    let svc = harness.downloads();

    let direct = svc.stream_direct(VIDEO_URL, "140").await.unwrap();
    let id = direct.job_id;
    let mut stream = direct.stream;
    stream.next().await.unwrap().unwrap();
    drop(stream);

    let job = svc.progress(id).unwrap();
    assert_eq!(job.state, JobState::Error);
    assert_eq!(job.stage, "relay");
}

#[tokio::test]
async fn stream_direct_refuses_mux_renditions() {
    let harness = TestHarness::new();
    let err = harness
        .downloads()
        .stream_direct(VIDEO_URL, "299")
        .await
        .unwrap_err();
    assert_eq!(err.http_status(), 400);
    assert_eq!(harness.source.stream_opens.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn ttl_policy_allows_repeated_retrieval() {
    let mut config = Config::default();
    config.jobs.artifact_policy = ArtifactPolicy::Ttl;
    let harness = TestHarness::with_config(config);
    let svc = harness.downloads();

    let id = svc.probe(VIDEO_URL, "299").await.unwrap().job_id.unwrap();
    svc.start(id, None, None).unwrap();
    let job = harness.wait_for(id).await.pop().unwrap();
    assert_eq!(job.state, JobState::Completed);

    assert!(svc.retrieve(id).await.is_ok());
    assert!(svc.retrieve(id).await.is_ok());

    harness.ctx.jobs().sweep();
    assert!(svc.retrieve(id).await.is_ok(), "recent jobs survive the sweep");
}

#[tokio::test]
async fn execution_ceiling_fails_slow_job() {
    let mut config = Config::default();
    config.jobs.execution_timeout_secs = 0;
    let harness = TestHarness::with_config(config);
    let svc = harness.downloads();

    let id = svc.probe(VIDEO_URL, "299").await.unwrap().job_id.unwrap();
    svc.start(id, None, None).unwrap();

    let job = harness.wait_for(id).await.pop().unwrap();
    assert_eq!(job.state, JobState::Error);
    assert!(job.error.unwrap().contains("exceeded"));
    assert_eq!(harness.muxer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn sweep_cancels_running_job() {
    let mut config = Config::default();
    config.jobs.retention_secs = 0;
    let harness = TestHarness::with_config(config);
    let svc = harness.downloads();

    let id = svc.probe(VIDEO_URL, "299").await.unwrap().job_id.unwrap();
    svc.start(id, None, None).unwrap();
    assert_eq!(harness.ctx.jobs().sweep(), 1);
    assert_eq!(svc.progress(id).unwrap_err().http_status(), 404);

    // The reclaimed run winds down without recreating the job.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(harness.ctx.jobs().is_empty());
    let leftovers = std::fs::read_dir(harness.artifact_dir()).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
}
