//! End-to-end download flows over HTTP.
//!
//! Covers direct relay of an audio rendition, the probe/start/poll/retrieve
//! flow of a muxed rendition, and retention of finished jobs.

mod common;

use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::Duration;

use common::{body_for, download_query, TestHarness};
use mf_core::config::Config;

async fn probe(addr: SocketAddr, itag: &str) -> reqwest::Response {
    reqwest::Client::new()
        .head(format!("http://{addr}/api/download"))
        .query(&download_query(itag, None))
        .send()
        .await
        .unwrap()
}

async fn probe_id(addr: SocketAddr, itag: &str) -> String {
    let resp = probe(addr, itag).await;
    assert_eq!(resp.status(), 200);
    resp.headers()["x-download-id"].to_str().unwrap().to_string()
}

async fn start(addr: SocketAddr, itag: &str, id: &str) -> reqwest::Response {
    reqwest::Client::new()
        .get(format!("http://{addr}/api/download"))
        .query(&download_query(itag, Some(id)))
        .send()
        .await
        .unwrap()
}

async fn progress(addr: SocketAddr, id: &str) -> reqwest::Response {
    reqwest::get(format!("http://{addr}/api/progress/{id}")).await.unwrap()
}

/// Poll progress until terminal, returning every body seen.
async fn poll_until_done(addr: SocketAddr, id: &str) -> Vec<serde_json::Value> {
    let mut seen = Vec::new();
    for _ in 0..500 {
        let json: serde_json::Value = progress(addr, id).await.json().await.unwrap();
        let status = json["status"].as_str().unwrap().to_string();
        seen.push(json);
        if status == "completed" || status == "error" {
            return seen;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("download {id} never finished");
}

// ---------------------------------------------------------------------------
// Scenario A: direct relay
// ---------------------------------------------------------------------------

#[tokio::test]
async fn direct_audio_download_streams_bytes() {
    let (harness, addr) = TestHarness::with_server().await;

    // Probing a direct rendition allocates nothing.
    let head = probe(addr, "140").await;
    assert_eq!(head.status(), 200);
    assert!(head.headers().get("x-download-id").is_none());
    assert_eq!(head.headers()["x-download-kind"], "direct");
    assert!(harness.ctx.jobs().is_empty());

    let resp = reqwest::Client::new()
        .get(format!("http://{addr}/api/download"))
        .query(&download_query("140", None))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "audio/mp4");
    let disposition = resp.headers()["content-disposition"].to_str().unwrap().to_string();
    assert!(disposition.starts_with("attachment; filename=\"Never-Gonna-Give-You-Up-Official-Video.m4a\""));
    assert!(disposition.contains("filename*=UTF-8''"));
    let id = resp.headers()["x-download-id"].to_str().unwrap().to_string();

    let body = resp.bytes().await.unwrap();
    assert_eq!(&body[..], &body_for("140")[..]);

    // Completion is recorded once the body has been fully pulled.
    let seen = poll_until_done(addr, &id).await;
    let last = seen.last().unwrap();
    assert_eq!(last["status"], "completed");
    assert_eq!(last["percentage"], 100.0);
    assert_eq!(last["downloadId"], id);

    // Direct downloads leave no artifact behind.
    let resp = reqwest::get(format!("http://{addr}/api/download-file/{id}")).await.unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(harness.muxer.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn combined_rendition_is_direct() {
    let (_harness, addr) = TestHarness::with_server().await;
    let resp = reqwest::Client::new()
        .get(format!("http://{addr}/api/download"))
        .query(&download_query("18", None))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "video/mp4");
    assert_eq!(&resp.bytes().await.unwrap()[..], &body_for("18")[..]);
}

#[tokio::test]
async fn direct_provider_failure_before_bytes_is_500() {
    let (harness, addr) = TestHarness::with_server().await;
    harness.source.fail_streams.store(true, Ordering::SeqCst);

    let resp = reqwest::Client::new()
        .get(format!("http://{addr}/api/download"))
        .query(&download_query("140", None))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);

    let jobs = harness.ctx.jobs().list();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].state, mf_jobs::JobState::Error);
}

#[tokio::test]
async fn direct_failure_on_first_read_is_500() {
    let (harness, addr) = TestHarness::with_server().await;
    harness.source.fail_first_chunk.store(true, Ordering::SeqCst);

    let resp = reqwest::Client::new()
        .get(format!("http://{addr}/api/download"))
        .query(&download_query("140", None))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 500);
    assert!(resp.headers().get("content-disposition").is_none());
    let json: serde_json::Value = resp.json().await.unwrap();
    assert!(json["error"].as_str().unwrap().contains("403"));

    let jobs = harness.ctx.jobs().list();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].state, mf_jobs::JobState::Error);
    assert_eq!(jobs[0].stage, "relay");
}

// ---------------------------------------------------------------------------
// Scenario B: mux
// ---------------------------------------------------------------------------

#[tokio::test]
async fn mux_download_progresses_and_is_retrieved_once() {
    let (harness, addr) = TestHarness::with_server().await;

    let head = probe(addr, "299").await;
    assert_eq!(head.status(), 200);
    assert_eq!(head.headers()["x-download-kind"], "mux");
    let id = head.headers()["x-download-id"].to_str().unwrap().to_string();

    // Allocated but not started.
    let json: serde_json::Value = progress(addr, &id).await.json().await.unwrap();
    assert_eq!(json["status"], "starting");
    assert_eq!(json["percentage"], 0.0);

    let resp = start(addr, "299", &id).await;
    assert_eq!(resp.status(), 202);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["downloadId"], id);

    let seen = poll_until_done(addr, &id).await;
    let percentages: Vec<f64> = seen.iter().map(|j| j["percentage"].as_f64().unwrap()).collect();
    assert!(
        percentages.windows(2).all(|w| w[0] <= w[1]),
        "progress went backwards: {percentages:?}"
    );
    for json in &seen {
        let pct = json["percentage"].as_f64().unwrap();
        assert_eq!(pct == 100.0, json["status"] == "completed", "{json}");
    }
    let statuses: Vec<&str> = seen.iter().map(|j| j["status"].as_str().unwrap()).collect();
    assert!(statuses.contains(&"muxing"), "{statuses:?}");
    assert_eq!(*statuses.last().unwrap(), "completed");

    let resp = reqwest::get(format!("http://{addr}/api/download-file/{id}")).await.unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.headers()["content-type"], "video/mp4");
    let disposition = resp.headers()["content-disposition"].to_str().unwrap().to_string();
    assert!(disposition.contains("Never-Gonna-Give-You-Up-Official-Video.mp4"));
    let body = resp.bytes().await.unwrap();
    assert_eq!(&body[4..8], b"ftyp");
    let mut expected = body_for("299");
    expected.extend(body_for("140"));
    assert!(body.ends_with(&expected));

    // Single use.
    let resp = reqwest::get(format!("http://{addr}/api/download-file/{id}")).await.unwrap();
    assert_eq!(resp.status(), 404);
    assert_eq!(harness.muxer.calls.load(Ordering::SeqCst), 1);

    // No scratch space left behind.
    let leftovers = std::fs::read_dir(harness.work_dir()).map(|d| d.count()).unwrap_or(0);
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn webm_video_muxes_with_webm_audio() {
    let (_harness, addr) = TestHarness::with_server().await;
    let id = probe_id(addr, "248").await;
    assert_eq!(start(addr, "248", &id).await.status(), 202);
    assert_eq!(poll_until_done(addr, &id).await.last().unwrap()["status"], "completed");

    let resp = reqwest::get(format!("http://{addr}/api/download-file/{id}")).await.unwrap();
    assert_eq!(resp.headers()["content-type"], "video/webm");
    let body = resp.bytes().await.unwrap();
    assert!(body.ends_with(&body_for("251")));
}

#[tokio::test]
async fn starting_twice_runs_muxer_once() {
    let (harness, addr) = TestHarness::with_server().await;
    let id = probe_id(addr, "299").await;

    assert_eq!(start(addr, "299", &id).await.status(), 202);
    assert_eq!(start(addr, "299", &id).await.status(), 400);
    poll_until_done(addr, &id).await;
    assert_eq!(start(addr, "299", &id).await.status(), 400);

    assert_eq!(harness.muxer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn probes_yield_distinct_ids() {
    let (harness, addr) = TestHarness::with_server().await;
    let a = probe_id(addr, "299").await;
    let b = probe_id(addr, "299").await;
    assert_ne!(a, b);
    assert_eq!(harness.ctx.jobs().len(), 2);
}

#[tokio::test]
async fn mux_rendition_without_probe_is_rejected() {
    let (harness, addr) = TestHarness::with_server().await;
    let resp = reqwest::Client::new()
        .get(format!("http://{addr}/api/download"))
        .query(&download_query("299", None))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    assert!(harness.ctx.jobs().is_empty());
}

#[tokio::test]
async fn start_rejects_mismatched_or_unknown_ids() {
    let (_harness, addr) = TestHarness::with_server().await;
    let id = probe_id(addr, "299").await;

    assert_eq!(start(addr, "248", &id).await.status(), 400);
    assert_eq!(
        start(addr, "299", &mf_core::JobId::new().to_string()).await.status(),
        400
    );
    assert_eq!(start(addr, "299", "not-an-id").await.status(), 400);

    // The mismatch did not consume the job.
    assert_eq!(start(addr, "299", &id).await.status(), 202);
}

#[tokio::test]
async fn unknown_rendition_is_400() {
    let (_harness, addr) = TestHarness::with_server().await;
    assert_eq!(probe(addr, "9999").await.status(), 400);
}

#[tokio::test]
async fn mux_failure_is_reported_with_stage() {
    let (harness, addr) = TestHarness::with_server().await;
    harness.muxer.fail.store(true, Ordering::SeqCst);

    let id = probe_id(addr, "299").await;
    assert_eq!(start(addr, "299", &id).await.status(), 202);

    let last = poll_until_done(addr, &id).await.pop().unwrap();
    assert_eq!(last["status"], "error");
    assert_eq!(last["stage"], "mux");
    assert!(last["error"].as_str().unwrap().contains("ffmpeg"));
    assert!(last["percentage"].as_f64().unwrap() < 100.0);

    let resp = reqwest::get(format!("http://{addr}/api/download-file/{id}")).await.unwrap();
    assert_eq!(resp.status(), 404);
}

// ---------------------------------------------------------------------------
// Scenario C: retention
// ---------------------------------------------------------------------------

#[tokio::test]
async fn swept_jobs_are_not_found() {
    let mut config = Config::default();
    config.jobs.retention_secs = 0;
    let (harness, addr) = TestHarness::with_server_config(config).await;

    let id = probe_id(addr, "299").await;
    assert_eq!(start(addr, "299", &id).await.status(), 202);
    assert_eq!(poll_until_done(addr, &id).await.last().unwrap()["status"], "completed");

    assert!(harness.ctx.jobs().sweep() >= 1);

    assert_eq!(progress(addr, &id).await.status(), 404);
    let resp = reqwest::get(format!("http://{addr}/api/download-file/{id}")).await.unwrap();
    assert_eq!(resp.status(), 404);

    // The artifact file is gone with the record.
    let remaining = std::fs::read_dir(harness.artifact_dir()).map(|d| d.count()).unwrap_or(0);
    assert_eq!(remaining, 0);
}
