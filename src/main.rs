mod cli;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use cli::{Cli, Commands};
use mf_av::{FfmpegMuxer, ToolRegistry};
use mf_core::config::Config;
use mf_core::DownloadKind;
use mf_jobs::{DownloadService, JobState, ProgressPoller};
use mf_source::YtDlpSource;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Respect RUST_LOG env var if set, otherwise use defaults based on verbose flag
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cli.verbose {
            "muxfetch=trace,mf_server=trace,mf_jobs=trace,mf_source=debug,mf_av=debug,tower_http=debug"
                .to_string()
        } else {
            "muxfetch=info,mf_server=info,mf_jobs=info,mf_source=info,mf_av=info,tower_http=info"
                .to_string()
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(&env_filter)
        .init();

    match cli.command {
        Commands::Start { host, port } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(start_server(host, port, cli.config.as_deref()))
        }
        Commands::Info { url, json } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(show_info(&url, json, cli.config.as_deref()))
        }
        Commands::Fetch { url, itag, output } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(fetch(&url, &itag, &output, cli.config.as_deref()))
        }
        Commands::CheckTools => check_tools(cli.config.as_deref()),
        Commands::Validate {
            config: config_path,
        } => {
            let path = config_path.or(cli.config);
            validate_config(path.as_deref())
        }
        Commands::Version => {
            println!("muxfetch {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn start_server(host: Option<String>, port: Option<u16>, config_path: Option<&Path>) -> Result<()> {
    let mut config = Config::load_or_default(config_path);
    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    tracing::info!(
        "Starting muxfetch on {}:{}",
        config.server.host,
        config.server.port
    );
    mf_server::start(config).await?;
    Ok(())
}

/// Build a local download service backed by yt-dlp and ffmpeg.
fn local_service(config: &Config) -> Result<DownloadService> {
    let tools = ToolRegistry::discover(&config.tools);
    let source = Arc::new(YtDlpSource::from_registry(&tools, &config.source)?);
    let muxer = Arc::new(FfmpegMuxer::from_registry(&tools)?);
    Ok(DownloadService::build(source, muxer, &config.jobs))
}

async fn show_info(url: &str, json: bool, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load_or_default(config_path);
    let service = local_service(&config)?;
    let catalog = service.catalog(url).await?;

    if json {
        let value = serde_json::json!({
            "title": catalog.title,
            "filename": catalog.filename,
            "duration": catalog.duration_seconds,
            "thumbnail": catalog.thumbnail_url,
            "renditions": catalog.renditions,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    println!("Title: {}", catalog.title);
    if let Some(duration) = catalog.duration_seconds {
        println!("Duration: {duration:.0}s");
    }
    println!("Filename: {}", catalog.filename);
    println!("\nRenditions:");
    for r in &catalog.renditions {
        let tracks = match (r.has_video, r.has_audio) {
            (true, true) => "video+audio",
            (true, false) => "video only",
            (false, true) => "audio only",
            (false, false) => "no tracks",
        };
        print!("  {:>5}  {:<5} {:<10} {tracks}", r.id, r.container, r.quality);
        if let Some(size) = r.filesize {
            print!("  {:.1} MiB", size as f64 / (1024.0 * 1024.0));
        }
        println!();
    }
    Ok(())
}

async fn fetch(url: &str, itag: &str, output: &Path, config_path: Option<&Path>) -> Result<()> {
    let config = Config::load_or_default(config_path);
    let service = local_service(&config)?;
    tokio::fs::create_dir_all(output)
        .await
        .with_context(|| format!("creating {}", output.display()))?;

    let outcome = service.probe(url, itag).await?;
    let dest = output.join(&outcome.filename);

    match (outcome.kind, outcome.job_id) {
        (DownloadKind::Mux, Some(job_id)) => {
            service.start(job_id, None, None)?;

            let cancel = CancellationToken::new();
            let on_ctrl_c = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_ctrl_c.cancel();
                }
            });

            let poller = ProgressPoller::new(
                Arc::clone(service.manager()),
                job_id,
                config.progress.poll_interval(),
                config.progress.max_wait(),
                cancel,
            );
            let job = poller
                .wait(|job| eprint!("\r{:>5.1}%  {:<12}", job.percentage, job.stage))
                .await?;
            eprintln!();

            if job.state != JobState::Completed {
                anyhow::bail!(
                    "download failed at {}: {}",
                    job.stage,
                    job.error.unwrap_or_else(|| "unknown error".into())
                );
            }

            let artifact = service.retrieve(job_id).await?;
            write_stream(&dest, artifact.into_stream().map(|c| c.map_err(anyhow::Error::from))).await?;
        }
        _ => {
            let direct = service.stream_direct(url, itag).await?;
            let total = direct.total;
            let mut written = 0u64;
            let stream = direct.stream.map(move |chunk| {
                if let Ok(bytes) = &chunk {
                    written += bytes.len() as u64;
                    match total {
                        Some(total) => eprint!("\r{written}/{total} bytes"),
                        None => eprint!("\r{written} bytes"),
                    }
                }
                chunk.map_err(anyhow::Error::from)
            });
            write_stream(&dest, stream).await?;
            eprintln!();
        }
    }

    println!("Saved {}", dest.display());
    Ok(())
}

/// Writes `stream` to `dest`, removing the file again if the stream fails.
async fn write_stream<S>(dest: &Path, stream: S) -> Result<()>
where
    S: futures::Stream<Item = Result<bytes::Bytes>> + Unpin,
{
    let result = copy_to_file(dest, stream).await;
    if result.is_err() {
        let _ = tokio::fs::remove_file(dest).await;
    }
    result
}

async fn copy_to_file<S>(dest: &Path, mut stream: S) -> Result<()>
where
    S: futures::Stream<Item = Result<bytes::Bytes>> + Unpin,
{
    let mut file = tokio::fs::File::create(dest)
        .await
        .with_context(|| format!("creating {}", dest.display()))?;
    while let Some(chunk) = stream.next().await {
        file.write_all(&chunk?).await?;
    }
    file.flush().await?;
    Ok(())
}

fn check_tools(config_path: Option<&Path>) -> Result<()> {
    println!("Checking external tools...\n");

    let config = Config::load_or_default(config_path);
    let tools = ToolRegistry::discover(&config.tools).check_all();
    let mut all_ok = true;

    for tool in &tools {
        let status = if tool.available {
            "✓"
        } else {
            all_ok = false;
            "✗"
        };

        print!("{} {}", status, tool.name);
        if let Some(ref version) = tool.version {
            print!(" ({version})");
        }
        if let Some(ref path) = tool.path {
            print!(" - {}", path.display());
        }
        println!();
    }

    println!();
    if all_ok {
        println!("All required tools are available!");
    } else {
        println!("Some tools are missing. Both yt-dlp and ffmpeg are required.");
    }

    Ok(())
}

fn validate_config(path: Option<&Path>) -> Result<()> {
    match path {
        Some(p) => {
            println!("Validating config: {}", p.display());
            let contents = std::fs::read_to_string(p)
                .with_context(|| format!("reading {}", p.display()))?;
            let config = Config::from_json(&contents)?;
            let warnings = config.validate();
            if warnings.is_empty() {
                println!("✓ Configuration is valid");
            } else {
                println!("Configuration parsed with warnings:");
                for w in &warnings {
                    println!("  - {w}");
                }
            }
            println!("  Server: {}:{}", config.server.host, config.server.port);
            println!("  Retention: {}s", config.jobs.retention_secs);
            println!("  Artifact policy: {:?}", config.jobs.artifact_policy);
        }
        None => {
            println!("No config file specified, using defaults");
            let config = Config::default();
            println!("Default config:");
            println!("  Server: {}:{}", config.server.host, config.server.port);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[tokio::test]
    async fn write_stream_saves_every_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.m4a");
        let chunks = futures::stream::iter([Ok(Bytes::from_static(b"ab")), Ok(Bytes::from_static(b"cd"))]);
        write_stream(&dest, chunks).await.unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"abcd");
    }

    #[tokio::test]
    async fn failed_fetch_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.m4a");
        let chunks = futures::stream::iter([
            Ok(Bytes::from_static(b"partial")),
            Err(anyhow::anyhow!("connection reset")),
        ]);
        let err = write_stream(&dest, chunks).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert!(!dest.exists());
    }
}
