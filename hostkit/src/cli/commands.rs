//! CLI command execution.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use hostkit::archive::Archives;
use hostkit::config::Config;
use hostkit::events::{Lifecycle, Progress};
use hostkit::host::{Host, ShellHost};
use hostkit::network::Downloader;
use hostkit::process::{ProcessHandle, RunOptions};
use hostkit::ticker::{Ticker, TokioTicker};

use super::args::{Cli, Commands};

/// Render one progress sample as a status line.
fn progress_line(label: &str, progress: Progress) -> String {
    match progress.fraction() {
        Some(fraction) => format!(
            "{label}: {} / {} bytes ({:.1}%)",
            progress.current,
            progress.total.unwrap_or_default(),
            fraction * 100.0
        ),
        None => format!("{label}: {} bytes", progress.current),
    }
}

fn print_progress(label: &'static str) -> impl FnMut(Progress) + Send + 'static {
    move |progress| println!("{}", progress_line(label, progress))
}

/// Execute a parsed command line.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = Config::load_or_default(cli.config.as_deref()).context("Failed to load config")?;
    let host: Arc<dyn Host> = Arc::new(ShellHost::new());
    let ticker: Arc<dyn Ticker> = Arc::new(TokioTicker);

    match cli.command {
        Commands::Download { url, output } => download(host, ticker, &config, &url, output).await,
        Commands::Info { archive } => show_info(host, ticker, &config, &archive).await,
        Commands::Extract { archive, dir } => extract(host, ticker, &config, archive, dir).await,
        Commands::Run { command, cwd } => run(host, ticker, &config, &command.join(" "), cwd).await,
    }
}

async fn download(
    host: Arc<dyn Host>,
    ticker: Arc<dyn Ticker>,
    config: &Config,
    url: &str,
    output: Option<PathBuf>,
) -> Result<()> {
    let downloader = Downloader::new(host, ticker, config.download.clone());
    let stream = downloader.download(url, output).await;

    if stream.total().is_none() {
        warn!("server did not report a size; press Ctrl-C once the transfer is done");
    }
    stream.progress(print_progress("download"));

    tokio::select! {
        state = stream.wait() => {
            if let Some(err) = stream_failure(state, || stream.error_reason().map(|e| e.to_string())) {
                bail!(err);
            }
            println!("Saved {}", stream.output().display());
        }
        _ = tokio::signal::ctrl_c() => {
            stream.pause().await;
            println!("Paused; run the same command again to resume {}", stream.output().display());
        }
    }

    downloader.close_streams(false).await;
    Ok(())
}

fn stream_failure(state: Lifecycle, reason: impl FnOnce() -> Option<String>) -> Option<String> {
    (state == Lifecycle::Errored)
        .then(|| reason().unwrap_or_else(|| "stream failed".to_string()))
}

async fn show_info(
    host: Arc<dyn Host>,
    ticker: Arc<dyn Ticker>,
    config: &Config,
    archive: &Path,
) -> Result<()> {
    let archives = Archives::new(host, ticker, config.extract.clone());
    let Some(manifest) = archives.info(archive).await? else {
        bail!("Unsupported archive type: {}", archive.display());
    };

    let json = serde_json::to_string_pretty(&manifest).context("Failed to encode manifest")?;
    println!("{json}");
    Ok(())
}

async fn extract(
    host: Arc<dyn Host>,
    ticker: Arc<dyn Ticker>,
    config: &Config,
    archive: PathBuf,
    dir: Option<PathBuf>,
) -> Result<()> {
    let archives = Archives::new(host, ticker, config.extract.clone());
    let stream = archives.extract(archive, dir);
    stream.progress(print_progress("extract"));

    tokio::select! {
        state = stream.wait() => {
            if let Some(err) = stream_failure(state, || stream.error_reason().map(|e| e.to_string())) {
                bail!(err);
            }
            info!(unpacked = stream.unpacked(), "extraction complete");
        }
        _ = tokio::signal::ctrl_c() => {
            archives.close_streams(false).await;
            bail!("Extraction interrupted");
        }
    }
    Ok(())
}

async fn run(
    host: Arc<dyn Host>,
    ticker: Arc<dyn Ticker>,
    config: &Config,
    command: &str,
    cwd: Option<PathBuf>,
) -> Result<()> {
    let mut options = RunOptions::new();
    if let Some(cwd) = cwd {
        options = options.cwd(cwd);
    }

    let process = ProcessHandle::run(host, ticker, command, options, &config.process)
        .await
        .with_context(|| format!("Failed to run `{command}`"))?;

    process.output(|chunk| {
        print!("{chunk}");
        let _ = std::io::stdout().flush();
    });

    tokio::select! {
        () = process.wait() => {
            info!(pid = process.pid(), "process exited");
        }
        _ = tokio::signal::ctrl_c() => {
            process.kill(false).await.context("Failed to stop process")?;
        }
    }
    Ok(())
}
