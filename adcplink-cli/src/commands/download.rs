//! File download with a progress display.

use adcplink::download::{
    CancelToken, ChunkSource, DownloadConfig, DownloadEngine, DownloadEvent, DownloadOutcome,
    DownloadSession, DownloadStatus, LinkChunkSource, PingChunkSource,
};
use adcplink::{EventBus, Subscription};
use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{Instrument, Target};
use crate::config::Config;
use crate::{Cli, use_fancy_output};

/// Exit status for a download stopped with Ctrl-C.
const EXIT_CANCELLED: i32 = 130;

/// Download command implementation.
pub(crate) fn cmd_download(
    cli: &Cli,
    config: &Config,
    file: &str,
    output: Option<&Path>,
    restart: bool,
) -> Result<()> {
    let path = output_path(config, file, output);
    let target = Target::resolve(cli, config)?;
    let mut instrument = Instrument::connect(&target, cli, config)?;

    let sink = BufWriter::new(
        File::create(&path).with_context(|| format!("Failed to create {}", path.display()))?,
    );
    if !cli.quiet {
        eprintln!(
            "{} Downloading {} to {}",
            style("⏳").yellow(),
            style(file).cyan(),
            path.display()
        );
    }

    let pb = progress_bar(cli.quiet);
    let events = EventBus::new();
    let progress = events.subscribe();
    let done = AtomicBool::new(false);
    let session = DownloadSession::new(file, sink).with_cancel(CancelToken::new());
    let download_config = config.download_config(restart);

    let outcome = std::thread::scope(|scope| {
        let (bar, finished) = (&pb, &done);
        scope.spawn(move || follow_progress(&progress, bar, finished));
        let outcome = match instrument {
            Instrument::Stream(ref link) => transfer(
                &mut LinkChunkSource::new(link),
                download_config,
                events,
                session,
            ),
            Instrument::Ping(ref mut channel) => transfer(
                &mut PingChunkSource::new(channel),
                download_config,
                events,
                session,
            ),
        };
        done.store(true, Ordering::SeqCst);
        outcome
    })?;

    let report = outcome.report;
    match report.status {
        DownloadStatus::Completed => {
            pb.finish_with_message("Complete");
            if !cli.quiet {
                eprintln!(
                    "{} {}: {} bytes in {} chunks ({} resends)",
                    style("✓").green(),
                    report.file,
                    report.bytes,
                    report.chunks,
                    report.resends
                );
            }
            Ok(())
        },
        DownloadStatus::Cancelled => {
            pb.abandon_with_message("Cancelled");
            eprintln!(
                "{} Download cancelled after {} bytes; partial data kept in {}",
                style("✗").red(),
                report.bytes,
                path.display()
            );
            drop(instrument);
            std::process::exit(EXIT_CANCELLED);
        },
        DownloadStatus::Failed(reason) => {
            pb.abandon_with_message("Failed");
            bail!("Download of {file} failed: {reason}")
        },
    }
}

fn transfer<S: ChunkSource + ?Sized>(
    source: &mut S,
    config: DownloadConfig,
    events: EventBus<DownloadEvent>,
    session: DownloadSession<BufWriter<File>>,
) -> Result<DownloadOutcome<BufWriter<File>>> {
    Ok(DownloadEngine::with_config(source, config)
        .with_events(events)
        .run(session)?)
}

/// Where the downloaded file is written.
fn output_path(config: &Config, file: &str, output: Option<&Path>) -> PathBuf {
    match output {
        Some(path) => path.to_path_buf(),
        None => config
            .download
            .output_dir
            .as_ref()
            .map_or_else(|| PathBuf::from(file), |dir| dir.join(file)),
    }
}

fn progress_bar(quiet: bool) -> ProgressBar {
    if quiet || !use_fancy_output() {
        return ProgressBar::hidden();
    }
    let pb = ProgressBar::new_spinner();
    #[allow(clippy::unwrap_used)] // Static template string
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {bytes} ({bytes_per_sec}) {msg}")
            .unwrap(),
    );
    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// Mirror download events onto the progress bar until the download ends.
fn follow_progress(events: &Subscription<DownloadEvent>, pb: &ProgressBar, done: &AtomicBool) {
    loop {
        match events.recv_timeout(Duration::from_millis(100)) {
            Some(DownloadEvent::Progress { bytes, .. }) => pb.set_position(bytes),
            Some(DownloadEvent::Complete { .. }) => return,
            None if done.load(Ordering::SeqCst) => return,
            None => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_path_prefers_flag() {
        let mut config = Config::default();
        config.download.output_dir = Some(PathBuf::from("downloads"));
        assert_eq!(
            output_path(&config, "A0000001.ENS", Some(Path::new("out.ens"))),
            PathBuf::from("out.ens")
        );
    }

    #[test]
    fn test_output_path_uses_output_dir() {
        let mut config = Config::default();
        config.download.output_dir = Some(PathBuf::from("downloads"));
        assert_eq!(
            output_path(&config, "A0000001.ENS", None),
            Path::new("downloads").join("A0000001.ENS")
        );
    }

    #[test]
    fn test_output_path_defaults_to_file_name() {
        assert_eq!(
            output_path(&Config::default(), "A0000001.ENS", None),
            PathBuf::from("A0000001.ENS")
        );
    }

    #[test]
    fn test_follow_progress_stops_on_complete() {
        let bus = EventBus::new();
        let events = bus.subscribe();
        bus.publish(&DownloadEvent::Progress {
            file: "f".to_string(),
            bytes: 42,
        });
        bus.publish(&DownloadEvent::Complete {
            file: "f".to_string(),
            success: true,
            status: DownloadStatus::Completed,
        });

        let pb = ProgressBar::hidden();
        follow_progress(&events, &pb, &AtomicBool::new(false));
        assert_eq!(pb.position(), 42);
    }
}
