use anyhow::{Context, Result};
use indicatif::{HumanBytes, MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use rangedl::{
    Downloader, HttpSource, JobPhase, Outcome, ProgressMonitor, ProgressSnapshot, SegmentStatus,
};
use std::time::Duration;
use tokio::fs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cli::{Args, ProgressMode};
use rangedl::utils::default_target;

const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes:>12}/{total_bytes:<12} {bytes_per_sec:>12} {eta:>4} {msg}";
const SEGMENT_TEMPLATE: &str = "  {prefix:>4} [{bar:30.cyan/blue}] {bytes:>10}/{total_bytes:<10} {msg}";

pub async fn run_download(args: Args) -> Result<Outcome> {
    let config = args.fetch_config();
    let target = match &args.output {
        Some(path) => path.clone(),
        None => default_target(&args.download_dir, &args.url)?,
    };
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create output directory")?;
        }
    }

    let resolved = if args.resolve {
        let url = HttpSource::new(&config)
            .resolve(&args.url)
            .await
            .context("Failed to resolve redirects")?;
        tracing::info!(from = %args.url, to = %url, "resolved download URL");
        Some(url)
    } else {
        None
    };

    let downloader = Downloader::new(config);
    let done = CancellationToken::new();
    let reporter = tokio::spawn(render_progress(downloader.monitor(), args.progress, done.clone()));

    let result = downloader
        .start(&args.url, &target, move |url: &str| match &resolved {
            Some(resolved) => resolved.clone(),
            None => url.to_string(),
        })
        .await;

    done.cancel();
    wait_for_renderer(reporter).await;

    let result = result.with_context(|| format!("Failed to download {}", args.url))?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result.snapshot, result.outcome, result.elapsed, &result.target.display().to_string());
    }
    Ok(result.outcome)
}

fn print_summary(snapshot: &ProgressSnapshot, outcome: Outcome, elapsed: Duration, target: &str) {
    let secs = elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        (snapshot.total_transferred as f64 / secs) as u64
    } else {
        0
    };
    match outcome {
        Outcome::Success => println!(
            "Completed {} ({}) in {:.2}s, {}/s",
            target,
            HumanBytes(snapshot.total_transferred),
            secs,
            HumanBytes(rate)
        ),
        Outcome::PartialFailure => {
            eprintln!(
                "Incomplete {}: {} of {} in {:.2}s, {} of {} segments failed",
                target,
                HumanBytes(snapshot.total_transferred),
                HumanBytes(snapshot.content_length),
                secs,
                snapshot.count(SegmentStatus::Failed),
                snapshot.segments.len()
            );
            for range in snapshot.missing_ranges() {
                eprintln!("  missing bytes {}", range);
            }
        }
    }
}

/// Join the progress task; returns false if it panicked or was cancelled.
async fn wait_for_renderer(reporter: JoinHandle<()>) -> bool {
    match reporter.await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(error = %e, "progress renderer stopped abnormally");
            false
        }
    }
}

/// Poll `monitor` and draw bars until `done` fires.
async fn render_progress(monitor: ProgressMonitor, mode: ProgressMode, done: CancellationToken) {
    if mode == ProgressMode::Off {
        return;
    }

    let multi_progress = MultiProgress::new();
    multi_progress.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));
    let mut total_pb: Option<ProgressBar> = None;
    let mut segment_pbs: Vec<ProgressBar> = vec![];

    loop {
        let finished = done.is_cancelled();

        if let Some(snapshot) = monitor.snapshot() {
            let pb = total_pb.get_or_insert_with(|| {
                let pb = multi_progress.add(ProgressBar::new(snapshot.content_length));
                pb.set_style(
                    ProgressStyle::default_bar()
                        .template(BAR_TEMPLATE)
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("=>-"),
                );
                pb
            });
            pb.set_position(snapshot.total_transferred);
            pb.set_message(format!(
                "{} running | {} finished | {} failed",
                snapshot.count(SegmentStatus::Running),
                snapshot.count(SegmentStatus::Finished),
                snapshot.count(SegmentStatus::Failed)
            ));

            if mode == ProgressMode::Segments && segment_pbs.is_empty() {
                for segment in &snapshot.segments {
                    let spb = multi_progress.add(ProgressBar::new(segment.range.len()));
                    spb.set_style(
                        ProgressStyle::default_bar()
                            .template(SEGMENT_TEMPLATE)
                            .unwrap_or_else(|_| ProgressStyle::default_bar())
                            .progress_chars("=>-"),
                    );
                    spb.set_prefix(format!("#{}", segment.id));
                    segment_pbs.push(spb);
                }
            }
            for (spb, segment) in segment_pbs.iter().zip(&snapshot.segments) {
                spb.set_position(segment.transferred);
                match segment.status {
                    SegmentStatus::Running => {}
                    SegmentStatus::Finished if !spb.is_finished() => spb.finish_with_message("done"),
                    SegmentStatus::Failed if !spb.is_finished() => spb.abandon_with_message("failed"),
                    _ => {}
                }
            }
        }

        if finished {
            if let Some(pb) = &total_pb {
                match monitor.phase() {
                    JobPhase::Completed => pb.finish(),
                    _ => pb.abandon(),
                }
            }
            break;
        }

        tokio::select! {
            _ = done.cancelled() => {}
            _ = tokio::time::sleep(Duration::from_millis(100)) => {}
        }
    }
}
