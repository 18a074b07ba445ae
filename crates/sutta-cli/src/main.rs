use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tokio_util::sync::CancellationToken;

use sutta_core::{
    BatchOutcome, BatchPhase, Config, SegmentId, SegmentOutcome, Session, TranslateEvent,
};

mod output;

use output::Output;

/// Sutta Studio - translate the segments of a document through the studio API
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the document JSON file
    document: PathBuf,

    /// Comma-separated segment ids to translate as a batch
    #[arg(long, value_delimiter = ',')]
    segments: Vec<u64>,

    /// Stream the translation of one segment
    #[arg(long, conflicts_with_all = ["segments", "sync"])]
    single: Option<u64>,

    /// Translate one segment through the non-streaming endpoint
    #[arg(long, conflicts_with = "segments")]
    sync: Option<u64>,

    /// Retranslate segments that already have a translation
    #[arg(long)]
    force: bool,

    /// Where to write the updated document (default: overwrite the input)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Do not write the document back after translating
    #[arg(long, conflicts_with = "output")]
    no_save: bool,

    /// Base URL of the translation API
    #[arg(long)]
    api_url: Option<String>,

    /// Bearer token for the translation API
    #[arg(long)]
    api_token: Option<String>,

    /// Give up on a sub-batch stream after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Log at info level (RUST_LOG overrides)
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let default_level = if args.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if !args.document.exists() {
        anyhow::bail!("Document not found: {}", args.document.display());
    }

    // Resolve config from CLI flags > env vars > config file > defaults
    let mut config = Config::from_env_and_file()?;
    if let Some(url) = args.api_url.clone() {
        config.base_url = url;
    }
    if let Some(token) = args.api_token.clone() {
        config.api_token = Some(token);
    }
    if let Some(secs) = args.timeout {
        config.sub_batch_timeout_secs = Some(secs);
    }
    config.force = args.force;
    log::info!("using translation API at {}", config.base_url);

    let out = Output::new(!args.no_color);
    let session = Session::open(config, &args.document)?;

    let code = if let Some(id) = args.sync {
        run_sync(&session, SegmentId(id), &out).await
    } else if let Some(id) = args.single {
        run_single(&session, SegmentId(id), &out).await
    } else {
        run_batch(&session, &args.segments, &out).await?
    };

    if !args.no_save {
        let path = args.output.as_ref().unwrap_or(&args.document);
        session.save(path)?;
        out.note(&format!("Saved {}", path.display()));
    }
    Ok(code)
}

async fn run_sync(session: &Session, id: SegmentId, out: &Output) -> ExitCode {
    out.heading(&format!("Segment {id}"));
    match session.translate_sync(id).await {
        Ok(response) => match response.translation {
            Some(translation) => {
                out.translation(&translation);
                ExitCode::SUCCESS
            }
            None => {
                out.warn(&format!("No translation returned (status: {})", response.status));
                ExitCode::FAILURE
            }
        },
        Err(err) => {
            out.error(&format!("Segment {id}: {err}"));
            ExitCode::FAILURE
        }
    }
}

async fn run_single(session: &Session, id: SegmentId, out: &Output) -> ExitCode {
    let cancel = CancellationToken::new();
    let cancel_for_signal = cancel.clone();
    watch_interrupts(move || {
        cancel_for_signal.cancel();
    });

    out.heading(&format!("Segment {id}"));
    let mut printed = 0;
    let mut result = None;
    let outcome = session
        .translator
        .translate(id, &cancel, |event| match event {
            TranslateEvent::Token { accumulated } => out.stream_delta(&accumulated, &mut printed),
            TranslateEvent::Translation(translation) => result = Some(translation),
            TranslateEvent::Started | TranslateEvent::Completed | TranslateEvent::Error(_) => {}
        })
        .await;
    if printed > 0 {
        println!();
    }

    match outcome {
        SegmentOutcome::Translated => {
            if let Some(translation) = &result {
                out.translation(translation);
            }
            ExitCode::SUCCESS
        }
        SegmentOutcome::Cancelled => {
            out.warn("Translation cancelled");
            ExitCode::from(130)
        }
        SegmentOutcome::NoResult => {
            out.warn("The server closed the stream without a translation");
            ExitCode::FAILURE
        }
        SegmentOutcome::Failed(message) => {
            out.error(&format!("Segment {id}: {message}"));
            ExitCode::FAILURE
        }
    }
}

/// Run `on_first` on the first Ctrl+C. A second one exits with 130 without
/// waiting for a stalled read to notice the cancel.
fn watch_interrupts(on_first: impl FnOnce() + Send + 'static) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        log::info!("interrupt received, cancelling");
        on_first();
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!();
            std::process::exit(130);
        }
    });
}

/// Pick the batch: explicit ids go through the capped selection, otherwise
/// the first untranslated segments up to the cap.
fn choose_segments(session: &Session, requested: &[u64], out: &Output) -> Vec<SegmentId> {
    let store = &session.store;
    if requested.is_empty() {
        let untranslated = store.read(|s| {
            let all: Vec<SegmentId> = s.segments().iter().map(|seg| seg.id).collect();
            if session.config.force {
                all
            } else {
                s.untranslated(&all)
            }
        });
        let cap = store.max_selection();
        if untranslated.len() > cap {
            out.warn(&format!(
                "{} segments pending; translating the first {cap}",
                untranslated.len()
            ));
        }
        untranslated.into_iter().take(cap).collect()
    } else {
        for &raw in requested {
            let id = SegmentId(raw);
            if !store.read(|s| s.contains(id)) {
                out.warn(&format!("Segment {id} is not in this document"));
            } else if !store.select(id) && !store.read(|s| s.is_selected(id)) {
                out.warn(&format!(
                    "Selection is limited to {} segments; skipping {id}",
                    store.max_selection()
                ));
            }
        }
        store.read(|s| s.selection().iter().copied().collect())
    }
}

async fn run_batch(session: &Session, requested: &[u64], out: &Output) -> anyhow::Result<ExitCode> {
    let ids = choose_segments(session, requested, out);
    let (name, total) = session.store.read(|s| {
        (
            s.title().or(s.document_id()).unwrap_or_default().to_string(),
            s.segments().len(),
        )
    });
    out.heading(&format!("{name}: {} of {total} segments selected", ids.len()));

    let bar = ProgressBar::new(ids.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    bar.enable_steady_tick(Duration::from_millis(120));

    let mut updates = session.store.subscribe();
    let mut handle = session.batch.spawn_batch(ids);
    // Ctrl+C stops the batch at the next sub-batch or read boundary
    let batch = Arc::clone(&session.batch);
    watch_interrupts(move || {
        batch.cancel();
    });
    let outcome = loop {
        tokio::select! {
            outcome = &mut handle => break outcome?,
            changed = updates.changed() => {
                if changed.is_err() {
                    break (&mut handle).await?;
                }
                let (phase, progress) = {
                    let state = updates.borrow_and_update();
                    (state.batch_phase(), state.batch_progress())
                };
                if progress.total > 0 {
                    bar.set_length(progress.total as u64);
                }
                bar.set_position(progress.completed as u64);
                bar.set_message(match phase {
                    BatchPhase::Cancelling => "cancelling...".to_string(),
                    _ => format!("{} ok, {} failed", progress.succeeded, progress.failed),
                });
            }
        }
    };
    bar.finish_and_clear();

    match outcome {
        BatchOutcome::Skipped => {
            out.note("Nothing to translate");
            Ok(ExitCode::SUCCESS)
        }
        BatchOutcome::Rejected => {
            out.error("A batch translation is already running");
            Ok(ExitCode::FAILURE)
        }
        BatchOutcome::Settled(summary) => {
            out.summary(&summary);
            let code = if summary.cancelled {
                ExitCode::from(130)
            } else if summary.failed > 0 {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
            Ok(code)
        }
    }
}
