use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ratatui::crossterm::event;
use ratatui::crossterm::execute;
use ratatui::crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::prelude::CrosstermBackend;
use ratatui::Terminal;
use tokio::sync::mpsc;

use sutta_core::{Config, Session};

mod action;
mod app;
mod backend;
mod input;
mod model;
mod theme;
mod tui_event;
mod view;

use app::{App, Command};
use backend::Backend;

/// Sutta Studio TUI - select segments and translate them with a terminal interface.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the document JSON file
    document: PathBuf,

    /// Base URL of the translation API
    #[arg(long)]
    api_url: Option<String>,

    /// Bearer token for the translation API
    #[arg(long)]
    api_token: Option<String>,

    /// Give up on a sub-batch stream after this many seconds
    #[arg(long)]
    timeout: Option<u64>,

    /// Retranslate segments that already have a translation
    #[arg(long)]
    force: bool,

    /// Where to write the document on quit (default: overwrite the input)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Do not write the document back on quit
    #[arg(long, conflicts_with = "output")]
    no_save: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    if !args.document.exists() {
        anyhow::bail!("Document not found: {}", args.document.display());
    }

    // Resolve config from CLI flags > env vars > config file > defaults
    let mut config = Config::from_env_and_file()?;
    if let Some(url) = args.api_url {
        config.base_url = url;
    }
    if let Some(token) = args.api_token {
        config.api_token = Some(token);
    }
    if let Some(secs) = args.timeout {
        config.sub_batch_timeout_secs = Some(secs);
    }
    config.force = args.force;

    let session = Arc::new(Session::open(config, &args.document)?);

    // Initialize terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;

    // Install panic hook that restores terminal before printing panic
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        let _ = disable_raw_mode();
        let _ = execute!(io::stdout(), LeaveAlternateScreen);
        original_hook(panic_info);
    }));

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Drain any stray input events (e.g. Enter keypress from launching the command)
    while event::poll(Duration::from_millis(50)).unwrap_or(false) {
        let _ = event::read();
    }

    let mut app = App::new(Arc::clone(&session.store));
    let mut updates = session.store.subscribe();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let worker = Backend::new(Arc::clone(&session), tx);

    // Also handle Ctrl+C at the OS level: stop any running translation
    let session_for_signal = Arc::clone(&session);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            session_for_signal.batch.cancel();
        }
    });

    let tick_rate = Duration::from_millis(100);

    loop {
        terminal.draw(|f| app.view(f))?;

        tokio::select! {
            // Store changed: take a fresh snapshot
            changed = updates.changed() => {
                if changed.is_ok() {
                    app.refresh();
                }
            }
            // Backend events (non-blocking drain)
            Some(backend_event) = rx.recv() => {
                app.handle_backend_event(backend_event);
                while let Ok(evt) = rx.try_recv() {
                    app.handle_backend_event(evt);
                }
            }
            // Terminal input events
            terminal_event = async {
                if event::poll(tick_rate).unwrap_or(false) {
                    event::read().ok()
                } else {
                    None
                }
            } => {
                if let Some(evt) = terminal_event {
                    let action = input::map_event(&evt);
                    if let Some(command) = app.update(action) {
                        dispatch(&worker, command);
                    }
                }
            }
        }

        app.update(action::Action::Tick);

        if app.should_quit {
            worker.cancel();
            break;
        }
    }

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;

    if !args.no_save {
        let path = args.output.as_ref().unwrap_or(&args.document);
        session.save(path)?;
    }

    Ok(())
}

fn dispatch(worker: &Backend, command: Command) {
    match command {
        Command::RunBatch(ids) => worker.run_batch(ids),
        Command::TranslateSingle(id) => worker.translate_single(id),
        Command::Cancel => worker.cancel(),
    }
}
