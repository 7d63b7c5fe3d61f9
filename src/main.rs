use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tidywatch::cli::{self, Cli, Command};
use tidywatch::config::Settings;
use tidywatch::logging;
use tidywatch::output::OutputFormatter;
use tracing::{error, info, warn};

fn main() -> ExitCode {
    let args = Cli::parse();

    let mut settings = match Settings::load(args.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            OutputFormatter::error(&e.to_string());
            return ExitCode::from(2);
        }
    };
    if let Some(folder) = &args.watch_folder {
        settings.watch_folder = folder.to_string_lossy().into_owned();
    }

    let _log_guard = match logging::init_logging(&settings.logging, args.verbose) {
        Ok(guard) => Some(guard),
        Err(e) => {
            OutputFormatter::warning(&format!("File logging unavailable: {}", e));
            None
        }
    };

    // Returning instead of exiting lets the log guard flush on drop.
    match run(&args, &settings) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            OutputFormatter::error(&e.to_string());
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Cli, settings: &Settings) -> Result<(), cli::AppError> {
    let watch_root = settings.watch_root()?;
    info!("Starting tidywatch on {}", watch_root.display());

    let dispatcher = cli::build_dispatcher(settings, cli::document_service(settings))?;

    match args.command.unwrap_or(Command::Watch) {
        Command::Watch => {
            let stop = Arc::new(AtomicBool::new(false));
            let handler_stop = Arc::clone(&stop);
            if let Err(e) = ctrlc::set_handler(move || {
                handler_stop.store(true, Ordering::SeqCst);
            }) {
                warn!("Could not install Ctrl+C handler: {}", e);
            }

            let stats = cli::run_watch(
                &dispatcher,
                &watch_root,
                settings.watcher.queue_capacity,
                &stop,
            )?;
            OutputFormatter::info(&format!(
                "Stopped. Moved {}, failed {}, skipped {}.",
                stats.moved, stats.failed, stats.skipped
            ));
        }
        Command::Sweep { dry_run } => {
            cli::run_sweep(&dispatcher, &watch_root, dry_run)?;
        }
    }
    Ok(())
}
