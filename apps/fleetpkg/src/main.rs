//! fleetpkg - install-state and package introspection agent
//!
//! Front end for the library crates: loads configuration, wires the process
//! runner, introspector and install-state engine together, pumps their
//! events into tracing and renders results as tables or JSON.

mod cli;
mod display;
mod error;
mod events;
mod logging;

use crate::cli::{Cli, Commands};
use crate::display::{CommandResult, OutputRenderer, ScanRow};
use crate::error::CliError;
use crate::events::EventHandler;
use clap::Parser;
use fleetpkg_config::Config;
use fleetpkg_events::{EventReceiver, EventSender, FailureContext};
use fleetpkg_installstate::{scan_catalog, system_os_version, InstallStateEngine, ScanContext};
use fleetpkg_introspect::{PackageIntrospector, ReceiptSource, SystemReceiptRegistry};
use fleetpkg_platform::{CancellationToken, ProcessRunner, SystemProcessRunner};
use fleetpkg_types::{compare, load_catalog};
use std::future::Future;
use std::process;
use std::sync::Arc;
use tokio::select;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json_mode = cli.global.json;

    logging::init_tracing(json_mode, cli.global.debug);

    if let Err(e) = run(cli).await {
        error!("Application error: {}", e);
        if !json_mode {
            eprintln!("Error: {e}");
        }
        process::exit(1);
    }
}

/// Main application logic
async fn run(cli: Cli) -> Result<(), CliError> {
    info!("Starting fleetpkg v{}", env!("CARGO_PKG_VERSION"));

    // File config (or defaults), then environment, then CLI flags
    let mut config = Config::load_or_default(cli.global.config.as_deref()).await?;
    config.merge_env()?;
    apply_cli_config(&mut config, &cli.command);

    let (event_sender, event_receiver) = fleetpkg_events::channel();
    let colors_enabled = console::Term::stdout().features().colors_supported();
    let mut event_handler = EventHandler::new(colors_enabled, cli.global.json);

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let command = execute_command(cli.command, config, event_sender, cancel);
    let result = pump_events(command, event_receiver, &mut event_handler).await?;

    let renderer = OutputRenderer::new(cli.global.json, colors_enabled);
    renderer.render_result(&result)?;

    if let CommandResult::Scan(rows) = &result {
        let failed = rows.iter().filter(|r| r.error.is_some()).count();
        if failed > 0 {
            return Err(CliError::ScanIncomplete { failed });
        }
    }

    info!("Command completed successfully");
    Ok(())
}

/// Drive the command while handling its events as they arrive
async fn pump_events<F>(
    command: F,
    mut event_receiver: EventReceiver,
    event_handler: &mut EventHandler,
) -> Result<CommandResult, CliError>
where
    F: Future<Output = Result<CommandResult, CliError>>,
{
    let mut command = Box::pin(command);

    loop {
        select! {
            result = &mut command => {
                // Drain any remaining events
                while let Ok(event) = event_receiver.try_recv() {
                    event_handler.handle_event(event);
                }
                return result;
            }

            event = event_receiver.recv() => {
                if let Some(event) = event {
                    event_handler.handle_event(event);
                }
            }
        }
    }
}

/// Ctrl-C kills running scripts and tools instead of leaving them behind
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted; cancelling running processes");
            cancel.cancel();
        }
    });
}

/// Execute the specified command
async fn execute_command(
    command: Commands,
    config: Config,
    events: EventSender,
    cancel: CancellationToken,
) -> Result<CommandResult, CliError> {
    let runner: Arc<dyn ProcessRunner> =
        Arc::new(SystemProcessRunner::new().with_events(events.clone()));

    match command {
        Commands::Scan {
            catalog, os_version, ..
        } => {
            let entries = load_catalog(&catalog)?;
            let rejected = entries.iter().filter(|entry| entry.item.is_err()).count();
            info!(catalog = %catalog.display(), items = entries.len(), rejected, "catalog loaded");

            let registry: Arc<dyn ReceiptSource> = Arc::new(
                SystemReceiptRegistry::from_config(&config, runner.clone())
                    .with_events(events.clone()),
            );
            let mut ctx = ScanContext::new(registry)
                .with_cancel(cancel)
                .with_events(events.clone());
            if let Some(os) = os_version.or_else(system_os_version) {
                ctx = ctx.with_os_version(os);
            }

            let engine = InstallStateEngine::from_config(&config, runner).with_events(events);
            let results = scan_catalog(&engine, &entries, &ctx, config.concurrency()).await;

            let rows = entries
                .into_iter()
                .zip(results)
                .map(|(entry, result)| match result {
                    Ok(report) => ScanRow {
                        item: entry.label,
                        report: Some(report),
                        error: None,
                    },
                    Err(err) => ScanRow {
                        item: entry.label,
                        report: None,
                        error: Some(FailureContext::from_error(&err)),
                    },
                })
                .collect();
            Ok(CommandResult::Scan(rows))
        }

        Commands::Inspect { package, icons } => {
            let introspector = PackageIntrospector::from_config(&config, runner).with_events(events);
            let metadata = introspector.package_metadata(&package).await?;
            let icons = match icons {
                Some(dest) => {
                    tokio::fs::create_dir_all(&dest).await?;
                    introspector.extract_app_icons(&package, &dest).await?
                }
                None => Vec::new(),
            };
            Ok(CommandResult::Inspect { metadata, icons })
        }

        Commands::Receipts => {
            let registry =
                SystemReceiptRegistry::from_config(&config, runner).with_events(events);
            let installed = registry.installed_receipts().await?;
            let receipts = installed
                .sorted()
                .into_iter()
                .map(|(id, version)| (id.to_string(), version.to_string()))
                .collect();
            Ok(CommandResult::Receipts(receipts))
        }

        Commands::Compare { this, that } => {
            let result = compare(&this, &that);
            Ok(CommandResult::Compare { this, that, result })
        }
    }
}

/// Apply CLI configuration overrides (highest precedence)
fn apply_cli_config(config: &mut Config, command: &Commands) {
    if let Commands::Scan {
        concurrency,
        script_timeout,
        ..
    } = command
    {
        if let Some(concurrency) = concurrency {
            config.scan.concurrency = *concurrency;
        }
        if let Some(secs) = script_timeout.filter(|s| *s > 0) {
            config.scan.script_timeout_secs = secs;
        }
    }
}
