//! Tracing setup and structured logging of domain events

use fleetpkg_events::AppEvent;
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Dispatch to the tracing macro for a runtime level with a fixed target
macro_rules! log_at {
    ($level:expr, $target:literal, $($rest:tt)+) => {
        match $level {
            Level::ERROR => tracing::error!(target: $target, $($rest)+),
            Level::WARN => tracing::warn!(target: $target, $($rest)+),
            Level::INFO => tracing::info!(target: $target, $($rest)+),
            Level::DEBUG => tracing::debug!(target: $target, $($rest)+),
            _ => tracing::trace!(target: $target, $($rest)+),
        }
    };
}

/// Initialize tracing
///
/// `RUST_LOG` wins when set. Otherwise `--debug` logs everything from
/// fleetpkg at debug level and the default is warnings only. `--json`
/// switches the stderr log format to one JSON object per line.
pub fn init_tracing(json_mode: bool, debug: bool) {
    let default_directives = if debug {
        "info,fleetpkg=debug,fleetpkg_installstate=debug,fleetpkg_scripts=debug,fleetpkg_introspect=debug,fleetpkg_platform=debug"
    } else {
        "warn"
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json_mode {
        builder.json().init();
    } else {
        builder.with_target(debug).init();
    }
}

/// Log an `AppEvent` at its own level under its domain's target
pub fn log_event_with_tracing(event: &AppEvent) {
    let level = event.log_level();
    let source = event.event_source();
    let fields = event.log_fields();
    match event {
        AppEvent::General(_) => {
            log_at!(level, "fleetpkg::events::general", source = source.as_str(), event = %fields, "general event");
        }
        AppEvent::Process(_) => {
            log_at!(level, "fleetpkg::events::process", source = source.as_str(), event = %fields, "process event");
        }
        AppEvent::Script(_) => {
            log_at!(level, "fleetpkg::events::script", source = source.as_str(), event = %fields, "script event");
        }
        AppEvent::Scan(_) => {
            log_at!(level, "fleetpkg::events::scan", source = source.as_str(), event = %fields, "scan event");
        }
        AppEvent::Package(_) => {
            log_at!(level, "fleetpkg::events::package", source = source.as_str(), event = %fields, "package event");
        }
    }
}
