//! Event handling and user feedback

use console::Style;
use fleetpkg_events::{AppEvent, GeneralEvent, PackageEvent, ScanEvent, ScriptEvent};

use crate::logging::log_event_with_tracing;

/// Logs every event and surfaces the ones an operator should see
pub struct EventHandler {
    colors_enabled: bool,
    /// JSON output keeps stderr for logs only
    quiet: bool,
}

impl EventHandler {
    pub fn new(colors_enabled: bool, quiet: bool) -> Self {
        Self {
            colors_enabled,
            quiet,
        }
    }

    /// Handle incoming event
    pub fn handle_event(&mut self, event: AppEvent) {
        log_event_with_tracing(&event);
        if self.quiet {
            return;
        }

        match &event {
            AppEvent::Script(ScriptEvent::Refused {
                item, path, reason, ..
            }) => {
                self.show_error(&format!("Refused to run {path} for {item}: {reason}"));
            }
            AppEvent::Script(ScriptEvent::Degraded { item, kind, reason }) => {
                self.show_warning(&format!("{kind} for {item} ignored: {reason}"));
            }
            AppEvent::Scan(ScanEvent::ItemFailed { item, failure }) => {
                self.show_error(&format!("{item}: {}", failure.message));
            }
            AppEvent::Package(PackageEvent::InspectionFailed { path, failure }) => {
                self.show_error(&format!("{}: {}", path.display(), failure.message));
            }
            AppEvent::General(general @ GeneralEvent::Warning { .. }) => {
                self.show_warning(&general.summary());
            }
            AppEvent::General(general @ GeneralEvent::Error { .. }) => {
                self.show_error(&general.summary());
            }
            _ => {}
        }
    }

    fn show_warning(&self, message: &str) {
        eprintln!("{} {message}", self.paint(&Style::new().yellow().bold(), "warning:"));
    }

    fn show_error(&self, message: &str) {
        eprintln!("{} {message}", self.paint(&Style::new().red().bold(), "error:"));
    }

    fn paint(&self, style: &Style, text: &str) -> String {
        if self.colors_enabled {
            style.apply_to(text).to_string()
        } else {
            text.to_string()
        }
    }
}
