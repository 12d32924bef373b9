//! Output rendering and formatting

use comfy_table::{presets::UTF8_FULL, Attribute, Cell, Color, ContentArrangement, Table};
use fleetpkg_events::FailureContext;
use fleetpkg_installstate::ItemReport;
use fleetpkg_introspect::PackageMetadata;
use fleetpkg_types::{InstallState, VersionComparison};
use serde::Serialize;
use std::io;
use std::path::PathBuf;

/// One catalog item's scan outcome
#[derive(Debug, Serialize)]
pub struct ScanRow {
    pub item: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<ItemReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<FailureContext>,
}

/// What a command produced
#[derive(Debug)]
pub enum CommandResult {
    Scan(Vec<ScanRow>),
    Inspect {
        metadata: PackageMetadata,
        icons: Vec<PathBuf>,
    },
    Receipts(Vec<(String, String)>),
    Compare {
        this: String,
        that: String,
        result: VersionComparison,
    },
}

/// Output renderer for CLI results
#[derive(Clone)]
pub struct OutputRenderer {
    json_output: bool,
    colors_enabled: bool,
}

impl OutputRenderer {
    pub fn new(json_output: bool, colors_enabled: bool) -> Self {
        Self {
            json_output,
            colors_enabled,
        }
    }

    /// Render command result
    pub fn render_result(&self, result: &CommandResult) -> io::Result<()> {
        if self.json_output {
            Self::render_json(result)
        } else {
            self.render_table(result);
            Ok(())
        }
    }

    fn render_json(result: &CommandResult) -> io::Result<()> {
        let json = match result {
            CommandResult::Scan(rows) => serde_json::to_string_pretty(rows),
            CommandResult::Inspect { metadata, icons } => serde_json::to_string_pretty(
                &serde_json::json!({ "metadata": metadata, "icons": icons }),
            ),
            CommandResult::Receipts(receipts) => {
                let map: serde_json::Map<String, serde_json::Value> = receipts
                    .iter()
                    .map(|(id, version)| (id.clone(), serde_json::Value::from(version.as_str())))
                    .collect();
                serde_json::to_string_pretty(&map)
            }
            CommandResult::Compare { this, that, result } => serde_json::to_string_pretty(
                &serde_json::json!({ "this": this, "that": that, "result": result }),
            ),
        }
        .map_err(io::Error::other)?;
        println!("{json}");
        Ok(())
    }

    fn render_table(&self, result: &CommandResult) {
        match result {
            CommandResult::Scan(rows) => self.render_scan(rows),
            CommandResult::Inspect { metadata, icons } => Self::render_metadata(metadata, icons),
            CommandResult::Receipts(receipts) => Self::render_receipts(receipts),
            CommandResult::Compare { this, that, result } => match result {
                VersionComparison::Same => println!("{this} and {that} are the same version"),
                _ => println!("{this} is {result} than {that}"),
            },
        }
    }

    fn new_table(headers: &[&str]) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(
            headers
                .iter()
                .map(|h| Cell::new(h).add_attribute(Attribute::Bold))
                .collect::<Vec<_>>(),
        );
        table
    }

    fn render_scan(&self, rows: &[ScanRow]) {
        if rows.is_empty() {
            println!("Catalog has no items.");
            return;
        }

        let mut table = Self::new_table(&[
            "Item",
            "Version",
            "State",
            "Some version",
            "Removable evidence",
        ]);
        for row in rows {
            match (&row.report, &row.error) {
                (Some(report), _) => {
                    table.add_row(vec![
                        Cell::new(&report.name),
                        Cell::new(if report.version.is_empty() {
                            "-"
                        } else {
                            report.version.as_str()
                        }),
                        self.state_cell(report.state),
                        Cell::new(yes_no(report.some_version_installed)),
                        Cell::new(yes_no(report.evidence_this_is_installed)),
                    ]);
                }
                (None, error) => {
                    let message = error.as_ref().map_or("failed", |e| e.message.as_str());
                    table.add_row(vec![
                        Cell::new(&row.item),
                        Cell::new("-"),
                        self.colored(Cell::new("error"), Color::Red),
                        Cell::new(message),
                        Cell::new("-"),
                    ]);
                }
            }
        }
        println!("{table}");
    }

    fn render_metadata(metadata: &PackageMetadata, icons: &[PathBuf]) {
        println!("Name:             {}", metadata.name);
        println!("Version:          {}", metadata.version);
        println!("Installed size:   {} KB", metadata.installed_size_kb);
        println!("Restart action:   {}", metadata.restart_action);
        if let Some(os) = &metadata.minimum_os_version {
            println!("Minimum OS:       {os}");
        }
        if let Some(product) = &metadata.product_id {
            println!("Product:          {product}");
        }
        if let Some(title) = &metadata.title {
            println!("Title:            {title}");
        }

        let mut table = Self::new_table(&["Package ID", "Version", "Size (KB)", "File"]);
        for receipt in &metadata.receipts {
            table.add_row(vec![
                Cell::new(&receipt.packageid),
                Cell::new(&receipt.version),
                Cell::new(
                    receipt
                        .installed_size_kb
                        .map_or_else(|| "-".to_string(), |kb| kb.to_string()),
                ),
                Cell::new(
                    receipt
                        .file
                        .as_ref()
                        .map_or_else(|| "-".to_string(), |f| f.display().to_string()),
                ),
            ]);
        }
        println!("{table}");

        for icon in icons {
            println!("Icon: {}", icon.display());
        }
    }

    fn render_receipts(receipts: &[(String, String)]) {
        if receipts.is_empty() {
            println!("No package receipts found.");
            return;
        }
        let mut table = Self::new_table(&["Package ID", "Version"]);
        for (id, version) in receipts {
            table.add_row(vec![Cell::new(id), Cell::new(version)]);
        }
        println!("{table}");
    }

    fn state_cell(&self, state: InstallState) -> Cell {
        let color = match state {
            InstallState::ThisVersionInstalled => Color::Green,
            InstallState::NewerVersionInstalled => Color::Cyan,
            InstallState::ThisVersionNotInstalled => Color::Yellow,
        };
        self.colored(Cell::new(state.label()), color)
    }

    fn colored(&self, cell: Cell, color: Color) -> Cell {
        if self.colors_enabled {
            cell.fg(color)
        } else {
            cell
        }
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
