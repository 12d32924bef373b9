//! Evaluating a whole catalog

use fleetpkg_errors::Error;
use fleetpkg_events::{AppEvent, EventEmitter, FailureContext, ScanEvent};
use fleetpkg_types::CatalogEntry;
use futures::stream::{self, StreamExt};
use std::time::Instant;

use crate::context::ScanContext;
use crate::engine::{InstallStateEngine, ItemReport};

/// Evaluate every entry with at most `concurrency` evaluations in flight
///
/// Results come back in catalog order. An entry rejected by the catalog
/// loader, or an item whose evaluation fails, yields its error in place and
/// never stops the rest of the scan.
pub async fn scan_catalog(
    engine: &InstallStateEngine,
    entries: &[CatalogEntry],
    ctx: &ScanContext,
    concurrency: usize,
) -> Vec<Result<ItemReport, Error>> {
    let concurrency = concurrency.max(1);
    let start = Instant::now();
    engine.emit(AppEvent::Scan(ScanEvent::Started {
        items: entries.len(),
        concurrency,
    }));

    let results: Vec<Result<ItemReport, Error>> = stream::iter(entries)
        .map(|entry| async move {
            let result = match &entry.item {
                Ok(item) => engine.evaluate(item, ctx).await,
                Err(rejected) => Err(Error::from(rejected.clone())),
            };
            match &result {
                Ok(report) => {
                    tracing::debug!(item = %entry.label, state = %report.state, "evaluated");
                    engine.emit(AppEvent::Scan(ScanEvent::ItemEvaluated {
                        item: entry.label.clone(),
                        state: report.state,
                        some_version_installed: report.some_version_installed,
                        evidence_this_is_installed: report.evidence_this_is_installed,
                    }));
                }
                Err(err) => {
                    tracing::warn!(item = %entry.label, error = %err, "evaluation failed");
                    engine.emit(AppEvent::Scan(ScanEvent::ItemFailed {
                        item: entry.label.clone(),
                        failure: FailureContext::from_error(err),
                    }));
                }
            }
            result
        })
        .buffered(concurrency)
        .collect()
        .await;

    let failed = results.iter().filter(|r| r.is_err()).count();
    engine.emit(AppEvent::Scan(ScanEvent::Completed {
        evaluated: results.len() - failed,
        failed,
        duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
    }));
    results
}
