//! Per-scan shared state

use fleetpkg_errors::Error;
use fleetpkg_events::{AppEvent, EventEmitter, EventSender, ScanEvent};
use fleetpkg_introspect::ReceiptSource;
use fleetpkg_platform::CancellationToken;
use fleetpkg_types::InstalledReceipts;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::OnceCell;

const SYSTEM_VERSION_PLIST: &str = "/System/Library/CoreServices/SystemVersion.plist";

/// Everything one scan shares between concurrent item evaluations
///
/// The installed-receipts snapshot is built on first use and never
/// refreshed; start a new context to see newly installed packages.
pub struct ScanContext {
    source: Option<Arc<dyn ReceiptSource>>,
    snapshot: OnceCell<Arc<InstalledReceipts>>,
    os_version: Option<String>,
    cancel: CancellationToken,
    event_sender: Option<EventSender>,
}

impl std::fmt::Debug for ScanContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanContext")
            .field("snapshot", &self.snapshot.get())
            .field("os_version", &self.os_version)
            .finish_non_exhaustive()
    }
}

impl EventEmitter for ScanContext {
    fn event_sender(&self) -> Option<&EventSender> {
        self.event_sender.as_ref()
    }
}

impl ScanContext {
    /// Context that queries `source` the first time receipts are needed
    pub fn new(source: Arc<dyn ReceiptSource>) -> Self {
        Self {
            source: Some(source),
            snapshot: OnceCell::new(),
            os_version: None,
            cancel: CancellationToken::new(),
            event_sender: None,
        }
    }

    /// Context with a fixed snapshot
    pub fn with_snapshot(receipts: InstalledReceipts) -> Self {
        Self {
            source: None,
            snapshot: OnceCell::new_with(Some(Arc::new(receipts))),
            os_version: None,
            cancel: CancellationToken::new(),
            event_sender: None,
        }
    }

    /// Running OS version, used for OS installer items
    #[must_use]
    pub fn with_os_version(mut self, version: impl Into<String>) -> Self {
        self.os_version = Some(version.into());
        self
    }

    /// Cancelling this token kills running scripts
    #[must_use]
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    #[must_use]
    pub fn with_events(mut self, sender: EventSender) -> Self {
        self.event_sender = Some(sender);
        self
    }

    pub fn os_version(&self) -> Option<&str> {
        self.os_version.as_deref()
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// The installed-receipts snapshot, built once
    ///
    /// # Errors
    ///
    /// Returns the source's error; a failed build is retried on the next
    /// call.
    pub async fn receipts(&self) -> Result<Arc<InstalledReceipts>, Error> {
        self.snapshot
            .get_or_try_init(|| async {
                let Some(source) = &self.source else {
                    return Ok(Arc::new(InstalledReceipts::new()));
                };
                let start = Instant::now();
                let receipts = source.installed_receipts().await?;
                self.emit(AppEvent::Scan(ScanEvent::SnapshotBuilt {
                    receipts: receipts.len(),
                    duration_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
                }));
                Ok(Arc::new(receipts))
            })
            .await
            .cloned()
    }
}

/// `ProductVersion` of the running macOS, if this is macOS
pub fn system_os_version() -> Option<String> {
    read_product_version(Path::new(SYSTEM_VERSION_PLIST))
}

fn read_product_version(path: &Path) -> Option<String> {
    let info = plist::Value::from_file(path).ok()?.into_dictionary()?;
    info.get("ProductVersion")
        .and_then(plist::Value::as_string)
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ReceiptSource for CountingSource {
        async fn installed_receipts(&self) -> Result<InstalledReceipts, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok([("com.example.a", "1.0")].into_iter().collect())
        }
    }

    #[tokio::test]
    async fn test_snapshot_built_once() {
        let source = Arc::new(CountingSource {
            calls: AtomicUsize::new(0),
        });
        let ctx = ScanContext::new(source.clone());
        let first = ctx.receipts().await.unwrap();
        let second = ctx.receipts().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fixed_snapshot() {
        let ctx = ScanContext::with_snapshot([("com.example.b", "2.0")].into_iter().collect())
            .with_os_version("14.2");
        assert_eq!(ctx.receipts().await.unwrap().get("com.example.b"), Some("2.0"));
        assert_eq!(ctx.os_version(), Some("14.2"));
    }

    #[test]
    fn test_read_product_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("SystemVersion.plist");
        let mut info = plist::Dictionary::new();
        info.insert(
            "ProductVersion".to_string(),
            plist::Value::String("13.6.1".to_string()),
        );
        plist::Value::Dictionary(info).to_file_xml(&path).unwrap();
        assert_eq!(read_product_version(&path).as_deref(), Some("13.6.1"));
        assert_eq!(read_product_version(&dir.path().join("missing")), None);
    }
}
