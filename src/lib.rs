//! Polyweave: visibility-driven incremental text weaving.
//! Scans a live document for eligible text, defers each node until it
//! scrolls into view, rewrites it through an external service, and
//! splices the marked-up result back in place.

pub mod config;
pub mod dom;
pub mod eligibility;
pub mod engine;
pub mod metrics;
pub mod rewrite;
pub mod splice;
pub mod store;
pub mod tooltip;
pub mod tracking;
pub mod visibility;

pub use config::{ConfigError, ScanConfig};
pub use engine::{ControlMessage, PageEvent, PageHandle};
pub use rewrite::{
    OpenAiRewriter, RewriteOutcome, RewriteService, Rewriter, StubRewriter, Substitution,
    Telemetry,
};
pub use store::{
    MemoryStore, Proficiency, SettingUpdate, Settings, SettingsStore, SqliteStore, TokenStats,
    TokenUsage,
};
pub use visibility::Viewport;

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use dom::Document;
use metrics::MetricsRegistry;

/// A running weave session over one document.
pub struct Session {
    pub handle: PageHandle,
    /// Upward notifications (token-stat updates).
    pub telemetry: mpsc::UnboundedReceiver<Telemetry>,
    pub metrics: Arc<MetricsRegistry>,
    join: tokio::task::JoinHandle<()>,
}

impl Session {
    /// Stop the engine loop and wait for it to exit.
    pub async fn shutdown(self) {
        self.handle.shutdown();
        let _ = self.join.await;
    }
}

/// Wire the pipeline together and start it: rewrite service (cache, usage
/// accounting, silent degrade) around the given backend, one engine loop
/// over the shared document. Must be called inside a Tokio runtime.
pub fn start_session(
    doc: Arc<RwLock<Document>>,
    config: ScanConfig,
    viewport: Viewport,
    rewriter: Arc<dyn Rewriter>,
    store: Arc<dyn SettingsStore>,
) -> Result<Session, ConfigError> {
    let metrics = Arc::new(MetricsRegistry::new());
    let (telemetry_tx, telemetry_rx) = mpsc::unbounded_channel();
    let service = Arc::new(
        RewriteService::new(rewriter, Arc::clone(&store)).with_telemetry(telemetry_tx),
    );
    let (handle, join) = engine::spawn(
        doc,
        config,
        viewport,
        service,
        store,
        Arc::clone(&metrics),
    )?;
    Ok(Session {
        handle,
        telemetry: telemetry_rx,
        metrics,
        join,
    })
}
