//! Mutation watcher and coordinating loop.
//! All four trigger sources — subtree insertions, debounced scrolls, the
//! periodic rescan, and control messages — are serialized into one event
//! queue consumed by one loop, so membership checks and placeholder
//! creation never race. Rewrite calls are the only concurrent part: each
//! dispatched node gets an independent spawned task whose result re-enters
//! the queue as an ordinary event.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, ScanConfig};
use crate::dom::{Document, NodeId};
use crate::eligibility::EligibilityFilter;
use crate::metrics::{metric_names, MetricsRegistry};
use crate::rewrite::{RewriteOutcome, RewriteService};
use crate::splice::{self, ATTR_PLACEHOLDER};
use crate::store::{SettingUpdate, SettingsStore};
use crate::tracking::{NodeState, TrackingContext};
use crate::visibility::{is_visible, IntersectionTracker, Viewport};

/// External page notifications fed to the engine.
#[derive(Debug, Clone)]
pub enum PageEvent {
    /// A subtree was inserted; `root` is the added node.
    SubtreeAdded { root: NodeId },
    /// The viewport scrolled to a new offset.
    Scrolled { scroll_y: f64 },
    /// Control-plane message.
    Control(ControlMessage),
}

#[derive(Debug, Clone)]
pub enum ControlMessage {
    ToggleExtension { enabled: bool },
    ReprocessPage,
}

enum EngineEvent {
    External(PageEvent),
    RewriteDone {
        text_node: NodeId,
        original: String,
        outcome: RewriteOutcome,
        generation: u64,
    },
}

struct Envelope {
    event: EngineEvent,
    enqueued_at: Instant,
}

/// Cloneable handle for feeding a running engine.
#[derive(Clone)]
pub struct PageHandle {
    tx: mpsc::UnboundedSender<Envelope>,
    cancel: CancellationToken,
}

impl PageHandle {
    fn send(&self, event: EngineEvent) {
        let _ = self.tx.send(Envelope {
            event,
            enqueued_at: Instant::now(),
        });
    }

    pub fn notify(&self, event: PageEvent) {
        self.send(EngineEvent::External(event));
    }

    pub fn subtree_added(&self, root: NodeId) {
        self.notify(PageEvent::SubtreeAdded { root });
    }

    pub fn scrolled(&self, scroll_y: f64) {
        self.notify(PageEvent::Scrolled { scroll_y });
    }

    pub fn toggle(&self, enabled: bool) {
        self.notify(PageEvent::Control(ControlMessage::ToggleExtension {
            enabled,
        }));
    }

    pub fn reprocess(&self) {
        self.notify(PageEvent::Control(ControlMessage::ReprocessPage));
    }

    /// Stop the engine loop. Idempotent.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

pub(crate) struct Engine {
    doc: Arc<RwLock<Document>>,
    config: ScanConfig,
    filter: EligibilityFilter,
    ctx: TrackingContext,
    tracker: IntersectionTracker,
    service: Arc<RewriteService>,
    store: Arc<dyn SettingsStore>,
    metrics: Arc<MetricsRegistry>,
    viewport: Viewport,
    enabled: bool,
    /// Loopback sender for rewrite completions.
    tx: mpsc::UnboundedSender<Envelope>,
    /// Trailing-edge scroll debounce state.
    pending_scroll: Option<f64>,
    scroll_flush_at: Option<tokio::time::Instant>,
    last_scroll: Option<Instant>,
}

/// Validate config, build the engine, and spawn its loop.
pub(crate) fn spawn(
    doc: Arc<RwLock<Document>>,
    config: ScanConfig,
    viewport: Viewport,
    service: Arc<RewriteService>,
    store: Arc<dyn SettingsStore>,
    metrics: Arc<MetricsRegistry>,
) -> Result<(PageHandle, tokio::task::JoinHandle<()>), ConfigError> {
    config.validate()?;
    let (tx, rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let enabled = store.get_settings().enabled;
    let tracker = IntersectionTracker::new(config.intersection_threshold);

    let engine = Engine {
        doc,
        config,
        filter: EligibilityFilter::new(),
        ctx: TrackingContext::new(),
        tracker,
        service,
        store,
        metrics,
        viewport,
        enabled,
        tx: tx.clone(),
        pending_scroll: None,
        scroll_flush_at: None,
        last_scroll: None,
    };

    let handle = PageHandle {
        tx,
        cancel: cancel.clone(),
    };
    let join = tokio::spawn(engine.run(rx, cancel));
    Ok((handle, join))
}

impl Engine {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Envelope>, cancel: CancellationToken) {
        info!(enabled = self.enabled, "weave engine started");

        if self.enabled {
            self.scan_targets("initial");
            self.check_visibility();
        }

        let mut rescan = tokio::time::interval(self.config.rescan_interval);
        rescan.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            // Disabled debounce arm still needs a deadline value; it is
            // never awaited when scroll_flush_at is None.
            let flush_at = self
                .scroll_flush_at
                .unwrap_or_else(|| tokio::time::Instant::now() + Duration::from_secs(3600));

            tokio::select! {
                _ = cancel.cancelled() => break,
                maybe = rx.recv() => match maybe {
                    Some(envelope) => self.handle(envelope),
                    None => break,
                },
                _ = tokio::time::sleep_until(flush_at), if self.scroll_flush_at.is_some() => {
                    self.flush_scroll();
                }
                _ = rescan.tick(), if self.config.periodic_rescan => {
                    self.maybe_rescan();
                }
            }
        }

        info!("weave engine stopped");
    }

    fn handle(&mut self, envelope: Envelope) {
        self.metrics.record(
            metric_names::QUEUE_WAIT,
            envelope.enqueued_at.elapsed().as_micros() as f64,
        );
        match envelope.event {
            EngineEvent::External(PageEvent::SubtreeAdded { root }) => {
                if self.enabled {
                    self.on_subtree_added(root);
                }
            }
            EngineEvent::External(PageEvent::Scrolled { scroll_y }) => {
                // Viewport position is tracked even while disabled; scans
                // are gated at flush time.
                self.pending_scroll = Some(scroll_y);
                self.last_scroll = Some(Instant::now());
                self.scroll_flush_at =
                    Some(tokio::time::Instant::now() + self.config.scroll_debounce);
            }
            EngineEvent::External(PageEvent::Control(msg)) => self.on_control(msg),
            EngineEvent::RewriteDone {
                text_node,
                original,
                outcome,
                generation,
            } => self.on_rewrite_done(text_node, original, outcome, generation),
        }
    }

    fn on_control(&mut self, msg: ControlMessage) {
        match msg {
            ControlMessage::ToggleExtension { enabled } => {
                if self.enabled == enabled {
                    return;
                }
                self.enabled = enabled;
                self.store.update_setting(SettingUpdate::Enabled(enabled));
                info!(enabled, "pipeline toggled");
                if enabled {
                    self.scan_targets("re-enabled");
                    self.check_visibility();
                }
            }
            ControlMessage::ReprocessPage => self.on_reprocess(),
        }
    }

    fn on_reprocess(&mut self) {
        // Outstanding placeholders are dead weight after the clear.
        let placeholders = self.ctx.pending_placeholders();
        {
            let doc_arc = Arc::clone(&self.doc);
            let mut doc = doc_arc.write();
            for ph in placeholders {
                doc.detach(ph);
            }
        }
        self.tracker.clear();
        let generation = self.ctx.clear_and_advance();
        info!(generation, "reprocess: membership cleared, rescanning");
        if self.enabled {
            self.scan_targets("reprocess");
            self.check_visibility();
        }
    }

    fn on_subtree_added(&mut self, root: NodeId) {
        {
            let doc_arc = Arc::clone(&self.doc);
            let mut doc = doc_arc.write();
            if !doc.is_attached(root) || !doc.is_element(root) {
                return;
            }
            // The added element itself, plus matching descendants.
            let candidates: Vec<NodeId> = doc
                .descendants(root)
                .filter(|&id| doc.is_element(id))
                .filter(|&id| {
                    doc.tag(id)
                        .map(|t| self.config.is_target_tag(t))
                        .unwrap_or(false)
                })
                .collect();
            for element in candidates {
                self.process_element(&mut doc, element);
            }
        }
        self.check_visibility();
    }

    fn flush_scroll(&mut self) {
        self.scroll_flush_at = None;
        if let Some(scroll_y) = self.pending_scroll.take() {
            self.viewport.scroll_y = scroll_y;
        }
        if self.enabled {
            self.scan_targets("scroll");
            self.check_visibility();
        }
    }

    fn maybe_rescan(&mut self) {
        if !self.enabled {
            return;
        }
        // Fallback only makes sense while the user is actively moving.
        let recently_scrolled = self
            .last_scroll
            .map(|at| at.elapsed() <= self.config.rescan_active_window)
            .unwrap_or(false);
        if !recently_scrolled {
            return;
        }
        self.scan_targets("periodic");
        self.check_visibility();
    }

    /// Walk every visible, unprocessed target element and queue its
    /// eligible text nodes behind placeholders.
    fn scan_targets(&mut self, reason: &str) {
        let span = self.metrics.span(metric_names::SCAN_DONE);
        let doc_arc = Arc::clone(&self.doc);
        let mut doc = doc_arc.write();
        let root = doc.root();
        let candidates: Vec<NodeId> = doc
            .descendants(root)
            .filter(|&id| doc.is_element(id))
            .filter(|&id| {
                doc.tag(id)
                    .map(|t| self.config.is_target_tag(t))
                    .unwrap_or(false)
            })
            .filter(|&id| !self.ctx.is_element_processed(id))
            .collect();
        let mut queued = 0usize;
        for element in candidates {
            queued += self.process_element(&mut doc, element);
        }
        drop(doc);
        let elapsed = span.finish();
        debug!(reason, queued, elapsed_us = elapsed, "scan pass complete");
    }

    /// Queue the eligible text nodes of one element. Returns how many were
    /// newly queued. Membership check and placeholder insertion happen
    /// back-to-back under the document lock — no suspension in between.
    fn process_element(&mut self, doc: &mut Document, element: NodeId) -> usize {
        if self.ctx.is_element_processed(element) {
            return 0;
        }
        let Some(tag) = doc.tag(element).map(str::to_string) else {
            return 0;
        };
        if self.config.is_excluded_tag(&tag) {
            return 0;
        }
        if !is_visible(doc, element, &self.viewport) {
            return 0;
        }

        let eligible = self
            .filter
            .collect_eligible(doc, element, &self.config, &self.ctx);
        let mut queued = 0usize;
        for text_node in eligible {
            if !self.ctx.claim_node(text_node) {
                continue;
            }
            self.ctx.transition(text_node, NodeState::Eligible);
            let placeholder = doc.create_element("span");
            doc.set_attr(placeholder, ATTR_PLACEHOLDER, "1");
            if !doc.insert_before(placeholder, text_node) {
                warn!(node = ?text_node, "text node lost its parent mid-scan, skipped");
                continue;
            }
            self.ctx.begin_pending(placeholder, text_node);
            self.tracker.observe(placeholder);
            self.metrics.count(metric_names::NODES_QUEUED);
            queued += 1;
        }
        self.ctx.mark_element_processed(element);
        queued
    }

    /// Evaluate observed placeholders and dispatch the ones that entered
    /// the viewport. One-shot per placeholder.
    fn check_visibility(&mut self) {
        if !self.enabled {
            return;
        }
        let doc_arc = Arc::clone(&self.doc);
        let mut doc = doc_arc.write();
        let outcome = self.tracker.check(&doc, &self.viewport);
        for placeholder in outcome.detached {
            self.ctx.abandon(placeholder);
        }
        for placeholder in outcome.entered {
            self.dispatch(&mut doc, placeholder);
        }
    }

    /// Kick off the asynchronous rewrite for a now-visible text node.
    fn dispatch(&mut self, doc: &mut Document, placeholder: NodeId) {
        let Some(text_node) = self.ctx.take_pending(placeholder) else {
            return;
        };
        doc.detach(placeholder);

        if !doc.is_attached(text_node) {
            self.ctx.transition(text_node, NodeState::Abandoned);
            return;
        }
        let Some(text) = doc.text(text_node).map(str::to_string) else {
            self.ctx.transition(text_node, NodeState::Abandoned);
            return;
        };
        // One-shot: the node is Processed from here on, whatever the
        // rewrite returns.
        self.ctx.transition(text_node, NodeState::Processed);

        let generation = self.ctx.generation();
        let service = Arc::clone(&self.service);
        let metrics = Arc::clone(&self.metrics);
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let start = Instant::now();
            let outcome = service.rewrite_text(&text).await;
            metrics.record(
                metric_names::REWRITE_DONE,
                start.elapsed().as_micros() as f64,
            );
            let _ = tx.send(Envelope {
                event: EngineEvent::RewriteDone {
                    text_node,
                    original: text,
                    outcome,
                    generation,
                },
                enqueued_at: Instant::now(),
            });
        });
    }

    fn on_rewrite_done(
        &mut self,
        text_node: NodeId,
        original: String,
        outcome: RewriteOutcome,
        generation: u64,
    ) {
        if generation != self.ctx.generation() {
            self.metrics.count(metric_names::STALE_DROPPED);
            debug!(node = ?text_node, "stale rewrite result dropped (reprocessed since)");
            return;
        }
        // Nothing changed — leave the original node alone.
        if outcome.text == original {
            return;
        }

        let span = self.metrics.span(metric_names::SPLICE_DONE);
        let nodes = splice::build_replacement_nodes(&outcome.text, &outcome.replacements);
        let doc_arc = Arc::clone(&self.doc);
        let mut doc = doc_arc.write();
        if splice::commit(&mut doc, text_node, &nodes, &mut self.ctx) {
            span.finish();
        } else {
            self.metrics.count(metric_names::STALE_DROPPED);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rewrite::StubRewriter;
    use crate::store::MemoryStore;

    fn test_engine(doc: Arc<RwLock<Document>>) -> Engine {
        let store: Arc<dyn SettingsStore> = Arc::new(MemoryStore::default());
        let service = Arc::new(RewriteService::new(
            Arc::new(StubRewriter::new([("quick", "rápido")])),
            Arc::clone(&store),
        ));
        let (tx, _rx) = mpsc::unbounded_channel();
        Engine {
            doc,
            config: ScanConfig::default(),
            filter: EligibilityFilter::new(),
            ctx: TrackingContext::new(),
            tracker: IntersectionTracker::new(0.1),
            service,
            store,
            metrics: Arc::new(MetricsRegistry::new()),
            viewport: Viewport::new(800.0),
            enabled: true,
            tx,
            pending_scroll: None,
            scroll_flush_at: None,
            last_scroll: None,
        }
    }

    fn visible_para(doc: &mut Document, y: f64, text: &str) -> (NodeId, NodeId) {
        let root = doc.root();
        let p = doc.create_element("p");
        doc.set_layout(p, crate::dom::Rect::new(0.0, y, 600.0, 40.0));
        let t = doc.create_text(text);
        doc.append_child(p, t);
        doc.append_child(root, p);
        (p, t)
    }

    #[test]
    fn scan_queues_placeholder_before_each_eligible_node() {
        let doc = Arc::new(RwLock::new(Document::new()));
        let (p, t) = {
            let mut d = doc.write();
            visible_para(&mut d, 0.0, "The quick brown fox jumps")
        };
        let mut engine = test_engine(Arc::clone(&doc));
        engine.scan_targets("test");

        let d = doc.read();
        let kids: Vec<NodeId> = d.children(p).collect();
        assert_eq!(kids.len(), 2);
        assert!(d.has_attr(kids[0], ATTR_PLACEHOLDER));
        assert_eq!(kids[1], t);
        assert_eq!(engine.ctx.pending_count(), 1);
        assert_eq!(engine.ctx.state(t), NodeState::Pending);
    }

    #[test]
    fn rescanning_does_not_double_queue() {
        let doc = Arc::new(RwLock::new(Document::new()));
        {
            let mut d = doc.write();
            visible_para(&mut d, 0.0, "The quick brown fox jumps");
        }
        let mut engine = test_engine(Arc::clone(&doc));
        engine.scan_targets("first");
        engine.scan_targets("second");
        assert_eq!(engine.ctx.pending_count(), 1);
        assert_eq!(
            engine.metrics.sample_count(metric_names::NODES_QUEUED),
            1
        );
    }

    #[test]
    fn disabled_engine_creates_no_placeholders() {
        let doc = Arc::new(RwLock::new(Document::new()));
        let (p, _) = {
            let mut d = doc.write();
            visible_para(&mut d, 0.0, "The quick brown fox jumps")
        };
        let mut engine = test_engine(Arc::clone(&doc));
        engine.enabled = false;
        engine.flush_scroll();
        engine.maybe_rescan();

        let d = doc.read();
        assert_eq!(d.children(p).count(), 1);
        assert_eq!(engine.ctx.pending_count(), 0);
    }

    #[tokio::test]
    async fn offscreen_elements_wait_for_scroll() {
        let doc = Arc::new(RwLock::new(Document::new()));
        {
            let mut d = doc.write();
            visible_para(&mut d, 3000.0, "The quick brown fox jumps far below");
        }
        let mut engine = test_engine(Arc::clone(&doc));
        engine.scan_targets("initial");
        assert_eq!(engine.metrics.sample_count(metric_names::NODES_QUEUED), 0);

        // Scroll the element into view and flush the debounce directly;
        // the node is queued and immediately dispatched.
        engine.pending_scroll = Some(2800.0);
        engine.flush_scroll();
        assert_eq!(engine.metrics.sample_count(metric_names::NODES_QUEUED), 1);
        assert_eq!(engine.ctx.pending_count(), 0);
    }

    #[tokio::test]
    async fn dispatch_is_one_shot_per_placeholder() {
        let doc = Arc::new(RwLock::new(Document::new()));
        {
            let mut d = doc.write();
            visible_para(&mut d, 0.0, "The quick brown fox jumps");
        }
        let mut engine = test_engine(Arc::clone(&doc));
        engine.scan_targets("test");
        engine.check_visibility();
        assert_eq!(engine.ctx.pending_count(), 0);
        // A second pass finds nothing left to dispatch.
        engine.check_visibility();
        assert_eq!(engine.tracker.observed_count(), 0);
    }
}
