//! End-to-end pipeline tests: scan → defer → rewrite → splice against a
//! live document, with deterministic stub rewriters in place of the
//! network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::Semaphore;

use polyweave::dom::{Document, NodeId, Rect};
use polyweave::rewrite::{
    RewriteError, RewriteRequest, RewriteResponse, Rewriter, StubRewriter, Substitution,
};
use polyweave::splice::{ATTR_ORIGINAL, ATTR_PLACEHOLDER};
use polyweave::store::{MemoryStore, SettingsStore, TokenUsage};
use polyweave::{start_session, ScanConfig, Session, Telemetry, Viewport};

/// Rewriter that counts calls and delegates to a word map.
struct CountingRewriter {
    calls: AtomicUsize,
    inner: StubRewriter,
}

impl CountingRewriter {
    fn new(pairs: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            inner: StubRewriter::new(pairs.iter().map(|&(a, b)| (a, b))),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Rewriter for CountingRewriter {
    async fn rewrite(&self, request: &RewriteRequest) -> Result<RewriteResponse, RewriteError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.rewrite(request).await
    }
}

/// Rewriter that parks every call until the test opens the gate.
struct GatedRewriter {
    started: AtomicUsize,
    gate: Semaphore,
}

impl GatedRewriter {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            started: AtomicUsize::new(0),
            gate: Semaphore::new(0),
        })
    }
}

#[async_trait]
impl Rewriter for GatedRewriter {
    async fn rewrite(&self, _request: &RewriteRequest) -> Result<RewriteResponse, RewriteError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let _permit = self.gate.acquire().await.expect("gate never closed");
        Ok(RewriteResponse {
            replacements: vec![Substitution {
                original: "quick".into(),
                replacement: "rápido".into(),
            }],
            usage: Some(TokenUsage {
                prompt_tokens: 5,
                completion_tokens: 1,
                total_tokens: 6,
            }),
        })
    }
}

fn fast_config() -> ScanConfig {
    ScanConfig {
        scroll_debounce: Duration::from_millis(20),
        rescan_interval: Duration::from_millis(100),
        rescan_active_window: Duration::from_secs(2),
        ..Default::default()
    }
}

fn add_paragraph(doc: &mut Document, y: f64, text: &str) -> (NodeId, NodeId) {
    let root = doc.root();
    let p = doc.create_element("p");
    doc.set_layout(p, Rect::new(0.0, y, 600.0, 40.0));
    let t = doc.create_text(text);
    doc.append_child(p, t);
    doc.append_child(root, p);
    (p, t)
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

/// Poll until `cond` holds or the timeout trips.
async fn wait_until<F: Fn() -> bool>(cond: F, what: &str) {
    for _ in 0..100 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}

fn start(
    doc: &Arc<RwLock<Document>>,
    rewriter: Arc<dyn Rewriter>,
) -> (Session, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::default());
    let session = start_session(
        Arc::clone(doc),
        fast_config(),
        Viewport::new(800.0),
        rewriter,
        store.clone(),
    )
    .expect("valid test config");
    (session, store)
}

#[tokio::test]
async fn visible_paragraph_is_woven_exactly_once() {
    let doc = Arc::new(RwLock::new(Document::new()));
    let (p, _t) = {
        let mut d = doc.write();
        add_paragraph(&mut d, 0.0, "The quick brown fox jumps")
    };
    let rewriter = CountingRewriter::new(&[("quick", "rápido")]);
    let (session, _store) = start(&doc, rewriter.clone());

    wait_until(|| rewriter.calls() == 1, "first rewrite call").await;
    settle().await;

    {
        let d = doc.read();
        assert_eq!(d.text_content(p), "The rápido brown fox jumps");
        let span = d
            .children(p)
            .find(|&c| d.has_attr(c, ATTR_ORIGINAL))
            .expect("highlight span spliced in");
        assert_eq!(d.attr(span, ATTR_ORIGINAL), Some("quick"));
    }

    // Scroll away and back: visibility re-entry must not re-process.
    session.handle.scrolled(5000.0);
    settle().await;
    session.handle.scrolled(0.0);
    settle().await;
    assert_eq!(rewriter.calls(), 1, "node processed more than once");

    session.shutdown().await;
}

#[tokio::test]
async fn offscreen_content_waits_for_scroll() {
    let doc = Arc::new(RwLock::new(Document::new()));
    let (p, _t) = {
        let mut d = doc.write();
        add_paragraph(&mut d, 3000.0, "The quick brown fox jumps far below the fold")
    };
    let rewriter = CountingRewriter::new(&[("quick", "rápido")]);
    let (session, _store) = start(&doc, rewriter.clone());

    settle().await;
    assert_eq!(rewriter.calls(), 0, "offscreen node rewritten too early");

    session.handle.scrolled(2800.0);
    wait_until(|| rewriter.calls() == 1, "rewrite after scroll").await;
    settle().await;

    let d = doc.read();
    assert_eq!(d.text_content(p), "The rápido brown fox jumps far below the fold");
    drop(d);
    session.shutdown().await;
}

#[tokio::test]
async fn short_text_is_never_dispatched() {
    let doc = Arc::new(RwLock::new(Document::new()));
    {
        let mut d = doc.write();
        add_paragraph(&mut d, 0.0, "too few words here"); // 4 < 5
    }
    let rewriter = CountingRewriter::new(&[("words", "palabras")]);
    let (session, _store) = start(&doc, rewriter.clone());

    settle().await;
    assert_eq!(rewriter.calls(), 0);
    session.shutdown().await;
}

#[tokio::test]
async fn detached_mid_flight_node_is_discarded_silently() {
    let doc = Arc::new(RwLock::new(Document::new()));
    let (p, t) = {
        let mut d = doc.write();
        add_paragraph(&mut d, 0.0, "The quick brown fox jumps")
    };
    let rewriter = GatedRewriter::new();
    let (session, _store) = start(&doc, rewriter.clone());

    // Wait for the rewrite to be in flight, then rip the subtree out.
    wait_until(
        || rewriter.started.load(Ordering::SeqCst) == 1,
        "rewrite dispatch",
    )
    .await;
    {
        let mut d = doc.write();
        d.detach(p);
    }
    rewriter.gate.add_permits(1);
    settle().await;

    // The detached subtree keeps its original text; nothing was spliced.
    let d = doc.read();
    assert!(!d.is_attached(t));
    assert_eq!(d.text_content(p), "The quick brown fox jumps");
    drop(d);
    session.shutdown().await;
}

#[tokio::test]
async fn mutated_in_subtree_is_picked_up() {
    let doc = Arc::new(RwLock::new(Document::new()));
    let rewriter = CountingRewriter::new(&[("fox", "zorro")]);
    let (session, _store) = start(&doc, rewriter.clone());
    settle().await;

    // Page mutates: a wrapper div with a matching paragraph inside.
    let (wrapper, p) = {
        let mut d = doc.write();
        let root = d.root();
        let wrapper = d.create_element("div");
        d.set_layout(wrapper, Rect::new(0.0, 100.0, 600.0, 80.0));
        let p = d.create_element("p");
        d.set_layout(p, Rect::new(0.0, 100.0, 600.0, 40.0));
        let t = d.create_text("A clever fox visits the garden every night");
        d.append_child(p, t);
        d.append_child(wrapper, p);
        d.append_child(root, wrapper);
        (wrapper, p)
    };
    session.handle.subtree_added(wrapper);
    wait_until(|| rewriter.calls() >= 1, "mutation-path rewrite").await;
    settle().await;

    let d = doc.read();
    assert_eq!(
        d.text_content(p),
        "A clever zorro visits the garden every night"
    );
    drop(d);
    session.shutdown().await;
}

#[tokio::test]
async fn woven_output_is_not_rewritten_again() {
    let doc = Arc::new(RwLock::new(Document::new()));
    {
        let mut d = doc.write();
        add_paragraph(&mut d, 0.0, "The quick brown fox jumps over everything");
    }
    let rewriter = CountingRewriter::new(&[("quick", "rápido")]);
    let (session, _store) = start(&doc, rewriter.clone());

    wait_until(|| rewriter.calls() == 1, "first rewrite").await;
    settle().await;

    // Nudge every trigger path; the spliced text must never re-enter.
    session.handle.scrolled(1.0);
    settle().await;
    session.handle.scrolled(0.0);
    settle().await;
    assert_eq!(rewriter.calls(), 1);
    session.shutdown().await;
}

#[tokio::test]
async fn toggle_off_blocks_placeholders_and_reprocess_restarts() {
    let doc = Arc::new(RwLock::new(Document::new()));
    let rewriter = CountingRewriter::new(&[("nothing-matches", "nada")]);
    let (session, _store) = start(&doc, rewriter.clone());
    settle().await;

    session.handle.toggle(false);
    settle().await;

    // Content added while disabled is ignored entirely.
    let (p, _t) = {
        let mut d = doc.write();
        add_paragraph(&mut d, 0.0, "The quick brown fox jumps while disabled")
    };
    session.handle.subtree_added(p);
    session.handle.scrolled(10.0);
    settle().await;
    assert_eq!(rewriter.calls(), 0, "disabled engine still dispatched");
    {
        let d = doc.read();
        assert!(
            d.descendants(d.root())
                .all(|id| !d.has_attr(id, ATTR_PLACEHOLDER)),
            "placeholder created while disabled"
        );
    }

    // Re-enable: the paragraph is processed (once).
    session.handle.toggle(true);
    wait_until(|| rewriter.calls() == 1, "rewrite after re-enable").await;
    settle().await;

    // Reprocess clears membership: the same (unchanged) node is queued
    // and dispatched a second time. The rewrite cache answers the repeat
    // call, so the queue counter is the observable signal.
    session.handle.reprocess();
    wait_until(
        || {
            session
                .metrics
                .sample_count(polyweave::metrics::metric_names::NODES_QUEUED)
                == 2
        },
        "requeue after reprocess",
    )
    .await;
    session.shutdown().await;
}

#[tokio::test]
async fn reprocess_mid_flight_drops_the_stale_result() {
    let doc = Arc::new(RwLock::new(Document::new()));
    let (p, _t) = {
        let mut d = doc.write();
        add_paragraph(&mut d, 0.0, "The quick brown fox jumps")
    };
    let rewriter = GatedRewriter::new();
    let (session, _store) = start(&doc, rewriter.clone());

    wait_until(
        || rewriter.started.load(Ordering::SeqCst) == 1,
        "first dispatch",
    )
    .await;

    // Reprocess while the first rewrite is still in flight: the node is
    // re-queued and dispatched under the new generation.
    session.handle.reprocess();
    wait_until(
        || rewriter.started.load(Ordering::SeqCst) == 2,
        "redispatch after reprocess",
    )
    .await;

    rewriter.gate.add_permits(2);
    settle().await;

    // Exactly one result committed; the stale one was dropped.
    let d = doc.read();
    assert_eq!(d.text_content(p), "The rápido brown fox jumps");
    let highlights = d
        .descendants(p)
        .filter(|&id| d.has_attr(id, ATTR_ORIGINAL))
        .count();
    assert_eq!(highlights, 1);
    drop(d);
    assert_eq!(
        session
            .metrics
            .sample_count(polyweave::metrics::metric_names::STALE_DROPPED),
        1
    );
    session.shutdown().await;
}

#[tokio::test]
async fn token_stats_accumulate_and_flow_upward() {
    let doc = Arc::new(RwLock::new(Document::new()));
    {
        let mut d = doc.write();
        add_paragraph(&mut d, 0.0, "The quick brown fox jumps");
        add_paragraph(&mut d, 100.0, "Another paragraph with plenty of words inside it");
    }
    let rewriter = CountingRewriter::new(&[("quick", "rápido"), ("words", "palabras")]);
    let (mut session, store) = start(&doc, rewriter.clone());

    wait_until(|| rewriter.calls() == 2, "both rewrites").await;
    settle().await;

    let stats = store.get_settings().token_stats;
    assert!(stats.total_tokens > 0);
    assert_eq!(
        stats.total_tokens,
        stats.prompt_tokens + stats.completion_tokens
    );

    let mut updates = 0;
    while let Ok(Telemetry::TokenStatsUpdated { .. }) = session.telemetry.try_recv() {
        updates += 1;
    }
    assert_eq!(updates, 2, "one telemetry message per billed rewrite");
    session.shutdown().await;
}

#[tokio::test]
async fn empty_substitution_response_leaves_dom_untouched() {
    let doc = Arc::new(RwLock::new(Document::new()));
    let (p, t) = {
        let mut d = doc.write();
        add_paragraph(&mut d, 0.0, "Nothing here matches the dictionary at all")
    };
    let rewriter = CountingRewriter::new(&[("zzz-absent", "x")]);
    let (session, _store) = start(&doc, rewriter.clone());

    wait_until(|| rewriter.calls() == 1, "rewrite attempted").await;
    settle().await;

    let d = doc.read();
    // The original text node is still the paragraph's only child.
    let kids: Vec<NodeId> = d.children(p).filter(|&c| d.is_text(c)).collect();
    assert_eq!(kids, vec![t]);
    assert_eq!(d.text_content(p), "Nothing here matches the dictionary at all");
    drop(d);
    session.shutdown().await;
}
