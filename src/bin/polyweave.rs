//! Demo: weave a synthetic page with a deterministic dictionary rewriter.
//! Builds a document of stacked paragraphs, scrolls through it, injects
//! late content, then prints the woven text and pipeline metrics.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::info;

use polyweave::dom::{Document, NodeId, Rect};
use polyweave::splice::ATTR_ORIGINAL;
use polyweave::store::MemoryStore;
use polyweave::{
    start_session, ScanConfig, SettingUpdate, SettingsStore, StubRewriter, Telemetry, Viewport,
};

const PARAGRAPHS: &[&str] = &[
    "The quick brown fox jumps over the lazy dog every single morning.",
    "Every morning the people of the village walk down to the river.",
    "A small house stood at the edge of the forest near the water.",
    "The world keeps turning whether or not anyone is watching it.",
    "Language learning works best when new words appear in context.",
    "She opened the window and let the cold morning air fill the house.",
];

fn build_page(doc: &mut Document) -> Vec<NodeId> {
    let root = doc.root();
    let mut paras = Vec::new();
    for (i, text) in PARAGRAPHS.iter().enumerate() {
        let p = doc.create_element("p");
        doc.set_layout(p, Rect::new(0.0, i as f64 * 300.0, 600.0, 60.0));
        let t = doc.create_text(text);
        doc.append_child(p, t);
        doc.append_child(root, p);
        paras.push(p);
    }
    paras
}

/// Render a paragraph with woven words bracketed: «replacement/original».
fn render(doc: &Document, paragraph: NodeId) -> String {
    let mut out = String::new();
    for child in doc.children(paragraph) {
        if let Some(text) = doc.text(child) {
            out.push_str(text);
        } else if let Some(original) = doc.attr(child, ATTR_ORIGINAL) {
            out.push('«');
            out.push_str(&doc.text_content(child));
            out.push('/');
            out.push_str(original);
            out.push('»');
        }
    }
    out
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "polyweave=debug".parse().unwrap()),
        )
        .with_target(true)
        .init();

    info!("polyweave demo starting");

    let doc = Arc::new(RwLock::new(Document::new()));
    let paras = {
        let mut d = doc.write();
        build_page(&mut d)
    };

    let store = Arc::new(MemoryStore::default());
    store.update_setting(SettingUpdate::TargetLanguage("spanish".into()));
    store.update_setting(SettingUpdate::DensityPercent(40));

    let rewriter = Arc::new(StubRewriter::new([
        ("quick", "rápido"),
        ("fox", "zorro"),
        ("morning", "mañana"),
        ("house", "casa"),
        ("world", "mundo"),
        ("river", "río"),
        ("window", "ventana"),
    ]));

    let config = ScanConfig {
        // Snappier timings than the browser defaults so the demo finishes
        // in a couple of seconds.
        scroll_debounce: Duration::from_millis(50),
        rescan_interval: Duration::from_millis(250),
        ..Default::default()
    };

    let mut session = start_session(
        Arc::clone(&doc),
        config,
        Viewport::new(700.0),
        rewriter,
        store.clone(),
    )
    .expect("default demo config is valid");

    // Let the initial scan process the above-the-fold paragraphs.
    tokio::time::sleep(Duration::from_millis(200)).await;

    // Scroll down the page in steps.
    for scroll_y in [400.0, 900.0, 1500.0] {
        session.handle.scrolled(scroll_y);
        tokio::time::sleep(Duration::from_millis(150)).await;
    }

    // Late-arriving content, as if the page mutated after load.
    let late = {
        let mut d = doc.write();
        let root = d.root();
        let p = d.create_element("p");
        d.set_layout(p, Rect::new(0.0, 1600.0, 600.0, 60.0));
        let t = d.create_text("The fox returned to the house by the river at dawn.");
        d.append_child(p, t);
        d.append_child(root, p);
        p
    };
    session.handle.subtree_added(late);
    tokio::time::sleep(Duration::from_millis(300)).await;

    while let Ok(Telemetry::TokenStatsUpdated { stats }) = session.telemetry.try_recv() {
        info!(
            total_tokens = stats.total_tokens,
            prompt_tokens = stats.prompt_tokens,
            "token stats updated"
        );
    }

    println!("--- woven page ---");
    {
        let d = doc.read();
        for &p in paras.iter().chain(std::iter::once(&late)) {
            println!("{}", render(&d, p));
        }
    }

    // Hover over the first highlight to show the tooltip path.
    {
        let d = doc.read();
        if let Some(span) = d
            .descendants(d.root())
            .find(|&id| d.has_attr(id, ATTR_ORIGINAL))
        {
            polyweave::tooltip::on_pointer_enter(&d, span, &polyweave::tooltip::LogTooltip);
        }
    }

    println!("--- pipeline metrics ---");
    let mut summary: Vec<_> = session.metrics.summary().into_iter().collect();
    summary.sort_by(|a, b| a.0.cmp(&b.0));
    for (name, m) in summary {
        println!(
            "{name}: count={} p50={:.0}us p95={:.0}us",
            m.count, m.p50_us, m.p95_us
        );
    }

    let stats = store.get_settings().token_stats;
    println!(
        "--- usage --- prompt={} completion={} total={}",
        stats.prompt_tokens, stats.completion_tokens, stats.total_tokens
    );

    session.shutdown().await;
}
