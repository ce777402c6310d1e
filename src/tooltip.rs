//! Tooltip collaborator: purely cosmetic, kept behind a trait so the
//! pipeline never depends on how (or whether) tooltips render.

use parking_lot::Mutex;
use tracing::debug;

use crate::dom::{Document, NodeId};
use crate::splice::ATTR_ORIGINAL;

pub trait TooltipRenderer: Send + Sync {
    fn show(&self, text: &str, x: f64, y: f64);
    fn hide(&self);
}

/// The original text stored on a highlight span, if `node` is one.
pub fn original_text_of(doc: &Document, node: NodeId) -> Option<String> {
    doc.attr(node, ATTR_ORIGINAL).map(|s| s.to_string())
}

/// Pointer-enter over a highlight span: surface its original text at the
/// span's location. A non-highlight node hides any open tooltip instead.
pub fn on_pointer_enter(
    doc: &Document,
    node: NodeId,
    renderer: &dyn TooltipRenderer,
) {
    match original_text_of(doc, node) {
        Some(original) => {
            let rect = doc.effective_rect(node);
            let x = rect.x + rect.width / 2.0;
            let y = rect.top();
            renderer.show(&format!("Original: {original}"), x, y);
        }
        None => renderer.hide(),
    }
}

/// Renderer that just logs. Used by the demo binary.
pub struct LogTooltip;

impl TooltipRenderer for LogTooltip {
    fn show(&self, text: &str, x: f64, y: f64) {
        debug!(text, x, y, "tooltip shown");
    }

    fn hide(&self) {
        debug!("tooltip hidden");
    }
}

/// Renderer that records calls for assertions.
#[derive(Default)]
pub struct RecordingTooltip {
    pub shown: Mutex<Vec<(String, f64, f64)>>,
    pub hidden: Mutex<usize>,
}

impl TooltipRenderer for RecordingTooltip {
    fn show(&self, text: &str, x: f64, y: f64) {
        self.shown.lock().push((text.to_string(), x, y));
    }

    fn hide(&self) {
        *self.hidden.lock() += 1;
    }
}
