//! Visibility oracle and intersection tracking.
//! `is_visible` is a pure function of current style + layout + viewport,
//! cheap enough to run over every candidate during a full-page scan.
//! `IntersectionTracker` watches placeholder elements and reports, exactly
//! once each, the ones whose box crosses the visibility threshold.

use std::collections::HashSet;

use crate::dom::{Display, Document, NodeId, Rect, Visibility};

/// The scrolled window over the document, in document coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub height: f64,
    pub scroll_y: f64,
}

impl Viewport {
    pub fn new(height: f64) -> Self {
        Self {
            height,
            scroll_y: 0.0,
        }
    }

    pub fn top(&self) -> f64 {
        self.scroll_y
    }

    pub fn bottom(&self) -> f64 {
        self.scroll_y + self.height
    }
}

/// Resolved `visibility` for an element: nearest self-or-ancestor setting
/// that is not `Inherit`; the root defaults to visible.
fn computed_hidden(doc: &Document, element: NodeId) -> bool {
    if doc.style(element).visibility != Visibility::Inherit {
        return doc.style(element).visibility == Visibility::Hidden;
    }
    for a in doc.ancestors(element) {
        if !doc.is_element(a) {
            continue;
        }
        match doc.style(a).visibility {
            Visibility::Inherit => continue,
            Visibility::Hidden => return true,
            Visibility::Visible => return false,
        }
    }
    false
}

/// `display: none` removes the whole subtree from rendering.
fn display_suppressed(doc: &Document, element: NodeId) -> bool {
    if doc.style(element).display == Display::None {
        return true;
    }
    doc.ancestors(element)
        .filter(|&a| doc.is_element(a))
        .any(|a| doc.style(a).display == Display::None)
}

/// True iff the element currently occupies on-screen, rendered space:
/// not hidden, not display-suppressed, positive box, and vertical bounds
/// intersecting the viewport.
pub fn is_visible(doc: &Document, element: NodeId, viewport: &Viewport) -> bool {
    if !doc.is_element(element) {
        return false;
    }
    if computed_hidden(doc, element) || display_suppressed(doc, element) {
        return false;
    }
    let rect = doc.layout(element);
    rect.width > 0.0
        && rect.height > 0.0
        && rect.top() <= viewport.bottom()
        && rect.bottom() >= viewport.top()
}

/// Fraction of `rect`'s area inside the viewport. Zero-area boxes report 0.
pub fn intersection_ratio(rect: &Rect, viewport: &Viewport) -> f64 {
    let area = rect.area();
    if area <= 0.0 {
        return 0.0;
    }
    let overlap_top = rect.top().max(viewport.top());
    let overlap_bottom = rect.bottom().min(viewport.bottom());
    let overlap_h = (overlap_bottom - overlap_top).max(0.0);
    (overlap_h * rect.width) / area
}

/// What a visibility check found for the observed placeholders.
#[derive(Debug, Default)]
pub struct CheckOutcome {
    /// Placeholders that crossed the threshold this check. Already
    /// unobserved: a placeholder is reported at most once.
    pub entered: Vec<NodeId>,
    /// Placeholders found detached from the document. Also unobserved;
    /// the caller abandons their pending entries.
    pub detached: Vec<NodeId>,
}

/// One-shot intersection observation over placeholder elements.
pub struct IntersectionTracker {
    observed: HashSet<NodeId>,
    threshold: f64,
}

impl IntersectionTracker {
    pub fn new(threshold: f64) -> Self {
        Self {
            observed: HashSet::new(),
            threshold,
        }
    }

    pub fn observe(&mut self, placeholder: NodeId) {
        self.observed.insert(placeholder);
    }

    pub fn unobserve(&mut self, placeholder: NodeId) {
        self.observed.remove(&placeholder);
    }

    pub fn observed_count(&self) -> usize {
        self.observed.len()
    }

    /// Drop every observation (reprocess path).
    pub fn clear(&mut self) -> Vec<NodeId> {
        self.observed.drain().collect()
    }

    /// Evaluate every observed placeholder against the viewport. Entered
    /// and detached placeholders leave the observed set permanently.
    pub fn check(&mut self, doc: &Document, viewport: &Viewport) -> CheckOutcome {
        let mut outcome = CheckOutcome::default();
        let snapshot: Vec<NodeId> = self.observed.iter().copied().collect();
        for placeholder in snapshot {
            if !doc.is_attached(placeholder) {
                self.observed.remove(&placeholder);
                outcome.detached.push(placeholder);
                continue;
            }
            let rect = doc.effective_rect(placeholder);
            if intersection_ratio(&rect, viewport) >= self.threshold {
                self.observed.remove(&placeholder);
                outcome.entered.push(placeholder);
            }
        }
        outcome
    }
}
