//! Node eligibility filter.
//! Walks a subtree in document order and keeps the text nodes worth
//! sending to the rewrite service: non-empty, long enough, outside
//! excluded containers, not already woven, not already claimed.

use regex::Regex;

use crate::config::ScanConfig;
use crate::dom::{Document, NodeId};
use crate::splice::ATTR_WOVEN;
use crate::tracking::TrackingContext;

pub struct EligibilityFilter {
    word_re: Regex,
}

impl EligibilityFilter {
    pub fn new() -> Self {
        Self {
            // A token counts as a word if it contains at least one word
            // character. "–" and "..." don't; "don't" and "10x" do.
            word_re: Regex::new(r"\w").expect("static word regex"),
        }
    }

    /// Count word-like tokens in a text.
    pub fn word_count(&self, text: &str) -> usize {
        text.split_whitespace()
            .filter(|tok| self.word_re.is_match(tok))
            .count()
    }

    fn inside_excluded(&self, doc: &Document, text_node: NodeId, cfg: &ScanConfig) -> bool {
        match doc.nearest_element_ancestor(text_node) {
            Some(el) => doc.tag(el).map(|t| cfg.is_excluded_tag(t)).unwrap_or(false),
            None => false,
        }
    }

    fn inside_woven(&self, doc: &Document, text_node: NodeId) -> bool {
        doc.ancestors(text_node)
            .filter(|&a| doc.is_element(a))
            .any(|a| doc.has_attr(a, ATTR_WOVEN))
    }

    /// Whether a single text node qualifies, ignoring membership state.
    pub fn node_qualifies(
        &self,
        doc: &Document,
        text_node: NodeId,
        cfg: &ScanConfig,
    ) -> bool {
        let Some(text) = doc.text(text_node) else {
            return false;
        };
        if text.trim().is_empty() {
            return false;
        }
        if self.inside_excluded(doc, text_node, cfg) {
            return false;
        }
        // Text produced by an earlier splice must never re-match.
        if self.inside_woven(doc, text_node) {
            return false;
        }
        self.word_count(text) >= cfg.min_words
    }

    /// Descendant text nodes of `root` that qualify for weaving, in
    /// document order. Nodes already claimed by the tracking context are
    /// skipped.
    pub fn collect_eligible(
        &self,
        doc: &Document,
        root: NodeId,
        cfg: &ScanConfig,
        ctx: &TrackingContext,
    ) -> Vec<NodeId> {
        doc.descendants(root)
            .filter(|&id| doc.is_text(id))
            .filter(|&id| !ctx.is_node_processed(id))
            .filter(|&id| self.node_qualifies(doc, id, cfg))
            .collect()
    }
}

impl Default for EligibilityFilter {
    fn default() -> Self {
        Self::new()
    }
}
