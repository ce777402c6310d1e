//! DOM splicer: turns a rewritten string plus its substitution list into a
//! sequence of plain-text and highlight nodes, and commits that sequence
//! over the original text node — best effort, never transactional. A node
//! that left the document while the rewrite was in flight is simply
//! skipped.

use tracing::debug;

use crate::dom::{Document, NodeId};
use crate::rewrite::Substitution;
use crate::tracking::TrackingContext;

/// Class carried by every highlight span.
pub const HIGHLIGHT_CLASS: &str = "polyweave-highlight";
/// Attribute holding the pre-rewrite text, read back for tooltips.
pub const ATTR_ORIGINAL: &str = "data-original";
/// Marker attribute: this element was produced by a splice and its subtree
/// must never re-enter the pipeline.
pub const ATTR_WOVEN: &str = "data-polyweave";
/// Marker attribute on visibility placeholders.
pub const ATTR_PLACEHOLDER: &str = "data-polyweave-placeholder";

/// One node of a built replacement sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpliceNode {
    Text(String),
    Highlight { replacement: String, original: String },
}

impl SpliceNode {
    /// The visible text this node contributes.
    pub fn visible_text(&self) -> &str {
        match self {
            SpliceNode::Text(t) => t,
            SpliceNode::Highlight { replacement, .. } => replacement,
        }
    }
}

/// Build the replacement sequence for a rewritten text.
///
/// Substitutions are consumed in order of their replacement's first
/// occurrence; one that cannot be located at or after the cursor is
/// skipped rather than failing the sequence. With no substitutions the
/// output is the rewritten text verbatim.
pub fn build_replacement_nodes(rewritten: &str, substitutions: &[Substitution]) -> Vec<SpliceNode> {
    let mut ordered: Vec<&Substitution> = substitutions
        .iter()
        .filter(|s| !s.replacement.is_empty())
        .collect();
    ordered.sort_by_key(|s| rewritten.find(&s.replacement).unwrap_or(usize::MAX));

    let mut nodes = Vec::new();
    let mut cursor = 0usize;

    for sub in ordered {
        let Some(rel) = rewritten[cursor..].find(&sub.replacement) else {
            debug!(replacement = %sub.replacement, "substitution not locatable, skipped");
            continue;
        };
        let at = cursor + rel;
        if at > cursor {
            nodes.push(SpliceNode::Text(rewritten[cursor..at].to_string()));
        }
        nodes.push(SpliceNode::Highlight {
            replacement: sub.replacement.clone(),
            original: sub.original.clone(),
        });
        cursor = at + sub.replacement.len();
    }

    if cursor < rewritten.len() {
        nodes.push(SpliceNode::Text(rewritten[cursor..].to_string()));
    }
    nodes
}

/// Materialize a built sequence and atomically replace `text_node` with it.
/// Returns false (and leaves the document untouched) if the node is no
/// longer attached. Every emitted node is marked processed so later scans
/// skip it.
pub fn commit(
    doc: &mut Document,
    text_node: NodeId,
    nodes: &[SpliceNode],
    ctx: &mut TrackingContext,
) -> bool {
    if !doc.is_attached(text_node) {
        debug!(node = ?text_node, "splice target detached, result discarded");
        return false;
    }

    let mut created = Vec::with_capacity(nodes.len());
    for node in nodes {
        match node {
            SpliceNode::Text(t) => {
                let id = doc.create_text(t);
                ctx.mark_node_processed(id);
                created.push(id);
            }
            SpliceNode::Highlight {
                replacement,
                original,
            } => {
                let span = doc.create_element("span");
                doc.set_attr(span, "class", HIGHLIGHT_CLASS);
                doc.set_attr(span, ATTR_ORIGINAL, original);
                doc.set_attr(span, ATTR_WOVEN, "1");
                doc.set_attr(span, "title", &format!("Original: {original}"));
                let inner = doc.create_text(replacement);
                doc.append_child(span, inner);
                ctx.mark_node_processed(span);
                ctx.mark_node_processed(inner);
                created.push(span);
            }
        }
    }

    doc.replace_with(text_node, &created)
}
