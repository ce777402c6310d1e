//! Arena-backed document model.
//! Nodes live in a slab indexed by `NodeId` handles; the tree is a
//! linked-sibling structure so insert/detach are O(1) and handles stay
//! stable across arbitrary mutation. Detached subtrees keep their ids,
//! which is what lets late rewrite results check attachment before
//! committing.

use std::collections::HashMap;


/// Stable handle to a node in the document arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Subset of CSS `display` relevant to visibility checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Display {
    #[default]
    Inline,
    Block,
    None,
}

/// Subset of CSS `visibility`. `Inherit` resolves through ancestors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Inherit,
    Visible,
    Hidden,
}

#[derive(Debug, Clone, Default)]
pub struct Style {
    pub display: Display,
    pub visibility: Visibility,
}

/// Layout box in document coordinates (y grows downward).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    pub fn top(&self) -> f64 {
        self.y
    }

    pub fn bottom(&self) -> f64 {
        self.y + self.height
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }
}

#[derive(Debug)]
pub struct ElementData {
    tag: String,
    attrs: HashMap<String, String>,
    pub style: Style,
    pub layout: Rect,
}

#[derive(Debug)]
pub enum NodeData {
    Element(ElementData),
    Text(String),
}

#[derive(Debug)]
struct Node {
    parent: Option<NodeId>,
    prev: Option<NodeId>,
    next: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    data: NodeData,
}

/// The document tree. One instance per page session.
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Document {
    /// Create a document with an attached `body` root element.
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: Vec::with_capacity(64),
            root: NodeId(0),
        };
        doc.root = doc.alloc(NodeData::Element(ElementData {
            tag: "body".into(),
            attrs: HashMap::new(),
            style: Style::default(),
            layout: Rect::default(),
        }));
        doc
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    fn alloc(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            parent: None,
            prev: None,
            next: None,
            first_child: None,
            last_child: None,
            data,
        });
        id
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Create a detached element. Tag names are normalized to lowercase.
    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.alloc(NodeData::Element(ElementData {
            tag: tag.to_ascii_lowercase(),
            attrs: HashMap::new(),
            style: Style::default(),
            layout: Rect::default(),
        }))
    }

    /// Create a detached text node.
    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.alloc(NodeData::Text(text.to_string()))
    }

    pub fn is_element(&self, id: NodeId) -> bool {
        matches!(self.node(id).data, NodeData::Element(_))
    }

    pub fn is_text(&self, id: NodeId) -> bool {
        matches!(self.node(id).data, NodeData::Text(_))
    }

    pub fn tag(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).data {
            NodeData::Element(el) => Some(&el.tag),
            NodeData::Text(_) => None,
        }
    }

    pub fn text(&self, id: NodeId) -> Option<&str> {
        match &self.node(id).data {
            NodeData::Text(t) => Some(t),
            NodeData::Element(_) => None,
        }
    }

    pub fn set_text(&mut self, id: NodeId, text: &str) {
        if let NodeData::Text(t) = &mut self.node_mut(id).data {
            *t = text.to_string();
        }
    }

    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        match &self.node(id).data {
            NodeData::Element(el) => el.attrs.get(name).map(String::as_str),
            NodeData::Text(_) => None,
        }
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let NodeData::Element(el) = &mut self.node_mut(id).data {
            el.attrs.insert(name.to_string(), value.to_string());
        }
    }

    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.attr(id, name).is_some()
    }

    pub fn set_layout(&mut self, id: NodeId, layout: Rect) {
        if let NodeData::Element(el) = &mut self.node_mut(id).data {
            el.layout = layout;
        }
    }

    pub fn layout(&self, id: NodeId) -> Rect {
        match &self.node(id).data {
            NodeData::Element(el) => el.layout,
            NodeData::Text(_) => Rect::default(),
        }
    }

    pub fn set_style(&mut self, id: NodeId, style: Style) {
        if let NodeData::Element(el) = &mut self.node_mut(id).data {
            el.style = style;
        }
    }

    pub fn style(&self, id: NodeId) -> Style {
        match &self.node(id).data {
            NodeData::Element(el) => el.style.clone(),
            NodeData::Text(_) => Style::default(),
        }
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).first_child
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).next
    }

    /// Iterate the children of `id` in order.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut cursor = self.node(id).first_child;
        std::iter::from_fn(move || {
            let current = cursor?;
            cursor = self.node(current).next;
            Some(current)
        })
    }

    /// Iterate proper ancestors of `id`, nearest first.
    pub fn ancestors(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut cursor = self.node(id).parent;
        std::iter::from_fn(move || {
            let current = cursor?;
            cursor = self.node(current).parent;
            Some(current)
        })
    }

    /// Nearest element ancestor of a node (its parent chain's first element).
    pub fn nearest_element_ancestor(&self, id: NodeId) -> Option<NodeId> {
        self.ancestors(id).find(|&a| self.is_element(a))
    }

    /// Whether `id` is reachable from the document root.
    pub fn is_attached(&self, id: NodeId) -> bool {
        if id == self.root {
            return true;
        }
        self.ancestors(id).any(|a| a == self.root)
    }

    /// Append `child` as the last child of `parent`. `child` must be
    /// detached; returns false (and does nothing) otherwise, or if
    /// `parent` is a text node.
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> bool {
        if !self.is_element(parent) || self.node(child).parent.is_some() {
            return false;
        }
        let last = self.node(parent).last_child;
        {
            let c = self.node_mut(child);
            c.parent = Some(parent);
            c.prev = last;
            c.next = None;
        }
        match last {
            Some(last) => self.node_mut(last).next = Some(child),
            None => self.node_mut(parent).first_child = Some(child),
        }
        self.node_mut(parent).last_child = Some(child);
        true
    }

    /// Insert detached `new` immediately before `reference`. Returns false
    /// if `reference` has no parent or `new` is already attached.
    pub fn insert_before(&mut self, new: NodeId, reference: NodeId) -> bool {
        let Some(parent) = self.node(reference).parent else {
            return false;
        };
        if self.node(new).parent.is_some() {
            return false;
        }
        let prev = self.node(reference).prev;
        {
            let n = self.node_mut(new);
            n.parent = Some(parent);
            n.prev = prev;
            n.next = Some(reference);
        }
        self.node_mut(reference).prev = Some(new);
        match prev {
            Some(prev) => self.node_mut(prev).next = Some(new),
            None => self.node_mut(parent).first_child = Some(new),
        }
        true
    }

    /// Unlink `id` from its parent. The subtree below `id` stays intact
    /// and can be re-inserted or simply left to sit in the arena.
    pub fn detach(&mut self, id: NodeId) {
        let (parent, prev, next) = {
            let n = self.node(id);
            (n.parent, n.prev, n.next)
        };
        let Some(parent) = parent else { return };
        match prev {
            Some(prev) => self.node_mut(prev).next = next,
            None => self.node_mut(parent).first_child = next,
        }
        match next {
            Some(next) => self.node_mut(next).prev = prev,
            None => self.node_mut(parent).last_child = prev,
        }
        let n = self.node_mut(id);
        n.parent = None;
        n.prev = None;
        n.next = None;
    }

    /// Replace `target` with a sequence of detached nodes, in order.
    /// Returns false (nothing changes) if `target` has no parent.
    pub fn replace_with(&mut self, target: NodeId, nodes: &[NodeId]) -> bool {
        if self.node(target).parent.is_none() {
            return false;
        }
        if nodes.iter().any(|&n| self.node(n).parent.is_some()) {
            return false;
        }
        for &n in nodes {
            if !self.insert_before(n, target) {
                return false;
            }
        }
        self.detach(target);
        true
    }

    /// Depth-first pre-order traversal of the subtree rooted at `root`,
    /// including `root` itself.
    pub fn descendants(&self, root: NodeId) -> Descendants<'_> {
        Descendants {
            doc: self,
            root,
            next: Some(root),
        }
    }

    /// Concatenated text content of a subtree, document order.
    pub fn text_content(&self, root: NodeId) -> String {
        let mut out = String::new();
        for id in self.descendants(root) {
            if let Some(t) = self.text(id) {
                out.push_str(t);
            }
        }
        out
    }

    /// Layout box to use for visibility math: the node's own box for an
    /// element with one, otherwise the nearest ancestor element's box.
    /// Placeholders and text nodes render inside their container, so the
    /// container's box is the observable geometry.
    pub fn effective_rect(&self, id: NodeId) -> Rect {
        if self.is_element(id) {
            let rect = self.layout(id);
            if rect.area() > 0.0 {
                return rect;
            }
        }
        self.ancestors(id)
            .filter(|&a| self.is_element(a))
            .map(|a| self.layout(a))
            .find(|r| r.area() > 0.0)
            .unwrap_or_default()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

/// Pre-order iterator over a subtree. Stable under reads only; callers
/// that mutate collect ids first.
pub struct Descendants<'a> {
    doc: &'a Document,
    root: NodeId,
    next: Option<NodeId>,
}

impl<'a> Iterator for Descendants<'a> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.next?;
        // Successor: first child, else next sibling, else climb until a
        // sibling exists or we leave the subtree.
        let mut succ = self.doc.node(current).first_child;
        if succ.is_none() {
            let mut cursor = current;
            while cursor != self.root {
                if let Some(sib) = self.doc.node(cursor).next {
                    succ = Some(sib);
                    break;
                }
                match self.doc.node(cursor).parent {
                    Some(p) => cursor = p,
                    None => break,
                }
            }
        }
        self.next = succ;
        Some(current)
    }
}
