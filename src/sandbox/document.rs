//! Arena-backed document with mutation observers
//!
//! Nodes are never freed: removing a node only detaches it, so a [`NodeId`]
//! stays valid for the lifetime of the document.
//!
//! Mutations queue [`MutationRecord`]s for every observer whose scope covers
//! the target; [`Document::take_records`] hands them out as one batch per
//! subscription.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::env::{MutationKind, MutationRecord, ObserveScope, SubscriptionId};
use crate::selector::{Selector, SelectorTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("unknown node {0:?}")]
    UnknownNode(NodeId),

    #[error("{0:?} cannot have children")]
    NotAContainer(NodeId),

    #[error("{0:?} is not an element")]
    NotAnElement(NodeId),

    #[error("inserting {child:?} under {parent:?} would create a cycle")]
    Cycle { parent: NodeId, child: NodeId },
}

pub type DocumentResult<T> = Result<T, DocumentError>;

#[derive(Debug, Clone)]
enum NodeData {
    Document,
    Element {
        tag: String,
        attrs: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct NodeEntry {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

#[derive(Debug, Clone)]
struct Observer {
    target: NodeId,
    scope: ObserveScope,
}

#[derive(Debug)]
pub struct Document {
    nodes: Vec<NodeEntry>,
    observers: BTreeMap<SubscriptionId, Observer>,
    pending: BTreeMap<SubscriptionId, Vec<MutationRecord<NodeId>>>,
    next_subscription: u64,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    /// Empty document: just the document node
    pub fn new() -> Self {
        Self {
            nodes: vec![NodeEntry {
                data: NodeData::Document,
                parent: None,
                children: Vec::new(),
            }],
            observers: BTreeMap::new(),
            pending: BTreeMap::new(),
            next_subscription: 1,
        }
    }

    /// `<html><head></head><body></body></html>`
    pub fn with_body() -> Self {
        let mut doc = Self::new();
        let root = doc.root();
        let html = doc.create_element("html");
        let head = doc.create_element("head");
        let body = doc.create_element("body");
        // Freshly created nodes under the document cannot fail to attach
        for (parent, child) in [(root, html), (html, head), (html, body)] {
            doc.entry_mut(parent).children.push(child);
            doc.entry_mut(child).parent = Some(parent);
        }
        doc
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// First `<body>` element, if any
    pub fn body(&self) -> Option<NodeId> {
        self.descendants(self.root())
            .find(|&id| self.tag(id) == Some("body"))
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeData::Element {
            tag: tag.to_ascii_lowercase(),
            attrs: Vec::new(),
        })
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Text(text.to_string()))
    }

    /// Create an element with attributes and append it to `parent`
    pub fn append_element(
        &mut self,
        parent: NodeId,
        tag: &str,
        attrs: &[(&str, &str)],
    ) -> DocumentResult<NodeId> {
        let el = self.create_element(tag);
        if let NodeData::Element { attrs: slot, .. } = &mut self.entry_mut(el).data {
            slot.extend(attrs.iter().map(|(k, v)| (k.to_ascii_lowercase(), v.to_string())));
        }
        self.append_child(parent, el)?;
        Ok(el)
    }

    pub fn append_text(&mut self, parent: NodeId, text: &str) -> DocumentResult<NodeId> {
        let node = self.create_text(text);
        self.append_child(parent, node)?;
        Ok(node)
    }

    /// Move `child` to the end of `parent`'s children
    pub fn append_child(&mut self, parent: NodeId, child: NodeId) -> DocumentResult<()> {
        self.check(parent)?;
        self.check(child)?;
        if matches!(self.entry(parent).data, NodeData::Text(_)) {
            return Err(DocumentError::NotAContainer(parent));
        }
        if self.is_inclusive_ancestor(child, parent) {
            return Err(DocumentError::Cycle { parent, child });
        }

        self.detach(child);
        self.entry_mut(parent).children.push(child);
        self.entry_mut(child).parent = Some(parent);
        self.queue(parent, MutationKind::ChildList, None);
        Ok(())
    }

    /// Detach `node` from its parent; no-op for detached nodes
    pub fn remove(&mut self, node: NodeId) -> DocumentResult<()> {
        self.check(node)?;
        self.detach(node);
        Ok(())
    }

    /// Text nodes change in place; elements get their children replaced by
    /// a single text node
    pub fn set_text(&mut self, node: NodeId, text: &str) -> DocumentResult<()> {
        self.check(node)?;
        match &mut self.entry_mut(node).data {
            NodeData::Text(current) => {
                *current = text.to_string();
                self.queue(node, MutationKind::CharacterData, None);
            }
            NodeData::Element { .. } => {
                for child in std::mem::take(&mut self.entry_mut(node).children) {
                    self.entry_mut(child).parent = None;
                }
                if !text.is_empty() {
                    let text_node = self.create_text(text);
                    self.entry_mut(node).children.push(text_node);
                    self.entry_mut(text_node).parent = Some(node);
                }
                self.queue(node, MutationKind::ChildList, None);
            }
            NodeData::Document => return Err(DocumentError::NotAnElement(node)),
        }
        Ok(())
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) -> DocumentResult<()> {
        self.check(node)?;
        let name = name.to_ascii_lowercase();
        let NodeData::Element { attrs, .. } = &mut self.entry_mut(node).data else {
            return Err(DocumentError::NotAnElement(node));
        };
        match attrs.iter_mut().find(|(k, _)| *k == name) {
            Some((_, current)) => *current = value.to_string(),
            None => attrs.push((name.clone(), value.to_string())),
        }
        self.queue(node, MutationKind::Attributes, Some(name));
        Ok(())
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) -> DocumentResult<()> {
        self.check(node)?;
        let name = name.to_ascii_lowercase();
        let NodeData::Element { attrs, .. } = &mut self.entry_mut(node).data else {
            return Err(DocumentError::NotAnElement(node));
        };
        let before = attrs.len();
        attrs.retain(|(k, _)| *k != name);
        if attrs.len() != before {
            self.queue(node, MutationKind::Attributes, Some(name));
        }
        Ok(())
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        match &self.nodes.get(node.0)?.data {
            NodeData::Element { tag, .. } => Some(tag),
            _ => None,
        }
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        match &self.nodes.get(node.0)?.data {
            NodeData::Element { attrs, .. } => attrs
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(name))
                .map(|(_, v)| v.as_str()),
            _ => None,
        }
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0)?.parent
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node.0)
            .map(|entry| entry.children.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `node` is `ancestor` or below it
    pub fn is_inclusive_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut cursor = Some(node);
        while let Some(current) = cursor {
            if current == ancestor {
                return true;
            }
            cursor = self.parent(current);
        }
        false
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        self.is_inclusive_ancestor(self.root(), node)
    }

    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        if let Some(NodeEntry {
            data: NodeData::Text(text),
            ..
        }) = self.nodes.get(node.0)
        {
            out.push_str(text);
        }
        for id in self.descendants(node) {
            if let NodeData::Text(text) = &self.entry(id).data {
                out.push_str(text);
            }
        }
        out
    }

    /// First element below `scope` in document order matching `selector`
    pub fn query(&self, scope: NodeId, selector: &Selector) -> Option<NodeId> {
        self.descendants(scope)
            .find(|&id| selector.matches(&ElementRef { doc: self, id }))
    }

    /// Every element below `scope` matching `selector`, in document order
    pub fn query_all(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        self.descendants(scope)
            .filter(|&id| selector.matches(&ElementRef { doc: self, id }))
            .collect()
    }

    /// Pre-order descendants of `scope`, excluding `scope`
    pub fn descendants(&self, scope: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        let mut stack: Vec<NodeId> = self.children(scope).iter().rev().copied().collect();
        std::iter::from_fn(move || {
            let next = stack.pop()?;
            stack.extend(self.children(next).iter().rev().copied());
            Some(next)
        })
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    pub fn observe(&mut self, target: NodeId, scope: ObserveScope) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.observers.insert(id, Observer { target, scope });
        id
    }

    /// Stop observing and drop undelivered records
    pub fn disconnect(&mut self, subscription: SubscriptionId) -> bool {
        self.pending.remove(&subscription);
        self.observers.remove(&subscription).is_some()
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn has_pending_records(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Drain queued records, one batch per subscription in subscription order
    pub fn take_records(&mut self) -> Vec<(SubscriptionId, Vec<MutationRecord<NodeId>>)> {
        std::mem::take(&mut self.pending).into_iter().collect()
    }

    fn queue(&mut self, target: NodeId, kind: MutationKind, attribute: Option<String>) {
        let interested: Vec<SubscriptionId> = self
            .observers
            .iter()
            .filter(|(_, observer)| {
                let wants_kind = match kind {
                    MutationKind::ChildList => observer.scope.child_list,
                    MutationKind::CharacterData => observer.scope.character_data,
                    MutationKind::Attributes => observer.scope.attributes,
                };
                let in_scope = observer.target == target
                    || (observer.scope.subtree && self.is_inclusive_ancestor(observer.target, target));
                wants_kind && in_scope
            })
            .map(|(id, _)| *id)
            .collect();

        for id in interested {
            self.pending.entry(id).or_default().push(MutationRecord {
                kind,
                target,
                attribute: attribute.clone(),
            });
        }
    }

    fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.entry(node).parent else {
            return;
        };
        self.entry_mut(parent).children.retain(|&c| c != node);
        self.entry_mut(node).parent = None;
        self.queue(parent, MutationKind::ChildList, None);
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        self.nodes.push(NodeEntry {
            data,
            parent: None,
            children: Vec::new(),
        });
        NodeId(self.nodes.len() - 1)
    }

    fn check(&self, node: NodeId) -> DocumentResult<()> {
        if node.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(DocumentError::UnknownNode(node))
        }
    }

    fn entry(&self, node: NodeId) -> &NodeEntry {
        &self.nodes[node.0]
    }

    fn entry_mut(&mut self, node: NodeId) -> &mut NodeEntry {
        &mut self.nodes[node.0]
    }
}

/// Selector matching view of an element
#[derive(Clone, Copy)]
pub struct ElementRef<'a> {
    doc: &'a Document,
    id: NodeId,
}

impl SelectorTarget for ElementRef<'_> {
    fn local_name(&self) -> Option<&str> {
        self.doc.tag(self.id)
    }

    fn attribute(&self, name: &str) -> Option<&str> {
        self.doc.attribute(self.id, name)
    }

    fn parent_element(&self) -> Option<Self> {
        let parent = self.doc.parent(self.id)?;
        self.doc.tag(parent).map(|_| ElementRef {
            doc: self.doc,
            id: parent,
        })
    }
}
