//! Environment capability consumed by the watcher
//!
//! The watcher never talks to a concrete DOM. Whatever hosts it (the
//! in-memory [`Sandbox`](crate::sandbox::Sandbox), a browser bridge, a test
//! double) implements [`Environment`] and feeds [`Event`]s back through
//! [`Watcher::dispatch`](crate::watcher::Watcher::dispatch).

use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use crate::selector::Selector;

/// Handle of a change subscription, allocated by the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

/// Handle of a scheduled timer, allocated by the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

/// Which changes under the observed node are reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserveScope {
    pub child_list: bool,
    pub subtree: bool,
    pub character_data: bool,
    pub attributes: bool,
}

impl ObserveScope {
    /// Structural changes anywhere below the node (discovery)
    pub const STRUCTURE: ObserveScope = ObserveScope {
        child_list: true,
        subtree: true,
        character_data: false,
        attributes: false,
    };

    /// Everything below and on the node (stability tracking)
    pub const CONTENT: ObserveScope = ObserveScope {
        child_list: true,
        subtree: true,
        character_data: true,
        attributes: true,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    ChildList,
    CharacterData,
    Attributes,
}

/// One observed change
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord<N> {
    pub kind: MutationKind,
    pub target: N,
    /// Attribute name for `Attributes` records
    pub attribute: Option<String>,
}

/// Input to the watcher's event loop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event<N> {
    /// One batch of records for a subscription
    Mutations {
        subscription: SubscriptionId,
        records: Vec<MutationRecord<N>>,
    },
    TimerFired(TimerId),
    /// The initial tree finished parsing
    DocumentReady,
}

/// Tree query, change notification and timer primitives
pub trait Environment {
    /// Stable node handle
    type Node: Clone + Eq + Hash + fmt::Debug;

    /// Top-level document node, always present
    fn document(&self) -> Self::Node;

    /// Default root container, if it exists yet
    fn body(&self) -> Option<Self::Node>;

    /// First descendant of `scope` (in document order) matching `selector`
    fn query(&self, scope: &Self::Node, selector: &Selector) -> Option<Self::Node>;

    /// Whether `node` is `ancestor` or one of its descendants
    fn contains(&self, ancestor: &Self::Node, node: &Self::Node) -> bool;

    /// Concatenated text of `node` and its descendants
    fn text_content(&self, node: &Self::Node) -> String;

    /// Whether the initial tree is fully parsed
    fn is_ready(&self) -> bool;

    fn observe(&mut self, node: &Self::Node, scope: ObserveScope) -> SubscriptionId;

    /// Must tolerate ids that were already disconnected
    fn disconnect(&mut self, subscription: SubscriptionId);

    fn set_timer(&mut self, delay: Duration) -> TimerId;

    /// Must tolerate ids that already fired or were cleared
    fn clear_timer(&mut self, timer: TimerId);
}
