//! Per-node bookkeeping for discovered nodes

use std::collections::HashMap;
use std::hash::Hash;

use crate::env::{SubscriptionId, TimerId};
use crate::watcher::stability::Quiescence;

/// Per-node lifecycle
///
/// `Discovered -> PendingCheck -> Notified`, and back to `PendingCheck`
/// when a notified node changes again in persistent mode. Without stability
/// a node goes straight to `Notified` and stays there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Discovered,
    /// A quiescence check is scheduled
    PendingCheck,
    /// Delivered; waits for further changes in persistent mode
    Notified,
}

#[derive(Debug)]
pub(crate) struct TrackedNode<N> {
    pub node: N,
    pub state: NodeState,
    pub subscription: Option<SubscriptionId>,
    /// At most one outstanding check per node
    pub timer: Option<TimerId>,
    pub mutations: u64,
    pub quiescence: Quiescence,
    /// Text last handed to `on_ready`
    pub delivered: Option<String>,
}

impl<N> TrackedNode<N> {
    pub fn new(node: N, required_stable_checks: u32) -> Self {
        Self {
            node,
            state: NodeState::Discovered,
            subscription: None,
            timer: None,
            mutations: 0,
            quiescence: Quiescence::new(required_stable_checks),
            delivered: None,
        }
    }
}

/// Slot arena of tracked nodes with a reverse index by node handle
///
/// Slot numbers stay valid until the slot is freed, which is what timer and
/// subscription routes key on.
#[derive(Debug)]
pub(crate) struct NodeTable<N> {
    slots: Vec<Option<TrackedNode<N>>>,
    free: Vec<usize>,
    index: HashMap<N, usize>,
}

impl<N: Clone + Eq + Hash> NodeTable<N> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn contains(&self, node: &N) -> bool {
        self.index.contains_key(node)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn state_of(&self, node: &N) -> Option<NodeState> {
        let slot = *self.index.get(node)?;
        self.slots
            .get(slot)
            .and_then(Option::as_ref)
            .map(|tracked| tracked.state)
    }

    pub fn insert(&mut self, tracked: TrackedNode<N>) -> usize {
        let node = tracked.node.clone();
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot] = Some(tracked);
                slot
            }
            None => {
                self.slots.push(Some(tracked));
                self.slots.len() - 1
            }
        };
        self.index.insert(node, slot);
        slot
    }

    pub fn get_mut(&mut self, slot: usize) -> Option<&mut TrackedNode<N>> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    pub fn remove(&mut self, slot: usize) -> Option<TrackedNode<N>> {
        let tracked = self.slots.get_mut(slot)?.take()?;
        self.index.remove(&tracked.node);
        self.free.push(slot);
        Some(tracked)
    }

    /// Occupied slots, in slot order
    pub fn slots(&self) -> Vec<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(slot, entry)| entry.as_ref().map(|_| slot))
            .collect()
    }

    pub fn node(&self, slot: usize) -> Option<&N> {
        self.slots
            .get(slot)
            .and_then(Option::as_ref)
            .map(|tracked| &tracked.node)
    }
}
