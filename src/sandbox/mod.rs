//! In-memory environment for the watcher
//!
//! [`Sandbox`] pairs an arena [`Document`] with a [`VirtualClock`] and
//! implements [`Environment`] over them. Time only moves when the caller
//! advances it, which makes quiescence behaviour fully deterministic.
//!
//! ```ignore
//! let mut watcher = Watcher::new(Sandbox::new());
//! watcher.watch("#app .card", |node| { /* ... */ Ok(()) }, WatchOptions::stable());
//!
//! let body = watcher.env().dom().body().unwrap();
//! watcher.env_mut().dom_mut().append_element(body, "div", &[("id", "app")])?;
//! watcher.advance_ms(250);
//! ```

mod clock;
mod document;

pub use clock::VirtualClock;
pub use document::{Document, DocumentError, DocumentResult, ElementRef, NodeId};

use std::time::Duration;

use tracing::trace;

use crate::env::{Environment, Event, ObserveScope, SubscriptionId, TimerId};
use crate::selector::Selector;
use crate::watcher::Watcher;

#[derive(Debug)]
pub struct Sandbox {
    document: Document,
    clock: VirtualClock,
    ready: bool,
}

impl Default for Sandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Sandbox {
    /// Parsed document with an empty body
    pub fn new() -> Self {
        Self::from_document(Document::with_body())
    }

    pub fn from_document(document: Document) -> Self {
        Self {
            document,
            clock: VirtualClock::new(),
            ready: true,
        }
    }

    /// Document still parsing: watches defer until `mark_ready`
    pub fn loading(document: Document) -> Self {
        Self {
            ready: false,
            ..Self::from_document(document)
        }
    }

    pub fn dom(&self) -> &Document {
        &self.document
    }

    pub fn dom_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn pending_timers(&self) -> usize {
        self.clock.pending()
    }

    pub fn active_subscriptions(&self) -> usize {
        self.document.observer_count()
    }
}

impl Environment for Sandbox {
    type Node = NodeId;

    fn document(&self) -> NodeId {
        self.document.root()
    }

    fn body(&self) -> Option<NodeId> {
        self.document.body()
    }

    fn query(&self, scope: &NodeId, selector: &Selector) -> Option<NodeId> {
        self.document.query(*scope, selector)
    }

    fn contains(&self, ancestor: &NodeId, node: &NodeId) -> bool {
        self.document.is_inclusive_ancestor(*ancestor, *node)
    }

    fn text_content(&self, node: &NodeId) -> String {
        self.document.text_content(*node)
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    fn observe(&mut self, node: &NodeId, scope: ObserveScope) -> SubscriptionId {
        self.document.observe(*node, scope)
    }

    fn disconnect(&mut self, subscription: SubscriptionId) {
        self.document.disconnect(subscription);
    }

    fn set_timer(&mut self, delay: Duration) -> TimerId {
        self.clock.schedule(delay)
    }

    fn clear_timer(&mut self, timer: TimerId) {
        self.clock.cancel(timer);
    }
}

/// Event loop driving for the sandbox
impl Watcher<Sandbox> {
    /// Deliver queued mutation batches
    pub fn flush(&mut self) {
        loop {
            let batches = self.env_mut().document.take_records();
            if batches.is_empty() {
                break;
            }
            for (subscription, records) in batches {
                self.dispatch(Event::Mutations {
                    subscription,
                    records,
                });
            }
        }
    }

    /// Move virtual time forward by `by`, firing due timers in order
    pub fn advance(&mut self, by: Duration) {
        let target = self.env().now() + by;
        self.flush();
        while let Some(timer) = self.env_mut().clock.pop_due(target) {
            trace!("sandbox: {:?} fired at {:?}", timer, self.env().now());
            self.dispatch(Event::TimerFired(timer));
            self.flush();
        }
        self.env_mut().clock.set_now(target);
    }

    pub fn advance_ms(&mut self, ms: u64) {
        self.advance(Duration::from_millis(ms));
    }

    /// Finish parsing and let deferred watches start
    pub fn mark_ready(&mut self) {
        self.env_mut().ready = true;
        self.dispatch(Event::DocumentReady);
    }
}
