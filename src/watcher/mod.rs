//! Element appearance and stability watcher
//!
//! A [`Watcher`] owns an [`Environment`] and any number of watch requests.
//! Each request looks for the first node matching its selector under a root
//! container and hands it to `on_ready`, either as soon as it shows up or,
//! in `stable` mode, once its content has stopped changing for
//! `required_stable_checks` consecutive debounce windows.
//!
//! # Event flow
//!
//! Everything runs on the caller's thread. The environment reports changes
//! and expired timers as [`Event`]s, and [`Watcher::dispatch`] routes each
//! one to the request that owns the subscription or timer:
//!
//! - root subscription: re-query, discover new matches
//! - document fallback subscription: root container appeared, attach to it
//! - node subscription: count the batch, reschedule the node's check
//! - check timer: compare against the snapshot, settle or reschedule
//! - timeout timer: give up
//!
//! Routes for released subscriptions and timers are dropped at release
//! time, so late events for them are ignored.

mod options;
mod stability;
mod tracked;

pub use options::{DEFAULT_DEBOUNCE_MS, DEFAULT_REQUIRED_STABLE_CHECKS, Settings, WatchOptions};
pub use stability::{Quiescence, Verdict};
pub use tracked::NodeState;

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, info, trace, warn};

use crate::env::{Environment, Event, MutationKind, MutationRecord, ObserveScope, SubscriptionId, TimerId};
use crate::selector::Selector;
use crate::utils::WatchError;
use tracked::{NodeTable, TrackedNode};

/// Callback invoked with the matched node
pub type ReadyCallback<N> = Box<dyn FnMut(N) -> anyhow::Result<()>>;

/// Out-of-band sink for watcher failures
pub type ErrorReporter = Box<dyn FnMut(&WatchError)>;

/// Returned by [`Watcher::watch`]; pass to [`Watcher::cancel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CancelHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Initial tree still parsing
    AwaitingDocument,
    /// Root container missing, document observed for it
    AwaitingRoot,
    Watching,
    Retired,
}

#[derive(Debug, Clone, Copy)]
enum SubTarget {
    Root,
    Fallback,
    Node(usize),
}

#[derive(Debug, Clone, Copy)]
enum TimerTarget {
    Check(usize),
    Timeout,
}

#[derive(Debug, Clone, Copy)]
struct Route<T> {
    watch: u64,
    target: T,
}

struct WatchRequest<N> {
    selector: Selector,
    root_selector: Option<Selector>,
    settings: Settings,
    on_ready: ReadyCallback<N>,
    phase: Phase,
    root: Option<N>,
    root_subscription: Option<SubscriptionId>,
    fallback_subscription: Option<SubscriptionId>,
    timeout_timer: Option<TimerId>,
    nodes: NodeTable<N>,
    notifications: u64,
}

impl<N> WatchRequest<N> {
    fn is_retired(&self) -> bool {
        self.phase == Phase::Retired
    }
}

pub struct Watcher<E: Environment> {
    env: E,
    requests: BTreeMap<u64, WatchRequest<E::Node>>,
    subscriptions: HashMap<SubscriptionId, Route<SubTarget>>,
    timers: HashMap<TimerId, Route<TimerTarget>>,
    next_id: u64,
    reporter: Option<ErrorReporter>,
}

impl<E: Environment> Watcher<E> {
    pub fn new(env: E) -> Self {
        Self {
            env,
            requests: BTreeMap::new(),
            subscriptions: HashMap::new(),
            timers: HashMap::new(),
            next_id: 1,
            reporter: None,
        }
    }

    pub fn env(&self) -> &E {
        &self.env
    }

    pub fn env_mut(&mut self) -> &mut E {
        &mut self.env
    }

    /// Install a sink that receives every reported failure
    pub fn on_error<F>(&mut self, reporter: F)
    where
        F: FnMut(&WatchError) + 'static,
    {
        self.reporter = Some(Box::new(reporter));
    }

    /// Start watching for `selector`
    ///
    /// Never fails: an unparsable selector is reported and the returned
    /// handle refers to a request that is already retired. With
    /// `stable = false` and a match already present, `on_ready` runs before
    /// this returns.
    pub fn watch<F>(&mut self, selector: &str, on_ready: F, options: WatchOptions) -> CancelHandle
    where
        F: FnMut(E::Node) -> anyhow::Result<()> + 'static,
    {
        let id = self.next_id;
        self.next_id += 1;
        let handle = CancelHandle(id);

        let parsed = match Selector::parse(selector) {
            Ok(parsed) => parsed,
            Err(source) => {
                self.report(WatchError::InvalidSelector {
                    selector: selector.to_string(),
                    source,
                });
                return handle;
            }
        };

        let settings = options.normalize();
        let root_selector = match settings.root.as_deref().map(Selector::parse).transpose() {
            Ok(root_selector) => root_selector,
            Err(source) => {
                self.report(WatchError::InvalidSelector {
                    selector: settings.root.clone().unwrap_or_default(),
                    source,
                });
                return handle;
            }
        };

        debug!(
            "watch #{} '{}' (once={}, stable={}, debounce={:?}, checks={})",
            id,
            parsed,
            settings.once,
            settings.stable,
            settings.debounce,
            settings.required_stable_checks
        );

        let mut req = WatchRequest {
            selector: parsed,
            root_selector,
            settings,
            on_ready: Box::new(on_ready),
            phase: Phase::AwaitingDocument,
            root: None,
            root_subscription: None,
            fallback_subscription: None,
            timeout_timer: None,
            nodes: NodeTable::new(),
            notifications: 0,
        };

        if let Some(timeout) = req.settings.timeout {
            let timer = self.env.set_timer(timeout);
            self.timers.insert(
                timer,
                Route {
                    watch: id,
                    target: TimerTarget::Timeout,
                },
            );
            req.timeout_timer = Some(timer);
        }

        if self.env.is_ready() {
            self.start(id, &mut req);
        } else {
            debug!("watch #{}: document still loading, deferring", id);
        }

        self.restore(id, req);
        handle
    }

    /// Detach every subscription and timer of the request
    ///
    /// Returns whether anything was still active. Calling it again, or after
    /// the request retired on its own, is a no-op.
    pub fn cancel(&mut self, handle: CancelHandle) -> bool {
        let Some(mut req) = self.requests.remove(&handle.0) else {
            trace!("cancel #{}: already retired", handle.0);
            return false;
        };
        info!("watch #{} '{}' cancelled", handle.0, req.selector);
        self.retire(&mut req);
        true
    }

    pub fn is_active(&self, handle: CancelHandle) -> bool {
        self.requests.contains_key(&handle.0)
    }

    pub fn active_watches(&self) -> usize {
        self.requests.len()
    }

    /// Number of nodes the request currently tracks
    pub fn tracked_nodes(&self, handle: CancelHandle) -> usize {
        self.requests
            .get(&handle.0)
            .map(|req| req.nodes.len())
            .unwrap_or(0)
    }

    /// Where `node` is in its per-node lifecycle, if the request tracks it
    pub fn node_state(&self, handle: CancelHandle, node: &E::Node) -> Option<NodeState> {
        self.requests
            .get(&handle.0)
            .and_then(|req| req.nodes.state_of(node))
    }

    /// Successful `on_ready` calls so far for a live request
    pub fn notifications(&self, handle: CancelHandle) -> u64 {
        self.requests
            .get(&handle.0)
            .map(|req| req.notifications)
            .unwrap_or(0)
    }

    /// Feed one environment event through the state machine
    pub fn dispatch(&mut self, event: Event<E::Node>) {
        match event {
            Event::Mutations {
                subscription,
                records,
            } => self.on_mutations(subscription, &records),
            Event::TimerFired(timer) => self.on_timer(timer),
            Event::DocumentReady => self.on_document_ready(),
        }
    }

    fn on_mutations(&mut self, subscription: SubscriptionId, records: &[MutationRecord<E::Node>]) {
        let Some(route) = self.subscriptions.get(&subscription).copied() else {
            trace!("dropping {} record(s) for released {:?}", records.len(), subscription);
            return;
        };
        let Some(mut req) = self.requests.remove(&route.watch) else {
            return;
        };

        match route.target {
            SubTarget::Root => self.on_root_changed(route.watch, &mut req),
            SubTarget::Fallback => self.on_document_changed(route.watch, &mut req),
            SubTarget::Node(slot) => self.on_node_changed(route.watch, &mut req, slot, records),
        }

        self.restore(route.watch, req);
    }

    fn on_timer(&mut self, timer: TimerId) {
        let Some(route) = self.timers.remove(&timer) else {
            trace!("ignoring stale {:?}", timer);
            return;
        };
        let Some(mut req) = self.requests.remove(&route.watch) else {
            return;
        };

        match route.target {
            TimerTarget::Check(slot) => self.on_check(route.watch, &mut req, slot, timer),
            TimerTarget::Timeout => {
                req.timeout_timer = None;
                let waited_ms = req
                    .settings
                    .timeout
                    .map(|t| t.as_millis() as u64)
                    .unwrap_or_default();
                self.report(WatchError::SelectorNeverMatched {
                    selector: req.selector.to_string(),
                    waited_ms,
                });
                self.retire(&mut req);
            }
        }

        self.restore(route.watch, req);
    }

    fn on_document_ready(&mut self) {
        let waiting: Vec<u64> = self
            .requests
            .iter()
            .filter(|(_, req)| req.phase == Phase::AwaitingDocument)
            .map(|(id, _)| *id)
            .collect();

        for id in waiting {
            if let Some(mut req) = self.requests.remove(&id) {
                self.start(id, &mut req);
                self.restore(id, req);
            }
        }
    }

    /// Put a request back unless it retired while taken out
    fn restore(&mut self, id: u64, req: WatchRequest<E::Node>) {
        if !req.is_retired() {
            self.requests.insert(id, req);
        }
    }

    // ------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------

    fn start(&mut self, id: u64, req: &mut WatchRequest<E::Node>) {
        match self.resolve_root(req) {
            Some(root) => self.attach_root(id, req, root),
            None => {
                debug!(
                    "watch #{}: root {} not present, observing document",
                    id,
                    req.settings.root.as_deref().unwrap_or("body")
                );
                req.phase = Phase::AwaitingRoot;
                let document = self.env.document();
                let subscription = self.env.observe(&document, ObserveScope::STRUCTURE);
                self.subscriptions.insert(
                    subscription,
                    Route {
                        watch: id,
                        target: SubTarget::Fallback,
                    },
                );
                req.fallback_subscription = Some(subscription);
            }
        }
    }

    fn resolve_root(&self, req: &WatchRequest<E::Node>) -> Option<E::Node> {
        match &req.root_selector {
            Some(selector) => self.env.query(&self.env.document(), selector),
            None => self.env.body(),
        }
    }

    fn attach_root(&mut self, id: u64, req: &mut WatchRequest<E::Node>, root: E::Node) {
        req.phase = Phase::Watching;
        req.root = Some(root.clone());

        if let Some(node) = self.env.query(&root, &req.selector) {
            self.discover(id, req, node);
            if req.is_retired() {
                return;
            }
        }

        let subscription = self.env.observe(&root, ObserveScope::STRUCTURE);
        self.subscriptions.insert(
            subscription,
            Route {
                watch: id,
                target: SubTarget::Root,
            },
        );
        req.root_subscription = Some(subscription);
    }

    fn on_document_changed(&mut self, id: u64, req: &mut WatchRequest<E::Node>) {
        let Some(root) = self.resolve_root(req) else {
            return;
        };
        debug!("watch #{}: root container appeared", id);
        if let Some(subscription) = req.fallback_subscription.take() {
            self.release_subscription(subscription);
        }
        self.attach_root(id, req, root);
    }

    fn on_root_changed(&mut self, id: u64, req: &mut WatchRequest<E::Node>) {
        let Some(root) = req.root.clone() else {
            return;
        };

        for slot in req.nodes.slots() {
            let detached = req
                .nodes
                .node(slot)
                .is_some_and(|node| !self.env.contains(&root, node));
            if detached {
                debug!("watch #{}: tracked node left the tree", id);
                self.release_node(req, slot);
            }
        }

        if let Some(node) = self.env.query(&root, &req.selector) {
            self.discover(id, req, node);
        }
    }

    fn discover(&mut self, id: u64, req: &mut WatchRequest<E::Node>, node: E::Node) {
        if req.nodes.contains(&node) {
            return;
        }
        // A one-shot request settles a single candidate at a time
        if req.settings.once && !req.nodes.is_empty() {
            return;
        }

        debug!("watch #{} '{}': discovered {:?}", id, req.selector, node);

        if !req.settings.stable {
            if !self.deliver(req, node.clone()) {
                // Left untracked so the next structural batch retries it
                return;
            }
            if req.settings.once {
                self.retire(req);
            } else {
                let mut tracked = TrackedNode::new(node, req.settings.required_stable_checks);
                tracked.state = NodeState::Notified;
                req.nodes.insert(tracked);
            }
            return;
        }

        let subscription = self.env.observe(&node, ObserveScope::CONTENT);
        let mut tracked = TrackedNode::new(node, req.settings.required_stable_checks);
        tracked.subscription = Some(subscription);
        let slot = req.nodes.insert(tracked);
        self.subscriptions.insert(
            subscription,
            Route {
                watch: id,
                target: SubTarget::Node(slot),
            },
        );

        self.schedule_check(id, req, slot);
    }

    // ------------------------------------------------------------------
    // Stability
    // ------------------------------------------------------------------

    /// Snapshot the node and (re)arm its single check timer
    fn schedule_check(&mut self, id: u64, req: &mut WatchRequest<E::Node>, slot: usize) {
        let debounce = req.settings.debounce;
        let Some(tracked) = req.nodes.get_mut(slot) else {
            return;
        };

        let text = self.env.text_content(&tracked.node);
        tracked.quiescence.rebaseline(text, tracked.mutations);

        if let Some(previous) = tracked.timer.take() {
            self.env.clear_timer(previous);
            self.timers.remove(&previous);
        }

        let timer = self.env.set_timer(debounce);
        self.timers.insert(
            timer,
            Route {
                watch: id,
                target: TimerTarget::Check(slot),
            },
        );
        tracked.timer = Some(timer);
        tracked.state = NodeState::PendingCheck;
    }

    fn on_node_changed(
        &mut self,
        id: u64,
        req: &mut WatchRequest<E::Node>,
        slot: usize,
        records: &[MutationRecord<E::Node>],
    ) {
        let Some(tracked) = req.nodes.get_mut(slot) else {
            return;
        };

        tracked.mutations += 1;
        tracked.quiescence.reset();
        match tracked.state {
            NodeState::Notified => debug!("watch #{}: delivered node changed, re-arming", id),
            NodeState::Discovered | NodeState::PendingCheck => {}
        }
        trace!(
            "watch #{}: {} record(s) on {:?} (batch {}, attributes only: {})",
            id,
            records.len(),
            tracked.node,
            tracked.mutations,
            records.iter().all(|r| r.kind == MutationKind::Attributes)
        );

        self.schedule_check(id, req, slot);
    }

    fn on_check(&mut self, id: u64, req: &mut WatchRequest<E::Node>, slot: usize, fired: TimerId) {
        let Some(tracked) = req.nodes.get_mut(slot) else {
            return;
        };
        if tracked.state != NodeState::PendingCheck || tracked.timer != Some(fired) {
            return;
        }
        tracked.timer = None;

        let attached = req
            .root
            .as_ref()
            .is_some_and(|root| self.env.contains(root, &tracked.node));
        if !attached {
            debug!("watch #{}: candidate left the root before settling", id);
            self.release_node(req, slot);
            if let Some(root) = req.root.clone()
                && let Some(node) = self.env.query(&root, &req.selector)
            {
                self.discover(id, req, node);
            }
            return;
        }

        let text = self.env.text_content(&tracked.node);
        match tracked.quiescence.check(&text, tracked.mutations) {
            Verdict::Settled => {
                tracked.quiescence.reset();
                if tracked.delivered.as_deref() == Some(text.as_str()) {
                    tracked.state = NodeState::Notified;
                    debug!("watch #{}: settled on already delivered content", id);
                    return;
                }
                let node = tracked.node.clone();

                if !self.deliver(req, node) {
                    debug!("watch #{}: delivery failed, waiting for another settlement", id);
                    self.schedule_check(id, req, slot);
                    return;
                }
                if req.settings.once {
                    self.retire(req);
                } else if let Some(tracked) = req.nodes.get_mut(slot) {
                    tracked.state = NodeState::Notified;
                    tracked.delivered = Some(text);
                }
            }
            Verdict::Pending => {
                trace!(
                    "watch #{}: quiet check {}/{}",
                    id,
                    tracked.quiescence.consecutive(),
                    req.settings.required_stable_checks
                );
                self.schedule_check(id, req, slot);
            }
            Verdict::Changed => {
                trace!("watch #{}: content moved, rescheduling", id);
                self.schedule_check(id, req, slot);
            }
        }
    }

    // ------------------------------------------------------------------
    // Delivery and teardown
    // ------------------------------------------------------------------

    /// Run `on_ready`; only a successful call counts as a notification
    fn deliver(&mut self, req: &mut WatchRequest<E::Node>, node: E::Node) -> bool {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (req.on_ready)(node)));
        let failure = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(source)) => Some(WatchError::CallbackFailure {
                selector: req.selector.to_string(),
                source,
            }),
            Err(payload) => Some(WatchError::CallbackPanicked {
                selector: req.selector.to_string(),
                message: panic_message(payload.as_ref()),
            }),
        };

        if let Some(error) = failure {
            self.report(error);
            return false;
        }

        req.notifications += 1;
        info!("'{}' ready (notification {})", req.selector, req.notifications);
        // The deadline only guards the first delivery
        if let Some(timer) = req.timeout_timer.take() {
            self.release_timer(timer);
        }
        true
    }

    fn release_subscription(&mut self, subscription: SubscriptionId) {
        self.subscriptions.remove(&subscription);
        self.env.disconnect(subscription);
    }

    fn release_timer(&mut self, timer: TimerId) {
        self.timers.remove(&timer);
        self.env.clear_timer(timer);
    }

    fn release_node(&mut self, req: &mut WatchRequest<E::Node>, slot: usize) {
        let Some(mut tracked) = req.nodes.remove(slot) else {
            return;
        };
        if let Some(subscription) = tracked.subscription.take() {
            self.release_subscription(subscription);
        }
        if let Some(timer) = tracked.timer.take() {
            self.release_timer(timer);
        }
    }

    fn retire(&mut self, req: &mut WatchRequest<E::Node>) {
        if req.is_retired() {
            return;
        }
        if let Some(subscription) = req.root_subscription.take() {
            self.release_subscription(subscription);
        }
        if let Some(subscription) = req.fallback_subscription.take() {
            self.release_subscription(subscription);
        }
        if let Some(timer) = req.timeout_timer.take() {
            self.release_timer(timer);
        }
        for slot in req.nodes.slots() {
            self.release_node(req, slot);
        }
        req.phase = Phase::Retired;
        debug!("'{}' retired", req.selector);
    }

    fn report(&mut self, error: WatchError) {
        let selector = error.selector().unwrap_or_default();
        match &error {
            WatchError::SelectorNeverMatched { .. } => info!(selector, "{}", error),
            _ => warn!(selector, "{}", error),
        }
        if let Some(reporter) = self.reporter.as_mut() {
            reporter(&error);
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests;
