use std::cell::RefCell;
use std::rc::Rc;

use super::*;
use crate::sandbox::{Document, NodeId, Sandbox};

type Calls = Rc<RefCell<Vec<NodeId>>>;

fn recorder() -> (Calls, impl FnMut(NodeId) -> anyhow::Result<()> + 'static) {
    let calls: Calls = Rc::default();
    let sink = calls.clone();
    (calls, move |node| {
        sink.borrow_mut().push(node);
        Ok(())
    })
}

fn collect_errors(watcher: &mut Watcher<Sandbox>) -> Rc<RefCell<Vec<String>>> {
    let errors: Rc<RefCell<Vec<String>>> = Rc::default();
    let sink = errors.clone();
    watcher.on_error(move |error| {
        let kind = match error {
            WatchError::InvalidSelector { .. } => "invalid_selector",
            WatchError::SelectorNeverMatched { .. } => "never_matched",
            WatchError::NeverSettled { .. } => "never_settled",
            WatchError::CallbackFailure { .. } => "callback_failure",
            WatchError::CallbackPanicked { .. } => "callback_panicked",
            WatchError::BrowserError(_) => "browser",
        };
        sink.borrow_mut().push(kind.to_string());
    });
    errors
}

fn body(watcher: &Watcher<Sandbox>) -> NodeId {
    watcher.env().dom().body().unwrap()
}

fn with_target(text: &str) -> (Watcher<Sandbox>, NodeId) {
    let mut watcher = Watcher::new(Sandbox::new());
    let body = body(&watcher);
    let target = watcher
        .env_mut()
        .dom_mut()
        .append_element(body, "div", &[("id", "target")])
        .unwrap();
    watcher.env_mut().dom_mut().append_text(target, text).unwrap();
    // Records produced while building the fixture have no observers yet
    watcher.flush();
    (watcher, target)
}

#[test]
fn test_immediate_match_fires_synchronously() {
    let (mut watcher, target) = with_target("hello");
    let (calls, on_ready) = recorder();

    let handle = watcher.watch("#target", on_ready, WatchOptions::default());

    assert_eq!(*calls.borrow(), vec![target]);
    assert!(!watcher.is_active(handle));
    assert_eq!(watcher.env().active_subscriptions(), 0);
    assert_eq!(watcher.env().pending_timers(), 0);
}

#[test]
fn test_match_after_insertion_waits_for_flush() {
    let mut watcher = Watcher::new(Sandbox::new());
    let (calls, on_ready) = recorder();
    let handle = watcher.watch("ul > li.item", on_ready, WatchOptions::default());
    assert_eq!(watcher.env().active_subscriptions(), 1);

    let body = body(&watcher);
    let dom = watcher.env_mut().dom_mut();
    let list = dom.append_element(body, "ul", &[]).unwrap();
    let item = dom.append_element(list, "li", &[("class", "item")]).unwrap();
    assert!(calls.borrow().is_empty());

    watcher.flush();
    assert_eq!(*calls.borrow(), vec![item]);
    assert!(!watcher.is_active(handle));
    assert_eq!(watcher.env().active_subscriptions(), 0);
}

#[test]
fn test_once_fires_at_most_once_across_rematches() {
    let mut watcher = Watcher::new(Sandbox::new());
    let (calls, on_ready) = recorder();
    watcher.watch(".toast", on_ready, WatchOptions::default());

    let body = body(&watcher);
    let first = watcher
        .env_mut()
        .dom_mut()
        .append_element(body, "div", &[("class", "toast")])
        .unwrap();
    watcher.flush();
    watcher.env_mut().dom_mut().remove(first).unwrap();
    watcher
        .env_mut()
        .dom_mut()
        .append_element(body, "div", &[("class", "toast")])
        .unwrap();
    watcher.flush();

    assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn test_persistent_announces_each_new_node_once() {
    let mut watcher = Watcher::new(Sandbox::new());
    let (calls, on_ready) = recorder();
    let handle = watcher.watch(".toast", on_ready, WatchOptions::default().persistent());

    let body = body(&watcher);
    let first = watcher
        .env_mut()
        .dom_mut()
        .append_element(body, "div", &[("class", "toast")])
        .unwrap();
    watcher.flush();

    // Unrelated structure change re-queries but must not re-announce
    watcher.env_mut().dom_mut().append_element(body, "p", &[]).unwrap();
    watcher.flush();
    assert_eq!(*calls.borrow(), vec![first]);

    watcher.env_mut().dom_mut().remove(first).unwrap();
    let second = watcher
        .env_mut()
        .dom_mut()
        .append_element(body, "div", &[("class", "toast")])
        .unwrap();
    watcher.flush();

    assert_eq!(*calls.borrow(), vec![first, second]);
    assert!(watcher.is_active(handle));
    assert_eq!(watcher.tracked_nodes(handle), 1);
    assert_eq!(watcher.env().active_subscriptions(), 1);
}

#[test]
fn test_stable_waits_one_debounce_window() {
    let (mut watcher, target) = with_target("ready");
    let (calls, on_ready) = recorder();
    let handle = watcher.watch("#target", on_ready, WatchOptions::stable());

    assert!(calls.borrow().is_empty());
    assert_eq!(watcher.env().pending_timers(), 1);

    watcher.advance_ms(99);
    assert!(calls.borrow().is_empty());
    watcher.advance_ms(1);
    assert_eq!(*calls.borrow(), vec![target]);

    assert!(!watcher.is_active(handle));
    assert_eq!(watcher.env().active_subscriptions(), 0);
    assert_eq!(watcher.env().pending_timers(), 0);
}

#[test]
fn test_attribute_changes_delay_stability() {
    let (mut watcher, target) = with_target("same text");
    let (calls, on_ready) = recorder();
    watcher.watch("#target", on_ready, WatchOptions::stable());

    watcher.advance_ms(60);
    watcher.env_mut().dom_mut().set_attribute(target, "class", "loading").unwrap();
    watcher.advance_ms(60);
    watcher.env_mut().dom_mut().set_attribute(target, "class", "loaded").unwrap();
    watcher.advance_ms(99);
    assert!(calls.borrow().is_empty());

    watcher.advance_ms(1);
    assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn test_single_pending_check_per_node() {
    let (mut watcher, target) = with_target("0");
    let (_calls, on_ready) = recorder();
    watcher.watch("#target", on_ready, WatchOptions::stable());

    for i in 1..10 {
        watcher.env_mut().dom_mut().set_text(target, &i.to_string()).unwrap();
        watcher.advance_ms(10);
        assert_eq!(watcher.env().pending_timers(), 1);
    }
}

#[test]
fn test_persistent_stable_delivers_each_new_settlement() {
    let (mut watcher, target) = with_target("a");
    let (calls, on_ready) = recorder();
    let handle = watcher.watch("#target", on_ready, WatchOptions::stable().persistent());

    watcher.advance_ms(100);
    assert_eq!(calls.borrow().len(), 1);

    watcher.env_mut().dom_mut().set_text(target, "b").unwrap();
    watcher.advance_ms(100);
    assert_eq!(calls.borrow().len(), 2);

    // Settles again on the text that was already delivered
    watcher.env_mut().dom_mut().set_attribute(target, "data-x", "1").unwrap();
    watcher.advance_ms(100);
    assert_eq!(calls.borrow().len(), 2);

    watcher.env_mut().dom_mut().set_text(target, "c").unwrap();
    watcher.advance_ms(100);
    assert_eq!(calls.borrow().len(), 3);

    assert_eq!(watcher.notifications(handle), 3);
    // Root discovery plus the node's own subscription
    assert_eq!(watcher.env().active_subscriptions(), 2);
    assert_eq!(watcher.env().pending_timers(), 0);
}

#[test]
fn test_cancel_is_idempotent() {
    let (mut watcher, _target) = with_target("x");
    let (calls, on_ready) = recorder();
    let handle = watcher.watch("#target", on_ready, WatchOptions::stable());
    assert_eq!(watcher.env().pending_timers(), 1);

    assert!(watcher.cancel(handle));
    assert_eq!(watcher.env().active_subscriptions(), 0);
    assert_eq!(watcher.env().pending_timers(), 0);

    assert!(!watcher.cancel(handle));
    watcher.advance_ms(1_000);
    assert!(calls.borrow().is_empty());
}

#[test]
fn test_cancel_after_completion_is_noop() {
    let (mut watcher, _target) = with_target("x");
    let (calls, on_ready) = recorder();
    let handle = watcher.watch("#target", on_ready, WatchOptions::default());
    assert_eq!(calls.borrow().len(), 1);
    assert!(!watcher.cancel(handle));
    assert!(!watcher.cancel(handle));
}

/// Fails the first `failures` calls, then records like `recorder`
fn flaky(failures: usize) -> (Calls, impl FnMut(NodeId) -> anyhow::Result<()> + 'static) {
    let calls: Calls = Rc::default();
    let sink = calls.clone();
    let mut remaining = failures;
    (calls, move |node| {
        if remaining > 0 {
            remaining -= 1;
            anyhow::bail!("render failed");
        }
        sink.borrow_mut().push(node);
        Ok(())
    })
}

#[test]
fn test_callback_error_keeps_stable_once_waiting() {
    let (mut watcher, target) = with_target("x");
    let errors = collect_errors(&mut watcher);
    let (calls, on_ready) = flaky(1);
    let handle = watcher.watch("#target", on_ready, WatchOptions::stable());

    watcher.advance_ms(100);
    assert_eq!(*errors.borrow(), vec!["callback_failure"]);
    assert!(watcher.is_active(handle));
    assert_eq!(watcher.notifications(handle), 0);
    assert_eq!(watcher.node_state(handle, &target), Some(NodeState::PendingCheck));
    assert_eq!(watcher.env().pending_timers(), 1);

    watcher.advance_ms(100);
    assert_eq!(*calls.borrow(), vec![target]);
    assert!(!watcher.is_active(handle));
    assert_eq!(watcher.env().active_subscriptions(), 0);
    assert_eq!(watcher.env().pending_timers(), 0);
}

#[test]
fn test_callback_error_under_once_keeps_waiting_for_next_match() {
    let mut watcher = Watcher::new(Sandbox::new());
    let errors = collect_errors(&mut watcher);
    let (calls, on_ready) = flaky(1);
    let handle = watcher.watch(
        ".toast",
        on_ready,
        WatchOptions::default().with_timeout_ms(1_000),
    );

    let body = body(&watcher);
    let first = watcher
        .env_mut()
        .dom_mut()
        .append_element(body, "div", &[("class", "toast")])
        .unwrap();
    watcher.flush();

    assert_eq!(*errors.borrow(), vec!["callback_failure"]);
    assert!(watcher.is_active(handle));
    assert_eq!(watcher.tracked_nodes(handle), 0);
    assert_eq!(watcher.env().active_subscriptions(), 1);
    // The deadline still guards the first successful delivery
    assert_eq!(watcher.env().pending_timers(), 1);

    watcher.env_mut().dom_mut().remove(first).unwrap();
    watcher.flush();
    let second = watcher
        .env_mut()
        .dom_mut()
        .append_element(body, "div", &[("class", "toast")])
        .unwrap();
    watcher.flush();

    assert_eq!(*calls.borrow(), vec![second]);
    assert!(!watcher.is_active(handle));
    assert_eq!(watcher.env().active_subscriptions(), 0);
    assert_eq!(watcher.env().pending_timers(), 0);
}

#[test]
fn test_persistent_stable_retries_content_whose_delivery_failed() {
    let (mut watcher, target) = with_target("a");
    let errors = collect_errors(&mut watcher);
    let (calls, on_ready) = flaky(1);
    let handle = watcher.watch("#target", on_ready, WatchOptions::stable().persistent());

    watcher.advance_ms(100);
    assert_eq!(*errors.borrow(), vec!["callback_failure"]);
    assert_eq!(watcher.notifications(handle), 0);

    // Same content, only an attribute moves
    watcher.env_mut().dom_mut().set_attribute(target, "data-x", "1").unwrap();
    watcher.advance_ms(100);

    assert_eq!(*calls.borrow(), vec![target]);
    assert_eq!(watcher.notifications(handle), 1);
    assert_eq!(watcher.node_state(handle, &target), Some(NodeState::Notified));
}

#[test]
fn test_node_state_follows_lifecycle() {
    let (mut watcher, target) = with_target("a");
    let (_calls, on_ready) = recorder();
    let handle = watcher.watch("#target", on_ready, WatchOptions::stable().persistent());
    assert_eq!(watcher.node_state(handle, &target), Some(NodeState::PendingCheck));

    watcher.advance_ms(100);
    assert_eq!(watcher.node_state(handle, &target), Some(NodeState::Notified));
    assert_eq!(watcher.env().pending_timers(), 0);

    watcher.env_mut().dom_mut().set_text(target, "b").unwrap();
    watcher.flush();
    assert_eq!(watcher.node_state(handle, &target), Some(NodeState::PendingCheck));

    watcher.advance_ms(100);
    assert_eq!(watcher.node_state(handle, &target), Some(NodeState::Notified));
    assert_eq!(watcher.notifications(handle), 2);

    let body = body(&watcher);
    assert_eq!(watcher.node_state(handle, &body), None);

    let (_calls, on_ready) = recorder();
    let immediate = watcher.watch("#target", on_ready, WatchOptions::default().persistent());
    assert_eq!(watcher.node_state(immediate, &target), Some(NodeState::Notified));
}

#[test]
fn test_candidate_removed_before_settling_is_not_delivered() {
    let (mut watcher, target) = with_target("x");
    let (calls, on_ready) = recorder();
    let handle = watcher.watch("#target", on_ready, WatchOptions::stable());

    watcher.advance_ms(50);
    watcher.env_mut().dom_mut().remove(target).unwrap();
    watcher.advance_ms(200);

    assert!(calls.borrow().is_empty());
    assert!(watcher.is_active(handle));
    assert_eq!(watcher.tracked_nodes(handle), 0);
    assert_eq!(watcher.env().active_subscriptions(), 1);
    assert_eq!(watcher.env().pending_timers(), 0);

    let body = body(&watcher);
    let replacement = watcher
        .env_mut()
        .dom_mut()
        .append_element(body, "div", &[("id", "target")])
        .unwrap();
    watcher.advance_ms(101);

    assert_eq!(*calls.borrow(), vec![replacement]);
    assert!(!watcher.is_active(handle));
}

#[test]
fn test_callback_panic_is_caught() {
    let mut watcher = Watcher::new(Sandbox::new());
    let errors = collect_errors(&mut watcher);
    let handle = watcher.watch(
        ".item",
        |_| -> anyhow::Result<()> { panic!("boom") },
        WatchOptions::default().persistent(),
    );

    let body = body(&watcher);
    watcher
        .env_mut()
        .dom_mut()
        .append_element(body, "div", &[("class", "item")])
        .unwrap();
    watcher.flush();

    assert_eq!(*errors.borrow(), vec!["callback_panicked"]);
    assert!(watcher.is_active(handle));
    assert_eq!(watcher.env().active_subscriptions(), 1);
    assert_eq!(watcher.notifications(handle), 0);
}

#[test]
fn test_invalid_selector_is_reported_not_raised() {
    let mut watcher = Watcher::new(Sandbox::new());
    let errors = collect_errors(&mut watcher);
    let (calls, on_ready) = recorder();

    let handle = watcher.watch("div[", on_ready, WatchOptions::default());
    let root_handle = watcher.watch(
        "div",
        |_| Ok(()),
        WatchOptions::default().with_root("#app >"),
    );

    assert_eq!(*errors.borrow(), vec!["invalid_selector", "invalid_selector"]);
    assert!(!watcher.is_active(handle));
    assert!(!watcher.is_active(root_handle));
    assert!(!watcher.cancel(handle));
    assert!(calls.borrow().is_empty());
    assert_eq!(watcher.env().active_subscriptions(), 0);
}

#[test]
fn test_document_ready_gates_first_attempt() {
    let mut document = Document::with_body();
    let body = document.body().unwrap();
    let target = document.append_element(body, "main", &[]).unwrap();
    document.take_records();

    let mut watcher = Watcher::new(Sandbox::loading(document));
    let (calls, on_ready) = recorder();
    let handle = watcher.watch("main", on_ready, WatchOptions::default());

    assert!(calls.borrow().is_empty());
    assert!(watcher.is_active(handle));
    assert_eq!(watcher.env().active_subscriptions(), 0);

    watcher.mark_ready();
    assert_eq!(*calls.borrow(), vec![target]);
    assert!(!watcher.is_active(handle));
}

#[test]
fn test_missing_body_falls_back_to_document() {
    let mut watcher = Watcher::new(Sandbox::from_document(Document::new()));
    let (calls, on_ready) = recorder();
    watcher.watch("#target", on_ready, WatchOptions::default());
    assert_eq!(watcher.env().active_subscriptions(), 1);

    let root = watcher.env().dom().root();
    let dom = watcher.env_mut().dom_mut();
    let html = dom.append_element(root, "html", &[]).unwrap();
    dom.append_element(html, "body", &[]).unwrap();
    watcher.flush();
    assert!(calls.borrow().is_empty());
    assert_eq!(watcher.env().active_subscriptions(), 1);

    let body = body(&watcher);
    let target = watcher
        .env_mut()
        .dom_mut()
        .append_element(body, "span", &[("id", "target")])
        .unwrap();
    watcher.flush();
    assert_eq!(*calls.borrow(), vec![target]);
    assert_eq!(watcher.env().active_subscriptions(), 0);
}

#[test]
fn test_timeout_retires_waiting_request() {
    let mut watcher = Watcher::new(Sandbox::new());
    let errors = collect_errors(&mut watcher);
    let (calls, on_ready) = recorder();
    let handle = watcher.watch(
        "#never",
        on_ready,
        WatchOptions::default().with_timeout_ms(500),
    );

    watcher.advance_ms(499);
    assert!(watcher.is_active(handle));

    watcher.advance_ms(1);
    assert!(!watcher.is_active(handle));
    assert_eq!(*errors.borrow(), vec!["never_matched"]);
    assert!(calls.borrow().is_empty());
    assert_eq!(watcher.env().active_subscriptions(), 0);
    assert_eq!(watcher.env().pending_timers(), 0);
}

#[test]
fn test_delivery_clears_timeout() {
    let mut watcher = Watcher::new(Sandbox::new());
    let errors = collect_errors(&mut watcher);
    let (calls, on_ready) = recorder();
    let handle = watcher.watch(
        ".row",
        on_ready,
        WatchOptions::default().persistent().with_timeout_ms(100),
    );

    watcher.advance_ms(50);
    let body = body(&watcher);
    watcher
        .env_mut()
        .dom_mut()
        .append_element(body, "div", &[("class", "row")])
        .unwrap();
    watcher.advance_ms(200);

    assert_eq!(calls.borrow().len(), 1);
    assert!(watcher.is_active(handle));
    assert!(errors.borrow().is_empty());
    assert_eq!(watcher.env().pending_timers(), 0);
}

#[test]
fn test_detached_node_is_released_in_persistent_mode() {
    let (mut watcher, target) = with_target("loading");
    let (calls, on_ready) = recorder();
    let handle = watcher.watch("#target", on_ready, WatchOptions::stable().persistent());
    assert_eq!(watcher.tracked_nodes(handle), 1);
    assert_eq!(watcher.env().active_subscriptions(), 2);

    watcher.env_mut().dom_mut().remove(target).unwrap();
    watcher.flush();

    assert_eq!(watcher.tracked_nodes(handle), 0);
    assert_eq!(watcher.env().active_subscriptions(), 1);
    assert_eq!(watcher.env().pending_timers(), 0);

    watcher.advance_ms(500);
    assert!(calls.borrow().is_empty());
}

#[test]
fn test_independent_requests_do_not_interfere() {
    let (mut watcher, target) = with_target("x");
    let (fast_calls, fast) = recorder();
    let (slow_calls, slow) = recorder();

    let fast_handle = watcher.watch("#target", fast, WatchOptions::stable());
    let slow_handle = watcher.watch(
        "#target",
        slow,
        WatchOptions::stable().with_debounce_ms(300),
    );
    assert_eq!(watcher.active_watches(), 2);

    watcher.advance_ms(100);
    assert_eq!(*fast_calls.borrow(), vec![target]);
    assert!(slow_calls.borrow().is_empty());

    assert!(watcher.cancel(slow_handle));
    watcher.advance_ms(500);
    assert!(slow_calls.borrow().is_empty());
    assert!(!watcher.is_active(fast_handle));
    assert_eq!(watcher.active_watches(), 0);
}
