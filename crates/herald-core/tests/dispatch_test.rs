// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use herald_core::{BusConfig, EventBus, HandlerResult, PooledEvent, SubscribeOptions, Subscriber};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// --- DUMMY EVENTS FOR THIS TEST ---
#[derive(Debug, Clone, PartialEq)]
struct Damage {
    amount: i32,
}

#[derive(Debug)]
struct Tick;

#[derive(Debug)]
struct AskName;

#[derive(Debug, Default, PartialEq)]
struct Packet {
    payload: Vec<u8>,
}
impl PooledEvent for Packet {
    fn reset(&mut self) {
        self.payload.clear();
    }
}

// --- DUMMY SUBSCRIBERS ---
#[derive(Default)]
struct Journal {
    calls: Mutex<Vec<String>>,
}
impl Subscriber for Journal {}

impl Journal {
    fn push(&self, entry: impl Into<String>) {
        self.calls.lock().unwrap().push(entry.into());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn first(journal: &Journal, _: &Damage) -> HandlerResult {
    journal.push("first");
    Ok(())
}

fn second(journal: &Journal, _: &Damage) -> HandlerResult {
    journal.push("second");
    Ok(())
}

fn third(journal: &Journal, _: &Damage) -> HandlerResult {
    journal.push("third");
    Ok(())
}

fn failing(journal: &Journal, damage: &Damage) -> HandlerResult {
    journal.push("failing");
    anyhow::bail!("cannot absorb {} damage", damage.amount)
}

fn panicking(_: &Journal, _: &Damage) -> HandlerResult {
    panic!("armor exploded");
}

#[test]
fn test_priority_order_across_owners() {
    let bus = EventBus::new();
    let low = Arc::new(Journal::default());
    let high = Arc::new(Journal::default());
    let shared = Arc::new(Journal::default());

    bus.subscribe_with(&low, first, SubscribeOptions::new().priority(-5));
    bus.subscribe_with(&high, first, SubscribeOptions::new().priority(100));
    bus.subscribe_with(&shared, first, SubscribeOptions::new().priority(0));

    // The filter is consulted right before each handler runs.
    let order = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&order);
    bus.add_filter::<Damage>(move |_, handler| {
        sink.lock().unwrap().push(handler.priority());
        true
    });

    assert_eq!(bus.publish(&Damage { amount: 1 }).unwrap(), 3);
    assert_eq!(*order.lock().unwrap(), vec![100, 0, -5]);
}

#[test]
fn test_equal_priorities_keep_subscription_order() {
    let bus = EventBus::new();
    let journal = Arc::new(Journal::default());
    bus.subscribe(&journal, second);
    bus.subscribe(&journal, first);
    bus.subscribe(&journal, third);

    bus.publish(&Damage { amount: 1 }).unwrap();
    assert_eq!(journal.calls(), ["second", "first", "third"]);
}

#[test]
fn test_duplicate_subscription_updates_in_place() {
    let bus = EventBus::new();
    let journal = Arc::new(Journal::default());

    assert!(bus.subscribe_with(&journal, first, SubscribeOptions::new().once()));
    assert!(!bus.subscribe_with(&journal, first, SubscribeOptions::new().once()));
    assert_eq!(bus.handler_count::<Damage>(), 1);

    // Re-subscribing moves the handler to its new priority.
    bus.subscribe(&journal, second);
    assert!(!bus.subscribe_with(&journal, first, SubscribeOptions::new().priority(-1)));
    assert_eq!(bus.handler_count::<Damage>(), 2);

    bus.publish(&Damage { amount: 1 }).unwrap();
    bus.publish(&Damage { amount: 1 }).unwrap();
    assert_eq!(journal.calls(), ["second", "first", "second", "first"]);
}

#[test]
fn test_resubscribing_keeps_delivery_order() {
    let bus = EventBus::new();
    let journal = Arc::new(Journal::default());
    bus.subscribe(&journal, first);
    bus.subscribe(&journal, second);
    // Same priority: the subscription is refreshed where it stands.
    assert!(!bus.subscribe(&journal, first));

    bus.publish(&Damage { amount: 1 }).unwrap();
    assert_eq!(journal.calls(), ["first", "second"]);
}

#[test]
fn test_once_handler_runs_a_single_time() {
    let bus = EventBus::new();
    let journal = Arc::new(Journal::default());
    bus.subscribe_with(&journal, first, SubscribeOptions::new().once());
    bus.subscribe(&journal, second);

    assert_eq!(bus.publish(&Damage { amount: 1 }).unwrap(), 2);
    assert_eq!(bus.handler_count::<Damage>(), 1);
    assert_eq!(bus.publish(&Damage { amount: 1 }).unwrap(), 1);
    assert_eq!(journal.calls(), ["first", "second", "second"]);
}

#[test]
fn test_dead_owner_is_skipped_and_purged() {
    let bus = EventBus::with_config(BusConfig {
        sweep_interval: 0,
        ..BusConfig::default()
    });
    let survivor = Arc::new(Journal::default());
    let doomed = Arc::new(Journal::default());
    bus.subscribe(&survivor, first);
    bus.subscribe(&doomed, second);
    drop(doomed);

    assert_eq!(bus.handler_count::<Damage>(), 2);
    assert_eq!(bus.publish(&Damage { amount: 1 }).unwrap(), 1);
    assert_eq!(bus.handler_count::<Damage>(), 1);
    assert_eq!(survivor.calls(), ["first"]);
}

#[test]
fn test_explicit_sweep_purges_every_variant() {
    fn edit(_: &Journal, _: &mut Damage) -> HandlerResult {
        Ok(())
    }
    fn answer(_: &Journal, _: &AskName) -> anyhow::Result<String> {
        Ok("journal".to_string())
    }

    let bus = EventBus::with_config(BusConfig {
        sweep_interval: 0,
        ..BusConfig::default()
    });
    let journal = Arc::new(Journal::default());
    bus.subscribe(&journal, first);
    bus.subscribe_ref(&journal, edit);
    bus.respond(&journal, answer);
    assert_eq!(bus.total_handlers(), 3);

    drop(journal);
    assert_eq!(bus.sweep(), 3);
    assert_eq!(bus.total_handlers(), 0);
}

#[derive(Default)]
struct Panel {
    closed: AtomicBool,
    hits: AtomicUsize,
}

impl Subscriber for Panel {
    fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }
}

fn on_panel_tick(panel: &Panel, _: &Tick) -> HandlerResult {
    panel.hits.fetch_add(1, Ordering::SeqCst);
    Ok(())
}

#[test]
fn test_owner_reporting_itself_dead_is_purged() {
    let bus = EventBus::new();
    let panel = Arc::new(Panel::default());
    bus.subscribe(&panel, on_panel_tick);

    bus.publish(&Tick).unwrap();
    panel.closed.store(true, Ordering::SeqCst);
    assert_eq!(bus.publish(&Tick).unwrap(), 0);

    assert_eq!(panel.hits.load(Ordering::SeqCst), 1);
    assert_eq!(bus.handler_count::<Tick>(), 0);
}

// --- REENTRANCY ---
struct Chain {
    bus: Arc<EventBus>,
    me: Mutex<Option<std::sync::Weak<Chain>>>,
    seen: Mutex<Vec<&'static str>>,
}
impl Subscriber for Chain {}

impl Chain {
    fn strong(&self) -> Arc<Chain> {
        self.me
            .lock()
            .unwrap()
            .as_ref()
            .and_then(std::sync::Weak::upgrade)
            .expect("chain is alive while its handlers run")
    }
}

fn chain_start(chain: &Chain, _: &Tick) -> HandlerResult {
    chain.seen.lock().unwrap().push("start");
    let me = chain.strong();
    // Mutate the registry and publish from inside a handler.
    chain.bus.subscribe(&me, chain_late);
    chain.bus.unsubscribe(chain, chain_start);
    chain.bus.publish(&Damage { amount: 2 })?;
    Ok(())
}

fn chain_late(chain: &Chain, _: &Tick) -> HandlerResult {
    chain.seen.lock().unwrap().push("late");
    Ok(())
}

fn chain_damage(chain: &Chain, _: &Damage) -> HandlerResult {
    chain.seen.lock().unwrap().push("damage");
    Ok(())
}

#[test]
fn test_handlers_can_reenter_the_bus() {
    let bus = Arc::new(EventBus::new());
    let chain = Arc::new(Chain {
        bus: Arc::clone(&bus),
        me: Mutex::new(None),
        seen: Mutex::new(Vec::new()),
    });
    *chain.me.lock().unwrap() = Some(Arc::downgrade(&chain));

    bus.subscribe(&chain, chain_start);
    bus.subscribe(&chain, chain_damage);

    // Changes made during a pass only show up on the next one.
    assert_eq!(bus.publish(&Tick).unwrap(), 1);
    assert_eq!(*chain.seen.lock().unwrap(), ["start", "damage"]);

    assert_eq!(bus.publish(&Tick).unwrap(), 1);
    assert_eq!(*chain.seen.lock().unwrap(), ["start", "damage", "late"]);
}

struct Echo {
    bus: Arc<EventBus>,
    me: Mutex<Option<std::sync::Weak<Echo>>>,
    depth: AtomicUsize,
    seen: Mutex<Vec<String>>,
}
impl Subscriber for Echo {}

fn echo(echo: &Echo, _: &Tick) -> HandlerResult {
    let depth = echo.depth.fetch_add(1, Ordering::SeqCst);
    echo.seen.lock().unwrap().push(format!("echo{depth}"));
    if depth == 0 {
        let me = echo
            .me
            .lock()
            .unwrap()
            .as_ref()
            .and_then(std::sync::Weak::upgrade)
            .expect("echo is alive while its handlers run");
        echo.bus.subscribe(&me, echo_late);
    }
    if depth < 2 {
        echo.bus.publish(&Tick)?;
    }
    Ok(())
}

fn echo_late(echo: &Echo, _: &Tick) -> HandlerResult {
    echo.seen.lock().unwrap().push("late".to_string());
    Ok(())
}

#[test]
fn test_handler_can_publish_its_own_event_type() {
    let bus = Arc::new(EventBus::new());
    let source = Arc::new(Echo {
        bus: Arc::clone(&bus),
        me: Mutex::new(None),
        depth: AtomicUsize::new(0),
        seen: Mutex::new(Vec::new()),
    });
    *source.me.lock().unwrap() = Some(Arc::downgrade(&source));
    bus.subscribe(&source, echo);

    // Nested passes take their own snapshot: they see `echo_late`, which was
    // subscribed after the outer pass started, while the outer pass does not.
    assert_eq!(bus.publish(&Tick).unwrap(), 1);
    assert_eq!(
        *source.seen.lock().unwrap(),
        ["echo0", "echo1", "echo2", "late", "late"]
    );
    assert_eq!(bus.handler_count::<Tick>(), 2);
}

#[test]
fn test_filter_veto_skips_without_unsubscribing() {
    let bus = EventBus::new();
    let journal = Arc::new(Journal::default());
    bus.subscribe_with(&journal, first, SubscribeOptions::new().once().name("first"));
    bus.subscribe_with(&journal, second, SubscribeOptions::new().name("second"));

    bus.add_filter::<Damage>(|damage, handler| damage.amount > 10 || handler.name() != "first");
    assert_eq!(bus.filter_count::<Damage>(), 1);

    assert_eq!(bus.publish(&Damage { amount: 1 }).unwrap(), 1);
    // The vetoed once-handler is still there.
    assert_eq!(bus.handler_count::<Damage>(), 2);

    assert_eq!(bus.publish(&Damage { amount: 50 }).unwrap(), 2);
    assert_eq!(bus.handler_count::<Damage>(), 1);
    assert_eq!(journal.calls(), ["second", "first", "second"]);
}

#[test]
fn test_filter_can_inspect_owner() {
    let bus = EventBus::new();
    let open = Arc::new(Panel::default());
    let muted = Arc::new(Panel::default());
    bus.subscribe(&open, on_panel_tick);
    bus.subscribe(&muted, on_panel_tick);

    let muted_id = Arc::as_ptr(&muted) as usize;
    bus.add_filter::<Tick>(move |_, handler| {
        handler
            .owner::<Panel>()
            .is_some_and(|panel| panel as *const Panel as usize != muted_id)
    });

    assert_eq!(bus.publish(&Tick).unwrap(), 1);
    assert_eq!(open.hits.load(Ordering::SeqCst), 1);
    assert_eq!(muted.hits.load(Ordering::SeqCst), 0);
}

#[test]
fn test_panicking_filter_rejects() {
    let bus = EventBus::new();
    let journal = Arc::new(Journal::default());
    bus.subscribe(&journal, first);
    bus.add_filter::<Damage>(|_, _| panic!("broken filter"));

    assert_eq!(bus.publish(&Damage { amount: 1 }).unwrap(), 0);
    assert!(journal.calls().is_empty());
}

// --- MUTABLE PAYLOAD ---
fn double(_: &Journal, damage: &mut Damage) -> HandlerResult {
    damage.amount *= 2;
    Ok(())
}

fn add_three(_: &Journal, damage: &mut Damage) -> HandlerResult {
    damage.amount += 3;
    Ok(())
}

#[test]
fn test_mutations_propagate_in_priority_order() {
    let bus = EventBus::new();
    let journal = Arc::new(Journal::default());
    bus.subscribe_ref_with(&journal, add_three, SubscribeOptions::new().priority(1));
    bus.subscribe_ref_with(&journal, double, SubscribeOptions::new().priority(2));

    let mut damage = Damage { amount: 5 };
    assert_eq!(bus.publish_ref(&mut damage).unwrap(), 2);
    assert_eq!(damage.amount, 13);

    assert!(bus.unsubscribe_ref(journal.as_ref(), double));
    let mut damage = Damage { amount: 5 };
    bus.publish_ref(&mut damage).unwrap();
    assert_eq!(damage.amount, 8);
}

// --- REQUEST / RESPONSE ---
#[derive(Default)]
struct Directory {
    hits: AtomicUsize,
}
impl Subscriber for Directory {}

fn name_low(directory: &Directory, _: &AskName) -> anyhow::Result<String> {
    directory.hits.fetch_add(1, Ordering::SeqCst);
    Ok("low".to_string())
}

fn name_mid(directory: &Directory, _: &AskName) -> anyhow::Result<String> {
    directory.hits.fetch_add(1, Ordering::SeqCst);
    Ok("mid".to_string())
}

fn name_high(directory: &Directory, _: &AskName) -> anyhow::Result<String> {
    directory.hits.fetch_add(1, Ordering::SeqCst);
    Ok("high".to_string())
}

fn name_broken(_: &Directory, _: &AskName) -> anyhow::Result<String> {
    anyhow::bail!("directory offline")
}

fn name_panics(_: &Directory, _: &AskName) -> anyhow::Result<String> {
    panic!("directory melted")
}

#[test]
fn test_only_the_top_responder_answers() {
    let bus = EventBus::new();
    let directory = Arc::new(Directory::default());
    bus.respond_with(&directory, name_low, SubscribeOptions::new().priority(1));
    bus.respond_with(&directory, name_high, SubscribeOptions::new().priority(3));
    bus.respond_with(&directory, name_mid, SubscribeOptions::new().priority(2));
    assert_eq!(bus.responder_count::<AskName, String>(), 3);

    let mut answers = Vec::new();
    bus.publish_request(&AskName, |name: String| answers.push(name));
    assert_eq!(answers, ["high"]);
    assert_eq!(directory.hits.load(Ordering::SeqCst), 1);

    assert!(bus.unrespond(directory.as_ref(), name_high));
    assert_eq!(bus.request::<AskName, String>(&AskName), "mid");
}

#[test]
fn test_request_without_responder_yields_default() {
    let bus = EventBus::new();
    let mut calls = 0;
    bus.publish_request(&AskName, |name: String| {
        calls += 1;
        assert!(name.is_empty());
    });
    assert_eq!(calls, 1);
    assert_eq!(bus.request::<AskName, u64>(&AskName), 0);
}

#[test]
fn test_once_responder_answers_once() {
    let bus = EventBus::new();
    let directory = Arc::new(Directory::default());
    bus.respond_with(&directory, name_high, SubscribeOptions::new().once());

    assert_eq!(bus.request::<AskName, String>(&AskName), "high");
    assert_eq!(bus.request::<AskName, String>(&AskName), "");
    assert_eq!(bus.responder_count::<AskName, String>(), 0);
}

#[test]
fn test_failed_request_uses_the_error_handler() {
    let bus = EventBus::new();
    let directory = Arc::new(Directory::default());
    bus.respond(&directory, name_broken);

    // No handler installed: the default value.
    assert_eq!(bus.request::<AskName, String>(&AskName), "");

    bus.set_request_error_handler::<String>(|error| Ok(format!("fallback: {error}")));
    assert_eq!(
        bus.request::<AskName, String>(&AskName),
        "fallback: directory offline"
    );

    // A failing error handler still yields the default value.
    bus.set_request_error_handler::<String>(|_| anyhow::bail!("no fallback either"));
    assert_eq!(bus.request::<AskName, String>(&AskName), "");
}

#[test]
fn test_panicking_responder_is_recovered() {
    let bus = EventBus::new();
    let directory = Arc::new(Directory::default());
    bus.respond(&directory, name_panics);
    bus.set_request_error_handler::<String>(|error| Ok(error.to_string()));

    assert_eq!(
        bus.request::<AskName, String>(&AskName),
        "handler panicked: directory melted"
    );
}

// --- FAILURES ---
#[test]
fn test_failures_are_aggregated_and_isolated() {
    let bus = EventBus::new();
    let journal = Arc::new(Journal::default());
    bus.subscribe_with(&journal, failing, SubscribeOptions::new().priority(3).name("failing"));
    bus.subscribe_with(&journal, panicking, SubscribeOptions::new().priority(2).name("panicking"));
    bus.subscribe_with(&journal, first, SubscribeOptions::new().priority(1));

    let err = bus.publish(&Damage { amount: 9 }).unwrap_err();
    assert_eq!(err.invoked, 3);
    assert_eq!(err.failures.len(), 2);
    assert_eq!(journal.calls(), ["failing", "first"]);

    let failing = err.failure_of("failing").expect("failure is reported");
    assert_eq!(failing.priority, 3);
    assert_eq!(failing.error.to_string(), "cannot absorb 9 damage");
    let panicking = err.failure_of("panicking").expect("panic is reported");
    assert_eq!(panicking.error.to_string(), "handler panicked: armor exploded");

    assert!(err.to_string().starts_with("2 of 3 handler(s) failed"));
    // Failing handlers stay subscribed.
    assert_eq!(bus.handler_count::<Damage>(), 3);
}

// --- POOLED PAYLOADS ---
#[test]
fn test_pooled_events_are_recycled_clean() {
    let bus = EventBus::new();
    bus.prewarm_events::<Packet>(4);
    assert_eq!(bus.pooled_events::<Packet>(), 4);

    let mut packet: Packet = bus.acquire_event();
    assert_eq!(bus.pooled_events::<Packet>(), 3);
    assert!(packet.payload.is_empty());
    packet.payload.extend_from_slice(b"hello");

    bus.release_event(packet);
    assert_eq!(bus.pooled_events::<Packet>(), 4);

    for _ in 0..4 {
        let packet: Packet = bus.acquire_event();
        assert_eq!(packet, Packet::default());
    }
    // Empty pool: a fresh payload is created.
    let fresh: Packet = bus.acquire_event();
    assert_eq!(fresh, Packet::default());
}

#[test]
fn test_event_pool_is_bounded() {
    let bus = EventBus::with_config(BusConfig {
        event_pool_size: 2,
        ..BusConfig::default()
    });
    bus.prewarm_events::<Packet>(10);
    assert_eq!(bus.pooled_events::<Packet>(), 2);

    bus.release_event(Packet::default());
    assert_eq!(bus.pooled_events::<Packet>(), 2);
}
