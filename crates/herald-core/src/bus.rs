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

//! The event bus.

use crate::config::BusConfig;
use crate::dispatch::{
    self, contain, Broadcast, BroadcastMut, EventFn, EventRefFn, Owner, Request, ResponderFn,
    Response,
};
use crate::error::DispatchError;
use crate::event::{Event, HandlerInfo, HandlerResult, SubscribeOptions};
use crate::filter::{FilterFn, FilterRegistry};
use crate::lifecycle::BindingCache;
use crate::owner::{OwnerId, OwnerRef, Subscriber};
use crate::pool::{EventPools, PooledEvent};
use crate::registry::{HandlerEntry, HandlerKey, Registry};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

type RequestErrorFn<R> = dyn Fn(&anyhow::Error) -> anyhow::Result<R> + Send + Sync;

/// A typed, thread-safe, synchronous event bus.
///
/// The bus is an explicit value owned by the application root and shared as
/// `Arc<EventBus>` with every module that publishes or subscribes. All methods
/// take `&self`.
///
/// Handlers are plain functions bound to an `Arc`-owned [`Subscriber`]. The
/// bus keeps only a weak reference to the owner: once the owner is dropped
/// (or reports itself dead) its handlers are skipped and purged.
///
/// # Example
///
/// ```rust
/// use herald_core::{EventBus, HandlerResult, Subscriber};
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use std::sync::Arc;
///
/// struct Damage { amount: u32 }
///
/// #[derive(Default)]
/// struct Health { lost: AtomicU32 }
/// impl Subscriber for Health {}
///
/// fn on_damage(health: &Health, damage: &Damage) -> HandlerResult {
///     health.lost.fetch_add(damage.amount, Ordering::Relaxed);
///     Ok(())
/// }
///
/// let bus = EventBus::new();
/// let health = Arc::new(Health::default());
/// bus.subscribe(&health, on_damage);
///
/// bus.publish(&Damage { amount: 7 }).unwrap();
/// assert_eq!(health.lost.load(Ordering::Relaxed), 7);
/// ```
pub struct EventBus {
    config: BusConfig,
    registry: Registry,
    filters: FilterRegistry,
    request_errors: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
    event_pools: EventPools,
    bindings: BindingCache,
    publishes: AtomicU32,
}

impl EventBus {
    /// Creates a bus with the default [`BusConfig`].
    pub fn new() -> Self {
        Self::with_config(BusConfig::default())
    }

    /// Creates a bus with the given configuration.
    pub fn with_config(config: BusConfig) -> Self {
        log::info!(
            "EventBus initialized (sweep every {} publishes).",
            config.sweep_interval
        );
        Self {
            registry: Registry::new(config.snapshot_pool_size, config.batch_set_threshold),
            filters: FilterRegistry::default(),
            request_errors: RwLock::new(HashMap::new()),
            event_pools: EventPools::new(config.event_pool_size),
            bindings: BindingCache::default(),
            publishes: AtomicU32::new(0),
            config,
        }
    }

    /// The configuration this bus was built with.
    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    // --- Fire-and-forget ---

    /// Subscribes `handler` on `owner` to `T` with default options.
    ///
    /// Returns `false` if the same handler was already subscribed for this
    /// owner; the existing subscription is updated instead of duplicated.
    pub fn subscribe<T: Event, S: Subscriber>(
        &self,
        owner: &Arc<S>,
        handler: fn(&S, &T) -> HandlerResult,
    ) -> bool {
        self.subscribe_with(owner, handler, SubscribeOptions::new())
    }

    /// Subscribes `handler` on `owner` to `T`.
    ///
    /// ## Arguments
    /// * `owner` - The subscriber; only a weak reference is kept.
    /// * `handler` - Invoked with the owner and the published event.
    /// * `options` - Priority, one-shot flag and diagnostic name.
    ///
    /// A subscription is identified by the owner's address and the address
    /// of `handler`. Linkers that fold identical functions (e.g. `lld` with
    /// `--icf=all`) may give two handlers with the same body and signature
    /// one address; such handlers then count as the same subscription.
    /// Give every handler of an owner a distinct body.
    pub fn subscribe_with<T: Event, S: Subscriber>(
        &self,
        owner: &Arc<S>,
        handler: fn(&S, &T) -> HandlerResult,
        options: SubscribeOptions,
    ) -> bool {
        let callback: Box<EventFn<T>> =
            Box::new(move |owner: &Owner, event: &T| match owner.downcast_ref::<S>() {
                Some(owner) => handler(owner, event),
                None => Ok(()),
            });
        self.insert::<T, S, EventFn<T>>(owner, handler as usize, options, callback)
    }

    /// Removes the subscription of `handler` on `owner`. Returns `true` if it existed.
    pub fn unsubscribe<T: Event, S: Subscriber>(
        &self,
        owner: &S,
        handler: fn(&S, &T) -> HandlerResult,
    ) -> bool {
        self.remove::<EventFn<T>, S>(owner, handler as usize)
    }

    /// Delivers `event` to every eligible handler in priority order.
    ///
    /// Returns the number of handlers invoked. A handler that fails (returns
    /// an error or panics) does not stop the others; every failure is
    /// reported together in the returned [`DispatchError`].
    pub fn publish<T: Event>(&self, event: &T) -> Result<usize, DispatchError> {
        log::trace!("Publishing `{}`.", type_name::<T>());
        let result = match self.registry.find::<EventFn<T>>() {
            Some(list) => {
                let mut invocation = Broadcast::new(event, self.filters.snapshot::<T>());
                let invoked = dispatch::run(&list, &mut invocation);
                invocation.finish(invoked)
            }
            None => Ok(0),
        };
        self.tick();
        result
    }

    // --- Mutable payload ---

    /// Subscribes a mutable-payload `handler` on `owner` to `T` with default options.
    pub fn subscribe_ref<T: Event, S: Subscriber>(
        &self,
        owner: &Arc<S>,
        handler: fn(&S, &mut T) -> HandlerResult,
    ) -> bool {
        self.subscribe_ref_with(owner, handler, SubscribeOptions::new())
    }

    /// Subscribes a mutable-payload `handler` on `owner` to `T`.
    pub fn subscribe_ref_with<T: Event, S: Subscriber>(
        &self,
        owner: &Arc<S>,
        handler: fn(&S, &mut T) -> HandlerResult,
        options: SubscribeOptions,
    ) -> bool {
        let callback: Box<EventRefFn<T>> =
            Box::new(move |owner: &Owner, event: &mut T| match owner.downcast_ref::<S>() {
                Some(owner) => handler(owner, event),
                None => Ok(()),
            });
        self.insert::<T, S, EventRefFn<T>>(owner, handler as usize, options, callback)
    }

    /// Removes a mutable-payload subscription. Returns `true` if it existed.
    pub fn unsubscribe_ref<T: Event, S: Subscriber>(
        &self,
        owner: &S,
        handler: fn(&S, &mut T) -> HandlerResult,
    ) -> bool {
        self.remove::<EventRefFn<T>, S>(owner, handler as usize)
    }

    /// Passes `event` by mutable reference through every eligible handler in
    /// priority order. Each handler sees the edits of the ones before it and
    /// the caller sees the final state.
    pub fn publish_ref<T: Event>(&self, event: &mut T) -> Result<usize, DispatchError> {
        log::trace!("Publishing `{}` by reference.", type_name::<T>());
        let result = match self.registry.find::<EventRefFn<T>>() {
            Some(list) => {
                let filters = self.filters.snapshot::<T>();
                let mut invocation = BroadcastMut::new(event, filters);
                let invoked = dispatch::run(&list, &mut invocation);
                invocation.finish(invoked)
            }
            None => Ok(0),
        };
        self.tick();
        result
    }

    // --- Request/response ---

    /// Registers `handler` on `owner` as a responder to `T` requests, with
    /// default options.
    pub fn respond<T: Event, R: 'static, S: Subscriber>(
        &self,
        owner: &Arc<S>,
        handler: fn(&S, &T) -> anyhow::Result<R>,
    ) -> bool {
        self.respond_with(owner, handler, SubscribeOptions::new())
    }

    /// Registers `handler` on `owner` as a responder to `T` requests.
    ///
    /// Only the highest-priority eligible responder answers a request.
    pub fn respond_with<T: Event, R: 'static, S: Subscriber>(
        &self,
        owner: &Arc<S>,
        handler: fn(&S, &T) -> anyhow::Result<R>,
        options: SubscribeOptions,
    ) -> bool {
        let callback: Box<ResponderFn<T, R>> =
            Box::new(move |owner: &Owner, event: &T| match owner.downcast_ref::<S>() {
                Some(owner) => handler(owner, event),
                None => Err(anyhow::anyhow!("responder owner has an unexpected type")),
            });
        self.insert::<T, S, ResponderFn<T, R>>(owner, handler as usize, options, callback)
    }

    /// Removes a responder. Returns `true` if it existed.
    pub fn unrespond<T: Event, R: 'static, S: Subscriber>(
        &self,
        owner: &S,
        handler: fn(&S, &T) -> anyhow::Result<R>,
    ) -> bool {
        self.remove::<ResponderFn<T, R>, S>(owner, handler as usize)
    }

    /// Asks the highest-priority eligible responder for an `R` and passes it
    /// to `continuation`.
    ///
    /// The continuation is always called exactly once:
    /// * with the responder's answer,
    /// * with the fallback of the error handler registered through
    ///   [`set_request_error_handler`](Self::set_request_error_handler) if
    ///   the responder failed,
    /// * with `R::default()` if there is no eligible responder, or the
    ///   failure could not be recovered.
    pub fn publish_request<T: Event, R: Default + 'static>(
        &self,
        event: &T,
        continuation: impl FnOnce(R),
    ) {
        log::trace!(
            "Requesting `{}` with `{}`.",
            type_name::<R>(),
            type_name::<T>()
        );
        let response = self.registry.find::<ResponderFn<T, R>>().and_then(|list| {
            let mut invocation = Request::new(event, self.filters.snapshot::<T>());
            dispatch::run(&list, &mut invocation);
            invocation.into_response()
        });
        self.tick();

        let value = match response {
            None => R::default(),
            Some(Response {
                result: Ok(value), ..
            }) => value,
            Some(Response {
                handler,
                result: Err(error),
            }) => self.recover::<R>(handler, error),
        };
        continuation(value);
    }

    /// Convenience over [`publish_request`](Self::publish_request) that
    /// returns the answer directly.
    pub fn request<T: Event, R: Default + 'static>(&self, event: &T) -> R {
        let mut answer = None;
        self.publish_request(event, |value| answer = Some(value));
        answer.unwrap_or_default()
    }

    /// Installs the recovery strategy for failed requests answering `R`.
    ///
    /// The handler receives the responder's error and returns the fallback
    /// value. Replaces any previous handler for `R`.
    pub fn set_request_error_handler<R: 'static>(
        &self,
        handler: impl Fn(&anyhow::Error) -> anyhow::Result<R> + Send + Sync + 'static,
    ) {
        let handler: Arc<RequestErrorFn<R>> = Arc::new(handler);
        self.request_errors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(TypeId::of::<R>(), Box::new(handler));
    }

    fn recover<R: Default + 'static>(&self, responder: &'static str, error: anyhow::Error) -> R {
        let handler = self
            .request_errors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&TypeId::of::<R>())
            .and_then(|handler| handler.downcast_ref::<Arc<RequestErrorFn<R>>>())
            .cloned();

        let Some(handler) = handler else {
            log::error!(
                "Responder `{responder}` failed and no error handler is set for `{}`: {error:#}",
                type_name::<R>()
            );
            return R::default();
        };

        match contain(|| handler(&error)) {
            Ok(fallback) => {
                log::debug!("Responder `{responder}` failed ({error:#}); using fallback");
                fallback
            }
            Err(recovery) => {
                log::error!(
                    "Responder `{responder}` failed ({error:#}) and its error handler failed too: {recovery:#}"
                );
                R::default()
            }
        }
    }

    // --- Filters ---

    /// Adds a delivery filter for `T`.
    ///
    /// Before any handler of `T` (in any variant) runs, every filter is asked
    /// whether it may receive the event. Rejected handlers are skipped but
    /// stay subscribed. A filter that panics counts as a rejection.
    pub fn add_filter<T: Event>(
        &self,
        filter: impl Fn(&T, &HandlerInfo<'_>) -> bool + Send + Sync + 'static,
    ) {
        let filter: Arc<FilterFn<T>> = Arc::new(filter);
        self.filters.add::<T>(filter);
        log::debug!("Added a filter for `{}`.", type_name::<T>());
    }

    /// Number of filters registered for `T`.
    pub fn filter_count<T: Event>(&self) -> usize {
        self.filters.count::<T>()
    }

    // --- Pooled payloads ---

    /// Takes a recycled `T` from the bus's payload pool, or a fresh default one.
    pub fn acquire_event<T: PooledEvent>(&self) -> T {
        self.event_pools.pool::<T>().get()
    }

    /// Returns a payload to the pool after resetting it.
    pub fn release_event<T: PooledEvent>(&self, event: T) {
        self.event_pools.pool::<T>().release(event);
    }

    /// Fills the pool of `T` with up to `count` fresh payloads.
    pub fn prewarm_events<T: PooledEvent>(&self, count: usize) {
        self.event_pools.pool::<T>().prewarm(count);
    }

    /// Number of idle pooled payloads of type `T`.
    pub fn pooled_events<T: PooledEvent>(&self) -> usize {
        self.event_pools.pool::<T>().available()
    }

    // --- Introspection ---

    /// Number of fire-and-forget handlers subscribed to `T`.
    pub fn handler_count<T: Event>(&self) -> usize {
        self.registry.find::<EventFn<T>>().map_or(0, |list| list.len())
    }

    /// Number of mutable-payload handlers subscribed to `T`.
    pub fn handler_ref_count<T: Event>(&self) -> usize {
        self.registry.find::<EventRefFn<T>>().map_or(0, |list| list.len())
    }

    /// Number of responders to `T` requests answering `R`.
    pub fn responder_count<T: Event, R: 'static>(&self) -> usize {
        self.registry
            .find::<ResponderFn<T, R>>()
            .map_or(0, |list| list.len())
    }

    /// Number of handlers across every event type and variant.
    pub fn total_handlers(&self) -> usize {
        self.registry.total()
    }

    /// Drops every handler, filter, error handler, pooled payload and cached
    /// binding table.
    pub fn clear(&self) {
        self.registry.clear();
        self.filters.clear();
        self.request_errors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.event_pools.clear();
        self.bindings.clear();
        self.publishes.store(0, Ordering::Relaxed);
        log::debug!("EventBus cleared.");
    }

    // --- Internals ---

    fn insert<T: Event, S: Subscriber, F: ?Sized + Send + Sync + 'static>(
        &self,
        owner: &Arc<S>,
        handler: usize,
        options: SubscribeOptions,
        callback: Box<F>,
    ) -> bool {
        let key = HandlerKey::new(OwnerId::of(owner.as_ref()), handler);
        let entry = HandlerEntry::new(key, OwnerRef::new(owner), options, type_name::<S>(), callback);
        log::debug!(
            "Subscribing `{}` to `{}` (priority={}, once={}).",
            entry.name(),
            type_name::<T>(),
            entry.priority(),
            entry.is_once()
        );
        self.registry.list::<F>(type_name::<T>()).add(entry)
    }

    fn remove<F: ?Sized + Send + Sync + 'static, S: Subscriber>(
        &self,
        owner: &S,
        handler: usize,
    ) -> bool {
        let key = HandlerKey::new(OwnerId::of(owner), handler);
        self.registry
            .find::<F>()
            .is_some_and(|list| list.remove_key(key))
    }

    /// Counts a publish and runs the periodic sweep when the interval is reached.
    fn tick(&self) {
        let interval = self.config.sweep_interval;
        if interval == 0 {
            return;
        }
        let count = self.publishes.fetch_add(1, Ordering::Relaxed) + 1;
        if count >= interval
            && self
                .publishes
                .compare_exchange(count, 0, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
        {
            self.sweep();
        }
    }

    pub(crate) fn registry(&self) -> &Registry {
        &self.registry
    }

    pub(crate) fn bindings(&self) -> &BindingCache {
        &self.bindings
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.config)
            .field("handlers", &self.total_handlers())
            .finish_non_exhaustive()
    }
}
