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

//! Declarative subscription.
//!
//! A subscriber type describes all of its handlers once, in a
//! [`BindingTable`]. The table is built the first time an instance of the type
//! is registered and then reused for every later instance, so registering many
//! panels or modules of the same type only costs the subscriptions themselves.
//!
//! The table is normally generated by the `#[handlers]` attribute:
//!
//! ```rust
//! use herald_core::{handlers, EventBus, HandlerResult, Subscriber};
//! use std::sync::atomic::{AtomicI32, Ordering};
//! use std::sync::Arc;
//!
//! struct Damage { amount: i32 }
//!
//! #[derive(Default, Subscriber)]
//! struct Health { value: AtomicI32 }
//!
//! #[handlers]
//! impl Health {
//!     #[subscribe(priority = 10)]
//!     fn on_damage(&self, damage: &Damage) -> HandlerResult {
//!         self.value.fetch_sub(damage.amount, Ordering::Relaxed);
//!         Ok(())
//!     }
//! }
//!
//! let bus = EventBus::new();
//! let health = Arc::new(Health::default());
//! assert_eq!(bus.register(&health), 1);
//!
//! bus.publish(&Damage { amount: 3 }).unwrap();
//! assert_eq!(health.value.load(Ordering::Relaxed), -3);
//!
//! bus.unregister(health.as_ref());
//! assert_eq!(bus.total_handlers(), 0);
//! ```

use crate::bus::EventBus;
use crate::event::{Event, HandlerResult, SubscribeOptions};
use crate::owner::{OwnerId, Subscriber};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// A subscriber type with a static list of handlers.
///
/// Implemented by `#[handlers]`; implement it by hand when a macro is not an
/// option.
pub trait EventHandlers: Subscriber + Sized {
    /// Describes every handler of the type.
    fn bind(table: &mut BindingTable<Self>);
}

type Apply<S> = Box<dyn Fn(&EventBus, &Arc<S>) + Send + Sync>;

struct Binding<S> {
    event: &'static str,
    method: &'static str,
    apply: Apply<S>,
}

/// The handlers of a subscriber type.
pub struct BindingTable<S> {
    bindings: Vec<Binding<S>>,
}

impl<S: Subscriber> Default for BindingTable<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Subscriber> BindingTable<S> {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
        }
    }

    /// Binds a fire-and-forget handler.
    ///
    /// ## Arguments
    /// * `method` - Name used in logs, filters and failure reports.
    /// * `handler` - The method, as `Self::method`.
    /// * `options` - Priority and one-shot flag.
    pub fn on<T: Event>(
        &mut self,
        method: &'static str,
        handler: fn(&S, &T) -> HandlerResult,
        options: SubscribeOptions,
    ) -> &mut Self {
        let options = options.name(method);
        self.push::<T>(
            method,
            Box::new(move |bus: &EventBus, owner: &Arc<S>| {
                bus.subscribe_with(owner, handler, options);
            }),
        )
    }

    /// Binds a mutable-payload handler.
    pub fn on_ref<T: Event>(
        &mut self,
        method: &'static str,
        handler: fn(&S, &mut T) -> HandlerResult,
        options: SubscribeOptions,
    ) -> &mut Self {
        let options = options.name(method);
        self.push::<T>(
            method,
            Box::new(move |bus: &EventBus, owner: &Arc<S>| {
                bus.subscribe_ref_with(owner, handler, options);
            }),
        )
    }

    /// Binds a request responder.
    pub fn on_request<T: Event, R: 'static>(
        &mut self,
        method: &'static str,
        handler: fn(&S, &T) -> anyhow::Result<R>,
        options: SubscribeOptions,
    ) -> &mut Self {
        let options = options.name(method);
        self.push::<T>(
            method,
            Box::new(move |bus: &EventBus, owner: &Arc<S>| {
                bus.respond_with(owner, handler, options);
            }),
        )
    }

    /// Number of bound handlers.
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// `true` when the type declares no handler.
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// `(event type, method)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.bindings.iter().map(|b| (b.event, b.method))
    }

    fn push<T: Event>(&mut self, method: &'static str, apply: Apply<S>) -> &mut Self {
        self.bindings.push(Binding {
            event: type_name::<T>(),
            method,
            apply,
        });
        self
    }

    fn apply(&self, bus: &EventBus, owner: &Arc<S>) {
        for binding in &self.bindings {
            (binding.apply)(bus, owner);
        }
    }
}

/// Binding tables already built, one per subscriber type.
///
/// Tables are small and their number is bounded by the number of subscriber
/// types, so they stay cached until the bus is cleared.
#[derive(Default)]
pub(crate) struct BindingCache {
    tables: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl BindingCache {
    fn table<S: EventHandlers>(&self) -> Arc<BindingTable<S>> {
        let key = TypeId::of::<S>();
        let cached = self
            .tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        let erased = match cached {
            Some(table) => table,
            None => {
                // Built outside the lock: `bind` is user code.
                let mut table = BindingTable::new();
                S::bind(&mut table);
                log::debug!(
                    "Built binding table for `{}` ({} handler(s)).",
                    type_name::<S>(),
                    table.len()
                );
                let built: Arc<dyn Any + Send + Sync> = Arc::new(table);
                self.tables
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .entry(key)
                    .or_insert(built)
                    .clone()
            }
        };
        match erased.downcast::<BindingTable<S>>() {
            Ok(table) => table,
            Err(_) => unreachable!("binding table cached under the wrong type"),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub(crate) fn clear(&self) {
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl EventBus {
    /// Subscribes every handler declared by `S` on this instance.
    ///
    /// Registering the same instance twice does not duplicate anything.
    /// Returns the number of handlers the type declares.
    pub fn register<S: EventHandlers>(&self, owner: &Arc<S>) -> usize {
        let table = self.bindings().table::<S>();
        table.apply(self, owner);
        log::debug!(
            "Registered `{}` ({} handler(s)).",
            type_name::<S>(),
            table.len()
        );
        table.len()
    }

    /// Removes every handler owned by this exact instance, in every variant
    /// and for every event type. Returns the number of handlers removed.
    ///
    /// Only the address is used, so this may be called from the owner's
    /// `Drop` implementation.
    pub fn unregister<S: Subscriber>(&self, owner: &S) -> usize {
        let removed = self.registry().remove_owner(OwnerId::of(owner));
        log::debug!(
            "Unregistered `{}` ({removed} handler(s)).",
            type_name::<S>()
        );
        removed
    }

    /// Purges the handlers of every dead owner now, instead of waiting for
    /// the periodic sweep. Returns the number of handlers removed.
    pub fn sweep(&self) -> usize {
        let purged = self.registry().sweep();
        if purged > 0 {
            log::debug!("Sweep purged {purged} dead handler(s).");
        }
        purged
    }

    /// Number of subscriber types whose binding table is cached.
    pub fn cached_binding_tables(&self) -> usize {
        self.bindings().len()
    }
}
