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

//! Bounded object pools.
//!
//! The dispatcher borrows its snapshot buffers from a [`Pool`] so that a
//! steady stream of publishes does not allocate. Producers of high-frequency
//! events can opt into pooled payloads through [`PooledEvent`].

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

type Hook<T> = Box<dyn Fn(&mut T) + Send + Sync>;

/// A thread-safe LIFO pool bounded at `max_size` idle items.
///
/// Releasing into a full pool runs the destroy hook and drops the item.
pub struct Pool<T> {
    idle: Mutex<Vec<T>>,
    max_size: usize,
    create: Box<dyn Fn() -> T + Send + Sync>,
    on_get: Option<Hook<T>>,
    on_release: Option<Hook<T>>,
    on_destroy: Option<Hook<T>>,
}

impl<T> Pool<T> {
    /// Creates an empty pool.
    ///
    /// ## Arguments
    /// * `max_size` - Maximum number of idle items retained.
    /// * `create` - Factory used when the pool is empty.
    pub fn new(max_size: usize, create: impl Fn() -> T + Send + Sync + 'static) -> Self {
        Self {
            idle: Mutex::new(Vec::with_capacity(max_size.min(64))),
            max_size,
            create: Box::new(create),
            on_get: None,
            on_release: None,
            on_destroy: None,
        }
    }

    /// Runs `hook` on every item handed out by [`get`](Self::get).
    pub fn on_get(mut self, hook: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.on_get = Some(Box::new(hook));
        self
    }

    /// Runs `hook` on every item given back, before it is stored.
    pub fn on_release(mut self, hook: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }

    /// Runs `hook` on items dropped because the pool is full or cleared.
    pub fn on_destroy(mut self, hook: impl Fn(&mut T) + Send + Sync + 'static) -> Self {
        self.on_destroy = Some(Box::new(hook));
        self
    }

    /// Takes an idle item, or creates one.
    pub fn get(&self) -> T {
        let recycled = self.lock().pop();
        let mut item = recycled.unwrap_or_else(|| (self.create)());
        if let Some(hook) = &self.on_get {
            hook(&mut item);
        }
        item
    }

    /// Takes an item wrapped in a guard that releases it on drop.
    pub fn get_pooled(&self) -> Pooled<'_, T> {
        Pooled {
            item: Some(self.get()),
            pool: self,
        }
    }

    /// Gives an item back to the pool.
    pub fn release(&self, mut item: T) {
        if let Some(hook) = &self.on_release {
            hook(&mut item);
        }
        let mut idle = self.lock();
        if idle.len() < self.max_size {
            idle.push(item);
            return;
        }
        drop(idle);
        self.destroy(item);
    }

    /// Fills the pool with freshly created items, up to `count` idle items
    /// and never beyond the bound.
    pub fn prewarm(&self, count: usize) {
        let target = count.min(self.max_size);
        let missing = target.saturating_sub(self.available());
        let fresh: Vec<T> = (0..missing).map(|_| (self.create)()).collect();
        let mut idle = self.lock();
        for item in fresh {
            if idle.len() >= self.max_size {
                break;
            }
            idle.push(item);
        }
    }

    /// Destroys every idle item.
    pub fn clear(&self) {
        let drained: Vec<T> = self.lock().drain(..).collect();
        for item in drained {
            self.destroy(item);
        }
    }

    /// Number of idle items currently held.
    pub fn available(&self) -> usize {
        self.lock().len()
    }

    /// Maximum number of idle items retained.
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    fn destroy(&self, mut item: T) {
        if let Some(hook) = &self.on_destroy {
            hook(&mut item);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<T>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// An item on loan from a [`Pool`], returned when dropped.
pub struct Pooled<'a, T> {
    item: Option<T>,
    pool: &'a Pool<T>,
}

impl<T> Deref for Pooled<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // `item` is only taken in `drop`.
        self.item.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<T> DerefMut for Pooled<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.item.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<T> Drop for Pooled<'_, T> {
    fn drop(&mut self) {
        if let Some(item) = self.item.take() {
            self.pool.release(item);
        }
    }
}

/// A payload type that producers may recycle through the bus's event pools.
pub trait PooledEvent: Default + Send + 'static {
    /// Restores the object to a publishable blank state before it is stored.
    ///
    /// The default discards everything. Override it to keep allocations
    /// (e.g. call `Vec::clear` instead of replacing the vector).
    fn reset(&mut self) {
        *self = Self::default();
    }
}

/// One payload pool per event type.
pub(crate) struct EventPools {
    pools: RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
    max_size: usize,
}

impl EventPools {
    pub(crate) fn new(max_size: usize) -> Self {
        Self {
            pools: RwLock::new(HashMap::new()),
            max_size,
        }
    }

    pub(crate) fn pool<T: PooledEvent>(&self) -> Arc<Pool<T>> {
        let key = TypeId::of::<T>();
        let existing = self
            .pools
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        let erased = match existing {
            Some(pool) => pool,
            None => {
                let mut pools = self.pools.write().unwrap_or_else(PoisonError::into_inner);
                pools
                    .entry(key)
                    .or_insert_with(|| {
                        log::debug!("Created event pool for `{}`", std::any::type_name::<T>());
                        Arc::new(Pool::new(self.max_size, T::default).on_release(T::reset))
                    })
                    .clone()
            }
        };
        // The map is keyed by `TypeId::of::<T>()`, so the downcast cannot miss.
        match erased.downcast::<Pool<T>>() {
            Ok(pool) => pool,
            Err(_) => unreachable!("event pool registered under the wrong type"),
        }
    }

    pub(crate) fn clear(&self) {
        self.pools
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}
