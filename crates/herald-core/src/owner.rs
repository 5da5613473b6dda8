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

//! Subscriber ownership and liveness.
//!
//! Handlers never keep their owner alive. Each entry holds a [`Weak`] to the
//! owner's `Arc` allocation; the allocation address doubles as the owner's
//! identity. Because a `Weak` keeps the allocation itself reserved, that
//! address cannot be handed to another object while the entry exists.

use std::any::Any;
use std::sync::{Arc, Weak};

/// An object that owns event handlers.
///
/// Usually derived with `#[derive(Subscriber)]`. Implement it by hand when the
/// object can know it is destroyed before its last `Arc` goes away (for
/// example a UI panel that was closed but is still referenced somewhere).
pub trait Subscriber: Any + Send + Sync {
    /// Returns `false` once the object should no longer receive events.
    ///
    /// Called outside of any bus lock, once per candidate handler per
    /// dispatch, so it must be cheap.
    fn is_alive(&self) -> bool {
        true
    }
}

/// Address of a subscriber, used as its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct OwnerId(usize);

impl OwnerId {
    pub(crate) fn of<S>(owner: &S) -> Self {
        OwnerId(owner as *const S as *const () as usize)
    }
}

/// A non-owning reference to a handler's subscriber.
pub(crate) struct OwnerRef {
    weak: Weak<dyn Any + Send + Sync>,
    id: OwnerId,
    alive: fn(&(dyn Any + Send + Sync)) -> bool,
}

fn alive_as<S: Subscriber>(owner: &(dyn Any + Send + Sync)) -> bool {
    owner.downcast_ref::<S>().is_some_and(Subscriber::is_alive)
}

impl OwnerRef {
    pub(crate) fn new<S: Subscriber>(owner: &Arc<S>) -> Self {
        let weak: Weak<S> = Arc::downgrade(owner);
        Self {
            weak,
            id: OwnerId::of::<S>(owner),
            alive: alive_as::<S>,
        }
    }

    pub(crate) fn id(&self) -> OwnerId {
        self.id
    }

    /// Upgrades to a strong reference if the owner is still reachable and
    /// still reports itself alive.
    pub(crate) fn resolve(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        let owner = self.weak.upgrade()?;
        (self.alive)(owner.as_ref()).then_some(owner)
    }

    pub(crate) fn is_dead(&self) -> bool {
        self.resolve().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Panel {
        open: AtomicBool,
    }

    impl Subscriber for Panel {
        fn is_alive(&self) -> bool {
            self.open.load(Ordering::Relaxed)
        }
    }

    #[test]
    fn resolves_while_owner_is_reachable() {
        let panel = Arc::new(Panel {
            open: AtomicBool::new(true),
        });
        let owner = OwnerRef::new(&panel);
        assert!(owner.resolve().is_some());
        assert_eq!(owner.id(), OwnerId::of(panel.as_ref()));

        drop(panel);
        assert!(owner.is_dead());
    }

    #[test]
    fn self_reported_destruction_counts_as_dead() {
        let panel = Arc::new(Panel {
            open: AtomicBool::new(true),
        });
        let owner = OwnerRef::new(&panel);
        panel.open.store(false, Ordering::Relaxed);
        assert!(owner.is_dead());
    }
}
