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

//! Event payload contract and per-handler metadata.

use std::any::Any;

/// Marker for types that can travel over the bus.
///
/// The registry is partitioned by the payload's [`TypeId`](std::any::TypeId),
/// so any `'static` thread-safe type is an event. There is nothing to
/// implement.
pub trait Event: Any + Send + Sync {}

impl<T: Any + Send + Sync> Event for T {}

/// What a fire-and-forget or mutable handler returns.
pub type HandlerResult = anyhow::Result<()>;

/// Options attached to a subscription.
///
/// ```rust
/// use herald_core::SubscribeOptions;
///
/// let options = SubscribeOptions::new().priority(10).once();
/// assert_eq!(options.priority, 10);
/// assert!(options.once);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SubscribeOptions {
    /// Higher priorities are invoked first.
    pub priority: i32,
    /// Remove the handler after its first eligible invocation.
    pub once: bool,
    /// Diagnostic name; defaults to the owner's type name.
    pub name: Option<&'static str>,
}

impl SubscribeOptions {
    /// Default options: priority `0`, persistent, unnamed.
    pub const fn new() -> Self {
        Self {
            priority: 0,
            once: false,
            name: None,
        }
    }

    /// Sets the priority.
    pub const fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the subscription as one-shot.
    pub const fn once(mut self) -> Self {
        self.once = true;
        self
    }

    /// Sets the one-shot flag explicitly.
    pub const fn with_once(mut self, once: bool) -> Self {
        self.once = once;
        self
    }

    /// Sets the diagnostic name.
    pub const fn name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }
}

/// A read-only view of a handler about to be invoked, handed to filters.
#[derive(Clone, Copy)]
pub struct HandlerInfo<'a> {
    pub(crate) name: &'static str,
    pub(crate) priority: i32,
    pub(crate) once: bool,
    pub(crate) owner: &'a (dyn Any + Send + Sync),
}

impl<'a> HandlerInfo<'a> {
    /// Diagnostic name of the handler.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Registered priority.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// Whether the handler is one-shot.
    pub fn is_once(&self) -> bool {
        self.once
    }

    /// The subscriber that owns the handler, if it is of type `S`.
    pub fn owner<S: Any>(&self) -> Option<&'a S> {
        self.owner.downcast_ref::<S>()
    }
}

impl std::fmt::Debug for HandlerInfo<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerInfo")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("once", &self.once)
            .finish_non_exhaustive()
    }
}
