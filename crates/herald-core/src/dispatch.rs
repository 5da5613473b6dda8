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

//! The dispatch pass shared by every front-end.
//!
//! A pass works on a snapshot of the handler list:
//!
//! 1. Copy the entries under the list's read lock, then release it.
//! 2. Walk the copy in priority order. Dead owners are marked for removal and
//!    skipped; filters may skip a handler; once-handlers are claimed and
//!    marked for removal; the handler is invoked with panics contained.
//! 3. Remove everything that was marked under a single write lock.
//! 4. Hand the snapshot buffer back to its pool.
//!
//! Because nothing is locked in step 2, handlers are free to subscribe,
//! unsubscribe or publish (even the same event type) while they run. Such
//! changes show up on the next pass.

use crate::error::{panic_to_error, DispatchError, HandlerFailure};
use crate::event::{HandlerInfo, HandlerResult};
use crate::filter::FilterSet;
use crate::registry::{HandlerEntry, HandlerList};
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// The type-erased owner handed to callbacks.
pub(crate) type Owner = dyn Any + Send + Sync;

/// Fire-and-forget callback.
pub(crate) type EventFn<T> = dyn Fn(&Owner, &T) -> HandlerResult + Send + Sync;
/// Mutable-payload callback.
pub(crate) type EventRefFn<T> = dyn Fn(&Owner, &mut T) -> HandlerResult + Send + Sync;
/// Request/response callback.
pub(crate) type ResponderFn<T, R> = dyn Fn(&Owner, &T) -> anyhow::Result<R> + Send + Sync;

/// Whether the pass continues after a handler ran.
pub(crate) enum Flow {
    Continue,
    Stop,
}

/// Variant-specific half of a dispatch pass.
pub(crate) trait Invocation<F: ?Sized> {
    /// Consults the filters for this handler.
    fn admits(&self, handler: &HandlerInfo<'_>) -> bool;

    /// Runs the handler.
    fn invoke(&mut self, entry: &HandlerEntry<F>, owner: &Owner) -> Flow;
}

/// Runs one dispatch pass over `list`. Returns the number of handlers invoked.
pub(crate) fn run<F, I>(list: &HandlerList<F>, invocation: &mut I) -> usize
where
    F: ?Sized + Send + Sync + 'static,
    I: Invocation<F>,
{
    let Some(snapshot) = list.snapshot() else {
        return 0;
    };

    let mut doomed: Vec<Arc<HandlerEntry<F>>> = Vec::new();
    let mut invoked = 0;

    for entry in snapshot.iter() {
        let Some(owner) = entry.owner().resolve() else {
            log::trace!(
                "Handler `{}` of `{}` has a dead owner",
                entry.name(),
                list.event()
            );
            doomed.push(Arc::clone(entry));
            continue;
        };
        if entry.is_consumed() {
            continue;
        }
        if !invocation.admits(&entry.info(owner.as_ref())) {
            continue;
        }
        if entry.is_once() {
            if !entry.claim() {
                continue;
            }
            doomed.push(Arc::clone(entry));
        }

        invoked += 1;
        if let Flow::Stop = invocation.invoke(entry, owner.as_ref()) {
            break;
        }
    }

    drop(snapshot);
    list.remove_batch(&doomed);
    invoked
}

/// Runs `call`, turning a panic into an error.
pub(crate) fn contain<R>(call: impl FnOnce() -> anyhow::Result<R>) -> anyhow::Result<R> {
    catch_unwind(AssertUnwindSafe(call)).unwrap_or_else(|payload| Err(panic_to_error(payload)))
}

/// Collects failures of a fan-out pass.
struct Failures(Vec<HandlerFailure>);

impl Failures {
    fn record<F: ?Sized>(&mut self, entry: &HandlerEntry<F>, result: HandlerResult) {
        if let Err(error) = result {
            log::debug!("Handler `{}` failed: {error:#}", entry.name());
            self.0.push(HandlerFailure {
                handler: entry.name(),
                priority: entry.priority(),
                error,
            });
        }
    }

    fn into_result<T>(self, invoked: usize) -> Result<usize, DispatchError> {
        if self.0.is_empty() {
            return Ok(invoked);
        }
        Err(DispatchError {
            event: std::any::type_name::<T>(),
            invoked,
            failures: self.0,
        })
    }
}

/// Fire-and-forget: every eligible handler sees the same `&T`.
pub(crate) struct Broadcast<'a, T: 'static> {
    event: &'a T,
    filters: FilterSet<T>,
    failures: Failures,
}

impl<'a, T: 'static> Broadcast<'a, T> {
    pub(crate) fn new(event: &'a T, filters: FilterSet<T>) -> Self {
        Self {
            event,
            filters,
            failures: Failures(Vec::new()),
        }
    }

    pub(crate) fn finish(self, invoked: usize) -> Result<usize, DispatchError> {
        self.failures.into_result::<T>(invoked)
    }
}

impl<T: 'static> Invocation<EventFn<T>> for Broadcast<'_, T> {
    fn admits(&self, handler: &HandlerInfo<'_>) -> bool {
        self.filters.admits(self.event, handler)
    }

    fn invoke(&mut self, entry: &HandlerEntry<EventFn<T>>, owner: &Owner) -> Flow {
        let event = self.event;
        let result = contain(|| (entry.callback())(owner, event));
        self.failures.record(entry, result);
        Flow::Continue
    }
}

/// Mutable: handlers see `&mut T` one after the other.
pub(crate) struct BroadcastMut<'a, T: 'static> {
    event: &'a mut T,
    filters: FilterSet<T>,
    failures: Failures,
}

impl<'a, T: 'static> BroadcastMut<'a, T> {
    pub(crate) fn new(event: &'a mut T, filters: FilterSet<T>) -> Self {
        Self {
            event,
            filters,
            failures: Failures(Vec::new()),
        }
    }

    pub(crate) fn finish(self, invoked: usize) -> Result<usize, DispatchError> {
        self.failures.into_result::<T>(invoked)
    }
}

impl<T: 'static> Invocation<EventRefFn<T>> for BroadcastMut<'_, T> {
    fn admits(&self, handler: &HandlerInfo<'_>) -> bool {
        self.filters.admits(&*self.event, handler)
    }

    fn invoke(&mut self, entry: &HandlerEntry<EventRefFn<T>>, owner: &Owner) -> Flow {
        let event = &mut *self.event;
        let result = contain(|| (entry.callback())(owner, event));
        self.failures.record(entry, result);
        Flow::Continue
    }
}

/// What the single responder of a request produced.
pub(crate) struct Response<R> {
    pub(crate) handler: &'static str,
    pub(crate) result: anyhow::Result<R>,
}

/// Request/response: the first eligible handler answers, then the pass stops.
pub(crate) struct Request<'a, T: 'static, R> {
    event: &'a T,
    filters: FilterSet<T>,
    response: Option<Response<R>>,
}

impl<'a, T: 'static, R> Request<'a, T, R> {
    pub(crate) fn new(event: &'a T, filters: FilterSet<T>) -> Self {
        Self {
            event,
            filters,
            response: None,
        }
    }

    /// `None` when no handler was eligible.
    pub(crate) fn into_response(self) -> Option<Response<R>> {
        self.response
    }
}

impl<T: 'static, R: 'static> Invocation<ResponderFn<T, R>> for Request<'_, T, R> {
    fn admits(&self, handler: &HandlerInfo<'_>) -> bool {
        self.filters.admits(self.event, handler)
    }

    fn invoke(&mut self, entry: &HandlerEntry<ResponderFn<T, R>>, owner: &Owner) -> Flow {
        let event = self.event;
        self.response = Some(Response {
            handler: entry.name(),
            result: contain(|| (entry.callback())(owner, event)),
        });
        Flow::Stop
    }
}
