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

//! Deferred delivery through a channel.

use crate::bus::EventBus;
use crate::error::DispatchError;
use crate::event::Event;

/// A deferred, thread-safe event channel in front of an [`EventBus`].
///
/// Producers on any thread push events; the owner of the queue (typically
/// the main loop) publishes everything pending with [`flush`](Self::flush),
/// in the order the events were pushed. This keeps handlers that are not
/// thread-safe on a single thread.
#[derive(Debug)]
pub struct EventQueue<T: Event> {
    sender: flume::Sender<T>,
    receiver: flume::Receiver<T>,
}

impl<T: Event> EventQueue<T> {
    /// Creates a new queue with an unbounded channel.
    pub fn new() -> Self {
        let (sender, receiver) = flume::unbounded();
        log::debug!("EventQueue for `{}` initialized.", std::any::type_name::<T>());
        Self { sender, receiver }
    }

    /// Queues an event for the next flush.
    ///
    /// ## Arguments
    /// * `event` - The event to be delivered later.
    pub fn push(&self, event: T) {
        log::trace!("Queueing an event.");

        // The queue owns a receiver, so the channel cannot be disconnected.
        if let Err(e) = self.sender.send(event) {
            log::error!("Failed to queue event: {e}.");
        }
    }

    /// Returns a clone of the sender end of the channel.
    /// Use this to let other threads queue events.
    pub fn sender(&self) -> flume::Sender<T> {
        self.sender.clone()
    }

    /// Number of events waiting for a flush.
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    /// `true` when no event is waiting.
    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Publishes every pending event on `bus`.
    ///
    /// Events pushed while the flush runs (for instance by a handler) are
    /// left for the next flush. Handler failures of every event are gathered
    /// into one [`DispatchError`]; all events are still delivered.
    ///
    /// ## Returns
    /// The number of events published.
    pub fn flush(&self, bus: &EventBus) -> Result<usize, DispatchError> {
        let pending = self.receiver.len();
        let mut invoked = 0;
        let mut failures = Vec::new();

        for event in self.receiver.try_iter().take(pending) {
            match bus.publish(&event) {
                Ok(count) => invoked += count,
                Err(err) => {
                    invoked += err.invoked;
                    failures.extend(err.failures);
                }
            }
        }

        if failures.is_empty() {
            Ok(pending)
        } else {
            Err(DispatchError {
                event: std::any::type_name::<T>(),
                invoked,
                failures,
            })
        }
    }
}

impl<T: Event> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
