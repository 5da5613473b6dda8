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

//! Error types surfaced by dispatch.
//!
//! Registration never fails. Only handler invocation can fail, and those
//! failures are collected per handler and reported once the whole fan-out
//! has completed.

use std::any::Any;
use std::fmt;

/// A single handler that returned an error or panicked during dispatch.
#[derive(Debug)]
pub struct HandlerFailure {
    /// Diagnostic name of the handler (method or owner type name).
    pub handler: &'static str,
    /// Priority the handler was registered with.
    pub priority: i32,
    /// The error the handler returned, or a description of its panic.
    pub error: anyhow::Error,
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "handler `{}` (priority {}) failed: {}",
            self.handler, self.priority, self.error
        )
    }
}

/// Aggregate failure of one publish call.
///
/// Every eligible handler still ran; this error only tells the producer that
/// some of them failed, and which.
#[derive(Debug, thiserror::Error)]
#[error("{} of {invoked} handler(s) failed while dispatching `{event}`", .failures.len())]
pub struct DispatchError {
    /// Type name of the event being dispatched.
    pub event: &'static str,
    /// Number of handlers that were invoked.
    pub invoked: usize,
    /// Per-handler failures in invocation order.
    pub failures: Vec<HandlerFailure>,
}

impl DispatchError {
    /// Returns the failure of the handler with the given name, if it failed.
    pub fn failure_of(&self, handler: &str) -> Option<&HandlerFailure> {
        self.failures.iter().find(|f| f.handler == handler)
    }
}

/// Turns a panic payload into an error that can travel in a [`HandlerFailure`].
pub(crate) fn panic_to_error(payload: Box<dyn Any + Send>) -> anyhow::Error {
    let message = if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    };
    anyhow::anyhow!("handler panicked: {message}")
}
