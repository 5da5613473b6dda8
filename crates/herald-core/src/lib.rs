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

//! # Herald Core
//!
//! A typed, in-process event dispatch engine.
//!
//! Subscribers are reference-counted objects (`Arc<S>`). The bus only keeps
//! weak references to them, so a subscriber that goes out of scope simply
//! stops receiving events and its handlers are purged lazily.
//!
//! Three dispatch disciplines share one registry:
//!
//! * [`EventBus::publish`]: fire-and-forget, every handler sees `&T`.
//! * [`EventBus::publish_ref`]: handlers see `&mut T` in priority order and
//!   may edit the payload before the caller reads it back.
//! * [`EventBus::publish_request`]: the single highest-priority responder
//!   produces a result that is handed to a continuation.
//!
//! Subscription can be explicit ([`EventBus::subscribe`]) or declarative
//! through the [`handlers`] attribute and [`EventBus::register`].

#![warn(missing_docs)]

// Lets the code generated by `herald-macros` name `::herald_core` from inside
// this crate, as the lifecycle unit tests do.
extern crate self as herald_core;

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod filter;
pub mod lifecycle;
pub mod owner;
pub mod pool;
pub mod queue;
pub mod registry;

pub use bus::EventBus;
pub use config::BusConfig;
pub use error::{DispatchError, HandlerFailure};
pub use event::{Event, HandlerInfo, HandlerResult, SubscribeOptions};
pub use lifecycle::{BindingTable, EventHandlers};
pub use owner::Subscriber;
pub use pool::{Pool, Pooled, PooledEvent};
pub use queue::EventQueue;

pub use herald_macros::{handlers, Subscriber};
