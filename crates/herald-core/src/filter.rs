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

//! Delivery filters.
//!
//! A filter can veto the delivery of one event to one handler. It never
//! removes the handler: once the filter lets it through again, the handler
//! receives events as before.

use crate::event::HandlerInfo;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

pub(crate) type FilterFn<T> = dyn Fn(&T, &HandlerInfo<'_>) -> bool + Send + Sync;

/// Filters of every event type. Filters live as long as the bus.
#[derive(Default)]
pub(crate) struct FilterRegistry {
    filters: RwLock<HashMap<TypeId, Box<dyn Any + Send + Sync>>>,
}

impl FilterRegistry {
    pub(crate) fn add<T: 'static>(&self, filter: Arc<FilterFn<T>>) {
        let mut filters = self.filters.write().unwrap_or_else(PoisonError::into_inner);
        let list = filters
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Vec::<Arc<FilterFn<T>>>::new()));
        if let Some(list) = list.downcast_mut::<Vec<Arc<FilterFn<T>>>>() {
            list.push(filter);
        }
    }

    /// Copies the filters of `T` so they can be evaluated without the lock.
    pub(crate) fn snapshot<T: 'static>(&self) -> FilterSet<T> {
        let filters = self.filters.read().unwrap_or_else(PoisonError::into_inner);
        let list = filters
            .get(&TypeId::of::<T>())
            .and_then(|list| list.downcast_ref::<Vec<Arc<FilterFn<T>>>>())
            .cloned()
            .unwrap_or_default();
        FilterSet(list)
    }

    pub(crate) fn count<T: 'static>(&self) -> usize {
        self.snapshot::<T>().0.len()
    }

    pub(crate) fn clear(&self) {
        self.filters
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// The filters of one event type, captured at the start of a dispatch.
pub(crate) struct FilterSet<T: 'static>(Vec<Arc<FilterFn<T>>>);

impl<T: 'static> FilterSet<T> {
    /// `true` when every filter accepts the handler. A filter that panics
    /// rejects it.
    pub(crate) fn admits(&self, event: &T, handler: &HandlerInfo<'_>) -> bool {
        self.0.iter().all(|filter| {
            catch_unwind(AssertUnwindSafe(|| filter(event, handler))).unwrap_or_else(|_| {
                log::warn!(
                    "A filter for `{}` panicked on handler `{}`; skipping the handler",
                    std::any::type_name::<T>(),
                    handler.name()
                );
                false
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Panel {
        visible: bool,
    }

    fn info<'a>(owner: &'a Panel, name: &'static str) -> HandlerInfo<'a> {
        HandlerInfo {
            name,
            priority: 0,
            once: false,
            owner,
        }
    }

    #[test]
    fn no_filters_admit_everything() {
        let registry = FilterRegistry::default();
        let panel = Panel { visible: false };
        assert!(registry.snapshot::<u32>().admits(&1, &info(&panel, "a")));
    }

    #[test]
    fn filters_are_a_conjunction() {
        let registry = FilterRegistry::default();
        registry.add::<u32>(Arc::new(|value: &u32, _: &HandlerInfo<'_>| *value > 2));
        registry.add::<u32>(Arc::new(|_: &u32, handler: &HandlerInfo<'_>| {
            handler.owner::<Panel>().is_some_and(|p| p.visible)
        }));
        assert_eq!(registry.count::<u32>(), 2);
        assert_eq!(registry.count::<i64>(), 0);

        let visible = Panel { visible: true };
        let hidden = Panel { visible: false };
        let filters = registry.snapshot::<u32>();
        assert!(filters.admits(&3, &info(&visible, "a")));
        assert!(!filters.admits(&1, &info(&visible, "a")));
        assert!(!filters.admits(&3, &info(&hidden, "a")));
    }

    #[test]
    fn panicking_filter_rejects() {
        let registry = FilterRegistry::default();
        registry.add::<u32>(Arc::new(|_: &u32, _: &HandlerInfo<'_>| panic!("bad filter")));
        let panel = Panel { visible: true };
        assert!(!registry.snapshot::<u32>().admits(&1, &info(&panel, "a")));
    }
}
