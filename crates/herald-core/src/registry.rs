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

//! Handler storage.
//!
//! The [`Registry`] maps a callback signature (which encodes both the event
//! type and the dispatch variant) to a [`HandlerList`]. Each list keeps its
//! entries sorted by descending priority behind its own `RwLock`: the read
//! side is only held to copy a snapshot, the write side only for structural
//! changes. No lock is ever held while user code runs.

use crate::event::{HandlerInfo, SubscribeOptions};
use crate::owner::{OwnerId, OwnerRef};
use crate::pool::{Pool, Pooled};
use std::any::{Any, TypeId};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Identity of a subscription: the owner plus the handler function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct HandlerKey {
    owner: OwnerId,
    handler: usize,
}

impl HandlerKey {
    pub(crate) fn new(owner: OwnerId, handler: usize) -> Self {
        Self { owner, handler }
    }
}

/// One registered handler.
pub(crate) struct HandlerEntry<F: ?Sized> {
    key: HandlerKey,
    name: &'static str,
    priority: i32,
    once: bool,
    /// Set when a once-handler has been claimed by a dispatch pass.
    consumed: AtomicBool,
    owner: OwnerRef,
    callback: Box<F>,
}

impl<F: ?Sized> HandlerEntry<F> {
    pub(crate) fn new(
        key: HandlerKey,
        owner: OwnerRef,
        options: SubscribeOptions,
        default_name: &'static str,
        callback: Box<F>,
    ) -> Self {
        Self {
            key,
            name: options.name.unwrap_or(default_name),
            priority: options.priority,
            once: options.once,
            consumed: AtomicBool::new(false),
            owner,
            callback,
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn priority(&self) -> i32 {
        self.priority
    }

    pub(crate) fn is_once(&self) -> bool {
        self.once
    }

    pub(crate) fn owner(&self) -> &OwnerRef {
        &self.owner
    }

    pub(crate) fn callback(&self) -> &F {
        &self.callback
    }

    pub(crate) fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::Acquire)
    }

    /// Claims a once-handler. Only the first caller gets `true`.
    pub(crate) fn claim(&self) -> bool {
        !self.consumed.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn info<'a>(&self, owner: &'a (dyn Any + Send + Sync)) -> HandlerInfo<'a> {
        HandlerInfo {
            name: self.name,
            priority: self.priority,
            once: self.once,
            owner,
        }
    }
}

type Snapshot<F> = Vec<Arc<HandlerEntry<F>>>;

/// The priority-ordered handlers of one event type and variant.
pub(crate) struct HandlerList<F: ?Sized> {
    event: &'static str,
    entries: RwLock<Vec<Arc<HandlerEntry<F>>>>,
    snapshots: Pool<Snapshot<F>>,
    batch_set_threshold: usize,
}

impl<F: ?Sized + Send + Sync + 'static> HandlerList<F> {
    fn new(event: &'static str, snapshot_pool_size: usize, batch_set_threshold: usize) -> Self {
        Self {
            event,
            entries: RwLock::new(Vec::new()),
            snapshots: Pool::new(snapshot_pool_size, Vec::new).on_release(Vec::clear),
            batch_set_threshold,
        }
    }

    pub(crate) fn event(&self) -> &'static str {
        self.event
    }

    /// Inserts `entry`, or replaces the entry with the same identity.
    ///
    /// A replacement keeps its position unless its priority changed.
    /// Returns `true` if a new subscription was created.
    pub(crate) fn add(&self, entry: HandlerEntry<F>) -> bool {
        let mut entries = self.write();
        let Some(index) = entries.iter().position(|e| e.key == entry.key) else {
            let index = insertion_index(&entries, entry.priority);
            entries.insert(index, Arc::new(entry));
            return true;
        };

        let previous = &entries[index];
        log::warn!(
            "Handler `{}` is already subscribed to `{}`; updating it (priority {} -> {}, once {} -> {})",
            entry.name,
            self.event,
            previous.priority,
            entry.priority,
            previous.once,
            entry.once
        );
        if previous.priority == entry.priority {
            entries[index] = Arc::new(entry);
        } else {
            entries.remove(index);
            let index = insertion_index(&entries, entry.priority);
            entries.insert(index, Arc::new(entry));
        }
        false
    }

    /// Removes the entry with the given identity.
    pub(crate) fn remove_key(&self, key: HandlerKey) -> bool {
        let mut entries = self.write();
        match entries.iter().position(|e| e.key == key) {
            Some(index) => {
                entries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Copies the current entries into a pooled buffer.
    ///
    /// Returns `None` when there is nothing to dispatch to.
    pub(crate) fn snapshot(&self) -> Option<Pooled<'_, Snapshot<F>>> {
        let entries = self.read();
        if entries.is_empty() {
            return None;
        }
        let mut snapshot = self.snapshots.get_pooled();
        snapshot.extend(entries.iter().cloned());
        Some(snapshot)
    }

    /// Removes every entry in `doomed` that is still registered.
    pub(crate) fn remove_batch(&self, doomed: &[Arc<HandlerEntry<F>>]) -> usize {
        if doomed.is_empty() {
            return 0;
        }
        let mut entries = self.write();
        let before = entries.len();
        if doomed.len() > self.batch_set_threshold {
            let doomed: HashSet<*const HandlerEntry<F>> = doomed.iter().map(Arc::as_ptr).collect();
            entries.retain(|e| !doomed.contains(&Arc::as_ptr(e)));
        } else {
            entries.retain(|e| !doomed.iter().any(|d| Arc::ptr_eq(d, e)));
        }
        before - entries.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.read().len()
    }

    #[cfg(test)]
    pub(crate) fn names(&self) -> Vec<&'static str> {
        self.read().iter().map(|e| e.name).collect()
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<Arc<HandlerEntry<F>>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<Arc<HandlerEntry<F>>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Position at which a new entry of `priority` keeps the list sorted by
/// descending priority, after every entry of equal priority (FIFO).
fn insertion_index<F: ?Sized>(entries: &[Arc<HandlerEntry<F>>], priority: i32) -> usize {
    match (entries.first(), entries.last()) {
        (None, _) | (_, None) => 0,
        (_, Some(last)) if last.priority >= priority => entries.len(),
        (Some(first), _) if first.priority < priority => 0,
        _ => entries.partition_point(|e| e.priority >= priority),
    }
}

/// Type-erased operations the registry runs across every list.
trait ErasedList: Send + Sync {
    fn event(&self) -> &'static str;
    fn len(&self) -> usize;
    fn remove_owner(&self, owner: OwnerId) -> usize;
    fn purge_dead(&self) -> usize;
}

impl<F: ?Sized + Send + Sync + 'static> ErasedList for HandlerList<F> {
    fn event(&self) -> &'static str {
        self.event
    }

    fn len(&self) -> usize {
        HandlerList::len(self)
    }

    fn remove_owner(&self, owner: OwnerId) -> usize {
        let mut entries = self.write();
        let before = entries.len();
        entries.retain(|e| e.owner.id() != owner);
        before - entries.len()
    }

    fn purge_dead(&self) -> usize {
        // Liveness checks may run subscriber code, so they happen on a copy.
        let Some(snapshot) = self.snapshot() else {
            return 0;
        };
        let dead: Vec<_> = snapshot
            .iter()
            .filter(|e| e.owner.is_dead())
            .cloned()
            .collect();
        drop(snapshot);
        self.remove_batch(&dead)
    }
}

struct Slot {
    typed: Arc<dyn Any + Send + Sync>,
    erased: Arc<dyn ErasedList>,
}

/// Every handler list of a bus, keyed by callback signature.
pub(crate) struct Registry {
    lists: RwLock<HashMap<TypeId, Slot>>,
    snapshot_pool_size: usize,
    batch_set_threshold: usize,
}

impl Registry {
    pub(crate) fn new(snapshot_pool_size: usize, batch_set_threshold: usize) -> Self {
        Self {
            lists: RwLock::new(HashMap::new()),
            snapshot_pool_size,
            batch_set_threshold,
        }
    }

    /// Returns the list for `F`, creating it on first use.
    pub(crate) fn list<F: ?Sized + Send + Sync + 'static>(
        &self,
        event: &'static str,
    ) -> Arc<HandlerList<F>> {
        if let Some(list) = self.find::<F>() {
            return list;
        }
        let mut lists = self.lists.write().unwrap_or_else(PoisonError::into_inner);
        let slot = lists.entry(TypeId::of::<F>()).or_insert_with(|| {
            let list = Arc::new(HandlerList::<F>::new(
                event,
                self.snapshot_pool_size,
                self.batch_set_threshold,
            ));
            Slot {
                typed: list.clone(),
                erased: list,
            }
        });
        downcast_list(&slot.typed)
    }

    /// Returns the list for `F` if anything was ever subscribed to it.
    pub(crate) fn find<F: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<HandlerList<F>>> {
        let lists = self.lists.read().unwrap_or_else(PoisonError::into_inner);
        lists.get(&TypeId::of::<F>()).map(|slot| downcast_list(&slot.typed))
    }

    /// Removes every entry owned by `owner` across all lists.
    pub(crate) fn remove_owner(&self, owner: OwnerId) -> usize {
        self.erased()
            .iter()
            .map(|list| list.remove_owner(owner))
            .sum()
    }

    /// Removes every entry whose owner is gone, across all lists.
    pub(crate) fn sweep(&self) -> usize {
        self.erased()
            .iter()
            .map(|list| {
                let purged = list.purge_dead();
                if purged > 0 {
                    log::debug!("Purged {purged} dead handler(s) from `{}`", list.event());
                }
                purged
            })
            .sum()
    }

    pub(crate) fn total(&self) -> usize {
        self.erased().iter().map(|list| list.len()).sum()
    }

    pub(crate) fn clear(&self) {
        self.lists
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Clones the erased lists so that the map lock is not held while
    /// walking them.
    fn erased(&self) -> Vec<Arc<dyn ErasedList>> {
        let lists = self.lists.read().unwrap_or_else(PoisonError::into_inner);
        lists.values().map(|slot| slot.erased.clone()).collect()
    }
}

fn downcast_list<F: ?Sized + Send + Sync + 'static>(
    typed: &Arc<dyn Any + Send + Sync>,
) -> Arc<HandlerList<F>> {
    // Slots are keyed by `TypeId::of::<F>()`, so the downcast cannot miss.
    match typed.clone().downcast::<HandlerList<F>>() {
        Ok(list) => list,
        Err(_) => unreachable!("handler list registered under the wrong type"),
    }
}
