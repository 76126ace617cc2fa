// Copyright (C) 2019  Braiins Systems s.r.o.
//
// This file is part of Braiins Open-Source Initiative (BOSI).
//
// BOSI is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
//
// Please, keep in mind that we may also license BOSI or any part thereof
// under a proprietary license. For more information on the terms and conditions
// of such proprietary license or if you have any other questions, please
// contact us at opensource@braiins.com.

//! Per-connection object tables and the reclamation protocol state.
//!
//! The export table holds objects this side has handed to the peer, each
//! with a version counter bumped on every outbound marshalling. The proxy
//! table holds (weakly) the handles this side manufactured for the peer's
//! objects, with the last version observed per object id. Reclaimed
//! proxies land in the pending-delete set and are announced in batches.
//!
//! The version counters resolve the race between "object became
//! unreachable here" and "object was just re-sent to us": a Delete only
//! takes effect on the owner when the version it carries matches the
//! export entry exactly.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use tether_logging::macros::*;

use crate::proxy::{Proxy, ProxyInner, ProxyKind};
use crate::value::{ObjectId, ObjectRef, Value};

/// What the peer needs to manufacture a handle: identity, capability
/// mask, kind, and optional constructor arguments.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub id: ObjectId,
    pub opmask: u64,
    pub kind: ProxyKind,
    pub args: Option<Value>,
    /// Version this descriptor was (re)delivered with
    pub version: u64,
}

/// An object this side has exported to the peer.
pub(crate) struct Export {
    pub object: ObjectRef,
    /// Descriptor sent at first export; kept for diagnostics
    pub descriptor: Descriptor,
    /// Bumped on every outbound marshalling of this id
    pub version: u64,
}

/// Weak or strong handle in the proxy table. Strong only when GC is
/// disabled for the connection.
pub(crate) enum ProxyRef {
    Weak(Weak<ProxyInner>),
    Strong(Proxy),
}

/// Client-side record of a peer object id.
///
/// The slot outlives its proxy: when the proxy is reclaimed and the same
/// id is later re-sent as a bare "known proxy" reference, the cached
/// descriptor lets this side re-manufacture a handle without a round trip.
pub(crate) struct ProxySlot {
    pub proxy: ProxyRef,
    /// Last version observed from the peer for this id
    pub version: u64,
    pub descriptor: Descriptor,
}

impl ProxySlot {
    pub fn live(&self) -> Option<Proxy> {
        match &self.proxy {
            ProxyRef::Weak(weak) => weak.upgrade().map(|inner| Proxy { inner }),
            ProxyRef::Strong(proxy) => Some(proxy.clone()),
        }
    }
}

/// Outcome of marshalling a local object: either the peer already knows
/// the id (re-delivery with a bumped version) or a full descriptor must
/// travel.
pub(crate) enum EncodedRef {
    Known { id: ObjectId, version: u64 },
    New(Descriptor),
}

pub(crate) struct TablesInner {
    closed: bool,
    next_id: ObjectId,
    exports: HashMap<ObjectId, Export>,
    ids_by_identity: HashMap<usize, ObjectId>,
    proxies: HashMap<ObjectId, ProxySlot>,
}

/// The two object tables, guarded by a single mutex so identity decisions
/// stay consistent, plus the condition used by decoders waiting for a
/// racing frame to install a proxy.
pub(crate) struct Tables {
    inner: Mutex<TablesInner>,
    pub(crate) installed: Condvar,
}

impl Tables {
    pub fn new() -> Self {
        Tables {
            inner: Mutex::new(TablesInner {
                closed: false,
                next_id: 1,
                exports: HashMap::new(),
                ids_by_identity: HashMap::new(),
                proxies: HashMap::new(),
            }),
            installed: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, TablesInner> {
        self.inner.lock().expect("BUG: object tables mutex poisoned")
    }

    /// Wake everything waiting on the tables and drop all entries; the
    /// closed state is terminal and nothing survives a disconnect. The
    /// entries are released outside the lock, since dropping an export
    /// can run arbitrary object destructors.
    pub fn close(&self) {
        let (exports, proxies) = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.ids_by_identity.clear();
            (
                std::mem::take(&mut inner.exports),
                std::mem::take(&mut inner.proxies),
            )
        };
        self.installed.notify_all();
        drop(exports);
        drop(proxies);
    }
}

impl TablesInner {
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Marshal a local object: bump the version of a previously exported
    /// id, or allocate a fresh id and build its descriptor. Ids are never
    /// reused within a connection.
    pub fn export(&mut self, object: &ObjectRef) -> EncodedRef {
        if let Some(&id) = self.ids_by_identity.get(&object.addr()) {
            let entry = self
                .exports
                .get_mut(&id)
                .expect("BUG: identity map out of sync with export table");
            entry.version += 1;
            return EncodedRef::Known {
                id,
                version: entry.version,
            };
        }

        let id = self.next_id;
        self.next_id += 1;
        let descriptor = Descriptor {
            id,
            opmask: object.operator_mask(),
            kind: object.proxy_kind(),
            args: object.ctor_args(),
            version: 0,
        };
        trace!("exporting object id={} as {:?}", id, descriptor.kind);
        self.exports.insert(
            id,
            Export {
                object: object.clone(),
                descriptor: descriptor.clone(),
                version: 0,
            },
        );
        self.ids_by_identity.insert(object.addr(), id);
        EncodedRef::New(descriptor)
    }

    /// Resolve a back-reference the peer sent for one of our exports.
    pub fn resolve_origin(&self, id: ObjectId) -> Option<ObjectRef> {
        self.exports.get(&id).map(|entry| entry.object.clone())
    }

    /// Apply one entry of a Delete message. The export is dropped only if
    /// the stored version matches exactly; a mismatch means a marshalling
    /// raced the peer's reclamation and the entry must stay.
    pub fn handle_delete(&mut self, id: ObjectId, version: u64) -> bool {
        match self.exports.get(&id) {
            Some(entry) if entry.version == version => {
                let entry = self
                    .exports
                    .remove(&id)
                    .expect("BUG: export vanished under the tables lock");
                self.ids_by_identity.remove(&entry.object.addr());
                trace!(
                    "deleted export id={} ({:?}) at v={}",
                    id,
                    entry.descriptor.kind,
                    version
                );
                true
            }
            Some(entry) => {
                trace!(
                    "retaining export id={}: delete v={} != stored v={}",
                    id,
                    version,
                    entry.version
                );
                false
            }
            None => false,
        }
    }

    pub fn proxy_slot_mut(&mut self, id: ObjectId) -> Option<&mut ProxySlot> {
        self.proxies.get_mut(&id)
    }

    pub fn install_proxy(&mut self, slot_id: ObjectId, slot: ProxySlot) {
        self.proxies.insert(slot_id, slot);
    }

    pub fn exported_count(&self) -> usize {
        self.exports.len()
    }

    pub fn exported_ids(&self) -> Vec<ObjectId> {
        self.exports.keys().copied().collect()
    }

    pub fn live_proxy_count(&self) -> usize {
        self.proxies
            .values()
            .filter(|slot| slot.live().is_some())
            .count()
    }
}

struct PendingInner {
    map: HashMap<ObjectId, u64>,
    last_flush: Instant,
}

/// Proxies reclaimed locally whose deletion has not been announced yet.
pub(crate) struct PendingDeletes {
    inner: Mutex<PendingInner>,
}

impl PendingDeletes {
    pub fn new() -> Self {
        PendingDeletes {
            inner: Mutex::new(PendingInner {
                map: HashMap::new(),
                last_flush: Instant::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PendingInner> {
        self.inner
            .lock()
            .expect("BUG: pending-delete mutex poisoned")
    }

    pub fn enqueue(&self, id: ObjectId, version: u64) {
        self.lock().map.insert(id, version);
    }

    /// Drain the set if it is non-empty and at least `interval` elapsed
    /// since the last drain.
    pub fn take_due(&self, interval: Duration) -> Option<Vec<(ObjectId, u64)>> {
        let mut inner = self.lock();
        if inner.map.is_empty() {
            return None;
        }
        if inner.last_flush.elapsed() < interval {
            return None;
        }
        inner.last_flush = Instant::now();
        Some(inner.map.drain().collect())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn new_list() -> ObjectRef {
        Value::new_list(vec![])
            .as_object()
            .expect("list is an object")
            .clone()
    }

    #[test]
    fn test_export_bumps_version_and_keeps_id() {
        let tables = Tables::new();
        let obj = new_list();
        let mut t = tables.lock();

        let id = match t.export(&obj) {
            EncodedRef::New(desc) => {
                assert_eq!(desc.version, 0);
                assert_eq!(desc.kind, ProxyKind::List);
                desc.id
            }
            _ => panic!("first export must deliver a descriptor"),
        };
        match t.export(&obj) {
            EncodedRef::Known { id: id2, version } => {
                assert_eq!(id2, id);
                assert_eq!(version, 1);
            }
            _ => panic!("second export must be a known reference"),
        }
        match t.export(&obj) {
            EncodedRef::Known { version, .. } => assert_eq!(version, 2),
            _ => panic!("third export must be a known reference"),
        }
        assert!(t.resolve_origin(id).is_some());
    }

    #[test]
    fn test_delete_requires_exact_version() {
        let tables = Tables::new();
        let obj = new_list();
        let mut t = tables.lock();
        let id = match t.export(&obj) {
            EncodedRef::New(desc) => desc.id,
            _ => panic!("expected descriptor"),
        };
        t.export(&obj); // v1 in flight

        // Stale delete (peer observed v0) must retain the entry
        assert!(!t.handle_delete(id, 0));
        assert!(t.resolve_origin(id).is_some());

        // Exact version drops it
        assert!(t.handle_delete(id, 1));
        assert!(t.resolve_origin(id).is_none());
    }

    #[test]
    fn test_ids_never_reused() {
        let tables = Tables::new();
        let obj = new_list();
        let mut t = tables.lock();
        let first = match t.export(&obj) {
            EncodedRef::New(desc) => desc.id,
            _ => panic!("expected descriptor"),
        };
        assert!(t.handle_delete(first, 0));

        // Same identity exported again gets a fresh id
        let second = match t.export(&obj) {
            EncodedRef::New(desc) => desc.id,
            _ => panic!("re-export after delete must deliver a descriptor"),
        };
        assert_ne!(first, second);
    }

    #[test]
    fn test_pending_deletes_interval() {
        let pending = PendingDeletes::new();
        assert!(pending.take_due(Duration::from_secs(0)).is_none());

        pending.enqueue(7, 3);
        pending.enqueue(7, 4); // later observation wins
        let due = pending
            .take_due(Duration::from_secs(0))
            .expect("zero interval is always due");
        assert_eq!(due, vec![(7, 4)]);

        pending.enqueue(8, 0);
        assert!(
            pending.take_due(Duration::from_secs(3600)).is_none(),
            "interval not elapsed, nothing due"
        );
    }
}
