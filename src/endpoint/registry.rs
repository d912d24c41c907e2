// Copyright 2025 The dcSCTP Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::api::AssocId;
use crate::association::Association;
use std::collections::HashMap;
use std::net::SocketAddr;

/// All associations of an endpoint, indexed by the peer's transport addresses and by the local
/// verification tag.
#[derive(Default)]
pub(crate) struct Registry {
    associations: HashMap<AssocId, Association>,
    by_addr: HashMap<SocketAddr, AssocId>,
    by_vtag: HashMap<u32, AssocId>,
    last_id: u32,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns an identifier to `assoc` and adds it.
    pub fn insert(&mut self, mut assoc: Association) -> AssocId {
        self.last_id = self.last_id.wrapping_add(1).max(1);
        while self.associations.contains_key(&AssocId(self.last_id)) {
            self.last_id = self.last_id.wrapping_add(1).max(1);
        }
        let id = AssocId(self.last_id);
        assoc.id = id;
        self.associations.insert(id, assoc);
        self.reindex(id);
        id
    }

    /// Rewrites the index entries of `id`, after its addresses or tags have changed.
    pub fn reindex(&mut self, id: AssocId) {
        self.by_addr.retain(|_, v| *v != id);
        self.by_vtag.retain(|_, v| *v != id);
        let Some(assoc) = self.associations.get(&id) else {
            return;
        };
        for t in &assoc.transports {
            self.by_addr.insert(t.address, id);
        }
        self.by_vtag.insert(assoc.my_vtag, id);
    }

    pub fn remove(&mut self, id: AssocId) -> Option<Association> {
        let assoc = self.associations.remove(&id)?;
        self.by_addr.retain(|_, v| *v != id);
        self.by_vtag.retain(|_, v| *v != id);
        Some(assoc)
    }

    pub fn get(&self, id: AssocId) -> Option<&Association> {
        self.associations.get(&id)
    }

    pub fn get_mut(&mut self, id: AssocId) -> Option<&mut Association> {
        self.associations.get_mut(&id)
    }

    pub fn by_address(&self, address: SocketAddr) -> Option<AssocId> {
        self.by_addr.get(&address).copied()
    }

    /// Finds the association that a packet from `source`, carrying `vtag`, belongs to. Packets
    /// that start a handshake are only matched by address, as their tag says nothing about an
    /// existing association.
    pub fn lookup(&self, source: SocketAddr, vtag: u32, by_address_only: bool) -> Option<AssocId> {
        self.by_address(source)
            .or_else(|| if by_address_only { None } else { self.by_vtag.get(&vtag).copied() })
    }

    /// Identifiers in ascending order, so that timers are processed in a stable order.
    pub fn ids(&self) -> Vec<AssocId> {
        let mut ids: Vec<AssocId> = self.associations.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = &Association> {
        self.associations.values()
    }

    pub fn len(&self) -> usize {
        self.associations.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Options;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn indexes_by_address_and_tag() {
        let options = Options::default();
        let mut registry = Registry::new();
        let assoc = Association::new_outbound(addr("10.0.0.2:5000"), &options);
        let vtag = assoc.my_vtag;
        let id = registry.insert(assoc);

        assert_eq!(id, AssocId(1));
        assert_eq!(registry.lookup(addr("10.0.0.2:5000"), 0, true), Some(id));
        assert_eq!(registry.lookup(addr("10.0.0.9:5000"), vtag, false), Some(id));
        assert_eq!(registry.lookup(addr("10.0.0.9:5000"), vtag, true), None);
        assert_eq!(registry.get(id).map(|a| a.id), Some(id));
    }

    #[test]
    fn reindexing_follows_a_new_incarnation() {
        let options = Options::default();
        let mut registry = Registry::new();
        let id = registry.insert(Association::new_outbound(addr("10.0.0.2:5000"), &options));
        let old_vtag = registry.get(id).map(|a| a.my_vtag).unwrap();

        let new = Association::new_outbound(addr("10.0.0.2:5000"), &options);
        let new_vtag = new.my_vtag;
        registry.get_mut(id).unwrap().replace_incarnation(new);
        registry.reindex(id);

        assert_eq!(registry.lookup(addr("10.0.0.9:5000"), new_vtag, false), Some(id));
        if old_vtag != new_vtag {
            assert_eq!(registry.lookup(addr("10.0.0.9:5000"), old_vtag, false), None);
        }
    }

    #[test]
    fn removal_drops_index_entries() {
        let options = Options::default();
        let mut registry = Registry::new();
        let id = registry.insert(Association::new_outbound(addr("10.0.0.2:5000"), &options));
        let second = registry.insert(Association::new_outbound(addr("10.0.0.3:5000"), &options));
        assert_eq!(second, AssocId(2));

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert_eq!(registry.by_address(addr("10.0.0.2:5000")), None);
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.ids(), vec![second]);
    }
}
