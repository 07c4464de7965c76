//! Bookkeeping for the connections that make up the broadcast group.
//!
//! The registry is owned by the reactor thread and mutated only between
//! polls, so it carries no synchronisation. The listening endpoint is never
//! stored here, which keeps it out of every broadcast.

use std::{
    collections::{BTreeMap, btree_map},
    fmt,
};

/// Identifies one accepted connection for the lifetime of the process.
///
/// Ids are handed out in increasing order and never reused, so ordering by id
/// is ordering by registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub usize);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out [`ConnectionId`]s starting at a fixed offset.
#[derive(Debug)]
pub struct IdAllocator {
    next: usize,
}

impl IdAllocator {
    pub fn starting_at(first: usize) -> Self {
        Self { next: first }
    }

    pub fn next_id(&mut self) -> ConnectionId {
        let id = ConnectionId(self.next);
        self.next += 1;
        id
    }
}

#[derive(Debug)]
pub struct Registry<C> {
    members: BTreeMap<ConnectionId, C>,
}

impl<C> Registry<C> {
    pub fn new() -> Self {
        Self {
            members: BTreeMap::new(),
        }
    }

    /// Adds a connection. Registering an id twice replaces the earlier entry,
    /// so membership stays unique.
    pub fn register(&mut self, id: ConnectionId, conn: C) {
        self.members.insert(id, conn);
    }

    /// Removes a connection if present. Removing an absent id is a no-op.
    pub fn deregister(&mut self, id: ConnectionId) -> Option<C> {
        self.members.remove(&id)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.members.contains_key(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&C> {
        self.members.get(&id)
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut C> {
        self.members.get_mut(&id)
    }

    /// Members in registration order.
    pub fn members(&self) -> impl Iterator<Item = (ConnectionId, &C)> {
        self.members.iter().map(|(id, conn)| (*id, conn))
    }

    pub fn members_mut(&mut self) -> impl Iterator<Item = (ConnectionId, &mut C)> {
        self.members.iter_mut().map(|(id, conn)| (*id, conn))
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.members.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Empties the registry, yielding members in registration order.
    pub fn drain(&mut self) -> btree_map::IntoIter<ConnectionId, C> {
        std::mem::take(&mut self.members).into_iter()
    }
}

impl<C> Default for Registry<C> {
    fn default() -> Self {
        Self::new()
    }
}
