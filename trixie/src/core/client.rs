//! The client registry: connected client endpoints and the surfaces they
//! own.
//!
//! A [`Client`] is one connected endpoint. It exclusively owns its
//! surfaces: when a client is removed, every surface it owns is unmapped
//! from all outputs and destroyed before the client entry is erased. That
//! cascade is sequenced by the session controller (see
//! [`Session::remove_client`](crate::session::Session::remove_client));
//! the registry itself only tracks membership and liveness.

use std::fmt;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use tracing::debug;

use crate::{Result, TrixieError};

/// A unique identifier for a connected [`Client`].
///
/// Ids are minted by the [`ClientRegistry`] and never reused within a
/// session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub(crate) u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connected client endpoint.
#[derive(Debug, Clone, Copy)]
pub struct Client {
    id: ClientId,
    admitted_at: Instant,
    last_active: Instant,
}

impl Client {
    /// The client's id.
    #[inline(always)]
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// When the client was admitted.
    #[inline(always)]
    pub fn admitted_at(&self) -> Instant {
        self.admitted_at
    }

    /// The last time a request from this client was dispatched.
    #[inline(always)]
    pub fn last_active(&self) -> Instant {
        self.last_active
    }
}

/// Tracks connected client endpoints.
///
/// Admission is bounded by a configured maximum; past it, `admit` refuses
/// with `ResourceExhausted`. Iteration order is admission order.
#[derive(Debug)]
pub struct ClientRegistry {
    clients: IndexMap<ClientId, Client>,
    next_id: u64,
    max_clients: usize,
}

impl ClientRegistry {
    /// Creates a registry that will admit at most `max_clients` clients
    /// at a time.
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: IndexMap::new(),
            next_id: 0,
            max_clients,
        }
    }

    /// The number of currently connected clients.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Tests whether no clients are connected.
    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Admits a new client connection.
    ///
    /// Fails with `ResourceExhausted` if the configured maximum client
    /// count has been reached.
    pub fn admit(&mut self, now: Instant) -> Result<ClientId> {
        if self.clients.len() >= self.max_clients {
            return Err(TrixieError::ResourceExhausted("client limit reached"));
        }

        let id = ClientId(self.next_id);
        self.next_id += 1;

        self.clients.insert(
            id,
            Client {
                id,
                admitted_at: now,
                last_active: now,
            },
        );
        debug!("admitted client {}", id);
        Ok(id)
    }

    /// Tests whether the given client is connected.
    pub fn contains(&self, id: ClientId) -> bool {
        self.clients.contains_key(&id)
    }

    /// Returns a reference to the given client, if connected.
    pub fn get(&self, id: ClientId) -> Option<&Client> {
        self.clients.get(&id)
    }

    /// Returns a reference to the given client, or `UnknownClient`.
    pub fn client(&self, id: ClientId) -> Result<&Client> {
        self.clients.get(&id).ok_or(TrixieError::UnknownClient(id))
    }

    /// Records request activity from a client, resetting its
    /// unresponsiveness deadline.
    pub fn mark_active(&mut self, id: ClientId, now: Instant) -> Result<()> {
        let client = self
            .clients
            .get_mut(&id)
            .ok_or(TrixieError::UnknownClient(id))?;
        client.last_active = now;
        Ok(())
    }

    /// Clients that have not issued a request within `timeout`.
    ///
    /// These are candidates for forced disconnection; the sweep itself is
    /// driven by the session controller's tick.
    pub fn idle_since(&self, timeout: Duration, now: Instant) -> Vec<ClientId> {
        self.clients
            .values()
            .filter(|c| now.duration_since(c.last_active) >= timeout)
            .map(|c| c.id)
            .collect()
    }

    /// Erases a client entry.
    ///
    /// This is the *last* step of client removal: the caller must already
    /// have cleared focus references and destroyed the client's surfaces.
    pub fn remove(&mut self, id: ClientId) -> Option<Client> {
        let client = self.clients.shift_remove(&id);
        if client.is_some() {
            debug!("removed client {}", id);
        }
        client
    }

    /// Iterates over connected clients in admission order.
    pub fn iter(&self) -> impl Iterator<Item = &Client> {
        self.clients.values()
    }
}
