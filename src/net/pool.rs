//! Idle connection pool keyed by peer.
//!
//! # Responsibilities
//! - Hand out an idle connection for a peer while it is fresh and open
//! - Take connections back after a clean exchange, discard them otherwise
//! - Evict connections idle past the threshold on every loop tick
//!
//! # Design Decisions
//! - Owned by the event loop; only `acquire`, `release` and eviction touch it
//! - No global connection ceiling: a miss always permits a new connection
//! - One threshold governs both reuse eligibility and eviction
//! - Time is passed in, never read inside, so callers and tests control it

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::net::connection::Connection;
use crate::net::peer::Peer;
use crate::observability::metrics;

/// What the pool needs to know about a pooled transport.
pub trait Pooled {
    fn peer(&self) -> &Peer;

    /// The transport is still usable for another exchange.
    fn is_open(&self) -> bool;
}

/// How the exchange on a released connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Response fully read with no framing error and no abrupt close.
    Clean,
    /// Anything else; the stream state cannot be trusted.
    Dirty,
}

/// Result of asking the pool for a connection.
#[derive(Debug)]
pub enum Acquire<C> {
    Reused(C),
    /// No fresh idle connection; the caller must establish one.
    Establish,
}

#[derive(Debug)]
struct IdleEntry<C> {
    conn: C,
    since: Instant,
}

/// Reusable connections waiting for their next request.
#[derive(Debug)]
pub struct ConnectionPool<C = Connection> {
    idle: HashMap<Peer, Vec<IdleEntry<C>>>,
    idle_timeout: Duration,
}

impl<C: Pooled> ConnectionPool<C> {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle: HashMap::new(),
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Take the most recently idled fresh connection for `peer`.
    ///
    /// Stale or closed entries met on the way are dropped.
    pub fn acquire(&mut self, peer: &Peer, now: Instant) -> Acquire<C> {
        let mut found = None;
        let mut discarded = 0usize;

        if let Some(entries) = self.idle.get_mut(peer) {
            while let Some(entry) = entries.pop() {
                let idle_for = now.saturating_duration_since(entry.since);
                if idle_for < self.idle_timeout && entry.conn.is_open() {
                    found = Some(entry.conn);
                    break;
                }
                discarded += 1;
            }
            if entries.is_empty() {
                self.idle.remove(peer);
            }
        }

        if discarded > 0 {
            tracing::trace!(%peer, discarded, "Dropped stale idle connections");
            metrics::record_pool_evictions(discarded);
        }
        metrics::record_idle_connections(self.idle_count());

        match found {
            Some(conn) => {
                tracing::debug!(%peer, "Reusing idle connection");
                metrics::record_pool_reuse();
                Acquire::Reused(conn)
            }
            None => Acquire::Establish,
        }
    }

    /// Return a connection after an exchange. Returns `true` if it was kept.
    pub fn release(&mut self, conn: C, outcome: ReleaseOutcome, now: Instant) -> bool {
        if outcome == ReleaseOutcome::Dirty || !conn.is_open() {
            tracing::trace!(peer = %conn.peer(), ?outcome, "Discarding connection");
            return false;
        }

        let peer = conn.peer().clone();
        self.idle.entry(peer).or_default().push(IdleEntry { conn, since: now });
        metrics::record_idle_connections(self.idle_count());
        true
    }

    /// Close every connection idle for at least the threshold.
    pub fn evict_idle(&mut self, now: Instant) -> usize {
        let timeout = self.idle_timeout;
        let mut evicted = 0;

        self.idle.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|e| now.saturating_duration_since(e.since) < timeout && e.conn.is_open());
            evicted += before - entries.len();
            !entries.is_empty()
        });

        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.idle_count(), "Evicted idle connections");
            metrics::record_pool_evictions(evicted);
            metrics::record_idle_connections(self.idle_count());
        }
        evicted
    }

    /// Close every idle connection whose peer matches `predicate`.
    pub fn discard_where<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&Peer) -> bool,
    {
        let mut discarded = 0;
        self.idle.retain(|peer, entries| {
            if predicate(peer) {
                discarded += entries.len();
                false
            } else {
                true
            }
        });
        metrics::record_idle_connections(self.idle_count());
        discarded
    }

    /// Close every idle connection.
    pub fn clear(&mut self) -> usize {
        self.discard_where(|_| true)
    }

    pub fn idle_count(&self) -> usize {
        self.idle.values().map(Vec::len).sum()
    }

    pub fn idle_count_for(&self, peer: &Peer) -> usize {
        self.idle.get(peer).map_or(0, Vec::len)
    }
}
