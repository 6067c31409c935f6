// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Link-state database
//!
//! Keyed store from LSP identifier to LSP record. The engine reads it during
//! shortest-path computation and updates it when the decoder delivers remote
//! LSPs or when local/pseudonode LSPs are (re)generated. Byte-level encoding
//! and flooding live outside this crate; records here carry parsed payloads
//! only.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use ipnetwork::IpNetwork;

use crate::{AreaAddress, LanId, LspId};

/// Maximum remaining lifetime of an LSP.
pub const MAX_LSP_LIFETIME: Duration = Duration::from_secs(1200);

/// How long a purged LSP header is retained before removal.
pub const ZERO_AGE_LIFETIME: Duration = Duration::from_secs(60);

/// Default interval between refreshes of locally originated LSPs.
pub const DEFAULT_LSP_REFRESH_INTERVAL: Duration = Duration::from_secs(900);

/// Sequence number assigned to the first issue of a local LSP.
pub const INITIAL_SEQUENCE_NUMBER: u32 = 1;

/// One intermediate-system reachability entry of an LSP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IsNeighbor {
    pub neighbor: LanId,
    pub metric: u32,
}

/// One prefix reachability entry of an LSP.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixReach {
    pub prefix: IpNetwork,
    pub metric: u32,
}

/// Parsed payload of an LSP (TLV decoding happens outside this engine).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LspPayload {
    pub area_addresses: Vec<AreaAddress>,
    pub is_neighbors: Vec<IsNeighbor>,
    pub prefixes: Vec<PrefixReach>,
}

impl LspPayload {
    pub fn is_empty(&self) -> bool {
        self.area_addresses.is_empty() && self.is_neighbors.is_empty() && self.prefixes.is_empty()
    }
}

/// A remote LSP as delivered by the external decoder.
#[derive(Debug, Clone)]
pub struct ReceivedLsp {
    pub lsp_id: LspId,
    pub seq_number: u32,
    pub checksum: u16,
    pub remaining_lifetime: Duration,
    pub payload: LspPayload,
}

/// A stored LSP record.
#[derive(Debug, Clone)]
pub struct LspEntry {
    pub lsp_id: LspId,
    pub seq_number: u32,
    pub checksum: u16,
    pub expires_at: Instant,
    pub payload: LspPayload,
    /// Locally originated (subject to periodic refresh)
    pub own: bool,
    /// Purged: header retained for flooding, payload gone
    pub purged: bool,
}

impl LspEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Usable for path computation: neither expired nor purged.
    pub fn is_usable(&self, now: Instant) -> bool {
        !self.purged && !self.is_expired(now)
    }
}

/// Link-state database for one (area, level).
#[derive(Debug, Default)]
pub struct LspDb {
    entries: BTreeMap<LspId, LspEntry>,
}

impl LspDb {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, lsp_id: &LspId) -> Option<&LspEntry> {
        self.entries.get(lsp_id)
    }

    /// Look up an entry usable for path computation.
    pub fn get_usable(&self, lsp_id: &LspId, now: Instant) -> Option<&LspEntry> {
        self.entries.get(lsp_id).filter(|e| e.is_usable(now))
    }

    /// All usable fragments advertised under one LAN id, in fragment order.
    pub fn fragments<'a>(
        &'a self,
        lan_id: LanId,
        now: Instant,
    ) -> impl Iterator<Item = &'a LspEntry> {
        let start = LspId::new(lan_id, 0);
        let end = LspId::new(lan_id, u8::MAX);
        self.entries
            .range(start..=end)
            .map(|(_, e)| e)
            .filter(move |e| e.is_usable(now))
    }

    /// Store a remote LSP. Returns true when the record was accepted
    /// (no stored copy, or the received sequence number is newer).
    pub fn insert_received(&mut self, lsp: ReceivedLsp, now: Instant) -> bool {
        if let Some(existing) = self.entries.get(&lsp.lsp_id) {
            if existing.seq_number >= lsp.seq_number {
                return false;
            }
        }
        let purged = lsp.remaining_lifetime.is_zero() || lsp.payload.is_empty();
        self.entries.insert(
            lsp.lsp_id,
            LspEntry {
                lsp_id: lsp.lsp_id,
                seq_number: lsp.seq_number,
                checksum: lsp.checksum,
                expires_at: now + lsp.remaining_lifetime,
                payload: lsp.payload,
                own: false,
                purged,
            },
        );
        true
    }

    /// Install or refresh a locally originated LSP, bumping the sequence
    /// number past any stored copy. Returns the issued sequence number.
    pub fn install_own(&mut self, lsp_id: LspId, payload: LspPayload, now: Instant) -> u32 {
        let seq = self
            .entries
            .get(&lsp_id)
            .map(|e| e.seq_number + 1)
            .unwrap_or(INITIAL_SEQUENCE_NUMBER);
        self.entries.insert(
            lsp_id,
            LspEntry {
                lsp_id,
                seq_number: seq,
                checksum: 0,
                expires_at: now + MAX_LSP_LIFETIME,
                payload,
                own: true,
                purged: false,
            },
        );
        seq
    }

    /// Purge one LSP: the payload is dropped and the remaining lifetime
    /// zeroed, but the header survives for [`ZERO_AGE_LIFETIME`] so the
    /// purge can propagate. Returns true if the entry existed.
    pub fn purge(&mut self, lsp_id: &LspId, now: Instant) -> bool {
        match self.entries.get_mut(lsp_id) {
            Some(entry) => {
                entry.payload = LspPayload::default();
                entry.purged = true;
                entry.seq_number += 1;
                entry.expires_at = now + ZERO_AGE_LIFETIME;
                true
            }
            None => false,
        }
    }

    /// Purge every fragment advertised under one LAN id. Returns the number
    /// of fragments purged.
    pub fn purge_lan(&mut self, lan_id: LanId, now: Instant) -> usize {
        let ids: Vec<LspId> = self
            .entries
            .range(LspId::new(lan_id, 0)..=LspId::new(lan_id, u8::MAX))
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.purge(id, now);
        }
        ids.len()
    }

    /// Drop entries that have been expired or purged for longer than the
    /// zero-age retention. Returns the number removed.
    pub fn sweep(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, e| now < e.expires_at + ZERO_AGE_LIFETIME);
        before - self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LspEntry> {
        self.entries.values()
    }
}
