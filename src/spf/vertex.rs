// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Shortest-path vertices and their arena
//!
//! Vertices live in an arena and address each other by stable indices;
//! parent/child relationships are index sets. Deleting a vertex detaches it
//! from those sets and marks its slot free, so a stale tentative entry can be
//! replaced without leaving a dangling reference anywhere in the tree.

use ipnetwork::IpNetwork;

use crate::{LanId, Snpa, SystemId, SystemType};

/// Cap on equal-cost next hops kept per vertex.
pub const MAX_NEXTHOPS: usize = 4;

/// Kind of a shortest-path vertex, in tentative-list tie-break order:
/// at equal distance, network nodes expand before prefixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum VertexType {
    PseudonodeIs = 0,
    IntermediateSystem = 1,
    EndSystem = 2,
    Prefix = 3,
}

impl VertexType {
    /// Whether an LSP lookup and expansion applies to this vertex.
    pub const fn is_intermediate_system(self) -> bool {
        matches!(self, VertexType::PseudonodeIs | VertexType::IntermediateSystem)
    }
}

/// Identity of a vertex: a network node or a reachable prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VertexKey {
    Node(LanId),
    Prefix(IpNetwork),
}

impl std::fmt::Display for VertexKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VertexKey::Node(lan_id) => write!(f, "{lan_id}"),
            VertexKey::Prefix(prefix) => write!(f, "{prefix}"),
        }
    }
}

/// One next-hop adjacency of a vertex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpfNexthop {
    pub system_id: SystemId,
    pub system_type: SystemType,
    pub interface: String,
    pub circuit_id: u8,
    pub snpa: Snpa,
}

/// Index of a vertex within its arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VertexId(usize);

/// A shortest-path working unit. Exists only for the duration of one run.
#[derive(Debug, Clone)]
pub struct Vertex {
    pub vtype: VertexType,
    pub key: VertexKey,
    /// Accumulated distance from the root
    pub distance: u32,
    /// Hops from the root
    pub depth: u32,
    /// Adjacencies reaching this vertex at minimum cost
    pub nexthops: Vec<SpfNexthop>,
    pub parents: Vec<VertexId>,
    pub children: Vec<VertexId>,
}

impl Vertex {
    pub fn new(vtype: VertexType, key: VertexKey, distance: u32, depth: u32) -> Self {
        Self {
            vtype,
            key,
            distance,
            depth,
            nexthops: Vec::new(),
            parents: Vec::new(),
            children: Vec::new(),
        }
    }
}

/// Arena of vertices addressed by stable indices.
#[derive(Debug, Default)]
pub struct VertexArena {
    slots: Vec<Option<Vertex>>,
    free: Vec<usize>,
}

impl VertexArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every vertex but keep the allocations for the next run.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
    }

    pub fn alloc(&mut self, vertex: Vertex) -> VertexId {
        match self.free.pop() {
            Some(idx) => {
                self.slots[idx] = Some(vertex);
                VertexId(idx)
            }
            None => {
                self.slots.push(Some(vertex));
                VertexId(self.slots.len() - 1)
            }
        }
    }

    /// Access a live vertex. A freed or out-of-range id is a programming
    /// defect, not a recoverable condition.
    pub fn vertex(&self, id: VertexId) -> &Vertex {
        self.slots[id.0].as_ref().expect("vertex id refers to a freed slot")
    }

    pub fn vertex_mut(&mut self, id: VertexId) -> &mut Vertex {
        self.slots[id.0].as_mut().expect("vertex id refers to a freed slot")
    }

    pub fn contains(&self, id: VertexId) -> bool {
        self.slots.get(id.0).map(|s| s.is_some()).unwrap_or(false)
    }

    /// Number of live vertices.
    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a parent/child edge between two live vertices.
    pub fn link(&mut self, parent: VertexId, child: VertexId) {
        {
            let p = self.vertex_mut(parent);
            if !p.children.contains(&child) {
                p.children.push(child);
            }
        }
        let c = self.vertex_mut(child);
        if !c.parents.contains(&parent) {
            c.parents.push(parent);
        }
    }

    /// Detach a vertex from every parent and child reference and free its
    /// slot. After this no live vertex refers to the deleted one.
    pub fn detach_and_free(&mut self, id: VertexId) {
        let (parents, children) = {
            let v = self.vertex(id);
            (v.parents.clone(), v.children.clone())
        };
        for parent in parents {
            self.vertex_mut(parent).children.retain(|c| *c != id);
        }
        for child in children {
            self.vertex_mut(child).parents.retain(|p| *p != id);
        }
        self.slots[id.0] = None;
        self.free.push(id.0);
    }
}

/// Preference order for keeping equal-cost next hops when the fan-out cap is
/// exceeded: highest system type first, then lowest system id, then lowest
/// circuit id, then lowest SNPA.
///
/// Ties on every field are possible in degenerate topologies; the stable sort
/// then preserves insertion order, matching the behavior routing state has
/// historically depended on.
pub fn nexthop_keep_order(a: &SpfNexthop, b: &SpfNexthop) -> std::cmp::Ordering {
    b.system_type
        .cmp(&a.system_type)
        .then_with(|| a.system_id.cmp(&b.system_id))
        .then_with(|| a.circuit_id.cmp(&b.circuit_id))
        .then_with(|| a.snpa.cmp(&b.snpa))
}

/// Trim a next-hop set to [`MAX_NEXTHOPS`] using the keep-order comparator.
pub fn trim_nexthops(nexthops: &mut Vec<SpfNexthop>) {
    if nexthops.len() > MAX_NEXTHOPS {
        nexthops.sort_by(nexthop_keep_order);
        nexthops.truncate(MAX_NEXTHOPS);
    }
}
