// SPDX-License-Identifier: Apache-2.0 OR MIT
//! One shortest-path computation
//!
//! The expansion consumes parsed LSPs only; a missing or expired LSP skips
//! the affected edge with a warning and yields a possibly-partial tree, never
//! an aborted run. A finalized vertex later found with a better path is an
//! invariant violation and panics: masking it would install non-deterministic
//! routes.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::logging::{Facility, Logger};
use crate::lsdb::LspDb;
use crate::protocol::adjacency::{Adjacency, AdjacencyState};
use crate::protocol::circuit::{Circuit, CircuitState};
use crate::rib::{Route, RouteNexthop};
use crate::spf::vertex::{trim_nexthops, SpfNexthop, Vertex, VertexId, VertexKey, VertexType};
use crate::spf::SpfTree;
use crate::{log_critical, log_debug, log_warning};
use crate::{AddressFamily, LanId, Level, MetricStyle, SystemId};

/// Everything one SPF run reads.
pub struct SpfInputs<'a> {
    pub system_id: SystemId,
    pub level: Level,
    pub family: AddressFamily,
    pub metric_style: MetricStyle,
    pub circuits: &'a HashMap<String, Circuit>,
    pub lsdb: &'a LspDb,
}

/// Result of one completed run.
#[derive(Debug)]
pub struct SpfRunResult {
    /// Routes implied by finalized prefix vertices with next hops
    pub routes: Vec<Route>,
    /// Size of the finalized set
    pub finalized_count: usize,
    pub duration: Duration,
}

/// Whether an adjacency can carry traffic for this run.
fn adjacency_usable(adj: &Adjacency, level: Level, family: AddressFamily) -> bool {
    matches!(
        adj.state,
        AdjacencyState::Up | AdjacencyState::Initializing
    ) && adj.usage.has(level)
        && adj.system_type != crate::SystemType::Unknown
        && adj.families.contains(&family)
}

fn nexthop_of(circuit: &Circuit, adj: &Adjacency) -> SpfNexthop {
    SpfNexthop {
        system_id: adj.system_id,
        system_type: adj.system_type,
        interface: circuit.interface.clone(),
        circuit_id: circuit.circuit_id,
        snpa: adj.snpa,
    }
}

impl SpfTree {
    /// Execute one full run. See the module docs for the state sequence.
    pub fn run(&mut self, inputs: &SpfInputs<'_>, now: Instant, logger: &Logger) -> SpfRunResult {
        let started = Instant::now();

        // INIT: vertices are released, the shells stay for reuse
        self.arena.clear();
        self.tent.clear();
        self.tent_index.clear();
        self.paths.clear();

        // Root: the local system at distance zero
        let root_key = VertexKey::Node(LanId::system(inputs.system_id));
        let root = self.arena.alloc(Vertex::new(
            VertexType::IntermediateSystem,
            root_key,
            0,
            0,
        ));
        self.paths.insert(root_key, root);

        self.preload(inputs, root, now, logger);
        self.expand(inputs, now, logger);

        // DONE: finalized prefix vertices with next hops become routes
        let mut routes = Vec::new();
        for vertex in self.paths.values().map(|id| self.arena.vertex(*id)) {
            if vertex.nexthops.is_empty() {
                continue;
            }
            if let VertexKey::Prefix(prefix) = vertex.key {
                routes.push(Route {
                    prefix,
                    metric: vertex.distance,
                    depth: vertex.depth,
                    nexthops: vertex
                        .nexthops
                        .iter()
                        .map(|nh| RouteNexthop {
                            system_id: nh.system_id,
                            interface: nh.interface.clone(),
                            snpa: nh.snpa,
                        })
                        .collect(),
                });
            }
        }
        routes.sort_by_key(|r| r.prefix.to_string());

        self.runcount += 1;
        self.last_run_at = Some(now);
        self.last_run_duration = started.elapsed();
        self.pending = false;

        SpfRunResult {
            routes,
            finalized_count: self.paths.len(),
            duration: self.last_run_duration,
        }
    }

    /// Seed the tentative set from local circuits and adjacencies.
    fn preload(&mut self, inputs: &SpfInputs<'_>, root: VertexId, now: Instant, logger: &Logger) {
        // Deterministic circuit order regardless of map layout
        let mut names: Vec<&String> = inputs.circuits.keys().collect();
        names.sort();

        for name in names {
            let circuit = &inputs.circuits[name.as_str()];
            if circuit.state != CircuitState::Up
                || !circuit.is_enabled(inputs.level)
                || !circuit.has_family(inputs.family)
            {
                continue;
            }
            let Some(iface) = &circuit.iface else {
                continue;
            };
            let metric = circuit.level(inputs.level).metric;

            // Locally reachable prefixes at distance zero
            for prefix in iface
                .prefixes
                .iter()
                .filter(|p| AddressFamily::of(p) == inputs.family)
            {
                self.candidate(
                    VertexKey::Prefix(*prefix),
                    VertexType::Prefix,
                    0,
                    1,
                    Vec::new(),
                    Some(root),
                    logger,
                );
            }

            if circuit.passive || circuit.medium == crate::Medium::Loopback {
                continue;
            }

            match circuit.medium {
                crate::Medium::PointToPoint => {
                    if let Some(adj) = &circuit.p2p_neighbor {
                        if adjacency_usable(adj, inputs.level, inputs.family) {
                            self.candidate(
                                VertexKey::Node(LanId::system(adj.system_id)),
                                VertexType::IntermediateSystem,
                                metric,
                                1,
                                vec![nexthop_of(circuit, adj)],
                                Some(root),
                                logger,
                            );
                        }
                    }
                }
                crate::Medium::Broadcast => {
                    for adj in circuit
                        .level(inputs.level)
                        .adjacencies
                        .iter()
                        .filter(|a| adjacency_usable(a, inputs.level, inputs.family))
                    {
                        self.candidate(
                            VertexKey::Node(LanId::system(adj.system_id)),
                            VertexType::IntermediateSystem,
                            metric,
                            1,
                            vec![nexthop_of(circuit, adj)],
                            Some(root),
                            logger,
                        );
                    }
                    self.preload_segment(inputs, circuit, root, metric, now, logger);
                }
                crate::Medium::Loopback => {}
            }
        }
    }

    /// Resolve the segment's elected DR pseudonode LSP and add its advertised
    /// neighbors. A missing or expired LSP skips the segment with a warning.
    fn preload_segment(
        &mut self,
        inputs: &SpfInputs<'_>,
        circuit: &Circuit,
        root: VertexId,
        metric: u32,
        now: Instant,
        logger: &Logger,
    ) {
        let Some(dis) = circuit.level(inputs.level).dr.dis else {
            return;
        };

        let mut entries: Vec<(LanId, u32)> = Vec::new();
        let mut found = false;
        for fragment in inputs.lsdb.fragments(dis, now) {
            found = true;
            for neighbor in &fragment.payload.is_neighbors {
                entries.push((neighbor.neighbor, neighbor.metric));
            }
        }
        if !found {
            log_warning!(
                logger,
                Facility::Spf,
                &format!(
                    "{} {}: pseudonode LSP for DIS {dis} missing or expired, segment skipped",
                    circuit.interface, inputs.level
                )
            );
            return;
        }

        for (neighbor, entry_metric) in entries {
            if neighbor.system_id == inputs.system_id {
                continue;
            }
            // The segment neighbor is reachable through its adjacency here
            let Some(adj) = circuit
                .level(inputs.level)
                .adjacencies
                .iter()
                .find(|a| {
                    a.system_id == neighbor.system_id
                        && adjacency_usable(a, inputs.level, inputs.family)
                })
            else {
                continue;
            };
            let vtype = if neighbor.is_pseudonode() {
                VertexType::PseudonodeIs
            } else {
                VertexType::IntermediateSystem
            };
            self.candidate(
                VertexKey::Node(neighbor),
                vtype,
                metric.saturating_add(entry_metric),
                1,
                vec![nexthop_of(circuit, adj)],
                Some(root),
                logger,
            );
        }
    }

    /// Pop tentative vertices in (distance, type) order and expand their LSPs
    /// until the tentative set is drained.
    fn expand(&mut self, inputs: &SpfInputs<'_>, now: Instant, logger: &Logger) {
        let mut last_distance = 0u32;

        while !self.tent.is_empty() {
            let vid = self.tent.remove(0);
            let (key, vtype, distance, depth, nexthops) = {
                let v = self.arena.vertex(vid);
                (v.key, v.vtype, v.distance, v.depth, v.nexthops.clone())
            };
            self.tent_index.remove(&key);

            // Distances leave the tentative set in non-decreasing order;
            // anything else is a defect in the candidate bookkeeping
            if distance < last_distance {
                log_critical!(
                    logger,
                    Facility::Spf,
                    &format!("tentative order violated at {key}: {distance} < {last_distance}")
                );
                panic!("spf: tentative set distance order violated");
            }
            last_distance = distance;

            self.paths.insert(key, vid);

            if !vtype.is_intermediate_system() {
                continue;
            }
            let VertexKey::Node(lan_id) = key else {
                continue;
            };

            let mut entries: Vec<(LanId, u32)> = Vec::new();
            let mut prefixes: Vec<(ipnetwork::IpNetwork, u32)> = Vec::new();
            let mut found = false;
            for fragment in inputs.lsdb.fragments(lan_id, now) {
                found = true;
                for neighbor in &fragment.payload.is_neighbors {
                    entries.push((neighbor.neighbor, neighbor.metric));
                }
                for reach in &fragment.payload.prefixes {
                    if AddressFamily::of(&reach.prefix) == inputs.family {
                        prefixes.push((reach.prefix, reach.metric));
                    }
                }
            }
            if !found {
                // Recoverable: the tree is partial, not abandoned
                log_warning!(
                    logger,
                    Facility::Spf,
                    &format!("no usable LSP for {key}, expansion skipped")
                );
                continue;
            }

            for (neighbor, metric) in entries {
                let candidate_distance = distance.saturating_add(metric);
                if candidate_distance > inputs.metric_style.max_path_metric() {
                    log_debug!(
                        logger,
                        Facility::Spf,
                        &format!("{neighbor}: distance {candidate_distance} beyond metric range")
                    );
                    continue;
                }
                let vt = if neighbor.is_pseudonode() {
                    VertexType::PseudonodeIs
                } else {
                    VertexType::IntermediateSystem
                };
                self.candidate(
                    VertexKey::Node(neighbor),
                    vt,
                    candidate_distance,
                    depth + 1,
                    nexthops.clone(),
                    Some(vid),
                    logger,
                );
            }
            for (prefix, metric) in prefixes {
                let candidate_distance = distance.saturating_add(metric);
                if candidate_distance > inputs.metric_style.max_path_metric() {
                    continue;
                }
                self.candidate(
                    VertexKey::Prefix(prefix),
                    VertexType::Prefix,
                    candidate_distance,
                    depth + 1,
                    nexthops.clone(),
                    Some(vid),
                    logger,
                );
            }
        }
    }

    /// Evaluate one candidate vertex against the finalized and tentative sets.
    #[allow(clippy::too_many_arguments)]
    fn candidate(
        &mut self,
        key: VertexKey,
        vtype: VertexType,
        distance: u32,
        depth: u32,
        nexthops: Vec<SpfNexthop>,
        parent: Option<VertexId>,
        logger: &Logger,
    ) {
        if let Some(&fid) = self.paths.get(&key) {
            let finalized = self.arena.vertex(fid);
            if finalized.distance <= distance {
                // Equal-or-better path already finalized
                return;
            }
            // A better path to a finalized identity means the tentative set
            // was mismanaged earlier in this run
            log_critical!(
                logger,
                Facility::Spf,
                &format!(
                    "finalized {key} at {} revisited with better distance {distance}",
                    finalized.distance
                )
            );
            panic!("spf: finalized vertex revisited with a better path");
        }

        match self.tent_index.get(&key).copied() {
            Some(tid) => {
                let existing = self.arena.vertex(tid).distance;
                if existing == distance {
                    // Merge: additional equal-cost parent and next hops
                    if let Some(p) = parent {
                        self.arena.link(p, tid);
                    }
                    let v = self.arena.vertex_mut(tid);
                    for nh in nexthops {
                        if !v.nexthops.contains(&nh) {
                            v.nexthops.push(nh);
                        }
                    }
                    trim_nexthops(&mut v.nexthops);
                } else if existing < distance {
                    // Existing tentative path is better
                } else {
                    // Replace the stale vertex; no dangling references allowed
                    self.tent.retain(|&t| t != tid);
                    self.tent_index.remove(&key);
                    self.arena.detach_and_free(tid);
                    self.insert_tent(key, vtype, distance, depth, nexthops, parent);
                }
            }
            None => self.insert_tent(key, vtype, distance, depth, nexthops, parent),
        }
    }

    fn insert_tent(
        &mut self,
        key: VertexKey,
        vtype: VertexType,
        distance: u32,
        depth: u32,
        mut nexthops: Vec<SpfNexthop>,
        parent: Option<VertexId>,
    ) {
        trim_nexthops(&mut nexthops);
        let mut vertex = Vertex::new(vtype, key, distance, depth);
        vertex.nexthops = nexthops;
        let id = self.arena.alloc(vertex);
        if let Some(p) = parent {
            self.arena.link(p, id);
        }
        let pos = self.tent.partition_point(|&tid| {
            let t = self.arena.vertex(tid);
            (t.distance, t.vtype) <= (distance, vtype)
        });
        self.tent.insert(pos, id);
        self.tent_index.insert(key, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsdb::{IsNeighbor, LspPayload, PrefixReach, ReceivedLsp};
    use crate::protocol::adjacency::tests::{test_logger, up_p2p_circuit};
    use crate::protocol::{InterfaceInfo, P2pHello};
    use crate::{LspId, SystemId};

    const ROOT: SystemId = SystemId([0, 0, 0, 0, 0, 1]);

    fn sysid(last: u8) -> SystemId {
        SystemId([0, 0, 0, 0, 0, last])
    }

    /// An UP point-to-point circuit toward `neighbor` with the given metric.
    fn p2p_circuit_to(name: &str, neighbor: SystemId, metric: u32) -> Circuit {
        let logger = test_logger();
        let mut circuit = up_p2p_circuit();
        circuit.interface = name.to_string();
        circuit.iface = Some(InterfaceInfo {
            ifindex: 1,
            mtu: 1500,
            snpa: None,
            prefixes: Vec::new(),
        });
        for lvl in crate::Level::all() {
            circuit.level_mut(lvl).metric = metric;
        }
        let hello = P2pHello {
            source_id: neighbor,
            circuit_type: crate::LevelUsage::Level1And2,
            holding_time: Duration::from_secs(30),
            area_addresses: vec!["49.0001".parse().unwrap()],
            ipv4_addresses: Vec::new(),
            ipv6_addresses: Vec::new(),
            families: vec![AddressFamily::Ipv4],
        };
        let now = Instant::now();
        crate::protocol::adjacency::process_p2p_hello(&mut circuit, &hello, now, &logger);
        crate::protocol::adjacency::process_p2p_hello(&mut circuit, &hello, now, &logger);
        assert_eq!(
            circuit.p2p_neighbor.as_ref().unwrap().state,
            AdjacencyState::Up
        );
        circuit
    }

    fn lsp(
        db: &mut LspDb,
        system: SystemId,
        neighbors: &[(SystemId, u32)],
        prefixes: &[(&str, u32)],
        now: Instant,
    ) {
        db.insert_received(
            ReceivedLsp {
                lsp_id: LspId::base(LanId::system(system)),
                seq_number: 1,
                checksum: 0,
                remaining_lifetime: Duration::from_secs(1200),
                payload: LspPayload {
                    area_addresses: vec!["49.0001".parse().unwrap()],
                    is_neighbors: neighbors
                        .iter()
                        .map(|(id, metric)| IsNeighbor {
                            neighbor: LanId::system(*id),
                            metric: *metric,
                        })
                        .collect(),
                    prefixes: prefixes
                        .iter()
                        .map(|(p, metric)| PrefixReach {
                            prefix: p.parse().unwrap(),
                            metric: *metric,
                        })
                        .collect(),
                },
            },
            now,
        );
    }

    fn inputs<'a>(
        circuits: &'a HashMap<String, Circuit>,
        lsdb: &'a LspDb,
    ) -> SpfInputs<'a> {
        SpfInputs {
            system_id: ROOT,
            level: Level::L2,
            family: AddressFamily::Ipv4,
            metric_style: MetricStyle::Wide,
            circuits,
            lsdb,
        }
    }

    /// Root with three direct neighbors at cost 10; neighbor B relays to a
    /// fourth node at cost 10 more.
    fn relay_topology(now: Instant) -> (HashMap<String, Circuit>, LspDb) {
        let mut circuits = HashMap::new();
        circuits.insert("ser0".to_string(), p2p_circuit_to("ser0", sysid(0xa), 10));
        circuits.insert("ser1".to_string(), p2p_circuit_to("ser1", sysid(0xb), 10));
        circuits.insert("ser2".to_string(), p2p_circuit_to("ser2", sysid(0xc), 10));

        let mut db = LspDb::new();
        lsp(&mut db, sysid(0xa), &[(ROOT, 10)], &[], now);
        lsp(
            &mut db,
            sysid(0xb),
            &[(ROOT, 10), (sysid(0xd), 10)],
            &[],
            now,
        );
        lsp(&mut db, sysid(0xc), &[(ROOT, 10)], &[], now);
        lsp(
            &mut db,
            sysid(0xd),
            &[(sysid(0xb), 10)],
            &[("10.4.0.0/24", 1)],
            now,
        );
        (circuits, db)
    }

    #[test]
    fn test_relay_topology_distances_and_parent() {
        let logger = test_logger();
        let now = Instant::now();
        let (circuits, db) = relay_topology(now);
        let mut tree = SpfTree::new();

        let result = tree.run(&inputs(&circuits, &db), now, &logger);

        let dist = |id: SystemId| {
            tree.finalized(&VertexKey::Node(LanId::system(id)))
                .map(|v| v.distance)
        };
        assert_eq!(dist(ROOT), Some(0));
        assert_eq!(dist(sysid(0xa)), Some(10));
        assert_eq!(dist(sysid(0xb)), Some(10));
        assert_eq!(dist(sysid(0xc)), Some(10));
        assert_eq!(dist(sysid(0xd)), Some(20));

        // The relayed node's sole parent is the relaying neighbor
        let parents = tree.parents_of(&VertexKey::Node(LanId::system(sysid(0xd))));
        assert_eq!(parents, vec![VertexKey::Node(LanId::system(sysid(0xb)))]);

        // The relayed node's prefix became a route through B
        let route = result
            .routes
            .iter()
            .find(|r| r.prefix == "10.4.0.0/24".parse().unwrap())
            .expect("prefix route installed");
        assert_eq!(route.metric, 21);
        assert_eq!(route.nexthops.len(), 1);
        assert_eq!(route.nexthops[0].system_id, sysid(0xb));
    }

    #[test]
    fn test_runs_are_deterministic() {
        let logger = test_logger();
        let now = Instant::now();
        let (circuits, db) = relay_topology(now);
        let mut tree = SpfTree::new();

        let first = tree.run(&inputs(&circuits, &db), now, &logger);
        let first_distances: HashMap<String, u32> = tree
            .finalized_iter()
            .map(|v| (v.key.to_string(), v.distance))
            .collect();

        let second = tree.run(&inputs(&circuits, &db), now, &logger);
        let second_distances: HashMap<String, u32> = tree
            .finalized_iter()
            .map(|v| (v.key.to_string(), v.distance))
            .collect();

        assert_eq!(first_distances, second_distances);
        assert_eq!(first.routes, second.routes);
        assert_eq!(tree.runcount, 2);
    }

    #[test]
    fn test_missing_lsp_yields_partial_tree() {
        let logger = test_logger();
        let now = Instant::now();
        let mut circuits = HashMap::new();
        circuits.insert("ser0".to_string(), p2p_circuit_to("ser0", sysid(0xa), 10));
        // No LSP for the neighbor at all
        let db = LspDb::new();
        let mut tree = SpfTree::new();

        let result = tree.run(&inputs(&circuits, &db), now, &logger);

        // The neighbor is finalized from the adjacency; its subtree is not
        assert_eq!(
            tree.finalized(&VertexKey::Node(LanId::system(sysid(0xa))))
                .map(|v| v.distance),
            Some(10)
        );
        assert_eq!(result.finalized_count, 2);
        assert!(result.routes.is_empty());
    }

    #[test]
    fn test_metric_range_discards_candidate() {
        let logger = test_logger();
        let now = Instant::now();
        let mut circuits = HashMap::new();
        circuits.insert("ser0".to_string(), p2p_circuit_to("ser0", sysid(0xa), 10));

        let mut db = LspDb::new();
        // Beyond the narrow path ceiling of 1023
        lsp(&mut db, sysid(0xa), &[(ROOT, 10), (sysid(0xd), 1020)], &[], now);

        let mut spf_inputs = inputs(&circuits, &db);
        spf_inputs.metric_style = MetricStyle::Narrow;
        let mut tree = SpfTree::new();
        tree.run(&spf_inputs, now, &logger);

        assert!(tree
            .finalized(&VertexKey::Node(LanId::system(sysid(0xd))))
            .is_none());
    }

    #[test]
    fn test_no_finalized_vertex_exceeds_metric_ceiling() {
        let logger = test_logger();
        let now = Instant::now();
        let mut circuits = HashMap::new();
        circuits.insert("ser0".to_string(), p2p_circuit_to("ser0", sysid(0xa), 10));

        let mut db = LspDb::new();
        let mut chain: Vec<(SystemId, u32)> = vec![(ROOT, 10)];
        chain.push((sysid(0x20), 500));
        lsp(&mut db, sysid(0xa), &chain, &[], now);
        lsp(&mut db, sysid(0x20), &[(sysid(0xa), 500), (sysid(0x21), 600)], &[], now);

        let mut spf_inputs = inputs(&circuits, &db);
        spf_inputs.metric_style = MetricStyle::Narrow;
        let mut tree = SpfTree::new();
        tree.run(&spf_inputs, now, &logger);

        let ceiling = MetricStyle::Narrow.max_path_metric();
        assert!(tree.finalized_iter().all(|v| v.distance <= ceiling));
        // 10 + 500 + 600 = 1110 > 1023: the tail node is unreachable
        assert!(tree
            .finalized(&VertexKey::Node(LanId::system(sysid(0x21))))
            .is_none());
    }

    #[test]
    fn test_equal_cost_paths_merge_nexthops() {
        let logger = test_logger();
        let now = Instant::now();
        let mut circuits = HashMap::new();
        // Two equal-cost circuits toward different neighbors, both of which
        // relay to the same destination
        circuits.insert("ser0".to_string(), p2p_circuit_to("ser0", sysid(0xa), 10));
        circuits.insert("ser1".to_string(), p2p_circuit_to("ser1", sysid(0xb), 10));

        let mut db = LspDb::new();
        lsp(&mut db, sysid(0xa), &[(ROOT, 10), (sysid(0xd), 10)], &[], now);
        lsp(&mut db, sysid(0xb), &[(ROOT, 10), (sysid(0xd), 10)], &[], now);
        lsp(&mut db, sysid(0xd), &[], &[("10.9.0.0/24", 0)], now);

        let mut tree = SpfTree::new();
        let result = tree.run(&inputs(&circuits, &db), now, &logger);

        let d = tree
            .finalized(&VertexKey::Node(LanId::system(sysid(0xd))))
            .unwrap();
        assert_eq!(d.distance, 20);
        assert_eq!(d.nexthops.len(), 2, "equal-cost next hops merged");

        let route = result
            .routes
            .iter()
            .find(|r| r.prefix == "10.9.0.0/24".parse().unwrap())
            .unwrap();
        assert_eq!(route.nexthops.len(), 2);
    }

    #[test]
    fn test_local_prefixes_finalize_without_routes() {
        let logger = test_logger();
        let now = Instant::now();
        let mut circuit = p2p_circuit_to("ser0", sysid(0xa), 10);
        circuit.iface.as_mut().unwrap().prefixes = vec!["10.0.1.0/30".parse().unwrap()];
        let mut circuits = HashMap::new();
        circuits.insert("ser0".to_string(), circuit);
        let db = LspDb::new();

        let mut tree = SpfTree::new();
        let result = tree.run(&inputs(&circuits, &db), now, &logger);

        // Finalized at distance zero, but no next hops: no route installed
        let v = tree
            .finalized(&VertexKey::Prefix("10.0.1.0/30".parse().unwrap()))
            .expect("local prefix finalized");
        assert_eq!(v.distance, 0);
        assert!(result.routes.is_empty());
    }
}
