// SPDX-License-Identifier: Apache-2.0 OR MIT
//! Route table
//!
//! Per-level, per-address-family table of prefixes produced by completed
//! shortest-path runs. Each run replaces the table contents wholesale; the
//! delta is reported so installation into the platform forwarding table (and
//! logging) can be incremental.

use std::collections::HashMap;

use ipnetwork::IpNetwork;

use crate::{Snpa, SystemId};

/// One next hop of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteNexthop {
    /// Adjacent system the packet is handed to
    pub system_id: SystemId,
    /// Circuit the adjacency lives on
    pub interface: String,
    /// Link-layer address of the adjacency
    pub snpa: Snpa,
}

/// A computed route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub prefix: IpNetwork,
    pub metric: u32,
    /// Hops from the computing system in the shortest-path tree
    pub depth: u32,
    pub nexthops: Vec<RouteNexthop>,
}

/// Change summary of one table replacement.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RouteTableDelta {
    pub added: usize,
    pub changed: usize,
    pub removed: usize,
}

impl RouteTableDelta {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.changed == 0 && self.removed == 0
    }
}

/// Route table for one (level, address family).
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: HashMap<IpNetwork, Route>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn get(&self, prefix: &IpNetwork) -> Option<&Route> {
        self.routes.get(prefix)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }

    /// Replace the whole table with the routes of a completed run.
    pub fn replace_all(&mut self, routes: Vec<Route>) -> RouteTableDelta {
        let mut delta = RouteTableDelta::default();
        let mut next: HashMap<IpNetwork, Route> = HashMap::with_capacity(routes.len());

        for route in routes {
            match self.routes.get(&route.prefix) {
                None => delta.added += 1,
                Some(old) if *old != route => delta.changed += 1,
                Some(_) => {}
            }
            next.insert(route.prefix, route);
        }
        delta.removed = self
            .routes
            .keys()
            .filter(|prefix| !next.contains_key(prefix))
            .count();

        self.routes = next;
        delta
    }

    pub fn clear(&mut self) {
        self.routes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route(prefix: &str, metric: u32) -> Route {
        Route {
            prefix: prefix.parse().unwrap(),
            metric,
            depth: 1,
            nexthops: vec![RouteNexthop {
                system_id: SystemId([0, 0, 0, 0, 0, 1]),
                interface: "eth0".to_string(),
                snpa: Snpa([0, 0, 0, 0, 0, 1]),
            }],
        }
    }

    #[test]
    fn test_replace_all_reports_delta() {
        let mut table = RouteTable::new();

        let delta = table.replace_all(vec![route("10.0.0.0/24", 10), route("10.0.1.0/24", 20)]);
        assert_eq!(delta.added, 2);
        assert_eq!(delta.removed, 0);

        // One kept unchanged, one metric change, one dropped, one new
        let delta = table.replace_all(vec![route("10.0.0.0/24", 10), route("10.0.2.0/24", 30)]);
        assert_eq!(delta.added, 1);
        assert_eq!(delta.changed, 0);
        assert_eq!(delta.removed, 1);
        assert_eq!(table.len(), 2);

        let delta = table.replace_all(vec![route("10.0.0.0/24", 99), route("10.0.2.0/24", 30)]);
        assert_eq!(delta.changed, 1);
        assert!(delta.added == 0 && delta.removed == 0);
        assert_eq!(table.get(&"10.0.0.0/24".parse().unwrap()).unwrap().metric, 99);
    }

    #[test]
    fn test_clear() {
        let mut table = RouteTable::new();
        table.replace_all(vec![route("10.0.0.0/24", 10)]);
        table.clear();
        assert!(table.is_empty());
    }

    #[test]
    fn test_ipv6_prefixes_coexist() {
        let mut table = RouteTable::new();
        let delta = table.replace_all(vec![route("2001:db8::/64", 10)]);
        assert_eq!(delta.added, 1);
        assert!(table.get(&"2001:db8::/64".parse().unwrap()).is_some());
    }
}
