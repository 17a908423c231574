use crate::error::{firewall, Result};
use crate::grid::{node_residue, ArcId, NodeId};
use crate::node::{group, BOUNDARY_LEVEL};
use crate::topology::Topology;
use super::network::Network;



/// Rims shorter than this are not worth collapsing.
const MIN_BOUNDARY_SIZE: usize = 100;



impl Network<'_> {
    /// Isolate the region holding `source` and, if it is ringed by masked pixels,
    /// collapse the ring into the boundary node. Returns the node to grow the tree
    /// from, updating `nconnected` when the region shrinks.
    pub(super) fn init_boundary(&mut self, source: NodeId, nconnected: &mut usize) -> Result<NodeId> {
        self.reset_boundary_node();

        let ground = self.grid.ground();
        let nregion = self.scan_region(source, group::MASKED);

        if source == ground {
            return Ok(source);
        }

        if let Some((r, c)) = self.grid.node_rc(source) {
            if !self.mask.is_edge_node(r, c) {
                log::warn!("Source node ({}, {}) of a masked region is not on its edge", r, c);
            }
        }

        // Nodes joined by arcs with exactly one masked side
        let mut rim = vec![source];
        let mut i = 0;

        self.nodes[source].group = group::BOUNDARY_CANDIDATE;

        while i < rim.len() {
            let from = rim[i];

            for k in 0..self.topo.degree(from) {
                let Some(nb) = self.raw_neighbor(from, k) else { continue };

                if self.mask.is_edge_arc(nb.arc) && self.nodes[nb.node].group != group::BOUNDARY_CANDIDATE {
                    self.nodes[nb.node].group = group::BOUNDARY_CANDIDATE;
                    rim.push(nb.node);
                }
            }

            i += 1;
        }

        // A rim node may join only if it has an interior arc and no neighbour of
        // its unmasked neighbours has joined yet, so no node loses two paths
        let mut boundary = Vec::new();

        for &node in &rim {
            if node == ground {
                continue;
            }

            let mut eligible = true;
            let mut ninterior = 0;

            for k in 0..self.topo.degree(node) {
                let Some(nb) = self.raw_neighbor(node, k) else { continue };
                let from = nb.node;
                let n = self.nodes[from];
                let interior = self.mask.is_interior_arc(nb.arc)
                    && n.group != group::MASKED
                    && n.level != BOUNDARY_LEVEL;

                if interior {
                    ninterior += 1;
                }

                if interior || (n.group == group::BOUNDARY_CANDIDATE && n.level != BOUNDARY_LEVEL) {
                    eligible = (0..self.topo.degree(from))
                        .filter_map(|j| self.raw_neighbor(from, j))
                        .all(|nb2| self.nodes[nb2.node].level != BOUNDARY_LEVEL);
                }

                if !eligible {
                    break;
                }
            }

            if eligible && ninterior > 0 {
                self.nodes[node].level = BOUNDARY_LEVEL;
                boundary.push(node);
            }
        }

        for &node in &rim {
            self.nodes[node].group = group::UNTOUCHED;
        }

        if boundary.len() < MIN_BOUNDARY_SIZE {
            for &node in &boundary {
                self.nodes[node].level = 0;
                self.nodes[node].group = group::UNTOUCHED;
            }

            return Ok(source);
        }

        for &node in &boundary {
            for k in 0..self.topo.degree(node) {
                let Some(nb) = self.raw_neighbor(node, k) else { continue };
                let n = self.nodes[nb.node];

                if n.group != group::MASKED && n.level != BOUNDARY_LEVEL {
                    self.boundary.neighbors.push(nb);
                }
            }
        }

        for &node in &boundary {
            self.nodes[node].group = group::BOUNDARY_PTR;
            self.nodes[node].level = 0;
        }

        self.boundary.list = boundary;

        let b = self.grid.boundary();
        let nchecked = self.check_boundary(b)?;
        let expected = nregion+self.boundary.list.len()-1;

        if nchecked != expected {
            log::debug!("Boundary collapse changed the region from {} to {} nodes", expected, nchecked);
        }

        *nconnected = nchecked;

        Ok(b)
    }

    /// Flood the collapsed region from the boundary node and verify the boundary
    /// node is reached exactly once over exactly its own arcs.
    fn check_boundary(&mut self, start: NodeId) -> Result<usize> {
        if self.nodes[start].group == group::MASKED {
            return Err(firewall("Boundary node is masked"));
        }

        let b = self.grid.boundary();
        let mut region = vec![start];
        let mut i = 0;

        self.nodes[start].group = group::IN_BUCKET;

        while i < region.len() {
            let node1 = region[i];

            for k in 0..self.degree(node1) {
                let Some(nb) = self.neighbor(node1, k) else { continue };
                let g = self.nodes[nb.node].group;

                if g != group::MASKED && g != group::ON_TREE && g != group::IN_BUCKET {
                    self.nodes[nb.node].group = group::IN_BUCKET;
                    region.push(nb.node);
                }
            }

            self.nodes[node1].group = group::ON_TREE;
            i += 1;
        }

        let mut nboundaryarc = 0;
        let mut nboundarynode = 0;

        for &node1 in &region {
            if node1 == b {
                nboundarynode += 1;
            }

            nboundaryarc += (0..self.degree(node1))
                .filter_map(|k| self.neighbor(node1, k))
                .filter(|nb| nb.node == b)
                .count();

            if self.nodes[node1].group == group::ON_TREE {
                self.nodes[node1].group = group::UNTOUCHED;
            }
        }

        if nboundaryarc != self.boundary.neighbors.len() {
            return Err(firewall(format!(
                "Boundary node has {} arcs but {} arcs point to it",
                self.boundary.neighbors.len(), nboundaryarc
            )));
        }

        if nboundarynode != 1 {
            return Err(firewall(format!("Found {} boundary nodes in one region", nboundarynode)));
        }

        Ok(region.len())
    }

    /// Walk the arcs along the masked rim and push each rim node's imbalance on to
    /// the next one, so the solution stays consistent once the rim is expanded.
    /// Returns the number of rim nodes visited.
    pub(super) fn discharge_boundary(&mut self) -> Result<usize> {
        if self.boundary.list.is_empty() || self.boundary.neighbors.is_empty() {
            return Ok(0);
        }

        let start = self.boundary.list[0];

        match self.grid.node_rc(start) {
            Some((r, c)) if self.mask.is_edge_node(r, c) => {},
            rc => return Err(firewall(format!("Rim discharge starts off the rim at {:?}", rc)))
        }

        // 0 unused, -1 descended, -2 done; visited nodes get outcost -1
        let mut marks = vec![0i8; self.grid.n_arcs()];
        let mut nedgenode = 1;
        let mut from = start;

        loop {
            self.nodes[from].outcost = -1;

            let mut next = None;

            for k in 0..self.topo.degree(from) {
                let Some(nb) = self.raw_neighbor(from, k) else { continue };
                let mark = marks[nb.arc.0];

                if self.mask.is_edge_arc(nb.arc)
                    && (mark == -1 || (mark == 0 && self.nodes[nb.node].outcost != -1))
                {
                    next = Some(nb);

                    if mark == 0 {
                        break;
                    }
                }
            }

            let Some(nb) = next else { break };

            marks[nb.arc.0] -= 1;

            if marks[nb.arc.0] == -2 {
                if let Some((r, c)) = self.grid.node_rc(from) {
                    let excess = node_residue(self.wrapped, r, c)-self.flows.net_outflow(r, c);
                    self.flows.add(nb.arc, nb.dir*excess);
                }

                nedgenode += 1;
            }

            from = nb.node;
        }

        for (arc, _) in marks.iter().enumerate().filter(|(_, &m)| m != 0) {
            let (tail, head) = self.grid.arc_nodes(ArcId(arc));

            for node in [tail, head] {
                if node != self.grid.ground() {
                    self.nodes[node].outcost = 0;
                }
            }
        }

        Ok(nedgenode)
    }

    /// Release the rim nodes and the region's temporary masks.
    pub(super) fn clean_up_boundary(&mut self, source: NodeId) {
        let start = if source == self.grid.boundary() {
            self.boundary.neighbors.first().map(|nb| nb.node)
        } else {
            Some(source)
        };

        if let Some(start) = start {
            self.scan_region(start, group::UNTOUCHED);
        }

        self.reset_boundary_node();
    }
}



#[cfg(test)]
mod tests {
    use ndarray::prelude::*;
    use crate::config::Params;
    use crate::cost::{CostTag, Costs};
    use crate::grid::Flows;
    use super::*;

    /// Unmasked square inside a masked frame, so ground is masked.
    fn island(n: usize, margin: usize) -> Array2<f32> {
        Array2::from_shape_fn((n, n), |(r, c)| {
            let inside = |v: usize| v >= margin && v < n-margin;
            if inside(r) && inside(c) { 1. } else { 0. }
        })
    }

    #[test]
    fn large_rim_collapses_into_boundary_node() {
        let mag = island(48, 4);
        let wrapped = Array2::<f32>::zeros(mag.dim());
        let params = Params::lp(1.);
        let costs = Costs::derive(CostTag::L1, &params, wrapped.view(), mag.view()).unwrap();
        let mut net = Network::new(wrapped.view(), mag.view(), &costs, &params, Flows::zeros(costs.grid())).unwrap();

        net.mask_nodes();

        let sources = net.select_sources().unwrap();
        net.setup_tree_network();

        assert_eq!(sources.len(), 1);

        let (source, nconn) = sources[0];
        let mut n = nconn;
        let start = net.init_boundary(source, &mut n).unwrap();

        assert_eq!(start, net.grid.boundary());
        assert!(net.boundary.list.len() >= MIN_BOUNDARY_SIZE);
        assert_eq!(n, nconn-net.boundary.list.len()+1);
        assert!(net.boundary.list.iter().all(|&b| net.nodes[b].group == group::BOUNDARY_PTR));

        net.clean_up_boundary(start);

        assert!(net.real_nodes().all(|node| {
            let g = net.nodes[node].group;
            g == group::UNTOUCHED || g == group::MASKED
        }));
    }

    #[test]
    fn small_rim_is_left_alone() {
        let mag = island(16, 4);
        let wrapped = Array2::<f32>::zeros(mag.dim());
        let params = Params::lp(1.);
        let costs = Costs::derive(CostTag::L1, &params, wrapped.view(), mag.view()).unwrap();
        let mut net = Network::new(wrapped.view(), mag.view(), &costs, &params, Flows::zeros(costs.grid())).unwrap();

        net.mask_nodes();

        let sources = net.select_sources().unwrap();
        net.setup_tree_network();

        let (source, nconn) = sources[0];
        let mut n = nconn;

        assert_eq!(net.init_boundary(source, &mut n).unwrap(), source);
        assert_eq!(n, nconn);
        assert!(net.real_nodes().all(|node| net.nodes[node].level != BOUNDARY_LEVEL));
    }
}
