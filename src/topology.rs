use std::cmp::Reverse;
use std::collections::VecDeque;
use petgraph::unionfind::UnionFind;
use crate::grid::{ArcId, Grid, Neighbor, NodeId};



/// Neighbour enumeration over a network. `neighbor(node, k)` for `k < degree(node)`
/// yields the k-th incident arc, or `None` for a slot that does not exist.
pub trait Topology {
    fn n_nodes(&self) -> usize;
    fn degree(&self, node: NodeId) -> usize;
    fn neighbor(&self, node: NodeId, k: usize) -> Option<Neighbor>;
}



/// Pixel grid network: one node per 2x2 pixel cell plus a ground node.
#[derive(Clone, Copy, Debug)]
pub struct GridTopology {
    pub grid: Grid
}

impl GridTopology {
    pub fn new(grid: Grid) -> Self {
        Self { grid }
    }

    pub fn n_ground_arcs(&self) -> usize {
        2*self.grid.nnoderow()+2*self.grid.nnodecol().saturating_sub(2)
    }

    fn ground_neighbor(&self, k: usize) -> Neighbor {
        let g = &self.grid;
        let (nr, nc) = (g.nnoderow(), g.nnodecol());

        if k < nr {
            Neighbor { node: g.node(k, 0), arc: g.row_arc(k, 0), dir: 1 }
        } else if k < 2*nr {
            let r = k-nr;
            Neighbor { node: g.node(r, nc-1), arc: g.row_arc(r, g.ncol-1), dir: -1 }
        } else if k < 2*nr+nc-2 {
            let c = k-2*nr+1;
            Neighbor { node: g.node(0, c), arc: g.col_arc(0, c), dir: 1 }
        } else {
            let c = k-2*nr-(nc-2)+1;
            Neighbor { node: g.node(nr-1, c), arc: g.col_arc(g.nrow-1, c), dir: -1 }
        }
    }

    fn grid_neighbor(&self, r: usize, c: usize, k: usize) -> Option<Neighbor> {
        let g = &self.grid;
        let (nr, nc) = (g.nnoderow(), g.nnodecol());
        let ground = g.ground();
        let corner_col = c == 0 || c == nc-1;

        let nb = match k {
            0 => Neighbor {
                node: if c+1 < nc { g.node(r, c+1) } else { ground },
                arc: g.row_arc(r, c+1),
                dir: 1
            },
            1 => {
                if r+1 == nr && corner_col {
                    return None;
                }

                Neighbor {
                    node: if r+1 < nr { g.node(r+1, c) } else { ground },
                    arc: g.col_arc(r+1, c),
                    dir: 1
                }
            },
            2 => Neighbor {
                node: if c > 0 { g.node(r, c-1) } else { ground },
                arc: g.row_arc(r, c),
                dir: -1
            },
            _ => {
                if r == 0 && corner_col {
                    return None;
                }

                Neighbor {
                    node: if r > 0 { g.node(r-1, c) } else { ground },
                    arc: g.col_arc(r, c),
                    dir: -1
                }
            }
        };

        Some(nb)
    }
}

impl Topology for GridTopology {
    fn n_nodes(&self) -> usize {
        self.grid.n_grid_nodes()+1
    }

    fn degree(&self, node: NodeId) -> usize {
        if node == self.grid.ground() {
            self.n_ground_arcs()
        } else if node.0 < self.grid.n_grid_nodes() {
            4
        } else {
            0
        }
    }

    fn neighbor(&self, node: NodeId, k: usize) -> Option<Neighbor> {
        if node == self.grid.ground() {
            Some(self.ground_neighbor(k))
        } else {
            let (r, c) = self.grid.node_rc(node)?;
            self.grid_neighbor(r, c, k)
        }
    }
}



/// Arbitrary undirected network given by adjacency lists, used to relate tiles.
#[derive(Clone, Debug, Default)]
pub struct TileTopology {
    adjacency: Vec<Vec<Neighbor>>,
    narcs: usize
}

impl TileTopology {
    pub fn new(n_nodes: usize) -> Self {
        Self { adjacency: vec![Vec::new(); n_nodes], narcs: 0 }
    }

    /// Add an arc between `a` and `b`; positive flow runs from `a` to `b`.
    pub fn add_arc(&mut self, a: NodeId, b: NodeId) -> ArcId {
        let arc = ArcId(self.narcs);

        self.adjacency[a.0].push(Neighbor { node: b, arc, dir: 1 });
        self.adjacency[b.0].push(Neighbor { node: a, arc, dir: -1 });
        self.narcs += 1;

        arc
    }

    pub fn n_arcs(&self) -> usize { self.narcs }
}

impl Topology for TileTopology {
    fn n_nodes(&self) -> usize {
        self.adjacency.len()
    }

    fn degree(&self, node: NodeId) -> usize {
        self.adjacency[node.0].len()
    }

    fn neighbor(&self, node: NodeId, k: usize) -> Option<Neighbor> {
        self.adjacency[node.0].get(k).copied()
    }
}



/// Tree link from a node to its parent in a spanning forest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TreeLink {
    pub parent: NodeId,
    /// Arc joining parent and child, `dir` is the flow sign from parent to child
    pub via: Neighbor
}

/// Maximum-weight spanning forest picked with Kruskal's algorithm, heaviest arcs
/// first and ties broken by arc index. Returns the nodes in breadth-first order from
/// the lowest-numbered node of each component, so every node appears after its
/// parent, and each node's link (`None` for component roots). Arcs with negative
/// weight are never used.
pub fn max_spanning_forest<T: Topology>(
    topo: &T,
    weight: impl Fn(ArcId) -> i64
) -> (Vec<NodeId>, Vec<Option<TreeLink>>) {
    let n = topo.n_nodes();
    let mut arcs: Vec<(i64, NodeId, Neighbor)> = (0..n).map(NodeId)
        .flat_map(move |node| (0..topo.degree(node)).filter_map(move |k| topo.neighbor(node, k)).map(move |nb| (node, nb)))
        .filter(|(_, nb)| nb.dir > 0)
        .map(|(node, nb)| (weight(nb.arc), node, nb))
        .filter(|&(w, _, _)| w >= 0)
        .collect();

    arcs.sort_by_key(|&(w, _, nb)| (Reverse(w), nb.arc));

    let mut uf = UnionFind::<usize>::new(n);
    let mut tree: Vec<Vec<Neighbor>> = vec![Vec::new(); n];

    for (_, from, nb) in arcs {
        if uf.union(from.0, nb.node.0) {
            tree[from.0].push(nb);
            tree[nb.node.0].push(Neighbor { node: from, arc: nb.arc, dir: -nb.dir });
        }
    }

    let mut visited = vec![false; n];
    let mut links = vec![None; n];
    let mut order = Vec::with_capacity(n);
    let mut queue = VecDeque::new();

    for root in (0..n).map(NodeId) {
        if visited[root.0] {
            continue;
        }

        visited[root.0] = true;
        order.push(root);
        queue.push_back(root);

        while let Some(parent) = queue.pop_front() {
            for &via in &tree[parent.0] {
                if visited[via.node.0] {
                    continue;
                }

                visited[via.node.0] = true;
                links[via.node.0] = Some(TreeLink { parent, via });
                order.push(via.node);
                queue.push_back(via.node);
            }
        }
    }

    (order, links)
}



#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_arcs_are_mirrored() {
        let grid = Grid::new(5, 6).unwrap();
        let topo = GridTopology::new(grid);

        for node in (0..topo.n_nodes()).map(NodeId) {
            for k in 0..topo.degree(node) {
                let Some(nb) = topo.neighbor(node, k) else { continue };
                let back = (0..topo.degree(nb.node))
                    .filter_map(|j| topo.neighbor(nb.node, j))
                    .find(|b| b.arc == nb.arc)
                    .unwrap();

                assert_eq!(back.node, node);
                assert_eq!(back.dir, -nb.dir);
            }
        }
    }

    #[test]
    fn grid_arc_directions_match_addressing() {
        let grid = Grid::new(4, 5).unwrap();
        let topo = GridTopology::new(grid);

        for node in (0..topo.n_nodes()).map(NodeId) {
            for nb in (0..topo.degree(node)).filter_map(|k| topo.neighbor(node, k)) {
                let (tail, head) = grid.arc_nodes(nb.arc);

                if nb.dir > 0 {
                    assert_eq!((tail, head), (node, nb.node));
                } else {
                    assert_eq!((tail, head), (nb.node, node));
                }
            }
        }
    }

    #[test]
    fn corner_arcs_are_skipped() {
        let grid = Grid::new(4, 4).unwrap();
        let topo = GridTopology::new(grid);
        let ground = grid.ground();
        let arcs: Vec<_> = (0..topo.degree(ground))
            .filter_map(|k| topo.neighbor(ground, k))
            .map(|nb| nb.arc)
            .collect();

        assert_eq!(arcs.len(), 2*3+2*1);
        assert!(arcs.iter().all(|&a| !grid.is_corner_arc(a)));
        assert!(topo.neighbor(grid.node(0, 0), 3).is_none());
    }

    #[test]
    fn spanning_forest_prefers_heavy_arcs() {
        let mut topo = TileTopology::new(4);
        let light = topo.add_arc(NodeId(0), NodeId(1));
        let heavy = topo.add_arc(NodeId(0), NodeId(2));
        let bridge = topo.add_arc(NodeId(2), NodeId(1));
        let weights = [1, 10, 5];

        let (order, links) = max_spanning_forest(&topo, |a| weights[a.0]);

        assert_eq!(order, vec![NodeId(0), NodeId(2), NodeId(1), NodeId(3)]);
        assert_eq!(links[2].unwrap().via.arc, heavy);
        assert_eq!(links[1].unwrap().via.arc, bridge);
        assert_ne!(links[1].unwrap().via.arc, light);
        assert!(links[3].is_none());
    }

    #[test]
    fn negative_arcs_split_the_forest() {
        let mut topo = TileTopology::new(5);
        let a = topo.add_arc(NodeId(0), NodeId(1));
        let cut = topo.add_arc(NodeId(1), NodeId(2));
        let b = topo.add_arc(NodeId(3), NodeId(2));
        let c = topo.add_arc(NodeId(2), NodeId(4));
        let weights = [3, -1, 0, 7];

        let (order, links) = max_spanning_forest(&topo, |arc| weights[arc.0]);

        assert_eq!(order, vec![NodeId(0), NodeId(1), NodeId(2), NodeId(4), NodeId(3)]);
        assert!(links[0].is_none());
        assert_eq!(links[1].unwrap().via.arc, a);
        assert!(links[2].is_none());
        assert_eq!(links[3].unwrap().via, Neighbor { node: NodeId(3), arc: b, dir: -1 });
        assert_eq!(links[4].unwrap().parent, NodeId(2));
        assert_eq!(links[4].unwrap().via.arc, c);
        assert!(links.iter().flatten().all(|l| l.via.arc != cut));
    }
}
