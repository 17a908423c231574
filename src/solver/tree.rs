use crate::error::{firewall, Result};
use crate::grid::{ArcId, Neighbor, NodeId, VERY_FAR};
use crate::interrupt::Hooks;
use crate::node::{group, PredArc};
use super::network::{Apex, Candidate, Network, INIT_ARR_SIZE};



/// Group counters restart from 2 once they pass this.
const MAX_GROUP_BASE: i64 = 2_000_000_000;

enum Pivot {
    Skipped,
    Degenerate,
    Augmenting
}



impl Network<'_> {
    fn level(&self, node: NodeId) -> i64 { self.nodes[node].level }

    fn group_of(&self, node: NodeId) -> i64 { self.nodes[node].group }

    fn parent(&self, node: NodeId) -> NodeId { self.nodes.parent(node) }

    /// Grow the tree from the region containing `source` until it spans the region,
    /// pivoting in every arc with a negative reduced cost along the way. Returns the
    /// number of augmenting pivots.
    pub fn tree_solve(
        &mut self,
        source: NodeId,
        nconnected: usize,
        nflow: i64,
        hooks: &mut Hooks
    ) -> Result<usize> {
        let mut nconnected = nconnected;
        let source = self.init_boundary(source, &mut nconnected)?;

        self.bkts.curr = self.bkts.maxind();
        self.init_tree(source);

        let maxnewnodes = (nconnected as f64*self.params.max_new_node_const).ceil() as usize;
        let mut apexlist: Vec<NodeId> = Vec::with_capacity(INIT_ARR_SIZE);
        let mut groupcounter: i64 = 2;
        let mut ipivots = 0;
        let mut inondegen = 0;
        let mut treesize = 1;
        let mut nmajor = 0;

        log::debug!("Treesize: {}  Pivots: {}  Improvements: {}", treesize, ipivots, inondegen);

        while treesize < nconnected {
            let mut nnewnodes = 0;

            while nnewnodes < maxnewnodes.max(1) && treesize < nconnected {
                let Some(to) = self.bkts.pop_min_outcost(&mut self.nodes) else {
                    return Err(firewall("Bucket queue emptied before the tree spanned the region"));
                };
                let Some(from) = self.nodes[to].pred else {
                    return Err(firewall("Node popped from the bucket queue has no parent"));
                };
                let pa = self.nodes[to].pred_arc;

                self.nodes[to].group = 1;
                self.nodes[to].level = self.level(from)+1;
                self.nodes[to].incost = self.nodes[from].incost+self.incr.get(pa.arc, -pa.dir);

                let after = self.nodes[from].next;
                self.nodes[to].next = after;
                self.nodes[to].prev = from;
                self.nodes[after].prev = to;
                self.nodes[from].next = to;

                // Arcs to nodes already on the tree become candidates if they violate
                for k in 0..self.degree(to) {
                    let Some(nb) = self.neighbor(to, k) else { continue };
                    let node = nb.node;
                    let g = self.group_of(node);

                    if node == from && nb.arc == pa.arc {
                        self.apexes[nb.arc.0] = Apex::Tree;
                    } else if g > 0 {
                        let apex = self.find_apex(to, node);
                        self.apexes[nb.arc.0] = Apex::At(apex);
                        self.check_arc_reduced_cost(to, node, apex, nb.arc, nb.dir);
                    } else if g != group::PRUNED && g != group::MASKED {
                        self.add_new_node(to, nb);
                    }
                }

                nnewnodes += 1;
                treesize += 1;
            }

            while !self.bag.is_empty() {
                self.check_interrupt(hooks)?;

                // Candidates found while pivoting this batch wait for the next one
                std::mem::swap(&mut self.bag, &mut self.list);
                self.bag.clear();

                let mut list = std::mem::take(&mut self.list);

                list.sort_by_key(|c| (c.arcdir.abs() < 2, c.violation));

                for cand in list.iter_mut() {
                    cand.arcdir = cand.arcdir.signum();
                }

                for &cand in &list {
                    match self.pivot(cand, nflow, &mut groupcounter, &mut apexlist)? {
                        Pivot::Skipped => {},
                        Pivot::Degenerate => ipivots += 1,
                        Pivot::Augmenting => {
                            ipivots += 1;
                            inondegen += 1;
                        }
                    }
                }

                list.clear();
                self.list = list;
            }

            log::trace!("Treesize: {}  Pivots: {}  Improvements: {}", treesize, ipivots, inondegen);

            nmajor += 1;

            if nmajor % self.params.n_major_prune == 0 {
                let npruned = self.prune_tree(source);
                log::debug!("Pruned {} nodes", npruned);
            }
        }

        log::debug!("Treesize: {}  Pivots: {}  Improvements: {}", treesize, ipivots, inondegen);

        self.check_thread(source)?;
        self.discharge_boundary()?;

        if !self.bkts.is_empty() {
            return Err(firewall("Bucket queue not empty after the tree solve"));
        }

        self.clean_up_boundary(source);

        Ok(inondegen)
    }

    fn init_tree(&mut self, source: NodeId) {
        let root = &mut self.nodes[source];

        root.group = 1;
        root.outcost = 0;
        root.incost = 0;
        root.pred = None;
        root.pred_arc = PredArc::NONE;
        root.prev = source;
        root.next = source;
        root.level = 0;

        for k in 0..self.degree(source) {
            let Some(nb) = self.neighbor(source, k) else { continue };
            let g = self.group_of(nb.node);

            if g != group::PRUNED && g != group::MASKED {
                self.add_new_node(source, nb);
            }
        }
    }

    /// Offer `nb.node` a path through `from` if that is cheaper than what it has.
    fn add_new_node(&mut self, from: NodeId, nb: Neighbor) {
        let to = nb.node;
        let newoutcost = self.nodes[from].outcost+self.incr.get(nb.arc, nb.dir);

        if newoutcost < self.nodes[to].outcost || self.nodes[to].pred == Some(from) {
            if self.group_of(to) == group::IN_BUCKET {
                let old = self.nodes[to].outcost;
                self.bkts.remove_by_cost(&mut self.nodes, to, old);
            }

            let node = &mut self.nodes[to];

            node.outcost = newoutcost;
            node.pred = Some(from);
            node.pred_arc = PredArc { arc: nb.arc, dir: nb.dir };
            self.bkts.insert_by_cost(&mut self.nodes, to, newoutcost);
            self.nodes[to].group = group::IN_BUCKET;
        }
    }

    /// Deepest common ancestor of two tree nodes.
    fn find_apex(&self, mut a: NodeId, mut b: NodeId) -> NodeId {
        while self.level(a) > self.level(b) {
            a = self.parent(a);
        }

        while self.level(b) > self.level(a) {
            b = self.parent(b);
        }

        while a != b && self.parent(a) != a {
            a = self.parent(a);
            b = self.parent(b);
        }

        a
    }

    /// Queue the non-tree arc from `from` to `to` if pushing flow over it, in
    /// either direction, would lower the cost of its cycle or of a tree path.
    fn check_arc_reduced_cost(&mut self, from: NodeId, to: NodeId, apex: NodeId, arc: ArcId, arcdir: i64) {
        if self.is_candidate[arc.0] {
            return;
        }

        let (mut from, mut to, mut arcdir) = (from, to, arcdir);
        let apexcost = self.nodes[apex].outcost+self.nodes[apex].incost;
        let fwd = self.incr.get(arc, arcdir);
        let rev = self.incr.get(arc, -arcdir);
        let (fout, fin) = (self.nodes[from].outcost, self.nodes[from].incost);
        let (tout, tin) = (self.nodes[to].outcost, self.nodes[to].incost);

        let mut violation = fwd+fout+tin-apexcost;

        if violation < 0 {
            arcdir *= 2;
        } else {
            violation = rev+tout+fin-apexcost;

            if violation < 0 {
                arcdir *= -2;
                std::mem::swap(&mut from, &mut to);
            } else {
                violation = fwd+fout-tout;

                if violation >= 0 {
                    violation = rev+tout-fout;

                    if violation < 0 {
                        arcdir = -arcdir;
                        std::mem::swap(&mut from, &mut to);
                    }
                }
            }
        }

        if violation < 0 {
            self.bag.push(Candidate { violation, from, to, arc, arcdir });
            self.is_candidate[arc.0] = true;
        }
    }

    /// Apply one candidate: augment around its cycle if that pays, then swap it into
    /// the tree in place of the arc whose flow or path cost it undercuts.
    fn pivot(
        &mut self,
        cand: Candidate,
        nflow: i64,
        groupcounter: &mut i64,
        apexlist: &mut Vec<NodeId>
    ) -> Result<Pivot> {
        let Candidate { mut from, mut to, arc, mut arcdir, .. } = cand;

        self.is_candidate[arc.0] = false;

        let Apex::At(apex) = self.apexes[arc.0] else { return Ok(Pivot::Skipped) };
        let apexcost = self.nodes[apex].outcost+self.nodes[apex].incost;

        // Stale candidates may have flipped direction
        let mut outcostto = self.nodes[from].outcost+self.incr.get(arc, arcdir);
        let mut cyclecost = outcostto+self.nodes[to].incost-apexcost;

        if outcostto >= self.nodes[to].outcost && cyclecost >= 0 {
            std::mem::swap(&mut from, &mut to);
            arcdir = -arcdir;
            outcostto = self.nodes[from].outcost+self.incr.get(arc, arcdir);
            cyclecost = outcostto+self.nodes[to].incost-apexcost;

            if outcostto >= self.nodes[to].outcost && cyclecost >= 0 {
                return Ok(Pivot::Skipped);
            }
        }

        *groupcounter += 1;

        if *groupcounter > MAX_GROUP_BASE {
            for node in self.nodes.iter_mut() {
                if node.group > 0 {
                    node.group = 1;
                }
            }

            *groupcounter = 2;
        }

        let augmenting = cyclecost < 0;
        let mut leavingchild: Option<NodeId>;
        let mut fromside;
        let mut node1;
        let mut node2;

        if augmenting {
            // Push increments around the cycle until the next one would not pay
            loop {
                fromside = true;
                node1 = from;
                node2 = to;
                leavingchild = None;

                self.flows.add(arc, arcdir*nflow);
                self.recalc(arc, nflow);

                let mut violation = self.incr.get(arc, arcdir);

                if self.level(node1) > self.level(node2) {
                    while self.level(node1) != self.level(node2) {
                        let pa = self.nodes[node1].pred_arc;

                        self.flows.add(pa.arc, pa.dir*nflow);
                        self.recalc(pa.arc, nflow);

                        if leavingchild.is_none() && self.flows.get(pa.arc) == 0 {
                            leavingchild = Some(node1);
                        }

                        violation += self.incr.get(pa.arc, pa.dir);
                        self.nodes[node1].group = *groupcounter+1;
                        node1 = self.parent(node1);
                    }
                } else {
                    while self.level(node1) != self.level(node2) {
                        let pa = self.nodes[node2].pred_arc;

                        self.flows.add(pa.arc, -pa.dir*nflow);
                        self.recalc(pa.arc, nflow);

                        if self.flows.get(pa.arc) == 0 {
                            leavingchild = Some(node2);
                            fromside = false;
                        }

                        violation += self.incr.get(pa.arc, -pa.dir);
                        self.nodes[node2].group = *groupcounter;
                        node2 = self.parent(node2);
                    }
                }

                while node1 != node2 {
                    let pa1 = self.nodes[node1].pred_arc;
                    let pa2 = self.nodes[node2].pred_arc;

                    self.flows.add(pa1.arc, pa1.dir*nflow);
                    self.flows.add(pa2.arc, -pa2.dir*nflow);
                    self.recalc(pa1.arc, nflow);
                    self.recalc(pa2.arc, nflow);
                    violation += self.incr.get(pa1.arc, pa1.dir)+self.incr.get(pa2.arc, -pa2.dir);

                    if self.flows.get(pa2.arc) == 0 {
                        leavingchild = Some(node2);
                        fromside = false;
                    } else if leavingchild.is_none() && self.flows.get(pa1.arc) == 0 {
                        leavingchild = Some(node1);
                    }

                    self.nodes[node1].group = *groupcounter+1;
                    self.nodes[node2].group = *groupcounter;
                    node1 = self.parent(node1);
                    node2 = self.parent(node2);
                }

                if violation >= 0 {
                    break;
                }
            }
        } else {
            // The leaving arc is the highest one on the to side that the new path undercuts
            fromside = false;
            leavingchild = None;
            node1 = from;
            node2 = to;

            if self.level(node1) > self.level(node2) {
                while self.level(node1) != self.level(node2) {
                    self.nodes[node1].group = *groupcounter+1;
                    node1 = self.parent(node1);
                }
            } else {
                while self.level(node1) != self.level(node2) {
                    self.walk_to_side(node2, &mut outcostto, &mut leavingchild);
                    self.nodes[node2].group = *groupcounter;
                    node2 = self.parent(node2);
                }
            }

            while node1 != node2 {
                self.walk_to_side(node2, &mut outcostto, &mut leavingchild);
                self.nodes[node1].group = *groupcounter+1;
                self.nodes[node2].group = *groupcounter;
                node1 = self.parent(node1);
                node2 = self.parent(node2);
            }
        }

        let cycleapex = node1;

        let leavingparent = match leavingchild {
            Some(child) => self.parent(child),
            None => {
                fromside = true;
                from
            }
        };

        let mut fromgroup;

        if fromside {
            *groupcounter += 1;
            fromgroup = *groupcounter-1;
            std::mem::swap(&mut from, &mut to);
            arcdir = -arcdir;
        } else {
            fromgroup = *groupcounter+1;
        }

        let mut firstfromnode = None;
        let mut firsttonode = None;
        let apexlistbase;

        if augmenting {
            // Potentials changed along the cycle, so fix up the paths below the apex
            for k in 0..self.degree(cycleapex) {
                let Some(nb) = self.neighbor(cycleapex, k) else { continue };
                let g = self.group_of(nb.node);
                let child = self.apexes[nb.arc.0] == Apex::Tree && self.nodes[nb.node].pred == Some(cycleapex);

                if child && g == *groupcounter {
                    firsttonode = Some(nb.node);

                    if firstfromnode.is_some() {
                        break;
                    }
                } else if child && g == fromgroup {
                    firstfromnode = Some(nb.node);

                    if firsttonode.is_some() {
                        break;
                    }
                }
            }

            self.nodes[cycleapex].group = *groupcounter+2;

            if let Some(n) = firsttonode {
                self.nondegen_update_children(cycleapex, leavingparent, n, 0)?;
            }

            if let Some(n) = firstfromnode {
                self.nondegen_update_children(cycleapex, from, n, 1)?;
            }

            *groupcounter = self.group_of(from);
            apexlistbase = self.group_of(cycleapex);
            fromgroup = apexlistbase;
        } else {
            self.nodes[cycleapex].group = fromgroup;
            *groupcounter += 2;
            apexlistbase = *groupcounter+1;
        }

        let skipthread = match leavingchild {
            None => to,
            Some(leavingchild) => {
                let leaving_arc = self.nodes[leavingchild].pred_arc.arc;
                let last = self.remount(from, to, PredArc { arc, dir: arcdir }, leavingparent, groupcounter);

                self.apexes[arc.0] = Apex::Tree;
                self.apexes[leaving_arc.0] = Apex::At(cycleapex);

                apexlist.clear();

                if *groupcounter >= apexlistbase {
                    apexlist.resize((*groupcounter-apexlistbase+1) as usize, NodeId::NONE);

                    let mut node = leavingchild;

                    for g in (apexlistbase..=*groupcounter).rev() {
                        apexlist[(g-apexlistbase) as usize] = node;
                        node = self.parent(node);
                    }
                }

                self.recheck_remounted(to, cycleapex, apexlistbase, fromgroup, &apexlist[..]);

                self.nodes[last].next
            }
        };

        if augmenting {
            self.recheck_descendants(cycleapex, firstfromnode, to, skipthread, apexlistbase);
            self.recheck_descendants(cycleapex, firsttonode, to, skipthread, apexlistbase);

            return Ok(Pivot::Augmenting);
        }

        Ok(Pivot::Degenerate)
    }

    fn walk_to_side(&self, node2: NodeId, outcostto: &mut i64, leavingchild: &mut Option<NodeId>) {
        if *outcostto < self.nodes[node2].outcost {
            let pa = self.nodes[node2].pred_arc;

            *leavingchild = Some(node2);
            *outcostto += self.incr.get(pa.arc, -pa.dir);
        } else {
            *outcostto = VERY_FAR;
        }
    }

    /// Hang the subtree rooted at `to` from `from` over the entering arc, reversing
    /// the path up to `leavingparent`. Returns the last node of the moved thread.
    fn remount(
        &mut self,
        from: NodeId,
        to: NodeId,
        entering: PredArc,
        leavingparent: NodeId,
        groupcounter: &mut i64
    ) -> NodeId {
        let mut root = from;
        let mut oldmntpt = to;
        let mut carry = entering;
        let mut node1 = to;

        while oldmntpt != leavingparent {
            let mntpt = root;

            root = oldmntpt;
            oldmntpt = self.parent(root);

            let arc_in = carry;

            carry = self.nodes[root].pred_arc.reversed();
            self.nodes[root].pred = Some(mntpt);
            self.nodes[root].pred_arc = arc_in;

            let dlevel = self.level(mntpt)-self.level(root)+1;
            let doutcost = self.nodes[mntpt].outcost-self.nodes[root].outcost+self.incr.get(arc_in.arc, arc_in.dir);
            let dincost = self.nodes[mntpt].incost-self.nodes[root].incost+self.incr.get(arc_in.arc, -arc_in.dir);
            let startlevel = self.level(root);

            node1 = root;
            *groupcounter += 1;

            loop {
                let node = &mut self.nodes[node1];

                node.level += dlevel;
                node.outcost += doutcost;
                node.incost += dincost;
                node.group = *groupcounter;

                let next = node.next;

                if self.level(next) <= startlevel {
                    break;
                }

                node1 = next;
            }

            // Splice the subtree's thread in after its new parent
            let before = self.nodes[root].prev;
            let after = self.nodes[node1].next;

            self.nodes[before].next = after;
            self.nodes[after].prev = before;

            let mntnext = self.nodes[mntpt].next;

            self.nodes[node1].next = mntnext;
            self.nodes[mntnext].prev = node1;
            self.nodes[mntpt].next = root;
            self.nodes[root].prev = mntpt;

            if oldmntpt == root {
                break;
            }
        }

        node1
    }

    /// Refresh apexes of arcs leaving the remounted subtree and recheck them.
    fn recheck_remounted(
        &mut self,
        to: NodeId,
        cycleapex: NodeId,
        apexlistbase: i64,
        fromgroup: i64,
        apexlist: &[NodeId]
    ) {
        let startlevel = self.level(to);
        let mut node1 = to;

        loop {
            for k in 0..self.degree(node1) {
                let Some(nb) = self.neighbor(node1, k) else { continue };
                let node2 = nb.node;
                let g2 = self.group_of(node2);

                if g2 > 0 {
                    if g2 < self.group_of(node1) && self.apexes[nb.arc.0] != Apex::Tree {
                        if g2 >= apexlistbase {
                            if let Some(&a) = apexlist.get((g2-apexlistbase) as usize) {
                                self.apexes[nb.arc.0] = Apex::At(a);
                            }
                        } else if let Apex::At(old) = self.apexes[nb.arc.0] {
                            if self.level(old) > self.level(cycleapex) {
                                self.apexes[nb.arc.0] = Apex::At(cycleapex);
                            } else if old == cycleapex {
                                let mut node = node2;

                                while self.group_of(node) != fromgroup && self.parent(node) != node {
                                    node = self.parent(node);
                                }

                                self.apexes[nb.arc.0] = Apex::At(node);
                            }
                        }

                        if let Apex::At(a) = self.apexes[nb.arc.0] {
                            self.check_arc_reduced_cost(node1, node2, a, nb.arc, nb.dir);
                        }
                    }
                } else if g2 != group::PRUNED && g2 != group::MASKED {
                    self.add_new_node(node1, nb);
                }
            }

            node1 = self.nodes[node1].next;

            if self.level(node1) <= startlevel {
                break;
            }
        }
    }

    /// Recheck every arc out of the subtree that hangs from `cycleapex` via `first`,
    /// skipping the part already handled by the remount.
    fn recheck_descendants(
        &mut self,
        cycleapex: NodeId,
        first: Option<NodeId>,
        to: NodeId,
        skipthread: NodeId,
        apexlistbase: i64
    ) {
        let Some(start) = first.filter(|&n| self.nodes[n].pred == Some(cycleapex)) else { return };
        let startlevel = self.level(start);
        let mut node1 = start;

        loop {
            for k in 0..self.degree(node1) {
                let Some(nb) = self.neighbor(node1, k) else { continue };
                let node2 = nb.node;
                let g2 = self.group_of(node2);

                if g2 > 0 {
                    let g1 = self.group_of(node1);

                    if let Apex::At(a) = self.apexes[nb.arc.0] {
                        if g2 != g1 || g1 == apexlistbase {
                            self.check_arc_reduced_cost(node1, node2, a, nb.arc, nb.dir);
                        }
                    }
                } else if g2 != group::PRUNED && g2 != group::MASKED {
                    self.add_new_node(node1, nb);
                }
            }

            node1 = self.nodes[node1].next;

            if node1 == to {
                node1 = skipthread;
            }

            if self.level(node1) <= startlevel {
                break;
            }
        }
    }

    /// Shift potentials along the path from `startnode` to `lastnode` after an
    /// augmentation, carrying every side branch along with its path node.
    fn nondegen_update_children(
        &mut self,
        startnode: NodeId,
        lastnode: NodeId,
        nextonpath: NodeId,
        dgroup: i64
    ) -> Result<()> {
        let pathgroup = self.group_of(lastnode);
        let mut node1 = startnode;
        let mut nextonpath = Some(nextonpath);

        while node1 != lastnode {
            let Some(node2) = nextonpath.take() else {
                return Err(firewall("Lost the augmenting path while updating potentials"));
            };
            let pa = self.nodes[node2].pred_arc;
            let doutcost = self.nodes[node1].outcost-self.nodes[node2].outcost+self.incr.get(pa.arc, pa.dir);
            let dincost = self.nodes[node1].incost-self.nodes[node2].incost+self.incr.get(pa.arc, -pa.dir);

            self.nodes[node2].outcost += doutcost;
            self.nodes[node2].incost += dincost;
            self.nodes[node2].group = self.group_of(node1)+dgroup;
            node1 = node2;

            for k in 0..self.degree(node1) {
                let Some(nb) = self.neighbor(node1, k) else { continue };
                let child = nb.node;

                if self.nodes[child].pred != Some(node1)
                    || self.nodes[child].pred_arc.arc != nb.arc
                    || self.group_of(child) <= 0
                {
                    continue;
                }

                if self.group_of(child) == pathgroup {
                    nextonpath = Some(child);
                } else {
                    let startlevel = self.level(child);
                    let group1 = self.group_of(node1);
                    let mut node = child;

                    loop {
                        let n = &mut self.nodes[node];

                        n.group = group1;
                        n.incost += dincost;
                        n.outcost += doutcost;
                        node = n.next;

                        if self.level(node) <= startlevel {
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Detach leaves whose arcs carry no flow and are too expensive to change.
    fn prune_tree(&mut self, source: NodeId) -> usize {
        let mut npruned = 0;
        let mut node1 = self.nodes[source].next;

        while node1 != source {
            if self.is_prunable_leaf(node1) {
                let (prev, next) = (self.nodes[node1].prev, self.nodes[node1].next);

                self.nodes[prev].next = next;
                self.nodes[next].prev = prev;
                self.nodes[node1].group = group::PRUNED;
                npruned += 1;

                node1 = if self.level(prev) < self.level(node1) { prev } else { next };
            } else {
                node1 = self.nodes[node1].next;
            }
        }

        npruned
    }

    fn is_prunable_leaf(&self, node1: NodeId) -> bool {
        if self.level(self.nodes[node1].next) > self.level(node1) {
            return false;
        }

        let thresh = self.params.prune_cost_thresh;

        (0..self.degree(node1)).filter_map(|k| self.neighbor(node1, k)).all(|nb| {
            let g = self.group_of(nb.node);
            let c = self.incr.pair(nb.arc);

            g != group::UNTOUCHED
                && g != group::IN_BUCKET
                && c.pos as i64 >= thresh
                && c.neg as i64 >= thresh
                && self.flows.get(nb.arc) == 0
        })
    }

    /// Every node on the thread must sit one level below its parent.
    fn check_thread(&self, source: NodeId) -> Result<()> {
        let mut node1 = self.nodes[source].next;

        while node1 != source {
            match self.nodes[node1].pred {
                Some(p) if self.level(p) == self.level(node1)-1 => {},
                _ => return Err(firewall(format!(
                    "Tree level of node {:?} does not follow its parent", self.grid.node_rc(node1)
                )))
            }

            node1 = self.nodes[node1].next;
        }

        Ok(())
    }
}



#[cfg(test)]
mod tests {
    use ndarray::prelude::*;
    use crate::config::Params;
    use crate::cost::{CostTag, Costs};
    use crate::grid::{cycle_residue, wrap, Flows, Grid};
    use crate::init::mst_flows;
    use crate::interrupt::Hooks;
    use super::*;

    fn hooks(observer: &mut ()) -> Hooks<'_> {
        Hooks { interrupt: None, observer, cancel: None, estimate: None }
    }

    fn solve_once(wrapped: &Array2<f32>, mag: &Array2<f32>, params: &Params, flows: Flows) -> (Flows, usize) {
        let tag = CostTag::from_params(params).unwrap();
        let costs = Costs::derive(tag, params, wrapped.view(), mag.view()).unwrap();
        let mut net = Network::new(wrapped.view(), mag.view(), &costs, params, flows).unwrap();
        let mut obs = ();
        let mut hooks = hooks(&mut obs);

        net.mask_nodes();
        net.incr.setup(&costs, &net.flows, 1);

        let sources = net.select_sources().unwrap();
        net.setup_tree_network();

        let mut n = 0;

        for (source, nconn) in sources {
            n += net.tree_solve(source, nconn, 1, &mut hooks).unwrap();
        }

        (net.flows, n)
    }

    #[test]
    fn circulation_is_cancelled() {
        // One unit of flow circling four nodes costs something and balances everywhere
        let wrapped = Array2::<f32>::zeros((6, 6));
        let mag = Array2::<f32>::ones((6, 6));
        let params = Params::lp(1.);
        let grid = Grid::new(6, 6).unwrap();
        let mut flows = Flows::zeros(grid);

        flows.set(grid.row_arc(1, 2), 1);
        flows.set(grid.col_arc(2, 2), 1);
        flows.set(grid.row_arc(2, 2), -1);
        flows.set(grid.col_arc(2, 1), -1);

        let residue = cycle_residue(wrapped.view());

        assert_eq!(flows.conservation_errors(residue.view()), 0);

        let (after, n) = solve_once(&wrapped, &mag, &params, flows);

        assert_eq!(after.conservation_errors(residue.view()), 0);
        assert!(n > 0);
        assert_eq!(after.max_abs(), 0);
    }

    #[test]
    fn solve_keeps_residues_balanced() {
        let wrapped = Array2::from_shape_fn((12, 14), |(r, c)| {
            let (y, x) = (r as f64, c as f64);
            wrap((y-5.5).atan2(x-3.5)-(y-5.5).atan2(x-9.5)+0.05*x*y) as f32
        });
        let mag = Array2::<f32>::ones(wrapped.dim());
        let params = Params::lp(1.);
        let tag = CostTag::from_params(&params).unwrap();
        let costs = Costs::derive(tag, &params, wrapped.view(), mag.view()).unwrap();
        let init = mst_flows(wrapped.view(), &costs, &params).unwrap();
        let residue = cycle_residue(wrapped.view());
        let init_cost = costs.total(&init);
        let (flows, _) = solve_once(&wrapped, &mag, &params, init);

        assert_eq!(flows.conservation_errors(residue.view()), 0);
        assert!(costs.total(&flows) <= init_cost);
    }

    #[test]
    fn pruning_keeps_residues_balanced() {
        let wrapped = Array2::from_shape_fn((12, 14), |(r, c)| {
            let (y, x) = (r as f64, c as f64);
            wrap((y-5.5).atan2(x-3.5)-(y-5.5).atan2(x-9.5)) as f32
        });
        let mag = Array2::<f32>::ones(wrapped.dim());
        let params = Params { n_major_prune: 1, prune_cost_thresh: 0, ..Params::lp(1.) };
        let tag = CostTag::from_params(&params).unwrap();
        let costs = Costs::derive(tag, &params, wrapped.view(), mag.view()).unwrap();
        let init = mst_flows(wrapped.view(), &costs, &params).unwrap();
        let residue = cycle_residue(wrapped.view());
        let (flows, _) = solve_once(&wrapped, &mag, &params, init);

        assert_eq!(flows.conservation_errors(residue.view()), 0);
    }

    #[test]
    fn apex_of_siblings_is_parent() {
        let wrapped = Array2::<f32>::zeros((4, 4));
        let mag = Array2::<f32>::ones((4, 4));
        let params = Params::lp(1.);
        let costs = Costs::derive(CostTag::L1, &params, wrapped.view(), mag.view()).unwrap();
        let mut net = Network::new(wrapped.view(), mag.view(), &costs, &params, Flows::zeros(costs.grid())).unwrap();
        let g = costs.grid();
        let (a, b, c) = (g.node(0, 0), g.node(0, 1), g.node(1, 0));

        net.nodes[a].level = 0;
        net.nodes[b].level = 1;
        net.nodes[b].pred = Some(a);
        net.nodes[c].level = 1;
        net.nodes[c].pred = Some(a);

        assert_eq!(net.find_apex(b, c), a);
        assert_eq!(net.find_apex(b, a), a);
    }
}
