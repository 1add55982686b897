//! Control flow graph analysis.
//!
//! The CFG is rebuilt on demand from block terminators. On top of it this
//! module computes:
//! - **Dominator tree**: SSA validation, back-edge detection
//! - **Post-dominator tree**: control dependence and join points of
//!   divergent branches; a virtual exit joins all exit blocks
//! - **Loop analysis**: natural loops and nesting
//! - **Reducibility**: retreating edges that are not back edges
//!
//! Only blocks reachable from the entry take part in any analysis.

use super::arena::{BitSet, SecondaryMap};
use super::function::{BlockData, BlockId, Function, InstKind};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::collections::VecDeque;

// =============================================================================
// CFG
// =============================================================================

/// Successor/predecessor structure of a function.
#[derive(Debug, Clone)]
pub struct Cfg {
    entry: Option<BlockId>,
    successors: SecondaryMap<BlockData, SmallVec<[BlockId; 2]>>,
    predecessors: SecondaryMap<BlockData, SmallVec<[BlockId; 2]>>,
    /// Reachable blocks in reverse post-order.
    rpo: Vec<BlockId>,
    rpo_index: SecondaryMap<BlockData, Option<u32>>,
    /// Reachable blocks ending in `ret` or `unreachable`.
    exits: Vec<BlockId>,
}

impl Cfg {
    /// Build the CFG of a function.
    pub fn build(func: &Function) -> Self {
        let n = func.blocks.len();
        let mut cfg = Cfg {
            entry: func.entry_block(),
            successors: SecondaryMap::with_capacity(n),
            predecessors: SecondaryMap::with_capacity(n),
            rpo: Vec::new(),
            rpo_index: SecondaryMap::with_capacity(n),
            exits: Vec::new(),
        };

        for &block in &func.layout {
            let mut succs: SmallVec<[BlockId; 2]> = SmallVec::new();
            for succ in func.successors(block) {
                if !succs.contains(&succ) {
                    succs.push(succ);
                }
            }
            for &succ in &succs {
                cfg.predecessors.entry(succ).push(block);
            }
            cfg.successors.set(block, succs);
        }

        let Some(entry) = cfg.entry else {
            return cfg;
        };

        // Iterative DFS for post-order.
        let mut visited = BitSet::with_capacity(n);
        let mut postorder = Vec::with_capacity(n);
        let mut stack: Vec<(BlockId, usize)> = vec![(entry, 0)];
        visited.insert(entry.as_usize());
        while let Some(&mut (block, ref mut next)) = stack.last_mut() {
            let succs = cfg.successors.get(block);
            if *next < succs.len() {
                let succ = succs[*next];
                *next += 1;
                if visited.insert(succ.as_usize()) {
                    stack.push((succ, 0));
                }
            } else {
                postorder.push(block);
                stack.pop();
            }
        }

        postorder.reverse();
        cfg.rpo = postorder;
        for (i, &block) in cfg.rpo.iter().enumerate() {
            cfg.rpo_index.set(block, Some(i as u32));
        }

        // Predecessor lists only keep reachable blocks.
        for &block in &cfg.rpo.clone() {
            let preds: SmallVec<[BlockId; 2]> = cfg
                .predecessors
                .get(block)
                .iter()
                .copied()
                .filter(|p| cfg.rpo_index.get(*p).is_some())
                .collect();
            cfg.predecessors.set(block, preds);
        }

        cfg.exits = cfg
            .rpo
            .iter()
            .copied()
            .filter(|&b| {
                func.terminator(b).is_some_and(|t| {
                    matches!(
                        func.inst(t).kind,
                        InstKind::Ret { .. } | InstKind::Unreachable
                    )
                })
            })
            .collect();

        cfg
    }

    /// Entry block.
    #[inline]
    pub fn entry(&self) -> Option<BlockId> {
        self.entry
    }

    /// Distinct successors of a block.
    #[inline]
    pub fn successors(&self, block: BlockId) -> &[BlockId] {
        self.successors.get(block)
    }

    /// Distinct reachable predecessors of a block.
    #[inline]
    pub fn predecessors(&self, block: BlockId) -> &[BlockId] {
        self.predecessors.get(block)
    }

    /// Reachable blocks in reverse post-order.
    #[inline]
    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    /// Position of a block in reverse post-order.
    #[inline]
    pub fn rpo_index(&self, block: BlockId) -> Option<usize> {
        self.rpo_index.get(block).map(|i| i as usize)
    }

    /// Check if a block is reachable from the entry.
    #[inline]
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.rpo_index.get(block).is_some()
    }

    /// Reachable exit blocks (`ret` or `unreachable`).
    #[inline]
    pub fn exits(&self) -> &[BlockId] {
        &self.exits
    }

    /// Number of reachable blocks.
    #[inline]
    pub fn len(&self) -> usize {
        self.rpo.len()
    }

    /// Check if no block is reachable.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rpo.is_empty()
    }

    /// Edges `u -> v` whose target does not come later in reverse post-order.
    pub fn retreating_edges(&self) -> Vec<(BlockId, BlockId)> {
        let mut edges = Vec::new();
        for (i, &block) in self.rpo.iter().enumerate() {
            for &succ in self.successors(block) {
                if self.rpo_index(succ).is_some_and(|j| j <= i) {
                    edges.push((block, succ));
                }
            }
        }
        edges
    }
}

// =============================================================================
// Dominance
// =============================================================================

/// Cooper-Harvey-Kennedy iterative idom computation over dense node indices.
///
/// `order` lists reachable nodes in reverse post-order of the traversal
/// direction, `root` first.
fn compute_idoms(
    num_nodes: usize,
    order: &[usize],
    preds: &dyn Fn(usize) -> SmallVec<[usize; 2]>,
) -> Vec<Option<usize>> {
    let mut idom: Vec<Option<usize>> = vec![None; num_nodes];
    let mut postorder = vec![usize::MAX; num_nodes];
    for (i, &node) in order.iter().enumerate() {
        postorder[node] = order.len() - 1 - i;
    }
    let Some(&root) = order.first() else {
        return idom;
    };
    idom[root] = Some(root);

    let intersect = |idom: &[Option<usize>], mut a: usize, mut b: usize| -> usize {
        while a != b {
            while postorder[a] < postorder[b] {
                a = idom[a].unwrap_or(root);
            }
            while postorder[b] < postorder[a] {
                b = idom[b].unwrap_or(root);
            }
        }
        a
    };

    let mut changed = true;
    while changed {
        changed = false;
        for &node in order.iter().skip(1) {
            let mut new_idom: Option<usize> = None;
            for pred in preds(node) {
                if postorder[pred] == usize::MAX || idom[pred].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => pred,
                    Some(current) => intersect(&idom, pred, current),
                });
            }
            if new_idom.is_some() && idom[node] != new_idom {
                idom[node] = new_idom;
                changed = true;
            }
        }
    }

    idom[root] = None;
    idom
}

/// Dominator tree of the reachable CFG.
#[derive(Debug, Clone)]
pub struct DominatorTree {
    /// Immediate dominator (`None` for the entry and unreachable blocks).
    idom: SecondaryMap<BlockData, Option<BlockId>>,
    children: SecondaryMap<BlockData, Vec<BlockId>>,
    depth: SecondaryMap<BlockData, u32>,
}

impl DominatorTree {
    /// Build the dominator tree.
    pub fn build(cfg: &Cfg) -> Self {
        let num_nodes = cfg
            .rpo
            .iter()
            .map(|b| b.as_usize() + 1)
            .max()
            .unwrap_or(0);
        let order: Vec<usize> = cfg.rpo.iter().map(|b| b.as_usize()).collect();
        let preds = |n: usize| -> SmallVec<[usize; 2]> {
            cfg.predecessors(BlockId::new(n as u32))
                .iter()
                .map(|b| b.as_usize())
                .collect()
        };
        let idoms = compute_idoms(num_nodes, &order, &preds);

        let mut dom = DominatorTree {
            idom: SecondaryMap::with_capacity(num_nodes),
            children: SecondaryMap::with_capacity(num_nodes),
            depth: SecondaryMap::with_capacity(num_nodes),
        };
        for &block in &cfg.rpo {
            if let Some(parent) = idoms[block.as_usize()] {
                let parent = BlockId::new(parent as u32);
                dom.idom.set(block, Some(parent));
                dom.children.entry(parent).push(block);
                let d = *dom.depth.get(parent) + 1;
                dom.depth.set(block, d);
            }
        }
        dom
    }

    /// Immediate dominator.
    #[inline]
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        *self.idom.get(block)
    }

    /// Dominator tree children.
    #[inline]
    pub fn children(&self, block: BlockId) -> &[BlockId] {
        self.children.get(block)
    }

    /// Depth in the dominator tree (entry = 0).
    #[inline]
    pub fn depth(&self, block: BlockId) -> u32 {
        *self.depth.get(block)
    }

    /// Check if `a` dominates `b`.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.idom(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    /// Check if `a` strictly dominates `b`.
    #[inline]
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }
}

/// Post-dominator tree with a virtual exit joining all exit blocks.
#[derive(Debug, Clone)]
pub struct PostDominatorTree {
    /// Immediate post-dominator; `None` when it is the virtual exit or the
    /// block cannot reach an exit.
    ipdom: SecondaryMap<BlockData, Option<BlockId>>,
    /// Blocks that reach an exit.
    covered: BitSet,
}

impl PostDominatorTree {
    /// Build the post-dominator tree.
    pub fn build(cfg: &Cfg) -> Self {
        let num_blocks = cfg
            .rpo
            .iter()
            .map(|b| b.as_usize() + 1)
            .max()
            .unwrap_or(0);
        let virtual_exit = num_blocks;

        // Reverse graph: successors become predecessors.
        let reverse_succs = |n: usize| -> SmallVec<[usize; 2]> {
            if n == virtual_exit {
                cfg.exits.iter().map(|b| b.as_usize()).collect()
            } else {
                cfg.predecessors(BlockId::new(n as u32))
                    .iter()
                    .map(|b| b.as_usize())
                    .collect()
            }
        };

        let mut visited = vec![false; num_blocks + 1];
        let mut postorder = Vec::with_capacity(num_blocks + 1);
        let mut stack: Vec<(usize, SmallVec<[usize; 2]>, usize)> =
            vec![(virtual_exit, reverse_succs(virtual_exit), 0)];
        visited[virtual_exit] = true;
        while let Some((node, succs, next)) = stack.last_mut() {
            if *next < succs.len() {
                let succ = succs[*next];
                *next += 1;
                if !visited[succ] {
                    visited[succ] = true;
                    let succ_succs = reverse_succs(succ);
                    stack.push((succ, succ_succs, 0));
                }
            } else {
                postorder.push(*node);
                stack.pop();
            }
        }
        postorder.reverse();

        // Predecessors in the reverse graph are CFG successors, plus the
        // virtual exit feeding every exit block.
        let exit_set: Vec<usize> = cfg.exits.iter().map(|b| b.as_usize()).collect();
        let reverse_preds = |n: usize| -> SmallVec<[usize; 2]> {
            if n == virtual_exit {
                return SmallVec::new();
            }
            let mut preds: SmallVec<[usize; 2]> = cfg
                .successors(BlockId::new(n as u32))
                .iter()
                .map(|b| b.as_usize())
                .collect();
            if exit_set.contains(&n) {
                preds.push(virtual_exit);
            }
            preds
        };
        let idoms = compute_idoms(num_blocks + 1, &postorder, &reverse_preds);

        let mut tree = PostDominatorTree {
            ipdom: SecondaryMap::with_capacity(num_blocks),
            covered: BitSet::with_capacity(num_blocks),
        };
        for &node in &postorder {
            if node == virtual_exit {
                continue;
            }
            let block = BlockId::new(node as u32);
            tree.covered.insert(node);
            let parent = idoms[node].filter(|&p| p != virtual_exit);
            tree.ipdom.set(block, parent.map(|p| BlockId::new(p as u32)));
        }
        tree
    }

    /// Immediate post-dominator (`None` if it is the virtual exit).
    #[inline]
    pub fn ipdom(&self, block: BlockId) -> Option<BlockId> {
        *self.ipdom.get(block)
    }

    /// Check if `a` post-dominates `b`.
    pub fn post_dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.covered.contains(b.as_usize()) {
            return false;
        }
        let mut current = b;
        loop {
            if current == a {
                return true;
            }
            match self.ipdom(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }
}

// =============================================================================
// Loop Analysis
// =============================================================================

/// A natural loop.
#[derive(Debug, Clone)]
pub struct Loop {
    /// The loop header block.
    pub header: BlockId,
    /// Sources of back edges to the header.
    pub latches: Vec<BlockId>,
    /// All blocks of the loop, header included.
    pub body: Vec<BlockId>,
    /// Enclosing loop.
    pub parent: Option<usize>,
    /// Nesting depth (1 = outermost).
    pub depth: u32,
}

impl Loop {
    /// Check if the loop contains a block.
    #[inline]
    pub fn contains(&self, block: BlockId) -> bool {
        self.body.contains(&block)
    }
}

/// Natural loops of a function.
#[derive(Debug, Clone, Default)]
pub struct LoopAnalysis {
    pub loops: Vec<Loop>,
    /// Innermost loop containing each block.
    block_to_loop: FxHashMap<BlockId, usize>,
}

impl LoopAnalysis {
    /// Find natural loops from back edges (edges whose target dominates
    /// their source).
    pub fn compute(cfg: &Cfg, dom: &DominatorTree) -> Self {
        let mut analysis = LoopAnalysis::default();
        let mut header_to_loop: FxHashMap<BlockId, usize> = FxHashMap::default();

        for &block in cfg.rpo() {
            for &succ in cfg.successors(block) {
                if !dom.dominates(succ, block) {
                    continue;
                }
                let idx = match header_to_loop.get(&succ) {
                    Some(&idx) => idx,
                    None => {
                        analysis.loops.push(Loop {
                            header: succ,
                            latches: Vec::new(),
                            body: vec![succ],
                            parent: None,
                            depth: 1,
                        });
                        header_to_loop.insert(succ, analysis.loops.len() - 1);
                        analysis.loops.len() - 1
                    }
                };
                analysis.loops[idx].latches.push(block);

                // Reverse walk from the latch up to the header.
                let mut worklist = VecDeque::from([block]);
                while let Some(b) = worklist.pop_front() {
                    if analysis.loops[idx].body.contains(&b) {
                        continue;
                    }
                    analysis.loops[idx].body.push(b);
                    worklist.extend(cfg.predecessors(b).iter().copied());
                }
            }
        }

        // Nesting: the parent is the smallest other loop containing the header.
        let n = analysis.loops.len();
        for i in 0..n {
            let header = analysis.loops[i].header;
            analysis.loops[i].parent = (0..n)
                .filter(|&j| j != i && analysis.loops[j].contains(header))
                .min_by_key(|&j| analysis.loops[j].body.len());
        }
        for i in 0..n {
            let mut depth = 1;
            let mut current = analysis.loops[i].parent;
            while let Some(p) = current {
                depth += 1;
                current = analysis.loops[p].parent;
            }
            analysis.loops[i].depth = depth;
        }

        for (idx, lp) in analysis.loops.iter().enumerate() {
            for &block in &lp.body {
                let replace = match analysis.block_to_loop.get(&block) {
                    Some(&other) => analysis.loops[other].body.len() > lp.body.len(),
                    None => true,
                };
                if replace {
                    analysis.block_to_loop.insert(block, idx);
                }
            }
        }
        analysis
    }

    /// Innermost loop containing a block.
    pub fn loop_for_block(&self, block: BlockId) -> Option<&Loop> {
        self.block_to_loop.get(&block).map(|&idx| &self.loops[idx])
    }

    /// Check if a block is in any loop.
    pub fn is_in_loop(&self, block: BlockId) -> bool {
        self.block_to_loop.contains_key(&block)
    }

    /// Loops containing a block, innermost first.
    pub fn enclosing_loops(&self, block: BlockId) -> Vec<&Loop> {
        let mut result = Vec::new();
        let mut current = self.block_to_loop.get(&block).copied();
        while let Some(idx) = current {
            result.push(&self.loops[idx]);
            current = self.loops[idx].parent;
        }
        result
    }
}

/// First retreating edge that is not a back edge, if any.
///
/// A CFG is reducible exactly when every retreating edge of a depth-first
/// order targets a block dominating its source.
pub fn find_irreducible_edge(cfg: &Cfg, dom: &DominatorTree) -> Option<(BlockId, BlockId)> {
    cfg.retreating_edges()
        .into_iter()
        .find(|&(from, to)| !dom.dominates(to, from))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::function::ParamAttrs;
    use crate::types::Type;

    /// entry -> (then | else) -> join
    fn diamond() -> (Function, [BlockId; 4]) {
        let mut func = Function::new("diamond", Type::VOID);
        let c = func.add_param("c", Type::BOOL, ParamAttrs::empty());
        let entry = func.add_block("entry");
        let then_b = func.add_block("then");
        let else_b = func.add_block("else");
        let join = func.add_block("join");
        Builder::at_end(&mut func, entry).cond_br(c, then_b, else_b);
        Builder::at_end(&mut func, then_b).br(join);
        Builder::at_end(&mut func, else_b).br(join);
        Builder::at_end(&mut func, join).ret(None);
        (func, [entry, then_b, else_b, join])
    }

    /// entry -> header <-> body, header -> exit
    fn simple_loop() -> (Function, [BlockId; 4]) {
        let mut func = Function::new("loop", Type::VOID);
        let c = func.add_param("c", Type::BOOL, ParamAttrs::empty());
        let entry = func.add_block("entry");
        let header = func.add_block("header");
        let body = func.add_block("body");
        let exit = func.add_block("exit");
        Builder::at_end(&mut func, entry).br(header);
        Builder::at_end(&mut func, header).cond_br(c, body, exit);
        Builder::at_end(&mut func, body).br(header);
        Builder::at_end(&mut func, exit).ret(None);
        (func, [entry, header, body, exit])
    }

    #[test]
    fn test_rpo_and_preds() {
        let (func, [entry, then_b, else_b, join]) = diamond();
        let cfg = Cfg::build(&func);
        assert_eq!(cfg.rpo()[0], entry);
        assert_eq!(*cfg.rpo().last().expect("non-empty"), join);
        assert_eq!(cfg.predecessors(join).len(), 2);
        assert!(cfg.predecessors(join).contains(&then_b));
        assert!(cfg.predecessors(join).contains(&else_b));
        assert_eq!(cfg.exits(), &[join]);
    }

    #[test]
    fn test_dominators_diamond() {
        let (func, [entry, then_b, else_b, join]) = diamond();
        let cfg = Cfg::build(&func);
        let dom = DominatorTree::build(&cfg);
        assert_eq!(dom.idom(join), Some(entry));
        assert_eq!(dom.idom(then_b), Some(entry));
        assert!(dom.dominates(entry, else_b));
        assert!(!dom.dominates(then_b, join));
        assert_eq!(dom.depth(join), 1);
        assert_eq!(dom.children(entry).len(), 3);
    }

    #[test]
    fn test_post_dominators_diamond() {
        let (func, [entry, then_b, else_b, join]) = diamond();
        let cfg = Cfg::build(&func);
        let pdom = PostDominatorTree::build(&cfg);
        assert_eq!(pdom.ipdom(entry), Some(join));
        assert_eq!(pdom.ipdom(then_b), Some(join));
        assert_eq!(pdom.ipdom(join), None);
        assert!(pdom.post_dominates(join, else_b));
        assert!(!pdom.post_dominates(then_b, entry));
    }

    #[test]
    fn test_post_dominators_two_exits() {
        let mut func = Function::new("two_exits", Type::VOID);
        let c = func.add_param("c", Type::BOOL, ParamAttrs::empty());
        let entry = func.add_block("entry");
        let a = func.add_block("a");
        let b = func.add_block("b");
        Builder::at_end(&mut func, entry).cond_br(c, a, b);
        Builder::at_end(&mut func, a).ret(None);
        Builder::at_end(&mut func, b).unreachable();

        let cfg = Cfg::build(&func);
        assert_eq!(cfg.exits().len(), 2);
        let pdom = PostDominatorTree::build(&cfg);
        assert_eq!(pdom.ipdom(entry), None);
        assert!(pdom.post_dominates(a, a));
    }

    #[test]
    fn test_loop_detection() {
        let (func, [entry, header, body, exit]) = simple_loop();
        let cfg = Cfg::build(&func);
        let dom = DominatorTree::build(&cfg);
        let loops = LoopAnalysis::compute(&cfg, &dom);

        assert_eq!(loops.loops.len(), 1);
        let lp = loops.loop_for_block(body).expect("body is in the loop");
        assert_eq!(lp.header, header);
        assert_eq!(lp.latches, vec![body]);
        assert!(!loops.is_in_loop(entry));
        assert!(!loops.is_in_loop(exit));
        assert!(find_irreducible_edge(&cfg, &dom).is_none());
    }

    #[test]
    fn test_irreducible_cycle() {
        // entry branches into the middle of a two-block cycle from both sides.
        let mut func = Function::new("irreducible", Type::VOID);
        let c = func.add_param("c", Type::BOOL, ParamAttrs::empty());
        let entry = func.add_block("entry");
        let a = func.add_block("a");
        let b = func.add_block("b");
        let exit = func.add_block("exit");
        Builder::at_end(&mut func, entry).cond_br(c, a, b);
        Builder::at_end(&mut func, a).cond_br(c, b, exit);
        Builder::at_end(&mut func, b).cond_br(c, a, exit);
        Builder::at_end(&mut func, exit).ret(None);

        let cfg = Cfg::build(&func);
        let dom = DominatorTree::build(&cfg);
        assert!(find_irreducible_edge(&cfg, &dom).is_some());
        assert!(LoopAnalysis::compute(&cfg, &dom).loops.is_empty());
    }

    #[test]
    fn test_unreachable_block_ignored() {
        let (mut func, [_, _, _, join]) = diamond();
        let orphan = func.add_block("orphan");
        Builder::at_end(&mut func, orphan).br(join);

        let cfg = Cfg::build(&func);
        assert!(!cfg.is_reachable(orphan));
        assert_eq!(cfg.predecessors(join).len(), 2);
        assert_eq!(cfg.len(), 4);
    }
}
