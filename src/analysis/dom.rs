//! Dominator and post-dominator trees.
//!
//! Both trees use the iterative RPO scheme over the CFG (post-dominators
//! over the reversed CFG with a virtual exit, so functions with multiple
//! or no return blocks are handled uniformly).

use indexmap::IndexMap;

use crate::analysis::cfg::Cfg;
use crate::ir::model::BlockId;

pub struct DomTree {
    entry: BlockId,
    idom: IndexMap<BlockId, Option<BlockId>>,
    children: IndexMap<BlockId, Vec<BlockId>>,
}

impl DomTree {
    pub fn build(cfg: &Cfg) -> Self {
        let num = cfg.blocks().len();
        let mut preds = vec![Vec::new(); num];
        for &block in cfg.blocks() {
            let idx = cfg.index(block);
            preds[idx] = cfg.preds(block).iter().map(|p| cfg.index(*p)).collect();
        }
        let rpo: Vec<usize> = cfg.rpo().iter().map(|b| cfg.index(*b)).collect();
        let entry_idx = cfg.index(cfg.entry());
        let idoms = compute_idoms(num, entry_idx, &preds, &rpo);

        let mut idom = IndexMap::with_capacity(num);
        let mut children: IndexMap<BlockId, Vec<BlockId>> = IndexMap::with_capacity(num);
        for &block in cfg.blocks() {
            children.entry(block).or_default();
        }
        for &block in cfg.blocks() {
            let parent = idoms[cfg.index(block)].map(|i| cfg.blocks()[i]);
            idom.insert(block, parent);
            if let Some(parent) = parent {
                children.entry(parent).or_default().push(block);
            }
        }

        Self {
            entry: cfg.entry(),
            idom,
            children,
        }
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// Immediate dominator, `None` for the entry and unreachable blocks.
    pub fn idom(&self, block: BlockId) -> Option<BlockId> {
        self.idom.get(&block).copied().flatten()
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        block == self.entry || self.idom(block).is_some()
    }

    /// Dominator-tree children, in CFG block order.
    pub fn children(&self, block: BlockId) -> &[BlockId] {
        self.children
            .get(&block)
            .map(|c| c.as_slice())
            .unwrap_or(&[])
    }

    /// Whether `a` dominates `b`. A node dominates itself.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.is_reachable(b) {
            return false;
        }
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.idom(cur) {
                Some(parent) => cur = parent,
                None => return false,
            }
        }
    }
}

pub struct PostDomTree {
    ipdom: IndexMap<BlockId, Option<BlockId>>,
}

impl PostDomTree {
    pub fn build(cfg: &Cfg) -> Self {
        let num = cfg.blocks().len();
        let virtual_exit = num;

        // Reversed graph: preds of a node are its original successors; exit
        // blocks additionally have the virtual exit as predecessor.
        let mut preds = vec![Vec::new(); num + 1];
        let mut exits = Vec::new();
        for &block in cfg.blocks() {
            let idx = cfg.index(block);
            preds[idx] = cfg.succs(block).iter().map(|s| cfg.index(*s)).collect();
            if cfg.succs(block).is_empty() {
                preds[idx].push(virtual_exit);
                exits.push(idx);
            }
        }

        // Postorder of the reversed graph from the virtual exit.
        let mut rsuccs = vec![Vec::new(); num + 1];
        for &block in cfg.blocks() {
            let idx = cfg.index(block);
            rsuccs[idx] = cfg.preds(block).iter().map(|p| cfg.index(*p)).collect();
        }
        rsuccs[virtual_exit] = exits;

        let mut visited = vec![false; num + 1];
        let mut postorder = Vec::new();
        reverse_dfs(virtual_exit, &rsuccs, &mut visited, &mut postorder);
        postorder.reverse();

        let idoms = compute_idoms(num + 1, virtual_exit, &preds, &postorder);

        let mut ipdom = IndexMap::with_capacity(num);
        for &block in cfg.blocks() {
            let parent = match idoms[cfg.index(block)] {
                Some(i) if i != virtual_exit => Some(cfg.blocks()[i]),
                _ => None,
            };
            ipdom.insert(block, parent);
        }

        Self { ipdom }
    }

    /// Immediate post-dominator, `None` when it is the virtual exit.
    pub fn ipdom(&self, block: BlockId) -> Option<BlockId> {
        self.ipdom.get(&block).copied().flatten()
    }

    /// Whether `a` post-dominates `b`. A node post-dominates itself.
    pub fn post_dominates(&self, a: BlockId, b: BlockId) -> bool {
        let mut cur = b;
        loop {
            if cur == a {
                return true;
            }
            match self.ipdom(cur) {
                Some(parent) => cur = parent,
                None => return false,
            }
        }
    }
}

fn reverse_dfs(node: usize, succs: &[Vec<usize>], visited: &mut [bool], order: &mut Vec<usize>) {
    if visited[node] {
        return;
    }
    visited[node] = true;
    for &succ in &succs[node] {
        reverse_dfs(succ, succs, visited, order);
    }
    order.push(node);
}

/// Iterative idom computation over an index graph in reverse postorder.
fn compute_idoms(
    num_nodes: usize,
    entry: usize,
    preds: &[Vec<usize>],
    rpo: &[usize],
) -> Vec<Option<usize>> {
    let mut order = vec![usize::MAX; num_nodes];
    for (pos, &node) in rpo.iter().enumerate() {
        order[node] = pos;
    }

    let mut idom: Vec<Option<usize>> = vec![None; num_nodes];
    idom[entry] = Some(entry);

    let mut changed = true;
    while changed {
        changed = false;
        for &node in rpo {
            if node == entry {
                continue;
            }
            let mut new_idom = None;
            for &pred in &preds[node] {
                if idom[pred].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => pred,
                    Some(cur) => intersect(pred, cur, &idom, &order),
                });
            }
            if let Some(new_idom) = new_idom {
                if idom[node] != Some(new_idom) {
                    idom[node] = Some(new_idom);
                    changed = true;
                }
            }
        }
    }

    idom[entry] = None;
    idom
}

fn intersect(mut a: usize, mut b: usize, idom: &[Option<usize>], order: &[usize]) -> usize {
    while a != b {
        while order[a] > order[b] {
            a = idom[a].expect("intersect walked past the entry");
        }
        while order[b] > order[a] {
            b = idom[b].expect("intersect walked past the entry");
        }
    }
    a
}
