//! Natural-loop detection and per-block loop depth.

use indexmap::{IndexMap, IndexSet};

use crate::analysis::cfg::Cfg;
use crate::analysis::dom::DomTree;
use crate::ir::model::BlockId;

pub struct LoopInfo {
    depth: IndexMap<BlockId, u32>,
}

impl LoopInfo {
    pub fn build(cfg: &Cfg, dom: &DomTree) -> Self {
        // A back edge is an edge whose target dominates its source; the loop
        // body is everything that reaches the latch without passing the header.
        let mut bodies: IndexMap<BlockId, IndexSet<BlockId>> = IndexMap::new();
        for &block in cfg.blocks() {
            for &succ in cfg.succs(block) {
                if !dom.dominates(succ, block) {
                    continue;
                }
                let body = bodies.entry(succ).or_default();
                body.insert(succ);
                let mut stack = vec![block];
                while let Some(node) = stack.pop() {
                    if body.insert(node) {
                        for &pred in cfg.preds(node) {
                            stack.push(pred);
                        }
                    }
                }
            }
        }

        let mut depth: IndexMap<BlockId, u32> = cfg.blocks().iter().map(|&b| (b, 0)).collect();
        for body in bodies.values() {
            for block in body {
                *depth.entry(*block).or_default() += 1;
            }
        }

        Self { depth }
    }

    /// Nesting depth of a block; 0 outside any loop.
    pub fn depth(&self, block: BlockId) -> u32 {
        self.depth.get(&block).copied().unwrap_or(0)
    }
}
