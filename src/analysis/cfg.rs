//! Control-flow graph for a single function.

use std::collections::HashMap;

use crate::ir::model::{BlockId, Function};

pub struct Cfg {
    entry: BlockId,
    blocks: Vec<BlockId>,
    preds: Vec<Vec<BlockId>>,
    succs: Vec<Vec<BlockId>>,
    index_map: HashMap<BlockId, usize>,
}

impl Cfg {
    pub fn new(func: &Function) -> Self {
        let mut blocks = Vec::with_capacity(func.blocks.len());
        let mut index_map = HashMap::with_capacity(func.blocks.len());
        for (idx, block) in func.blocks.iter().enumerate() {
            blocks.push(block.id);
            index_map.insert(block.id, idx);
        }

        let entry = blocks.first().copied().unwrap_or(BlockId(0));
        let mut preds = vec![Vec::new(); blocks.len()];
        let mut succs = vec![Vec::new(); blocks.len()];

        for block in &func.blocks {
            let idx = index_map[&block.id];
            let mut block_succs = Vec::new();
            for succ in block.term.successors() {
                push_unique(&mut block_succs, succ);
            }

            for succ in &block_succs {
                let succ_idx = index_map[succ];
                push_unique(&mut preds[succ_idx], block.id);
            }

            succs[idx] = block_succs;
        }

        Self {
            entry,
            blocks,
            preds,
            succs,
            index_map,
        }
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn blocks(&self) -> &[BlockId] {
        &self.blocks
    }

    pub fn index(&self, block: BlockId) -> usize {
        *self
            .index_map
            .get(&block)
            .unwrap_or_else(|| panic!("cfg missing block {:?}", block))
    }

    pub fn preds(&self, block: BlockId) -> &[BlockId] {
        &self.preds[self.index(block)]
    }

    pub fn succs(&self, block: BlockId) -> &[BlockId] {
        &self.succs[self.index(block)]
    }

    /// Returns reverse postorder for the reachable portion of the CFG.
    pub fn rpo(&self) -> Vec<BlockId> {
        let mut order = self.postorder();
        order.reverse();
        order
    }

    /// Returns postorder for the reachable portion of the CFG.
    pub fn postorder(&self) -> Vec<BlockId> {
        let mut visited = vec![false; self.blocks.len()];
        let mut order = Vec::new();
        self.dfs(self.entry, &mut visited, &mut order);
        order
    }

    fn dfs(&self, block: BlockId, visited: &mut [bool], order: &mut Vec<BlockId>) {
        let idx = self.index(block);
        if visited[idx] {
            return;
        }
        visited[idx] = true;

        for succ in self.succs(block) {
            self.dfs(*succ, visited, order);
        }

        order.push(block);
    }
}

fn push_unique(list: &mut Vec<BlockId>, block: BlockId) {
    if !list.contains(&block) {
        list.push(block);
    }
}
