//! Gating predicates and backward data dependences.
//!
//! Gates capture the weak control dependence of merge blocks: the branch or
//! switch whose outcome decides which predecessor a multi-predecessor block
//! is entered from. The data-dependence walk joins SSA operand edges with
//! gates at PHI nodes, which is the only place control dependence re-enters
//! data flow.

use indexmap::{IndexMap, IndexSet};

use crate::analysis::cfg::Cfg;
use crate::analysis::dom::{DomTree, PostDomTree};
use crate::ir::model::{
    for_each_use, BlockId, DefSite, Function, InstKind, Terminator, ValueId,
};

/// The conditional terminator controlling entry into some block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gate {
    /// Block whose terminator is the gate.
    pub block: BlockId,
    /// The branch condition or switch scrutinee.
    pub cond: ValueId,
}

#[derive(Debug, Default)]
pub struct Gates {
    map: IndexMap<BlockId, Vec<Gate>>,
}

impl Gates {
    /// Computes the gate list for every multi-predecessor block.
    ///
    /// For a predecessor `P` of merge block `B`: if `P` dominates `B` and
    /// `B` does not post-dominate `P`, `P`'s own terminator is the gate.
    /// Otherwise the gate is the terminator of the nearest node on `P`'s
    /// dominator chain that `P` does not post-dominate (the remote
    /// controller), when one exists.
    pub fn compute(func: &Function, cfg: &Cfg, dom: &DomTree, pdom: &PostDomTree) -> Self {
        let mut map: IndexMap<BlockId, Vec<Gate>> = IndexMap::new();

        for &block in cfg.blocks() {
            let preds = cfg.preds(block);
            if preds.len() <= 1 {
                continue;
            }

            let mut gates = Vec::new();
            for &pred in preds {
                let controller = if dom.dominates(pred, block) && !pdom.post_dominates(block, pred)
                {
                    Some(pred)
                } else {
                    let mut cand = Some(pred);
                    while let Some(node) = cand {
                        if !pdom.post_dominates(pred, node) {
                            break;
                        }
                        cand = dom.idom(node);
                    }
                    cand
                };

                if let Some(gate) = controller.and_then(|c| gate_of(func, c)) {
                    if !gates.contains(&gate) {
                        gates.push(gate);
                    }
                }
            }
            map.insert(block, gates);
        }

        Self { map }
    }

    pub fn of(&self, block: BlockId) -> &[Gate] {
        self.map.get(&block).map(|g| g.as_slice()).unwrap_or(&[])
    }
}

/// The gate contributed by a block's terminator, if it is conditional.
fn gate_of(func: &Function, block: BlockId) -> Option<Gate> {
    match &func.block(block).term {
        Terminator::CondBr { cond, .. } => Some(Gate {
            block,
            cond: *cond,
        }),
        Terminator::Switch { value, .. } => Some(Gate {
            block,
            cond: *value,
        }),
        _ => None,
    }
}

/// Everything the value of one instruction transitively depends on.
#[derive(Debug, Default)]
pub struct DataDeps {
    /// Values defined by caller instructions, in discovery order.
    pub insts: IndexSet<ValueId>,
    /// Caller formal parameters reached by the walk.
    pub args: IndexSet<ValueId>,
    /// Blocks containing slice instructions or reached via PHI traversal.
    pub blocks: IndexSet<BlockId>,
    /// Blocks whose terminator was pulled in as a gate.
    pub gate_terms: IndexSet<BlockId>,
}

/// Breadth-first walk over SSA operand edges starting at `initial`.
///
/// PHIs pull in all their incoming blocks plus the gates of their parent
/// block; constants and values of other functions end the walk.
pub fn data_deps(
    func: &Function,
    initial: ValueId,
    gates: &Gates,
    def_sites: &IndexMap<ValueId, DefSite>,
) -> DataDeps {
    let mut deps = DataDeps::default();
    let mut visited: IndexSet<ValueId> = IndexSet::new();
    let mut queue: std::collections::VecDeque<ValueId> = std::collections::VecDeque::new();

    visited.insert(initial);
    queue.push_back(initial);

    while let Some(value) = queue.pop_front() {
        match def_sites.get(&value) {
            Some(DefSite::Param(_)) => {
                deps.args.insert(value);
            }
            Some(DefSite::Inst { block, index }) => {
                deps.insts.insert(value);
                deps.blocks.insert(*block);

                let inst = &func.block(*block).insts[*index];
                for_each_use(&inst.kind, |used| {
                    if def_sites.contains_key(&used) && visited.insert(used) {
                        queue.push_back(used);
                    }
                });

                if let InstKind::Phi { incomings } = &inst.kind {
                    for (incoming, _) in incomings {
                        deps.blocks.insert(*incoming);
                    }
                    for gate in gates.of(*block) {
                        deps.blocks.insert(gate.block);
                        deps.gate_terms.insert(gate.block);
                        if visited.insert(gate.cond) {
                            queue.push_back(gate.cond);
                        }
                    }
                }
            }
            None => {}
        }
    }

    deps
}
