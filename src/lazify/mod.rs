//! The lazification pass.
//!
//! For each candidate call site, slices the argument's computation out of
//! the caller, outlines it into a thunk body, clones the callee with
//! forcing calls, and rewires the call to pass a stack-allocated thunk
//! record. Candidates are independent: a refusal leaves the module
//! untouched and never aborts the pass.

pub mod deps;
pub mod outline;
pub mod rewrite;
pub mod slice;

use indexmap::IndexSet;
use log::debug;
use thiserror::Error;

use crate::analysis::cfg::Cfg;
use crate::analysis::dom::{DomTree, PostDomTree};
use crate::analysis::loops::LoopInfo;
use crate::ir::model::{BlockId, Callee, DefSite, FuncId, InstKind, Module, ValueId};
use crate::lazify::slice::{ProgramSlice, Reject};
use crate::verify::VerifyError;

#[derive(Debug, Clone)]
pub struct LazifyConfig {
    /// Call-by-need when set (the default), call-by-name otherwise.
    pub memoization: bool,
    /// First value of the symbol-name nonce; tests pin this for
    /// reproducible names.
    pub nonce_seed: u64,
}

impl Default for LazifyConfig {
    fn default() -> Self {
        Self {
            memoization: true,
            nonce_seed: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LazifyStats {
    pub callsites_lazified: u32,
    pub functions_lazified: u32,
    pub largest_slice: u32,
    pub smallest_slice: u32,
    pub total_slice: u32,
}

/// Stable handle for a call site: the n-th call instruction of a function
/// in program order. The rewrite inserts no calls into existing functions,
/// so handles survive earlier candidates in the same run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallSiteId {
    pub func: FuncId,
    pub call_index: usize,
}

/// Input from the upstream profitability analysis.
#[derive(Debug, Default)]
pub struct LazifyCandidates {
    /// `(call site, argument index)` pairs to attempt.
    pub call_sites: Vec<(CallSiteId, usize)>,
    /// `(callee, argument index)` pairs deemed safe to lazify; call sites
    /// whose callee/index is not in this set are ignored.
    pub safe_args: IndexSet<(FuncId, usize)>,
}

/// Why a candidate was skipped. All are local: the module is unchanged.
#[derive(Debug, Error)]
pub enum SkipReason {
    #[error("call site {index} of {func:?} does not exist")]
    UnknownCallSite { func: FuncId, index: usize },
    #[error("call is through a function pointer")]
    IndirectCallee,
    #[error("argument index {0} out of range")]
    ArgIndex(usize),
    #[error("argument is not produced by an instruction")]
    NotAnInstruction,
    #[error("callee merges the lazified parameter in a phi")]
    PhiUse,
    #[error("slice is not outlineable: {0}")]
    NotOutlineable(#[from] Reject),
    #[error("thunk body failed verification: {0}")]
    Verify(#[from] VerifyError),
}

pub struct Lazifier {
    config: LazifyConfig,
    stats: LazifyStats,
    /// `(caller, initial)` pairs already lazified, for the function count.
    lazified: IndexSet<(FuncId, ValueId)>,
    nonce: u64,
}

impl Lazifier {
    pub fn new(config: LazifyConfig) -> Self {
        let nonce = config.nonce_seed;
        Self {
            config,
            stats: LazifyStats {
                smallest_slice: u32::MAX,
                ..LazifyStats::default()
            },
            lazified: IndexSet::new(),
            nonce,
        }
    }

    pub fn stats(&self) -> &LazifyStats {
        &self.stats
    }

    /// Attempts every candidate whose callee/index is in the safe set.
    /// Returns whether the module changed.
    pub fn run(&mut self, module: &mut Module, candidates: &LazifyCandidates) -> bool {
        let mut changed = false;
        for &(site, index) in &candidates.call_sites {
            let callee = match resolve_call(module, site) {
                Ok(resolved) => resolved.callee,
                Err(reason) => {
                    debug!("skipping candidate {:?} arg {}: {}", site, index, reason);
                    continue;
                }
            };
            if !candidates.safe_args.contains(&(callee, index)) {
                continue;
            }
            match self.lazify_call_site(module, site, index) {
                Ok(()) => changed = true,
                Err(reason) => {
                    debug!("skipping candidate {:?} arg {}: {}", site, index, reason);
                }
            }
        }
        if self.stats.smallest_slice == u32::MAX {
            self.stats.smallest_slice = 0;
        }
        changed
    }

    /// Lazifies a single candidate, or leaves the module untouched.
    pub fn lazify_call_site(
        &mut self,
        module: &mut Module,
        site: CallSiteId,
        index: usize,
    ) -> Result<(), SkipReason> {
        let resolved = resolve_call(module, site)?;
        let caller_id = site.func;
        let caller = module.func(caller_id);

        let InstKind::Call { args, .. } = &caller.block(resolved.block).insts[resolved.index].kind
        else {
            return Err(SkipReason::UnknownCallSite {
                func: site.func,
                index: site.call_index,
            });
        };
        let &initial = args.get(index).ok_or(SkipReason::ArgIndex(index))?;

        match caller.def_sites().get(&initial) {
            Some(DefSite::Inst { .. }) => {}
            _ => return Err(SkipReason::NotAnInstruction),
        }

        // A forcing call cannot be inserted ahead of a phi, so refuse such
        // callees before touching the module.
        let callee_func = module.func(resolved.callee);
        let callee_param = callee_func
            .params
            .get(index)
            .ok_or(SkipReason::ArgIndex(index))?
            .value
            .id;
        for block in &callee_func.blocks {
            for inst in &block.insts {
                if let InstKind::Phi { incomings } = &inst.kind {
                    if incomings.iter().any(|(_, value)| *value == callee_param) {
                        return Err(SkipReason::PhiUse);
                    }
                }
            }
        }

        let cfg = Cfg::new(caller);
        let dom = DomTree::build(&cfg);
        let pdom = PostDomTree::build(&cfg);
        let loops = LoopInfo::build(&cfg, &dom);

        let slice = ProgramSlice::build(
            module,
            caller_id,
            initial,
            resolved.block,
            &cfg,
            &dom,
            &pdom,
        );
        slice.log_slice(caller);
        slice.can_outline(module, &loops)?;

        let memo = self.config.memoization;
        let nonce = self.next_nonce();
        let thunk = outline::outline(module, &slice, memo, nonce)?;
        let new_callee = rewrite::clone_callee(module, resolved.callee, index, &thunk, memo);
        rewrite::rewrite_call_site(
            module,
            caller_id,
            resolved.block,
            resolved.index,
            index,
            &slice.dep_args,
            &thunk,
            new_callee,
            memo,
        );

        debug!(
            "lazified arg {} of call to {} in {}",
            index,
            module.func(resolved.callee).name,
            module.func(caller_id).name
        );

        self.stats.callsites_lazified += 1;
        if self.lazified.insert((caller_id, initial)) {
            self.stats.functions_lazified += 1;
        }
        let size = slice.len() as u32;
        self.stats.total_slice += size;
        self.stats.largest_slice = self.stats.largest_slice.max(size);
        self.stats.smallest_slice = self.stats.smallest_slice.min(size);

        Ok(())
    }

    fn next_nonce(&mut self) -> u64 {
        let nonce = self.nonce;
        self.nonce += 1;
        nonce
    }
}

struct ResolvedCall {
    block: BlockId,
    index: usize,
    callee: FuncId,
}

fn resolve_call(module: &Module, site: CallSiteId) -> Result<ResolvedCall, SkipReason> {
    let func = module
        .funcs
        .get(site.func.index())
        .ok_or(SkipReason::UnknownCallSite {
            func: site.func,
            index: site.call_index,
        })?;

    let mut seen = 0;
    for block in &func.blocks {
        for (index, inst) in block.insts.iter().enumerate() {
            if let InstKind::Call { callee, .. } = &inst.kind {
                if seen == site.call_index {
                    let Callee::Direct(callee) = callee else {
                        return Err(SkipReason::IndirectCallee);
                    };
                    return Ok(ResolvedCall {
                        block: block.id,
                        index,
                        callee: *callee,
                    });
                }
                seen += 1;
            }
        }
    }

    Err(SkipReason::UnknownCallSite {
        func: site.func,
        index: site.call_index,
    })
}

#[cfg(test)]
#[path = "../tests/lazify/mod.rs"]
mod tests;
