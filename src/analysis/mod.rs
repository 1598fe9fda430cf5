//! Control-flow analyses: CFG, dominators, post-dominators, loops.

pub mod cfg;
pub mod dom;
pub mod loops;

pub use cfg::Cfg;
pub use dom::{DomTree, PostDomTree};
pub use loops::LoopInfo;

#[cfg(test)]
#[path = "../tests/analysis/t_cfg.rs"]
mod t_cfg;
#[cfg(test)]
#[path = "../tests/analysis/t_dom.rs"]
mod t_dom;
#[cfg(test)]
#[path = "../tests/analysis/t_loops.rs"]
mod t_loops;
