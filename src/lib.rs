//! Lazification of function arguments at the IR level.
//!
//! Turns eagerly evaluated call arguments into thunks: the argument's
//! backward program slice is outlined into a standalone function, the
//! callee is cloned with uses of the parameter replaced by forcing calls,
//! and the call site allocates a thunk record carrying the function
//! pointer and captured arguments.

pub mod analysis;
pub mod ir;
pub mod lazify;
pub mod verify;
