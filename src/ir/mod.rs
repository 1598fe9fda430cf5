pub mod builder;
pub mod format;
pub mod model;
pub mod types;

pub use builder::*;
pub use format::*;
pub use model::*;
pub use types::*;
