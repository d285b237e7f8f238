// core.rs splits responsibilities into submodules: blocks, wallet lists, anchors.
pub mod chain;
pub mod state;
pub mod validation;

pub use chain::*;
pub use state::*;
pub use validation::*;
