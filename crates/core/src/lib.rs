#![forbid(unsafe_code)]

mod classify;
mod flow;
mod queue;
mod rules;
mod stats;
mod types;

pub use classify::*;
pub use flow::*;
pub use queue::*;
pub use rules::*;
pub use stats::*;
pub use types::*;
