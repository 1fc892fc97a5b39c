pub mod config;
pub mod core;
pub mod error;
pub mod log;
pub mod orchestration;
pub mod util;

pub use error::{Error, Result};
pub use crate::core::{load_graph, Graph, StructuralError};
pub use orchestration::{GraphExecutor, RunResult};
