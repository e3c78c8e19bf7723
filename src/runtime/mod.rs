pub mod drivers;
pub mod executor;

pub use drivers::Drivers;
pub use executor::{ComponentSet, ExecutorError, PipelineExecutor};
