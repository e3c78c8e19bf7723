use std::sync::{Arc, Weak};

use crate::shell::PipelineHandle;

/// Shared state of the HTTP shell's routes
#[derive(Clone)]
pub struct ShellState {
    pub pipeline: Weak<dyn PipelineHandle>,
    /// Route serving the wire-format result
    pub endpoint: String,
}

impl ShellState {
    pub fn new(pipeline: Weak<dyn PipelineHandle>, endpoint: impl Into<String>) -> Self {
        Self {
            pipeline,
            endpoint: endpoint.into(),
        }
    }

    /// The pipeline, unless it has been dropped
    pub fn pipeline(&self) -> Option<Arc<dyn PipelineHandle>> {
        self.pipeline.upgrade()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::mock::MockPipeline;
    use crate::shell::ExecutionOutput;

    #[test]
    fn test_pipeline_is_weak() {
        let pipeline = MockPipeline::new(ExecutionOutput::Skipped);
        let state = ShellState::new(pipeline.weak(), "/get_frame");
        assert!(state.pipeline().is_some());

        drop(pipeline);
        assert!(state.pipeline().is_none());
    }
}
