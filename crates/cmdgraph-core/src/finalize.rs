//! One-way compilation of a recorded graph into its executable form.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::command_buffer::CommandBuffer;
use crate::emitter::NodeEmitter;
use crate::error::{GraphError, GraphResult, poisoned};

impl<E: NodeEmitter> CommandBuffer<E> {
    /// Instantiate the recorded graph.
    ///
    /// Succeeds at most once. A second call fails with `InvalidOperation`
    /// and leaves the first executable in place; so does any call after a
    /// failed instantiate.
    pub fn finalize(&self) -> GraphResult<()> {
        let mut rec = self.inner.lock_recording()?;
        if self.inner.is_finalized()? {
            return Err(GraphError::invalid_operation("command buffer is already finalized"));
        }
        if rec.finalize_attempted {
            return Err(GraphError::invalid_operation(
                "a previous finalize of this command buffer failed",
            ));
        }
        rec.finalize_attempted = true;

        let started = Instant::now();
        let graph = rec.graph_mut()?;
        let exec = match self.inner.emitter.instantiate(graph) {
            Ok(exec) => exec,
            Err(e) => {
                warn!(buffer = self.inner.handle, error = %e, "graph instantiation failed");
                return Err(GraphError::unknown(format!("graph instantiation failed: {e}")));
            }
        };
        *self.inner.executable.write().map_err(poisoned)? = Some(Arc::new(exec));
        info!(
            buffer = self.inner.handle,
            sync_points = rec.sync_points.len(),
            commands = rec.commands.len(),
            elapsed_us = started.elapsed().as_micros() as u64,
            "command buffer finalized"
        );
        Ok(())
    }
}
