//! Submission of finalized command buffers.

use tracing::debug;

use crate::command_buffer::CommandBuffer;
use crate::emitter::{NodeEmitter, SubmissionQueue};
use crate::error::{GraphError, GraphResult};

impl<E: NodeEmitter> CommandBuffer<E> {
    /// Submit the compiled graph to `queue` after `wait_list` completes.
    pub fn enqueue<Q>(&self, queue: &Q, wait_list: &[Q::Signal]) -> GraphResult<()>
    where
        Q: SubmissionQueue<E>,
    {
        self.submit(queue, wait_list, false).map(|_| ())
    }

    /// Like [`enqueue`](Self::enqueue), returning a signal that completes
    /// when the whole graph has run.
    pub fn enqueue_with_signal<Q>(&self, queue: &Q, wait_list: &[Q::Signal]) -> GraphResult<Q::Signal>
    where
        Q: SubmissionQueue<E>,
    {
        self.submit(queue, wait_list, true)?
            .ok_or_else(|| GraphError::unknown("queue returned no completion signal"))
    }

    fn submit<Q>(
        &self,
        queue: &Q,
        wait_list: &[Q::Signal],
        want_signal: bool,
    ) -> GraphResult<Option<Q::Signal>>
    where
        Q: SubmissionQueue<E>,
    {
        self.inner.ensure_alive()?;
        let Some(exec) = self.inner.executable()? else {
            return Err(GraphError::invalid_operation(
                "command buffer must be finalized before it is enqueued",
            ));
        };
        if !wait_list.is_empty() {
            queue.wait_on(wait_list)?;
        }
        let signal = queue.submit(&exec, want_signal)?;
        debug!(buffer = self.inner.handle, waits = wait_list.len(), want_signal, "graph submitted");
        Ok(signal)
    }
}
