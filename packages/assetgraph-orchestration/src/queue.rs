use std::future::Future;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};

use crate::error::Result;

/// An opaque asynchronous unit of work.
pub type Task<T> = BoxFuture<'static, T>;

/// Box a future into a queueable task.
pub fn task<T>(fut: impl Future<Output = T> + Send + 'static) -> Task<T> {
    Box::pin(fut)
}

/// A work queue drained to a fixed point: tasks complete in whatever order
/// their awaited work finishes, and the completion handler may enqueue
/// follow-on tasks. `drain` returns only when no queued or newly-added task
/// remains.
///
/// The handler runs on the driver task between completions, so everything it
/// touches is mutated by exactly one logical owner. The awaited work inside
/// the tasks is the only genuinely concurrent part.
pub struct WorkQueue<T> {
    tasks: FuturesUnordered<Task<T>>,
}

impl<T> WorkQueue<T> {
    pub fn new() -> Self {
        Self {
            tasks: FuturesUnordered::new(),
        }
    }

    pub fn push(&mut self, fut: impl Future<Output = T> + Send + 'static) {
        self.tasks.push(Box::pin(fut));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run until the queue is empty of both already-queued and newly-added
    /// tasks. A handler error aborts the drain immediately; outstanding
    /// tasks are dropped.
    pub async fn drain<F>(&mut self, mut on_complete: F) -> Result<()>
    where
        F: FnMut(T) -> Result<Vec<Task<T>>>,
    {
        while let Some(outcome) = self.tasks.next().await {
            for follow_on in on_complete(outcome)? {
                self.tasks.push(follow_on);
            }
        }
        Ok(())
    }
}

impl<T> Default for WorkQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}
