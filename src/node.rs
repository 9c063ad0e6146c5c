//! Nodes and the per-cycle claim state machine.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Weak};

use atomic_enum::atomic_enum;

use crate::error::Result;
use crate::graph::Graph;

/// Where a node stands in the current processing cycle.
///
/// ```text
///             claim (CAS)            run ok
///   READY ------------------> PENDING ------> FINISHED
///     ^                         |  |
///     |   rollback (no queue)   |  | run failed / panicked
///     +-------------------------+  +---------> ERROR
/// ```
///
/// `FINISHED` and `ERROR` are terminal within a cycle; [`Graph::reset`] moves
/// every node back to `READY` between cycles.
#[atomic_enum]
pub enum NodeState {
    Ready,
    Pending,
    Finished,
    Error,
}

type ProcessFn = dyn Fn() -> Result<()> + Send + Sync;

/// A computation in the graph: a callback plus the claim state that
/// guarantees it runs at most once per cycle.
///
/// The callback typically captures the sockets of the structure that owns
/// the node, reads its inputs with [`get_buffers`] and fills its outputs
/// with [`Socket::alloc_buffer`].
///
/// [`get_buffers`]: crate::get_buffers
/// [`Socket::alloc_buffer`]: crate::Socket::alloc_buffer
pub struct Node {
    graph: Weak<Graph>,
    process: Box<ProcessFn>,
    state: AtomicNodeState,
}

impl Node {
    /// Creates a node and registers it with `graph`.
    ///
    /// The graph keeps only a weak reference; the returned handle is the
    /// node's ownership.
    pub fn new(
        graph: &Arc<Graph>,
        process: impl Fn() -> Result<()> + Send + Sync + 'static,
    ) -> Arc<Self> {
        let node = Arc::new(Node {
            graph: Arc::downgrade(graph),
            process: Box::new(process),
            state: AtomicNodeState::new(NodeState::Ready),
        });
        graph.register(Arc::downgrade(&node));
        node
    }

    pub fn state(&self) -> NodeState {
        self.state.load(Ordering::Acquire)
    }

    /// Removes the node from its graph's registry. Idempotent; also happens
    /// automatically when the last handle is dropped.
    pub fn unlink(&self) {
        if let Some(graph) = self.graph.upgrade() {
            graph.unregister(self as *const Node);
        }
    }

    pub(crate) fn graph(&self) -> Option<Arc<Graph>> {
        self.graph.upgrade()
    }

    /// Claims the node for this cycle. On failure returns the state that was
    /// observed instead of `READY`.
    pub(crate) fn claim(&self) -> std::result::Result<(), NodeState> {
        self.state
            .compare_exchange(
                NodeState::Ready,
                NodeState::Pending,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map(|_| ())
    }

    pub(crate) fn reset(&self) {
        self.state.store(NodeState::Ready, Ordering::Release);
    }

    /// Executes the callback and publishes the outcome.
    ///
    /// Only the claimant that moved the node to `PENDING` may call this. The
    /// release store pairs with the acquire load in waiters, so a thread that
    /// observes `FINISHED` also observes every buffer the callback published.
    /// A panicking callback is recorded as `ERROR` rather than poisoning the
    /// cycle with a node stuck in `PENDING`.
    pub(crate) fn run(&self) {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.process)()));
        let state = match outcome {
            Ok(Ok(())) => NodeState::Finished,
            Ok(Err(err)) => {
                log::error!("process callback failed: {err}");
                NodeState::Error
            }
            Err(_) => {
                log::error!("process callback panicked");
                NodeState::Error
            }
        };
        self.state.store(state, Ordering::Release);
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        self.unlink();
    }
}
