//! The graph: a node registry and the shared ready queue.

use std::sync::{Arc, Weak};

use arc_swap::ArcSwap;
use crossbeam_queue::SegQueue;

use crate::node::Node;
use crate::set::WeakSet;

/// A container of processing nodes and the work queue they are drained
/// through.
///
/// The registry holds only weak references, so dropping the last strong
/// handle to a node removes it regardless of what the graph thinks; strong
/// ownership of nodes belongs to client code. The queue, in contrast, holds
/// strong handles: a node claimed for a cycle stays alive until some thread
/// has run it.
pub struct Graph {
    nodes: ArcSwap<WeakSet<Node>>,
    queue: SegQueue<Arc<Node>>,
}

impl Graph {
    pub fn new() -> Arc<Self> {
        Arc::new(Graph {
            nodes: ArcSwap::from_pointee(WeakSet::new()),
            queue: SegQueue::new(),
        })
    }

    /// Marks every registered node ready for the next cycle.
    ///
    /// Reset is not synchronized with in-flight cycles; callers invoke it
    /// between them.
    pub fn reset(&self) {
        let nodes = self.nodes.load_full();
        for weak in nodes.iter() {
            if let Some(node) = weak.upgrade() {
                node.reset();
            }
        }
        log::debug!("reset {} nodes", nodes.len());
    }

    /// Runs one queued node if there is one. Returns whether work was found.
    ///
    /// Background workers can loop over this to contribute compute without
    /// ever requesting buffers themselves.
    pub fn process_one(&self) -> bool {
        match self.queue.pop() {
            Some(node) => {
                node.run();
                true
            }
            None => false,
        }
    }

    pub(crate) fn register(&self, node: Weak<Node>) {
        self.nodes.rcu(|current| current.with(node.clone()));
    }

    pub(crate) fn unregister(&self, node: *const Node) {
        self.nodes.rcu(|current| current.without_ptr(node));
    }

    pub(crate) fn enqueue(&self, node: Arc<Node>) {
        self.queue.push(node);
    }

    pub(crate) fn dequeue(&self) -> Option<Arc<Node>> {
        self.queue.pop()
    }
}
