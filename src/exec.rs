//! The pull-driven cycle orchestrator.
//!
//! [`get_buffers`] turns a list of input sockets into their upstream
//! producers' buffers, running every producer that has not run yet this
//! cycle. The algorithm:
//!
//! 1. Snapshot each requested input's upstream connection in one read-only
//!    transaction, so the set of producers is taken from a consistent view
//!    of the topology.
//! 2. Collect the producing nodes into an address-sorted, deduplicated list.
//! 3. Claim each one with a `READY -> PENDING` swap and push it onto the
//!    graph's ready queue. A node someone else already claimed is simply
//!    waited on; a node that already finished is skipped.
//! 4. Drain cooperatively: while any waited-on node is still pending, pop
//!    and run whatever the queue offers, yielding when it is empty. Any
//!    thread inside `get_buffers` contributes compute this way, which also
//!    lets process callbacks call `get_buffers` themselves and recurse into
//!    the same loop.
//! 5. Publish each upstream's buffer into the requesting socket and hand
//!    the buffers back.
//!
//! Claims are atomic, so across every concurrent caller a node's callback
//! runs at most once per cycle.

use std::sync::Arc;
use std::thread;

use crate::buffer::Buffer;
use crate::error::{Error, Result};
use crate::node::{Node, NodeState};
use crate::socket::{Link, Socket};
use crate::txn::{Retry, Txn};

/// Runs the processing cycle needed to read from `sockets` and returns one
/// buffer slot per requested socket, in order.
///
/// A socket with no upstream (or whose upstream produced nothing) yields
/// `None`. The returned buffers stay valid for as long as the caller holds
/// them, regardless of later cycles.
pub fn get_buffers(sockets: &[&Socket]) -> Result<Vec<Option<Arc<Buffer>>>> {
    let upstreams = snapshot_upstreams(sockets)?;

    // Unique producers, ordered by address so the dedup scan is a binary
    // search.
    let mut waiting: Vec<Arc<Node>> = Vec::with_capacity(upstreams.len());
    for upstream in upstreams.iter().flatten() {
        let Some(node) = upstream.node() else {
            // The producing node is gone; whatever it once published is
            // stale, so the consumer sees an empty slot instead.
            upstream.store_buffer(None);
            continue;
        };
        let key = Arc::as_ptr(&node) as usize;
        let slot = match waiting.binary_search_by_key(&key, |n| Arc::as_ptr(n) as usize) {
            Ok(_) => continue,
            Err(slot) => slot,
        };
        match node.claim() {
            Ok(()) => match node.graph() {
                Some(graph) => graph.enqueue(node.clone()),
                // Nowhere to queue it; roll the claim back and let the drain
                // loop below run it inline.
                None => node.reset(),
            },
            Err(NodeState::Finished) => continue,
            Err(NodeState::Error) => return Err(Error::NodeFailed),
            // Pending: claimed by another caller, wait for it below.
            Err(_) => {}
        }
        waiting.insert(slot, node);
    }

    for node in &waiting {
        drain_until_done(node)?;
    }

    Ok(sockets
        .iter()
        .zip(&upstreams)
        .map(|(socket, upstream)| match upstream {
            None => {
                socket.store_buffer(None);
                None
            }
            Some(upstream) => {
                let buffer = upstream.buffer();
                socket.store_buffer(buffer.clone());
                buffer
            }
        })
        .collect())
}

/// One consistent pass over the requested sockets' upstream links.
fn snapshot_upstreams(sockets: &[&Socket]) -> Result<Vec<Option<Arc<Socket>>>> {
    'retry: loop {
        let mut txn = Txn::new();
        let mut upstreams = Vec::with_capacity(sockets.len());
        for socket in sockets {
            let link = match txn.load(socket.link_cell()) {
                Ok(link) => link,
                Err(Retry) => continue 'retry,
            };
            let upstream = match &*link {
                Link::Upstream(Some(weak)) => weak.upgrade(),
                Link::Upstream(None) => None,
                Link::Downstreams(_) => return Err(Error::NotAnInput),
            };
            upstreams.push(upstream);
        }
        // The reads were only needed for consistency; dropping the
        // transaction aborts it.
        return Ok(upstreams);
    }
}

/// Contributes compute to the graph's queue until `node` reaches a terminal
/// state.
fn drain_until_done(node: &Arc<Node>) -> Result<()> {
    loop {
        match node.state() {
            NodeState::Finished => return Ok(()),
            NodeState::Error => return Err(Error::NodeFailed),
            NodeState::Ready => {
                // An earlier claim was rolled back. Claim it ourselves; with
                // no graph to queue through, run it right here.
                if node.claim().is_ok() {
                    match node.graph() {
                        Some(graph) => graph.enqueue(node.clone()),
                        None => node.run(),
                    }
                }
            }
            NodeState::Pending => {
                let Some(graph) = node.graph() else {
                    // No queue to pull from means no way to know the claimant
                    // will ever finish.
                    return Err(Error::GraphGone);
                };
                match graph.dequeue() {
                    Some(next) => next.run(),
                    // Nothing queued while our node is on another thread.
                    None => thread::yield_now(),
                }
            }
        }
    }
}
