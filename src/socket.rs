//! Sockets: directed endpoints carrying connections and published buffers.
//!
//! The connection state of a socket lives in a single transactional cell.
//! An input's cell holds its one upstream output (or nothing); an output's
//! cell holds the set of inputs wired to it. Connecting and disconnecting
//! touch up to three of these cells at once, and doing so inside a [`Txn`]
//! keeps the two directions of every edge consistent: any other transaction
//! observes both halves of a connection or neither, never one.

use std::fmt;
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;

use crate::buffer::{Buffer, BufferMut};
use crate::error::{Error, Result};
use crate::node::Node;
use crate::set::WeakSet;
use crate::txn::{Retry, Txn, TxnCell};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// Connection state of one socket. Which variant a cell holds is fixed at
/// socket creation by its direction.
pub(crate) enum Link {
    Upstream(Option<Weak<Socket>>),
    Downstreams(WeakSet<Socket>),
}

impl Link {
    fn upstream(&self) -> &Option<Weak<Socket>> {
        match self {
            Link::Upstream(upstream) => upstream,
            Link::Downstreams(_) => unreachable!("input sockets hold upstream links"),
        }
    }

    pub(crate) fn downstreams(&self) -> &WeakSet<Socket> {
        match self {
            Link::Downstreams(set) => set,
            Link::Upstream(_) => unreachable!("output sockets hold downstream sets"),
        }
    }
}

/// A named endpoint on a node.
///
/// Outputs publish one buffer per cycle into their buffer cell; inputs pick
/// up their upstream's buffer when a cycle completes. All cross-socket and
/// socket-to-node edges are weak, so dropping client handles tears the
/// structure down without coordination; a dropped socket detaches itself
/// from its peers as a best effort.
pub struct Socket {
    node: Weak<Node>,
    direction: Direction,
    me: Weak<Socket>,
    link: TxnCell<Link>,
    buffer: ArcSwapOption<Buffer>,
}

impl Socket {
    pub fn new(node: &Arc<Node>, direction: Direction) -> Arc<Self> {
        Arc::new_cyclic(|me| Socket {
            node: Arc::downgrade(node),
            direction,
            me: me.clone(),
            link: TxnCell::new(match direction {
                Direction::Input => Link::Upstream(None),
                Direction::Output => Link::Downstreams(WeakSet::new()),
            }),
            buffer: ArcSwapOption::empty(),
        })
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// The owning node, if it is still alive.
    pub fn node(&self) -> Option<Arc<Node>> {
        self.node.upgrade()
    }

    /// The output currently feeding this input, if any.
    pub fn upstream(&self) -> Option<Arc<Socket>> {
        match &*self.link.peek() {
            Link::Upstream(Some(weak)) => weak.upgrade(),
            _ => None,
        }
    }

    /// The buffer most recently published on this socket.
    pub fn buffer(&self) -> Option<Arc<Buffer>> {
        self.buffer.load_full()
    }

    /// Wires an output to an input. The call may be made from either
    /// endpoint; connecting a pair that is already wired is a no-op, and
    /// connecting an input that already has an upstream moves it.
    pub fn connect(&self, other: &Socket) -> Result<()> {
        let (output, input) = match (self.direction, other.direction) {
            (Direction::Output, Direction::Input) => (self, other),
            (Direction::Input, Direction::Output) => (other, self),
            (direction, _) => return Err(Error::SameDirection(direction)),
        };
        loop {
            match Self::try_connect(output, input) {
                Ok(()) => return Ok(()),
                Err(Retry) => continue,
            }
        }
    }

    fn try_connect(output: &Socket, input: &Socket) -> std::result::Result<(), Retry> {
        // Promote the input's current upstream before the transaction opens;
        // the transactional load below revalidates the choice.
        let peeked = input.link.peek();
        let (hint, previous) = match peeked.upstream() {
            Some(weak) => (Some(weak.as_ptr()), weak.upgrade()),
            None => (None, None),
        };

        let mut txn = Txn::new();
        let link = txn.load(&input.link)?;
        let wired = link.upstream().clone();
        if wired
            .as_ref()
            .is_some_and(|weak| std::ptr::eq(weak.as_ptr(), output))
        {
            return Ok(());
        }
        if wired.as_ref().map(Weak::as_ptr) != hint {
            return Err(Retry);
        }

        // Detach the input from the upstream it is leaving, if that socket
        // is still alive.
        if let Some(previous) = &previous {
            let prev_link = txn.load(&previous.link)?;
            let trimmed = prev_link.downstreams().without_ptr(input as *const Socket);
            txn.store(&previous.link, Link::Downstreams(trimmed));
        }

        let out_link = txn.load(&output.link)?;
        let grown = out_link.downstreams().with(input.me.clone());
        txn.store(&output.link, Link::Downstreams(grown));
        txn.store(&input.link, Link::Upstream(Some(output.me.clone())));
        txn.commit()?;
        log::debug!("connected output to input socket");
        Ok(())
    }

    /// Severs this socket's connections: an input detaches from its
    /// upstream, an output detaches every downstream input. Idempotent.
    pub fn disconnect(&self) {
        loop {
            let attempt = match self.direction {
                Direction::Input => self.try_disconnect_input(),
                Direction::Output => self.try_disconnect_output(),
            };
            match attempt {
                Ok(()) => return,
                Err(Retry) => continue,
            }
        }
    }

    fn try_disconnect_input(&self) -> std::result::Result<(), Retry> {
        let peeked = self.link.peek();
        let (hint, upstream) = match peeked.upstream() {
            Some(weak) => (Some(weak.as_ptr()), weak.upgrade()),
            None => (None, None),
        };

        let mut txn = Txn::new();
        let link = txn.load(&self.link)?;
        if link.upstream().as_ref().map(Weak::as_ptr) != hint {
            return Err(Retry);
        }
        // Nothing to detach when there is no upstream or it is already gone;
        // a dead weak edge is unreachable and harmless.
        let Some(upstream) = upstream else {
            return Ok(());
        };

        let up_link = txn.load(&upstream.link)?;
        let trimmed = up_link.downstreams().without_ptr(self as *const Socket);
        txn.store(&upstream.link, Link::Downstreams(trimmed));
        txn.store(&self.link, Link::Upstream(None));
        txn.commit()?;
        log::debug!("disconnected input socket");
        Ok(())
    }

    fn try_disconnect_output(&self) -> std::result::Result<(), Retry> {
        // Promote every live downstream before the transaction opens.
        let peeked = self.link.peek();
        let live: Vec<Arc<Socket>> = peeked
            .downstreams()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();

        let mut txn = Txn::new();
        let link = txn.load(&self.link)?;
        let set = link.downstreams();
        if set.is_empty() {
            return Ok(());
        }
        for weak in set.iter() {
            let known = live
                .iter()
                .any(|socket| std::ptr::eq(Arc::as_ptr(socket), weak.as_ptr()));
            if weak.upgrade().is_some() && !known {
                // a downstream appeared after the promotion pass
                return Err(Retry);
            }
        }

        for downstream in &live {
            if set.contains_ptr(Arc::as_ptr(downstream)) {
                txn.store(&downstream.link, Link::Upstream(None));
            }
        }
        txn.store(&self.link, Link::Downstreams(WeakSet::new()));
        txn.commit()?;
        log::debug!("disconnected {} downstream sockets", live.len());
        Ok(())
    }

    /// Claims the socket's next buffer for writing.
    ///
    /// Called by producers inside their process callback. When the currently
    /// published buffer has the requested length and no reader from an
    /// earlier cycle still holds it, the allocation is recycled (its bytes
    /// are kept); otherwise a fresh zeroed buffer is handed out. Dropping
    /// the returned guard publishes the buffer on this socket.
    pub fn alloc_buffer(&self, len: usize) -> BufferMut<'_> {
        let recycled = self.buffer.swap(None).and_then(|previous| {
            match Arc::try_unwrap(previous) {
                Ok(buf) if buf.len() == len => Some(buf),
                // still referenced downstream, or the wrong size
                _ => None,
            }
        });
        let buf = recycled.unwrap_or_else(|| Buffer::zeroed(len));
        BufferMut::new(self, buf)
    }

    pub(crate) fn link_cell(&self) -> &TxnCell<Link> {
        &self.link
    }

    pub(crate) fn store_buffer(&self, buffer: Option<Arc<Buffer>>) {
        self.buffer.store(buffer);
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.buffer.store(None);
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    fn rig() -> (Arc<Graph>, Arc<Node>) {
        let graph = Graph::new();
        let node = Node::new(&graph, || Ok(()));
        (graph, node)
    }

    fn downstream_count(socket: &Socket) -> usize {
        socket.link.peek().downstreams().len()
    }

    #[test]
    fn test_connect_wires_both_directions() {
        let (_graph, node) = rig();
        let out = Socket::new(&node, Direction::Output);
        let inp = Socket::new(&node, Direction::Input);
        out.connect(&inp).unwrap();
        let upstream = inp.upstream().unwrap();
        assert!(Arc::ptr_eq(&upstream, &out));
        assert!(downstream_count(&out) == 1);
    }

    #[test]
    fn test_connect_from_either_endpoint() {
        let (_graph, node) = rig();
        let out = Socket::new(&node, Direction::Output);
        let inp = Socket::new(&node, Direction::Input);
        inp.connect(&out).unwrap();
        assert!(inp.upstream().is_some());
    }

    #[test]
    fn test_connect_is_idempotent() {
        let (_graph, node) = rig();
        let out = Socket::new(&node, Direction::Output);
        let inp = Socket::new(&node, Direction::Input);
        out.connect(&inp).unwrap();
        out.connect(&inp).unwrap();
        assert!(downstream_count(&out) == 1);
    }

    #[test]
    fn test_connect_moves_an_input_between_outputs() {
        let (_graph, node) = rig();
        let first = Socket::new(&node, Direction::Output);
        let second = Socket::new(&node, Direction::Output);
        let inp = Socket::new(&node, Direction::Input);
        first.connect(&inp).unwrap();
        second.connect(&inp).unwrap();
        assert!(downstream_count(&first) == 0);
        assert!(downstream_count(&second) == 1);
        assert!(Arc::ptr_eq(&inp.upstream().unwrap(), &second));
    }

    #[test]
    fn test_connect_rejects_matching_directions() {
        let (_graph, node) = rig();
        let a = Socket::new(&node, Direction::Output);
        let b = Socket::new(&node, Direction::Output);
        assert!(matches!(
            a.connect(&b),
            Err(Error::SameDirection(Direction::Output))
        ));
        let c = Socket::new(&node, Direction::Input);
        let d = Socket::new(&node, Direction::Input);
        assert!(matches!(
            c.connect(&d),
            Err(Error::SameDirection(Direction::Input))
        ));
    }

    #[test]
    fn test_disconnect_input() {
        let (_graph, node) = rig();
        let out = Socket::new(&node, Direction::Output);
        let inp = Socket::new(&node, Direction::Input);
        out.connect(&inp).unwrap();
        inp.disconnect();
        assert!(inp.upstream().is_none());
        assert!(downstream_count(&out) == 0);
        // a second disconnect stays disconnected
        inp.disconnect();
        assert!(inp.upstream().is_none());
    }

    #[test]
    fn test_disconnect_output_detaches_every_downstream() {
        let (_graph, node) = rig();
        let out = Socket::new(&node, Direction::Output);
        let first = Socket::new(&node, Direction::Input);
        let second = Socket::new(&node, Direction::Input);
        out.connect(&first).unwrap();
        out.connect(&second).unwrap();
        assert!(downstream_count(&out) == 2);
        out.disconnect();
        assert!(downstream_count(&out) == 0);
        assert!(first.upstream().is_none());
        assert!(second.upstream().is_none());
    }

    #[test]
    fn test_dropping_a_socket_detaches_it() {
        let (_graph, node) = rig();
        let out = Socket::new(&node, Direction::Output);
        let inp = Socket::new(&node, Direction::Input);
        out.connect(&inp).unwrap();
        drop(inp);
        assert!(downstream_count(&out) == 0);
    }

    #[test]
    fn test_dropping_an_output_clears_its_downstreams() {
        let (_graph, node) = rig();
        let out = Socket::new(&node, Direction::Output);
        let inp = Socket::new(&node, Direction::Input);
        out.connect(&inp).unwrap();
        drop(out);
        assert!(inp.upstream().is_none());
        assert!(matches!(&*inp.link.peek(), Link::Upstream(None)));
    }
}
