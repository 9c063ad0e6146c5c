//! Concurrent, pull-driven processing graphs.
//!
//! A [`Graph`] is a set of [`Node`]s connected through typed [`Socket`]s.
//! Each node carries a process callback; each output socket publishes one
//! refcounted [`Buffer`] per cycle. Nothing runs until a consumer asks:
//! [`get_buffers`] claims every producer the requested inputs depend on,
//! runs each of them exactly once for the current cycle (possibly spread
//! across every thread that is asking), and hands back the produced
//! buffers. [`Graph::reset`] opens the next cycle.
//!
//! ## Architecture
//!
//! ```text
//!  caller thread(s)                 shared state
//!       |                               |
//!  get_buffers(inputs)          Socket::link  (transactional cells)
//!       |  snapshot upstreams ----------+
//!       |  claim READY->PENDING    Node::state (atomic state machine)
//!       |  enqueue / drain ------- Graph queue (lock-free MPMC)
//!       |  read results ---------- Socket::buffer (atomic publication)
//!       v
//!   buffers out
//! ```
//!
//! Topology can change while cycles are running: connection edges live in
//! transactional cells and are rewired atomically, the node registry is an
//! atomically swapped immutable snapshot, and all back-edges (graph to
//! node, socket to node, socket to socket) are weak, so client code alone
//! decides lifetimes.
//!
//! ## Example
//!
//! A producer fills its output with a byte ramp; a consumer pulls it:
//!
//! ```
//! use std::sync::{Arc, Weak};
//! use patchbay::{get_buffers, Direction, Graph, Node, Socket};
//!
//! struct Ramp {
//!     node: Arc<Node>,
//!     out: Arc<Socket>,
//! }
//!
//! let graph = Graph::new();
//! let ramp = Arc::new_cyclic(|me: &Weak<Ramp>| {
//!     let me = me.clone();
//!     let node = Node::new(&graph, move || {
//!         let this = me.upgrade().expect("owner still alive");
//!         let mut out = this.out.alloc_buffer(8);
//!         for (i, byte) in out.iter_mut().enumerate() {
//!             *byte = i as u8;
//!         }
//!         Ok(())
//!     });
//!     let out = Socket::new(&node, Direction::Output);
//!     Ramp { node, out }
//! });
//!
//! let sink = Node::new(&graph, || Ok(()));
//! let input = Socket::new(&sink, Direction::Input);
//! ramp.out.connect(&input)?;
//!
//! let buffers = get_buffers(&[&*input])?;
//! assert_eq!(buffers[0].as_deref().unwrap()[3], 3);
//! # Ok::<(), patchbay::Error>(())
//! ```
//!
//! ## Thread safety
//!
//! Every handle is `Send + Sync` and shared by reference count. Callers on
//! any number of threads may request buffers, rewire sockets, and add or
//! drop nodes concurrently; the only operation left to the client to order
//! is [`Graph::reset`], which must happen between cycles, not during one.

mod buffer;
mod error;
mod exec;
mod graph;
mod node;
mod set;
mod socket;
mod txn;

pub use buffer::{Buffer, BufferMut};
pub use error::{Error, Result};
pub use exec::get_buffers;
pub use graph::Graph;
pub use node::{Node, NodeState};
pub use socket::{Direction, Socket};
