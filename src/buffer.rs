//! Byte buffers published by output sockets.

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use crate::socket::Socket;

/// A fixed-size byte region shared by reference count.
///
/// A buffer is immutable once published; producers allocate (or recycle) a
/// fresh one each cycle through [`Socket::alloc_buffer`] instead of mutating
/// what downstream readers may still hold.
pub struct Buffer {
    data: Box<[u8]>,
}

impl Buffer {
    pub(crate) fn zeroed(len: usize) -> Self {
        Buffer {
            data: vec![0; len].into_boxed_slice(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

/// Exclusive write access to a socket's next buffer.
///
/// Returned by [`Socket::alloc_buffer`]. While the guard is alive the buffer
/// is owned by the producer alone; dropping the guard publishes it into the
/// socket's buffer cell, where consumers pick it up once the producing node
/// has finished.
pub struct BufferMut<'a> {
    socket: &'a Socket,
    buf: ManuallyDrop<Buffer>,
}

impl<'a> BufferMut<'a> {
    pub(crate) fn new(socket: &'a Socket, buf: Buffer) -> Self {
        BufferMut {
            socket,
            buf: ManuallyDrop::new(buf),
        }
    }
}

impl Deref for BufferMut<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf.data
    }
}

impl DerefMut for BufferMut<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf.data
    }
}

impl Drop for BufferMut<'_> {
    fn drop(&mut self) {
        // SAFETY: `buf` is taken exactly once; the guard is unusable afterwards.
        let buf = unsafe { ManuallyDrop::take(&mut self.buf) };
        self.socket.store_buffer(Some(Arc::new(buf)));
    }
}
