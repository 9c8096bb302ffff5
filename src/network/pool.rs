// Copyright (c) 2025 Crest Developers

//! Fixed-size byte-buffer pool for peer I/O. Buffers are sized for the
//! largest block; when the pool runs dry, `acquire` blocks, which
//! back-pressures new peer connections.

use std::sync::{Arc, Condvar, Mutex};

/// Default buffer size, large enough for a full block message.
pub const DEFAULT_BUFFER_SIZE: usize = 3 * 1024 * 1024 / 2;

struct PoolState {
    free: Vec<Vec<u8>>,
    outstanding: usize,
}

pub struct BufferPool {
    state: Mutex<PoolState>,
    available: Condvar,
    buffer_size: usize,
    capacity: usize,
}

impl BufferPool {
    pub fn new(capacity: usize, buffer_size: usize) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PoolState {
                free: (0..capacity).map(|_| vec![0u8; buffer_size]).collect(),
                outstanding: 0,
            }),
            available: Condvar::new(),
            buffer_size,
            capacity,
        })
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Take a buffer, blocking until one is free.
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let mut state = self.state.lock().expect("buffer pool lock");
        loop {
            if let Some(buf) = state.free.pop() {
                state.outstanding += 1;
                return PooledBuffer {
                    pool: self.clone(),
                    buf: Some(buf),
                };
            }
            state = self.available.wait(state).expect("buffer pool lock");
        }
    }

    /// Take a buffer if one is free right now.
    pub fn try_acquire(self: &Arc<Self>) -> Option<PooledBuffer> {
        let mut state = self.state.lock().expect("buffer pool lock");
        let buf = state.free.pop()?;
        state.outstanding += 1;
        Some(PooledBuffer {
            pool: self.clone(),
            buf: Some(buf),
        })
    }

    pub fn outstanding(&self) -> usize {
        self.state.lock().expect("buffer pool lock").outstanding
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn release(&self, mut buf: Vec<u8>) {
        buf.clear();
        buf.resize(self.buffer_size, 0);
        let mut state = self.state.lock().expect("buffer pool lock");
        state.outstanding -= 1;
        state.free.push(buf);
        drop(state);
        self.available.notify_one();
    }
}

/// A buffer on loan from the pool; returns itself on drop.
pub struct PooledBuffer {
    pool: Arc<BufferPool>,
    buf: Option<Vec<u8>>,
}

impl std::ops::Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_ref().expect("buffer present until drop")
    }
}

impl std::ops::DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut().expect("buffer present until drop")
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}
