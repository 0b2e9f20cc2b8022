use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};

/// Default rounding granularity for backing buffers.
pub const DEFAULT_POOL_BLOCK_SIZE: usize = 8 * 1024;

/// Default maximum number of pooled buffers per kind.
pub const DEFAULT_MAX_POOLED_BUFFERS: usize = 64;

/// Which of the two independent pools a buffer belongs to.
///
/// `Io` buffers stage backend reads; `Scratch` buffers hold decode
/// intermediates. Keeping the pools separate stops a decompression burst
/// from starving the read path of warm buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferKind {
    /// Staging buffers for backend range reads.
    Io,
    /// Scratch space for decompression and directory decoding.
    Scratch,
}

/// Construction parameters for [`ByteBufferPool`].
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Backing capacities are rounded up to a multiple of this.
    pub block_size: usize,
    /// Upper bound on pooled entries for [`BufferKind::Io`].
    pub max_io_buffers: usize,
    /// Upper bound on pooled entries for [`BufferKind::Scratch`].
    pub max_scratch_buffers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_POOL_BLOCK_SIZE,
            max_io_buffers: DEFAULT_MAX_POOLED_BUFFERS,
            max_scratch_buffers: DEFAULT_MAX_POOLED_BUFFERS,
        }
    }
}

/// Counters describing pool behavior since construction (or [`ByteBufferPool::clear`]).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers allocated because no pooled buffer fit.
    pub created: u64,
    /// Borrows served from the pool.
    pub reused: u64,
    /// Releases that entered the pool.
    pub returned: u64,
    /// Releases dropped on the floor (too small, or pool full of larger buffers).
    pub discarded: u64,
    /// Pooled buffers pushed out by a larger returning buffer.
    pub evicted: u64,
    /// Buffers currently held by the pool.
    pub pool_size: u64,
    /// Total capacity currently held by the pool, in bytes.
    pub pool_bytes: u64,
}

/// A size-bucketed pool of reusable byte buffers.
///
/// Borrowing yields a [`PooledBuf`] whose visible length is exactly the
/// requested size (zero-filled) while the backing capacity is the rounded-up
/// best fit. Dropping the handle returns the storage. The pool is biased
/// toward retaining larger buffers: a returning buffer evicts the smallest
/// pooled one rather than being discarded, when the pool is full.
///
/// Cloning is cheap; clones share the same pool.
#[derive(Debug, Clone)]
pub struct ByteBufferPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    block_size: usize,
    io: Shard,
    scratch: Shard,
}

#[derive(Debug)]
struct Shard {
    max_entries: usize,
    slots: Mutex<Slots>,
    created: AtomicU64,
    reused: AtomicU64,
    returned: AtomicU64,
    discarded: AtomicU64,
    evicted: AtomicU64,
}

#[derive(Debug, Default)]
struct Slots {
    // capacity -> stack of idle buffers with that capacity
    buckets: BTreeMap<usize, Vec<Vec<u8>>>,
    entries: usize,
    bytes: usize,
}

impl Shard {
    fn new(max_entries: usize) -> Self {
        Self {
            max_entries,
            slots: Mutex::new(Slots::default()),
            created: AtomicU64::new(0),
            reused: AtomicU64::new(0),
            returned: AtomicU64::new(0),
            discarded: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slots> {
        // A poisoned pool lock is unrecoverable for the caller.
        #[expect(clippy::unwrap_used)]
        let slots = self.slots.lock().unwrap();
        slots
    }
}

impl Slots {
    fn take_best_fit(&mut self, min_capacity: usize) -> Option<Vec<u8>> {
        let capacity = *self.buckets.range(min_capacity..).next()?.0;
        let bucket = self.buckets.get_mut(&capacity)?;
        let buf = bucket.pop()?;
        if bucket.is_empty() {
            self.buckets.remove(&capacity);
        }
        self.entries -= 1;
        self.bytes -= capacity;
        Some(buf)
    }

    fn take_smallest_below(&mut self, capacity: usize) -> Option<Vec<u8>> {
        let smallest = *self.buckets.keys().next()?;
        if smallest >= capacity {
            return None;
        }
        self.take_best_fit(smallest)
    }

    fn insert(&mut self, buf: Vec<u8>) {
        let capacity = buf.capacity();
        self.buckets.entry(capacity).or_default().push(buf);
        self.entries += 1;
        self.bytes += capacity;
    }
}

impl Default for ByteBufferPool {
    fn default() -> Self {
        // The default configuration is always valid.
        #[expect(clippy::unwrap_used)]
        let pool = Self::new(PoolConfig::default()).unwrap();
        pool
    }
}

impl ByteBufferPool {
    /// Create a pool from `config`.
    ///
    /// Fails with [`Error::InvalidConfig`] when `block_size` or either
    /// entry bound is zero.
    pub fn new(config: PoolConfig) -> Result<Self> {
        if config.block_size == 0 {
            return Err(Error::InvalidConfig("pool block_size must be positive"));
        }
        if config.max_io_buffers == 0 || config.max_scratch_buffers == 0 {
            return Err(Error::InvalidConfig("pool entry bounds must be positive"));
        }
        Ok(Self {
            inner: Arc::new(PoolInner {
                block_size: config.block_size,
                io: Shard::new(config.max_io_buffers),
                scratch: Shard::new(config.max_scratch_buffers),
            }),
        })
    }

    /// Borrow a buffer of at least `min_capacity` bytes.
    ///
    /// The returned handle exposes exactly `min_capacity` zeroed bytes;
    /// the backing capacity is the best pooled fit, or a fresh allocation
    /// rounded up to the pool block size.
    #[must_use]
    pub fn borrow(&self, kind: BufferKind, min_capacity: usize) -> PooledBuf {
        let shard = self.inner.shard(kind);
        let rounded = self.inner.round_up(min_capacity);

        let pooled = shard.lock().take_best_fit(rounded);
        let mut buf = match pooled {
            Some(buf) => {
                shard.reused.fetch_add(1, Ordering::Relaxed);
                buf
            }
            None => {
                shard.created.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(rounded)
            }
        };
        buf.clear();
        buf.resize(min_capacity, 0);

        PooledBuf {
            buf,
            kind,
            pool: Arc::clone(&self.inner),
        }
    }

    /// Shorthand for [`Self::borrow`] with [`BufferKind::Io`].
    #[must_use]
    pub fn io(&self, min_capacity: usize) -> PooledBuf {
        self.borrow(BufferKind::Io, min_capacity)
    }

    /// Shorthand for [`Self::borrow`] with [`BufferKind::Scratch`].
    #[must_use]
    pub fn scratch(&self, min_capacity: usize) -> PooledBuf {
        self.borrow(BufferKind::Scratch, min_capacity)
    }

    /// Aggregate counters over both kinds.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let mut stats = PoolStats::default();
        for shard in [&self.inner.io, &self.inner.scratch] {
            stats.created += shard.created.load(Ordering::Relaxed);
            stats.reused += shard.reused.load(Ordering::Relaxed);
            stats.returned += shard.returned.load(Ordering::Relaxed);
            stats.discarded += shard.discarded.load(Ordering::Relaxed);
            stats.evicted += shard.evicted.load(Ordering::Relaxed);
            let slots = shard.lock();
            stats.pool_size += slots.entries as u64;
            stats.pool_bytes += slots.bytes as u64;
        }
        stats
    }

    /// Drop every pooled buffer and reset all counters.
    pub fn clear(&self) {
        for shard in [&self.inner.io, &self.inner.scratch] {
            *shard.lock() = Slots::default();
            shard.created.store(0, Ordering::Relaxed);
            shard.reused.store(0, Ordering::Relaxed);
            shard.returned.store(0, Ordering::Relaxed);
            shard.discarded.store(0, Ordering::Relaxed);
            shard.evicted.store(0, Ordering::Relaxed);
        }
    }
}

impl PoolInner {
    fn shard(&self, kind: BufferKind) -> &Shard {
        match kind {
            BufferKind::Io => &self.io,
            BufferKind::Scratch => &self.scratch,
        }
    }

    fn round_up(&self, n: usize) -> usize {
        n.max(1).div_ceil(self.block_size) * self.block_size
    }

    fn release(&self, kind: BufferKind, buf: Vec<u8>) {
        let capacity = buf.capacity();
        let shard = self.shard(kind);

        // Undersized buffers (shrunk below a block by the caller) are not
        // worth keeping.
        if capacity < self.block_size {
            shard.discarded.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let mut buf = buf;
        buf.clear();

        let mut slots = shard.lock();
        if slots.entries < shard.max_entries {
            slots.insert(buf);
            shard.returned.fetch_add(1, Ordering::Relaxed);
            return;
        }

        // Pool is full: displace the smallest strictly-smaller buffer so the
        // pool trends toward larger, more widely reusable capacities.
        if slots.take_smallest_below(capacity).is_some() {
            slots.insert(buf);
            shard.evicted.fetch_add(1, Ordering::Relaxed);
            shard.returned.fetch_add(1, Ordering::Relaxed);
        } else {
            shard.discarded.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// A borrowed pool buffer. Dropping it returns the storage to the pool.
#[derive(Debug)]
pub struct PooledBuf {
    buf: Vec<u8>,
    kind: BufferKind,
    pool: Arc<PoolInner>,
}

impl PooledBuf {
    /// Backing capacity, always at least the visible length.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    /// Mutable access to the backing vector, e.g. as a `read_to_end`
    /// target. Capacity grown here is returned to the pool with the buffer.
    pub fn as_mut_vec(&mut self) -> &mut Vec<u8> {
        &mut self.buf
    }
}

impl Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.release(self.kind, buf);
    }
}
