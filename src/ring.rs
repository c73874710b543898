//! Fixed-capacity frame queue between one producer and one consumer

use std::{
    cell::UnsafeCell,
    ptr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use crate::Sample;

/// Circular buffer of interleaved multi-channel frames
///
/// Writes never overwrite unread frames and reads never block; both sides report how many frames
/// they actually moved. The producer and consumer halves may live on different threads, e.g. a
/// capture thread and a render callback.
pub struct RingBuffer;

impl RingBuffer {
    /// Allocate storage for `capacity` frames of `channel_count` samples each
    ///
    /// # Panics
    ///
    /// Panics if `capacity` or `channel_count` is zero.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(capacity: usize, channel_count: usize) -> (Producer, Consumer) {
        assert!(capacity > 0, "ring buffer capacity must be positive");
        assert!(channel_count > 0, "ring buffer channel count must be positive");
        let shared = Arc::new(Shared {
            capacity,
            channels: channel_count,
            data: (0..capacity * channel_count)
                .map(|_| UnsafeCell::new(0.0))
                .collect(),
            available: AtomicUsize::new(0),
        });
        (
            Producer {
                shared: shared.clone(),
                write: 0,
            },
            Consumer { shared, read: 0 },
        )
    }
}

struct Shared {
    capacity: usize,
    channels: usize,
    data: Box<[UnsafeCell<Sample>]>,
    /// Frames written but not yet read
    available: AtomicUsize,
}

unsafe impl Sync for Shared {}

impl Shared {
    fn base(&self) -> *mut Sample {
        // UnsafeCell<T> has the same layout as T
        self.data.as_ptr() as *mut Sample
    }
}

/// Writing half of a [`RingBuffer`]
pub struct Producer {
    shared: Arc<Shared>,
    /// Frame index of the next write
    write: usize,
}

impl Producer {
    /// Copy a prefix of the frames in `data` into the buffer
    ///
    /// `data` holds interleaved frames; trailing samples that don't make up a whole frame are
    /// ignored. Returns the number of frames accepted, which is less than offered when the buffer
    /// lacks space and zero when it's full.
    pub fn write(&mut self, data: &[Sample]) -> usize {
        let shared = &*self.shared;
        let ch = shared.channels;
        let free = shared.capacity - shared.available.load(Ordering::Acquire);
        let n = free.min(data.len() / ch);
        if n == 0 {
            return 0;
        }
        let first = n.min(shared.capacity - self.write);
        unsafe {
            let base = shared.base();
            ptr::copy_nonoverlapping(data.as_ptr(), base.add(self.write * ch), first * ch);
            ptr::copy_nonoverlapping(data.as_ptr().add(first * ch), base, (n - first) * ch);
        }
        self.write = (self.write + n) % shared.capacity;
        shared.available.fetch_add(n, Ordering::Release);
        n
    }

    /// Number of frames that can currently be written
    pub fn free(&self) -> usize {
        self.shared.capacity - self.shared.available.load(Ordering::Acquire)
    }

    /// Maximum number of frames held at once
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Samples per frame
    pub fn channel_count(&self) -> usize {
        self.shared.channels
    }
}

/// Reading half of a [`RingBuffer`]
pub struct Consumer {
    shared: Arc<Shared>,
    /// Frame index of the next read
    read: usize,
}

impl Consumer {
    /// Copy up to `out.len() / channel_count` frames out of the buffer, oldest first
    ///
    /// Returns the number of frames produced. Samples of `out` past that count are left untouched.
    pub fn read(&mut self, out: &mut [Sample]) -> usize {
        self.take(out.len(), |src, dst| unsafe {
            ptr::copy_nonoverlapping(src.as_ptr(), out.as_mut_ptr().add(dst), src.len());
        })
    }

    /// Like [`read`](Self::read), but sums frames into `out` instead of overwriting it
    pub fn read_add(&mut self, out: &mut [Sample]) -> usize {
        self.take(out.len(), |src, dst| {
            for (o, &s) in out[dst..dst + src.len()].iter_mut().zip(src) {
                *o += s;
            }
        })
    }

    /// Drop up to `frames` of the oldest frames, returning how many were dropped
    pub fn discard(&mut self, frames: usize) -> usize {
        self.take(frames.saturating_mul(self.shared.channels), |_, _| {})
    }

    /// Number of frames ready to be read
    pub fn frames_available(&self) -> usize {
        self.shared.available.load(Ordering::Acquire)
    }

    /// Maximum number of frames held at once
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Samples per frame
    pub fn channel_count(&self) -> usize {
        self.shared.channels
    }

    /// Hand at most `samples / channels` readable frames to `f` as up to two contiguous runs
    ///
    /// `f` receives each run along with its sample offset in the destination.
    fn take(&mut self, samples: usize, mut f: impl FnMut(&[Sample], usize)) -> usize {
        let shared = &*self.shared;
        let ch = shared.channels;
        let n = shared.available.load(Ordering::Acquire).min(samples / ch);
        if n == 0 {
            return 0;
        }
        let first = n.min(shared.capacity - self.read);
        unsafe {
            let base = shared.base() as *const Sample;
            f(
                std::slice::from_raw_parts(base.add(self.read * ch), first * ch),
                0,
            );
            f(
                std::slice::from_raw_parts(base, (n - first) * ch),
                first * ch,
            );
        }
        self.read = (self.read + n) % shared.capacity;
        shared.available.fetch_sub(n, Ordering::Release);
        n
    }
}
