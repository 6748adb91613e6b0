// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Fixed-capacity circular byte store guarded by a mutex and two condition
//! variables.
//!
//! Transfers are all-or-nothing: a produce either fits completely or does not
//! happen, and a consume either finds every requested byte or takes none.
//! Size is tracked explicitly, so `head == tail` is never ambiguous.
//!
//! The same header layout is used on the heap ([`RingBuffer`]) and embedded in
//! a shared memory segment (reached through [`RingView`]).

use std::alloc::{self, Layout};
use std::cell::UnsafeCell;
use std::marker::PhantomData;
use std::mem::{align_of, size_of};
use std::ptr::{self, addr_of_mut, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{SharedMemoryError, SyncError};
use crate::shm::sync::{Condition, SyncHandle};

/// Ring buffer header. The data bytes follow it directly.
#[repr(C)]
pub(crate) struct RingBufferHeader {
    /// Total capacity in bytes. Zero until initialization completes.
    capacity: AtomicUsize,
    /// Whether the primitives are process-shared.
    shared: bool,
    /// Bytes currently held. Written only under the mutex.
    size: AtomicUsize,
    /// Next write offset.
    head: UnsafeCell<usize>,
    /// Next read offset.
    tail: UnsafeCell<usize>,
    sync: SyncHandle,
}

/// Offset of the first data byte from the start of the header.
pub(crate) const RING_DATA_OFFSET: usize = size_of::<RingBufferHeader>();

/// Alignment required for a header placement.
pub(crate) const RING_ALIGNMENT: usize = align_of::<RingBufferHeader>();

impl RingBufferHeader {
    /// Initialize a header in place.
    ///
    /// # Safety
    /// `this` must point to writable, zeroed memory of at least
    /// `RING_DATA_OFFSET + capacity` bytes that nobody else uses yet.
    pub(crate) unsafe fn init(
        this: *mut RingBufferHeader,
        capacity: usize,
        shared: bool,
    ) -> Result<(), SyncError> {
        debug_assert!(capacity > 0);

        addr_of_mut!((*this).shared).write(shared);
        addr_of_mut!((*this).size).write(AtomicUsize::new(0));
        addr_of_mut!((*this).head).write(UnsafeCell::new(0));
        addr_of_mut!((*this).tail).write(UnsafeCell::new(0));
        SyncHandle::init(addr_of_mut!((*this).sync), shared)?;

        // Publishing the capacity marks the header as usable.
        (*addr_of_mut!((*this).capacity)).store(capacity, Ordering::Release);
        Ok(())
    }

    /// Capacity as published by `init`, or 0 if not initialized.
    pub(crate) fn published_capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }

    /// Destroy the embedded primitives.
    ///
    /// # Safety
    /// No party may use the header afterwards.
    pub(crate) unsafe fn destroy(&self) {
        self.sync.destroy();
    }
}

/// Borrowed handle to a ring living in memory owned by someone else.
#[derive(Clone, Copy)]
pub struct RingView<'a> {
    header: NonNull<RingBufferHeader>,
    _marker: PhantomData<&'a RingBufferHeader>,
}

// SAFETY: every mutation goes through the embedded mutex.
unsafe impl Send for RingView<'_> {}
unsafe impl Sync for RingView<'_> {}

impl<'a> RingView<'a> {
    /// # Safety
    /// `header` must point to an initialized header followed by its data bytes,
    /// valid for `'a`.
    pub(crate) unsafe fn from_raw(header: NonNull<RingBufferHeader>) -> Self {
        Self {
            header,
            _marker: PhantomData,
        }
    }

    fn header(&self) -> &'a RingBufferHeader {
        // SAFETY: guaranteed by `from_raw`.
        unsafe { self.header.as_ref() }
    }

    fn data(&self) -> *mut u8 {
        // SAFETY: the data area starts right after the header.
        unsafe { self.header.as_ptr().cast::<u8>().add(RING_DATA_OFFSET) }
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.header().capacity.load(Ordering::Relaxed)
    }

    /// Whether the ring is usable from other processes.
    pub fn is_shared(&self) -> bool {
        self.header().shared
    }

    /// Bytes currently held.
    ///
    /// Lock-free for a process-private ring. A process-shared ring takes the
    /// mutex, since a peer process mutates the count concurrently.
    pub fn size(&self) -> Result<usize, SharedMemoryError> {
        let header = self.header();
        if header.shared {
            let _guard = header.sync.lock()?;
            Ok(header.size.load(Ordering::Acquire))
        } else {
            Ok(header.size.load(Ordering::Acquire))
        }
    }

    pub fn is_empty(&self) -> Result<bool, SharedMemoryError> {
        Ok(self.size()? == 0)
    }

    /// Write all of `data` or nothing.
    ///
    /// With `wait` the call blocks until enough space is free. Without it a
    /// ring that cannot take `data` whole returns
    /// [`SharedMemoryError::RingBufferFull`] and is left untouched.
    ///
    /// # Panics
    /// If `data` is empty or longer than the capacity.
    pub fn produce(&self, data: &[u8], wait: bool) -> Result<usize, SharedMemoryError> {
        let capacity = self.capacity();
        let len = data.len();
        assert!(len > 0, "produce of zero bytes");
        assert!(
            len <= capacity,
            "produce of {len} bytes exceeds ring capacity {capacity}"
        );

        let header = self.header();
        let mut guard = header.sync.lock()?;
        loop {
            let available = capacity - header.size.load(Ordering::Relaxed);
            if available >= len {
                break;
            }
            if !wait {
                return Err(SharedMemoryError::RingBufferFull {
                    size: len,
                    available,
                });
            }
            guard.wait(Condition::SpaceAvailable)?;
        }

        // SAFETY: cursors and storage are only touched while holding the mutex.
        unsafe {
            let head = *header.head.get();
            self.copy_in(head, data);
            *header.head.get() = (head + len) % capacity;
        }
        header.size.fetch_add(len, Ordering::Release);

        if let Err(e) = guard.notify(Condition::DataAvailable) {
            tracing::error!(error = %e, "Failed to signal ring buffer consumers");
        }
        Ok(len)
    }

    /// Fill all of `buf` or nothing.
    ///
    /// With `wait` the call blocks until enough bytes are held. Without it a
    /// ring holding fewer than `buf.len()` bytes returns
    /// [`SharedMemoryError::InsufficientData`] and is left untouched.
    ///
    /// # Panics
    /// If `buf` is empty or longer than the capacity.
    pub fn consume(&self, buf: &mut [u8], wait: bool) -> Result<usize, SharedMemoryError> {
        let capacity = self.capacity();
        let len = buf.len();
        assert!(len > 0, "consume of zero bytes");
        assert!(
            len <= capacity,
            "consume of {len} bytes exceeds ring capacity {capacity}"
        );

        let header = self.header();
        let mut guard = header.sync.lock()?;
        loop {
            let available = header.size.load(Ordering::Relaxed);
            if available >= len {
                break;
            }
            if !wait {
                return Err(SharedMemoryError::InsufficientData {
                    size: len,
                    available,
                });
            }
            guard.wait(Condition::DataAvailable)?;
        }

        // SAFETY: as in `produce`.
        unsafe {
            let tail = *header.tail.get();
            self.copy_out(tail, buf);
            *header.tail.get() = (tail + len) % capacity;
        }
        header.size.fetch_sub(len, Ordering::Release);

        if let Err(e) = guard.notify(Condition::SpaceAvailable) {
            tracing::error!(error = %e, "Failed to signal ring buffer producers");
        }
        Ok(len)
    }

    /// Copy `src` into storage starting at `offset`, wrapping at the end.
    ///
    /// # Safety
    /// Caller holds the mutex and `src.len()` bytes starting at `offset` are free.
    unsafe fn copy_in(&self, offset: usize, src: &[u8]) {
        let data = self.data();
        let first = src.len().min(self.capacity() - offset);
        ptr::copy_nonoverlapping(src.as_ptr(), data.add(offset), first);

        if first < src.len() {
            // Wrap around to beginning
            ptr::copy_nonoverlapping(src.as_ptr().add(first), data, src.len() - first);
        }
    }

    /// Copy storage starting at `offset` into `dst`, wrapping at the end.
    ///
    /// # Safety
    /// Caller holds the mutex and `dst.len()` bytes starting at `offset` are held.
    unsafe fn copy_out(&self, offset: usize, dst: &mut [u8]) {
        let data = self.data();
        let first = dst.len().min(self.capacity() - offset);
        ptr::copy_nonoverlapping(data.add(offset), dst.as_mut_ptr(), first);

        if first < dst.len() {
            ptr::copy_nonoverlapping(data, dst.as_mut_ptr().add(first), dst.len() - first);
        }
    }

    #[cfg(test)]
    pub(crate) fn sync(&self) -> &'a SyncHandle {
        &self.header().sync
    }

    #[cfg(test)]
    fn cursors(&self) -> (usize, usize) {
        let header = self.header();
        let _guard = header.sync.lock().unwrap();
        unsafe { (*header.head.get(), *header.tail.get()) }
    }
}

/// Heap-owned ring for use between threads of one process.
pub struct RingBuffer {
    header: NonNull<RingBufferHeader>,
    layout: Layout,
}

// SAFETY: the allocation is owned; all access is synchronized by the mutex.
unsafe impl Send for RingBuffer {}
unsafe impl Sync for RingBuffer {}

impl RingBuffer {
    /// Allocate a process-private ring of `capacity` bytes.
    pub fn new(capacity: usize) -> Result<Self, SharedMemoryError> {
        if capacity == 0 {
            return Err(SharedMemoryError::InvalidCapacity {
                capacity,
                reason: "capacity must be greater than zero".to_string(),
            });
        }

        let layout = RING_DATA_OFFSET
            .checked_add(capacity)
            .and_then(|size| Layout::from_size_align(size, RING_ALIGNMENT).ok())
            .ok_or_else(|| SharedMemoryError::InvalidCapacity {
                capacity,
                reason: "capacity overflows the address space".to_string(),
            })?;

        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let Some(header) = NonNull::new(raw.cast::<RingBufferHeader>()) else {
            alloc::handle_alloc_error(layout);
        };

        // SAFETY: freshly allocated, zeroed and large enough.
        if let Err(e) = unsafe { RingBufferHeader::init(header.as_ptr(), capacity, false) } {
            // SAFETY: allocated above with the same layout.
            unsafe { alloc::dealloc(raw, layout) };
            return Err(e.into());
        }

        tracing::debug!(capacity, "Created in-process ring buffer");
        Ok(Self { header, layout })
    }

    /// Borrowed view used for all operations.
    pub fn view(&self) -> RingView<'_> {
        // SAFETY: the header was initialized in `new` and lives as long as `self`.
        unsafe { RingView::from_raw(self.header) }
    }

    pub fn capacity(&self) -> usize {
        self.view().capacity()
    }

    pub fn size(&self) -> Result<usize, SharedMemoryError> {
        self.view().size()
    }

    pub fn is_empty(&self) -> Result<bool, SharedMemoryError> {
        self.view().is_empty()
    }

    /// See [`RingView::produce`].
    pub fn produce(&self, data: &[u8], wait: bool) -> Result<usize, SharedMemoryError> {
        self.view().produce(data, wait)
    }

    /// See [`RingView::consume`].
    pub fn consume(&self, buf: &mut [u8], wait: bool) -> Result<usize, SharedMemoryError> {
        self.view().consume(buf, wait)
    }
}

impl Drop for RingBuffer {
    fn drop(&mut self) {
        // SAFETY: `&mut self` proves no other borrower exists.
        unsafe {
            self.header.as_ref().destroy();
            alloc::dealloc(self.header.as_ptr().cast::<u8>(), self.layout);
        }
    }
}
