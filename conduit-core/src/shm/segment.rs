// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! SharedSegment - System V shared memory holding one ring buffer.
//!
//! The region is laid out as `[references][ring header][capacity bytes]`.
//! Both sides must run the same build; the layout is not a portable format.
//!
//! The producer creates the region exclusively and initializes the ring with
//! process-shared primitives. Every handle increments the reference count on
//! attach and decrements it on detach. Whoever drops the count to zero
//! destroys the primitives and marks the region for removal.

use std::ffi::CString;
use std::mem::{offset_of, size_of, MaybeUninit};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr::{self, addr_of_mut, NonNull};
use std::sync::atomic::{AtomicI32, Ordering};

use nix::errno::Errno;

use crate::error::SharedMemoryError;
use crate::shm::ring_buffer::{RingBufferHeader, RingView};

/// Project identifier mixed into the `ftok` key.
const PROJECT_ID: libc::c_int = b'c' as libc::c_int;

/// Region header. The ring's data bytes follow it directly.
#[repr(C)]
struct SegmentHeader {
    /// Attached handles across all processes.
    references: AtomicI32,
    ring: RingBufferHeader,
}

const RING_OFFSET: usize = offset_of!(SegmentHeader, ring);

/// Offset of the first data byte in the region.
pub const SEGMENT_DATA_OFFSET: usize = size_of::<SegmentHeader>();

/// A mapped shared memory segment.
///
/// Detaches on drop.
pub struct SharedSegment {
    path: PathBuf,
    key: libc::key_t,
    id: libc::c_int,
    base: NonNull<SegmentHeader>,
    /// Whether this handle created the region.
    creator: bool,
    attached: bool,
}

// SAFETY: the mapping is owned by the handle; the ring inside is synchronized
// by its own mutex and the reference count is atomic.
unsafe impl Send for SharedSegment {}
unsafe impl Sync for SharedSegment {}

impl SharedSegment {
    /// Largest ring capacity accepted (1 GB).
    pub const MAX_CAPACITY: usize = 1024 * 1024 * 1024;

    /// Create a new region for `path` and attach to it.
    ///
    /// # Errors
    /// [`SharedMemoryError::AlreadyExists`] if a region exists for the key,
    /// [`SharedMemoryError::KeyDerivation`] if `path` does not exist.
    pub fn create(
        path: impl AsRef<Path>,
        capacity: usize,
        mode: u32,
    ) -> Result<Self, SharedMemoryError> {
        let path = path.as_ref();

        if capacity == 0 || capacity > Self::MAX_CAPACITY {
            return Err(SharedMemoryError::InvalidCapacity {
                capacity,
                reason: format!("must be between 1 and {} bytes", Self::MAX_CAPACITY),
            });
        }

        let key = derive_key(path)?;
        let size = SEGMENT_DATA_OFFSET + capacity;
        let flags = libc::IPC_CREAT | libc::IPC_EXCL | (mode & 0o777) as libc::c_int;

        // SAFETY: plain syscall with valid arguments.
        let id = unsafe { libc::shmget(key, size, flags) };
        if id == -1 {
            let errno = Errno::last();
            if errno == Errno::EEXIST {
                return Err(SharedMemoryError::AlreadyExists {
                    path: path.to_path_buf(),
                });
            }
            return Err(SharedMemoryError::CreateFailed {
                path: path.to_path_buf(),
                errno,
            });
        }

        let base = match map(id) {
            Ok(base) => base,
            Err(errno) => {
                mark_for_removal(id, path);
                return Err(SharedMemoryError::AttachFailed {
                    path: path.to_path_buf(),
                    errno,
                });
            }
        };

        // SAFETY: the region is freshly created and zeroed. The count reaches
        // one before the ring publishes its capacity, so an early attacher
        // sees either an uninitialized ring or a live segment.
        let init = unsafe {
            let header = base.as_ptr();
            addr_of_mut!((*header).references).write(AtomicI32::new(0));
            (*header).references.fetch_add(1, Ordering::AcqRel);
            RingBufferHeader::init(addr_of_mut!((*header).ring), capacity, true)
        };
        if let Err(e) = init {
            unmap(base, path);
            mark_for_removal(id, path);
            return Err(e.into());
        }

        tracing::debug!(
            path = %path.display(),
            key = key,
            id = id,
            capacity = capacity,
            "Created shared memory segment"
        );

        Ok(Self {
            path: path.to_path_buf(),
            key,
            id,
            base,
            creator: true,
            attached: true,
        })
    }

    /// Attach to the region previously created for `path`.
    ///
    /// # Errors
    /// [`SharedMemoryError::NotFound`] if the producer has not created it yet,
    /// [`SharedMemoryError::NotInitialized`] if creation is still in progress.
    pub fn attach(path: impl AsRef<Path>) -> Result<Self, SharedMemoryError> {
        let path = path.as_ref();
        let key = derive_key(path)?;

        // SAFETY: plain syscall; size 0 and no flags look up an existing id.
        let id = unsafe { libc::shmget(key, 0, 0) };
        if id == -1 {
            let errno = Errno::last();
            if errno == Errno::ENOENT {
                return Err(SharedMemoryError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            return Err(SharedMemoryError::AttachFailed {
                path: path.to_path_buf(),
                errno,
            });
        }

        let segment_size = stat_size(id, path)?;
        if segment_size <= SEGMENT_DATA_OFFSET {
            return Err(SharedMemoryError::LayoutMismatch {
                path: path.to_path_buf(),
                reason: format!(
                    "segment of {} bytes cannot hold the {} byte header",
                    segment_size, SEGMENT_DATA_OFFSET
                ),
            });
        }

        let base = map(id).map_err(|errno| SharedMemoryError::AttachFailed {
            path: path.to_path_buf(),
            errno,
        })?;

        // SAFETY: the mapping covers at least the header.
        let header = unsafe { base.as_ref() };
        let capacity = header.ring.published_capacity();
        if capacity == 0 {
            unmap(base, path);
            return Err(SharedMemoryError::NotInitialized {
                path: path.to_path_buf(),
            });
        }
        if SEGMENT_DATA_OFFSET + capacity > segment_size {
            unmap(base, path);
            return Err(SharedMemoryError::LayoutMismatch {
                path: path.to_path_buf(),
                reason: format!(
                    "ring capacity {} does not fit a {} byte segment",
                    capacity, segment_size
                ),
            });
        }

        // A previous count of zero means the last holder is tearing it down.
        if header.references.fetch_add(1, Ordering::AcqRel) == 0 {
            header.references.fetch_sub(1, Ordering::AcqRel);
            unmap(base, path);
            return Err(SharedMemoryError::NotFound {
                path: path.to_path_buf(),
            });
        }

        tracing::debug!(
            path = %path.display(),
            key = key,
            id = id,
            capacity = capacity,
            "Attached shared memory segment"
        );

        Ok(Self {
            path: path.to_path_buf(),
            key,
            id,
            base,
            creator: false,
            attached: true,
        })
    }

    /// Mark the region for `path` for removal without attaching.
    ///
    /// Used to clear a region left behind by a process that never detached.
    pub fn remove(path: impl AsRef<Path>) -> Result<(), SharedMemoryError> {
        let path = path.as_ref();
        let key = derive_key(path)?;

        // SAFETY: plain syscall.
        let id = unsafe { libc::shmget(key, 0, 0) };
        if id == -1 {
            let errno = Errno::last();
            return Err(if errno == Errno::ENOENT {
                SharedMemoryError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                SharedMemoryError::AttachFailed {
                    path: path.to_path_buf(),
                    errno,
                }
            });
        }

        // SAFETY: IPC_RMID takes no buffer.
        if unsafe { libc::shmctl(id, libc::IPC_RMID, ptr::null_mut()) } == -1 {
            return Err(SharedMemoryError::RemoveFailed {
                path: path.to_path_buf(),
                errno: Errno::last(),
            });
        }

        tracing::info!(path = %path.display(), id = id, "Marked shared memory segment for removal");
        Ok(())
    }

    fn header(&self) -> &SegmentHeader {
        // SAFETY: mapped for as long as `self` is attached.
        unsafe { self.base.as_ref() }
    }

    /// The embedded ring.
    pub fn ring(&self) -> RingView<'_> {
        // SAFETY: the ring header sits at RING_OFFSET and was initialized by
        // the creator; the mapping outlives the returned view.
        unsafe {
            let ring = self.base.as_ptr().cast::<u8>().add(RING_OFFSET);
            RingView::from_raw(NonNull::new_unchecked(ring.cast::<RingBufferHeader>()))
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn key(&self) -> libc::key_t {
        self.key
    }

    pub fn id(&self) -> libc::c_int {
        self.id
    }

    pub fn is_creator(&self) -> bool {
        self.creator
    }

    pub fn capacity(&self) -> usize {
        self.ring().capacity()
    }

    /// Current number of attached handles, across processes.
    pub fn references(&self) -> i32 {
        self.header().references.load(Ordering::Acquire)
    }

    /// Detach explicitly. Returns the number of handles still attached.
    pub fn detach(mut self) -> i32 {
        self.release()
    }

    fn release(&mut self) -> i32 {
        if !self.attached {
            return 0;
        }
        self.attached = false;

        let remaining = self.header().references.fetch_sub(1, Ordering::AcqRel) - 1;
        if remaining == 0 {
            // SAFETY: we were the last handle, nobody else can reach the ring.
            unsafe { self.header().ring.destroy() };
        }

        unmap(self.base, &self.path);

        if remaining == 0 {
            mark_for_removal(self.id, &self.path);
        }

        tracing::debug!(
            path = %self.path.display(),
            id = self.id,
            remaining = remaining,
            "Detached shared memory segment"
        );
        remaining
    }
}

impl Drop for SharedSegment {
    fn drop(&mut self) {
        self.release();
    }
}

fn derive_key(path: &Path) -> Result<libc::key_t, SharedMemoryError> {
    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
        SharedMemoryError::KeyDerivation {
            path: path.to_path_buf(),
            errno: Errno::EINVAL,
        }
    })?;

    // SAFETY: c_path is a valid NUL-terminated string.
    let key = unsafe { libc::ftok(c_path.as_ptr(), PROJECT_ID) };
    if key == -1 {
        return Err(SharedMemoryError::KeyDerivation {
            path: path.to_path_buf(),
            errno: Errno::last(),
        });
    }
    Ok(key)
}

fn stat_size(id: libc::c_int, path: &Path) -> Result<usize, SharedMemoryError> {
    let mut ds = MaybeUninit::<libc::shmid_ds>::zeroed();
    // SAFETY: ds is a valid out-buffer for IPC_STAT.
    if unsafe { libc::shmctl(id, libc::IPC_STAT, ds.as_mut_ptr()) } == -1 {
        return Err(SharedMemoryError::StatFailed {
            path: path.to_path_buf(),
            errno: Errno::last(),
        });
    }
    // SAFETY: filled in by a successful IPC_STAT.
    Ok(unsafe { ds.assume_init() }.shm_segsz as usize)
}

fn map(id: libc::c_int) -> Result<NonNull<SegmentHeader>, Errno> {
    // SAFETY: let the kernel pick the address; read/write mapping.
    let addr = unsafe { libc::shmat(id, ptr::null(), 0) };
    if addr as isize == -1 {
        return Err(Errno::last());
    }
    NonNull::new(addr.cast::<SegmentHeader>()).ok_or(Errno::EFAULT)
}

fn unmap(base: NonNull<SegmentHeader>, path: &Path) {
    // SAFETY: base came from shmat and is detached once.
    if unsafe { libc::shmdt(base.as_ptr().cast::<libc::c_void>()) } == -1 {
        tracing::warn!(
            path = %path.display(),
            error = %Errno::last(),
            "Failed to detach shared memory segment"
        );
    }
}

fn mark_for_removal(id: libc::c_int, path: &Path) {
    // SAFETY: IPC_RMID takes no buffer.
    if unsafe { libc::shmctl(id, libc::IPC_RMID, ptr::null_mut()) } == -1 {
        tracing::warn!(
            path = %path.display(),
            id = id,
            error = %Errno::last(),
            "Failed to mark shared memory segment for removal"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn key_file() -> NamedTempFile {
        NamedTempFile::new().expect("Failed to create key file")
    }

    #[test]
    fn test_create_and_attach_share_data() {
        let file = key_file();
        let producer = SharedSegment::create(file.path(), 64, 0o600).unwrap();
        assert!(producer.is_creator());
        assert_eq!(producer.capacity(), 64);
        assert_eq!(producer.references(), 1);

        producer.ring().produce(b"hello shared world", true).unwrap();

        let consumer = SharedSegment::attach(file.path()).unwrap();
        assert!(!consumer.is_creator());
        assert_eq!(consumer.key(), producer.key());
        assert_eq!(consumer.references(), 2);
        assert!(consumer.ring().is_shared());

        let mut data = [0u8; 18];
        consumer.ring().consume(&mut data, false).unwrap();
        assert_eq!(&data, b"hello shared world");
        assert!(producer.ring().is_empty().unwrap());
    }

    #[test]
    fn test_create_is_exclusive() {
        let file = key_file();
        let _first = SharedSegment::create(file.path(), 32, 0o600).unwrap();
        assert!(matches!(
            SharedSegment::create(file.path(), 32, 0o600),
            Err(SharedMemoryError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_missing_key_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("does-not-exist");
        assert!(matches!(
            SharedSegment::create(&missing, 32, 0o600),
            Err(SharedMemoryError::KeyDerivation { .. })
        ));
        assert!(matches!(
            SharedSegment::attach(&missing),
            Err(SharedMemoryError::KeyDerivation { .. })
        ));
    }

    #[test]
    fn test_attach_before_create() {
        let file = key_file();
        assert!(matches!(
            SharedSegment::attach(file.path()),
            Err(SharedMemoryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_capacity_validation() {
        let file = key_file();
        assert!(matches!(
            SharedSegment::create(file.path(), 0, 0o600),
            Err(SharedMemoryError::InvalidCapacity { .. })
        ));
        assert!(matches!(
            SharedSegment::create(file.path(), SharedSegment::MAX_CAPACITY + 1, 0o600),
            Err(SharedMemoryError::InvalidCapacity { .. })
        ));
    }

    #[test]
    fn test_reference_counted_teardown() {
        let file = key_file();
        let producer = SharedSegment::create(file.path(), 16, 0o600).unwrap();
        let consumer = SharedSegment::attach(file.path()).unwrap();

        producer.ring().produce(b"persist", true).unwrap();
        assert_eq!(producer.detach(), 1);

        // Region and data survive the first detach.
        let mut data = [0u8; 7];
        consumer.ring().consume(&mut data, false).unwrap();
        assert_eq!(&data, b"persist");
        assert_eq!(consumer.references(), 1);

        assert_eq!(consumer.detach(), 0);
        assert!(matches!(
            SharedSegment::attach(file.path()),
            Err(SharedMemoryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_drop_releases_region() {
        let file = key_file();
        {
            let _segment = SharedSegment::create(file.path(), 16, 0o600).unwrap();
        }
        // Recreating succeeds once the only handle has been dropped.
        let segment = SharedSegment::create(file.path(), 16, 0o600).unwrap();
        assert_eq!(segment.references(), 1);
    }

    #[test]
    fn test_blocked_consumer_woken_across_mappings() {
        let file = key_file();
        let producer = SharedSegment::create(file.path(), 32, 0o600).unwrap();
        let consumer = Arc::new(SharedSegment::attach(file.path()).unwrap());

        let reader = std::thread::spawn({
            let consumer = Arc::clone(&consumer);
            move || {
                let mut data = [0u8; 6];
                consumer.ring().consume(&mut data, true).unwrap();
                data
            }
        });

        std::thread::sleep(Duration::from_millis(20));
        producer.ring().produce(b"wakeup", true).unwrap();
        assert_eq!(&reader.join().unwrap(), b"wakeup");
    }

    #[test]
    fn test_uninitialized_region_rejected_and_removed() {
        let file = key_file();
        let key = derive_key(file.path()).unwrap();
        let id = unsafe {
            libc::shmget(
                key,
                SEGMENT_DATA_OFFSET + 16,
                libc::IPC_CREAT | libc::IPC_EXCL | 0o600,
            )
        };
        assert_ne!(id, -1);

        assert!(matches!(
            SharedSegment::attach(file.path()),
            Err(SharedMemoryError::NotInitialized { .. })
        ));

        SharedSegment::remove(file.path()).unwrap();
        assert!(matches!(
            SharedSegment::remove(file.path()),
            Err(SharedMemoryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_peer_dying_with_lock_fails_transport() {
        let file = key_file();
        let producer = SharedSegment::create(file.path(), 16, 0o600).unwrap();

        let pid = unsafe { libc::fork() };
        assert_ne!(pid, -1);
        if pid == 0 {
            // Child: take the lock and exit without releasing it.
            let code = match SharedSegment::attach(file.path()) {
                Ok(segment) => {
                    let locked = segment.ring().sync().lock();
                    if locked.is_ok() {
                        std::mem::forget(locked);
                        std::mem::forget(segment);
                        0
                    } else {
                        2
                    }
                }
                Err(_) => 1,
            };
            unsafe { libc::_exit(code) };
        }

        let mut status = 0;
        assert_eq!(unsafe { libc::waitpid(pid, &mut status, 0) }, pid);
        assert!(libc::WIFEXITED(status));
        assert_eq!(libc::WEXITSTATUS(status), 0);
        assert_eq!(producer.references(), 2);

        assert!(matches!(
            producer.ring().produce(b"x", false),
            Err(SharedMemoryError::Sync(SyncError::OwnerDied))
        ));
        assert!(matches!(
            producer.ring().produce(b"x", false),
            Err(SharedMemoryError::Sync(SyncError::NotRecoverable))
        ));

        // The dead child's reference is never released.
        SharedSegment::remove(file.path()).unwrap();
        drop(producer);
        assert!(matches!(
            SharedSegment::attach(file.path()),
            Err(SharedMemoryError::NotFound { .. })
        ));
    }
}
