// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Mutex plus two condition variables, usable across processes.
//!
//! The primitives are raw pthread objects so they can live inside a shared
//! memory region that other processes map. Whether they are process-shared is
//! fixed at initialization and cannot change afterwards.
//!
//! The mutex is robust: if a peer dies while holding it, the next locker gets
//! [`SyncError::OwnerDied`] and the mutex is left unrecoverable.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::ptr::addr_of_mut;

use crate::error::SyncError;

/// Which condition variable to wait on or notify.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// Signalled after a produce.
    DataAvailable,
    /// Signalled after a consume.
    SpaceAvailable,
}

/// Mutex and condition variables stored in place.
///
/// Never moved after [`SyncHandle::init`]; pthread objects are address-bound.
#[repr(C)]
pub struct SyncHandle {
    mutex: UnsafeCell<libc::pthread_mutex_t>,
    data_available: UnsafeCell<libc::pthread_cond_t>,
    space_available: UnsafeCell<libc::pthread_cond_t>,
}

// SAFETY: all access to the inner objects goes through pthread calls, which
// do their own synchronization.
unsafe impl Send for SyncHandle {}
unsafe impl Sync for SyncHandle {}

fn check(operation: &'static str, code: libc::c_int) -> Result<(), SyncError> {
    if code == 0 {
        Ok(())
    } else {
        Err(SyncError::from_code(operation, code))
    }
}

impl SyncHandle {
    /// Initialize the primitives in place.
    ///
    /// `shared` selects `PTHREAD_PROCESS_SHARED` over `PTHREAD_PROCESS_PRIVATE`.
    /// On failure every primitive initialized so far is destroyed again.
    ///
    /// # Safety
    /// `this` must point to writable memory that stays at the same address
    /// until [`SyncHandle::destroy`], and no other party may use it yet.
    pub unsafe fn init(this: *mut SyncHandle, shared: bool) -> Result<(), SyncError> {
        let pshared = if shared {
            libc::PTHREAD_PROCESS_SHARED
        } else {
            libc::PTHREAD_PROCESS_PRIVATE
        };

        let mutex = addr_of_mut!((*this).mutex) as *mut libc::pthread_mutex_t;
        let data_available = addr_of_mut!((*this).data_available) as *mut libc::pthread_cond_t;
        let space_available = addr_of_mut!((*this).space_available) as *mut libc::pthread_cond_t;

        let mut mutexattr = MaybeUninit::<libc::pthread_mutexattr_t>::uninit();
        check(
            "pthread_mutexattr_init",
            libc::pthread_mutexattr_init(mutexattr.as_mut_ptr()),
        )?;
        let result = check(
            "pthread_mutexattr_setpshared",
            libc::pthread_mutexattr_setpshared(mutexattr.as_mut_ptr(), pshared),
        )
        .and_then(|()| {
            check(
                "pthread_mutexattr_setrobust",
                libc::pthread_mutexattr_setrobust(mutexattr.as_mut_ptr(), libc::PTHREAD_MUTEX_ROBUST),
            )
        })
        .and_then(|()| {
            check(
                "pthread_mutex_init",
                libc::pthread_mutex_init(mutex, mutexattr.as_ptr()),
            )
        });
        libc::pthread_mutexattr_destroy(mutexattr.as_mut_ptr());
        result?;

        let mut condattr = MaybeUninit::<libc::pthread_condattr_t>::uninit();
        if let Err(e) = check(
            "pthread_condattr_init",
            libc::pthread_condattr_init(condattr.as_mut_ptr()),
        ) {
            libc::pthread_mutex_destroy(mutex);
            return Err(e);
        }

        let result = check(
            "pthread_condattr_setpshared",
            libc::pthread_condattr_setpshared(condattr.as_mut_ptr(), pshared),
        )
        .and_then(|()| {
            check(
                "pthread_cond_init",
                libc::pthread_cond_init(data_available, condattr.as_ptr()),
            )
        })
        .and_then(|()| {
            let r = check(
                "pthread_cond_init",
                libc::pthread_cond_init(space_available, condattr.as_ptr()),
            );
            if r.is_err() {
                libc::pthread_cond_destroy(data_available);
            }
            r
        });
        libc::pthread_condattr_destroy(condattr.as_mut_ptr());

        if let Err(e) = result {
            libc::pthread_mutex_destroy(mutex);
            return Err(e);
        }

        tracing::trace!(shared, "Initialized ring synchronization primitives");
        Ok(())
    }

    /// Acquire the mutex.
    ///
    /// Returns [`SyncError::OwnerDied`] if the previous owner died holding it.
    /// The mutex is then released without being marked consistent, so every
    /// later attempt fails with [`SyncError::NotRecoverable`].
    pub fn lock(&self) -> Result<SyncGuard<'_>, SyncError> {
        // SAFETY: the mutex was initialized by `init` and is not destroyed
        // while `self` is reachable.
        let code = unsafe { libc::pthread_mutex_lock(self.mutex.get()) };
        match code {
            0 => Ok(SyncGuard { handle: self }),
            libc::EOWNERDEAD => {
                tracing::error!("Ring buffer mutex owner died; marking transport failed");
                // SAFETY: EOWNERDEAD means we now hold the mutex.
                unsafe { libc::pthread_mutex_unlock(self.mutex.get()) };
                Err(SyncError::OwnerDied)
            }
            code => Err(SyncError::from_code("pthread_mutex_lock", code)),
        }
    }

    fn cond(&self, condition: Condition) -> *mut libc::pthread_cond_t {
        match condition {
            Condition::DataAvailable => self.data_available.get(),
            Condition::SpaceAvailable => self.space_available.get(),
        }
    }

    /// Destroy the primitives. Best-effort: every step runs, failures are logged.
    ///
    /// # Safety
    /// No thread in any process may hold or wait on the primitives, and none
    /// may use them afterwards.
    pub unsafe fn destroy(&self) {
        let steps: [(&str, libc::c_int); 3] = [
            (
                "pthread_cond_destroy(space_available)",
                libc::pthread_cond_destroy(self.space_available.get()),
            ),
            (
                "pthread_cond_destroy(data_available)",
                libc::pthread_cond_destroy(self.data_available.get()),
            ),
            (
                "pthread_mutex_destroy",
                libc::pthread_mutex_destroy(self.mutex.get()),
            ),
        ];

        for (operation, code) in steps {
            if code != 0 {
                tracing::warn!(
                    operation,
                    error = %nix::errno::Errno::from_raw(code),
                    "Failed to destroy synchronization primitive"
                );
            }
        }
    }
}

/// Scoped lock on a [`SyncHandle`]. Unlocks on drop.
pub struct SyncGuard<'a> {
    handle: &'a SyncHandle,
}

impl SyncGuard<'_> {
    /// Block on `condition`, releasing the mutex while asleep.
    ///
    /// Wakeups may be spurious; callers loop on their predicate.
    pub fn wait(&mut self, condition: Condition) -> Result<(), SyncError> {
        // SAFETY: we hold the mutex; both objects were initialized together.
        let code =
            unsafe { libc::pthread_cond_wait(self.handle.cond(condition), self.handle.mutex.get()) };
        match code {
            0 => Ok(()),
            libc::EOWNERDEAD => {
                // The mutex is reacquired and released unrecovered by the guard drop.
                tracing::error!("Ring buffer mutex owner died during wait");
                Err(SyncError::OwnerDied)
            }
            code => Err(SyncError::from_code("pthread_cond_wait", code)),
        }
    }

    /// Wake every waiter on `condition`.
    pub fn notify(&self, condition: Condition) -> Result<(), SyncError> {
        // SAFETY: the condition variable was initialized by `init`.
        check("pthread_cond_broadcast", unsafe {
            libc::pthread_cond_broadcast(self.handle.cond(condition))
        })
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        // SAFETY: the guard exists only while the mutex is held.
        let code = unsafe { libc::pthread_mutex_unlock(self.handle.mutex.get()) };
        if code != 0 {
            tracing::error!(
                error = %nix::errno::Errno::from_raw(code),
                "Failed to unlock ring buffer mutex"
            );
        }
    }
}
