// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Named pipe (FIFO) byte channel.
//!
//! Opening a FIFO for one direction blocks until a peer opens the other, so
//! the descriptor is opened on the first produce or consume rather than at
//! construction. Reads and writes pass straight through to the OS; the kernel
//! pipe buffer is the only store.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::FileTypeExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock, PoisonError};

use nix::errno::Errno;
use nix::sys::stat::Mode;

use crate::config::Role;
use crate::error::PipeError;

/// One endpoint of a FIFO.
pub struct NamedPipe {
    path: PathBuf,
    role: Role,
    /// Status flags OR-ed into the descriptor after opening.
    flags: i32,
    file: OnceLock<File>,
    open_lock: Mutex<()>,
}

impl NamedPipe {
    /// Prepare an endpoint at `path`.
    ///
    /// The producer creates the FIFO with `mode` if nothing exists at `path`.
    /// An existing path must be a FIFO.
    pub fn new(
        path: impl Into<PathBuf>,
        role: Role,
        mode: u32,
        flags: i32,
    ) -> Result<Self, PipeError> {
        let path = path.into();

        match fs::metadata(&path) {
            Ok(meta) if meta.file_type().is_fifo() => {}
            Ok(_) => return Err(PipeError::NotAFifo { path }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                if role.is_producer() {
                    create_fifo(&path, mode)?;
                }
            }
            Err(e) => return Err(PipeError::OpenFailed { path, source: e }),
        }

        Ok(Self {
            path,
            role,
            flags,
            file: OnceLock::new(),
            open_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn is_open(&self) -> bool {
        self.file.get().is_some()
    }

    /// Raw descriptor, once opened.
    pub fn descriptor(&self) -> Option<RawFd> {
        self.file.get().map(AsRawFd::as_raw_fd)
    }

    /// Write `data` with a single `write(2)`. Opens the FIFO first if needed.
    pub fn produce(&self, data: &[u8]) -> Result<usize, PipeError> {
        let mut file = self.file()?;
        file.write(data).map_err(PipeError::Write)
    }

    /// Read into `buf` with a single `read(2)`. Opens the FIFO first if needed.
    ///
    /// `Ok(0)` means every writer has closed its end.
    pub fn consume(&self, buf: &mut [u8]) -> Result<usize, PipeError> {
        let mut file = self.file()?;
        file.read(buf).map_err(PipeError::Read)
    }

    fn file(&self) -> Result<&File, PipeError> {
        if let Some(file) = self.file.get() {
            return Ok(file);
        }

        let _guard = self.open_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(file) = self.file.get() {
            return Ok(file);
        }

        let file = self.open()?;
        Ok(self.file.get_or_init(|| file))
    }

    fn open(&self) -> Result<File, PipeError> {
        let producer = self.role.is_producer();
        let file = OpenOptions::new()
            .read(!producer)
            .write(producer)
            .open(&self.path)
            .map_err(|e| PipeError::OpenFailed {
                path: self.path.clone(),
                source: e,
            })?;

        if self.flags != 0 {
            add_status_flags(&file, self.flags).map_err(|e| PipeError::Flags {
                path: self.path.clone(),
                source: e,
            })?;
        }

        tracing::debug!(
            path = %self.path.display(),
            role = %self.role,
            fd = file.as_raw_fd(),
            "Opened named pipe"
        );
        Ok(file)
    }
}

fn create_fifo(path: &Path, mode: u32) -> Result<(), PipeError> {
    match nix::unistd::mkfifo(path, Mode::from_bits_truncate(mode)) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), mode = mode, "Created FIFO");
            Ok(())
        }
        // Another producer created it first.
        Err(Errno::EEXIST) => match fs::metadata(path) {
            Ok(meta) if meta.file_type().is_fifo() => Ok(()),
            _ => Err(PipeError::NotAFifo {
                path: path.to_path_buf(),
            }),
        },
        Err(errno) => Err(PipeError::CreateFailed {
            path: path.to_path_buf(),
            source: io::Error::from(errno),
        }),
    }
}

fn add_status_flags(file: &File, flags: i32) -> io::Result<()> {
    let fd = file.as_raw_fd();

    // SAFETY: fd is a valid open descriptor owned by `file`.
    let current = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if current == -1 {
        return Err(io::Error::last_os_error());
    }

    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, current | flags) } == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
