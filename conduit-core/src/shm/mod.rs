// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Shared Memory IPC module.
//!
//! A mutex-guarded circular byte buffer that can live on the heap or inside a
//! System V shared memory segment mapped by several processes.

mod ring_buffer;
mod segment;
mod sync;

pub use ring_buffer::{RingBuffer, RingView};
pub use segment::{SharedSegment, SEGMENT_DATA_OFFSET};
pub use sync::{Condition, SyncGuard, SyncHandle};
