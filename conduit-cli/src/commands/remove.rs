// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `conduit remove` command - Remove a stale shared memory region.
//!
//! A producer that crashed leaves its region behind, and the next `create`
//! for the same key fails with `AlreadyExists`.

use std::path::Path;

use conduit_core::SharedSegment;

pub fn execute(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(path = %path.display(), "Removing shared memory region");

    SharedSegment::remove(path)?;

    println!("✓ Region for {} marked for removal", path.display());
    Ok(())
}
