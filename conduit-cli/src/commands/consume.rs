// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `conduit consume` command - Stream transport data to an output.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use conduit_core::{Role, Transport, TransportConfig};

use super::{CliError, TransferSummary, POLL_INTERVAL};

pub fn execute(
    config: &TransportConfig,
    output: Option<&Path>,
    limit: Option<u64>,
    chunk: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if chunk == 0 {
        return Err(CliError::InvalidChunk.into());
    }

    let transport = Transport::open(config, Role::Consumer)?;

    let mut writer: Box<dyn Write> = match output {
        Some(path) => Box::new(BufWriter::new(File::create(path).map_err(|e| {
            CliError::Io {
                context: "creating output file",
                source: e,
            }
        })?)),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let mut buf = vec![0u8; chunk];
    let mut summary = TransferSummary::new();

    loop {
        let remaining = match limit {
            Some(limit) if summary.bytes() >= limit => break,
            Some(limit) => (limit - summary.bytes()).min(chunk as u64) as usize,
            None => chunk,
        };

        let Some(n) = next_read(&transport, remaining)? else {
            break;
        };

        match transport.consume(&mut buf[..n]) {
            Ok(0) => break,
            Ok(n) => {
                writer.write_all(&buf[..n]).map_err(|e| CliError::Io {
                    context: "writing output",
                    source: e,
                })?;
                summary.update(&buf[..n]);
            }
            Err(e) if e.is_interrupted() => continue,
            Err(e) if e.is_would_block() => std::thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(e.into()),
        }
    }

    writer.flush().map_err(|e| CliError::Io {
        context: "flushing output",
        source: e,
    })?;

    let (bytes, crc) = summary.finish();
    if let Some(limit) = limit.filter(|&limit| bytes < limit) {
        tracing::warn!(expected = limit, received = bytes, "Stream ended early");
    }
    tracing::info!(
        kind = %transport.kind(),
        bytes = bytes,
        crc32 = %format!("{:08x}", crc),
        "Stream consumed"
    );
    Ok(())
}

/// Size of the next consume, at most `want` bytes, or `None` at end of stream.
///
/// A pipe reports end of stream itself, so any size works. A ring consume
/// waits for exactly the requested bytes, so only ask for what is already
/// held. The stream has ended once the ring is empty and the producer has
/// detached.
fn next_read(transport: &Transport, want: usize) -> Result<Option<usize>, CliError> {
    loop {
        let Some(pending) = transport.pending()? else {
            return Ok(Some(want));
        };

        if pending > 0 {
            return Ok(Some(pending.min(want)));
        }
        if transport.references().is_some_and(|n| n <= 1) {
            return Ok(None);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}
