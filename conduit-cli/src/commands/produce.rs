// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `conduit produce` command - Stream input into the transport.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use conduit_core::{Role, Transport, TransportConfig};

use super::{CliError, TransferSummary, POLL_INTERVAL};

pub fn execute(
    config: &TransportConfig,
    input: Option<&Path>,
    chunk: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    if chunk == 0 {
        return Err(CliError::InvalidChunk.into());
    }

    let mut reader: Box<dyn Read> = match input {
        Some(path) => Box::new(File::open(path).map_err(|e| CliError::Io {
            context: "opening input file",
            source: e,
        })?),
        None => Box::new(io::stdin().lock()),
    };

    let transport = Transport::open(config, Role::Producer)?;

    // Writes above half the ring could leave both sides waiting on each other.
    let chunk = match transport.capacity() {
        Some(capacity) => chunk.min((capacity / 2).max(1)),
        None => chunk,
    };
    tracing::debug!(chunk = chunk, "Producing");

    let mut buf = vec![0u8; chunk];
    let mut summary = TransferSummary::new();

    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                return Err(CliError::Io {
                    context: "reading input",
                    source: e,
                }
                .into())
            }
        };

        write_all(&transport, &buf[..n])?;
        summary.update(&buf[..n]);
    }

    drain(&transport, summary.bytes() > 0)?;

    let (bytes, crc) = summary.finish();
    tracing::info!(
        kind = %transport.kind(),
        bytes = bytes,
        crc32 = %format!("{:08x}", crc),
        "Stream produced"
    );
    Ok(())
}

fn write_all(transport: &Transport, mut data: &[u8]) -> Result<(), CliError> {
    while !data.is_empty() {
        match transport.produce(data) {
            Ok(0) => {
                return Err(CliError::Io {
                    context: "writing to transport",
                    source: io::ErrorKind::WriteZero.into(),
                })
            }
            Ok(n) => data = &data[n..],
            Err(e) if e.is_interrupted() => continue,
            Err(e) if e.is_would_block() => std::thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Hold a shared memory segment open until the consumer has read everything.
///
/// The region is removed once the last handle detaches, so leaving early
/// would drop unread bytes. With nothing sent, wait for a consumer to attach
/// so it sees an empty stream rather than a missing region.
fn drain(transport: &Transport, sent: bool) -> Result<(), CliError> {
    let mut peer_seen = sent;

    while let Some(pending) = transport.pending()? {
        if transport.references().is_some_and(|n| n > 1) {
            peer_seen = true;
        }
        if pending == 0 && peer_seen {
            break;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
    Ok(())
}
