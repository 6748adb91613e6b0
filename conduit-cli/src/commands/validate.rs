// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! `conduit validate` command - Validate configuration file.

use conduit_core::{ConfigLoader, TransportKind};

pub fn execute(file: &str) -> Result<(), Box<dyn std::error::Error>> {
    tracing::info!(file = %file, "Validating configuration");

    match ConfigLoader::load_file(file) {
        Ok(config) => {
            println!("✓ Configuration is valid");
            println!();
            println!("Transport Settings:");
            println!("  Kind:     {}", config.kind);
            println!("  Path:     {}", config.path.display());
            println!("  Mode:     {:04o}", config.mode);
            match config.kind {
                TransportKind::SharedMemory => {
                    println!("  Capacity: {} bytes", config.capacity);
                }
                TransportKind::NamedPipe => {
                    println!("  Flags:    {:#x}", config.flags);
                }
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("✗ Configuration validation failed:");
            eprintln!("  {}", e);
            std::process::exit(1);
        }
    }
}
