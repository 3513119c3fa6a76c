// SPDX-FileCopyrightText: 2025 Moritz Neeb <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Demo-binary CLI, gated behind the `executable-deps` feature exactly like
//! the reference daemon gates its own binary-only dependencies.

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
    /// Enable debug-level logging.
    #[arg(long, global = true)]
    pub debug: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Spin up an in-process multi-document registry behind a toy
    /// line-oriented demo transport, for manually exercising pushes and pulls.
    Serve {
        /// Address to listen on. Defaults to the configured/default bind address.
        #[arg(long, env = "BRAID_BIND_ADDR")]
        bind: Option<String>,
    },
    /// Run one of the convergence scenarios (s1-s6) and print whether the
    /// participating clients converged.
    Simulate {
        /// Which scenario to run: s1, s2, s3, s4, s5, or s6. Defaults to
        /// running all of them in sequence.
        #[arg(long)]
        scenario: Option<String>,
    },
}

#[test]
fn verify() {
    use clap::CommandFactory as _;
    Cli::command().debug_assert();
}
