// SPDX-FileCopyrightText: 2025 Moritz Neeb <nt4u@kpvn.de>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging bootstrap.

use anyhow::Context;

pub fn initialize(debug: bool) -> anyhow::Result<()> {
    let timer = time::format_description::parse("[hour]:[minute]:[second]")
        .context("could not build time format description")?;
    let time_offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(time_offset, timer);

    let level = if debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(level)
        .with_thread_ids(true)
        .with_timer(timer)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("setting default log subscriber failed")
}
