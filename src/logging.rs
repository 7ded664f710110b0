// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Tracing subscriber setup for services embedding the engine.

use crate::settings::LoggingSettings;
use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber. `RUST_LOG` wins over `settings.level`.
///
/// Calling it again once a subscriber is installed does nothing. Any other failure to
/// install it is reported on stderr, since there is no logger to report it to.
pub fn init(settings: &LoggingSettings) {
    if tracing::dispatcher::has_been_set() {
        return;
    }

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let installed = match settings.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };

    if let Err(err) = installed {
        eprintln!("failure to install the tracing subscriber: {err}");
    }
}
