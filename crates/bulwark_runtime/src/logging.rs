//! Tracing subscriber bootstrap.
//!
//! Libraries only emit events; hosts call one of these once at startup.
//! `RUST_LOG` overrides the default filter. Both are no-ops when a global
//! subscriber is already installed, so tests may call them freely.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn filter(default_filter: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter))
}

/// Install a human-readable subscriber; returns whether it was installed
pub fn init_tracing(default_filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(filter(default_filter))
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok()
}

/// Install a JSON-lines subscriber; returns whether it was installed
pub fn init_json_tracing(default_filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(filter(default_filter))
        .with(fmt::layer().json().with_current_span(false))
        .try_init()
        .is_ok()
}
