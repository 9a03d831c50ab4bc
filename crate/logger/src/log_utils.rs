use std::sync::Once;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor an explicit default is provided
pub const DEFAULT_LOG_FILTER: &str = "info";

static LOG_INIT: Once = Once::new();

/// Install the global tracing subscriber.
///
/// Only the first call has an effect. `RUST_LOG`, when set, takes precedence over
/// `default_value`, which itself falls back to [`DEFAULT_LOG_FILTER`].
///
/// A subscriber installed beforehand by the host application is left in place.
pub fn log_init(default_value: Option<&str>) {
    LOG_INIT.call_once(|| {
        let filter = std::env::var("RUST_LOG")
            .ok()
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| default_value.unwrap_or(DEFAULT_LOG_FILTER).to_owned());
        tracing_setup(&filter);
    });
}

fn tracing_setup(filter: &str) {
    let format = tracing_subscriber::fmt::layer()
        .with_level(true)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_file(true)
        .with_ansi(true)
        .compact();

    let (filter, _reload_handle) =
        tracing_subscriber::reload::Layer::new(EnvFilter::new(filter));

    // another subscriber (e.g. a test harness) may already be installed
    drop(
        tracing_subscriber::registry()
            .with(filter)
            .with(format)
            .try_init(),
    );
}
