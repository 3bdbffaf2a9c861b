use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter for the API server.
///
/// axum logs rejections from built-in extractors with the
/// `axum::rejection` target, at `TRACE` level. `axum::rejection=trace`
/// enables showing those events.
pub fn server_filter() -> String {
    format!(
        "{}=debug,tower_http=debug,axum::rejection=trace",
        env!("CARGO_CRATE_NAME")
    )
}

/// Default filter for the interactive chat so log lines don't drown
/// out the conversation.
pub fn repl_filter() -> String {
    format!("{}=warn", env!("CARGO_CRATE_NAME"))
}

/// Install the global subscriber. `RUST_LOG` takes precedence over
/// `default_filter`. Logs go to stderr so they never interleave with
/// answers printed to stdout.
pub fn init(default_filter: String) {
    let result = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();

    // Tests and embedders may have installed a subscriber already
    if let Err(e) = result {
        tracing::debug!("Tracing subscriber already set: {}", e);
    }
}
