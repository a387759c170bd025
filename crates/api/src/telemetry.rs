use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the filter follows the config debug
/// flag. Safe to call more than once; later calls are no-ops.
pub fn init(debug: bool) {
    let default_filter = if debug {
        "nutrio_api=debug,nutrio_auth=debug"
    } else {
        "nutrio_api=info,nutrio_auth=info"
    };
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
