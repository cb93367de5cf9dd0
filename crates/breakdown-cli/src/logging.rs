use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when `RUST_LOG` is unset
pub(crate) fn default_directive(verbose: bool) -> String {
    let level = if verbose { "debug" } else { "info" };
    format!("breakdown={level},breakdown_core={level}")
}

/// Initialize logging on stderr
///
/// Stdout is reserved for pipeline events, one JSON document per line.
/// `RUST_LOG` overrides the verbosity flag.
pub(crate) fn init(verbose: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact();

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init();
}
