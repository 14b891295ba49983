use tracing::level_filters::LevelFilter;
use tracing_subscriber::{filter::Directive, EnvFilter};

const DEFAULT_DIRECTIVE: &str = "energy_ingest=info";

/// Installs the process-wide fmt subscriber. `RUST_LOG` adds to the default
/// `energy_ingest=info` directive.
///
/// Fetch spans (`city`, `source`) are rendered as prefixes, so retry lines
/// carry their context without repeating it in every event.
pub fn init_tracing() {
    let directive: Directive = DEFAULT_DIRECTIVE
        .parse()
        .unwrap_or_else(|_| LevelFilter::INFO.into());
    let filter = EnvFilter::from_default_env().add_directive(directive);

    // A second call (e.g. from a test harness) keeps the first subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
