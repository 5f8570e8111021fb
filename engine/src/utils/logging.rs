use const_format::concatcp;

use common::log_debug;

use crate::config::ENV_PREFIX;

pub const LOG_ENV: &str = concatcp!(ENV_PREFIX, "_LOG");
const LOG_TREE_INDENT: usize = 2;

/// Installs a global `tracing` subscriber for the engine.
///
/// The filter is read from the `BINSYM_LOG` environment variable using the
/// `EnvFilter` directive syntax (e.g., `binsym=debug`). Events are printed as a
/// tree following instruction processing spans.
/// Calling it more than once, or after another subscriber is installed, has no
/// effect.
pub fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = EnvFilter::builder().parse_lossy(std::env::var(LOG_ENV).unwrap_or_default());

    let tree_layer = tracing_tree::HierarchicalLayer::new(LOG_TREE_INDENT)
        .with_writer(std::io::stderr)
        .with_targets(true)
        .with_bracketed_fields(true);

    match tracing_subscriber::registry()
        .with(env_filter)
        .with(tree_layer)
        .try_init()
    {
        Ok(()) => log_debug!("Logging initialized"),
        Err(err) => log_debug!("Logging is already initialized: {}", err),
    }
}
