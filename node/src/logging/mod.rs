//! Logging setup.

use crate::cli::NodeConfig;
use tracing_subscriber::EnvFilter;

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set; otherwise the verbosity flags map to an info
/// default, `-v` for debug, `-vv` for trace of this crate.
pub fn init_tracing(config: &NodeConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let (global, local) = match config.verbosity {
            0 => ("warn", "info"),
            1 => ("warn", "debug"),
            _ => ("info", "trace"),
        };
        EnvFilter::new(format!("{global},ens_pinning_node={local}"))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
