use std::sync::OnceLock;

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

static DEBUG_ENABLED: OnceLock<bool> = OnceLock::new();

fn debug_from_env() -> bool {
    *DEBUG_ENABLED.get_or_init(|| {
        std::env::var("AZDO_EXPORT_DEBUG")
            .ok()
            .map(|v| is_truthy(&v))
            .unwrap_or(false)
    })
}

fn is_truthy(raw: &str) -> bool {
    let normalized = raw.trim().to_ascii_lowercase();
    normalized == "1" || normalized == "true" || normalized == "yes"
}

fn default_directive(config: &LoggingConfig) -> &'static str {
    if config.debug || debug_from_env() {
        "azdo_export=debug,info"
    } else {
        "info"
    }
}

/// Installs the process-wide subscriber. `RUST_LOG` takes precedence over
/// the configured level. Calling this twice is harmless.
pub fn init(config: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config)));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true);

    let result = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    if result.is_ok() {
        tracing::debug!(json = config.json, "logging initialised");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values_enable_debug() {
        assert!(is_truthy("1"));
        assert!(is_truthy(" TRUE "));
        assert!(is_truthy("yes"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("off"));
    }

    #[test]
    fn configured_debug_selects_crate_debug_level() {
        let cfg = LoggingConfig {
            debug: true,
            json: false,
        };
        assert_eq!(default_directive(&cfg), "azdo_export=debug,info");
    }
}
