//! Tracing subscriber setup for binaries and tests embedding the core

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset or unparsable
pub const DEFAULT_DIRECTIVE: &str = "modula_core=info";

fn env_filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Install a global `fmt` subscriber.
///
/// `RUST_LOG` wins over `default_directive`. Returns `false` when a global
/// subscriber was already installed, so repeated calls are harmless.
pub fn init_tracing(default_directive: &str, json: bool) -> bool {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(default_directive))
        .with_target(true);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_noop() {
        init_tracing(DEFAULT_DIRECTIVE, false);
        assert!(!init_tracing(DEFAULT_DIRECTIVE, true));
    }
}
