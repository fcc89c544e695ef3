//! Shared tracing/logging initialization.
//!
//! The controller and the relay use the same pattern for setting up
//! `tracing_subscriber` with an env-filter and optional JSON output.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialise the global tracing subscriber.
///
/// * `default_filter` -- default `RUST_LOG` value when the env-var is not set
///   (e.g. `"doomcode_relay=info"`).
/// * `log_json` -- when `true`, emit structured JSON log lines instead of the
///   human-readable format.
pub fn init_tracing(default_filter: &str, log_json: bool) {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.into()),
    );

    if log_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

/// Build the default filter for a binary, widening it when any of the given
/// debug env switches is set to `1`.
///
/// `DOOMCODE_DEBUG_SESSION=1` and `DOOMCODE_DEBUG_PTY=1` turn on debug-level
/// logging for the session wire and the PTY supervisor respectively.
pub fn default_filter_with_debug(base: &str, switches: &[(&str, &str)]) -> String {
    let mut filter = base.to_string();
    for (env_var, target) in switches {
        if std::env::var(env_var).as_deref() == Ok("1") {
            filter.push(',');
            filter.push_str(target);
            filter.push_str("=debug");
        }
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_switch_widens_filter() {
        std::env::set_var("DOOMCODE_TEST_DEBUG_X", "1");
        let filter = default_filter_with_debug(
            "doomcode_controller=info",
            &[("DOOMCODE_TEST_DEBUG_X", "doomcode_controller::agent")],
        );
        assert_eq!(
            filter,
            "doomcode_controller=info,doomcode_controller::agent=debug"
        );
        std::env::remove_var("DOOMCODE_TEST_DEBUG_X");
    }

    #[test]
    fn unset_switch_leaves_filter_alone() {
        let filter = default_filter_with_debug(
            "doomcode_relay=info",
            &[("DOOMCODE_TEST_DEBUG_UNSET", "doomcode_relay::server")],
        );
        assert_eq!(filter, "doomcode_relay=info");
    }
}
