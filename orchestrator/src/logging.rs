//! Diagnostic tracing for the orchestrator CLI.
//!
//! Tracing output goes to stderr and is controlled by `RUST_LOG`. It is
//! separate from the event log (`events`), which is stored with the project
//! data and always written.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is unset, empty or unparsable.
pub const DEFAULT_FILTER: &str = "warn";

/// Install a compact stderr subscriber filtered by `RUST_LOG`.
///
/// ```bash
/// RUST_LOG=orchestrator::step=debug orchestrator step <project-id>
/// ```
pub fn init() {
    let raw = std::env::var("RUST_LOG").ok();
    let (filter, rejected) = filter_from(raw.as_deref());

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();

    if let Some(raw) = rejected {
        tracing::warn!(rust_log = %raw, default = DEFAULT_FILTER, "ignoring invalid RUST_LOG");
    }
}

/// Parse `raw` as filter directives. Returns the rejected input alongside
/// the default filter when it does not parse.
fn filter_from(raw: Option<&str>) -> (EnvFilter, Option<String>) {
    match raw.map(str::trim).filter(|raw| !raw.is_empty()) {
        None => (EnvFilter::new(DEFAULT_FILTER), None),
        Some(raw) => match EnvFilter::try_new(raw) {
            Ok(filter) => (filter, None),
            Err(_) => (EnvFilter::new(DEFAULT_FILTER), Some(raw.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use tracing::level_filters::LevelFilter;

    use super::*;

    #[test]
    fn unset_or_blank_uses_default() {
        for raw in [None, Some(""), Some("   ")] {
            let (filter, rejected) = filter_from(raw);
            assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
            assert!(rejected.is_none());
        }
    }

    #[test]
    fn valid_directives_are_kept() {
        let (filter, rejected) = filter_from(Some("orchestrator=debug"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
        assert!(rejected.is_none());
    }

    #[test]
    fn invalid_directives_fall_back_and_are_reported() {
        let (filter, rejected) = filter_from(Some("orchestrator=loud"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
        assert_eq!(rejected.as_deref(), Some("orchestrator=loud"));
    }
}
