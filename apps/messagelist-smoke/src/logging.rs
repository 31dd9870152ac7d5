//! Log output for the smoke run.

use std::env;

use tracing_subscriber::EnvFilter;

const DEFAULT_DIRECTIVE: &str = "info,messagelist_smoke=debug,messagelist_core=debug";

/// Install a compact stderr subscriber. `RUST_LOG` wins over
/// `MESSAGELIST_LOG`; an unparsable directive falls through to the next one.
pub fn init() {
    let directive = directive_from_lookup(|key| env::var(key).ok());
    let _ = tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::new(directive))
        .try_init();
}

fn directive_from_lookup<F>(lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ["RUST_LOG", "MESSAGELIST_LOG"]
        .into_iter()
        .filter_map(lookup)
        .map(|value| value.trim().to_owned())
        .find(|value| !value.is_empty() && EnvFilter::try_new(value).is_ok())
        .unwrap_or_else(|| DEFAULT_DIRECTIVE.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directive(pairs: &[(&str, &str)]) -> String {
        directive_from_lookup(|key| {
            pairs
                .iter()
                .find(|(name, _)| *name == key)
                .map(|(_, value)| (*value).to_owned())
        })
    }

    #[test]
    fn rust_log_takes_precedence() {
        assert_eq!(
            directive(&[("RUST_LOG", "warn"), ("MESSAGELIST_LOG", "trace")]),
            "warn"
        );
        assert_eq!(directive(&[("MESSAGELIST_LOG", " trace ")]), "trace");
    }

    #[test]
    fn blank_or_invalid_values_fall_back_to_default() {
        assert_eq!(directive(&[]), DEFAULT_DIRECTIVE);
        assert_eq!(
            directive(&[("RUST_LOG", "  "), ("MESSAGELIST_LOG", "messagelist_core=loud")]),
            DEFAULT_DIRECTIVE
        );
    }
}
