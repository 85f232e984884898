//! Structured logging setup.
//!
//! Verbosity flags pick the default filter; `RUST_LOG` overrides it.

use tracing_subscriber::EnvFilter;

/// Default filter directive for the given CLI verbosity.
pub fn default_directive(verbose: u8, quiet: bool) -> &'static str {
    if quiet {
        return "error";
    }
    match verbose {
        0 => "callrelay=info,warn",
        1 => "callrelay=debug,info",
        _ => "trace",
    }
}

/// Installs the global subscriber. A second call is a no-op.
pub fn init(verbose: u8, quiet: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose, quiet)));

    // Fails only when a subscriber is already installed (tests, embedding).
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init()
    {
        tracing::debug!(error = %e, "subscriber already installed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive_levels() {
        assert_eq!(default_directive(0, false), "callrelay=info,warn");
        assert_eq!(default_directive(1, false), "callrelay=debug,info");
        assert_eq!(default_directive(3, false), "trace");
    }

    #[test]
    fn test_quiet_wins_over_verbose() {
        assert_eq!(default_directive(2, true), "error");
    }

    #[test]
    fn test_directives_parse() {
        for (verbose, quiet) in [(0, false), (1, false), (2, false), (0, true)] {
            assert!(EnvFilter::try_new(default_directive(verbose, quiet)).is_ok());
        }
    }

    #[test]
    fn test_init_twice_does_not_panic() {
        init(0, true);
        init(2, false);
    }
}
