//! Logging setup for the dev server.
//!
//! Verbosity is resolved in this order:
//! 1. `verbose`: DEBUG for the fob crates
//! 2. `quiet`: errors only
//! 3. `RUST_LOG`
//! 4. INFO for the fob crates
//!
//! ```rust,no_run
//! use fob_hmr::logger::init_logger;
//! use tracing::info;
//!
//! init_logger(false, false, false);
//! info!("dev server starting");
//! ```

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const VERBOSE_FILTER: &str = "fob_hmr=debug,fob_runtime=debug,fob_config=debug";
const QUIET_FILTER: &str = "fob_hmr=error,fob_runtime=error,fob_config=error";
const DEFAULT_FILTER: &str = "fob_hmr=info,fob_runtime=info,fob_config=info";

/// Initialize the global tracing subscriber. Call once, before logging.
pub fn init_logger(verbose: bool, quiet: bool, no_color: bool) {
    init_logger_with_filter(filter_for(verbose, quiet), no_color);
}

/// Initialize logging with a caller-provided filter.
pub fn init_logger_with_filter(filter: EnvFilter, no_color: bool) {
    let fmt_layer = fmt::layer()
        .with_target(false)
        .with_level(true)
        .with_ansi(!no_color)
        .compact();

    // A subscriber installed earlier (tests, embedding tools) wins.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init();
}

fn filter_for(verbose: bool, quiet: bool) -> EnvFilter {
    if verbose {
        EnvFilter::new(VERBOSE_FILTER)
    } else if quiet {
        EnvFilter::new(QUIET_FILTER)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
    }
}

/// Check if colored output should be enabled.
///
/// `NO_COLOR` disables colors, `FORCE_COLOR` forces them even without a TTY.
pub fn should_use_colors() -> bool {
    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    if std::env::var("FORCE_COLOR").is_ok() {
        return true;
    }

    console::Term::stdout().features().colors_supported()
}
