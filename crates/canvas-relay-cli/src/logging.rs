//! Subscriber setup from the `logging` config section.

use canvas_relay_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Filter directives used when `RUST_LOG` is unset. `--verbose` wins over
/// the configured level; per-crate filters always apply.
pub fn default_directives(config: &LoggingConfig, verbose: bool) -> String {
    let level = if verbose {
        "debug"
    } else {
        config.level.as_deref().unwrap_or("info")
    };
    std::iter::once(level)
        .chain(config.filters.iter().map(String::as_str))
        .collect::<Vec<_>>()
        .join(",")
}

pub fn init(config: &LoggingConfig, verbose: bool) -> anyhow::Result<()> {
    let directives = default_directives(config, verbose);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    let writer = || match config.output.as_str() {
        "stdout" => BoxMakeWriter::new(std::io::stdout),
        _ => BoxMakeWriter::new(std::io::stderr),
    };
    let json = config.format == "json";

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| {
            fmt::layer()
                .json()
                .with_writer(writer())
                .with_target(true)
                .with_current_span(true)
                .flatten_event(true)
        }))
        .with((!json).then(|| fmt::layer().with_writer(writer()).with_target(true)))
        .try_init()?;

    tracing::debug!(format = %config.format, output = %config.output, %directives, "Logging initialized");
    Ok(())
}
