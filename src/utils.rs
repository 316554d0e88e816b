use std::sync::LazyLock;

use indicatif::ProgressStyle;

/// Bar shown for a whole retrieval.
pub(crate) static STYLE_RUN: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
});

/// Spinner shown for each node while its operator runs.
pub(crate) static STYLE_NODE: LazyLock<ProgressStyle> = LazyLock::new(|| {
    ProgressStyle::default_spinner()
        .template("{spinner:.blue} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
});

/// Installs a global `tracing` subscriber that prints log lines above the
/// progress bars.
///
/// The filter is read from `RECKON_LOG` (same syntax as `RUST_LOG`) and
/// defaults to `reckon=info`. Returns `false` if a subscriber was already
/// installed.
#[cfg(feature = "logging")]
pub fn init_logging() -> bool {
    use tracing_indicatif::IndicatifLayer;
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, fmt};

    let indicatif = IndicatifLayer::new();
    let filter =
        EnvFilter::try_from_env("RECKON_LOG").unwrap_or_else(|_| EnvFilter::new("reckon=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(indicatif.get_stderr_writer()))
        .with(indicatif)
        .try_init()
        .is_ok()
}

/// Readable message out of a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("Operator panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("Operator panicked: {s}")
    } else {
        String::from("Operator panicked with unknown payload")
    }
}
