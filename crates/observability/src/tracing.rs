//! JSON log output for ledger operations.
//!
//! Ledger spans and events carry structured fields (`sku_id`, `material_id`,
//! `quantity_before`, `quantity_after`), which read best as one JSON object per line.

use tracing_subscriber::EnvFilter;

/// Used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber, filtered by `RUST_LOG`. Later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    install(filter);
}

/// Install with an explicit directive string such as `crystalerp_infra=debug`,
/// falling back to [`DEFAULT_FILTER`] if it does not parse.
pub fn init_with_filter(directives: &str) {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    install(filter);
}

fn install(filter: EnvFilter) {
    // Err means a subscriber is already installed.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_current_span(false)
        .with_target(false)
        .try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn repeated_init_keeps_the_first_subscriber() {
        super::init_with_filter("not a [valid filter");
        super::init();
        ::tracing::info!(sku_id = "demo", quantity_after = 3, "stock sold");
    }
}
