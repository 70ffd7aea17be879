//! Metric names emitted by the client.

pub const SYNC_ATTEMPTS_TOTAL: &str = "vitals_sync_attempts_total";
pub const SYNC_DELIVERED_TOTAL: &str = "vitals_sync_delivered_total";
pub const SYNC_FAILURES_TOTAL: &str = "vitals_sync_failures_total";
pub const SYNC_SKIPPED_TOTAL: &str = "vitals_sync_skipped_total";
pub const WEARABLE_FAILURES_TOTAL: &str = "vitals_wearable_failures_total";
pub const TOKEN_REFRESH_TOTAL: &str = "vitals_token_refresh_total";

/// Register descriptions with whichever recorder is installed.
pub fn describe_metrics() {
    metrics::describe_counter!(SYNC_ATTEMPTS_TOTAL, "Sync attempts started");
    metrics::describe_counter!(SYNC_DELIVERED_TOTAL, "Sync payloads accepted by the server");
    metrics::describe_counter!(SYNC_FAILURES_TOTAL, "Sync attempts that failed");
    metrics::describe_counter!(
        SYNC_SKIPPED_TOTAL,
        "Sync ticks skipped (no session or previous attempt still running)"
    );
    metrics::describe_counter!(
        WEARABLE_FAILURES_TOTAL,
        "Wearable bundle fetches that failed during sync"
    );
    metrics::describe_counter!(TOKEN_REFRESH_TOTAL, "Wearable access-token refreshes");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_without_recorder_is_noop() {
        describe_metrics();
    }

    #[test]
    fn metric_names_are_prefixed() {
        for name in [
            SYNC_ATTEMPTS_TOTAL,
            SYNC_DELIVERED_TOTAL,
            SYNC_FAILURES_TOTAL,
            SYNC_SKIPPED_TOTAL,
            WEARABLE_FAILURES_TOTAL,
            TOKEN_REFRESH_TOTAL,
        ] {
            assert!(name.starts_with("vitals_"));
        }
    }
}
