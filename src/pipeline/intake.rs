use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::ProcessingConfig;
use crate::domain::AddressRecord;
use crate::live_log::LiveLog;
use crate::observability::metrics;

/// Pending records ready for the orchestrator, plus what was left out.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Intake {
    pub records: Vec<AddressRecord>,
    pub total_input: usize,
    pub skipped_empty: usize,
    pub skipped_by_limit: usize,
    pub limit_applied: bool,
}

impl Intake {
    /// Build pending records from raw text, in input order.
    ///
    /// Blank entries are dropped first; the per-batch limit (when enabled)
    /// then keeps only the leading addresses.
    pub fn prepare<I, S>(addresses: I, processing: &ProcessingConfig, live_log: &LiveLog) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut total_input = 0;
        let mut records = Vec::new();
        for text in addresses {
            total_input += 1;
            match AddressRecord::new(text.as_ref()) {
                Ok(record) => records.push(record),
                Err(e) => debug!(index = total_input - 1, error = %e, "Skipping address"),
            }
        }
        let skipped_empty = total_input - records.len();

        let mut skipped_by_limit = 0;
        let limit = processing.max_addresses_per_batch;
        let limit_applied = processing.enable_limits && records.len() > limit;
        if limit_applied {
            skipped_by_limit = records.len() - limit;
            warn!(
                available = records.len(),
                limit, "Processing limit applied, extra addresses skipped"
            );
            live_log.warning(
                format!(
                    "Processing limit applied: only the first {} of {} addresses will be processed",
                    limit,
                    records.len()
                ),
                Some(json!({ "limit": limit, "available": records.len() })),
            );
            records.truncate(limit);
        }

        metrics::batch::skipped("empty", skipped_empty);
        metrics::batch::skipped("limit", skipped_by_limit);

        Self {
            records,
            total_input,
            skipped_empty,
            skipped_by_limit,
            limit_applied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live_log::LogLevel;

    fn processing(enable_limits: bool, max: usize) -> ProcessingConfig {
        ProcessingConfig {
            enable_limits,
            max_addresses_per_batch: max,
        }
    }

    #[test]
    fn test_blank_entries_are_dropped() {
        let log = LiveLog::new();
        let intake = Intake::prepare(
            vec!["Tehran, Valiasr St", "", "   ", "Shiraz"],
            &processing(true, 10),
            &log,
        );
        assert_eq!(intake.total_input, 4);
        assert_eq!(intake.skipped_empty, 2);
        assert_eq!(intake.records.len(), 2);
        assert_eq!(intake.records[0].full_address(), "Tehran, Valiasr St");
        assert_eq!(intake.records[1].full_address(), "Shiraz");
        assert!(!intake.limit_applied);
        assert!(log.is_empty());
    }

    #[test]
    fn test_limit_keeps_leading_addresses() {
        let log = LiveLog::new();
        let input: Vec<String> = (1..=5).map(|i| format!("addr {}", i)).collect();
        let intake = Intake::prepare(&input, &processing(true, 3), &log);

        assert!(intake.limit_applied);
        assert_eq!(intake.skipped_by_limit, 2);
        let kept: Vec<&str> = intake.records.iter().map(|r| r.full_address()).collect();
        assert_eq!(kept, vec!["addr 1", "addr 2", "addr 3"]);

        let events = log.recent(10);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].level, LogLevel::Warning);
    }

    #[test]
    fn test_disabled_limit_keeps_everything() {
        let log = LiveLog::new();
        let input: Vec<String> = (0..25).map(|i| format!("addr {}", i)).collect();
        let intake = Intake::prepare(&input, &processing(false, 3), &log);
        assert_eq!(intake.records.len(), 25);
        assert_eq!(intake.skipped_by_limit, 0);
    }
}
