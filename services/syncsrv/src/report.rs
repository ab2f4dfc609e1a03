//! Per-run tallies

use errors::{ErrorInfo, SyncError};
use serde::Serialize;
use tracing::info;

use crate::reconciler::SyncOutcome;

/// A device left out of a collection run
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SkippedDevice {
    pub device_id: String,
    pub device_name: String,
    pub reason: String,
}

/// Outcome counts for one run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub inserted: u64,
    pub updated: u64,
    pub unchanged: u64,
    pub failed: u64,
    pub skipped: Vec<SkippedDevice>,
    /// First few record failures, for the summary
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<ErrorInfo>,
}

const MAX_KEPT_ERRORS: usize = 20;

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, outcome: SyncOutcome) {
        match outcome {
            SyncOutcome::Inserted => self.inserted += 1,
            SyncOutcome::Updated => self.updated += 1,
            SyncOutcome::Unchanged => self.unchanged += 1,
        }
    }

    pub fn record_failure(&mut self, err: &SyncError) {
        self.failed += 1;
        if self.errors.len() < MAX_KEPT_ERRORS {
            self.errors.push(err.to_error_info());
        }
    }

    pub fn skip(
        &mut self,
        device_id: impl Into<String>,
        device_name: impl Into<String>,
        reason: impl Into<String>,
    ) {
        self.skipped.push(SkippedDevice {
            device_id: device_id.into(),
            device_name: device_name.into(),
            reason: reason.into(),
        });
    }

    /// Records that reached the store, whatever the outcome
    pub fn processed(&self) -> u64 {
        self.inserted + self.updated + self.unchanged + self.failed
    }

    pub fn merge(&mut self, other: RunReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.unchanged += other.unchanged;
        self.failed += other.failed;
        self.skipped.extend(other.skipped);
        for err in other.errors {
            if self.errors.len() >= MAX_KEPT_ERRORS {
                break;
            }
            self.errors.push(err);
        }
    }

    pub fn log_summary(&self, what: &str) {
        info!(
            "{} done: inserted={} updated={} unchanged={} failed={} skipped_devices={}",
            what,
            self.inserted,
            self.updated,
            self.unchanged,
            self.failed,
            self.skipped.len()
        );
        for skipped in &self.skipped {
            info!(
                "  skipped {} ({}): {}",
                skipped.device_name, skipped.device_id, skipped.reason
            );
        }
    }
}
