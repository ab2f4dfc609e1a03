//! Time-window telemetry collector
//!
//! Pulls readings for every selected device over a time window and streams
//! them, one record per point, through the reconciler into `telemetry`.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::time::TimeProvider;
use errors::{SyncError, SyncResult};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, error, info, warn};

use crate::reconciler::Reconciler;
use crate::record::{FieldValue, Record};
use crate::report::RunReport;
use crate::schema::{SYNC_METADATA, TELEMETRY};
use crate::source::{DeviceRef, RawReading, TelemetrySource};
use crate::timestamp::{to_instant, to_millis_epoch_13};

/// Sentinel the platform sends for a missing measurement
pub const NAN_SENTINEL: &str = "NaN";

/// `sync_metadata.source` value for telemetry runs
pub const TELEMETRY_SOURCE: &str = "telemetry";

/// Collector settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CollectorConfig {
    /// Window length when no start is given
    pub window_hours: u64,
    /// Maximum points requested per key
    pub limit: u32,
    /// Deadline for each remote call, in milliseconds
    pub source_timeout_ms: u64,
    /// Source key -> ontology name; unmapped keys keep their own name
    pub ontology: BTreeMap<String, String>,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            window_hours: 24,
            limit: 10_000,
            source_timeout_ms: 30_000,
            ontology: BTreeMap::new(),
        }
    }
}

impl CollectorConfig {
    fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    pub fn ontology_name<'a>(&'a self, key: &'a str) -> &'a str {
        self.ontology.get(key).map(String::as_str).unwrap_or(key)
    }
}

/// Which slice of time to collect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectWindow {
    /// From a fixed instant up to now
    Since(DateTime<Utc>),
    /// The trailing period ending now
    Last(Duration),
}

impl Default for CollectWindow {
    fn default() -> Self {
        Self::Last(Duration::from_secs(24 * 3600))
    }
}

impl CollectWindow {
    /// Trailing window of `hours`; zero or an overflowing length is rejected
    pub fn last_hours(hours: u64) -> SyncResult<Self> {
        if hours == 0 {
            return Err(SyncError::InvalidInput(
                "window length must be at least 1 hour".to_string(),
            ));
        }
        let secs = hours
            .checked_mul(3600)
            .ok_or_else(|| SyncError::InvalidInput(format!("window of {} hours is too long", hours)))?;
        Ok(Self::Last(Duration::from_secs(secs)))
    }

    /// Concrete `[start, end]` bounds relative to `now`
    pub fn resolve(&self, now: DateTime<Utc>) -> SyncResult<(DateTime<Utc>, DateTime<Utc>)> {
        let start = match self {
            Self::Since(start) => *start,
            Self::Last(period) => {
                let period = chrono::Duration::from_std(*period)
                    .map_err(|e| SyncError::InvalidInput(format!("window too long: {}", e)))?;
                now.checked_sub_signed(period).ok_or_else(|| {
                    SyncError::InvalidInput(format!(
                        "window of {}s reaches before the earliest representable date",
                        period.num_seconds()
                    ))
                })?
            },
        };
        if start > now {
            return Err(SyncError::InvalidInput(format!(
                "window start {} is in the future",
                start.to_rfc3339()
            )));
        }
        Ok((start, now))
    }
}

pub struct TelemetryCollector {
    source: Arc<dyn TelemetrySource>,
    reconciler: Arc<Reconciler>,
    clock: Arc<dyn TimeProvider>,
    config: CollectorConfig,
}

impl TelemetryCollector {
    pub fn new(
        source: Arc<dyn TelemetrySource>,
        reconciler: Arc<Reconciler>,
        clock: Arc<dyn TimeProvider>,
        config: CollectorConfig,
    ) -> Self {
        Self {
            source,
            reconciler,
            clock,
            config,
        }
    }

    async fn deadline<T>(
        &self,
        what: &str,
        call: impl Future<Output = SyncResult<T>>,
    ) -> SyncResult<T> {
        match tokio::time::timeout(self.config.source_timeout(), call).await {
            Ok(result) => result,
            Err(_) => Err(SyncError::Timeout(what.to_string())),
        }
    }

    /// End of the last recorded collection window, if any
    pub async fn last_window_end(&self) -> SyncResult<Option<DateTime<Utc>>> {
        let key = crate::record! {"source" => TELEMETRY_SOURCE};
        match self
            .reconciler
            .lookup(SYNC_METADATA, "window_end", &key)
            .await?
        {
            Some(FieldValue::Int(ms)) => Ok(Some(to_instant(ms)?)),
            _ => Ok(None),
        }
    }

    /// Window continuing where the last run stopped, or `fallback`
    pub async fn resume_window(&self, fallback: CollectWindow) -> SyncResult<CollectWindow> {
        Ok(match self.last_window_end().await? {
            Some(end) => {
                info!("Resuming from {}", end.to_rfc3339());
                CollectWindow::Since(end)
            },
            None => fallback,
        })
    }

    /// Collect every selected device over `window`.
    ///
    /// An empty `device_filter` selects all devices. Device-level failures
    /// skip the device; schema-level failures abort the run.
    pub async fn collect(
        &self,
        window: CollectWindow,
        device_filter: &[String],
    ) -> SyncResult<RunReport> {
        let now = self.clock.now();
        let (start, end) = window.resolve(now)?;
        info!(
            "Collecting telemetry {} .. {}",
            start.to_rfc3339(),
            end.to_rfc3339()
        );

        let devices = self
            .deadline("device list", self.source.list_devices())
            .await?;
        let devices = select_devices(devices, device_filter);
        info!("Devices selected: {}", devices.len());

        let mut report = RunReport::new();
        let mut failed_devices = 0usize;
        for device in &devices {
            match self.collect_device(device, start, end, &mut report).await {
                Ok(()) => {},
                Err(e) if e.is_fatal() => {
                    error!("Aborting run at device {}: {}", device.name, e);
                    return Err(e);
                },
                Err(e) => {
                    warn!("Skipping device {} ({}): {}", device.name, device.id, e);
                    report.skip(&device.id, &device.name, e.to_string());
                    failed_devices += 1;
                },
            }
        }

        // A resumed run must cover the window again for devices that failed
        if failed_devices == 0 {
            self.record_window(start, end, now).await?;
        } else {
            warn!(
                "{} device(s) failed, window end not recorded for resume",
                failed_devices
            );
        }
        report.log_summary("Telemetry collection");
        Ok(report)
    }

    async fn collect_device(
        &self,
        device: &DeviceRef,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        report: &mut RunReport,
    ) -> SyncResult<()> {
        let keys = self
            .deadline("timeseries keys", self.source.timeseries_keys(device))
            .await?;
        if keys.is_empty() {
            warn!("Device {} ({}) has no timeseries keys", device.name, device.id);
            report.skip(&device.id, &device.name, "no timeseries keys");
            return Ok(());
        }

        let limit = self.config.limit;
        let readings = self
            .deadline(
                "timeseries values",
                self.source.readings(device, &keys, start, end, limit),
            )
            .await?;

        for (key, points) in &readings {
            if points.len() as u64 >= u64::from(limit) {
                warn!(
                    "{} / {}: {} points returned, the window may be truncated",
                    device.name,
                    key,
                    points.len()
                );
            }
            let ontology = self.config.ontology_name(key);
            debug!("{} / {} -> {}: {} points", device.name, key, ontology, points.len());

            for point in points {
                let outcome = match measurement_record(device, key, ontology, point) {
                    Ok(record) => self.reconciler.reconcile(TELEMETRY, &record).await,
                    Err(e) => Err(e),
                };
                match outcome {
                    Ok(outcome) => report.record(outcome),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        debug!("{} / {} at {}: {}", device.name, key, point.ts, e);
                        report.record_failure(&e);
                    },
                }
            }
        }
        Ok(())
    }

    async fn record_window(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> SyncResult<()> {
        let row = crate::record! {
            "source" => TELEMETRY_SOURCE,
            "last_sync" => now,
            "window_start" => to_millis_epoch_13(start),
            "window_end" => to_millis_epoch_13(end),
        };
        self.reconciler.reconcile(SYNC_METADATA, &row).await?;
        Ok(())
    }
}

fn select_devices(devices: Vec<DeviceRef>, filter: &[String]) -> Vec<DeviceRef> {
    if filter.is_empty() {
        return devices;
    }
    for wanted in filter {
        if !devices.iter().any(|d| &d.name == wanted) {
            warn!("Device {} not found on the platform", wanted);
        }
    }
    devices
        .into_iter()
        .filter(|d| filter.contains(&d.name))
        .collect()
}

/// Numeric value of a reading; the NaN sentinel maps to `None`
pub fn reading_value(raw: &JsonValue) -> SyncResult<Option<f64>> {
    let value = match raw {
        JsonValue::Null => return Ok(None),
        JsonValue::String(s) if s.trim() == NAN_SENTINEL => return Ok(None),
        JsonValue::String(s) => s.trim().parse::<f64>()?,
        JsonValue::Number(n) => n
            .as_f64()
            .ok_or_else(|| SyncError::InvalidInput(format!("unrepresentable number {}", n)))?,
        other => {
            return Err(SyncError::InvalidInput(format!(
                "reading value {} is not numeric",
                other
            )))
        },
    };
    Ok(if value.is_nan() { None } else { Some(value) })
}

/// Measurement point -> `telemetry` record
pub fn measurement_record(
    device: &DeviceRef,
    key: &str,
    ontology: &str,
    point: &RawReading,
) -> SyncResult<Record> {
    let ts = to_instant(point.ts)?;
    let value = reading_value(&point.value)?;
    Ok(crate::record! {
        "device_id" => device.id.as_str(),
        "device_name" => device.name.as_str(),
        "ts_key" => key,
        "ontology" => ontology,
        "ts" => ts,
        "value" => value,
    })
}
