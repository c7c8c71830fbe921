//! Supervised long-running device processes.
//!
//! One record per `(alias, process)`:
//!
//! ```text
//! IDLE -> RUNNING     start, only if not already running
//! RUNNING -> IDLE     timeout, explicit stop, step error or panic
//! RUNNING -> RUNNING  duplicate start (no-op)
//! ```
//!
//! Each running process is a tokio task that locks its device for one step
//! per period and never across an await. Stop is cooperative: the task
//! observes `keep_running` at the next period boundary. A drop guard inside
//! the task runs `process_finish` on every exit path, then records the
//! outcome and marks the record idle.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use hdbus_core::error::{HdbusError, Result};
use hdbus_core::protocol::envelope::params;

use crate::config::ProcessSection;
use crate::device::DeviceHandle;
use crate::obs::HdbusMetrics;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessOptions {
    pub timeout: Duration,
    /// Length of one period.
    pub rate: Duration,
}

/// Defaults applied when a request omits `TIMEOUT` or `RATE`.
#[derive(Debug, Clone, Copy)]
pub struct ProcessDefaults {
    pub timeout_secs: f64,
    pub min_rate_secs: f64,
    pub max_rate_secs: f64,
}

impl From<&ProcessSection> for ProcessDefaults {
    fn from(p: &ProcessSection) -> Self {
        Self {
            timeout_secs: p.default_timeout_secs,
            min_rate_secs: p.min_rate_secs,
            max_rate_secs: p.max_rate_secs,
        }
    }
}

impl Default for ProcessDefaults {
    fn default() -> Self {
        Self::from(&ProcessSection::default())
    }
}

impl ProcessDefaults {
    /// Build options from optional raw param values.
    ///
    /// A missing rate is drawn uniformly from `[min_rate, max_rate]`.
    pub fn resolve(&self, timeout: Option<&str>, rate: Option<&str>) -> Result<ProcessOptions> {
        let timeout_secs = match timeout {
            Some(v) => positive_secs(params::TIMEOUT, v)?,
            None => self.timeout_secs,
        };
        let rate_secs = match rate {
            Some(v) => positive_secs(params::RATE, v)?,
            None => rand::thread_rng().gen_range(self.min_rate_secs..=self.max_rate_secs),
        };
        Ok(ProcessOptions {
            timeout: duration(params::TIMEOUT, timeout_secs)?,
            rate: duration(params::RATE, rate_secs)?,
        })
    }
}

/// Exclusive upper bound for any process duration, in seconds.
pub const MAX_SECS: f64 = 1e12;

/// Finite, positive and below [`MAX_SECS`].
pub fn valid_secs(v: f64) -> bool {
    v.is_finite() && v > 0.0 && v < MAX_SECS
}

fn positive_secs(name: &str, value: &str) -> Result<f64> {
    match value.trim().parse::<f64>() {
        Ok(v) if valid_secs(v) => Ok(v),
        _ => Err(HdbusError::InvalidParam {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

fn duration(name: &str, secs: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(secs).map_err(|_| HdbusError::InvalidParam {
        name: name.to_string(),
        value: secs.to_string(),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Stop requested; the task exits at its next period boundary.
    Stopping,
    NotRunning,
}

/// How the last run of a process ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Timeout elapsed.
    Completed,
    Stopped,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProcessKey {
    pub alias: String,
    pub process: String,
}

impl ProcessKey {
    pub fn new(alias: &str, process: &str) -> Self {
        Self {
            alias: alias.to_string(),
            process: process.to_string(),
        }
    }
}

#[derive(Default)]
struct ProcessRecord {
    running: AtomicBool,
    keep_running: AtomicBool,
    outcome: Mutex<Option<ProcessOutcome>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessRecord {
    fn take_task(&self) -> Option<JoinHandle<()>> {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn set_outcome(&self, outcome: ProcessOutcome) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(outcome);
    }
}

pub struct ProcessSupervisor {
    records: DashMap<ProcessKey, Arc<ProcessRecord>>,
    metrics: Arc<HdbusMetrics>,
}

impl ProcessSupervisor {
    pub fn new(metrics: Arc<HdbusMetrics>) -> Self {
        Self {
            records: DashMap::new(),
            metrics,
        }
    }

    /// Start `process` on `device` unless it is already running.
    ///
    /// Returns immediately; the process runs on its own task. Must be called
    /// from within a tokio runtime.
    pub fn start(
        &self,
        device: &DeviceHandle,
        process: &str,
        opts: ProcessOptions,
    ) -> Result<StartOutcome> {
        if !device.with(|d| d.supports_process(process)) {
            return Err(HdbusError::UnsupportedOperation {
                alias: device.alias().to_string(),
                operation: format!("PROCESS {process}"),
            });
        }

        let key = ProcessKey::new(device.alias(), process);
        let record = Arc::clone(self.records.entry(key.clone()).or_default().value());

        if record
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!(alias = %key.alias, process = %key.process, "already running");
            return Ok(StartOutcome::AlreadyRunning);
        }
        record.keep_running.store(true, Ordering::Release);

        self.metrics.processes_started.inc(&[("process", process)]);
        self.metrics.processes_running.inc(&[("process", process)]);
        tracing::info!(
            alias = %key.alias,
            process = %key.process,
            timeout_ms = opts.timeout.as_millis() as u64,
            rate_ms = opts.rate.as_millis() as u64,
            "process started"
        );

        let guard = ProcessGuard {
            device: device.clone(),
            key,
            record: Arc::clone(&record),
            metrics: Arc::clone(&self.metrics),
            outcome: None,
        };
        let handle = tokio::spawn(run_process(guard, opts));
        *record.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(StartOutcome::Started)
    }

    /// Ask a running process to stop at its next period boundary.
    pub fn stop(&self, alias: &str, process: &str) -> StopOutcome {
        let Some(record) = self.record(alias, process) else {
            return StopOutcome::NotRunning;
        };
        if !record.running.load(Ordering::Acquire) {
            return StopOutcome::NotRunning;
        }
        record.keep_running.store(false, Ordering::Release);
        tracing::info!(alias, process, "process stop requested");
        StopOutcome::Stopping
    }

    pub fn is_running(&self, alias: &str, process: &str) -> bool {
        self.record(alias, process)
            .map(|r| r.running.load(Ordering::Acquire))
            .unwrap_or(false)
    }

    /// Outcome of the most recent finished run for this key.
    pub fn outcome(&self, alias: &str, process: &str) -> Option<ProcessOutcome> {
        let record = self.record(alias, process)?;
        let outcome = record
            .outcome
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        outcome
    }

    /// Keys of every process currently running.
    pub fn running(&self) -> Vec<ProcessKey> {
        self.records
            .iter()
            .filter(|r| r.value().running.load(Ordering::Acquire))
            .map(|r| r.key().clone())
            .collect()
    }

    /// Wait for the current task of this key, if any, to exit.
    pub async fn join(&self, alias: &str, process: &str) {
        let Some(handle) = self.record(alias, process).and_then(|r| r.take_task()) else {
            return;
        };
        if let Err(e) = handle.await {
            tracing::warn!(alias, process, error = %e, "process task join failed");
        }
    }

    /// Stop every running process and wait for all of them.
    pub async fn shutdown(&self) {
        let records: Vec<Arc<ProcessRecord>> =
            self.records.iter().map(|r| Arc::clone(r.value())).collect();
        for r in &records {
            r.keep_running.store(false, Ordering::Release);
        }
        let handles: Vec<JoinHandle<()>> = records.iter().filter_map(|r| r.take_task()).collect();
        tracing::info!(tasks = handles.len(), "supervisor shutting down");
        for res in futures_util::future::join_all(handles).await {
            if let Err(e) = res {
                tracing::warn!(error = %e, "process task join failed");
            }
        }
    }

    fn record(&self, alias: &str, process: &str) -> Option<Arc<ProcessRecord>> {
        self.records
            .get(&ProcessKey::new(alias, process))
            .map(|r| Arc::clone(r.value()))
    }
}

async fn run_process(mut guard: ProcessGuard, opts: ProcessOptions) {
    let deadline = Instant::now() + opts.timeout;
    let outcome = loop {
        if !guard.record.keep_running.load(Ordering::Acquire) {
            break ProcessOutcome::Stopped;
        }
        if Instant::now() >= deadline {
            break ProcessOutcome::Completed;
        }
        let step = panic::catch_unwind(AssertUnwindSafe(|| {
            guard.device.with(|d| d.process_step(&guard.key.process))
        }));
        match step {
            Ok(Ok(())) => {}
            Ok(Err(e)) => break ProcessOutcome::Failed(e.to_string()),
            Err(payload) => {
                break ProcessOutcome::Failed(format!("step panicked: {}", panic_message(&*payload)))
            }
        }
        tokio::time::sleep_until((Instant::now() + opts.rate).min(deadline)).await;
    };
    guard.outcome = Some(outcome);
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Finishes a process on every exit path of its task.
struct ProcessGuard {
    device: DeviceHandle,
    key: ProcessKey,
    record: Arc<ProcessRecord>,
    metrics: Arc<HdbusMetrics>,
    /// Set by the task loop before it returns.
    outcome: Option<ProcessOutcome>,
}

impl Drop for ProcessGuard {
    fn drop(&mut self) {
        let process = self.key.process.as_str();
        let finish = self.device.with(|d| d.process_finish(process));

        // No outcome means the task was cancelled mid-period.
        let mut outcome = self.outcome.take().unwrap_or(ProcessOutcome::Stopped);
        if let Err(e) = finish {
            if !matches!(outcome, ProcessOutcome::Failed(_)) {
                outcome = ProcessOutcome::Failed(format!("finish failed: {e}"));
            }
        }

        match &outcome {
            ProcessOutcome::Failed(reason) => {
                self.metrics.processes_failed.inc(&[("process", process)]);
                tracing::warn!(alias = %self.key.alias, process, %reason, "process failed");
            }
            other => {
                tracing::info!(alias = %self.key.alias, process, outcome = ?other, "process finished");
            }
        }

        self.record.set_outcome(outcome);
        self.metrics.processes_running.dec(&[("process", process)]);
        self.record.running.store(false, Ordering::Release);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::device::{Device, DeviceClass, DeviceCore, GpioPin, Led, BLINK, STATUS_OFF};

    fn supervisor() -> ProcessSupervisor {
        ProcessSupervisor::new(Arc::new(HdbusMetrics::default()))
    }

    fn blue() -> DeviceHandle {
        DeviceHandle::new(Led::new("LED_BLUE", GpioPin::new(Some(17))), &[])
    }

    fn opts(timeout_ms: u64, rate_ms: u64) -> ProcessOptions {
        ProcessOptions {
            timeout: Duration::from_millis(timeout_ms),
            rate: Duration::from_millis(rate_ms),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_start_is_a_no_op() {
        let sup = supervisor();
        let led = blue();
        assert_eq!(sup.start(&led, BLINK, opts(10_000, 100)).unwrap(), StartOutcome::Started);
        assert_eq!(
            sup.start(&led, BLINK, opts(10_000, 100)).unwrap(),
            StartOutcome::AlreadyRunning
        );
        assert!(sup.is_running("LED_BLUE", BLINK));
        assert_eq!(sup.running().len(), 1);

        assert_eq!(sup.stop("LED_BLUE", BLINK), StopOutcome::Stopping);
        sup.join("LED_BLUE", BLINK).await;
        assert!(!sup.is_running("LED_BLUE", BLINK));
        assert_eq!(sup.outcome("LED_BLUE", BLINK), Some(ProcessOutcome::Stopped));
        assert_eq!(led.status(), STATUS_OFF);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_completes_and_leaves_led_off() {
        let sup = supervisor();
        let led = blue();
        sup.start(&led, BLINK, opts(350, 100)).unwrap();
        sup.join("LED_BLUE", BLINK).await;
        assert_eq!(sup.outcome("LED_BLUE", BLINK), Some(ProcessOutcome::Completed));
        assert_eq!(led.status(), STATUS_OFF);
        assert_eq!(sup.stop("LED_BLUE", BLINK), StopOutcome::NotRunning);
    }

    #[tokio::test(start_paused = true)]
    async fn restart_after_stop() {
        let sup = supervisor();
        let led = blue();
        sup.start(&led, BLINK, opts(10_000, 50)).unwrap();
        sup.stop("LED_BLUE", BLINK);
        sup.join("LED_BLUE", BLINK).await;
        assert_eq!(sup.start(&led, BLINK, opts(10_000, 50)).unwrap(), StartOutcome::Started);
        sup.shutdown().await;
        assert!(!sup.is_running("LED_BLUE", BLINK));
        assert_eq!(led.status(), STATUS_OFF);
    }

    #[tokio::test]
    async fn unsupported_process_is_rejected() {
        let sup = supervisor();
        let err = sup.start(&blue(), "FADE", opts(100, 10)).unwrap_err();
        assert!(matches!(err, HdbusError::UnsupportedOperation { .. }));
        assert!(!sup.is_running("LED_BLUE", "FADE"));
    }

    struct Faulty {
        core: DeviceCore,
        panic: bool,
        finished: bool,
    }

    impl Device for Faulty {
        fn core(&self) -> &DeviceCore {
            &self.core
        }
        fn core_mut(&mut self) -> &mut DeviceCore {
            &mut self.core
        }
        fn class(&self) -> DeviceClass {
            DeviceClass::Led
        }
        fn read_data(&mut self) -> Result<String> {
            Ok(self.finished.to_string())
        }
        fn supports_process(&self, _name: &str) -> bool {
            true
        }
        fn process_step(&mut self, _name: &str) -> Result<()> {
            if self.panic {
                panic!("step exploded");
            }
            Err(HdbusError::Internal("bus fault".into()))
        }
        fn process_finish(&mut self, _name: &str) -> Result<()> {
            self.finished = true;
            Ok(())
        }
    }

    fn faulty(panic: bool) -> DeviceHandle {
        DeviceHandle::new(
            Faulty {
                core: DeviceCore::new("FAULTY"),
                panic,
                finished: false,
            },
            &[],
        )
    }

    #[tokio::test(start_paused = true)]
    async fn step_error_fails_only_its_own_record() {
        let sup = supervisor();
        let dev = faulty(false);
        let led = blue();
        sup.start(&led, BLINK, opts(10_000, 100)).unwrap();
        sup.start(&dev, "WORK", opts(1_000, 100)).unwrap();
        sup.join("FAULTY", "WORK").await;

        assert!(matches!(sup.outcome("FAULTY", "WORK"), Some(ProcessOutcome::Failed(r)) if r.contains("bus fault")));
        assert_eq!(dev.with(|d| d.read_data()).unwrap(), "true");
        assert!(sup.is_running("LED_BLUE", BLINK));
        assert_eq!(sup.outcome("LED_BLUE", BLINK), None);
        sup.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_step_is_recorded_and_finished() {
        let sup = supervisor();
        let dev = faulty(true);
        sup.start(&dev, "WORK", opts(1_000, 100)).unwrap();
        sup.join("FAULTY", "WORK").await;

        assert!(matches!(
            sup.outcome("FAULTY", "WORK"),
            Some(ProcessOutcome::Failed(r)) if r.contains("step exploded")
        ));
        assert!(!sup.is_running("FAULTY", "WORK"));
        assert_eq!(dev.with(|d| d.read_data()).unwrap(), "true");
    }

    #[test]
    fn defaults_fill_missing_params() {
        let d = ProcessDefaults::default();
        for _ in 0..100 {
            let o = d.resolve(None, None).unwrap();
            assert_eq!(o.timeout, Duration::from_secs(10));
            assert!(o.rate >= Duration::from_millis(100) && o.rate <= Duration::from_secs(1));
        }
        let o = d.resolve(Some("2.5"), Some("0.25")).unwrap();
        assert_eq!(o.timeout, Duration::from_millis(2500));
        assert_eq!(o.rate, Duration::from_millis(250));
    }

    #[test]
    fn bad_timing_params_are_invalid() {
        let d = ProcessDefaults::default();
        for bad in ["abc", "0", "-1", "NaN", "inf", "1e20"] {
            assert!(matches!(
                d.resolve(Some(bad), None).unwrap_err(),
                HdbusError::InvalidParam { .. }
            ));
            assert!(d.resolve(None, Some(bad)).is_err());
        }
    }

    #[test]
    fn oversized_default_is_an_error_not_a_panic() {
        let d = ProcessDefaults {
            timeout_secs: 1e20,
            ..ProcessDefaults::default()
        };
        assert!(matches!(
            d.resolve(None, Some("1")).unwrap_err(),
            HdbusError::InvalidParam { ref name, .. } if name == "TIMEOUT"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn period_longer_than_timeout_ends_at_the_deadline() {
        let sup = supervisor();
        let led = blue();
        let started = Instant::now();
        sup.start(&led, BLINK, opts(1_000, 10_000)).unwrap();
        sup.join("LED_BLUE", BLINK).await;

        assert_eq!(sup.outcome("LED_BLUE", BLINK), Some(ProcessOutcome::Completed));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(led.status(), "OFF");
    }
}
