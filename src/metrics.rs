//! OpenTelemetry instruments shared by every metered backend.

use std::time::Instant;

use opentelemetry::{
    KeyValue,
    metrics::{Counter, Histogram, Meter},
};

/// Instruments recorded per `backend` and `op`.
#[derive(Clone)]
pub struct StorageMetrics {
    /// Call latency in seconds.
    pub latency: Histogram<f64>,

    pub errors: Counter<u64>,

    /// Payload bytes moved by uploads and downloads.
    pub bytes: Counter<u64>,
}

impl StorageMetrics {
    pub fn new(meter: &Meter) -> Self {
        Self {
            latency: meter
                .f64_histogram("object_storage_operation_duration_seconds")
                .with_description("Latency of object storage calls in seconds")
                .with_unit("s")
                .build(),
            errors: meter
                .u64_counter("object_storage_errors_total")
                .with_description("Object storage calls that returned an error")
                .build(),
            bytes: meter
                .u64_counter("object_storage_transferred_bytes_total")
                .with_description("Bytes uploaded or downloaded")
                .with_unit("By")
                .build(),
        }
    }

    /// Starts timing one call. The latency is recorded when the timer drops,
    /// so early returns are measured too.
    pub fn start(&self, backend: &'static str, op: &'static str) -> Timer {
        Timer {
            start: Instant::now(),
            latency: self.latency.clone(),
            labels: labels(backend, op),
        }
    }

    pub fn record_error(&self, backend: &'static str, op: &'static str) {
        self.errors.add(1, &labels(backend, op));
    }

    pub fn record_bytes(&self, backend: &'static str, op: &'static str, bytes: u64) {
        self.bytes.add(bytes, &labels(backend, op));
    }
}

fn labels(backend: &'static str, op: &'static str) -> [KeyValue; 2] {
    [KeyValue::new("backend", backend), KeyValue::new("op", op)]
}

/// Records elapsed time into the latency histogram on drop.
pub struct Timer {
    start: Instant,
    latency: Histogram<f64>,
    labels: [KeyValue; 2],
}

impl Timer {
    /// Labels the recorded sample will carry.
    pub fn labels(&self) -> &[KeyValue] {
        &self.labels
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.latency
            .record(self.start.elapsed().as_secs_f64(), &self.labels);
    }
}
