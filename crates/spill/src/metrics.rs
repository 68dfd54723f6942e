//! Spill metrics.
//!
//! The constants defined in this module are the names of metrics that the
//! spiller maintains via [`metrics`] crate interfaces.

use ::metrics::{describe_counter, describe_gauge, describe_histogram, Unit as MetricUnit};

/// Total number of bytes successfully written to spill files.
pub const TOTAL_BYTES_WRITTEN: &str = "spill.total_bytes_written";

/// Total number of buffers written to spill files.
pub const TOTAL_BUFFERS_SPILLED: &str = "spill.total_buffers_spilled";

/// Total number of spill requests that completed successfully.
pub const TOTAL_REQUESTS: &str = "spill.total_requests";

/// Total number of spill requests that failed.
pub const TOTAL_FAILED_REQUESTS: &str = "spill.total_failed_requests";

/// Histogram of the time to write one spill request.
pub const WRITE_LATENCY: &str = "spill.write_latency";

/// Number of spill requests waiting for the writer thread.
pub const QUEUE_LENGTH: &str = "spill.queue_length";

/// Adds descriptions for the metrics we expose.
pub fn describe_metrics() {
    describe_counter!(
        TOTAL_BYTES_WRITTEN,
        MetricUnit::Bytes,
        "total number of bytes written to spill files"
    );
    describe_counter!(
        TOTAL_BUFFERS_SPILLED,
        MetricUnit::Count,
        "total number of buffers written to spill files"
    );
    describe_counter!(TOTAL_REQUESTS, "total number of spill requests");
    describe_counter!(TOTAL_FAILED_REQUESTS, "total number of failed spill requests");
    describe_histogram!(
        WRITE_LATENCY,
        MetricUnit::Seconds,
        "Spill request write latency"
    );
    describe_gauge!(QUEUE_LENGTH, "spill requests queued for writing");
}
