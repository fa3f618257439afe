//! Lightweight global metrics.
//!
//! Process-wide atomic counters for the subsystems:
//! - block log (appends, commits, truncations on recovery)
//! - group reads
//! - static index builds
//! - archive streaming

use std::sync::atomic::{AtomicU64, Ordering};

// ----- Block log -----
static LOG_APPENDS_TOTAL: AtomicU64 = AtomicU64::new(0);
static LOG_BYTES_WRITTEN: AtomicU64 = AtomicU64::new(0);
static LOG_COMMITS: AtomicU64 = AtomicU64::new(0);
static LOG_RECOVERY_TRUNCATIONS: AtomicU64 = AtomicU64::new(0);

// ----- Group reads -----
static GROUP_READ_BLOCKS: AtomicU64 = AtomicU64::new(0);
static GROUP_READ_BYTES: AtomicU64 = AtomicU64::new(0);

// ----- Static index -----
static BSST_BUILDS: AtomicU64 = AtomicU64::new(0);
static BSST_ENTRIES_WRITTEN: AtomicU64 = AtomicU64::new(0);

// ----- Archive streaming -----
static CAR_BYTES_STREAMED: AtomicU64 = AtomicU64::new(0);

#[inline]
pub fn record_log_append(blocks: u64, bytes: u64) {
    LOG_APPENDS_TOTAL.fetch_add(blocks, Ordering::Relaxed);
    LOG_BYTES_WRITTEN.fetch_add(bytes, Ordering::Relaxed);
}

#[inline]
pub fn record_log_commit() {
    LOG_COMMITS.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn record_log_recovery_truncation() {
    LOG_RECOVERY_TRUNCATIONS.fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn record_group_read(blocks: u64, bytes: u64) {
    GROUP_READ_BLOCKS.fetch_add(blocks, Ordering::Relaxed);
    GROUP_READ_BYTES.fetch_add(bytes, Ordering::Relaxed);
}

#[inline]
pub fn record_bsst_build(entries: u64) {
    BSST_BUILDS.fetch_add(1, Ordering::Relaxed);
    BSST_ENTRIES_WRITTEN.fetch_add(entries, Ordering::Relaxed);
}

#[inline]
pub fn record_car_bytes(bytes: u64) {
    CAR_BYTES_STREAMED.fetch_add(bytes, Ordering::Relaxed);
}

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub log_appends_total: u64,
    pub log_bytes_written: u64,
    pub log_commits: u64,
    pub log_recovery_truncations: u64,

    pub group_read_blocks: u64,
    pub group_read_bytes: u64,

    pub bsst_builds: u64,
    pub bsst_entries_written: u64,

    pub car_bytes_streamed: u64,
}

pub fn metrics_snapshot() -> MetricsSnapshot {
    MetricsSnapshot {
        log_appends_total: LOG_APPENDS_TOTAL.load(Ordering::Relaxed),
        log_bytes_written: LOG_BYTES_WRITTEN.load(Ordering::Relaxed),
        log_commits: LOG_COMMITS.load(Ordering::Relaxed),
        log_recovery_truncations: LOG_RECOVERY_TRUNCATIONS.load(Ordering::Relaxed),
        group_read_blocks: GROUP_READ_BLOCKS.load(Ordering::Relaxed),
        group_read_bytes: GROUP_READ_BYTES.load(Ordering::Relaxed),
        bsst_builds: BSST_BUILDS.load(Ordering::Relaxed),
        bsst_entries_written: BSST_ENTRIES_WRITTEN.load(Ordering::Relaxed),
        car_bytes_streamed: CAR_BYTES_STREAMED.load(Ordering::Relaxed),
    }
}
