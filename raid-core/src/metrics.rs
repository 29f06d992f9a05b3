// vim: tw=80
//! Prometheus collectors for one array.
//!
//! The engine never reaches for a global registry; a `Metrics` handle is
//! built once (typically by `raid-ctl`'s `create`/`status`/`serve`
//! subcommands) and passed into `Raid1::create`/`Raid1::open`, mirroring how
//! the label surface is wired up one array at a time.

use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
};

use crate::error::{Error, Result};

pub struct Metrics {
    io_latency: HistogramVec,
    io_total: IntCounterVec,
    array_degraded_total: IntCounter,
    resync_started_total: IntCounter,
    resync_bytes_total: IntCounter,
    resync_duration_seconds: Histogram,
    resync_active: IntGauge,
    dirty_pages: IntGauge,
}

impl Metrics {
    /// Register the collectors for `array` with `registry`. Safe to call
    /// once per array per process; registering the same array name twice
    /// against the same registry returns a `Mismatch` error (Prometheus
    /// rejects the duplicate descriptor).
    pub fn new(registry: &Registry, array: &str) -> Result<Self> {
        let reg = |e: prometheus::Error| Error::InvalidArgument(e.to_string());

        let io_latency = HistogramVec::new(
            HistogramOpts::new("raid_disk_io_latency_seconds", "per-backend I/O latency"),
            &["child", "op"],
        )
        .map_err(reg)?;
        registry.register(Box::new(io_latency.clone())).map_err(reg)?;

        let io_total = IntCounterVec::new(
            Opts::new("raid_disk_io_total", "per-backend I/O count"),
            &["child", "op", "result"],
        )
        .map_err(reg)?;
        registry.register(Box::new(io_total.clone())).map_err(reg)?;

        let array_degraded_total = IntCounter::with_opts(
            Opts::new("raid_array_degraded_total", "degraded-mode transitions").const_label("array", array),
        )
        .map_err(reg)?;
        registry.register(Box::new(array_degraded_total.clone())).map_err(reg)?;

        let resync_started_total = IntCounter::with_opts(
            Opts::new("raid_resync_started_total", "resyncs started").const_label("array", array),
        )
        .map_err(reg)?;
        registry.register(Box::new(resync_started_total.clone())).map_err(reg)?;

        let resync_bytes_total = IntCounter::with_opts(
            Opts::new("raid_resync_bytes_total", "bytes resynced").const_label("array", array),
        )
        .map_err(reg)?;
        registry.register(Box::new(resync_bytes_total.clone())).map_err(reg)?;

        let resync_duration_seconds = Histogram::with_opts(
            HistogramOpts::new("raid_resync_duration_seconds", "resync duration").const_label("array", array),
        )
        .map_err(reg)?;
        registry.register(Box::new(resync_duration_seconds.clone())).map_err(reg)?;

        let resync_active = IntGauge::with_opts(
            Opts::new("raid_resync_active", "active resyncs").const_label("array", array),
        )
        .map_err(reg)?;
        registry.register(Box::new(resync_active.clone())).map_err(reg)?;

        let dirty_pages = IntGauge::with_opts(
            Opts::new("raid_dirty_pages", "dirty bitmap pages").const_label("array", array),
        )
        .map_err(reg)?;
        registry.register(Box::new(dirty_pages.clone())).map_err(reg)?;

        Ok(Self {
            io_latency,
            io_total,
            array_degraded_total,
            resync_started_total,
            resync_bytes_total,
            resync_duration_seconds,
            resync_active,
            dirty_pages,
        })
    }

    pub fn observe_io(&self, child: &str, op: &str, latency_seconds: f64, ok: bool) {
        self.io_latency.with_label_values(&[child, op]).observe(latency_seconds);
        let result = if ok { "ok" } else { "error" };
        self.io_total.with_label_values(&[child, op, result]).inc();
    }

    pub fn record_degraded(&self) {
        self.array_degraded_total.inc();
    }

    pub fn set_dirty_pages(&self, n: u64) {
        self.dirty_pages.set(n as i64);
    }

    /// Present so the `resync_*` surface named in the label list is a
    /// registered, scrapeable series even though resync itself is not
    /// implemented; always reports zero/idle.
    pub fn resync_idle(&self) -> bool {
        self.resync_active.get() == 0
    }

    #[cfg(test)]
    pub fn resync_started_total(&self) -> u64 {
        self.resync_started_total.get() as u64
    }

    #[cfg(test)]
    pub fn resync_bytes_total(&self) -> u64 {
        self.resync_bytes_total.get() as u64
    }

    #[cfg(test)]
    pub fn resync_duration_seconds_count(&self) -> u64 {
        self.resync_duration_seconds.get_sample_count()
    }
}

#[cfg(test)]
mod t {
    use super::*;

    #[test]
    fn registers_without_error() {
        let registry = Registry::new();
        let m = Metrics::new(&registry, "test-array").unwrap();
        assert!(m.resync_idle());
        assert_eq!(m.resync_started_total(), 0);
        assert_eq!(m.resync_bytes_total(), 0);
        assert_eq!(m.resync_duration_seconds_count(), 0);
    }

    #[test]
    fn observe_io_updates_counters() {
        let registry = Registry::new();
        let m = Metrics::new(&registry, "observe-array").unwrap();
        m.observe_io("A", "read", 0.001, true);
        m.observe_io("A", "read", 0.002, false);
        assert_eq!(m.io_total.with_label_values(&["A", "read", "ok"]).get(), 1);
        assert_eq!(m.io_total.with_label_values(&["A", "read", "error"]).get(), 1);
    }

    #[test]
    fn set_dirty_pages_reflects_value() {
        let registry = Registry::new();
        let m = Metrics::new(&registry, "dirty-array").unwrap();
        m.set_dirty_pages(7);
        assert_eq!(m.dirty_pages.get(), 7);
    }
}
