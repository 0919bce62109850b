// SPDX-License-Identifier: AGPL-3.0-only
//! Prometheus metrics for the RADIUS listeners and handlers.

use prometheus::{
    Counter, CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

pub struct Metrics {
    registry: Registry,

    pub packets_received_total: CounterVec,
    pub packets_dropped_total: CounterVec,

    pub auth_requests_total: CounterVec,
    pub auth_duration_seconds: HistogramVec,
    pub auth_rejects_total: CounterVec,

    pub acct_records_total: CounterVec,

    pub sessions_active: Gauge,
    pub sweep_disconnects_total: Counter,
}

impl Metrics {
    fn new() -> Self {
        let registry = Registry::new();

        let packets_received_total = CounterVec::new(
            Opts::new("radius_packets_received_total", "Datagrams received by listener"),
            &["listener"],
        )
        .expect("metric can be created");

        let packets_dropped_total = CounterVec::new(
            Opts::new("radius_packets_dropped_total", "Datagrams dropped without a reply"),
            &["listener", "reason"],
        )
        .expect("metric can be created");

        let auth_requests_total = CounterVec::new(
            Opts::new(
                "radius_auth_requests_total",
                "Access-Requests by credential kind and result",
            ),
            &["kind", "result"],
        )
        .expect("metric can be created");

        let auth_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "radius_auth_duration_seconds",
                "Access-Request handling time in seconds",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]),
            &["kind"],
        )
        .expect("metric can be created");

        let auth_rejects_total = CounterVec::new(
            Opts::new("radius_auth_rejects_total", "Access-Rejects by reason"),
            &["reason"],
        )
        .expect("metric can be created");

        let acct_records_total = CounterVec::new(
            Opts::new(
                "radius_acct_records_total",
                "Accounting-Requests by status type and persistence result",
            ),
            &["status_type", "result"],
        )
        .expect("metric can be created");

        let sessions_active = Gauge::with_opts(Opts::new(
            "radius_sessions_active",
            "Sessions in the live registry",
        ))
        .expect("metric can be created");

        let sweep_disconnects_total = Counter::with_opts(Opts::new(
            "radius_sweep_disconnects_total",
            "Sessions disconnected because their voucher expired",
        ))
        .expect("metric can be created");

        registry
            .register(Box::new(packets_received_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(packets_dropped_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(auth_requests_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(auth_duration_seconds.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(auth_rejects_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(acct_records_total.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(sessions_active.clone()))
            .expect("metric can be registered");
        registry
            .register(Box::new(sweep_disconnects_total.clone()))
            .expect("metric can be registered");

        Self {
            registry,
            packets_received_total,
            packets_dropped_total,
            auth_requests_total,
            auth_duration_seconds,
            auth_rejects_total,
            acct_records_total,
            sessions_active,
            sweep_disconnects_total,
        }
    }

    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder.encode_to_string(&metric_families).unwrap_or_default()
    }
}

/// Times one Access-Request. The credential kind is known only after
/// classification, so it is supplied at `finish`.
pub struct AuthTimer {
    start: std::time::Instant,
}

impl AuthTimer {
    pub fn new() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    pub fn finish(self, kind: &str, result: &str) {
        let duration = self.start.elapsed().as_secs_f64();
        metrics()
            .auth_duration_seconds
            .with_label_values(&[kind])
            .observe(duration);
        metrics()
            .auth_requests_total
            .with_label_values(&[kind, result])
            .inc();
    }
}

impl Default for AuthTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_and_encode() {
        let m = metrics();
        m.packets_received_total.with_label_values(&["auth"]).inc();
        m.packets_dropped_total
            .with_label_values(&["acct", "bad_authenticator"])
            .inc();
        m.acct_records_total.with_label_values(&["start", "ok"]).inc();
        m.sessions_active.set(3.0);

        let output = m.encode();
        assert!(output.contains("radius_packets_received_total"));
        assert!(output.contains("radius_packets_dropped_total"));
        assert!(output.contains("radius_acct_records_total"));
        assert!(output.contains("radius_sessions_active"));
    }

    #[test]
    fn auth_timer_records_duration() {
        AuthTimer::new().finish("voucher", "accept");
        let output = metrics().encode();
        assert!(output.contains("radius_auth_duration_seconds"));
        assert!(output.contains("kind=\"voucher\""));
    }
}
