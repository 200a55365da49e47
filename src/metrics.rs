use prometheus::{Encoder, TextEncoder, HistogramVec, IntCounterVec, GaugeVec, Opts, Registry};
use warp::Filter;
use std::net::SocketAddr;
use once_cell::sync::{Lazy, OnceCell};

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static LATENCY_GAUGE: Lazy<GaugeVec> = Lazy::new(|| {
    let opts = Opts::new("probe_latency_milliseconds_current", "Current echo round-trip time in milliseconds");
    let gauge = GaugeVec::new(opts, &["target"]).expect("valid gauge definition");
    REGISTRY.register(Box::new(gauge.clone())).expect("gauge registered once");
    gauge
});

static TIMEOUT_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("probe_timeout_total", "Total number of echo requests without a reply");
    let ctr = IntCounterVec::new(opts, &["target"]).expect("valid counter definition");
    REGISTRY.register(Box::new(ctr.clone())).expect("counter registered once");
    ctr
});

static ALERT_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("probe_alert_total", "Timeout bursts that raised an alert");
    let ctr = IntCounterVec::new(opts, &["target", "delivered"]).expect("valid counter definition");
    REGISTRY.register(Box::new(ctr.clone())).expect("counter registered once");
    ctr
});

// Only present when latency history is enabled
static LATENCY_HIST: OnceCell<HistogramVec> = OnceCell::new();

pub fn initialize_metrics(enable_latency_history: bool) {
    Lazy::force(&LATENCY_GAUGE);
    Lazy::force(&TIMEOUT_COUNTER);
    Lazy::force(&ALERT_COUNTER);

    if enable_latency_history {
        LATENCY_HIST.get_or_init(|| {
            let opts = Opts::new("probe_latency_milliseconds", "Echo round-trip time in milliseconds");
            let hist = HistogramVec::new(
                prometheus::HistogramOpts {
                    common_opts: opts,
                    buckets: vec![
                        0.05, 0.1, 0.2, 0.5, 1.0,
                        2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 250.0, 500.0, 1000.0
                    ],
                },
                &["target"],
            ).expect("creating histogram");
            REGISTRY.register(Box::new(hist.clone())).expect("histogram registered once");
            hist
        });
    }
}

fn render() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let mf = REGISTRY.gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&mf, &mut buf) {
        tracing::error!("encoding metrics failed: {:?}", e);
    }
    buf
}

pub async fn serve_metrics(addr: SocketAddr) {
    let metrics_route = warp::path!("metrics").map(move || {
        let encoder = TextEncoder::new();
        warp::http::Response::builder()
            .header("Content-Type", encoder.format_type())
            .body(render())
            .unwrap_or_default()
    });

    tracing::info!(%addr, "serving metrics");
    warp::serve(metrics_route).run(addr).await;
}

pub fn observe_latency(target: &str, latency_ms: f64) {
    LATENCY_GAUGE.with_label_values(&[target]).set(latency_ms);

    if let Some(hist) = LATENCY_HIST.get() {
        hist.with_label_values(&[target]).observe(latency_ms);
    }
}

pub fn inc_timeout(target: &str) {
    TIMEOUT_COUNTER.with_label_values(&[target]).inc();
}

pub fn inc_alert(target: &str, delivered: bool) {
    let delivered = if delivered { "true" } else { "false" };
    ALERT_COUNTER.with_label_values(&[target, delivered]).inc();
}
