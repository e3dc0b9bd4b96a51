//! Process-wide flow counters and the scrape endpoint that exposes them.
//!
//! Flows keep their own per-run counters; the scheduler periodically moves
//! them in here with [`MetricsRegistry::add`]. The counters live in a
//! Prometheus recorder owned by the registry, so every registry is isolated
//! and nothing is installed globally.
use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use axum::{Router, extract::State, http::header::CONTENT_TYPE, response::IntoResponse, routing::get};
use metrics::{Label, counter, describe_counter, with_local_recorder};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use serde::Serialize;
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{error, info};

pub const FLOW_ERROR: &str = "flow_error";
pub const FLOW_EXPIRE: &str = "flow_expire";
pub const FLOW_NODATA: &str = "flow_nodata";
pub const FLOW_RECEIVE: &str = "flow_receive";
pub const FLOW_SEND: &str = "flow_send";

const TEXT_FORMAT: &str = "text/plain; version=0.0.4; charset=utf-8";

/// The seven labels every flow series is keyed by.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FlowLabels {
    pub flow: String,
    pub hash: String,
    pub input_plugin: String,
    pub input_values: String,
    pub process_plugins: String,
    pub output_plugin: String,
    pub output_values: String,
}

impl FlowLabels {
    pub fn pairs(&self) -> [(&'static str, &str); 7] {
        [
            ("flow", &self.flow),
            ("hash", &self.hash),
            ("input_plugin", &self.input_plugin),
            ("input_values", &self.input_values),
            ("process_plugins", &self.process_plugins),
            ("output_plugin", &self.output_plugin),
            ("output_values", &self.output_values),
        ]
    }

    fn to_labels(&self) -> Vec<Label> {
        self.pairs()
            .into_iter()
            .map(|(key, value)| Label::new(key, value.to_string()))
            .collect()
    }
}

/// Render a list the way it shows up in label values: `[a b c]`.
pub fn fmt_list<S: AsRef<str>>(items: &[S]) -> String {
    let joined: Vec<&str> = items.iter().map(AsRef::as_ref).collect();
    format!("[{}]", joined.join(" "))
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub error: u64,
    pub expire: u64,
    pub nodata: u64,
    pub receive: u64,
    pub send: u64,
}

impl CounterSnapshot {
    pub fn is_zero(&self) -> bool {
        *self == CounterSnapshot::default()
    }

    fn by_name(&self) -> [(&'static str, u64); 5] {
        [
            (FLOW_ERROR, self.error),
            (FLOW_EXPIRE, self.expire),
            (FLOW_NODATA, self.nodata),
            (FLOW_RECEIVE, self.receive),
            (FLOW_SEND, self.send),
        ]
    }
}

fn describe() {
    describe_counter!(FLOW_ERROR, "Flow runs aborted by a stage error.");
    describe_counter!(FLOW_EXPIRE, "Flow runs that outlived their interval.");
    describe_counter!(FLOW_NODATA, "Flow runs whose input returned nothing.");
    describe_counter!(FLOW_RECEIVE, "Items received by flow inputs.");
    describe_counter!(FLOW_SEND, "Items sent by flow outputs.");
}

pub struct MetricsRegistry {
    recorder: PrometheusRecorder,
    handle: PrometheusHandle,
}

impl MetricsRegistry {
    pub fn new() -> Arc<Self> {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        with_local_recorder(&recorder, describe);
        Arc::new(Self { recorder, handle })
    }

    /// Add a flushed delta to the five counters of one series. A zero delta
    /// still registers the series so idle flows show up in a scrape.
    pub fn add(&self, labels: &FlowLabels, delta: CounterSnapshot) {
        let labels = labels.to_labels();
        with_local_recorder(&self.recorder, || {
            for (name, value) in delta.by_name() {
                counter!(name, labels.clone()).increment(value);
            }
        });
    }

    /// Prometheus text exposition of every series.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

async fn scrape(State(registry): State<Arc<MetricsRegistry>>) -> impl IntoResponse {
    ([(CONTENT_TYPE, TEXT_FORMAT)], registry.render())
}

/// Bind the exporter and serve it in the background. Binding happens before
/// this returns, so a bad address surfaces as an error here.
pub async fn serve(listen: &str, registry: Arc<MetricsRegistry>) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("could not bind metrics exporter to {listen}"))?;
    let local = listener.local_addr()?;

    let app = Router::new()
        .route("/", get(scrape))
        .route("/metrics", get(scrape))
        .with_state(registry);

    info!(listen = %local, "metrics exporter listening");
    let task = tokio::spawn(async move {
        if let Err(err) = axum::serve(listener, app).await {
            error!(error = %err, "metrics exporter stopped");
            std::process::exit(1);
        }
    });
    Ok((local, task))
}
