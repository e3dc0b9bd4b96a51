// src/flow.rs

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};

use chrono::Utc;
use siphon_plugin::{InputPlugin, OutputPlugin, Plugin, PluginError, PluginType, ProcessPlugin};
use thiserror::Error;
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    gate::{self, GatedItem},
    logger::FLOW_RUN_TARGET,
    metrics::{CounterSnapshot, FlowLabels, fmt_list},
};

pub mod manager;

pub use manager::{FlowConfig, FlowError, FlowFile, FlowManager, FlowParams, Interval, ProcessStageConfig, StageConfig};

/// Per-flow counters, accumulated by runs and drained by the scheduler.
#[derive(Debug, Default)]
pub struct FlowCounters {
    error: AtomicU64,
    expire: AtomicU64,
    nodata: AtomicU64,
    receive: AtomicU64,
    send: AtomicU64,
}

impl FlowCounters {
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            error: self.error.load(Ordering::Relaxed),
            expire: self.expire.load(Ordering::Relaxed),
            nodata: self.nodata.load(Ordering::Relaxed),
            receive: self.receive.load(Ordering::Relaxed),
            send: self.send.load(Ordering::Relaxed),
        }
    }

    /// Read and reset every counter. Each one is swapped on its own, so an
    /// increment racing with this lands either in the result or in the next
    /// period, never nowhere.
    pub fn take(&self) -> CounterSnapshot {
        CounterSnapshot {
            error: self.error.swap(0, Ordering::Relaxed),
            expire: self.expire.swap(0, Ordering::Relaxed),
            nodata: self.nodata.swap(0, Ordering::Relaxed),
            receive: self.receive.swap(0, Ordering::Relaxed),
            send: self.send.swap(0, Ordering::Relaxed),
        }
    }
}

/// A stage failed and the run was abandoned.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{plugin_type} plugin `{plugin}` (id {id}) failed: {source}")]
pub struct StageError {
    pub plugin: String,
    pub plugin_type: PluginType,
    pub id: usize,
    pub source: PluginError,
}

impl StageError {
    pub fn new<P: Plugin + ?Sized>(stage: &P, source: PluginError) -> Self {
        Self {
            plugin: stage.name().to_string(),
            plugin_type: stage.plugin_type(),
            id: stage.id(),
            source,
        }
    }
}

/// What one successful run did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub received: usize,
    pub sent: usize,
    pub elapsed: Duration,
    pub expired: bool,
}

/// A configured pipeline: one input, an ordered chain of process stages and
/// an optional output.
pub struct Flow {
    uuid: Uuid,
    hash: String,
    name: String,
    interval: Duration,
    number: u64,

    run_count: AtomicU64,
    running: AtomicUsize,

    input: Box<dyn InputPlugin>,
    process: Vec<Box<dyn ProcessPlugin>>,
    output: Option<Box<dyn OutputPlugin>>,

    counters: FlowCounters,
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("uuid", &self.uuid)
            .field("hash", &self.hash)
            .field("name", &self.name)
            .field("interval", &self.interval)
            .field("number", &self.number)
            .field("run_count", &self.run_count())
            .field("labels", &self.labels())
            .finish()
    }
}

impl Flow {
    pub fn new(
        name: impl Into<String>,
        hash: impl Into<String>,
        interval: Duration,
        number: u64,
        input: Box<dyn InputPlugin>,
    ) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            hash: hash.into(),
            name: name.into(),
            interval,
            number,
            run_count: AtomicU64::new(0),
            running: AtomicUsize::new(0),
            input,
            process: Vec::new(),
            output: None,
            counters: FlowCounters::default(),
        }
    }

    pub fn with_process(mut self, stage: Box<dyn ProcessPlugin>) -> Self {
        self.process.push(stage);
        self
    }

    pub fn with_output(mut self, output: Box<dyn OutputPlugin>) -> Self {
        self.output = Some(output);
        self
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Launch cap, `0` meaning unlimited.
    pub fn number(&self) -> u64 {
        self.number
    }

    /// How many runs have been launched so far.
    pub fn run_count(&self) -> u64 {
        self.run_count.load(Ordering::SeqCst)
    }

    /// How many launched runs have not finished yet.
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    pub fn counters(&self) -> &FlowCounters {
        &self.counters
    }

    pub fn may_launch(&self) -> bool {
        self.number == 0 || self.run_count() < self.number
    }

    pub fn labels(&self) -> FlowLabels {
        let process: Vec<&str> = self.process.iter().map(|p| p.name()).collect();
        FlowLabels {
            flow: self.name.clone(),
            hash: self.hash.clone(),
            input_plugin: self.input.name().to_string(),
            input_values: fmt_list(&self.input.inputs()),
            process_plugins: fmt_list(&process),
            output_plugin: self
                .output
                .as_ref()
                .map(|o| o.name().to_string())
                .unwrap_or_default(),
            output_values: fmt_list(
                &self.output.as_ref().map(|o| o.outputs()).unwrap_or_default(),
            ),
        }
    }

    /// Count a new run and start it in the background.
    pub fn launch(self: &Arc<Self>) -> JoinHandle<()> {
        self.run_count.fetch_add(1, Ordering::SeqCst);
        self.running.fetch_add(1, Ordering::SeqCst);

        let guard = InFlight(Arc::clone(self));
        tokio::spawn(async move {
            // failures are already counted and logged
            let _ = guard.0.run().await;
        })
    }

    /// One pass through the pipeline. Stage failures end the run but are
    /// contained here: they are counted, logged and handed back.
    pub async fn run(&self) -> Result<RunReport, StageError> {
        let started_at = Utc::now();
        let started = Instant::now();
        let result = self.execute().await;
        let elapsed = started.elapsed();

        let expired = !self.interval.is_zero() && elapsed > self.interval;
        if expired {
            self.counters.expire.fetch_add(1, Ordering::Relaxed);
            warn!(
                hash = %self.hash,
                flow = %self.name,
                elapsed_ms = elapsed.as_millis() as u64,
                interval_ms = self.interval.as_millis() as u64,
                "flow run outlived its interval"
            );
        }

        match result {
            Ok(mut report) => {
                report.elapsed = elapsed;
                report.expired = expired;
                info!(
                    target: FLOW_RUN_TARGET,
                    hash = %self.hash,
                    flow = %self.name,
                    status = "ok",
                    started = %started_at.to_rfc3339(),
                    received = report.received,
                    sent = report.sent,
                    elapsed_ms = elapsed.as_millis() as u64,
                    expired,
                    "flow run finished"
                );
                Ok(report)
            }
            Err(err) => {
                self.counters.error.fetch_add(1, Ordering::Relaxed);
                error!(
                    hash = %self.hash,
                    flow = %self.name,
                    plugin = %err.plugin,
                    "type" = err.plugin_type.as_ref(),
                    id = err.id,
                    config = err.source.is_config(),
                    error = %err.source,
                    "flow run failed"
                );
                info!(
                    target: FLOW_RUN_TARGET,
                    hash = %self.hash,
                    flow = %self.name,
                    status = "error",
                    started = %started_at.to_rfc3339(),
                    plugin = %err.plugin,
                    elapsed_ms = elapsed.as_millis() as u64,
                    expired,
                    "flow run finished"
                );
                Err(err)
            }
        }
    }

    async fn execute(&self) -> Result<RunReport, StageError> {
        let received = self
            .input
            .receive()
            .await
            .map_err(|e| StageError::new(self.input.as_ref(), e))?;

        if received.is_empty() {
            self.counters.nodata.fetch_add(1, Ordering::Relaxed);
            debug!(hash = %self.hash, flow = %self.name, "no data");
            return Ok(RunReport::default());
        }

        let count = received.len();
        self.counters.receive.fetch_add(count as u64, Ordering::Relaxed);

        let mut items: Vec<GatedItem> = received.into_iter().map(GatedItem::new).collect();
        for stage in &self.process {
            items = gate::run_stage(stage.as_ref(), items)
                .await
                .map_err(|e| StageError::new(stage.as_ref(), e))?;
            debug!(
                hash = %self.hash,
                flow = %self.name,
                plugin = stage.name(),
                id = stage.id(),
                survivors = items.len(),
                "process stage done"
            );
        }

        let mut sent = 0;
        if let Some(output) = &self.output {
            if !items.is_empty() {
                let data: Vec<_> = items.into_iter().map(GatedItem::into_item).collect();
                sent = data.len();
                output
                    .send(data)
                    .await
                    .map_err(|e| StageError::new(output.as_ref(), e))?;
                self.counters.send.fetch_add(sent as u64, Ordering::Relaxed);
            }
        }

        Ok(RunReport {
            received: count,
            sent,
            ..Default::default()
        })
    }
}

/// Keeps a flow's in-flight count up while a run is alive, including when
/// the task panics or is aborted.
struct InFlight(Arc<Flow>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.running.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use siphon_plugin::{DataItem, PluginDescriptor};
    use std::sync::Mutex;

    fn descriptor(name: &str, plugin_type: PluginType, id: usize) -> PluginDescriptor {
        PluginDescriptor {
            id,
            alias: None,
            file: "test.yaml".into(),
            flow: "test".into(),
            hash: "h".into(),
            name: name.into(),
            plugin_type,
            include: true,
            require: vec![],
        }
    }

    struct Source {
        desc: PluginDescriptor,
        texts: Vec<&'static str>,
        fail: bool,
    }

    impl Source {
        fn boxed(texts: Vec<&'static str>) -> Box<dyn InputPlugin> {
            Box::new(Self { desc: descriptor("source", PluginType::Input, 0), texts, fail: false })
        }

        fn failing() -> Box<dyn InputPlugin> {
            Box::new(Self { desc: descriptor("source", PluginType::Input, 0), texts: vec![], fail: true })
        }
    }

    impl Plugin for Source {
        fn descriptor(&self) -> &PluginDescriptor {
            &self.desc
        }
    }

    #[async_trait]
    impl InputPlugin for Source {
        async fn receive(&self) -> Result<Vec<DataItem>, PluginError> {
            if self.fail {
                return Err(PluginError::Transport("connection refused".into()));
            }
            self.texts
                .iter()
                .map(|t| {
                    let mut item = DataItem::new("test", "source");
                    item.set("data.text0", *t)?;
                    Ok(item)
                })
                .collect()
        }

        fn inputs(&self) -> Vec<String> {
            vec!["a".into(), "b".into()]
        }
    }

    struct Filter {
        desc: PluginDescriptor,
        needle: &'static str,
        delay: Duration,
        fail: bool,
    }

    impl Plugin for Filter {
        fn descriptor(&self) -> &PluginDescriptor {
            &self.desc
        }
    }

    #[async_trait]
    impl ProcessPlugin for Filter {
        async fn process(&self, data: Vec<DataItem>) -> Result<Vec<DataItem>, PluginError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail {
                return Err(PluginError::Other("boom".into()));
            }
            Ok(data
                .into_iter()
                .filter(|i| {
                    i.get("data.text0")
                        .ok()
                        .and_then(|v| v.as_scalar())
                        .is_some_and(|s| s.contains(self.needle))
                })
                .collect())
        }
    }

    fn filter(id: usize, needle: &'static str) -> Filter {
        Filter { desc: descriptor("filter", PluginType::Process, id), needle, delay: Duration::ZERO, fail: false }
    }

    #[derive(Clone, Default)]
    struct Sink {
        sent: Arc<Mutex<Vec<usize>>>,
    }

    struct SinkPlugin {
        desc: PluginDescriptor,
        sink: Sink,
    }

    impl Plugin for SinkPlugin {
        fn descriptor(&self) -> &PluginDescriptor {
            &self.desc
        }
    }

    #[async_trait]
    impl OutputPlugin for SinkPlugin {
        async fn send(&self, data: Vec<DataItem>) -> Result<(), PluginError> {
            self.sink.sent.lock().unwrap().push(data.len());
            Ok(())
        }

        fn outputs(&self) -> Vec<String> {
            vec!["out".into()]
        }
    }

    impl Sink {
        fn plugin(&self) -> Box<dyn OutputPlugin> {
            Box::new(SinkPlugin { desc: descriptor("sink", PluginType::Output, 0), sink: self.clone() })
        }

        fn calls(&self) -> Vec<usize> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[tokio::test]
    async fn empty_receive_counts_nodata_and_skips_output() {
        let sink = Sink::default();
        let flow = Flow::new("empty", "h", Duration::from_secs(60), 0, Source::boxed(vec![]))
            .with_output(sink.plugin());

        let report = flow.run().await.unwrap();
        assert_eq!(report.received, 0);
        assert!(sink.calls().is_empty());
        assert_eq!(flow.counters().snapshot(), CounterSnapshot { nodata: 1, ..Default::default() });
    }

    #[tokio::test]
    async fn survivors_are_sent_and_counted() {
        let sink = Sink::default();
        let flow = Flow::new("news", "h", Duration::from_secs(60), 0, Source::boxed(vec!["rust", "go", "rusty"]))
            .with_process(Box::new(filter(0, "rust")))
            .with_output(sink.plugin());

        let report = flow.run().await.unwrap();
        assert_eq!((report.received, report.sent), (3, 2));
        assert_eq!(sink.calls(), vec![2]);
        assert_eq!(
            flow.counters().snapshot(),
            CounterSnapshot { receive: 3, send: 2, ..Default::default() }
        );
    }

    #[tokio::test]
    async fn nothing_is_sent_when_every_item_is_filtered() {
        let sink = Sink::default();
        let flow = Flow::new("news", "h", Duration::from_secs(60), 0, Source::boxed(vec!["go"]))
            .with_process(Box::new(filter(0, "rust")))
            .with_output(sink.plugin());

        flow.run().await.unwrap();
        assert!(sink.calls().is_empty());
        assert_eq!(flow.counters().snapshot().send, 0);
    }

    #[tokio::test]
    async fn stage_error_aborts_the_run() {
        let sink = Sink::default();
        let mut broken = filter(1, "");
        broken.fail = true;
        let flow = Flow::new("news", "h", Duration::from_secs(60), 0, Source::boxed(vec!["rust"]))
            .with_process(Box::new(broken))
            .with_output(sink.plugin());

        let err = flow.run().await.unwrap_err();
        assert_eq!(err.plugin, "filter");
        assert_eq!(err.plugin_type, PluginType::Process);
        assert_eq!(err.id, 1);
        assert!(sink.calls().is_empty());
        assert_eq!(
            flow.counters().snapshot(),
            CounterSnapshot { error: 1, receive: 1, ..Default::default() }
        );
    }

    #[tokio::test]
    async fn input_error_is_counted() {
        let flow = Flow::new("news", "h", Duration::from_secs(60), 0, Source::failing());
        let err = flow.run().await.unwrap_err();
        assert_eq!(err.plugin_type, PluginType::Input);
        assert!(matches!(err.source, PluginError::Transport(_)));
        assert_eq!(flow.counters().snapshot().error, 1);
        assert_eq!(flow.counters().snapshot().nodata, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_runs_expire_without_being_cancelled() {
        let sink = Sink::default();
        let mut slow = filter(0, "rust");
        slow.delay = Duration::from_secs(5);
        let flow = Flow::new("slow", "h", Duration::from_secs(2), 0, Source::boxed(vec!["rust"]))
            .with_process(Box::new(slow))
            .with_output(sink.plugin());

        let report = flow.run().await.unwrap();
        assert!(report.expired);
        assert_eq!(sink.calls(), vec![1]);
        assert_eq!(flow.counters().snapshot().expire, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_never_expires() {
        let mut slow = filter(0, "");
        slow.delay = Duration::from_secs(5);
        let flow = Flow::new("slow", "h", Duration::ZERO, 0, Source::boxed(vec!["x"]))
            .with_process(Box::new(slow));

        assert!(!flow.run().await.unwrap().expired);
        assert_eq!(flow.counters().snapshot().expire, 0);
    }

    #[tokio::test]
    async fn take_resets_counters() {
        let flow = Flow::new("news", "h", Duration::from_secs(60), 0, Source::boxed(vec!["a", "b"]));
        flow.run().await.unwrap();
        assert_eq!(flow.counters().take().receive, 2);
        assert!(flow.counters().snapshot().is_zero());

        flow.run().await.unwrap();
        assert_eq!(flow.counters().take().receive, 2);
    }

    #[tokio::test]
    async fn launch_tracks_runs_in_flight() {
        let flow = Arc::new(Flow::new("news", "h", Duration::from_secs(60), 2, Source::boxed(vec!["a"])));
        assert!(flow.may_launch());

        flow.launch().await.unwrap();
        assert_eq!(flow.run_count(), 1);
        assert_eq!(flow.running(), 0);
        assert_eq!(flow.counters().snapshot().receive, 1);

        flow.launch().await.unwrap();
        assert!(!flow.may_launch());
    }

    #[test]
    fn labels_describe_the_pipeline() {
        let flow = Flow::new("news", "abc", Duration::from_secs(60), 0, Source::boxed(vec![]))
            .with_process(Box::new(filter(0, "a")))
            .with_process(Box::new(filter(1, "b")))
            .with_output(Sink::default().plugin());

        let labels = flow.labels();
        assert_eq!(labels.flow, "news");
        assert_eq!(labels.hash, "abc");
        assert_eq!(labels.input_plugin, "source");
        assert_eq!(labels.input_values, "[a b]");
        assert_eq!(labels.process_plugins, "[filter filter]");
        assert_eq!(labels.output_plugin, "sink");
        assert_eq!(labels.output_values, "[out]");

        let bare = Flow::new("bare", "abc", Duration::ZERO, 0, Source::boxed(vec![]));
        assert_eq!(bare.labels().output_plugin, "");
        assert_eq!(bare.labels().output_values, "[]");
    }
}
