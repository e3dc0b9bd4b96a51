use std::{collections::HashMap, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{
    task::JoinHandle,
    time::{Instant, sleep},
};
use tracing::{debug, info, trace};
use uuid::Uuid;

use crate::{flow::Flow, metrics::MetricsRegistry};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("no flows to schedule")]
    NoFlows,
}

/// Polls every flow at a fixed cadence, launching the ones that are due and
/// moving the counters of the others into the metrics registry.
pub struct Scheduler {
    flows: Vec<Arc<Flow>>,
    metrics: Arc<MetricsRegistry>,
    loop_sleep: Duration,
    last_run: HashMap<Uuid, Instant>,
}

impl Scheduler {
    pub fn new(
        flows: Vec<Arc<Flow>>,
        metrics: Arc<MetricsRegistry>,
        loop_sleep: Duration,
    ) -> Result<Self, SchedulerError> {
        if flows.is_empty() {
            return Err(SchedulerError::NoFlows);
        }
        Ok(Self {
            flows,
            metrics,
            loop_sleep,
            last_run: HashMap::new(),
        })
    }

    /// One pass over all flows. Launched runs are not awaited; their handles
    /// are returned for callers that want to.
    pub fn tick(&mut self, now: Instant) -> Vec<JoinHandle<()>> {
        let mut launched = Vec::new();

        for flow in &self.flows {
            let due = match self.last_run.get(&flow.uuid()) {
                None => true,
                Some(last) => now.saturating_duration_since(*last) > flow.interval(),
            };

            if due && flow.may_launch() {
                self.last_run.insert(flow.uuid(), now);
                debug!(
                    hash = %flow.hash(),
                    flow = %flow.name(),
                    run = flow.run_count() + 1,
                    in_flight = flow.running(),
                    "launching flow"
                );
                launched.push(flow.launch());
            } else {
                // runs still in flight keep counting into the next flush
                let delta = flow.counters().take();
                if !delta.is_zero() {
                    trace!(hash = %flow.hash(), flow = %flow.name(), ?delta, "flushing counters");
                }
                self.metrics.add(&flow.labels(), delta);
            }
        }

        launched
    }

    /// Tick forever, sleeping `loop_sleep` between passes.
    pub async fn run(mut self) {
        info!(flows = self.flows.len(), loop_sleep_ms = self.loop_sleep.as_millis() as u64, "scheduler started");
        loop {
            self.tick(Instant::now());
            sleep(self.loop_sleep).await;
        }
    }
}
