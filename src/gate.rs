//! Dependency and inclusion gating around process stages.
//!
//! A process stage only reports which of the items it was given matched. The
//! gate decides which items the stage gets to see (`require`) and what a
//! match means for retention (`include`), and remembers per item whether
//! each stage kept it, for the stages further down the chain.
use std::collections::HashMap;

use siphon_plugin::{DataItem, Plugin, PluginError, ProcessPlugin};
use tracing::debug;
use uuid::Uuid;

/// An item travelling through one run, with the outcome of every process
/// stage that has looked at it so far.
#[derive(Debug, Clone)]
pub struct GatedItem {
    pub item: DataItem,
    outcomes: HashMap<usize, bool>,
}

impl GatedItem {
    pub fn new(item: DataItem) -> Self {
        Self {
            item,
            outcomes: HashMap::new(),
        }
    }

    /// Whether stage `id` kept this item. `None` when that stage has not run.
    pub fn outcome(&self, id: usize) -> Option<bool> {
        self.outcomes.get(&id).copied()
    }

    pub fn into_item(self) -> DataItem {
        self.item
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gate {
    pub id: usize,
    pub include: bool,
    pub require: Vec<usize>,
}

impl Gate {
    pub fn of<P: Plugin + ?Sized>(stage: &P) -> Self {
        Self {
            id: stage.id(),
            include: stage.include(),
            require: stage.require().to_vec(),
        }
    }

    /// Every required stage must have kept this very item.
    pub fn admits(&self, gated: &GatedItem) -> bool {
        self.require
            .iter()
            .all(|r| gated.outcome(*r).unwrap_or(false))
    }

    pub fn keeps(&self, matched: bool) -> bool {
        matched == self.include
    }
}

/// Run one process stage over `items` under its gate.
///
/// Items the stage is not allowed to evaluate pass through untouched and get
/// a negative outcome. Evaluated items that survive get a positive one, so
/// the survivors of an excluding stage count as kept by it. Evaluated items are correlated with what the stage
/// returned by `uid`; a returned item replaces the original so that any
/// output fields the stage wrote travel on. Order is preserved.
pub async fn run_stage(
    stage: &dyn ProcessPlugin,
    items: Vec<GatedItem>,
) -> Result<Vec<GatedItem>, PluginError> {
    let gate = Gate::of(stage);

    let admitted: Vec<bool> = items.iter().map(|g| gate.admits(g)).collect();
    let batch: Vec<DataItem> = items
        .iter()
        .zip(&admitted)
        .filter(|(_, ok)| **ok)
        .map(|(g, _)| g.item.clone())
        .collect();

    let mut matched: HashMap<Uuid, DataItem> = if batch.is_empty() {
        HashMap::new()
    } else {
        stage
            .process(batch)
            .await?
            .into_iter()
            .map(|item| (item.uid(), item))
            .collect()
    };

    let mut survivors = Vec::with_capacity(items.len());
    for (mut gated, evaluated) in items.into_iter().zip(admitted) {
        if !evaluated {
            gated.outcomes.insert(gate.id, false);
            survivors.push(gated);
            continue;
        }

        let returned = matched.remove(&gated.item.uid());
        let kept = gate.keeps(returned.is_some());
        gated.outcomes.insert(gate.id, kept);
        if let Some(item) = returned {
            gated.item = item;
        }
        if kept {
            survivors.push(gated);
        }
    }

    if !matched.is_empty() {
        debug!(
            plugin = stage.name(),
            id = gate.id,
            count = matched.len(),
            "ignoring items the stage was not given"
        );
    }

    Ok(survivors)
}
