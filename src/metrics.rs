use std::{
    collections::BTreeMap,
    sync::{Mutex, OnceLock},
};

use crate::domain::Chain;

static METRICS: OnceLock<Mutex<MetricsState>> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Preload,
    Sign,
    Broadcast,
    StatusPoll,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::Preload => "preload",
            Stage::Sign => "sign",
            Stage::Broadcast => "broadcast",
            Stage::StatusPoll => "status_poll",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageCounters {
    pub ok: u64,
    pub err: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsSnapshot {
    pub stages: BTreeMap<(Stage, &'static str), StageCounters>,
    pub node_selection_total: u64,
    pub node_selection_fallback: u64,
    pub node_circuit_open_total: u64,
}

impl MetricsSnapshot {
    pub fn counters(&self, stage: Stage, chain: Chain) -> StageCounters {
        self.stages
            .get(&(stage, chain.as_str()))
            .cloned()
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct MetricsState {
    // (阶段, 链) -> 成功/失败
    stages: BTreeMap<(Stage, &'static str), StageCounters>,
    // 节点选择相关
    node_selection_total: u64,
    node_selection_fallback: u64,
    node_circuit_open_total: u64,
}

fn state() -> &'static Mutex<MetricsState> {
    METRICS.get_or_init(|| Mutex::new(MetricsState::default()))
}

fn with_state<F: FnOnce(&mut MetricsState)>(f: F) {
    let mut s = match state().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(), // 避免因锁污染导致 panic
    };
    f(&mut s);
}

pub fn record(stage: Stage, chain: Chain, ok: bool) {
    with_state(|s| {
        let entry = s.stages.entry((stage, chain.as_str())).or_default();
        if ok {
            entry.ok += 1;
        } else {
            entry.err += 1;
        }
    });
}

pub fn inc_node_selection() {
    with_state(|s| s.node_selection_total += 1);
}

pub fn inc_node_fallback() {
    with_state(|s| s.node_selection_fallback += 1);
}

pub fn inc_node_circuit_open() {
    with_state(|s| s.node_circuit_open_total += 1);
}

pub fn snapshot() -> MetricsSnapshot {
    let s = match state().lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    MetricsSnapshot {
        stages: s.stages.clone(),
        node_selection_total: s.node_selection_total,
        node_selection_fallback: s.node_selection_fallback,
        node_circuit_open_total: s.node_circuit_open_total,
    }
}

pub fn render_prometheus() -> String {
    let s = snapshot();
    let mut out = String::new();
    out.push_str("# HELP chainbridge_stage_total Pipeline stage outcomes per chain\n");
    out.push_str("# TYPE chainbridge_stage_total counter\n");
    for ((stage, chain), c) in &s.stages {
        out.push_str(&format!(
            "chainbridge_stage_total{{stage=\"{}\",chain=\"{}\",result=\"ok\"}} {}\n",
            stage.as_str(),
            chain,
            c.ok
        ));
        out.push_str(&format!(
            "chainbridge_stage_total{{stage=\"{}\",chain=\"{}\",result=\"err\"}} {}\n",
            stage.as_str(),
            chain,
            c.err
        ));
    }

    out.push_str("# HELP chainbridge_node_selection_total Node selections\n");
    out.push_str("# TYPE chainbridge_node_selection_total counter\n");
    out.push_str(&format!(
        "chainbridge_node_selection_total {}\n",
        s.node_selection_total
    ));
    out.push_str("# HELP chainbridge_node_selection_fallback_total Selections without a healthy closed node\n");
    out.push_str("# TYPE chainbridge_node_selection_fallback_total counter\n");
    out.push_str(&format!(
        "chainbridge_node_selection_fallback_total {}\n",
        s.node_selection_fallback
    ));
    out.push_str("# HELP chainbridge_node_circuit_open_total Node circuits opened\n");
    out.push_str("# TYPE chainbridge_node_circuit_open_total counter\n");
    out.push_str(&format!(
        "chainbridge_node_circuit_open_total {}\n",
        s.node_circuit_open_total
    ));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_render() {
        let before = snapshot().counters(Stage::Broadcast, Chain::Near);
        record(Stage::Broadcast, Chain::Near, true);
        record(Stage::Broadcast, Chain::Near, false);
        let after = snapshot().counters(Stage::Broadcast, Chain::Near);
        assert_eq!(after.ok, before.ok + 1);
        assert_eq!(after.err, before.err + 1);

        let text = render_prometheus();
        assert!(text.contains("stage=\"broadcast\",chain=\"near\",result=\"ok\""));
        assert!(text.contains("chainbridge_node_selection_total"));
    }
}
