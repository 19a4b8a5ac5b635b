//! 多节点选择器
//!
//! 每条链维护一组节点的健康状态：EMA 延迟、连续失败次数与熔断状态。
//! 选择规则：健康且 Closed 的节点按 `priority * 100 + avg_latency_ms` 取最小；
//! 没有时退回 HalfOpen 节点，再退回任意节点。

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use serde::Serialize;
use tokio::sync::RwLock;

use crate::{config::RpcConfig, domain::Chain};

const OPEN_THRESHOLD: u32 = 3;
const OPEN_TIMEOUT_SECS: u64 = 60;
const ALPHA: f64 = 0.3; // EMA alpha for latency averaging

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct NodeEndpoint {
    pub chain: Chain,
    pub url: String,
    /// 越小越优先
    pub priority: i64,
    pub healthy: bool,
    pub fail_count: u32,
    pub avg_latency_ms: i64,
    pub last_latency_ms: i64,
    pub circuit_state: CircuitState,
    pub opened_at: Option<Instant>,
}

impl NodeEndpoint {
    pub fn new(chain: Chain, url: impl Into<String>, priority: i64) -> Self {
        Self {
            chain,
            url: url.into(),
            priority,
            healthy: true,
            fail_count: 0,
            avg_latency_ms: 0,
            last_latency_ms: 0,
            circuit_state: CircuitState::Closed,
            opened_at: None,
        }
    }

    fn score(&self) -> i64 {
        self.priority * 100 + self.avg_latency_ms
    }
}

pub struct NodeSelector {
    endpoints: RwLock<HashMap<Chain, Vec<NodeEndpoint>>>,
    open_timeout: Duration,
}

impl Default for NodeSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeSelector {
    pub fn new() -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
            open_timeout: Duration::from_secs(OPEN_TIMEOUT_SECS),
        }
    }

    /// 按配置顺序登记节点，列表顺序即优先级
    pub fn from_config(config: &RpcConfig) -> Self {
        let mut map = HashMap::new();
        for chain in Chain::all() {
            let list: Vec<NodeEndpoint> = config
                .urls(chain)
                .iter()
                .enumerate()
                .map(|(i, url)| NodeEndpoint::new(chain, url.clone(), i as i64 + 1))
                .collect();
            map.insert(chain, list);
        }
        Self {
            endpoints: RwLock::new(map),
            open_timeout: Duration::from_secs(OPEN_TIMEOUT_SECS),
        }
    }

    /// 单节点选择器（测试与固定节点场景）
    pub fn single(chain: Chain, url: impl Into<String>) -> Self {
        let mut map = HashMap::new();
        map.insert(chain, vec![NodeEndpoint::new(chain, url, 1)]);
        Self {
            endpoints: RwLock::new(map),
            open_timeout: Duration::from_secs(OPEN_TIMEOUT_SECS),
        }
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub async fn register(&self, chain: Chain, url: impl Into<String>, priority: i64) {
        let url = url.into();
        let mut guard = self.endpoints.write().await;
        let list = guard.entry(chain).or_default();
        if !list.iter().any(|e| e.url == url) {
            list.push(NodeEndpoint::new(chain, url, priority));
        }
    }

    pub async fn endpoints(&self, chain: Chain) -> Vec<NodeEndpoint> {
        self.endpoints
            .read()
            .await
            .get(&chain)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn select(&self, chain: Chain) -> Option<NodeEndpoint> {
        crate::metrics::inc_node_selection();
        let mut guard = self.endpoints.write().await;
        let list = guard.get_mut(&chain)?;

        // Open 超时后进入 HalfOpen，允许一次试探
        for endpoint in list.iter_mut() {
            if endpoint.circuit_state == CircuitState::Open {
                if let Some(opened) = endpoint.opened_at {
                    if opened.elapsed() >= self.open_timeout {
                        endpoint.circuit_state = CircuitState::HalfOpen;
                        tracing::debug!(url = %endpoint.url, chain = %chain, "node circuit half-open");
                    }
                }
            }
        }

        score_pick(list)
    }

    /// 请求成功：清零失败计数并更新 EMA 延迟
    pub async fn record_success(&self, chain: Chain, url: &str, latency_ms: i64) {
        let mut guard = self.endpoints.write().await;
        if let Some(endpoint) = find_mut(&mut guard, chain, url) {
            endpoint.avg_latency_ms = if endpoint.avg_latency_ms == 0 {
                latency_ms
            } else {
                (ALPHA * latency_ms as f64 + (1.0 - ALPHA) * endpoint.avg_latency_ms as f64).round() as i64
            };
            endpoint.last_latency_ms = latency_ms;
            endpoint.fail_count = 0;
            endpoint.healthy = true;
            endpoint.circuit_state = CircuitState::Closed;
            endpoint.opened_at = None;
            tracing::debug!(chain = %chain, url = %url, latency_ms, "node_request_success");
        }
    }

    /// 请求失败：累加失败计数，达到阈值后熔断
    pub async fn record_failure(&self, chain: Chain, url: &str) {
        let mut guard = self.endpoints.write().await;
        if let Some(endpoint) = find_mut(&mut guard, chain, url) {
            endpoint.fail_count += 1;
            endpoint.healthy = false;
            let reopen = endpoint.circuit_state == CircuitState::HalfOpen;
            if endpoint.fail_count >= OPEN_THRESHOLD || reopen {
                if endpoint.circuit_state != CircuitState::Open {
                    crate::metrics::inc_node_circuit_open();
                }
                endpoint.circuit_state = CircuitState::Open;
                endpoint.opened_at = Some(Instant::now());
            }
            tracing::warn!(
                chain = %chain,
                url = %url,
                fail_count = endpoint.fail_count,
                circuit = ?endpoint.circuit_state,
                "node_request_fail"
            );
        }
    }
}

fn find_mut<'a>(
    map: &'a mut HashMap<Chain, Vec<NodeEndpoint>>,
    chain: Chain,
    url: &str,
) -> Option<&'a mut NodeEndpoint> {
    map.get_mut(&chain)?.iter_mut().find(|e| e.url == url)
}

fn score_pick(list: &[NodeEndpoint]) -> Option<NodeEndpoint> {
    let mut candidates: Vec<&NodeEndpoint> = list
        .iter()
        .filter(|e| e.healthy && e.circuit_state == CircuitState::Closed)
        .collect();
    let mut fallback = false;
    if candidates.is_empty() {
        candidates = list
            .iter()
            .filter(|e| e.circuit_state == CircuitState::HalfOpen)
            .collect();
        fallback = true;
    }
    if candidates.is_empty() {
        candidates = list.iter().collect();
        fallback = true;
    }
    if fallback && !candidates.is_empty() {
        crate::metrics::inc_node_fallback();
    }
    candidates.into_iter().min_by_key(|e| e.score()).cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(url: &str, priority: i64, latency: i64) -> NodeEndpoint {
        let mut e = NodeEndpoint::new(Chain::Ethereum, url, priority);
        e.avg_latency_ms = latency;
        e
    }

    /// Test 1: 基础优先级排序（健康端点）
    #[test]
    fn test_basic_priority_sorting() {
        let list = vec![
            endpoint("https://rpc3.example.com", 3, 100),
            endpoint("https://rpc1.example.com", 1, 100),
            endpoint("https://rpc2.example.com", 2, 100),
        ];
        let selected = score_pick(&list).unwrap();
        assert_eq!(selected.url, "https://rpc1.example.com");
    }

    /// Test 2: 延迟优先（相同优先级）
    #[test]
    fn test_latency_tiebreaker() {
        let list = vec![
            endpoint("https://slow.example.com", 1, 200),
            endpoint("https://fast.example.com", 1, 50),
        ];
        assert_eq!(score_pick(&list).unwrap().url, "https://fast.example.com");
    }

    /// Test 3: 跳过熔断端点，全部熔断时仍返回一个
    #[test]
    fn test_open_circuit_fallback() {
        let mut open = endpoint("https://open.example.com", 1, 10);
        open.circuit_state = CircuitState::Open;
        open.healthy = false;
        let healthy = endpoint("https://healthy.example.com", 2, 100);

        let selected = score_pick(&[open.clone(), healthy]).unwrap();
        assert_eq!(selected.url, "https://healthy.example.com");

        let only_open = score_pick(&[open]).unwrap();
        assert_eq!(only_open.url, "https://open.example.com");
        assert!(score_pick(&[]).is_none());
    }

    /// Test 4: 连续失败触发熔断，成功后恢复
    #[tokio::test]
    async fn test_failures_open_circuit_and_success_closes_it() {
        let selector = NodeSelector::single(Chain::Ton, "https://a.example.com");
        selector.register(Chain::Ton, "https://b.example.com", 2).await;

        for _ in 0..OPEN_THRESHOLD {
            selector.record_failure(Chain::Ton, "https://a.example.com").await;
        }
        let picked = selector.select(Chain::Ton).await.unwrap();
        assert_eq!(picked.url, "https://b.example.com");

        selector.record_success(Chain::Ton, "https://a.example.com", 40).await;
        let picked = selector.select(Chain::Ton).await.unwrap();
        assert_eq!(picked.url, "https://a.example.com");
        assert_eq!(picked.circuit_state, CircuitState::Closed);
    }

    /// Test 5: Open 超时后转为 HalfOpen
    #[tokio::test]
    async fn test_open_becomes_half_open_after_timeout() {
        let selector =
            NodeSelector::single(Chain::Aptos, "https://a.example.com").with_open_timeout(Duration::ZERO);
        for _ in 0..OPEN_THRESHOLD {
            selector.record_failure(Chain::Aptos, "https://a.example.com").await;
        }
        let picked = selector.select(Chain::Aptos).await.unwrap();
        assert_eq!(picked.circuit_state, CircuitState::HalfOpen);
    }

    /// Test 6: EMA 延迟
    #[tokio::test]
    async fn test_latency_ema() {
        let selector = NodeSelector::single(Chain::Sui, "https://a.example.com");
        selector.record_success(Chain::Sui, "https://a.example.com", 100).await;
        selector.record_success(Chain::Sui, "https://a.example.com", 200).await;
        let e = &selector.endpoints(Chain::Sui).await[0];
        assert_eq!(e.avg_latency_ms, 130);
        assert_eq!(e.last_latency_ms, 200);
    }

    #[tokio::test]
    async fn test_unknown_chain_selects_none() {
        let selector = NodeSelector::new();
        assert!(selector.select(Chain::Near).await.is_none());
    }
}
