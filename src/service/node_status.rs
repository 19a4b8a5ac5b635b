//! 节点健康探测
//!
//! 每条链的 HTTP 适配器实现 `LatestBlock`；`HttpNodeStatusClient` 针对任意 URL
//! 临时构建适配器并测量延迟。

use std::{sync::Arc, time::Instant};

use async_trait::async_trait;

use super::clients::{NodeStatus, NodeStatusClient};
use crate::{
    domain::Chain,
    error::ChainResult,
    infrastructure::RpcClient,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    pub chain_id: String,
    pub number: u64,
    pub in_sync: bool,
}

#[async_trait]
pub trait LatestBlock: Send + Sync {
    async fn latest_block(&self) -> ChainResult<BlockInfo>;
}

/// 由 `RpcClient` 构建链适配器
pub type ProbeFactory = fn(RpcClient) -> Arc<dyn LatestBlock>;

pub struct HttpNodeStatusClient {
    chains: Vec<Chain>,
    http: reqwest::Client,
    factory: ProbeFactory,
}

impl HttpNodeStatusClient {
    pub fn new(chains: Vec<Chain>, http: reqwest::Client, factory: ProbeFactory) -> Self {
        Self {
            chains,
            http,
            factory,
        }
    }
}

#[async_trait]
impl NodeStatusClient for HttpNodeStatusClient {
    fn supported(&self, chain: Chain) -> bool {
        self.chains.contains(&chain)
    }

    async fn get_node_status(&self, chain: Chain, url: &str) -> ChainResult<NodeStatus> {
        let probe = (self.factory)(RpcClient::for_endpoint(chain, self.http.clone(), url));
        let started = Instant::now();
        let block = probe.latest_block().await?;
        let latency_ms = started.elapsed().as_millis() as u64;

        tracing::debug!(
            chain = %chain,
            endpoint = %url,
            block = block.number,
            latency_ms,
            "node status probed"
        );

        Ok(NodeStatus {
            chain_id: block.chain_id,
            latest_block: block.number,
            in_sync: block.in_sync,
            latency_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedBlock;

    #[async_trait]
    impl LatestBlock for FixedBlock {
        async fn latest_block(&self) -> ChainResult<BlockInfo> {
            Ok(BlockInfo {
                chain_id: "1".into(),
                number: 42,
                in_sync: true,
            })
        }
    }

    #[tokio::test]
    async fn test_probe_uses_factory() {
        let client = HttpNodeStatusClient::new(
            vec![Chain::Ethereum],
            reqwest::Client::new(),
            |_| Arc::new(FixedBlock),
        );
        assert!(client.supported(Chain::Ethereum));
        assert!(!client.supported(Chain::Base));
        let status = client
            .get_node_status(Chain::Ethereum, "http://127.0.0.1:1")
            .await
            .unwrap();
        assert_eq!(status.latest_block, 42);
        assert_eq!(status.chain_id, "1");
    }
}
