//! 测试辅助模块
//! 提供进程内模拟节点、测试配置与占位链客户端

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use chainbridge::{
    config::{Config, LoggingConfig, PipelineConfig, RpcConfig},
    domain::{
        Account, Chain, ChainSignData, ChainType, EvmChainData, Fee, FeePriority, AssetId,
        NativeTransfer, SignerParams, TransactionChanges, TransactionStateRequest,
        TransactionType, TransferParams,
    },
    error::{ChainError, ChainResult},
    service::{
        chains::CHAIN_TYPES, BroadcastClient, NodeStatus, NodeStatusClient, SignClient,
        SignerPreloader, TransactionStatusClient,
    },
};

/// 在 127.0.0.1 随机端口上启动模拟节点，返回其 base URL
pub async fn spawn_mock_node(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock node");
    let addr = listener.local_addr().expect("mock node address");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock node stopped");
    });
    format!("http://{}", addr)
}

/// 默认配置，指定链的节点替换为模拟节点。广播间隔为 0，读请求只尝试一次
pub fn test_config(overrides: &[(Chain, &str)]) -> Config {
    chainbridge::infrastructure::logging::init_default_logging();
    let mut rpc = RpcConfig::default();
    rpc.max_retries = 1;
    rpc.retry_delay_ms = 0;
    for (chain, url) in overrides {
        rpc.endpoints
            .insert(chain.as_str().to_string(), vec![url.to_string()]);
    }
    let mut pipeline = PipelineConfig::default();
    pipeline.broadcast_delay_ms = 0;
    Config {
        logging: LoggingConfig::default(),
        rpc,
        pipeline,
    }
}

/// 占位链客户端：只用于填满注册表，任何调用都返回 UnsupportedOperation
pub struct StubClient {
    pub chain_type: ChainType,
}

impl StubClient {
    pub fn all_except(skip: ChainType) -> Vec<Arc<StubClient>> {
        CHAIN_TYPES
            .iter()
            .filter(|t| **t != skip)
            .map(|t| Arc::new(StubClient { chain_type: *t }))
            .collect()
    }
}

#[async_trait]
impl SignerPreloader for StubClient {
    fn supported(&self, chain: Chain) -> bool {
        chain.chain_type() == self.chain_type
    }

    async fn preload_native_transfer(&self, _params: &NativeTransfer) -> ChainResult<SignerParams> {
        Err(ChainError::unsupported("native transfer"))
    }
}

impl SignClient for StubClient {
    fn supported(&self, chain: Chain) -> bool {
        chain.chain_type() == self.chain_type
    }

    fn sign_native_transfer(
        &self,
        _params: &NativeTransfer,
        _chain_data: &ChainSignData,
        _final_amount: u128,
        _fee: &Fee,
        _private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        Err(ChainError::unsupported("native transfer"))
    }
}

#[async_trait]
impl BroadcastClient for StubClient {
    fn supported(&self, chain: Chain) -> bool {
        chain.chain_type() == self.chain_type
    }

    async fn send(&self, _account: &Account, _signed: &[u8], _tx_type: TransactionType) -> ChainResult<String> {
        Err(ChainError::unsupported("broadcast"))
    }
}

#[async_trait]
impl TransactionStatusClient for StubClient {
    fn supported(&self, chain: Chain) -> bool {
        chain.chain_type() == self.chain_type
    }

    async fn get_status(&self, _request: &TransactionStateRequest) -> ChainResult<TransactionChanges> {
        Err(ChainError::unsupported("transaction status"))
    }
}

#[async_trait]
impl NodeStatusClient for StubClient {
    fn supported(&self, chain: Chain) -> bool {
        chain.chain_type() == self.chain_type
    }

    async fn get_node_status(&self, _chain: Chain, _url: &str) -> ChainResult<NodeStatus> {
        Err(ChainError::unsupported("node status"))
    }
}

/// EVM 家族的可编程客户端：固定 nonce 预加载，签名输出可读文本，广播按顺序记录
pub struct ScriptedEvmClient {
    pub nonce: u64,
    /// 包含该字节串的载荷会被拒绝
    pub reject_marker: Option<&'static str>,
    pub sent: Mutex<Vec<(String, std::time::Instant)>>,
}

impl ScriptedEvmClient {
    pub fn new(nonce: u64) -> Self {
        Self {
            nonce,
            reject_marker: None,
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn sent_payloads(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(p, _)| p.clone()).collect()
    }
}

#[async_trait]
impl SignerPreloader for ScriptedEvmClient {
    fn supported(&self, chain: Chain) -> bool {
        chain.chain_type() == ChainType::Ethereum
    }

    async fn preload_native_transfer(&self, params: &NativeTransfer) -> ChainResult<SignerParams> {
        let chain = params.from.chain;
        Ok(SignerParams::new(
            TransferParams::Native(params.clone()),
            ChainSignData::Evm(EvmChainData {
                chain_id: chain.evm_chain_id().unwrap_or_default(),
                nonce: self.nonce,
                fees: FeePriority::ALL
                    .into_iter()
                    .map(|p| Fee::new(AssetId::native(chain), p, 21_000))
                    .collect(),
            }),
        ))
    }
}

impl SignClient for ScriptedEvmClient {
    fn supported(&self, chain: Chain) -> bool {
        chain.chain_type() == ChainType::Ethereum
    }

    /// 两个载荷：模拟"先授权后执行"的多交易签名
    fn sign_native_transfer(
        &self,
        params: &NativeTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        _fee: &Fee,
        _private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let nonce = chain_data.sequence().unwrap_or_default();
        Ok(vec![
            format!("first:{}:{}", nonce, params.destination).into_bytes(),
            format!("second:{}:{}", nonce + 1, final_amount).into_bytes(),
        ])
    }
}

#[async_trait]
impl BroadcastClient for ScriptedEvmClient {
    fn supported(&self, chain: Chain) -> bool {
        chain.chain_type() == ChainType::Ethereum
    }

    async fn send(&self, _account: &Account, signed: &[u8], _tx_type: TransactionType) -> ChainResult<String> {
        let payload = String::from_utf8_lossy(signed).to_string();
        if let Some(marker) = self.reject_marker {
            if payload.contains(marker) {
                return Err(ChainError::rejected(Chain::Ethereum, "nonce too low"));
            }
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push((payload, std::time::Instant::now()));
        Ok(format!("0xhash{}", sent.len()))
    }
}

#[async_trait]
impl TransactionStatusClient for ScriptedEvmClient {
    fn supported(&self, chain: Chain) -> bool {
        chain.chain_type() == ChainType::Ethereum
    }

    async fn get_status(&self, _request: &TransactionStateRequest) -> ChainResult<TransactionChanges> {
        Ok(TransactionChanges::pending())
    }
}
