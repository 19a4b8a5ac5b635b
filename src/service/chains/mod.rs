//! 各链（链家族）客户端实现
//!
//! 每个模块提供 `XxxRpc` 契约与其 HTTP 适配器、实现预加载/广播/状态查询的
//! `XxxClient`，以及纯签名的 `XxxSignClient`。

use std::sync::Arc;

use crate::{domain::ChainType, infrastructure::RpcClient};

use super::node_status::{LatestBlock, ProbeFactory};

pub mod aptos;
pub mod bitcoin;
pub mod cosmos;
pub mod evm;
pub mod near;
pub mod solana;
pub mod sui;
pub mod ton;
pub mod tron;
pub mod xrp;

/// 链家族对应的节点探测适配器
pub fn probe_factory(chain_type: ChainType) -> ProbeFactory {
    match chain_type {
        ChainType::Bitcoin => |c| Arc::new(bitcoin::HttpBitcoinRpc::new(c)) as Arc<dyn LatestBlock>,
        ChainType::Ethereum => |c| Arc::new(evm::HttpEvmRpc::new(c)) as Arc<dyn LatestBlock>,
        ChainType::Cosmos => |c| Arc::new(cosmos::HttpCosmosRpc::new(c)) as Arc<dyn LatestBlock>,
        ChainType::Solana => |c| Arc::new(solana::HttpSolanaRpc::new(c)) as Arc<dyn LatestBlock>,
        ChainType::Ton => |c| Arc::new(ton::HttpTonRpc::new(c)) as Arc<dyn LatestBlock>,
        ChainType::Tron => |c| Arc::new(tron::HttpTronRpc::new(c)) as Arc<dyn LatestBlock>,
        ChainType::Aptos => |c| Arc::new(aptos::HttpAptosRpc::new(c)) as Arc<dyn LatestBlock>,
        ChainType::Sui => |c| Arc::new(sui::HttpSuiRpc::new(c)) as Arc<dyn LatestBlock>,
        ChainType::Xrp => |c| Arc::new(xrp::HttpXrpRpc::new(c)) as Arc<dyn LatestBlock>,
        ChainType::Near => |c| Arc::new(near::HttpNearRpc::new(c)) as Arc<dyn LatestBlock>,
    }
}

/// 所有链家族，顺序固定
pub const CHAIN_TYPES: [ChainType; 10] = [
    ChainType::Bitcoin,
    ChainType::Ethereum,
    ChainType::Cosmos,
    ChainType::Solana,
    ChainType::Ton,
    ChainType::Tron,
    ChainType::Aptos,
    ChainType::Sui,
    ChainType::Xrp,
    ChainType::Near,
];

/// 便于按 `RpcClient` 直接构建探测器
pub fn probe_for(client: RpcClient) -> Arc<dyn LatestBlock> {
    probe_factory(client.chain().chain_type())(client)
}
