//! Sui：coin 对象 + 参考 gas 价格
//!
//! 节点取不到参考价格时按 750 MIST 计算，gas 预算固定 25_000_000 MIST。
//! 广播载荷约定为 `"<base64 交易字节>_<base64 签名>"`（外部编码服务输出）。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::{
    codec::{CryptoCodec, SigningInput, SuiTransaction},
    domain::{
        mask_address, Account, AssetId, Chain, ChainSignData, Fee, FeePriority, NativeTransfer,
        SignerParams, SuiChainData, SuiCoin, SwapTransfer, TokenTransfer, TransactionChanges,
        TransactionState, TransactionStateRequest, TransactionType, TransferParams,
    },
    error::{ChainError, ChainResult},
    infrastructure::RpcClient,
    service::{
        clients::{BroadcastClient, SignClient, SignerPreloader, TransactionStatusClient},
        node_status::{BlockInfo, LatestBlock},
    },
};

pub const SUI_COIN_TYPE: &str = "0x2::sui::SUI";
pub const DEFAULT_GAS_PRICE: u64 = 750;
pub const GAS_BUDGET: u64 = 25_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiGasUsed {
    pub computation_cost: String,
    pub storage_cost: String,
    pub storage_rebate: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SuiExecutionStatus {
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuiEffects {
    pub status: SuiExecutionStatus,
    #[serde(default)]
    pub gas_used: Option<SuiGasUsed>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SuiTransactionBlock {
    pub digest: String,
    #[serde(default)]
    pub effects: Option<SuiEffects>,
}

#[async_trait]
pub trait SuiRpc: Send + Sync {
    async fn coins(&self, owner: &str, coin_type: &str) -> ChainResult<Vec<SuiCoin>>;

    async fn reference_gas_price(&self) -> ChainResult<u64>;

    async fn execute(&self, tx_bytes: &str, signature: &str) -> ChainResult<SuiTransactionBlock>;

    /// 节点尚未索引该交易时返回 None
    async fn transaction(&self, digest: &str) -> ChainResult<Option<SuiTransactionBlock>>;

    async fn chain_identifier(&self) -> ChainResult<String>;

    async fn latest_checkpoint(&self) -> ChainResult<u64>;
}

// ---------------------------------------------------------------- HTTP 适配器

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcCoin {
    coin_type: String,
    coin_object_id: String,
    version: String,
    digest: String,
    balance: String,
}

#[derive(Deserialize)]
struct CoinPage {
    data: Vec<RpcCoin>,
}

fn parse_number<T: std::str::FromStr>(value: &str, field: &str) -> ChainResult<T> {
    value
        .parse()
        .map_err(|_| ChainError::rpc(format!("invalid {} {}", field, value)))
}

impl RpcCoin {
    fn into_coin(self) -> ChainResult<SuiCoin> {
        Ok(SuiCoin {
            version: parse_number(&self.version, "coin version")?,
            balance: parse_number(&self.balance, "coin balance")?,
            coin_type: self.coin_type,
            object_id: self.coin_object_id,
            digest: self.digest,
        })
    }
}

pub struct HttpSuiRpc {
    client: RpcClient,
}

impl HttpSuiRpc {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SuiRpc for HttpSuiRpc {
    async fn coins(&self, owner: &str, coin_type: &str) -> ChainResult<Vec<SuiCoin>> {
        let page: CoinPage = self
            .client
            .json_rpc("suix_getCoins", json!([owner, coin_type]))
            .await?;
        page.data.into_iter().map(RpcCoin::into_coin).collect()
    }

    async fn reference_gas_price(&self) -> ChainResult<u64> {
        let price: String = self
            .client
            .json_rpc("suix_getReferenceGasPrice", json!([]))
            .await?;
        parse_number(&price, "gas price")
    }

    async fn execute(&self, tx_bytes: &str, signature: &str) -> ChainResult<SuiTransactionBlock> {
        let params = json!([
            tx_bytes,
            [signature],
            { "showEffects": true },
            "WaitForLocalExecution",
        ]);
        self.client
            .json_rpc_call("sui_executeTransactionBlock", params, false)
            .await?
            .map_err(|e| ChainError::rejected(Chain::Sui, e.message))
    }

    async fn transaction(&self, digest: &str) -> ChainResult<Option<SuiTransactionBlock>> {
        let result = self
            .client
            .json_rpc_call("sui_getTransactionBlock", json!([digest, { "showEffects": true }]), true)
            .await?;
        // 未知 digest 以 JSON-RPC 错误返回
        Ok(result.ok())
    }

    async fn chain_identifier(&self) -> ChainResult<String> {
        self.client.json_rpc("sui_getChainIdentifier", json!([])).await
    }

    async fn latest_checkpoint(&self) -> ChainResult<u64> {
        let sequence: String = self
            .client
            .json_rpc("sui_getLatestCheckpointSequenceNumber", json!([]))
            .await?;
        parse_number(&sequence, "checkpoint")
    }
}

#[async_trait]
impl LatestBlock for HttpSuiRpc {
    async fn latest_block(&self) -> ChainResult<BlockInfo> {
        let (chain_id, number) = tokio::try_join!(self.chain_identifier(), self.latest_checkpoint())?;
        Ok(BlockInfo {
            chain_id,
            number,
            in_sync: true,
        })
    }
}

// ---------------------------------------------------------------- 预加载 / 广播 / 状态

pub fn gas_fee(gas_price: u64) -> Fee {
    Fee::gas(
        AssetId::native(Chain::Sui),
        FeePriority::Normal,
        u128::from(GAS_BUDGET),
        u128::from(gas_price),
        u128::from(gas_price),
    )
    .with_amount(u128::from(GAS_BUDGET))
}

pub struct SuiClient {
    rpc: Arc<dyn SuiRpc>,
}

impl SuiClient {
    pub fn new(rpc: Arc<dyn SuiRpc>) -> Self {
        Self { rpc }
    }

    async fn gas_price(&self) -> u64 {
        match self.rpc.reference_gas_price().await {
            Ok(price) => price,
            Err(e) => {
                tracing::warn!(error = %e, "Sui reference gas price unavailable, using default");
                DEFAULT_GAS_PRICE
            }
        }
    }

    fn build(input: TransferParams, coins: Vec<SuiCoin>, gas_coin: Option<SuiCoin>, gas_price: u64) -> SignerParams {
        tracing::info!(
            chain = %Chain::Sui,
            sender = %mask_address(&input.from().address),
            coins = coins.len(),
            gas_price,
            "Sui preload complete"
        );
        SignerParams::new(
            input,
            ChainSignData::Sui(SuiChainData {
                coins,
                gas_coin,
                fee: gas_fee(gas_price),
            }),
        )
    }
}

fn non_empty(coins: Vec<SuiCoin>, owner: &str, coin_type: &str) -> ChainResult<Vec<SuiCoin>> {
    if coins.is_empty() {
        return Err(ChainError::insufficient(format!(
            "{} holds no {} coins",
            mask_address(owner),
            coin_type
        )));
    }
    Ok(coins)
}

#[async_trait]
impl SignerPreloader for SuiClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Sui
    }

    async fn preload_native_transfer(&self, params: &NativeTransfer) -> ChainResult<SignerParams> {
        let owner = params.from.address.as_str();
        let (coins, gas_price) = tokio::join!(self.rpc.coins(owner, SUI_COIN_TYPE), self.gas_price());
        let coins = non_empty(coins?, owner, SUI_COIN_TYPE)?;
        Ok(Self::build(TransferParams::Native(params.clone()), coins, None, gas_price))
    }

    async fn preload_token_transfer(&self, params: &TokenTransfer) -> ChainResult<SignerParams> {
        let owner = params.from.address.as_str();
        let coin_type = params
            .asset_id
            .token_id
            .as_deref()
            .ok_or_else(|| ChainError::precondition("token transfer without coin type"))?;
        let (coins, gas_coins, gas_price) = tokio::join!(
            self.rpc.coins(owner, coin_type),
            self.rpc.coins(owner, SUI_COIN_TYPE),
            self.gas_price(),
        );
        let coins = non_empty(coins?, owner, coin_type)?;
        let gas_coin = non_empty(gas_coins?, owner, SUI_COIN_TYPE)?.into_iter().next();
        Ok(Self::build(TransferParams::Token(params.clone()), coins, gas_coin, gas_price))
    }

    async fn preload_swap(&self, params: &SwapTransfer) -> ChainResult<SignerParams> {
        let gas_price = self.gas_price().await;
        Ok(Self::build(TransferParams::Swap(params.clone()), vec![], None, gas_price))
    }
}

#[async_trait]
impl BroadcastClient for SuiClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Sui
    }

    async fn send(&self, account: &Account, signed: &[u8], tx_type: TransactionType) -> ChainResult<String> {
        let payload = std::str::from_utf8(signed)
            .map_err(|_| ChainError::precondition("sui payload is not utf-8"))?;
        let (tx_bytes, signature) = payload
            .split_once('_')
            .ok_or_else(|| ChainError::precondition("sui payload must be <tx_bytes>_<signature>"))?;
        let block = self.rpc.execute(tx_bytes, signature).await?;
        if let Some(SuiEffects { status, .. }) = &block.effects {
            if status.status != "success" {
                return Err(ChainError::rejected(
                    Chain::Sui,
                    status.error.clone().unwrap_or_else(|| status.status.clone()),
                ));
            }
        }
        tracing::info!(
            chain = %Chain::Sui,
            sender = %mask_address(&account.address),
            tx_type = ?tx_type,
            hash = %block.digest,
            "Sui transaction broadcast"
        );
        Ok(block.digest)
    }
}

/// fee = computation + storage - rebate
pub fn map_transaction(block: Option<&SuiTransactionBlock>) -> ChainResult<TransactionChanges> {
    let Some(effects) = block.and_then(|b| b.effects.as_ref()) else {
        return Ok(TransactionChanges::pending());
    };
    let state = if effects.status.status == "success" {
        TransactionState::Confirmed
    } else {
        TransactionState::Reverted
    };
    let mut changes = TransactionChanges::new(state);
    if let Some(gas) = &effects.gas_used {
        let computation: i128 = parse_number(&gas.computation_cost, "computation cost")?;
        let storage: i128 = parse_number(&gas.storage_cost, "storage cost")?;
        let rebate: i128 = parse_number(&gas.storage_rebate, "storage rebate")?;
        changes = changes.with_fee(u128::try_from(computation + storage - rebate).unwrap_or(0));
    }
    Ok(changes)
}

#[async_trait]
impl TransactionStatusClient for SuiClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Sui
    }

    async fn get_status(&self, request: &TransactionStateRequest) -> ChainResult<TransactionChanges> {
        let block = self.rpc.transaction(&request.hash).await?;
        map_transaction(block.as_ref())
    }
}

// ---------------------------------------------------------------- 签名

pub struct SuiSignClient {
    codec: Arc<dyn CryptoCodec>,
}

impl SuiSignClient {
    pub fn new(codec: Arc<dyn CryptoCodec>) -> Self {
        Self { codec }
    }

    fn sign(&self, tx: SuiTransaction, private_key: &[u8]) -> ChainResult<Vec<Vec<u8>>> {
        Ok(vec![self.codec.encode(&SigningInput::Sui(tx), private_key)?])
    }
}

fn gas_price(fee: &Fee) -> ChainResult<u64> {
    let price = fee.gas.as_ref().map(|g| g.max_gas_price).unwrap_or(u128::from(DEFAULT_GAS_PRICE));
    u64::try_from(price).map_err(|_| ChainError::precondition("gas price exceeds u64"))
}

fn gas_budget(fee: &Fee) -> ChainResult<u64> {
    u64::try_from(fee.amount).map_err(|_| ChainError::precondition("gas budget exceeds u64"))
}

impl SignClient for SuiSignClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Sui
    }

    fn sign_native_transfer(
        &self,
        params: &NativeTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let data = crate::expect_chain_data!(chain_data, Sui);
        if data.coins.is_empty() {
            return Err(ChainError::precondition("no coins to transfer"));
        }
        let tx = SuiTransaction {
            sender: params.from.address.clone(),
            recipient: params.destination.clone(),
            amount: final_amount,
            coin_type: SUI_COIN_TYPE.into(),
            coins: data.coins.clone(),
            gas_coin: None,
            gas_budget: gas_budget(fee)?,
            gas_price: gas_price(fee)?,
            pay_all: params.is_max_amount,
            transaction_bytes: None,
        };
        self.sign(tx, private_key)
    }

    fn sign_token_transfer(
        &self,
        params: &TokenTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let data = crate::expect_chain_data!(chain_data, Sui);
        let coin_type = params
            .asset_id
            .token_id
            .clone()
            .ok_or_else(|| ChainError::precondition("token transfer without coin type"))?;
        let gas_coin = data
            .gas_coin
            .clone()
            .ok_or_else(|| ChainError::precondition("token transfer without gas coin"))?;
        let tx = SuiTransaction {
            sender: params.from.address.clone(),
            recipient: params.destination.clone(),
            amount: final_amount,
            coin_type,
            coins: data.coins.clone(),
            gas_coin: Some(gas_coin),
            gas_budget: gas_budget(fee)?,
            gas_price: gas_price(fee)?,
            pay_all: false,
            transaction_bytes: None,
        };
        self.sign(tx, private_key)
    }

    /// swap_payload 为兑换服务构造好的 base64 交易字节
    fn sign_swap(
        &self,
        params: &SwapTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        crate::expect_chain_data!(chain_data, Sui);
        if params.swap_payload.trim().is_empty() {
            return Err(ChainError::precondition("empty swap payload"));
        }
        let tx = SuiTransaction {
            sender: params.from.address.clone(),
            recipient: params.to.clone(),
            amount: final_amount,
            coin_type: params
                .from_asset
                .token_id
                .clone()
                .unwrap_or_else(|| SUI_COIN_TYPE.into()),
            coins: vec![],
            gas_coin: None,
            gas_budget: gas_budget(fee)?,
            gas_price: gas_price(fee)?,
            pay_all: false,
            transaction_bytes: Some(params.swap_payload.clone()),
        };
        self.sign(tx, private_key)
    }

    fn sign_message(&self, chain: Chain, message: &[u8], private_key: &[u8]) -> ChainResult<Vec<u8>> {
        self.codec.sign_message(chain, message, private_key)
    }
}
