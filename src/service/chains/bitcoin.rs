//! UTXO 链家族（Bitcoin / Litecoin / Doge），Blockbook 接口
//!
//! 预加载取 UTXO 列表与每档确认目标的费率；手续费 = 计划体积 × 费率。
//! 签名时按同样的规则重新规划输入（大额优先），找零低于粉尘阈值时并入手续费。

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;

use crate::{
    codec::{
        utxo::{estimate_vsize, DUST_THRESHOLD},
        BitcoinOutput, BitcoinTransaction, CryptoCodec, SigningInput,
    },
    domain::{
        mask_address, Account, AssetId, BitcoinChainData, BitcoinUtxo, Chain, ChainSignData,
        ChainType, Fee, FeePriority, NativeTransfer, SignerParams, TransactionChanges,
        TransactionState, TransactionStateRequest, TransactionType, TransferParams,
    },
    error::{ChainError, ChainResult},
    infrastructure::{rpc_client::status_error, RpcClient},
    service::{
        clients::{BroadcastClient, SignClient, SignerPreloader, TransactionStatusClient},
        node_status::{BlockInfo, LatestBlock},
    },
};

/// 最低费率（sat/vB）
pub fn minimum_byte_fee(chain: Chain) -> u64 {
    match chain {
        Chain::Litecoin => 5,
        Chain::Doge => 1_000,
        _ => 1,
    }
}

/// 各档位的确认目标区块数
pub fn confirmation_target(chain: Chain, priority: FeePriority) -> u32 {
    match (chain, priority) {
        (Chain::Doge, FeePriority::Fast) => 2,
        (Chain::Doge, FeePriority::Normal) => 4,
        (Chain::Doge, FeePriority::Slow) => 8,
        (_, FeePriority::Fast) => 1,
        (_, FeePriority::Normal) => 3,
        (_, FeePriority::Slow) => 6,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BlockbookUtxo {
    pub txid: String,
    pub vout: u32,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockbookTransaction {
    pub txid: String,
    #[serde(default)]
    pub block_height: i64,
    #[serde(default)]
    pub confirmations: u64,
    #[serde(default)]
    pub fees: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockbookStatus {
    pub in_sync: bool,
    pub best_height: u64,
}

#[async_trait]
pub trait BitcoinRpc: Send + Sync {
    async fn utxos(&self, address: &str) -> ChainResult<Vec<BlockbookUtxo>>;

    /// 返回 `estimatesmartfee` 结果（每 kB 的币数，十进制字符串）
    async fn estimate_fee(&self, blocks: u32) -> ChainResult<String>;

    async fn send_transaction(&self, raw_hex: &str) -> ChainResult<String>;

    async fn transaction(&self, txid: &str) -> ChainResult<Option<BlockbookTransaction>>;

    async fn status(&self) -> ChainResult<BlockbookStatus>;
}

// ---------------------------------------------------------------- HTTP 适配器

#[derive(Deserialize)]
struct EstimateFeeResponse {
    result: String,
}

#[derive(Deserialize)]
struct SendResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    blockbook: BlockbookStatus,
}

pub struct HttpBitcoinRpc {
    client: RpcClient,
}

impl HttpBitcoinRpc {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BitcoinRpc for HttpBitcoinRpc {
    async fn utxos(&self, address: &str) -> ChainResult<Vec<BlockbookUtxo>> {
        self.client
            .get_json(&format!("/api/v2/utxo/{}?confirmed=true", address))
            .await
    }

    async fn estimate_fee(&self, blocks: u32) -> ChainResult<String> {
        let response: EstimateFeeResponse = self
            .client
            .get_json(&format!("/api/v2/estimatefee/{}", blocks))
            .await?;
        Ok(response.result)
    }

    async fn send_transaction(&self, raw_hex: &str) -> ChainResult<String> {
        let chain = self.client.chain();
        let response = self
            .client
            .post_bytes("/api/v2/sendtx/", "text/plain", raw_hex.as_bytes())
            .await?;
        if response.status >= 500 || response.status == 429 {
            return Err(status_error(response.status, &response.body));
        }
        let body: SendResponse = response.json()?;
        match (body.result, body.error) {
            (_, Some(error)) => Err(ChainError::rejected(chain, error)),
            (Some(hash), None) => Ok(hash),
            (None, None) => Err(ChainError::rpc("sendtx returned no result")),
        }
    }

    async fn transaction(&self, txid: &str) -> ChainResult<Option<BlockbookTransaction>> {
        let response = self.client.get_raw(&format!("/api/v2/tx/{}", txid)).await?;
        // 未知交易返回 400 / 404
        if response.is_not_found() || response.status == 400 {
            return Ok(None);
        }
        Ok(Some(response.error_for_status()?.json()?))
    }

    async fn status(&self) -> ChainResult<BlockbookStatus> {
        let response: StatusResponse = self.client.get_json("/api/").await?;
        Ok(response.blockbook)
    }
}

#[async_trait]
impl LatestBlock for HttpBitcoinRpc {
    async fn latest_block(&self) -> ChainResult<BlockInfo> {
        let status = self.status().await?;
        Ok(BlockInfo {
            chain_id: self.client.chain().network_id().to_string(),
            number: status.best_height,
            in_sync: status.in_sync,
        })
    }
}

// ---------------------------------------------------------------- 费率与输入规划

/// 十进制币数字符串转最小单位
pub fn parse_coin_amount(value: &str, decimals: u32) -> Option<u128> {
    let value = value.trim();
    if value.starts_with('-') {
        return None;
    }
    let (whole, fraction) = value.split_once('.').unwrap_or((value, ""));
    if fraction.len() > decimals as usize {
        return None;
    }
    let whole: u128 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
    let padded = format!("{:0<width$}", fraction, width = decimals as usize);
    let fraction: u128 = if padded.is_empty() { 0 } else { padded.parse().ok()? };
    whole.checked_mul(10u128.pow(decimals))?.checked_add(fraction)
}

/// 每 kB 费用转 sat/vB（向上取整），不低于链最低费率
pub fn byte_fee_from_estimate(chain: Chain, per_kb: &str) -> u64 {
    let minimum = minimum_byte_fee(chain);
    parse_coin_amount(per_kb, chain.decimals())
        .map(|per_kb| per_kb.div_ceil(1_000))
        .and_then(|fee| u64::try_from(fee).ok())
        .map(|fee| fee.max(minimum))
        .unwrap_or(minimum)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtxoPlan {
    pub inputs: Vec<BitcoinUtxo>,
    pub amount: u64,
    pub change: u64,
    pub vsize: u64,
    pub fee: u64,
}

/// 大额优先选取输入；`use_max` 时花费全部 UTXO、只有一个输出
pub fn plan_inputs(
    chain: Chain,
    utxos: &[BitcoinUtxo],
    amount: u64,
    byte_fee: u64,
    use_max: bool,
) -> ChainResult<UtxoPlan> {
    if utxos.is_empty() {
        return Err(ChainError::insufficient("no spendable UTXOs"));
    }

    if use_max {
        let total: u64 = utxos.iter().map(|u| u.value).sum();
        let vsize = estimate_vsize(chain, utxos.len(), 1);
        let fee = vsize.saturating_mul(byte_fee);
        let amount = total.saturating_sub(fee);
        if amount < DUST_THRESHOLD {
            return Err(ChainError::precondition("amount after fee is below dust threshold"));
        }
        return Ok(UtxoPlan {
            inputs: utxos.to_vec(),
            amount,
            change: 0,
            vsize,
            fee,
        });
    }

    if amount < DUST_THRESHOLD {
        return Err(ChainError::precondition("amount is below dust threshold"));
    }

    let mut sorted = utxos.to_vec();
    sorted.sort_by(|a, b| b.value.cmp(&a.value));

    let mut selected = Vec::new();
    let mut accumulated = 0u64;
    for utxo in sorted {
        accumulated = accumulated.saturating_add(utxo.value);
        selected.push(utxo);

        let vsize = estimate_vsize(chain, selected.len(), 2);
        let fee = vsize.saturating_mul(byte_fee);
        let Some(change) = accumulated.checked_sub(amount.saturating_add(fee)) else {
            continue;
        };
        if change >= DUST_THRESHOLD {
            return Ok(UtxoPlan {
                inputs: selected,
                amount,
                change,
                vsize,
                fee,
            });
        }
        let vsize = estimate_vsize(chain, selected.len(), 1);
        return Ok(UtxoPlan {
            inputs: selected,
            amount,
            change: 0,
            vsize,
            fee: accumulated - amount,
        });
    }
    Err(ChainError::insufficient("not enough UTXOs to cover amount and fee"))
}

fn to_u64(value: u128) -> ChainResult<u64> {
    u64::try_from(value).map_err(|_| ChainError::precondition("amount exceeds u64"))
}

// ---------------------------------------------------------------- 预加载 / 广播 / 状态

pub struct BitcoinClient {
    rpcs: HashMap<Chain, Arc<dyn BitcoinRpc>>,
}

impl BitcoinClient {
    pub fn new(rpcs: impl IntoIterator<Item = (Chain, Arc<dyn BitcoinRpc>)>) -> Self {
        Self {
            rpcs: rpcs
                .into_iter()
                .filter(|(chain, _)| chain.chain_type() == ChainType::Bitcoin)
                .collect(),
        }
    }

    fn rpc(&self, chain: Chain) -> ChainResult<&Arc<dyn BitcoinRpc>> {
        self.rpcs.get(&chain).ok_or(ChainError::UnsupportedChain(chain))
    }

    async fn byte_fee(rpc: &dyn BitcoinRpc, chain: Chain, priority: FeePriority) -> u64 {
        match rpc.estimate_fee(confirmation_target(chain, priority)).await {
            Ok(per_kb) => byte_fee_from_estimate(chain, &per_kb),
            Err(e) => {
                tracing::warn!(chain = %chain, priority = ?priority, error = %e, "fee estimate failed, using minimum byte fee");
                minimum_byte_fee(chain)
            }
        }
    }
}

#[async_trait]
impl SignerPreloader for BitcoinClient {
    fn supported(&self, chain: Chain) -> bool {
        self.rpcs.contains_key(&chain)
    }

    async fn preload_native_transfer(&self, params: &NativeTransfer) -> ChainResult<SignerParams> {
        let chain = params.from.chain;
        let rpc = self.rpc(chain)?.as_ref();
        let (utxos, slow, normal, fast) = tokio::join!(
            rpc.utxos(&params.from.address),
            Self::byte_fee(rpc, chain, FeePriority::Slow),
            Self::byte_fee(rpc, chain, FeePriority::Normal),
            Self::byte_fee(rpc, chain, FeePriority::Fast),
        );
        let utxos = utxos?
            .into_iter()
            .map(|u| {
                let value = u
                    .value
                    .parse()
                    .map_err(|_| ChainError::rpc(format!("invalid UTXO value {}", u.value)))?;
                Ok(BitcoinUtxo {
                    txid: u.txid,
                    vout: u.vout,
                    value,
                })
            })
            .collect::<ChainResult<Vec<_>>>()?;

        let amount = to_u64(params.amount)?;
        let mut fees = Vec::with_capacity(3);
        for (priority, byte_fee) in [(FeePriority::Slow, slow), (FeePriority::Normal, normal), (FeePriority::Fast, fast)] {
            let plan = plan_inputs(chain, &utxos, amount, byte_fee, params.is_max_amount)?;
            fees.push(
                Fee::gas(
                    AssetId::native(chain),
                    priority,
                    u128::from(plan.vsize),
                    u128::from(byte_fee),
                    u128::from(byte_fee),
                )
                .with_amount(u128::from(plan.fee)),
            );
        }

        tracing::info!(
            chain = %chain,
            sender = %mask_address(&params.from.address),
            utxos = utxos.len(),
            byte_fee = normal,
            "UTXO preload complete"
        );
        Ok(SignerParams::new(
            TransferParams::Native(params.clone()),
            ChainSignData::Bitcoin(BitcoinChainData { utxos, fees }),
        ))
    }
}

#[async_trait]
impl BroadcastClient for BitcoinClient {
    fn supported(&self, chain: Chain) -> bool {
        self.rpcs.contains_key(&chain)
    }

    async fn send(&self, account: &Account, signed: &[u8], tx_type: TransactionType) -> ChainResult<String> {
        let hash = self
            .rpc(account.chain)?
            .send_transaction(&hex::encode(signed))
            .await?;
        tracing::info!(
            chain = %account.chain,
            sender = %mask_address(&account.address),
            tx_type = ?tx_type,
            hash = %hash,
            "UTXO transaction broadcast"
        );
        Ok(hash)
    }
}

pub fn map_transaction(tx: Option<&BlockbookTransaction>) -> TransactionChanges {
    match tx {
        Some(tx) if tx.confirmations > 0 || tx.block_height > 0 => {
            let changes = TransactionChanges::new(TransactionState::Confirmed);
            match tx.fees.as_deref().and_then(|f| f.parse().ok()) {
                Some(fee) => changes.with_fee(fee),
                None => changes,
            }
        }
        _ => TransactionChanges::pending(),
    }
}

#[async_trait]
impl TransactionStatusClient for BitcoinClient {
    fn supported(&self, chain: Chain) -> bool {
        self.rpcs.contains_key(&chain)
    }

    async fn get_status(&self, request: &TransactionStateRequest) -> ChainResult<TransactionChanges> {
        let tx = self.rpc(request.chain)?.transaction(&request.hash).await?;
        Ok(map_transaction(tx.as_ref()))
    }
}

// ---------------------------------------------------------------- 签名

pub struct BitcoinSignClient {
    codec: Arc<dyn CryptoCodec>,
}

impl BitcoinSignClient {
    pub fn new(codec: Arc<dyn CryptoCodec>) -> Self {
        Self { codec }
    }
}

impl SignClient for BitcoinSignClient {
    fn supported(&self, chain: Chain) -> bool {
        chain.chain_type() == ChainType::Bitcoin
    }

    fn sign_native_transfer(
        &self,
        params: &NativeTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let data = crate::expect_chain_data!(chain_data, Bitcoin);
        let chain = params.from.chain;
        let byte_fee = fee
            .gas
            .as_ref()
            .map(|g| g.max_gas_price)
            .ok_or_else(|| ChainError::precondition("UTXO fee has no byte fee"))?;
        let plan = plan_inputs(
            chain,
            &data.utxos,
            to_u64(final_amount)?,
            to_u64(byte_fee)?,
            params.is_max_amount,
        )?;

        let mut outputs = vec![BitcoinOutput {
            address: params.destination.clone(),
            value: plan.amount,
        }];
        if plan.change > 0 {
            outputs.push(BitcoinOutput {
                address: params.from.address.clone(),
                value: plan.change,
            });
        }
        let tx = BitcoinTransaction {
            chain,
            inputs: plan.inputs,
            outputs,
        };
        Ok(vec![self.codec.encode(&SigningInput::Bitcoin(tx), private_key)?])
    }
}
