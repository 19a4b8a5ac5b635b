//! Tron：带宽 / 能量计费
//!
//! 原生转账：可用免费带宽 ≥ 300 时免费，否则 280_000 sun；收款账户未激活时加收建号费。
//! TRC-20：能量单价 × 预估能量 × 1.2，收款账户未激活时加收系统合约建号费。

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::{
    codec::{
        decode_hex,
        evm::{erc20_approve_data, erc20_transfer_data},
        CryptoCodec, SigningInput, TronContract, TronTransaction,
    },
    domain::{
        mask_address, Account, AssetId, Chain, ChainSignData, Fee, FeePriority, NativeTransfer,
        SignerParams, SwapTransfer, TokenApproval, TokenTransfer, TransactionChanges,
        TransactionState, TransactionStateRequest, TransactionType, TransferParams,
        TronBlockHeader, TronChainData,
    },
    error::{ChainError, ChainResult},
    infrastructure::{rpc_client::status_error, RpcClient},
    service::{
        clients::{BroadcastClient, SignClient, SignerPreloader, TransactionStatusClient},
        node_status::{BlockInfo, LatestBlock},
    },
};

pub const FREE_BANDWIDTH_THRESHOLD: i64 = 300;
pub const BANDWIDTH_FEE: u128 = 280_000;
/// 兑换合约调用的默认 fee_limit（sun）
pub const SWAP_FEE_LIMIT: u128 = 100_000_000;
pub const APPROVAL_FEE_LIMIT: u128 = 50_000_000;
/// 交易过期时间 = 参考区块时间 + 10 小时
pub const EXPIRATION_MS: u64 = 10 * 60 * 60 * 1000;
pub const MAINNET_GENESIS: &str = "00000000000000001ebf88508a03865c71d452e25f4d51194196a1d22b6653dc";
const TRANSFER_SELECTOR: &str = "transfer(address,uint256)";

/// base58check 地址 -> 20 字节（去掉 0x41 前缀）
pub fn tron_address_bytes(address: &str) -> ChainResult<[u8; 20]> {
    let raw = bs58::decode(address)
        .into_vec()
        .map_err(|e| ChainError::precondition(format!("invalid tron address {}: {}", address, e)))?;
    if raw.len() != 25 || raw[0] != 0x41 {
        return Err(ChainError::precondition(format!("invalid tron address {}", address)));
    }
    let checksum = Sha256::digest(Sha256::digest(&raw[..21]));
    if checksum[..4] != raw[21..] {
        return Err(ChainError::precondition(format!("bad checksum in tron address {}", address)));
    }
    let mut out = [0u8; 20];
    out.copy_from_slice(&raw[1..21]);
    Ok(out)
}

/// 20 字节 -> base58check 地址（补 0x41 前缀）
pub fn tron_address_from_bytes(bytes: &[u8; 20]) -> String {
    let mut raw = Vec::with_capacity(25);
    raw.push(0x41);
    raw.extend_from_slice(bytes);
    let checksum = Sha256::digest(Sha256::digest(&raw));
    raw.extend_from_slice(&checksum[..4]);
    bs58::encode(raw).into_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TronAccountUsage {
    #[serde(default)]
    pub free_net_limit: i64,
    #[serde(default)]
    pub free_net_used: i64,
}

impl TronAccountUsage {
    pub fn available_bandwidth(&self) -> i64 {
        self.free_net_limit - self.free_net_used
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TronChainParameter {
    pub key: String,
    #[serde(default)]
    pub value: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TronFeeParameters {
    pub create_account_fee: u128,
    pub create_account_fee_in_contract: u128,
    pub energy_fee: u128,
}

impl TronFeeParameters {
    pub fn from_chain_parameters(parameters: &[TronChainParameter]) -> ChainResult<Self> {
        let lookup = |key: &str| {
            parameters
                .iter()
                .find(|p| p.key == key)
                .and_then(|p| p.value)
                .and_then(|v| u128::try_from(v).ok())
                .ok_or_else(|| ChainError::rpc(format!("missing chain parameter {}", key)))
        };
        Ok(Self {
            create_account_fee: lookup("getCreateAccountFee")?,
            create_account_fee_in_contract: lookup("getCreateNewAccountFeeInSystemContract")?,
            energy_fee: lookup("getEnergyFee")?,
        })
    }
}

pub fn native_fee(usage: &TronAccountUsage, recipient_exists: bool, params: &TronFeeParameters) -> u128 {
    let bandwidth = if usage.available_bandwidth() >= FREE_BANDWIDTH_THRESHOLD {
        0
    } else {
        BANDWIDTH_FEE
    };
    if recipient_exists {
        bandwidth
    } else {
        bandwidth + params.create_account_fee
    }
}

pub fn token_fee(energy_used: u64, recipient_exists: bool, params: &TronFeeParameters) -> u128 {
    let energy = u128::from(energy_used);
    let fee = params.energy_fee * (energy + energy / 5);
    if recipient_exists {
        fee
    } else {
        fee + params.create_account_fee_in_contract
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TronReceipt {
    #[serde(default)]
    pub result: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TronTransactionInfo {
    pub id: String,
    #[serde(default)]
    pub fee: Option<u64>,
    #[serde(default)]
    pub block_number: Option<u64>,
    #[serde(default)]
    pub result: Option<String>,
    #[serde(default)]
    pub receipt: Option<TronReceipt>,
}

#[async_trait]
pub trait TronRpc: Send + Sync {
    async fn now_block(&self) -> ChainResult<TronBlockHeader>;

    async fn account_exists(&self, address: &str) -> ChainResult<bool>;

    async fn account_usage(&self, address: &str) -> ChainResult<TronAccountUsage>;

    async fn chain_parameters(&self) -> ChainResult<Vec<TronChainParameter>>;

    /// `triggerconstantcontract` 预估能量
    async fn estimate_energy(
        &self,
        owner: &str,
        contract: &str,
        selector: &str,
        parameter: &str,
    ) -> ChainResult<u64>;

    async fn broadcast(&self, transaction: &serde_json::Value) -> ChainResult<String>;

    async fn transaction_info(&self, id: &str) -> ChainResult<Option<TronTransactionInfo>>;
}

// ---------------------------------------------------------------- HTTP 适配器

#[derive(Deserialize)]
struct NowBlock {
    block_header: RawHeader,
}

#[derive(Deserialize)]
struct RawHeader {
    raw_data: RawData,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawData {
    number: u64,
    #[serde(default)]
    version: u32,
    #[serde(default)]
    tx_trie_root: String,
    #[serde(rename = "witness_address")]
    witness_address: String,
    parent_hash: String,
    timestamp: u64,
}

#[derive(Deserialize)]
struct AccountResponse {
    #[serde(default)]
    address: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChainParameters {
    chain_parameter: Vec<TronChainParameter>,
}

#[derive(Deserialize)]
struct ConstantResult {
    #[serde(default)]
    result: Option<bool>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct ConstantResponse {
    #[serde(default)]
    energy_used: u64,
    result: ConstantResult,
}

#[derive(Deserialize)]
struct BroadcastResponse {
    #[serde(default)]
    result: bool,
    #[serde(default)]
    txid: Option<String>,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// 节点返回的 message 为十六进制编码的文本
fn decode_message(message: &str) -> String {
    hex::decode(message)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_else(|| message.to_string())
}

pub struct HttpTronRpc {
    client: RpcClient,
}

impl HttpTronRpc {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TronRpc for HttpTronRpc {
    async fn now_block(&self) -> ChainResult<TronBlockHeader> {
        let block: NowBlock = self.client.post_json("/wallet/getnowblock", &json!({})).await?;
        let raw = block.block_header.raw_data;
        Ok(TronBlockHeader {
            number: raw.number,
            version: raw.version,
            tx_trie_root: raw.tx_trie_root,
            witness_address: raw.witness_address,
            parent_hash: raw.parent_hash,
            timestamp: raw.timestamp,
        })
    }

    async fn account_exists(&self, address: &str) -> ChainResult<bool> {
        // 未激活账户返回空对象
        let account: AccountResponse = self
            .client
            .post_json("/wallet/getaccount", &json!({ "address": address, "visible": true }))
            .await?;
        Ok(account.address.is_some_and(|a| !a.is_empty()))
    }

    async fn account_usage(&self, address: &str) -> ChainResult<TronAccountUsage> {
        self.client
            .post_json(
                "/wallet/getaccountnet",
                &json!({ "address": address, "visible": true }),
            )
            .await
    }

    async fn chain_parameters(&self) -> ChainResult<Vec<TronChainParameter>> {
        let response: ChainParameters = self
            .client
            .post_json("/wallet/getchainparameters", &json!({}))
            .await?;
        Ok(response.chain_parameter)
    }

    async fn estimate_energy(
        &self,
        owner: &str,
        contract: &str,
        selector: &str,
        parameter: &str,
    ) -> ChainResult<u64> {
        let body = json!({
            "owner_address": owner,
            "contract_address": contract,
            "function_selector": selector,
            "parameter": parameter,
            "visible": true,
        });
        let response: ConstantResponse = self
            .client
            .post_json("/wallet/triggerconstantcontract", &body)
            .await?;
        match response.result {
            ConstantResult {
                message: Some(message),
                ..
            } if !message.is_empty() => Err(ChainError::insufficient(format!(
                "energy estimate failed: {}",
                decode_message(&message)
            ))),
            ConstantResult { result: Some(false), .. } => {
                Err(ChainError::insufficient("energy estimate failed"))
            }
            _ => Ok(response.energy_used),
        }
    }

    async fn broadcast(&self, transaction: &serde_json::Value) -> ChainResult<String> {
        let response = self
            .client
            .post_raw("/wallet/broadcasttransaction", transaction, false)
            .await?;
        if !response.is_success() {
            return Err(status_error(response.status, &response.body));
        }
        let body: BroadcastResponse = response.json()?;
        match body {
            BroadcastResponse {
                result: true,
                txid: Some(txid),
                ..
            } => Ok(txid),
            BroadcastResponse { code, message, .. } => Err(ChainError::rejected(
                Chain::Tron,
                message
                    .map(|m| decode_message(&m))
                    .or(code)
                    .unwrap_or_else(|| "broadcast failed".into()),
            )),
        }
    }

    async fn transaction_info(&self, id: &str) -> ChainResult<Option<TronTransactionInfo>> {
        let value: serde_json::Value = self
            .client
            .post_json("/walletsolidity/gettransactioninfobyid", &json!({ "value": id }))
            .await?;
        if value.get("id").is_none() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }
}

#[async_trait]
impl LatestBlock for HttpTronRpc {
    async fn latest_block(&self) -> ChainResult<BlockInfo> {
        let block = self.now_block().await?;
        let age_ms = chrono::Utc::now().timestamp_millis() - block.timestamp as i64;
        Ok(BlockInfo {
            chain_id: MAINNET_GENESIS.into(),
            number: block.number,
            in_sync: age_ms < 60_000,
        })
    }
}

// ---------------------------------------------------------------- 预加载 / 广播 / 状态

pub struct TronClient {
    rpc: Arc<dyn TronRpc>,
}

/// ABI 参数（去掉 4 字节选择器）
fn transfer_parameter(recipient: &str, amount: u128) -> ChainResult<String> {
    let data = erc20_transfer_data(&tron_address_bytes(recipient)?, amount);
    Ok(hex::encode(&data[4..]))
}

impl TronClient {
    pub fn new(rpc: Arc<dyn TronRpc>) -> Self {
        Self { rpc }
    }

    async fn preload_transfer(
        &self,
        input: TransferParams,
        destination: &str,
        token: Option<&str>,
    ) -> ChainResult<SignerParams> {
        let owner = input.from().address.clone();
        let (block, usage, recipient_exists, parameters, energy) = tokio::try_join!(
            self.rpc.now_block(),
            self.rpc.account_usage(&owner),
            self.rpc.account_exists(destination),
            self.rpc.chain_parameters(),
            self.estimate_energy(&owner, destination, input.amount(), token),
        )?;
        let parameters = TronFeeParameters::from_chain_parameters(&parameters)?;
        let amount = match energy {
            Some(energy) => token_fee(energy, recipient_exists, &parameters),
            None => native_fee(&usage, recipient_exists, &parameters),
        };

        tracing::info!(
            chain = %Chain::Tron,
            sender = %mask_address(&owner),
            block = block.number,
            recipient_exists,
            energy = ?energy,
            fee = %amount,
            "Tron preload complete"
        );
        Ok(SignerParams::new(
            input,
            ChainSignData::Tron(TronChainData {
                block,
                fee: Fee::new(AssetId::native(Chain::Tron), FeePriority::Normal, amount),
            }),
        ))
    }

    /// 原生转账不需要能量
    async fn estimate_energy(
        &self,
        owner: &str,
        destination: &str,
        amount: u128,
        token: Option<&str>,
    ) -> ChainResult<Option<u64>> {
        let Some(contract) = token else {
            return Ok(None);
        };
        let parameter = transfer_parameter(destination, amount)?;
        let energy = self
            .rpc
            .estimate_energy(owner, contract, TRANSFER_SELECTOR, &parameter)
            .await?;
        Ok(Some(energy))
    }

    async fn preload_call(&self, input: TransferParams, fee_limit: u128) -> ChainResult<SignerParams> {
        let block = self.rpc.now_block().await?;
        tracing::info!(
            chain = %Chain::Tron,
            sender = %mask_address(&input.from().address),
            block = block.number,
            "Tron contract call preload complete"
        );
        Ok(SignerParams::new(
            input,
            ChainSignData::Tron(TronChainData {
                block,
                fee: Fee::new(AssetId::native(Chain::Tron), FeePriority::Normal, fee_limit),
            }),
        ))
    }
}

#[async_trait]
impl SignerPreloader for TronClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Tron
    }

    async fn preload_native_transfer(&self, params: &NativeTransfer) -> ChainResult<SignerParams> {
        self.preload_transfer(TransferParams::Native(params.clone()), &params.destination, None)
            .await
    }

    async fn preload_token_transfer(&self, params: &TokenTransfer) -> ChainResult<SignerParams> {
        let contract = params
            .asset_id
            .token_id
            .as_deref()
            .ok_or_else(|| ChainError::precondition("token transfer without contract"))?;
        self.preload_transfer(
            TransferParams::Token(params.clone()),
            &params.destination,
            Some(contract),
        )
        .await
    }

    async fn preload_swap(&self, params: &SwapTransfer) -> ChainResult<SignerParams> {
        let fee_limit = params.gas_limit.unwrap_or(SWAP_FEE_LIMIT);
        self.preload_call(TransferParams::Swap(params.clone()), fee_limit).await
    }

    async fn preload_token_approval(&self, params: &TokenApproval) -> ChainResult<SignerParams> {
        self.preload_call(TransferParams::TokenApproval(params.clone()), APPROVAL_FEE_LIMIT)
            .await
    }
}

#[async_trait]
impl BroadcastClient for TronClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Tron
    }

    /// 已签名载荷为 JSON 交易对象
    async fn send(&self, account: &Account, signed: &[u8], tx_type: TransactionType) -> ChainResult<String> {
        let transaction: serde_json::Value = serde_json::from_slice(signed)
            .map_err(|e| ChainError::precondition(format!("tron payload is not json: {}", e)))?;
        let txid = self.rpc.broadcast(&transaction).await?;
        tracing::info!(
            chain = %Chain::Tron,
            sender = %mask_address(&account.address),
            tx_type = ?tx_type,
            hash = %txid,
            "Tron transaction broadcast"
        );
        Ok(txid)
    }
}

pub fn map_transaction_info(info: Option<&TronTransactionInfo>) -> TransactionChanges {
    let Some(info) = info else {
        return TransactionChanges::pending();
    };
    if info.block_number.is_none() {
        return TransactionChanges::pending();
    }
    let failed = info.result.as_deref() == Some("FAILED")
        || info
            .receipt
            .as_ref()
            .and_then(|r| r.result.as_deref())
            .is_some_and(|r| r != "SUCCESS");
    let state = if failed {
        TransactionState::Reverted
    } else {
        TransactionState::Confirmed
    };
    TransactionChanges::new(state).with_fee(u128::from(info.fee.unwrap_or(0)))
}

#[async_trait]
impl TransactionStatusClient for TronClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Tron
    }

    async fn get_status(&self, request: &TransactionStateRequest) -> ChainResult<TransactionChanges> {
        let info = self.rpc.transaction_info(&request.hash).await?;
        Ok(map_transaction_info(info.as_ref()))
    }
}

// ---------------------------------------------------------------- 签名

pub struct TronSignClient {
    codec: Arc<dyn CryptoCodec>,
}

impl TronSignClient {
    pub fn new(codec: Arc<dyn CryptoCodec>) -> Self {
        Self { codec }
    }

    fn sign(
        &self,
        data: &TronChainData,
        owner: &str,
        contract: TronContract,
        fee_limit: u128,
        memo: Option<&str>,
        private_key: &[u8],
    ) -> ChainResult<Vec<u8>> {
        let tx = TronTransaction {
            owner_address: owner.to_string(),
            contract,
            block: data.block.clone(),
            fee_limit: u64::try_from(fee_limit).map_err(|_| ChainError::precondition("fee limit exceeds u64"))?,
            timestamp: data.block.timestamp,
            expiration: data.block.timestamp + EXPIRATION_MS,
            memo: memo.filter(|m| !m.is_empty()).map(str::to_string),
        };
        self.codec.encode(&SigningInput::Tron(tx), private_key)
    }
}

fn sun(amount: u128) -> ChainResult<u64> {
    u64::try_from(amount).map_err(|_| ChainError::precondition("amount exceeds u64"))
}

impl SignClient for TronSignClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Tron
    }

    fn sign_native_transfer(
        &self,
        params: &NativeTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let data = crate::expect_chain_data!(chain_data, Tron);
        tron_address_bytes(&params.destination)?;
        let contract = TronContract::TransferContract {
            to_address: params.destination.clone(),
            amount: sun(final_amount)?,
        };
        Ok(vec![self.sign(
            data,
            &params.from.address,
            contract,
            fee.amount,
            params.memo.as_deref(),
            private_key,
        )?])
    }

    fn sign_token_transfer(
        &self,
        params: &TokenTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let data = crate::expect_chain_data!(chain_data, Tron);
        let token = params
            .asset_id
            .token_id
            .clone()
            .ok_or_else(|| ChainError::precondition("token transfer without contract"))?;
        let call = erc20_transfer_data(&tron_address_bytes(&params.destination)?, final_amount);
        let contract = TronContract::TriggerSmartContract {
            contract_address: token,
            data: hex::encode(call),
            call_value: 0,
        };
        Ok(vec![self.sign(
            data,
            &params.from.address,
            contract,
            fee.amount,
            params.memo.as_deref(),
            private_key,
        )?])
    }

    /// 需要授权时先签 approve，再签兑换调用
    fn sign_swap(
        &self,
        params: &SwapTransfer,
        chain_data: &ChainSignData,
        _final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let data = crate::expect_chain_data!(chain_data, Tron);
        let owner = params.from.address.as_str();
        let mut signed = Vec::with_capacity(2);
        if let Some(approval) = &params.approval {
            let contract = TronContract::TriggerSmartContract {
                contract_address: approval.token.clone(),
                data: hex::encode(erc20_approve_data(&tron_address_bytes(&approval.spender)?)),
                call_value: 0,
            };
            signed.push(self.sign(data, owner, contract, APPROVAL_FEE_LIMIT, None, private_key)?);
        }
        let call = decode_hex(&params.swap_payload)?;
        let contract = TronContract::TriggerSmartContract {
            contract_address: params.to.clone(),
            data: hex::encode(call),
            call_value: sun(params.value)?,
        };
        signed.push(self.sign(data, owner, contract, fee.amount, None, private_key)?);
        Ok(signed)
    }

    fn sign_token_approval(
        &self,
        params: &TokenApproval,
        chain_data: &ChainSignData,
        _final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let data = crate::expect_chain_data!(chain_data, Tron);
        let token = params
            .asset_id
            .token_id
            .clone()
            .ok_or_else(|| ChainError::precondition("approval without token contract"))?;
        let contract = TronContract::TriggerSmartContract {
            contract_address: token,
            data: hex::encode(decode_hex(&params.data)?),
            call_value: 0,
        };
        Ok(vec![self.sign(data, &params.from.address, contract, fee.amount, None, private_key)?])
    }
}
