//! Solana：recent blockhash + 优先费
//!
//! 手续费 = 5000 lamports 基础签名费 + compute unit price（micro-lamports）× compute units / 1e6。
//! 代币转账需要发送方与接收方的代币账户；接收方账户不存在时在交易中创建 ATA，
//! 租金以 `TOKEN_ACCOUNT_CREATION` 附加项计入手续费。

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use crate::{
    codec::{
        solana::{
            associated_token_address, create_associated_token_account, memo, set_compute_unit_limit,
            set_compute_unit_price, system_transfer, token_transfer_checked, transaction_message,
        },
        CryptoCodec, SigningInput, SolanaTransaction,
    },
    domain::{
        mask_address, Account, AssetId, Chain, ChainSignData, Fee, FeeOption, FeePriority,
        GenericTransfer, NativeTransfer, SignerParams, SolanaChainData, SolanaTokenProgram,
        SwapTransfer, TokenTransfer, TransactionChanges, TransactionState, TransactionStateRequest,
        TransactionType, TransferParams,
    },
    error::{ChainError, ChainResult},
    infrastructure::RpcClient,
    service::{
        clients::{BroadcastClient, SignClient, SignerPreloader, TransactionStatusClient},
        node_status::{BlockInfo, LatestBlock},
    },
};

pub const BASE_FEE_LAMPORTS: u128 = 5_000;
/// 无优先费样本时的 compute unit price
pub const DEFAULT_UNIT_PRICE: u128 = 10_000;
pub const TRANSFER_COMPUTE_UNITS: u128 = 100_000;
pub const SWAP_COMPUTE_UNITS: u128 = 420_000;
pub const GENERIC_COMPUTE_UNITS: u128 = 200_000;
/// SPL 代币账户大小，用于查询租金豁免额
pub const TOKEN_ACCOUNT_SIZE: u64 = 165;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SolanaTokenAccount {
    pub pubkey: String,
    /// 持有该账户的代币 program
    pub program: String,
    pub decimals: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SolanaSignatureStatus {
    #[serde(default)]
    pub err: Option<serde_json::Value>,
    #[serde(default)]
    pub confirmation_status: Option<String>,
}

#[async_trait]
pub trait SolanaRpc: Send + Sync {
    async fn latest_blockhash(&self) -> ChainResult<String>;

    /// 最近区块的 compute unit price 样本（micro-lamports）
    async fn prioritization_fees(&self) -> ChainResult<Vec<u64>>;

    async fn token_accounts(&self, owner: &str, mint: &str) -> ChainResult<Vec<SolanaTokenAccount>>;

    async fn rent_exemption(&self, size: u64) -> ChainResult<u64>;

    async fn send_transaction(&self, raw: &[u8]) -> ChainResult<String>;

    async fn signature_status(&self, signature: &str) -> ChainResult<Option<SolanaSignatureStatus>>;

    async fn slot(&self) -> ChainResult<u64>;

    async fn genesis_hash(&self) -> ChainResult<String>;

    async fn healthy(&self) -> ChainResult<bool>;
}

// ---------------------------------------------------------------- HTTP 适配器

#[derive(Deserialize)]
struct Contextual<T> {
    value: T,
}

#[derive(Deserialize)]
struct BlockhashValue {
    blockhash: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrioritizationFee {
    prioritization_fee: u64,
}

#[derive(Deserialize)]
struct KeyedAccount {
    pubkey: String,
    account: ParsedAccount,
}

#[derive(Deserialize)]
struct ParsedAccount {
    owner: String,
    data: serde_json::Value,
}

impl KeyedAccount {
    fn into_token_account(self) -> SolanaTokenAccount {
        let decimals = self
            .account
            .data
            .pointer("/parsed/info/tokenAmount/decimals")
            .and_then(serde_json::Value::as_u64)
            .and_then(|d| u8::try_from(d).ok());
        SolanaTokenAccount {
            pubkey: self.pubkey,
            program: self.account.owner,
            decimals,
        }
    }
}

pub struct HttpSolanaRpc {
    client: RpcClient,
}

impl HttpSolanaRpc {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SolanaRpc for HttpSolanaRpc {
    async fn latest_blockhash(&self) -> ChainResult<String> {
        let response: Contextual<BlockhashValue> = self
            .client
            .json_rpc("getLatestBlockhash", json!([{ "commitment": "finalized" }]))
            .await?;
        Ok(response.value.blockhash)
    }

    async fn prioritization_fees(&self) -> ChainResult<Vec<u64>> {
        let fees: Vec<PrioritizationFee> = self
            .client
            .json_rpc("getRecentPrioritizationFees", json!([]))
            .await?;
        Ok(fees.into_iter().map(|f| f.prioritization_fee).collect())
    }

    async fn token_accounts(&self, owner: &str, mint: &str) -> ChainResult<Vec<SolanaTokenAccount>> {
        let response: Contextual<Vec<KeyedAccount>> = self
            .client
            .json_rpc(
                "getTokenAccountsByOwner",
                json!([owner, { "mint": mint }, { "encoding": "jsonParsed" }]),
            )
            .await?;
        Ok(response
            .value
            .into_iter()
            .map(KeyedAccount::into_token_account)
            .collect())
    }

    async fn rent_exemption(&self, size: u64) -> ChainResult<u64> {
        self.client
            .json_rpc("getMinimumBalanceForRentExemption", json!([size]))
            .await
    }

    async fn send_transaction(&self, raw: &[u8]) -> ChainResult<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
        self.client
            .json_rpc_call("sendTransaction", json!([encoded, { "encoding": "base64" }]), false)
            .await?
            .map_err(|e| ChainError::rejected(Chain::Solana, e.message))
    }

    async fn signature_status(&self, signature: &str) -> ChainResult<Option<SolanaSignatureStatus>> {
        let response: Contextual<Vec<Option<SolanaSignatureStatus>>> = self
            .client
            .json_rpc(
                "getSignatureStatuses",
                json!([[signature], { "searchTransactionHistory": true }]),
            )
            .await?;
        Ok(response.value.into_iter().next().flatten())
    }

    async fn slot(&self) -> ChainResult<u64> {
        self.client.json_rpc("getSlot", json!([])).await
    }

    async fn genesis_hash(&self) -> ChainResult<String> {
        self.client.json_rpc("getGenesisHash", json!([])).await
    }

    async fn healthy(&self) -> ChainResult<bool> {
        // 节点落后时 getHealth 返回 JSON-RPC 错误
        let health: Result<String, _> = self.client.json_rpc_call("getHealth", json!([]), true).await?;
        Ok(matches!(health.as_deref(), Ok("ok")))
    }
}

#[async_trait]
impl LatestBlock for HttpSolanaRpc {
    async fn latest_block(&self) -> ChainResult<BlockInfo> {
        let (slot, genesis, healthy) = tokio::try_join!(self.slot(), self.genesis_hash(), self.healthy())?;
        Ok(BlockInfo {
            chain_id: genesis,
            number: slot,
            in_sync: healthy,
        })
    }
}

// ---------------------------------------------------------------- 手续费

/// 优先费样本的平均值，样本为空时使用默认价格
pub fn unit_price(samples: &[u64]) -> u128 {
    if samples.is_empty() {
        return DEFAULT_UNIT_PRICE;
    }
    let sum: u128 = samples.iter().map(|s| u128::from(*s)).sum();
    sum / samples.len() as u128
}

pub fn calculate_fees(samples: &[u64], compute_units: u128) -> Vec<Fee> {
    let normal = unit_price(samples);
    FeePriority::ALL
        .into_iter()
        .map(|priority| {
            let price = match priority {
                FeePriority::Slow => normal / 2,
                FeePriority::Normal => normal,
                FeePriority::Fast => normal.saturating_mul(2),
            };
            let amount = BASE_FEE_LAMPORTS + price.saturating_mul(compute_units) / 1_000_000;
            Fee::gas(AssetId::native(Chain::Solana), priority, compute_units, price, price)
                .with_amount(amount)
        })
        .collect()
}

// ---------------------------------------------------------------- 预加载 / 广播 / 状态

pub struct SolanaClient {
    rpc: Arc<dyn SolanaRpc>,
}

impl SolanaClient {
    pub fn new(rpc: Arc<dyn SolanaRpc>) -> Self {
        Self { rpc }
    }

    async fn preload_plain(&self, input: TransferParams, compute_units: u128) -> ChainResult<SignerParams> {
        let (blockhash, samples) =
            tokio::try_join!(self.rpc.latest_blockhash(), self.rpc.prioritization_fees())?;
        tracing::info!(
            chain = %Chain::Solana,
            sender = %mask_address(&input.from().address),
            samples = samples.len(),
            "Solana preload complete"
        );
        Ok(SignerParams::new(
            input,
            ChainSignData::Solana(SolanaChainData {
                recent_blockhash: blockhash,
                sender_token_address: None,
                recipient_token_address: None,
                token_program: SolanaTokenProgram::Token,
                token_decimals: None,
                fees: calculate_fees(&samples, compute_units),
            }),
        ))
    }
}

#[async_trait]
impl SignerPreloader for SolanaClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Solana
    }

    async fn preload_native_transfer(&self, params: &NativeTransfer) -> ChainResult<SignerParams> {
        self.preload_plain(TransferParams::Native(params.clone()), TRANSFER_COMPUTE_UNITS)
            .await
    }

    async fn preload_token_transfer(&self, params: &TokenTransfer) -> ChainResult<SignerParams> {
        let mint = params
            .asset_id
            .token_id
            .as_deref()
            .ok_or_else(|| ChainError::precondition("token transfer without mint"))?;
        let (blockhash, samples, sender_accounts, recipient_accounts) = tokio::try_join!(
            self.rpc.latest_blockhash(),
            self.rpc.prioritization_fees(),
            self.rpc.token_accounts(&params.from.address, mint),
            self.rpc.token_accounts(&params.destination, mint),
        )?;

        let sender = sender_accounts.into_iter().next().ok_or_else(|| {
            ChainError::insufficient(format!(
                "sender {} has no token account for {}",
                mask_address(&params.from.address),
                mint
            ))
        })?;
        let token_program = SolanaTokenProgram::from_program_id(&sender.program)
            .ok_or_else(|| ChainError::insufficient(format!("unknown token program {}", sender.program)))?;
        let recipient = recipient_accounts.into_iter().next().map(|a| a.pubkey);

        let mut fees = calculate_fees(&samples, TRANSFER_COMPUTE_UNITS);
        if recipient.is_none() {
            let rent = u128::from(self.rpc.rent_exemption(TOKEN_ACCOUNT_SIZE).await?);
            fees = fees
                .into_iter()
                .map(|fee| fee.with_option(FeeOption::TokenAccountCreation, rent))
                .collect();
        }

        tracing::info!(
            chain = %Chain::Solana,
            sender = %mask_address(&params.from.address),
            mint = %mint,
            program = ?token_program,
            recipient_account_exists = recipient.is_some(),
            "Solana token preload complete"
        );
        Ok(SignerParams::new(
            TransferParams::Token(params.clone()),
            ChainSignData::Solana(SolanaChainData {
                recent_blockhash: blockhash,
                sender_token_address: Some(sender.pubkey),
                recipient_token_address: recipient,
                token_program,
                token_decimals: sender.decimals,
                fees,
            }),
        ))
    }

    async fn preload_swap(&self, params: &SwapTransfer) -> ChainResult<SignerParams> {
        let units = params.gas_limit.unwrap_or(SWAP_COMPUTE_UNITS);
        self.preload_plain(TransferParams::Swap(params.clone()), units).await
    }

    async fn preload_generic(&self, params: &GenericTransfer) -> ChainResult<SignerParams> {
        let units = params.gas_limit.unwrap_or(GENERIC_COMPUTE_UNITS);
        self.preload_plain(TransferParams::Generic(params.clone()), units)
            .await
    }
}

#[async_trait]
impl BroadcastClient for SolanaClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Solana
    }

    async fn send(&self, account: &Account, signed: &[u8], tx_type: TransactionType) -> ChainResult<String> {
        let signature = self.rpc.send_transaction(signed).await?;
        tracing::info!(
            chain = %Chain::Solana,
            sender = %mask_address(&account.address),
            tx_type = ?tx_type,
            hash = %signature,
            "Solana transaction broadcast"
        );
        Ok(signature)
    }
}

pub fn map_signature_status(status: Option<&SolanaSignatureStatus>) -> TransactionChanges {
    match status {
        None => TransactionChanges::pending(),
        Some(s) if s.err.as_ref().is_some_and(|e| !e.is_null()) => {
            TransactionChanges::new(TransactionState::Reverted)
        }
        Some(s) => match s.confirmation_status.as_deref() {
            Some("confirmed") | Some("finalized") => TransactionChanges::new(TransactionState::Confirmed),
            _ => TransactionChanges::pending(),
        },
    }
}

#[async_trait]
impl TransactionStatusClient for SolanaClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Solana
    }

    async fn get_status(&self, request: &TransactionStateRequest) -> ChainResult<TransactionChanges> {
        let status = self.rpc.signature_status(&request.hash).await?;
        Ok(map_signature_status(status.as_ref()))
    }
}

// ---------------------------------------------------------------- 签名

pub struct SolanaSignClient {
    codec: Arc<dyn CryptoCodec>,
}

impl SolanaSignClient {
    pub fn new(codec: Arc<dyn CryptoCodec>) -> Self {
        Self { codec }
    }

    fn compute_budget(fee: &Fee) -> ChainResult<[crate::codec::SolanaInstruction; 2]> {
        let gas = fee
            .gas
            .as_ref()
            .ok_or_else(|| ChainError::precondition("solana fee without compute budget"))?;
        let limit = u32::try_from(gas.limit).map_err(|_| ChainError::precondition("compute unit limit exceeds u32"))?;
        let price = u64::try_from(gas.miner_fee).map_err(|_| ChainError::precondition("compute unit price exceeds u64"))?;
        Ok([set_compute_unit_limit(limit), set_compute_unit_price(price)])
    }

    fn sign_prebuilt(&self, message: Vec<u8>, private_key: &[u8]) -> ChainResult<Vec<Vec<u8>>> {
        Ok(vec![self.codec.encode(&SigningInput::SolanaMessage(message), private_key)?])
    }
}

fn lamports(amount: u128) -> ChainResult<u64> {
    u64::try_from(amount).map_err(|_| ChainError::precondition("amount exceeds u64"))
}

fn decode_base64(payload: &str) -> ChainResult<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| ChainError::precondition(format!("invalid base64 payload: {}", e)))
}

impl SignClient for SolanaSignClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Solana
    }

    fn sign_native_transfer(
        &self,
        params: &NativeTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let data = crate::expect_chain_data!(chain_data, Solana);
        let sender = params.from.address.as_str();
        let mut instructions = Self::compute_budget(fee)?.to_vec();
        instructions.push(system_transfer(sender, &params.destination, lamports(final_amount)?));
        if let Some(text) = params.memo.as_deref().filter(|m| !m.is_empty()) {
            instructions.push(memo(sender, text));
        }
        let tx = SolanaTransaction {
            fee_payer: sender.to_string(),
            recent_blockhash: data.recent_blockhash.clone(),
            instructions,
        };
        Ok(vec![self.codec.encode(&SigningInput::Solana(tx), private_key)?])
    }

    fn sign_token_transfer(
        &self,
        params: &TokenTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let data = crate::expect_chain_data!(chain_data, Solana);
        let mint = params
            .asset_id
            .token_id
            .as_deref()
            .ok_or_else(|| ChainError::precondition("token transfer without mint"))?;
        let source = data
            .sender_token_address
            .as_deref()
            .ok_or_else(|| ChainError::precondition("missing sender token account"))?;
        let decimals = data
            .token_decimals
            .ok_or_else(|| ChainError::precondition("missing token decimals"))?;
        let sender = params.from.address.as_str();
        let program = data.token_program.program_id();

        let mut instructions = Self::compute_budget(fee)?.to_vec();
        let destination = match &data.recipient_token_address {
            Some(address) => address.clone(),
            None => {
                let address = associated_token_address(&params.destination, mint, program)?;
                instructions.push(create_associated_token_account(
                    sender,
                    &address,
                    &params.destination,
                    mint,
                    program,
                ));
                address
            }
        };
        instructions.push(token_transfer_checked(
            program,
            source,
            mint,
            &destination,
            sender,
            lamports(final_amount)?,
            decimals,
        ));
        if let Some(text) = params.memo.as_deref().filter(|m| !m.is_empty()) {
            instructions.push(memo(sender, text));
        }
        let tx = SolanaTransaction {
            fee_payer: sender.to_string(),
            recent_blockhash: data.recent_blockhash.clone(),
            instructions,
        };
        Ok(vec![self.codec.encode(&SigningInput::Solana(tx), private_key)?])
    }

    /// swap_payload 为兑换服务返回的 base64 序列化交易
    fn sign_swap(
        &self,
        params: &SwapTransfer,
        chain_data: &ChainSignData,
        _final_amount: u128,
        _fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        crate::expect_chain_data!(chain_data, Solana);
        let raw = decode_base64(&params.swap_payload)?;
        let message = transaction_message(&raw)?.to_vec();
        self.sign_prebuilt(message, private_key)
    }

    /// payload 为 base64 message 字节
    fn sign_generic(
        &self,
        params: &GenericTransfer,
        chain_data: &ChainSignData,
        _final_amount: u128,
        _fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        crate::expect_chain_data!(chain_data, Solana);
        self.sign_prebuilt(decode_base64(&params.payload)?, private_key)
    }

    fn sign_message(&self, chain: Chain, message: &[u8], private_key: &[u8]) -> ChainResult<Vec<u8>> {
        self.codec.sign_message(chain, message, private_key)
    }
}
