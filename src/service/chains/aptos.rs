//! Aptos：账户 sequence + gas 估算
//!
//! 账户不存在（`error_code == "account_not_found"`）时 sequence 视为 0；
//! 其他带 message 的错误一律视为失败。

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::try_join_all;
use serde::{Deserialize, Serialize};

use crate::{
    codec::{AptosEntryFunction, AptosTransaction, CryptoCodec, SigningInput},
    domain::{
        mask_address, Account, AptosChainData, AssetId, Chain, ChainSignData, Fee, FeePriority,
        NativeTransfer, SignerParams, SwapTransfer, TokenTransfer, TransactionChanges,
        TransactionState, TransactionStateRequest, TransactionType, TransferParams,
    },
    error::{ChainError, ChainResult},
    infrastructure::{rpc_client::status_error, RpcClient},
    service::{
        clients::{BroadcastClient, SignClient, SignerPreloader, TransactionStatusClient},
        node_status::{BlockInfo, LatestBlock},
    },
};

pub const MAX_GAS_AMOUNT: u64 = 1_500;
pub const ACCOUNT_NOT_FOUND: &str = "account_not_found";
/// 固定的远期过期时间，保证签名输出可复现
const EXPIRATION_TIMESTAMP_SECS: u64 = 3_664_390_082;
const BCS_CONTENT_TYPE: &str = "application/x.aptos.signed_transaction+bcs";

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct AptosAccountResponse {
    #[serde(default)]
    pub sequence_number: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AptosGasPrice {
    pub gas_estimate: u64,
    #[serde(default)]
    pub prioritized_gas_estimate: Option<u64>,
}

/// 模拟交易请求（JSON 格式，无签名）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AptosSimulation {
    pub sender: String,
    pub sequence_number: String,
    pub max_gas_amount: String,
    pub gas_unit_price: String,
    pub expiration_timestamp_secs: String,
    pub payload: serde_json::Value,
    pub signature: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AptosSimulated {
    pub success: bool,
    pub gas_used: String,
    #[serde(default)]
    pub vm_status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AptosTransactionInfo {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub vm_status: Option<String>,
    #[serde(default)]
    pub gas_used: Option<String>,
    #[serde(default)]
    pub gas_unit_price: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AptosLedger {
    pub chain_id: u64,
    pub block_height: String,
}

#[async_trait]
pub trait AptosRpc: Send + Sync {
    /// 账户不存在时同样返回响应体（含 error_code），由调用方判定
    async fn account(&self, address: &str) -> ChainResult<AptosAccountResponse>;

    async fn gas_price(&self) -> ChainResult<AptosGasPrice>;

    async fn simulate(&self, request: &AptosSimulation) -> ChainResult<Vec<AptosSimulated>>;

    async fn submit(&self, signed: &[u8]) -> ChainResult<String>;

    /// 未知哈希返回 None
    async fn transaction(&self, hash: &str) -> ChainResult<Option<AptosTransactionInfo>>;

    async fn ledger(&self) -> ChainResult<AptosLedger>;
}

// ---------------------------------------------------------------- HTTP 适配器

#[derive(Deserialize)]
struct SubmitResponse {
    hash: String,
}

#[derive(Deserialize)]
struct NodeError {
    message: String,
}

pub struct HttpAptosRpc {
    client: RpcClient,
}

impl HttpAptosRpc {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl AptosRpc for HttpAptosRpc {
    async fn account(&self, address: &str) -> ChainResult<AptosAccountResponse> {
        let response = self.client.get_raw(&format!("/v1/accounts/{}", address)).await?;
        if response.is_success() || response.is_not_found() {
            return response.json();
        }
        Err(status_error(response.status, &response.body))
    }

    async fn gas_price(&self) -> ChainResult<AptosGasPrice> {
        self.client.get_json("/v1/estimate_gas_price").await
    }

    async fn simulate(&self, request: &AptosSimulation) -> ChainResult<Vec<AptosSimulated>> {
        self.client
            .post_json("/v1/transactions/simulate", &serde_json::to_value(request)?)
            .await
    }

    async fn submit(&self, signed: &[u8]) -> ChainResult<String> {
        let response = self
            .client
            .post_bytes("/v1/transactions", BCS_CONTENT_TYPE, signed)
            .await?;
        if response.is_success() {
            return Ok(response.json::<SubmitResponse>()?.hash);
        }
        match response.json::<NodeError>() {
            Ok(error) if response.status < 500 && response.status != 429 => {
                Err(ChainError::rejected(Chain::Aptos, error.message))
            }
            _ => Err(status_error(response.status, &response.body)),
        }
    }

    async fn transaction(&self, hash: &str) -> ChainResult<Option<AptosTransactionInfo>> {
        let response = self
            .client
            .get_raw(&format!("/v1/transactions/by_hash/{}", hash))
            .await?;
        if response.is_not_found() {
            return Ok(None);
        }
        Ok(Some(response.error_for_status()?.json()?))
    }

    async fn ledger(&self) -> ChainResult<AptosLedger> {
        self.client.get_json("/v1").await
    }
}

#[async_trait]
impl LatestBlock for HttpAptosRpc {
    async fn latest_block(&self) -> ChainResult<BlockInfo> {
        let ledger = self.ledger().await?;
        let number = ledger
            .block_height
            .parse()
            .map_err(|_| ChainError::rpc("invalid block height"))?;
        Ok(BlockInfo {
            chain_id: ledger.chain_id.to_string(),
            number,
            in_sync: true,
        })
    }
}

// ---------------------------------------------------------------- 预加载 / 广播 / 状态

/// 解析账户 sequence：不存在 -> 0，其余错误原样失败
pub fn parse_sequence(account: &AptosAccountResponse) -> ChainResult<u64> {
    if let Some(sequence) = &account.sequence_number {
        return sequence
            .parse()
            .map_err(|_| ChainError::rpc(format!("invalid sequence number {}", sequence)));
    }
    if account.error_code.as_deref() == Some(ACCOUNT_NOT_FOUND) {
        return Ok(0);
    }
    match &account.message {
        Some(message) => Err(ChainError::Rpc(message.clone())),
        None => Err(ChainError::rpc("account has no sequence number")),
    }
}

pub fn gas_price_for(price: &AptosGasPrice, priority: FeePriority) -> u64 {
    let prioritized = price.prioritized_gas_estimate.unwrap_or(price.gas_estimate);
    match priority {
        FeePriority::Slow => price.gas_estimate,
        FeePriority::Normal => prioritized,
        FeePriority::Fast => prioritized.saturating_mul(2),
    }
}

/// 需要模拟的交易形态
enum GasLimit<'a> {
    SimulateNativeTransfer { recipient: &'a str, amount: u128 },
    Max,
}

pub struct AptosClient {
    rpc: Arc<dyn AptosRpc>,
}

impl AptosClient {
    pub fn new(rpc: Arc<dyn AptosRpc>) -> Self {
        Self { rpc }
    }

    async fn simulate_native_gas(
        &self,
        sender: &str,
        recipient: &str,
        amount: u128,
        sequence: u64,
        gas_price: u64,
    ) -> ChainResult<u64> {
        let request = AptosSimulation {
            sender: sender.to_string(),
            sequence_number: sequence.to_string(),
            max_gas_amount: MAX_GAS_AMOUNT.to_string(),
            gas_unit_price: gas_price.to_string(),
            expiration_timestamp_secs: (chrono::Utc::now().timestamp() + 1_000_000).to_string(),
            payload: serde_json::json!({
                "type": "entry_function_payload",
                "function": "0x1::aptos_account::transfer",
                "type_arguments": [],
                "arguments": [recipient, amount.to_string()],
            }),
            signature: serde_json::json!({ "type": "no_account_signature" }),
        };
        let simulated = self
            .rpc
            .simulate(&request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| ChainError::rpc("simulation returned no transaction"))?;
        simulated
            .gas_used
            .parse()
            .map_err(|_| ChainError::rpc(format!("invalid gas_used {}", simulated.gas_used)))
    }

    async fn preload(&self, sender: &str, input: TransferParams, gas_limit: GasLimit<'_>) -> ChainResult<SignerParams> {
        let (account, price) = tokio::try_join!(self.rpc.account(sender), self.rpc.gas_price())?;
        let sequence = parse_sequence(&account)?;

        let fees = try_join_all(FeePriority::ALL.into_iter().map(|priority| {
            let gas_price = gas_price_for(&price, priority);
            let gas_limit = &gas_limit;
            async move {
                let limit = match gas_limit {
                    GasLimit::SimulateNativeTransfer { recipient, amount } => {
                        self.simulate_native_gas(sender, recipient, *amount, sequence, gas_price)
                            .await?
                    }
                    GasLimit::Max => MAX_GAS_AMOUNT,
                };
                Ok::<_, ChainError>(Fee::gas(
                    AssetId::native(Chain::Aptos),
                    priority,
                    u128::from(limit),
                    u128::from(gas_price),
                    u128::from(gas_price),
                ))
            }
        }))
        .await?;

        tracing::info!(
            chain = %Chain::Aptos,
            sender = %mask_address(sender),
            sequence,
            gas_price = price.gas_estimate,
            "Aptos preload complete"
        );
        Ok(SignerParams::new(
            input,
            ChainSignData::Aptos(AptosChainData { sequence, fees }),
        ))
    }
}

#[async_trait]
impl SignerPreloader for AptosClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Aptos
    }

    async fn preload_native_transfer(&self, params: &NativeTransfer) -> ChainResult<SignerParams> {
        self.preload(
            &params.from.address,
            TransferParams::Native(params.clone()),
            GasLimit::SimulateNativeTransfer {
                recipient: &params.destination,
                amount: params.amount,
            },
        )
        .await
    }

    async fn preload_token_transfer(&self, params: &TokenTransfer) -> ChainResult<SignerParams> {
        self.preload(&params.from.address, TransferParams::Token(params.clone()), GasLimit::Max)
            .await
    }

    async fn preload_swap(&self, params: &SwapTransfer) -> ChainResult<SignerParams> {
        self.preload(&params.from.address, TransferParams::Swap(params.clone()), GasLimit::Max)
            .await
    }
}

#[async_trait]
impl BroadcastClient for AptosClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Aptos
    }

    async fn send(&self, account: &Account, signed: &[u8], tx_type: TransactionType) -> ChainResult<String> {
        let hash = self.rpc.submit(signed).await?;
        tracing::info!(
            chain = %Chain::Aptos,
            sender = %mask_address(&account.address),
            tx_type = ?tx_type,
            hash = %hash,
            "Aptos transaction submitted"
        );
        Ok(hash)
    }
}

pub fn map_transaction_state(info: Option<&AptosTransactionInfo>) -> TransactionChanges {
    let Some(info) = info else {
        return TransactionChanges::pending();
    };
    let state = match (info.kind.as_str(), info.success) {
        ("pending_transaction", _) | (_, None) => return TransactionChanges::pending(),
        (_, Some(true)) => TransactionState::Confirmed,
        (_, Some(false)) => TransactionState::Reverted,
    };
    let fee = info
        .gas_used
        .as_deref()
        .zip(info.gas_unit_price.as_deref())
        .and_then(|(used, price)| Some(used.parse::<u128>().ok()? * price.parse::<u128>().ok()?));
    let changes = TransactionChanges::new(state);
    match fee {
        Some(fee) => changes.with_fee(fee),
        None => changes,
    }
}

#[async_trait]
impl TransactionStatusClient for AptosClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Aptos
    }

    async fn get_status(&self, request: &TransactionStateRequest) -> ChainResult<TransactionChanges> {
        let info = self.rpc.transaction(&request.hash).await?;
        if let Some(vm_status) = info.as_ref().and_then(|i| i.vm_status.as_deref()) {
            tracing::debug!(chain = %Chain::Aptos, hash = %request.hash, vm_status, "Aptos status polled");
        }
        Ok(map_transaction_state(info.as_ref()))
    }
}

// ---------------------------------------------------------------- 签名

pub struct AptosSignClient {
    codec: Arc<dyn CryptoCodec>,
}

impl AptosSignClient {
    pub fn new(codec: Arc<dyn CryptoCodec>) -> Self {
        Self { codec }
    }

    fn sign(
        &self,
        sender: &str,
        chain_data: &ChainSignData,
        fee: &Fee,
        payload: AptosEntryFunction,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let data = crate::expect_chain_data!(chain_data, Aptos);
        let gas = fee
            .gas
            .as_ref()
            .ok_or_else(|| ChainError::precondition("Aptos fee has no gas parameters"))?;
        let chain_id = Chain::Aptos
            .network_id()
            .parse()
            .map_err(|_| ChainError::Configuration("invalid Aptos chain id".into()))?;
        let tx = AptosTransaction {
            sender: sender.to_string(),
            sequence_number: data.sequence,
            payload,
            max_gas_amount: to_u64(gas.limit, "gas limit")?,
            gas_unit_price: to_u64(gas.max_gas_price, "gas price")?,
            expiration_timestamp_secs: EXPIRATION_TIMESTAMP_SECS,
            chain_id,
        };
        Ok(vec![self.codec.encode(&SigningInput::Aptos(tx), private_key)?])
    }
}

fn to_u64(value: u128, what: &str) -> ChainResult<u64> {
    u64::try_from(value).map_err(|_| ChainError::precondition(format!("{} exceeds u64", what)))
}

impl SignClient for AptosSignClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Aptos
    }

    fn sign_native_transfer(
        &self,
        params: &NativeTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let payload = AptosEntryFunction::native_transfer(&params.destination, to_u64(final_amount, "amount")?)?;
        self.sign(&params.from.address, chain_data, fee, payload, private_key)
    }

    fn sign_token_transfer(
        &self,
        params: &TokenTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let token = params
            .asset_id
            .token_id
            .as_deref()
            .ok_or_else(|| ChainError::precondition("token transfer without token id"))?;
        let payload =
            AptosEntryFunction::token_transfer(token, &params.destination, to_u64(final_amount, "amount")?)?;
        self.sign(&params.from.address, chain_data, fee, payload, private_key)
    }

    fn sign_swap(
        &self,
        params: &SwapTransfer,
        chain_data: &ChainSignData,
        _final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let payload = AptosEntryFunction::from_json_payload(&params.swap_payload)?;
        self.sign(&params.from.address, chain_data, fee, payload, private_key)
    }

    fn sign_message(&self, chain: Chain, message: &[u8], private_key: &[u8]) -> ChainResult<Vec<u8>> {
        self.codec.sign_message(chain, message, private_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{aptos::bcs_address, BuiltinCodec},
        infrastructure::LocalKeySigner,
    };

    const SENDER: &str = "0x80c3cca35602e4568a7ac88d4d91110f8efa6c45c659439c2b4ed04033059c6f";
    const RECIPIENT: &str = "0xd7257c62806cea85fc8eaf947377b672fe062b81e6c0b19b6d8a3f408e59cf8c";

    struct MockAptosRpc {
        account: AptosAccountResponse,
        gas_used: &'static str,
    }

    #[async_trait]
    impl AptosRpc for MockAptosRpc {
        async fn account(&self, _address: &str) -> ChainResult<AptosAccountResponse> {
            Ok(self.account.clone())
        }

        async fn gas_price(&self) -> ChainResult<AptosGasPrice> {
            Ok(AptosGasPrice {
                gas_estimate: 100,
                prioritized_gas_estimate: Some(150),
            })
        }

        async fn simulate(&self, request: &AptosSimulation) -> ChainResult<Vec<AptosSimulated>> {
            assert_eq!(request.payload["arguments"][0], RECIPIENT);
            Ok(vec![AptosSimulated {
                success: true,
                gas_used: self.gas_used.into(),
                vm_status: "Executed successfully".into(),
            }])
        }

        async fn submit(&self, _signed: &[u8]) -> ChainResult<String> {
            Ok("0xhash".into())
        }

        async fn transaction(&self, _hash: &str) -> ChainResult<Option<AptosTransactionInfo>> {
            Ok(None)
        }

        async fn ledger(&self) -> ChainResult<AptosLedger> {
            Ok(AptosLedger {
                chain_id: 1,
                block_height: "10".into(),
            })
        }
    }

    fn native() -> NativeTransfer {
        NativeTransfer {
            from: Account::new(Chain::Aptos, SENDER, ""),
            destination: RECIPIENT.into(),
            amount: 10_000_000_000,
            memo: None,
            is_max_amount: false,
        }
    }

    fn client(account: AptosAccountResponse) -> AptosClient {
        AptosClient::new(Arc::new(MockAptosRpc {
            account,
            gas_used: "9",
        }))
    }

    /// Test 1: 正常账户：sequence 与模拟 gas 组成手续费
    #[tokio::test]
    async fn test_preload_native() {
        let account = AptosAccountResponse {
            sequence_number: Some("8".into()),
            ..Default::default()
        };
        let params = client(account).preload_native_transfer(&native()).await.unwrap();
        assert_eq!(params.chain_data.sequence(), Some(8));
        let fee = params.fee(FeePriority::Normal).unwrap();
        assert_eq!(fee.amount, 1_350);
        assert_eq!(fee.gas.as_ref().unwrap().max_gas_price, 150);
        assert_eq!(fee.gas_limit(), Some(9));
        assert_eq!(params.fee(FeePriority::Fast).unwrap().gas.as_ref().unwrap().max_gas_price, 300);
        assert_eq!(params.fee(FeePriority::Slow).unwrap().gas.as_ref().unwrap().max_gas_price, 100);
    }

    /// Test 2: account_not_found -> sequence 0
    #[tokio::test]
    async fn test_account_not_found_defaults_to_zero() {
        let account = AptosAccountResponse {
            sequence_number: None,
            error_code: Some(ACCOUNT_NOT_FOUND.into()),
            message: Some("Account not found by Address".into()),
        };
        let params = client(account).preload_native_transfer(&native()).await.unwrap();
        assert_eq!(params.chain_data.sequence(), Some(0));
        assert_eq!(params.fee(FeePriority::Normal).unwrap().amount, 1_350);
    }

    /// Test 3: 其他错误信息原样失败
    #[tokio::test]
    async fn test_other_message_fails_with_exact_message() {
        let account = AptosAccountResponse {
            sequence_number: None,
            error_code: None,
            message: Some("Message".into()),
        };
        let err = client(account).preload_native_transfer(&native()).await.unwrap_err();
        assert_eq!(err, ChainError::Rpc("Message".into()));
    }

    #[tokio::test]
    async fn test_token_preload_uses_max_gas() {
        let account = AptosAccountResponse {
            sequence_number: Some("1".into()),
            ..Default::default()
        };
        let params = client(account)
            .preload_token_transfer(&TokenTransfer {
                from: Account::new(Chain::Aptos, SENDER, ""),
                destination: RECIPIENT.into(),
                asset_id: AssetId::token(Chain::Aptos, "0x1::usdc::USDC"),
                amount: 5,
                memo: None,
                is_max_amount: false,
            })
            .await
            .unwrap();
        assert_eq!(params.fee(FeePriority::Normal).unwrap().gas_limit(), Some(1_500));
    }

    #[test]
    fn test_signed_transfer_contains_destination_and_amount() {
        let signer = AptosSignClient::new(Arc::new(BuiltinCodec::new(Arc::new(LocalKeySigner))));
        let fee = Fee::gas(AssetId::native(Chain::Aptos), FeePriority::Normal, 9, 150, 150);
        let data = ChainSignData::Aptos(AptosChainData {
            sequence: 8,
            fees: vec![fee.clone()],
        });
        let params = native();
        let raw = signer
            .sign_native_transfer(&params, &data, params.amount, &fee, &[2u8; 32])
            .unwrap();
        let bytes = &raw[0];
        let recipient = bcs_address(RECIPIENT).unwrap();
        assert!(bytes.windows(32).any(|w| w == recipient));
        let amount = (params.amount as u64).to_le_bytes();
        assert!(bytes.windows(8).any(|w| w == amount));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_transaction_state(None).state, TransactionState::Pending);
        let pending = AptosTransactionInfo {
            kind: "pending_transaction".into(),
            success: None,
            vm_status: None,
            gas_used: None,
            gas_unit_price: None,
        };
        assert_eq!(map_transaction_state(Some(&pending)).state, TransactionState::Pending);
        let failed = AptosTransactionInfo {
            kind: "user_transaction".into(),
            success: Some(false),
            vm_status: Some("Move abort".into()),
            gas_used: Some("9".into()),
            gas_unit_price: Some("100".into()),
        };
        let changes = map_transaction_state(Some(&failed));
        assert_eq!(changes.state, TransactionState::Reverted);
        assert_eq!(changes.fee, Some(900));
    }
}
