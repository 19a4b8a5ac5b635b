//! Near：access key nonce + 最新区块哈希 + gas 价格

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;

use crate::{
    codec::{CryptoCodec, NearAction, NearTransaction, SigningInput},
    domain::{
        mask_address, Account, AssetId, Chain, ChainSignData, Fee, FeePriority, NativeTransfer,
        NearChainData, SignerParams, TokenTransfer, TransactionChanges,
        TransactionState, TransactionStateRequest, TransactionType, TransferParams,
    },
    error::{ChainError, ChainResult},
    infrastructure::{rpc_client::status_error, RpcClient},
    service::{
        clients::{BroadcastClient, SignClient, SignerPreloader, TransactionStatusClient},
        node_status::{BlockInfo, LatestBlock},
    },
};

/// 原生转账消耗的 gas（0.45 Tgas）
pub const TRANSFER_GAS: u128 = 450_000_000_000;
/// `ft_transfer` 附带的 gas（30 Tgas）
pub const FT_TRANSFER_GAS: u64 = 30_000_000_000_000;
/// NEP-141 要求附带 1 yoctoNEAR
const ONE_YOCTO: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NearAccessKey {
    pub public_key: String,
    pub nonce: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NearExecution {
    Success,
    Failure(String),
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NearOutcome {
    pub execution: NearExecution,
    /// 交易与所有 receipt 燃烧的 yoctoNEAR 之和
    pub tokens_burnt: u128,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NearNodeStatus {
    pub chain_id: String,
    pub latest_block_height: u64,
    pub syncing: bool,
}

#[async_trait]
pub trait NearRpc: Send + Sync {
    /// 账户的全权限 access key。账户不存在时为 `AccountNotFound`
    async fn access_key(&self, account_id: &str) -> ChainResult<NearAccessKey>;

    async fn latest_block_hash(&self) -> ChainResult<String>;

    async fn gas_price(&self) -> ChainResult<u128>;

    async fn broadcast(&self, signed_base64: &str) -> ChainResult<String>;

    async fn transaction(&self, hash: &str, sender: &str) -> ChainResult<Option<NearOutcome>>;

    async fn status(&self) -> ChainResult<NearNodeStatus>;
}

// ---------------------------------------------------------------- HTTP 适配器

#[derive(Debug, Deserialize)]
struct NearError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    cause: Option<NearErrorCause>,
}

#[derive(Debug, Deserialize)]
struct NearErrorCause {
    name: String,
}

impl NearError {
    fn cause(&self) -> Option<&str> {
        self.cause.as_ref().map(|c| c.name.as_str())
    }

    fn describe(&self) -> String {
        match &self.data {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => self.message.clone(),
        }
    }
}

#[derive(Deserialize)]
struct AccessKeyList {
    keys: Vec<AccessKeyEntry>,
}

#[derive(Deserialize)]
struct AccessKeyEntry {
    public_key: String,
    access_key: AccessKeyBody,
}

#[derive(Deserialize)]
struct AccessKeyBody {
    nonce: u64,
    permission: serde_json::Value,
}

#[derive(Deserialize)]
struct BlockResponse {
    header: BlockHeader,
}

#[derive(Deserialize)]
struct BlockHeader {
    hash: String,
}

#[derive(Deserialize)]
struct GasPrice {
    gas_price: String,
}

#[derive(Deserialize)]
struct OutcomeBody {
    tokens_burnt: String,
}

#[derive(Deserialize)]
struct OutcomeWrapper {
    outcome: OutcomeBody,
}

#[derive(Deserialize)]
struct TxStatus {
    status: serde_json::Value,
    transaction_outcome: OutcomeWrapper,
    #[serde(default)]
    receipts_outcome: Vec<OutcomeWrapper>,
}

#[derive(Deserialize)]
struct SyncInfo {
    latest_block_height: u64,
    syncing: bool,
}

#[derive(Deserialize)]
struct StatusResponse {
    chain_id: String,
    sync_info: SyncInfo,
}

fn parse_yocto(value: &str) -> ChainResult<u128> {
    value
        .parse()
        .map_err(|_| ChainError::rpc(format!("invalid yocto amount {}", value)))
}

/// `{"SuccessValue": ..}` / `{"SuccessReceiptId": ..}` / `{"Failure": ..}`，其余视为未完成
fn execution_from_status(status: &serde_json::Value) -> NearExecution {
    if let Some(failure) = status.get("Failure") {
        return NearExecution::Failure(failure.to_string());
    }
    if status.get("SuccessValue").is_some() || status.get("SuccessReceiptId").is_some() {
        return NearExecution::Success;
    }
    NearExecution::Pending
}

pub struct HttpNearRpc {
    client: RpcClient,
}

impl HttpNearRpc {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
        retry: bool,
    ) -> ChainResult<Result<T, NearError>> {
        let payload = json!({
            "jsonrpc": "2.0",
            "id": "chainbridge",
            "method": method,
            "params": params,
        });
        let response = self.client.post_raw("", &payload, retry).await?;
        let body: serde_json::Value = match serde_json::from_str(&response.body) {
            Ok(body) => body,
            Err(_) => return Err(status_error(response.status, &response.body)),
        };
        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            return Ok(Err(serde_json::from_value(error.clone())?));
        }
        let result = body.get("result").cloned().unwrap_or(serde_json::Value::Null);
        Ok(Ok(serde_json::from_value(result)?))
    }

    async fn query<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> ChainResult<T> {
        self.call(method, params, true)
            .await?
            .map_err(|e| ChainError::rpc(format!("{}: {}", method, e.describe())))
    }
}

#[async_trait]
impl NearRpc for HttpNearRpc {
    async fn access_key(&self, account_id: &str) -> ChainResult<NearAccessKey> {
        let params = json!({
            "request_type": "view_access_key_list",
            "finality": "final",
            "account_id": account_id,
        });
        let list: AccessKeyList = match self.call("query", params, true).await? {
            Ok(list) => list,
            Err(e) if e.cause() == Some("UNKNOWN_ACCOUNT") => {
                return Err(ChainError::account_not_found(Chain::Near, account_id))
            }
            Err(e) => return Err(ChainError::rpc(e.describe())),
        };
        list.keys
            .into_iter()
            .find(|k| k.access_key.permission == json!("FullAccess"))
            .map(|k| NearAccessKey {
                public_key: k.public_key,
                nonce: k.access_key.nonce,
            })
            .ok_or_else(|| ChainError::insufficient(format!("{} has no full access key", account_id)))
    }

    async fn latest_block_hash(&self) -> ChainResult<String> {
        let block: BlockResponse = self.query("block", json!({ "finality": "final" })).await?;
        Ok(block.header.hash)
    }

    async fn gas_price(&self) -> ChainResult<u128> {
        let price: GasPrice = self.query("gas_price", json!([null])).await?;
        parse_yocto(&price.gas_price)
    }

    async fn broadcast(&self, signed_base64: &str) -> ChainResult<String> {
        self.call("broadcast_tx_async", json!([signed_base64]), false)
            .await?
            .map_err(|e| ChainError::rejected(Chain::Near, e.describe()))
    }

    async fn transaction(&self, hash: &str, sender: &str) -> ChainResult<Option<NearOutcome>> {
        let status: TxStatus = match self.call("tx", json!([hash, sender]), true).await? {
            Ok(status) => status,
            Err(e) if e.cause() == Some("UNKNOWN_TRANSACTION") => return Ok(None),
            Err(e) => return Err(ChainError::rpc(e.describe())),
        };
        let mut tokens_burnt = parse_yocto(&status.transaction_outcome.outcome.tokens_burnt)?;
        for receipt in &status.receipts_outcome {
            tokens_burnt += parse_yocto(&receipt.outcome.tokens_burnt)?;
        }
        Ok(Some(NearOutcome {
            execution: execution_from_status(&status.status),
            tokens_burnt,
        }))
    }

    async fn status(&self) -> ChainResult<NearNodeStatus> {
        let status: StatusResponse = self.query("status", json!([])).await?;
        Ok(NearNodeStatus {
            chain_id: status.chain_id,
            latest_block_height: status.sync_info.latest_block_height,
            syncing: status.sync_info.syncing,
        })
    }
}

#[async_trait]
impl LatestBlock for HttpNearRpc {
    async fn latest_block(&self) -> ChainResult<BlockInfo> {
        let status = self.status().await?;
        Ok(BlockInfo {
            chain_id: status.chain_id,
            number: status.latest_block_height,
            in_sync: !status.syncing,
        })
    }
}

// ---------------------------------------------------------------- 预加载 / 广播 / 状态

pub struct NearClient {
    rpc: Arc<dyn NearRpc>,
}

impl NearClient {
    pub fn new(rpc: Arc<dyn NearRpc>) -> Self {
        Self { rpc }
    }

    async fn preload(&self, input: TransferParams, gas: u128) -> ChainResult<SignerParams> {
        let account_id = input.from().address.clone();
        let (key, block_hash, gas_price) = tokio::try_join!(
            self.rpc.access_key(&account_id),
            self.rpc.latest_block_hash(),
            self.rpc.gas_price(),
        )?;
        let nonce = key.nonce + 1;
        tracing::info!(
            chain = %Chain::Near,
            sender = %mask_address(&account_id),
            nonce,
            "Near preload complete"
        );
        Ok(SignerParams::new(
            input,
            ChainSignData::Near(NearChainData {
                nonce,
                block_hash,
                fee: Fee::gas(AssetId::native(Chain::Near), FeePriority::Normal, gas, gas_price, gas_price),
            }),
        ))
    }
}

#[async_trait]
impl SignerPreloader for NearClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Near
    }

    async fn preload_native_transfer(&self, params: &NativeTransfer) -> ChainResult<SignerParams> {
        self.preload(TransferParams::Native(params.clone()), TRANSFER_GAS).await
    }

    async fn preload_token_transfer(&self, params: &TokenTransfer) -> ChainResult<SignerParams> {
        self.preload(TransferParams::Token(params.clone()), u128::from(FT_TRANSFER_GAS))
            .await
    }
}

#[async_trait]
impl BroadcastClient for NearClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Near
    }

    async fn send(&self, account: &Account, signed: &[u8], tx_type: TransactionType) -> ChainResult<String> {
        let encoded = base64::engine::general_purpose::STANDARD.encode(signed);
        let hash = self.rpc.broadcast(&encoded).await?;
        tracing::info!(
            chain = %Chain::Near,
            sender = %mask_address(&account.address),
            tx_type = ?tx_type,
            hash = %hash,
            "Near transaction broadcast"
        );
        Ok(hash)
    }
}

pub fn map_outcome(outcome: Option<&NearOutcome>) -> TransactionChanges {
    match outcome {
        None => TransactionChanges::pending(),
        Some(NearOutcome {
            execution: NearExecution::Pending,
            ..
        }) => TransactionChanges::pending(),
        Some(NearOutcome {
            execution: NearExecution::Success,
            tokens_burnt,
        }) => TransactionChanges::new(TransactionState::Confirmed).with_fee(*tokens_burnt),
        Some(NearOutcome {
            execution: NearExecution::Failure(_),
            tokens_burnt,
        }) => TransactionChanges::new(TransactionState::Reverted).with_fee(*tokens_burnt),
    }
}

#[async_trait]
impl TransactionStatusClient for NearClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Near
    }

    async fn get_status(&self, request: &TransactionStateRequest) -> ChainResult<TransactionChanges> {
        let outcome = self.rpc.transaction(&request.hash, &request.sender).await?;
        Ok(map_outcome(outcome.as_ref()))
    }
}

// ---------------------------------------------------------------- 签名

pub struct NearSignClient {
    codec: Arc<dyn CryptoCodec>,
}

impl NearSignClient {
    pub fn new(codec: Arc<dyn CryptoCodec>) -> Self {
        Self { codec }
    }

    fn sign(
        &self,
        chain_data: &ChainSignData,
        signer_id: &str,
        receiver_id: &str,
        action: NearAction,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let data = crate::expect_chain_data!(chain_data, Near);
        let tx = NearTransaction {
            signer_id: signer_id.to_string(),
            receiver_id: receiver_id.to_string(),
            nonce: data.nonce,
            block_hash: data.block_hash.clone(),
            actions: vec![action],
        };
        Ok(vec![self.codec.encode(&SigningInput::Near(tx), private_key)?])
    }
}

pub fn ft_transfer_action(receiver_id: &str, amount: u128, memo: Option<&str>) -> NearAction {
    let mut args = json!({ "receiver_id": receiver_id, "amount": amount.to_string() });
    if let Some(memo) = memo.filter(|m| !m.is_empty()) {
        args["memo"] = json!(memo);
    }
    NearAction::FunctionCall {
        method_name: "ft_transfer".into(),
        args: args.to_string(),
        gas: FT_TRANSFER_GAS,
        deposit: ONE_YOCTO.into(),
    }
}

impl SignClient for NearSignClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Near
    }

    fn sign_native_transfer(
        &self,
        params: &NativeTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        _fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let action = NearAction::Transfer {
            deposit: final_amount.to_string(),
        };
        self.sign(chain_data, &params.from.address, &params.destination, action, private_key)
    }

    fn sign_token_transfer(
        &self,
        params: &TokenTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        _fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let contract = params
            .asset_id
            .token_id
            .as_deref()
            .ok_or_else(|| ChainError::precondition("token transfer without contract"))?;
        let action = ft_transfer_action(&params.destination, final_amount, params.memo.as_deref());
        self.sign(chain_data, &params.from.address, contract, action, private_key)
    }

    fn sign_message(&self, chain: Chain, message: &[u8], private_key: &[u8]) -> ChainResult<Vec<u8>> {
        self.codec.sign_message(chain, message, private_key)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::*;
    use crate::{
        codec::{envelope, BuiltinCodec},
        infrastructure::LocalKeySigner,
    };

    const SENDER: &str = "alice.near";
    const RECIPIENT: &str = "bob.near";
    const USDC: &str = "17208628f84f5d6ad33f0da3bbbeb27ffcb398eac501a31bd6ad2011e36133a1";

    struct MockNearRpc {
        nonce: AtomicU64,
        exists: bool,
    }

    impl MockNearRpc {
        fn new(nonce: u64) -> Self {
            Self {
                nonce: AtomicU64::new(nonce),
                exists: true,
            }
        }
    }

    #[async_trait]
    impl NearRpc for MockNearRpc {
        async fn access_key(&self, account_id: &str) -> ChainResult<NearAccessKey> {
            if !self.exists {
                return Err(ChainError::account_not_found(Chain::Near, account_id));
            }
            Ok(NearAccessKey {
                public_key: "ed25519:8Rn4FJeeRYcrLbcrAQNFVgvbZ2FCEQjgydbXwqBwF1ib".into(),
                nonce: self.nonce.load(Ordering::SeqCst),
            })
        }

        async fn latest_block_hash(&self) -> ChainResult<String> {
            Ok("CDS8ZGzCHVtfuUxRL2dPizV2wCwkTS2mMjE4tuEvGTak".into())
        }

        async fn gas_price(&self) -> ChainResult<u128> {
            Ok(100_000_000)
        }

        async fn broadcast(&self, _signed_base64: &str) -> ChainResult<String> {
            Ok("HASH".into())
        }

        async fn transaction(&self, _hash: &str, _sender: &str) -> ChainResult<Option<NearOutcome>> {
            Ok(None)
        }

        async fn status(&self) -> ChainResult<NearNodeStatus> {
            Ok(NearNodeStatus {
                chain_id: "mainnet".into(),
                latest_block_height: 1,
                syncing: false,
            })
        }
    }

    fn transfer() -> NativeTransfer {
        NativeTransfer {
            from: Account::new(Chain::Near, SENDER, ""),
            destination: RECIPIENT.into(),
            amount: 1_000_000_000_000_000_000_000_000,
            memo: None,
            is_max_amount: false,
        }
    }

    /// Test 1: 下一个 nonce = access key nonce + 1
    #[tokio::test]
    async fn test_next_nonce() {
        let client = NearClient::new(Arc::new(MockNearRpc::new(112_233_000_041)));
        let params = client.preload_native_transfer(&transfer()).await.unwrap();
        assert_eq!(params.chain_data.sequence(), Some(112_233_000_042));
        let fee = params.fee(FeePriority::Normal).unwrap();
        assert_eq!(fee.amount, 45_000_000_000_000_000_000);
    }

    #[tokio::test]
    async fn test_missing_account() {
        let client = NearClient::new(Arc::new(MockNearRpc {
            nonce: AtomicU64::new(0),
            exists: false,
        }));
        let err = client.preload_native_transfer(&transfer()).await.unwrap_err();
        assert!(matches!(err, ChainError::AccountNotFound { chain: Chain::Near, .. }));
    }

    /// Test 2: 代币转账为对合约的 ft_transfer 调用
    #[tokio::test]
    async fn test_token_transfer_calls_contract() {
        let client = NearClient::new(Arc::new(MockNearRpc::new(7)));
        let transfer = TokenTransfer {
            from: Account::new(Chain::Near, SENDER, ""),
            destination: RECIPIENT.into(),
            asset_id: AssetId::token(Chain::Near, USDC),
            amount: 2_500_000,
            memo: Some("thanks".into()),
            is_max_amount: false,
        };
        let params = client.preload_token_transfer(&transfer).await.unwrap();
        let fee = params.fee(FeePriority::Normal).unwrap().clone();
        let codec: Arc<dyn CryptoCodec> = Arc::new(BuiltinCodec::new(Arc::new(LocalKeySigner)));
        let signed = NearSignClient::new(codec)
            .sign_token_transfer(&transfer, &params.chain_data, transfer.amount, &fee, &[2u8; 32])
            .unwrap();
        let envelope: envelope::SignedEnvelope<NearTransaction> = envelope::open(Chain::Near, &signed[0]).unwrap();
        assert_eq!(envelope.input.receiver_id, USDC);
        assert_eq!(envelope.input.nonce, 8);
        let NearAction::FunctionCall { method_name, args, deposit, .. } = &envelope.input.actions[0] else {
            panic!("expected function call");
        };
        assert_eq!(method_name, "ft_transfer");
        assert_eq!(deposit, "1");
        let args: serde_json::Value = serde_json::from_str(args).unwrap();
        assert_eq!(args["receiver_id"], RECIPIENT);
        assert_eq!(args["amount"], "2500000");
        assert_eq!(args["memo"], "thanks");
    }

    #[test]
    fn test_execution_status() {
        assert_eq!(execution_from_status(&json!({ "SuccessValue": "" })), NearExecution::Success);
        assert!(matches!(
            execution_from_status(&json!({ "Failure": { "ActionError": {} } })),
            NearExecution::Failure(_)
        ));
        assert_eq!(execution_from_status(&json!("Started")), NearExecution::Pending);

        let outcome = NearOutcome {
            execution: NearExecution::Success,
            tokens_burnt: 223_182_562_500_000_000_000,
        };
        let changes = map_outcome(Some(&outcome));
        assert_eq!(changes.state, TransactionState::Confirmed);
        assert_eq!(changes.fee, Some(223_182_562_500_000_000_000));
        assert_eq!(map_outcome(None).state, TransactionState::Pending);
    }
}
