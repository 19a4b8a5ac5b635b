//! XRP Ledger：account_info + fee
//!
//! rippled 的业务错误放在 `result.error` 中（HTTP 200），需要逐个方法解析。
//! 代币 id 格式为 `<currency>.<issuer>`；memo 为纯数字时作为 destination tag。

use std::sync::Arc;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;

use crate::{
    codec::{CryptoCodec, SigningInput, XrpAmount, XrpTransaction},
    domain::{
        mask_address, Account, AssetId, Chain, ChainSignData, Fee, FeePriority, NativeTransfer,
        SignerParams, SwapTransfer, TokenTransfer, TransactionChanges, TransactionState,
        TransactionStateRequest, TransactionType, TransferParams, XrpChainData,
    },
    error::{ChainError, ChainResult},
    infrastructure::RpcClient,
    service::{
        clients::{BroadcastClient, SignClient, SignerPreloader, TransactionStatusClient},
        node_status::{BlockInfo, LatestBlock},
    },
};

/// LastLedgerSequence = 当前账本 + 12
pub const LEDGER_OFFSET: u32 = 12;
/// 发行代币金额按 15 位小数表示
pub const ISSUED_TOKEN_DECIMALS: u32 = 15;
const ACCOUNT_NOT_FOUND: &str = "actNotFound";
const TX_NOT_FOUND: &str = "txnNotFound";
const ACCEPTED_RESULTS: [&str; 2] = ["tesSUCCESS", "terQUEUED"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XrpFeeInfo {
    pub median_fee: u64,
    pub ledger_current_index: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct XrpTransactionMeta {
    pub transaction_result: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct XrpTransactionResult {
    #[serde(default)]
    pub validated: bool,
    #[serde(default, rename = "Fee")]
    pub fee: Option<String>,
    #[serde(default)]
    pub meta: Option<XrpTransactionMeta>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct XrpSubmitResult {
    pub engine_result: String,
    #[serde(default)]
    pub engine_result_message: String,
    #[serde(default)]
    pub tx_json: Option<XrpTxJson>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct XrpTxJson {
    pub hash: String,
}

#[async_trait]
pub trait XrpRpc: Send + Sync {
    async fn account_sequence(&self, address: &str) -> ChainResult<u32>;

    async fn fee(&self) -> ChainResult<XrpFeeInfo>;

    async fn submit(&self, tx_blob: &str) -> ChainResult<XrpSubmitResult>;

    async fn transaction(&self, hash: &str) -> ChainResult<Option<XrpTransactionResult>>;

    async fn server_state(&self) -> ChainResult<(String, u64, String)>;
}

// ---------------------------------------------------------------- HTTP 适配器

#[derive(Deserialize)]
struct Envelope {
    result: serde_json::Value,
}

#[derive(Deserialize)]
struct RippledError {
    error: String,
    #[serde(default)]
    error_message: Option<String>,
}

enum Rippled<T> {
    Ok(T),
    Err(RippledError),
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AccountData {
    sequence: u32,
}

#[derive(Deserialize)]
struct AccountInfo {
    account_data: AccountData,
}

#[derive(Deserialize)]
struct Drops {
    median_fee: String,
}

#[derive(Deserialize)]
struct FeeResult {
    drops: Drops,
    ledger_current_index: u32,
}

#[derive(Deserialize)]
struct ValidatedLedger {
    seq: u64,
}

#[derive(Deserialize)]
struct ServerInfo {
    #[serde(default)]
    network_id: Option<u64>,
    server_state: String,
    #[serde(default)]
    validated_ledger: Option<ValidatedLedger>,
}

#[derive(Deserialize)]
struct ServerInfoResult {
    info: ServerInfo,
}

pub struct HttpXrpRpc {
    client: RpcClient,
}

impl HttpXrpRpc {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
        retry: bool,
    ) -> ChainResult<Rippled<T>> {
        let body = json!({ "method": method, "params": [params] });
        let response = self.client.post_raw("", &body, retry).await?.error_for_status()?;
        let envelope: Envelope = response.json()?;
        if envelope.result.get("error").is_some() {
            return Ok(Rippled::Err(serde_json::from_value(envelope.result)?));
        }
        Ok(Rippled::Ok(serde_json::from_value(envelope.result)?))
    }

    async fn query<T: DeserializeOwned>(&self, method: &str, params: serde_json::Value) -> ChainResult<T> {
        match self.call(method, params, true).await? {
            Rippled::Ok(value) => Ok(value),
            Rippled::Err(e) => Err(ChainError::rpc(format!(
                "{}: {}",
                method,
                e.error_message.unwrap_or(e.error)
            ))),
        }
    }
}

#[async_trait]
impl XrpRpc for HttpXrpRpc {
    async fn account_sequence(&self, address: &str) -> ChainResult<u32> {
        let params = json!({ "account": address, "ledger_index": "current" });
        match self.call::<AccountInfo>("account_info", params, true).await? {
            Rippled::Ok(info) => Ok(info.account_data.sequence),
            Rippled::Err(e) if e.error == ACCOUNT_NOT_FOUND => {
                Err(ChainError::account_not_found(Chain::Xrp, address))
            }
            Rippled::Err(e) => Err(ChainError::rpc(e.error_message.unwrap_or(e.error))),
        }
    }

    async fn fee(&self) -> ChainResult<XrpFeeInfo> {
        let result: FeeResult = self.query("fee", json!({})).await?;
        Ok(XrpFeeInfo {
            median_fee: result
                .drops
                .median_fee
                .parse()
                .map_err(|_| ChainError::rpc("invalid median fee"))?,
            ledger_current_index: result.ledger_current_index,
        })
    }

    async fn submit(&self, tx_blob: &str) -> ChainResult<XrpSubmitResult> {
        match self.call("submit", json!({ "tx_blob": tx_blob }), false).await? {
            Rippled::Ok(result) => Ok(result),
            Rippled::Err(e) => Err(ChainError::rejected(Chain::Xrp, e.error_message.unwrap_or(e.error))),
        }
    }

    async fn transaction(&self, hash: &str) -> ChainResult<Option<XrpTransactionResult>> {
        match self.call("tx", json!({ "transaction": hash }), true).await? {
            Rippled::Ok(result) => Ok(Some(result)),
            Rippled::Err(e) if e.error == TX_NOT_FOUND => Ok(None),
            Rippled::Err(e) => Err(ChainError::rpc(e.error_message.unwrap_or(e.error))),
        }
    }

    async fn server_state(&self) -> ChainResult<(String, u64, String)> {
        let result: ServerInfoResult = self.query("server_info", json!({})).await?;
        let info = result.info;
        Ok((
            info.network_id.unwrap_or(0).to_string(),
            info.validated_ledger.map(|l| l.seq).unwrap_or(0),
            info.server_state,
        ))
    }
}

#[async_trait]
impl LatestBlock for HttpXrpRpc {
    async fn latest_block(&self) -> ChainResult<BlockInfo> {
        let (chain_id, number, state) = self.server_state().await?;
        Ok(BlockInfo {
            chain_id,
            number,
            in_sync: matches!(state.as_str(), "full" | "proposing" | "validating"),
        })
    }
}

// ---------------------------------------------------------------- 预加载 / 广播 / 状态

pub struct XrpClient {
    rpc: Arc<dyn XrpRpc>,
}

impl XrpClient {
    pub fn new(rpc: Arc<dyn XrpRpc>) -> Self {
        Self { rpc }
    }

    async fn preload(&self, input: TransferParams) -> ChainResult<SignerParams> {
        let address = input.from().address.clone();
        let (sequence, fee) = tokio::try_join!(self.rpc.account_sequence(&address), self.rpc.fee())?;
        tracing::info!(
            chain = %Chain::Xrp,
            sender = %mask_address(&address),
            sequence,
            ledger = fee.ledger_current_index,
            "XRP preload complete"
        );
        Ok(SignerParams::new(
            input,
            ChainSignData::Xrp(XrpChainData {
                sequence,
                last_ledger_sequence: Some(fee.ledger_current_index + LEDGER_OFFSET),
                fee: Fee::new(
                    AssetId::native(Chain::Xrp),
                    FeePriority::Normal,
                    u128::from(fee.median_fee),
                ),
            }),
        ))
    }
}

#[async_trait]
impl SignerPreloader for XrpClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Xrp
    }

    async fn preload_native_transfer(&self, params: &NativeTransfer) -> ChainResult<SignerParams> {
        self.preload(TransferParams::Native(params.clone())).await
    }

    async fn preload_token_transfer(&self, params: &TokenTransfer) -> ChainResult<SignerParams> {
        self.preload(TransferParams::Token(params.clone())).await
    }

    async fn preload_swap(&self, params: &SwapTransfer) -> ChainResult<SignerParams> {
        self.preload(TransferParams::Swap(params.clone())).await
    }
}

#[async_trait]
impl BroadcastClient for XrpClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Xrp
    }

    async fn send(&self, account: &Account, signed: &[u8], tx_type: TransactionType) -> ChainResult<String> {
        let result = self.rpc.submit(&hex::encode_upper(signed)).await?;
        if !ACCEPTED_RESULTS.contains(&result.engine_result.as_str()) {
            return Err(ChainError::rejected(Chain::Xrp, result.engine_result_message));
        }
        let hash = result
            .tx_json
            .map(|tx| tx.hash)
            .ok_or_else(|| ChainError::rpc("submit response without hash"))?;
        tracing::info!(
            chain = %Chain::Xrp,
            sender = %mask_address(&account.address),
            tx_type = ?tx_type,
            hash = %hash,
            "XRP transaction broadcast"
        );
        Ok(hash)
    }
}

pub fn map_transaction(result: Option<&XrpTransactionResult>) -> TransactionChanges {
    let Some(result) = result.filter(|r| r.validated) else {
        return TransactionChanges::pending();
    };
    let success = result
        .meta
        .as_ref()
        .is_some_and(|m| m.transaction_result == "tesSUCCESS");
    let state = if success {
        TransactionState::Confirmed
    } else {
        TransactionState::Reverted
    };
    let changes = TransactionChanges::new(state);
    match result.fee.as_deref().and_then(|f| f.parse::<u128>().ok()) {
        Some(fee) => changes.with_fee(fee),
        None => changes,
    }
}

#[async_trait]
impl TransactionStatusClient for XrpClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Xrp
    }

    async fn get_status(&self, request: &TransactionStateRequest) -> ChainResult<TransactionChanges> {
        let result = self.rpc.transaction(&request.hash).await?;
        Ok(map_transaction(result.as_ref()))
    }
}

// ---------------------------------------------------------------- 签名

/// 三字符以上的币种代码按 40 位十六进制编码
pub fn currency_code(symbol: &str) -> String {
    if symbol.len() == 3 {
        return symbol.to_string();
    }
    let mut code = hex::encode_upper(symbol.as_bytes());
    while code.len() < 40 {
        code.push('0');
    }
    code
}

/// 最小单位金额 -> 十进制字符串（去掉末尾的 0）
pub fn issued_value(amount: u128) -> String {
    let scale = 10u128.pow(ISSUED_TOKEN_DECIMALS);
    let whole = amount / scale;
    let fraction = amount % scale;
    if fraction == 0 {
        return whole.to_string();
    }
    let fraction = format!("{:0width$}", fraction, width = ISSUED_TOKEN_DECIMALS as usize);
    format!("{}.{}", whole, fraction.trim_end_matches('0'))
}

fn destination_tag(memo: Option<&str>) -> Option<u32> {
    memo.and_then(|m| m.trim().parse().ok())
}

pub struct XrpSignClient {
    codec: Arc<dyn CryptoCodec>,
}

impl XrpSignClient {
    pub fn new(codec: Arc<dyn CryptoCodec>) -> Self {
        Self { codec }
    }

    #[allow(clippy::too_many_arguments)]
    fn sign(
        &self,
        chain_data: &ChainSignData,
        account: &str,
        destination: &str,
        amount: XrpAmount,
        fee: &Fee,
        destination_tag: Option<u32>,
        memo: Option<String>,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let data = crate::expect_chain_data!(chain_data, Xrp);
        let tx = XrpTransaction {
            account: account.to_string(),
            destination: destination.to_string(),
            amount,
            fee: fee.amount.to_string(),
            sequence: data.sequence,
            last_ledger_sequence: data.last_ledger_sequence,
            destination_tag,
            memo,
        };
        Ok(vec![self.codec.encode(&SigningInput::Xrp(tx), private_key)?])
    }
}

impl SignClient for XrpSignClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Xrp
    }

    fn sign_native_transfer(
        &self,
        params: &NativeTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        self.sign(
            chain_data,
            &params.from.address,
            &params.destination,
            XrpAmount::Drops(final_amount.to_string()),
            fee,
            destination_tag(params.memo.as_deref()),
            None,
            private_key,
        )
    }

    fn sign_token_transfer(
        &self,
        params: &TokenTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let token_id = params
            .asset_id
            .token_id
            .as_deref()
            .ok_or_else(|| ChainError::precondition("token transfer without issuer"))?;
        let (currency, issuer) = token_id
            .split_once('.')
            .ok_or_else(|| ChainError::precondition(format!("invalid xrp token id {}", token_id)))?;
        let amount = XrpAmount::Issued {
            currency: currency_code(currency),
            issuer: issuer.to_string(),
            value: issued_value(final_amount),
        };
        self.sign(
            chain_data,
            &params.from.address,
            &params.destination,
            amount,
            fee,
            destination_tag(params.memo.as_deref()),
            None,
            private_key,
        )
    }

    /// 仅支持以 memo 携带指令的跨链兑换（THORChain）
    fn sign_swap(
        &self,
        params: &SwapTransfer,
        chain_data: &ChainSignData,
        _final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        if params.protocol_id != "thorchain" {
            return Err(ChainError::precondition(format!(
                "swap provider {} is not supported on XRP",
                params.protocol_id
            )));
        }
        self.sign(
            chain_data,
            &params.from.address,
            &params.to,
            XrpAmount::Drops(params.value.to_string()),
            fee,
            None,
            Some(params.swap_payload.clone()),
            private_key,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{envelope, BuiltinCodec},
        infrastructure::LocalKeySigner,
    };

    const SENDER: &str = "rPEPPER7kfTD9w2To4CQk6UCfuHM9c6GDY";
    const RECIPIENT: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";

    struct MockXrpRpc {
        exists: bool,
        engine_result: &'static str,
    }

    #[async_trait]
    impl XrpRpc for MockXrpRpc {
        async fn account_sequence(&self, address: &str) -> ChainResult<u32> {
            if self.exists {
                Ok(88_123_456)
            } else {
                Err(ChainError::account_not_found(Chain::Xrp, address))
            }
        }

        async fn fee(&self) -> ChainResult<XrpFeeInfo> {
            Ok(XrpFeeInfo {
                median_fee: 5_000,
                ledger_current_index: 91_000_000,
            })
        }

        async fn submit(&self, _tx_blob: &str) -> ChainResult<XrpSubmitResult> {
            Ok(XrpSubmitResult {
                engine_result: self.engine_result.into(),
                engine_result_message: "Ledger sequence too high.".into(),
                tx_json: Some(XrpTxJson { hash: "HASH".into() }),
            })
        }

        async fn transaction(&self, _hash: &str) -> ChainResult<Option<XrpTransactionResult>> {
            Ok(None)
        }

        async fn server_state(&self) -> ChainResult<(String, u64, String)> {
            Ok(("0".into(), 1, "full".into()))
        }
    }

    fn transfer(memo: Option<&str>) -> NativeTransfer {
        NativeTransfer {
            from: Account::new(Chain::Xrp, SENDER, ""),
            destination: RECIPIENT.into(),
            amount: 10_000_000,
            memo: memo.map(str::to_string),
            is_max_amount: false,
        }
    }

    /// Test 1: 未激活账户返回 AccountNotFound
    #[tokio::test]
    async fn test_account_not_found() {
        let client = XrpClient::new(Arc::new(MockXrpRpc {
            exists: false,
            engine_result: "tesSUCCESS",
        }));
        let err = client.preload_native_transfer(&transfer(None)).await.unwrap_err();
        assert!(matches!(err, ChainError::AccountNotFound { chain: Chain::Xrp, .. }));
    }

    /// Test 2: preload -> sign，memo 为数字时成为 destination tag
    #[tokio::test]
    async fn test_preload_sign_with_destination_tag() {
        let client = XrpClient::new(Arc::new(MockXrpRpc {
            exists: true,
            engine_result: "tesSUCCESS",
        }));
        let transfer = transfer(Some("123456"));
        let params = client.preload_native_transfer(&transfer).await.unwrap();
        let fee = params.fee(FeePriority::Normal).unwrap().clone();
        assert_eq!(fee.amount, 5_000);

        let codec: Arc<dyn CryptoCodec> = Arc::new(BuiltinCodec::new(Arc::new(LocalKeySigner)));
        let signed = XrpSignClient::new(codec)
            .sign_native_transfer(&transfer, &params.chain_data, transfer.amount, &fee, &[6u8; 32])
            .unwrap();
        let envelope: envelope::SignedEnvelope<XrpTransaction> = envelope::open(Chain::Xrp, &signed[0]).unwrap();
        assert_eq!(envelope.input.sequence, 88_123_456);
        assert_eq!(envelope.input.last_ledger_sequence, Some(91_000_012));
        assert_eq!(envelope.input.destination_tag, Some(123_456));
        assert_eq!(envelope.input.amount, XrpAmount::Drops("10000000".into()));
        assert_eq!(envelope.input.fee, "5000");
    }

    #[test]
    fn test_non_numeric_memo_has_no_tag() {
        assert_eq!(destination_tag(Some("hello")), None);
        assert_eq!(destination_tag(None), None);
    }

    #[tokio::test]
    async fn test_engine_failure_is_rejection() {
        let client = XrpClient::new(Arc::new(MockXrpRpc {
            exists: true,
            engine_result: "tefMAX_LEDGER",
        }));
        let err = client
            .send(&Account::new(Chain::Xrp, SENDER, ""), &[0x12, 0x00], TransactionType::Transfer)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Ledger sequence too high.");
    }

    #[test]
    fn test_issued_amount_formatting() {
        assert_eq!(issued_value(1_500_000_000_000_000), "1.5");
        assert_eq!(issued_value(2_000_000_000_000_000), "2");
        assert_eq!(currency_code("USD"), "USD");
        assert_eq!(currency_code("RLUSD"), "524C555344000000000000000000000000000000");
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_transaction(None).state, TransactionState::Pending);
        let mut result = XrpTransactionResult {
            validated: false,
            fee: Some("12".into()),
            meta: Some(XrpTransactionMeta {
                transaction_result: "tesSUCCESS".into(),
            }),
        };
        assert_eq!(map_transaction(Some(&result)).state, TransactionState::Pending);
        result.validated = true;
        let changes = map_transaction(Some(&result));
        assert_eq!(changes.state, TransactionState::Confirmed);
        assert_eq!(changes.fee, Some(12));
        result.meta = Some(XrpTransactionMeta {
            transaction_result: "tecPATH_DRY".into(),
        });
        assert_eq!(map_transaction(Some(&result)).state, TransactionState::Reverted);
    }
}
