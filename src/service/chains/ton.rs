//! TON：sequence + jetton 子钱包模型
//!
//! 代币转账需要先解析发送方的 jetton 子钱包地址；手续费附加项取决于收款方
//! jetton 钱包是否已激活（创建 / 充值 / 带备注充值三档）。

use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;

use crate::{
    codec::{CryptoCodec, JettonTransferBody, SigningInput, TonMessage, TonTransfer},
    config::JettonActivitySignal,
    domain::{
        mask_address, Account, AssetId, Chain, ChainSignData, Fee, FeeOption, FeePriority,
        NativeTransfer, SignerParams, SwapTransfer, TokenTransfer, TonChainData,
        TransactionChanges, TransactionState, TransactionStateRequest, TransactionType,
        TransferParams,
    },
    error::{ChainError, ChainResult},
    infrastructure::{query_escape, rpc_client::status_error, HttpResponse, RpcClient},
    service::{
        clients::{BroadcastClient, SignClient, SignerPreloader, TransactionStatusClient},
        node_status::{BlockInfo, LatestBlock},
    },
};

pub const NATIVE_TRANSFER_FEE: u128 = 10_000_000;
/// 收款方 jetton 钱包未激活，需要创建
pub const JETTON_ACCOUNT_CREATE_FEE: u128 = 300_000_000;
pub const JETTON_ACCOUNT_TOP_UP_FEE: u128 = 100_000_000;
pub const JETTON_ACCOUNT_TOP_UP_WITH_MEMO_FEE: u128 = 60_000_000;
/// 无附加项时 jetton 消息携带的最小 TON
pub const JETTON_MIN_ATTACHED_AMOUNT: u128 = 50_000_000;

pub const SEND_MODE_PAY_FEES_SEPARATELY: u8 = 1;
pub const SEND_MODE_IGNORE_ACTION_PHASE_ERRORS: u8 = 2;
pub const SEND_MODE_ATTACH_ALL_CONTRACT_BALANCE: u8 = 128;
const DEFAULT_SEND_MODE: u8 = SEND_MODE_PAY_FEES_SEPARATELY | SEND_MODE_IGNORE_ACTION_PHASE_ERRORS;
const TRANSFER_ALL_SEND_MODE: u8 = DEFAULT_SEND_MODE | SEND_MODE_ATTACH_ALL_CONTRACT_BALANCE;

const WALLET_VERSION: &str = "v4r2";
const MAINNET_GLOBAL_ID: &str = "-239";

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
pub struct TonWalletInfo {
    /// 未部署的钱包没有 seqno
    #[serde(default)]
    pub seqno: Option<u32>,
    #[serde(default)]
    pub account_state: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TonJettonWallet {
    pub address: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub jetton: String,
    #[serde(default)]
    pub balance: String,
}

/// 交易执行结果摘要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TonTransactionInfo {
    pub hash: String,
    pub aborted: bool,
    pub compute_success: Option<bool>,
    pub action_success: Option<bool>,
    pub bounced: bool,
}

#[async_trait]
pub trait TonRpc: Send + Sync {
    async fn wallet_information(&self, address: &str) -> ChainResult<TonWalletInfo>;

    async fn jetton_wallets(&self, owner: &str, jetton: &str) -> ChainResult<Vec<TonJettonWallet>>;

    async fn address_state(&self, address: &str) -> ChainResult<String>;

    /// 返回外部消息哈希
    async fn send_boc(&self, boc: &str) -> ChainResult<String>;

    async fn transactions_by_message(&self, message_hash: &str) -> ChainResult<Vec<TonTransactionInfo>>;

    async fn masterchain_seqno(&self) -> ChainResult<u64>;
}

// ---------------------------------------------------------------- HTTP 适配器（toncenter）

#[derive(Deserialize)]
struct V2Response<T> {
    ok: bool,
    result: Option<T>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct JettonWalletsResponse {
    #[serde(default)]
    jetton_wallets: Vec<TonJettonWallet>,
}

#[derive(Deserialize)]
struct SendBocResult {
    hash: String,
}

#[derive(Deserialize)]
struct MasterchainInfo {
    last: BlockId,
}

#[derive(Deserialize)]
struct BlockId {
    seqno: u64,
}

#[derive(Deserialize)]
struct TransactionsResponse {
    #[serde(default)]
    transactions: Vec<RawTransaction>,
}

#[derive(Deserialize)]
struct RawTransaction {
    hash: String,
    #[serde(default)]
    description: RawDescription,
    #[serde(default)]
    out_msgs: Vec<RawMessage>,
}

#[derive(Deserialize, Default)]
struct RawDescription {
    #[serde(default)]
    aborted: bool,
    #[serde(default)]
    compute_ph: Option<RawPhase>,
    #[serde(default)]
    action: Option<RawPhase>,
}

#[derive(Deserialize)]
struct RawPhase {
    #[serde(default)]
    success: Option<bool>,
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    bounced: Option<bool>,
}

fn v2_result<T: serde::de::DeserializeOwned>(response: HttpResponse) -> ChainResult<T> {
    let parsed = match response.json::<V2Response<T>>() {
        Ok(parsed) => parsed,
        Err(err) if response.is_success() => return Err(err),
        Err(_) => return Err(status_error(response.status, &response.body)),
    };
    match parsed {
        V2Response {
            ok: true,
            result: Some(result),
            ..
        } => Ok(result),
        _ if !response.is_success() => Err(status_error(response.status, &response.body)),
        V2Response { error, .. } => Err(ChainError::Rpc(
            error.unwrap_or_else(|| "empty toncenter result".into()),
        )),
    }
}

pub struct HttpTonRpc {
    client: RpcClient,
}

impl HttpTonRpc {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl TonRpc for HttpTonRpc {
    async fn wallet_information(&self, address: &str) -> ChainResult<TonWalletInfo> {
        let path = format!("/api/v2/getWalletInformation?address={}", query_escape(address));
        v2_result(self.client.get_raw(&path).await?)
    }

    async fn jetton_wallets(&self, owner: &str, jetton: &str) -> ChainResult<Vec<TonJettonWallet>> {
        let path = format!(
            "/api/v3/jetton/wallets?owner_address={}&jetton_address={}&limit=1",
            query_escape(owner),
            query_escape(jetton)
        );
        let response: JettonWalletsResponse = self.client.get_json(&path).await?;
        Ok(response.jetton_wallets)
    }

    async fn address_state(&self, address: &str) -> ChainResult<String> {
        let path = format!("/api/v2/getAddressState?address={}", query_escape(address));
        v2_result(self.client.get_raw(&path).await?)
    }

    async fn send_boc(&self, boc: &str) -> ChainResult<String> {
        let response = self
            .client
            .post_raw("/api/v2/sendBocReturnHash", &serde_json::json!({ "boc": boc }), false)
            .await?;
        // 节点拒绝消息时返回 ok=false + error，须与网关故障区分
        let gateway_fault = matches!(response.status, 429 | 502 | 503 | 504);
        match response.json::<V2Response<SendBocResult>>() {
            Ok(V2Response {
                ok: true,
                result: Some(result),
                ..
            }) => Ok(result.hash),
            Ok(V2Response {
                error: Some(message),
                ..
            }) if !gateway_fault => Err(ChainError::rejected(Chain::Ton, message)),
            _ if !response.is_success() => Err(status_error(response.status, &response.body)),
            _ => Err(ChainError::rpc("sendBoc returned no hash")),
        }
    }

    async fn transactions_by_message(&self, message_hash: &str) -> ChainResult<Vec<TonTransactionInfo>> {
        let path = format!(
            "/api/v3/transactionsByMessage?msg_hash={}&direction=in",
            query_escape(message_hash)
        );
        let response = self.client.get_raw(&path).await?;
        if response.is_not_found() {
            return Ok(vec![]);
        }
        let parsed: TransactionsResponse = response.error_for_status()?.json()?;
        Ok(parsed
            .transactions
            .into_iter()
            .map(|tx| TonTransactionInfo {
                hash: tx.hash,
                aborted: tx.description.aborted,
                compute_success: tx.description.compute_ph.and_then(|p| p.success),
                action_success: tx.description.action.and_then(|p| p.success),
                bounced: tx.out_msgs.iter().any(|m| m.bounced == Some(true)),
            })
            .collect())
    }

    async fn masterchain_seqno(&self) -> ChainResult<u64> {
        let info: MasterchainInfo = v2_result(self.client.get_raw("/api/v2/getMasterchainInfo").await?)?;
        Ok(info.last.seqno)
    }
}

#[async_trait]
impl LatestBlock for HttpTonRpc {
    async fn latest_block(&self) -> ChainResult<BlockInfo> {
        let number = self.masterchain_seqno().await?;
        Ok(BlockInfo {
            chain_id: MAINNET_GLOBAL_ID.into(),
            number,
            in_sync: number > 0,
        })
    }
}

// ---------------------------------------------------------------- 预加载 / 广播 / 状态

/// jetton 附加费用：收款方钱包未激活时创建，否则充值（有备注时更低）
pub fn jetton_account_fee(recipient_active: bool, memo: Option<&str>) -> u128 {
    let has_memo = memo.map(|m| !m.is_empty()).unwrap_or(false);
    match (recipient_active, has_memo) {
        (false, _) => JETTON_ACCOUNT_CREATE_FEE,
        (true, false) => JETTON_ACCOUNT_TOP_UP_FEE,
        (true, true) => JETTON_ACCOUNT_TOP_UP_WITH_MEMO_FEE,
    }
}

pub struct TonClient {
    rpc: Arc<dyn TonRpc>,
    activity: JettonActivitySignal,
}

impl TonClient {
    pub fn new(rpc: Arc<dyn TonRpc>, activity: JettonActivitySignal) -> Self {
        Self { rpc, activity }
    }

    fn native_fee() -> Fee {
        Fee::new(AssetId::native(Chain::Ton), FeePriority::Normal, NATIVE_TRANSFER_FEE)
    }

    async fn sequence(&self, address: &str) -> ChainResult<u32> {
        let info = self.rpc.wallet_information(address).await?;
        Ok(info.seqno.unwrap_or(0))
    }

    async fn sender_jetton_wallet(&self, owner: &str, jetton: &str) -> ChainResult<String> {
        self.rpc
            .jetton_wallets(owner, jetton)
            .await?
            .into_iter()
            .next()
            .map(|w| w.address)
            .ok_or_else(|| {
                ChainError::insufficient(format!(
                    "jetton wallet for {} not found",
                    mask_address(owner)
                ))
            })
    }

    /// 收款方 jetton 钱包是否已激活
    pub async fn recipient_jetton_active(&self, owner: &str, jetton: &str) -> ChainResult<bool> {
        let wallets = self.rpc.jetton_wallets(owner, jetton).await?;
        match self.activity {
            JettonActivitySignal::WalletListing => Ok(!wallets.is_empty()),
            JettonActivitySignal::AddressState => match wallets.first() {
                Some(wallet) => Ok(self.rpc.address_state(&wallet.address).await? == "active"),
                None => Ok(false),
            },
        }
    }

    fn chain_data(sequence: u32, jetton_wallet_address: Option<String>, fee: Fee) -> ChainSignData {
        ChainSignData::Ton(TonChainData {
            sequence,
            jetton_wallet_address,
            expire_at: None,
            fee,
        })
    }
}

#[async_trait]
impl SignerPreloader for TonClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Ton
    }

    async fn preload_native_transfer(&self, params: &NativeTransfer) -> ChainResult<SignerParams> {
        let sequence = self.sequence(&params.from.address).await?;
        tracing::info!(
            chain = %Chain::Ton,
            sender = %mask_address(&params.from.address),
            sequence,
            "TON native preload complete"
        );
        Ok(SignerParams::new(
            TransferParams::Native(params.clone()),
            Self::chain_data(sequence, None, Self::native_fee()),
        ))
    }

    async fn preload_token_transfer(&self, params: &TokenTransfer) -> ChainResult<SignerParams> {
        let jetton = params
            .asset_id
            .token_id
            .as_deref()
            .ok_or_else(|| ChainError::precondition("token transfer without jetton id"))?;

        let (sequence, jetton_wallet, recipient_active) = tokio::try_join!(
            self.sequence(&params.from.address),
            self.sender_jetton_wallet(&params.from.address, jetton),
            self.recipient_jetton_active(&params.destination, jetton),
        )?;

        let option = jetton_account_fee(recipient_active, params.memo.as_deref());
        let fee = Self::native_fee().with_option(FeeOption::TokenAccountCreation, option);
        tracing::info!(
            chain = %Chain::Ton,
            sender = %mask_address(&params.from.address),
            sequence,
            recipient_active,
            account_fee = %option,
            "TON jetton preload complete"
        );
        Ok(SignerParams::new(
            TransferParams::Token(params.clone()),
            Self::chain_data(sequence, Some(jetton_wallet), fee),
        ))
    }

    async fn preload_swap(&self, params: &SwapTransfer) -> ChainResult<SignerParams> {
        let sequence = self.sequence(&params.from.address).await?;
        Ok(SignerParams::new(
            TransferParams::Swap(params.clone()),
            Self::chain_data(sequence, None, Self::native_fee()),
        ))
    }
}

#[async_trait]
impl BroadcastClient for TonClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Ton
    }

    async fn send(&self, account: &Account, signed: &[u8], tx_type: TransactionType) -> ChainResult<String> {
        let boc = base64::engine::general_purpose::STANDARD.encode(signed);
        let hash = self.rpc.send_boc(&boc).await?;
        tracing::info!(
            chain = %Chain::Ton,
            sender = %mask_address(&account.address),
            tx_type = ?tx_type,
            hash = %hash,
            "TON message broadcast"
        );
        Ok(hash)
    }
}

/// 外部消息哈希 -> 链上交易：bounce 或执行阶段失败视为 Reverted
pub fn map_transaction_state(message_hash: &str, transactions: &[TonTransactionInfo]) -> TransactionChanges {
    let Some(tx) = transactions.first() else {
        return TransactionChanges::pending();
    };
    let failed = tx.aborted
        || tx.bounced
        || tx.compute_success == Some(false)
        || tx.action_success == Some(false);
    let state = if failed {
        TransactionState::Reverted
    } else {
        TransactionState::Confirmed
    };
    TransactionChanges::new(state).with_hash_change(message_hash, tx.hash.clone())
}

#[async_trait]
impl TransactionStatusClient for TonClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Ton
    }

    async fn get_status(&self, request: &TransactionStateRequest) -> ChainResult<TransactionChanges> {
        let transactions = self.rpc.transactions_by_message(&request.hash).await?;
        Ok(map_transaction_state(&request.hash, &transactions))
    }
}

// ---------------------------------------------------------------- 签名

pub struct TonSignClient {
    codec: Arc<dyn CryptoCodec>,
    message_ttl_secs: u32,
}

impl TonSignClient {
    pub fn new(codec: Arc<dyn CryptoCodec>, message_ttl_secs: u32) -> Self {
        Self {
            codec,
            message_ttl_secs,
        }
    }

    fn sign(&self, data: &TonChainData, message: TonMessage, private_key: &[u8]) -> ChainResult<Vec<Vec<u8>>> {
        if message.destination.trim().is_empty() {
            return Err(ChainError::precondition("missing destination"));
        }
        let expire_at = data.expire_at.unwrap_or_else(|| {
            let now = chrono::Utc::now().timestamp().max(0) as u32;
            now.saturating_add(self.message_ttl_secs)
        });
        let input = SigningInput::Ton(TonTransfer {
            wallet_version: WALLET_VERSION.into(),
            sequence: data.sequence,
            expire_at,
            messages: vec![message],
        });
        Ok(vec![self.codec.encode(&input, private_key)?])
    }
}

fn non_empty(memo: Option<&str>) -> Option<String> {
    memo.filter(|m| !m.is_empty()).map(String::from)
}

impl SignClient for TonSignClient {
    fn supported(&self, chain: Chain) -> bool {
        chain == Chain::Ton
    }

    fn sign_native_transfer(
        &self,
        params: &NativeTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        _fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let data = crate::expect_chain_data!(chain_data, Ton);
        let message = TonMessage {
            destination: params.destination.clone(),
            amount: final_amount,
            mode: if params.is_max_amount {
                TRANSFER_ALL_SEND_MODE
            } else {
                DEFAULT_SEND_MODE
            },
            bounceable: false,
            comment: non_empty(params.memo.as_deref()),
            jetton_transfer: None,
            custom_payload: None,
        };
        self.sign(data, message, private_key)
    }

    fn sign_token_transfer(
        &self,
        params: &TokenTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let data = crate::expect_chain_data!(chain_data, Ton);
        let jetton_wallet = data
            .jetton_wallet_address
            .clone()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| ChainError::precondition("missing jetton wallet address"))?;
        if params.destination.trim().is_empty() {
            return Err(ChainError::precondition("missing destination"));
        }
        let message = TonMessage {
            destination: jetton_wallet,
            amount: fee
                .option(FeeOption::TokenAccountCreation)
                .unwrap_or(JETTON_MIN_ATTACHED_AMOUNT),
            mode: DEFAULT_SEND_MODE,
            bounceable: true,
            comment: non_empty(params.memo.as_deref()),
            jetton_transfer: Some(JettonTransferBody {
                jetton_amount: final_amount,
                to_owner: params.destination.clone(),
                response_address: params.from.address.clone(),
                forward_amount: 1,
            }),
            custom_payload: None,
        };
        self.sign(data, message, private_key)
    }

    fn sign_swap(
        &self,
        params: &SwapTransfer,
        chain_data: &ChainSignData,
        _final_amount: u128,
        _fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let data = crate::expect_chain_data!(chain_data, Ton);
        let message = TonMessage {
            destination: params.to.clone(),
            amount: params.value,
            mode: DEFAULT_SEND_MODE,
            bounceable: true,
            comment: None,
            jetton_transfer: None,
            custom_payload: Some(params.swap_payload.clone()),
        };
        self.sign(data, message, private_key)
    }

    fn sign_message(&self, chain: Chain, message: &[u8], private_key: &[u8]) -> ChainResult<Vec<u8>> {
        self.codec.sign_message(chain, message, private_key)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::{
        codec::{envelope, BuiltinCodec, SignedEnvelope},
        infrastructure::LocalKeySigner,
    };

    #[derive(Default)]
    struct MockTonRpc {
        seqno: Option<u32>,
        sender_jetton: Option<String>,
        recipient_jetton: Option<String>,
        recipient_state: String,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TonRpc for MockTonRpc {
        async fn wallet_information(&self, _address: &str) -> ChainResult<TonWalletInfo> {
            self.calls.lock().unwrap().push("wallet".into());
            Ok(TonWalletInfo {
                seqno: self.seqno,
                account_state: "active".into(),
            })
        }

        async fn jetton_wallets(&self, owner: &str, _jetton: &str) -> ChainResult<Vec<TonJettonWallet>> {
            let found = if owner == "A" {
                self.sender_jetton.clone()
            } else {
                self.recipient_jetton.clone()
            };
            Ok(found
                .into_iter()
                .map(|address| TonJettonWallet {
                    address,
                    owner: owner.into(),
                    jetton: "J".into(),
                    balance: "0".into(),
                })
                .collect())
        }

        async fn address_state(&self, _address: &str) -> ChainResult<String> {
            Ok(self.recipient_state.clone())
        }

        async fn send_boc(&self, _boc: &str) -> ChainResult<String> {
            Ok("msg-hash".into())
        }

        async fn transactions_by_message(&self, _hash: &str) -> ChainResult<Vec<TonTransactionInfo>> {
            Ok(vec![])
        }

        async fn masterchain_seqno(&self) -> ChainResult<u64> {
            Ok(1)
        }
    }

    fn token_params(memo: Option<&str>) -> TokenTransfer {
        TokenTransfer {
            from: Account::new(Chain::Ton, "A", "m/44'/607'/0'"),
            destination: "B".into(),
            asset_id: AssetId::token(Chain::Ton, "J"),
            amount: 5_000_000,
            memo: memo.map(String::from),
            is_max_amount: false,
        }
    }

    fn signer() -> TonSignClient {
        TonSignClient::new(Arc::new(BuiltinCodec::new(Arc::new(LocalKeySigner))), 600)
    }

    fn decode(raw: &[u8]) -> TonTransfer {
        let envelope: SignedEnvelope<TonTransfer> = envelope::open(Chain::Ton, raw).unwrap();
        envelope.input
    }

    #[test]
    fn test_jetton_account_fee_table() {
        assert_eq!(jetton_account_fee(false, None), JETTON_ACCOUNT_CREATE_FEE);
        assert_eq!(jetton_account_fee(false, Some("memo")), JETTON_ACCOUNT_CREATE_FEE);
        assert_eq!(jetton_account_fee(true, None), JETTON_ACCOUNT_TOP_UP_FEE);
        assert_eq!(jetton_account_fee(true, Some("")), JETTON_ACCOUNT_TOP_UP_FEE);
        assert_eq!(jetton_account_fee(true, Some("memo")), JETTON_ACCOUNT_TOP_UP_WITH_MEMO_FEE);
    }

    /// Test 1: 收款方 jetton 钱包未激活（address state 信号）且无备注 -> 创建费
    #[tokio::test]
    async fn test_inactive_recipient_uses_create_fee() {
        let rpc = MockTonRpc {
            seqno: Some(3),
            sender_jetton: Some("JW-A".into()),
            recipient_jetton: Some("JW-B".into()),
            recipient_state: "uninit".into(),
            ..Default::default()
        };
        let client = TonClient::new(Arc::new(rpc), JettonActivitySignal::AddressState);
        let params = client.preload_token_transfer(&token_params(None)).await.unwrap();
        let fee = params.fee(FeePriority::Normal).unwrap();
        assert_eq!(fee.option(FeeOption::TokenAccountCreation), Some(JETTON_ACCOUNT_CREATE_FEE));
        let ChainSignData::Ton(data) = &params.chain_data else {
            panic!("expected TON chain data");
        };
        assert_eq!(data.jetton_wallet_address.as_deref(), Some("JW-A"));
        assert_eq!(data.sequence, 3);
    }

    /// Test 2: 已激活钱包 + 备注 -> 带备注充值费
    #[tokio::test]
    async fn test_active_recipient_with_memo() {
        let rpc = MockTonRpc {
            seqno: Some(3),
            sender_jetton: Some("JW-A".into()),
            recipient_jetton: Some("JW-B".into()),
            recipient_state: "active".into(),
            ..Default::default()
        };
        let client = TonClient::new(Arc::new(rpc), JettonActivitySignal::AddressState);
        let params = client.preload_token_transfer(&token_params(Some("invoice"))).await.unwrap();
        assert_eq!(
            params.fee(FeePriority::Normal).unwrap().option(FeeOption::TokenAccountCreation),
            Some(JETTON_ACCOUNT_TOP_UP_WITH_MEMO_FEE)
        );
    }

    /// Test 3: 列表信号：出现在 jetton/wallets 即视为激活，不看 address state
    #[tokio::test]
    async fn test_wallet_listing_signal() {
        let listed = MockTonRpc {
            sender_jetton: Some("JW-A".into()),
            recipient_jetton: Some("JW-B".into()),
            recipient_state: "uninit".into(),
            ..Default::default()
        };
        let client = TonClient::new(Arc::new(listed), JettonActivitySignal::WalletListing);
        let params = client.preload_token_transfer(&token_params(None)).await.unwrap();
        assert_eq!(
            params.fee(FeePriority::Normal).unwrap().option(FeeOption::TokenAccountCreation),
            Some(JETTON_ACCOUNT_TOP_UP_FEE)
        );

        let unlisted = MockTonRpc {
            sender_jetton: Some("JW-A".into()),
            recipient_state: "active".into(),
            ..Default::default()
        };
        let client = TonClient::new(Arc::new(unlisted), JettonActivitySignal::WalletListing);
        let params = client.preload_token_transfer(&token_params(None)).await.unwrap();
        assert_eq!(
            params.fee(FeePriority::Normal).unwrap().option(FeeOption::TokenAccountCreation),
            Some(JETTON_ACCOUNT_CREATE_FEE)
        );
    }

    #[tokio::test]
    async fn test_missing_sender_jetton_wallet_is_insufficient_data() {
        let rpc = MockTonRpc::default();
        let client = TonClient::new(Arc::new(rpc), JettonActivitySignal::AddressState);
        let err = client.preload_token_transfer(&token_params(None)).await.unwrap_err();
        assert!(matches!(err, ChainError::InsufficientData(_)));
    }

    #[tokio::test]
    async fn test_undeployed_wallet_sequence_defaults_to_zero() {
        let client = TonClient::new(Arc::new(MockTonRpc::default()), JettonActivitySignal::AddressState);
        let params = client
            .preload_native_transfer(&NativeTransfer {
                from: Account::new(Chain::Ton, "A", "m/0"),
                destination: "B".into(),
                amount: 1,
                memo: None,
                is_max_amount: false,
            })
            .await
            .unwrap();
        assert_eq!(params.chain_data.sequence(), Some(0));
    }

    /// Test 4: 全额转出时 send-mode 携带 ATTACH_ALL_CONTRACT_BALANCE
    #[test]
    fn test_send_mode_for_max_amount() {
        let data = TonClient::chain_data(7, None, TonClient::native_fee());
        let fee = TonClient::native_fee();
        for (is_max, expected_flag) in [(true, true), (false, false)] {
            let params = NativeTransfer {
                from: Account::new(Chain::Ton, "A", "m/0"),
                destination: "B".into(),
                amount: 1_000_000_000,
                memo: None,
                is_max_amount: is_max,
            };
            let raw = signer()
                .sign_native_transfer(&params, &data, params.amount, &fee, &[1u8; 32])
                .unwrap();
            let message = &decode(&raw[0]).messages[0];
            assert_eq!(message.mode & SEND_MODE_ATTACH_ALL_CONTRACT_BALANCE != 0, expected_flag);
            assert_eq!(message.mode & DEFAULT_SEND_MODE, DEFAULT_SEND_MODE);
            assert!(!message.bounceable);
        }
    }

    #[test]
    fn test_token_message_wraps_jetton_transfer() {
        let data = TonClient::chain_data(2, Some("JW-A".into()), TonClient::native_fee());
        let params = token_params(Some("memo"));
        let fee = TonClient::native_fee().with_option(FeeOption::TokenAccountCreation, JETTON_ACCOUNT_TOP_UP_WITH_MEMO_FEE);
        let raw = signer()
            .sign_token_transfer(&params, &data, params.amount, &fee, &[1u8; 32])
            .unwrap();
        let transfer = decode(&raw[0]);
        let message = &transfer.messages[0];
        assert_eq!(message.destination, "JW-A");
        assert_eq!(message.amount, JETTON_ACCOUNT_TOP_UP_WITH_MEMO_FEE);
        assert!(message.bounceable);
        assert_eq!(message.comment.as_deref(), Some("memo"));
        let jetton = message.jetton_transfer.as_ref().unwrap();
        assert_eq!(jetton.to_owner, "B");
        assert_eq!(jetton.response_address, "A");
        assert_eq!(jetton.jetton_amount, 5_000_000);
        assert_eq!(jetton.forward_amount, 1);

        // 无附加项时附带最小金额
        let raw = signer()
            .sign_token_transfer(&params, &data, params.amount, &TonClient::native_fee(), &[1u8; 32])
            .unwrap();
        assert_eq!(decode(&raw[0]).messages[0].amount, JETTON_MIN_ATTACHED_AMOUNT);
    }

    #[test]
    fn test_token_transfer_without_jetton_wallet_fails_before_signing() {
        let data = TonClient::chain_data(2, None, TonClient::native_fee());
        let params = token_params(None);
        let err = signer()
            .sign_token_transfer(&params, &data, 1, &TonClient::native_fee(), &[1u8; 32])
            .unwrap_err();
        assert!(matches!(err, ChainError::EncodingPrecondition(_)));
    }

    #[test]
    fn test_wrong_chain_data_variant_is_rejected() {
        let data = ChainSignData::Xrp(crate::domain::XrpChainData {
            sequence: 1,
            last_ledger_sequence: None,
            fee: TonClient::native_fee(),
        });
        let params = NativeTransfer {
            from: Account::new(Chain::Ton, "A", "m/0"),
            destination: "B".into(),
            amount: 1,
            memo: None,
            is_max_amount: false,
        };
        let err = signer()
            .sign_native_transfer(&params, &data, 1, &TonClient::native_fee(), &[1u8; 32])
            .unwrap_err();
        assert!(matches!(err, ChainError::EncodingPrecondition(m) if m.contains("Ton")));
    }

    #[test]
    fn test_bounced_message_maps_to_reverted() {
        let bounced = TonTransactionInfo {
            hash: "tx".into(),
            aborted: false,
            compute_success: Some(true),
            action_success: Some(true),
            bounced: true,
        };
        let changes = map_transaction_state("msg", &[bounced.clone()]);
        assert_eq!(changes.state, TransactionState::Reverted);

        let ok = TonTransactionInfo {
            bounced: false,
            ..bounced
        };
        let changes = map_transaction_state("msg", &[ok]);
        assert_eq!(changes.state, TransactionState::Confirmed);
        assert_eq!(changes.hash_changes.unwrap().new, "tx");
        assert_eq!(map_transaction_state("msg", &[]).state, TransactionState::Pending);
    }
}
