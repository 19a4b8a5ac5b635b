//! Cosmos SDK 链（Cosmos Hub / Osmosis），LCD REST 接口
//!
//! 签名需要 account_number，账户不存在时无法签名，直接返回 `AccountNotFound`。
//! 质押（委托 / 解除委托 / 转委托 / 领取奖励）与转账共用同一预加载路径。

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use crate::{
    codec::{CosmosMessage, CosmosTransaction, CryptoCodec, SigningInput},
    domain::{
        mask_address, Account, AssetId, Chain, ChainSignData, ChainType, CosmosChainData, Fee,
        FeePriority, GasFee, NativeTransfer, SignerParams, StakeAction, StakeTransfer,
        SwapTransfer, TokenTransfer,
        TransactionChanges, TransactionState, TransactionStateRequest, TransactionType,
        TransferParams,
    },
    error::{ChainError, ChainResult},
    infrastructure::{rpc_client::status_error, RpcClient},
    service::{
        clients::{BroadcastClient, SignClient, SignerPreloader, TransactionStatusClient},
        node_status::{BlockInfo, LatestBlock},
    },
};

pub const DEFAULT_GAS_LIMIT: u64 = 200_000;

/// 每条链的固定手续费（最小单位）
pub fn fixed_fee_amount(chain: Chain) -> u128 {
    match chain {
        Chain::Osmosis => 10_000,
        _ => 3_000,
    }
}

pub fn fixed_fee(chain: Chain) -> Fee {
    message_fee(chain, 1)
}

/// 多消息交易的 gas 上限与手续费按消息数放大
pub fn message_fee(chain: Chain, messages: usize) -> Fee {
    let per_message = fixed_fee_amount(chain);
    let count = messages.max(1) as u128;
    Fee {
        gas: Some(GasFee {
            limit: u128::from(DEFAULT_GAS_LIMIT) * count,
            max_gas_price: per_message,
            miner_fee: per_message,
        }),
        ..Fee::new(AssetId::native(chain), FeePriority::Normal, per_message * count)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CosmosAccount {
    pub account_number: String,
    pub sequence: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CosmosBlockHeader {
    pub chain_id: String,
    pub height: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CosmosTxResponse {
    pub txhash: String,
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub raw_log: String,
    #[serde(default)]
    pub height: String,
}

#[async_trait]
pub trait CosmosRpc: Send + Sync {
    /// 账户不存在时返回 None
    async fn account(&self, address: &str) -> ChainResult<Option<CosmosAccount>>;

    async fn latest_block(&self) -> ChainResult<CosmosBlockHeader>;

    async fn syncing(&self) -> ChainResult<bool>;

    async fn broadcast(&self, tx_bytes: &[u8]) -> ChainResult<CosmosTxResponse>;

    async fn transaction(&self, hash: &str) -> ChainResult<Option<CosmosTxResponse>>;
}

// ---------------------------------------------------------------- HTTP 适配器

#[derive(Deserialize)]
struct AccountResponse {
    account: AccountBody,
}

/// `BaseAccount` 或包装了 `base_account` 的 vesting 账户
#[derive(Deserialize)]
struct AccountBody {
    #[serde(default)]
    account_number: Option<String>,
    #[serde(default)]
    sequence: Option<String>,
    #[serde(default)]
    base_account: Option<CosmosAccount>,
}

#[derive(Deserialize)]
struct BlockResponse {
    block: BlockBody,
}

#[derive(Deserialize)]
struct BlockBody {
    header: CosmosBlockHeader,
}

#[derive(Deserialize)]
struct SyncingResponse {
    syncing: bool,
}

#[derive(Deserialize)]
struct TxEnvelope {
    tx_response: CosmosTxResponse,
}

pub struct HttpCosmosRpc {
    client: RpcClient,
}

impl HttpCosmosRpc {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl CosmosRpc for HttpCosmosRpc {
    async fn account(&self, address: &str) -> ChainResult<Option<CosmosAccount>> {
        let response = self
            .client
            .get_raw(&format!("/cosmos/auth/v1beta1/accounts/{}", address))
            .await?;
        if response.is_not_found() {
            return Ok(None);
        }
        let body: AccountResponse = response.error_for_status()?.json()?;
        let account = match body.account {
            AccountBody {
                base_account: Some(base),
                ..
            } => base,
            AccountBody {
                account_number: Some(account_number),
                sequence,
                ..
            } => CosmosAccount {
                account_number,
                sequence: sequence.unwrap_or_else(|| "0".into()),
            },
            _ => return Err(ChainError::rpc("unrecognized account type")),
        };
        Ok(Some(account))
    }

    async fn latest_block(&self) -> ChainResult<CosmosBlockHeader> {
        let response: BlockResponse = self
            .client
            .get_json("/cosmos/base/tendermint/v1beta1/blocks/latest")
            .await?;
        Ok(response.block.header)
    }

    async fn syncing(&self) -> ChainResult<bool> {
        let response: SyncingResponse = self
            .client
            .get_json("/cosmos/base/tendermint/v1beta1/syncing")
            .await?;
        Ok(response.syncing)
    }

    async fn broadcast(&self, tx_bytes: &[u8]) -> ChainResult<CosmosTxResponse> {
        let body = json!({
            "tx_bytes": base64::engine::general_purpose::STANDARD.encode(tx_bytes),
            "mode": "BROADCAST_MODE_SYNC",
        });
        let response = self.client.post_raw("/cosmos/tx/v1beta1/txs", &body, false).await?;
        if !response.is_success() {
            return Err(status_error(response.status, &response.body));
        }
        Ok(response.json::<TxEnvelope>()?.tx_response)
    }

    async fn transaction(&self, hash: &str) -> ChainResult<Option<CosmosTxResponse>> {
        let response = self
            .client
            .get_raw(&format!("/cosmos/tx/v1beta1/txs/{}", hash))
            .await?;
        if response.is_not_found() {
            return Ok(None);
        }
        Ok(Some(response.error_for_status()?.json::<TxEnvelope>()?.tx_response))
    }
}

#[async_trait]
impl LatestBlock for HttpCosmosRpc {
    async fn latest_block(&self) -> ChainResult<BlockInfo> {
        let (header, syncing) = tokio::try_join!(CosmosRpc::latest_block(self), self.syncing())?;
        Ok(BlockInfo {
            number: header
                .height
                .parse()
                .map_err(|_| ChainError::rpc("invalid block height"))?,
            chain_id: header.chain_id,
            in_sync: !syncing,
        })
    }
}

// ---------------------------------------------------------------- 预加载 / 广播 / 状态

pub struct CosmosClient {
    rpcs: HashMap<Chain, Arc<dyn CosmosRpc>>,
}

impl CosmosClient {
    pub fn new(rpcs: impl IntoIterator<Item = (Chain, Arc<dyn CosmosRpc>)>) -> Self {
        Self {
            rpcs: rpcs
                .into_iter()
                .filter(|(chain, _)| chain.chain_type() == ChainType::Cosmos)
                .collect(),
        }
    }

    fn rpc(&self, chain: Chain) -> ChainResult<&Arc<dyn CosmosRpc>> {
        self.rpcs.get(&chain).ok_or(ChainError::UnsupportedChain(chain))
    }

    async fn preload(&self, input: TransferParams) -> ChainResult<SignerParams> {
        let chain = input.chain();
        let address = input.from().address.clone();
        let rpc = self.rpc(chain)?;

        let (account, header) = tokio::try_join!(rpc.account(&address), rpc.latest_block())?;
        let account = account.ok_or_else(|| ChainError::account_not_found(chain, &address))?;
        let parse = |value: &str, field: &str| {
            value
                .parse::<u64>()
                .map_err(|_| ChainError::rpc(format!("invalid {} {}", field, value)))
        };
        let account_number = parse(&account.account_number, "account number")?;
        let sequence = parse(&account.sequence, "sequence")?;
        let fee = match &input {
            TransferParams::Stake(p) => message_fee(chain, p.message_count()),
            _ => fixed_fee(chain),
        };

        tracing::info!(
            chain = %chain,
            sender = %mask_address(&address),
            chain_id = %header.chain_id,
            sequence,
            "Cosmos preload complete"
        );
        Ok(SignerParams::new(
            input,
            ChainSignData::Cosmos(CosmosChainData {
                chain_id: header.chain_id,
                account_number,
                sequence,
                fee,
            }),
        ))
    }
}

#[async_trait]
impl SignerPreloader for CosmosClient {
    fn supported(&self, chain: Chain) -> bool {
        self.rpcs.contains_key(&chain)
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

    async fn preload_stake(&self, params: &StakeTransfer) -> ChainResult<SignerParams> {
        self.preload(TransferParams::Stake(params.clone())).await
    }
}

#[async_trait]
impl BroadcastClient for CosmosClient {
    fn supported(&self, chain: Chain) -> bool {
        self.rpcs.contains_key(&chain)
    }

    async fn send(&self, account: &Account, signed: &[u8], tx_type: TransactionType) -> ChainResult<String> {
        let response = self.rpc(account.chain)?.broadcast(signed).await?;
        if response.code != 0 {
            return Err(ChainError::rejected(account.chain, response.raw_log));
        }
        tracing::info!(
            chain = %account.chain,
            sender = %mask_address(&account.address),
            tx_type = ?tx_type,
            hash = %response.txhash,
            "Cosmos transaction broadcast"
        );
        Ok(response.txhash)
    }
}

pub fn map_tx_response(response: Option<&CosmosTxResponse>) -> TransactionChanges {
    match response {
        None => TransactionChanges::pending(),
        Some(r) if r.height.is_empty() || r.height == "0" => TransactionChanges::pending(),
        Some(r) if r.code == 0 => TransactionChanges::new(TransactionState::Confirmed),
        Some(_) => TransactionChanges::new(TransactionState::Reverted),
    }
}

#[async_trait]
impl TransactionStatusClient for CosmosClient {
    fn supported(&self, chain: Chain) -> bool {
        self.rpcs.contains_key(&chain)
    }

    async fn get_status(&self, request: &TransactionStateRequest) -> ChainResult<TransactionChanges> {
        let response = self.rpc(request.chain)?.transaction(&request.hash).await?;
        Ok(map_tx_response(response.as_ref()))
    }
}

// ---------------------------------------------------------------- 签名

pub struct CosmosSignClient {
    codec: Arc<dyn CryptoCodec>,
}

impl CosmosSignClient {
    pub fn new(codec: Arc<dyn CryptoCodec>) -> Self {
        Self { codec }
    }

    fn sign(
        &self,
        chain: Chain,
        chain_data: &ChainSignData,
        fee: &Fee,
        messages: Vec<CosmosMessage>,
        memo: Option<&str>,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let data = crate::expect_chain_data!(chain_data, Cosmos);
        let fee_denom = chain
            .fee_denom()
            .ok_or(ChainError::UnsupportedChain(chain))?;
        let gas_limit = fee
            .gas_limit()
            .map(u64::try_from)
            .transpose()
            .map_err(|_| ChainError::precondition("gas limit exceeds u64"))?
            .unwrap_or(DEFAULT_GAS_LIMIT);
        let tx = CosmosTransaction {
            chain_id: data.chain_id.clone(),
            account_number: data.account_number,
            sequence: data.sequence,
            messages,
            memo: memo.unwrap_or_default().to_string(),
            fee_denom: fee_denom.to_string(),
            fee_amount: fee.amount,
            gas_limit,
        };
        Ok(vec![self.codec.encode(&SigningInput::Cosmos(tx), private_key)?])
    }
}

impl SignClient for CosmosSignClient {
    fn supported(&self, chain: Chain) -> bool {
        chain.chain_type() == ChainType::Cosmos
    }

    fn sign_native_transfer(
        &self,
        params: &NativeTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let chain = params.from.chain;
        let denom = chain
            .fee_denom()
            .ok_or(ChainError::UnsupportedChain(chain))?;
        let message = CosmosMessage::Send {
            from_address: params.from.address.clone(),
            to_address: params.destination.clone(),
            denom: denom.to_string(),
            amount: final_amount,
        };
        self.sign(chain, chain_data, fee, vec![message], params.memo.as_deref(), private_key)
    }

    fn sign_token_transfer(
        &self,
        params: &TokenTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let denom = params
            .asset_id
            .token_id
            .clone()
            .ok_or_else(|| ChainError::precondition("token transfer without denom"))?;
        let message = CosmosMessage::Send {
            from_address: params.from.address.clone(),
            to_address: params.destination.clone(),
            denom,
            amount: final_amount,
        };
        self.sign(params.from.chain, chain_data, fee, vec![message], params.memo.as_deref(), private_key)
    }

    fn sign_swap(
        &self,
        params: &SwapTransfer,
        chain_data: &ChainSignData,
        _final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let messages = CosmosMessage::parse_payload(&params.swap_payload)?;
        self.sign(params.from.chain, chain_data, fee, messages, None, private_key)
    }

    /// 委托使用扣除手续费后的金额，解除委托与转委托使用原始金额
    fn sign_stake(
        &self,
        params: &StakeTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let chain = params.from.chain;
        let denom = chain
            .fee_denom()
            .ok_or(ChainError::UnsupportedChain(chain))?
            .to_string();
        let delegator_address = params.from.address.clone();
        let messages = match &params.action {
            StakeAction::Delegate { validator } => vec![CosmosMessage::Delegate {
                delegator_address,
                validator_address: validator.clone(),
                denom,
                amount: final_amount,
            }],
            StakeAction::Undelegate { validator } => vec![CosmosMessage::Undelegate {
                delegator_address,
                validator_address: validator.clone(),
                denom,
                amount: params.amount,
            }],
            StakeAction::Redelegate {
                src_validator,
                dst_validator,
            } => vec![CosmosMessage::Redelegate {
                delegator_address,
                validator_src_address: src_validator.clone(),
                validator_dst_address: dst_validator.clone(),
                denom,
                amount: params.amount,
            }],
            StakeAction::Rewards { validators } => validators
                .iter()
                .map(|validator| CosmosMessage::WithdrawReward {
                    delegator_address: delegator_address.clone(),
                    validator_address: validator.clone(),
                })
                .collect(),
        };
        self.sign(chain, chain_data, fee, messages, None, private_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENDER: &str = "osmo1q0d0q8w8y8t6h4l9w5u8p8s8h8f8e8r8t8y8u8i8o8p8";
    const RECIPIENT: &str = "osmo1rcjvzz8wzktqfz8qjf0l9q45kzxvd0z0n7l5cf";

    struct MockCosmosRpc {
        account: Option<CosmosAccount>,
    }

    #[async_trait]
    impl CosmosRpc for MockCosmosRpc {
        async fn account(&self, _address: &str) -> ChainResult<Option<CosmosAccount>> {
            Ok(self.account.clone())
        }

        async fn latest_block(&self) -> ChainResult<CosmosBlockHeader> {
            Ok(CosmosBlockHeader {
                chain_id: "osmosis-1".into(),
                height: "25181150".into(),
            })
        }

        async fn syncing(&self) -> ChainResult<bool> {
            Ok(false)
        }

        async fn broadcast(&self, _tx_bytes: &[u8]) -> ChainResult<CosmosTxResponse> {
            Ok(CosmosTxResponse {
                txhash: "ABC".into(),
                code: 13,
                raw_log: "insufficient fees; got: 10uosmo".into(),
                height: "0".into(),
            })
        }

        async fn transaction(&self, _hash: &str) -> ChainResult<Option<CosmosTxResponse>> {
            Ok(None)
        }
    }

    fn client(account: Option<CosmosAccount>) -> CosmosClient {
        CosmosClient::new([(
            Chain::Osmosis,
            Arc::new(MockCosmosRpc { account }) as Arc<dyn CosmosRpc>,
        )])
    }

    fn transfer() -> NativeTransfer {
        NativeTransfer {
            from: Account::new(Chain::Osmosis, SENDER, ""),
            destination: RECIPIENT.into(),
            amount: 1,
            memo: None,
            is_max_amount: false,
        }
    }

    /// Test 1: Osmosis 固定手续费 10000 uosmo / 200000 gas
    #[tokio::test]
    async fn test_preload_osmosis() {
        let params = client(Some(CosmosAccount {
            account_number: "2913388".into(),
            sequence: "10".into(),
        }))
        .preload_native_transfer(&transfer())
        .await
        .unwrap();
        let fee = params.fee(FeePriority::Normal).unwrap();
        assert_eq!(fee.amount, 10_000);
        assert_eq!(fee.gas_limit(), Some(200_000));
        assert_eq!(fee.gas.as_ref().unwrap().max_gas_price, 10_000);
        let ChainSignData::Cosmos(data) = &params.chain_data else {
            panic!("expected cosmos chain data");
        };
        assert_eq!(data.sequence, 10);
        assert_eq!(data.account_number, 2_913_388);
        assert_eq!(data.chain_id, "osmosis-1");
    }

    /// Test 2: 账户不存在时无法签名
    #[tokio::test]
    async fn test_missing_account_is_surfaced() {
        let err = client(None).preload_native_transfer(&transfer()).await.unwrap_err();
        assert!(matches!(err, ChainError::AccountNotFound { chain: Chain::Osmosis, .. }));
    }

    #[tokio::test]
    async fn test_nonzero_code_is_rejection_with_raw_log() {
        let err = client(None)
            .send(&Account::new(Chain::Osmosis, SENDER, ""), b"tx", TransactionType::Transfer)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "insufficient fees; got: 10uosmo");
    }

    fn stake(action: StakeAction) -> StakeTransfer {
        StakeTransfer {
            from: Account::new(Chain::Osmosis, SENDER, ""),
            action,
            amount: 5_000_000,
            is_max_amount: false,
        }
    }

    /// Test 3: 领取多个验证人奖励时 gas 上限与手续费按消息数放大
    #[tokio::test]
    async fn test_preload_rewards_scales_fee_per_message() {
        let rewards = stake(StakeAction::Rewards {
            validators: vec!["osmovaloper1a".into(), "osmovaloper1b".into(), "osmovaloper1c".into()],
        });
        let params = client(Some(CosmosAccount {
            account_number: "7".into(),
            sequence: "1".into(),
        }))
        .preload_stake(&rewards)
        .await
        .unwrap();
        let fee = params.fee(FeePriority::Normal).unwrap();
        assert_eq!(fee.amount, 30_000);
        assert_eq!(fee.gas_limit(), Some(600_000));
        assert_eq!(params.input, TransferParams::Stake(rewards));
    }

    /// Test 4: 委托签名为单条 MsgDelegate，金额为扣除手续费后的金额
    #[test]
    fn test_sign_delegate() {
        use crate::{codec::BuiltinCodec, infrastructure::LocalKeySigner};

        let signer = CosmosSignClient::new(Arc::new(BuiltinCodec::new(Arc::new(LocalKeySigner))));
        let data = ChainSignData::Cosmos(CosmosChainData {
            chain_id: "osmosis-1".into(),
            account_number: 7,
            sequence: 1,
            fee: fixed_fee(Chain::Osmosis),
        });
        let mut delegate = stake(StakeAction::Delegate {
            validator: "osmovaloper1a".into(),
        });
        delegate.is_max_amount = true;
        let input = TransferParams::Stake(delegate.clone());
        let fee = fixed_fee(Chain::Osmosis);
        let amount = input.final_amount(&fee);
        assert_eq!(amount, 4_990_000);

        let signed = signer.sign_stake(&delegate, &data, amount, &fee, &[8u8; 32]).unwrap();
        assert_eq!(signed.len(), 1);
        let raw = &signed[0];
        assert!(raw.windows(35).any(|w| w == b"/cosmos.staking.v1beta1.MsgDelegate"));
        assert!(raw.windows(13).any(|w| w == b"osmovaloper1a"));
        assert!(raw.windows(7).any(|w| w == b"4990000"));
    }

    /// Test 5: 领取奖励按验证人逐条生成消息
    #[test]
    fn test_sign_rewards_one_message_per_validator() {
        use crate::{codec::BuiltinCodec, infrastructure::LocalKeySigner};

        let signer = CosmosSignClient::new(Arc::new(BuiltinCodec::new(Arc::new(LocalKeySigner))));
        let fee = message_fee(Chain::Osmosis, 2);
        let data = ChainSignData::Cosmos(CosmosChainData {
            chain_id: "osmosis-1".into(),
            account_number: 7,
            sequence: 1,
            fee: fee.clone(),
        });
        let rewards = stake(StakeAction::Rewards {
            validators: vec!["osmovaloper1a".into(), "osmovaloper1b".into()],
        });
        let signed = signer.sign_stake(&rewards, &data, 0, &fee, &[8u8; 32]).unwrap();
        let type_url = b"/cosmos.distribution.v1beta1.MsgWithdrawDelegatorReward";
        let count = signed[0].windows(type_url.len()).filter(|w| w == type_url).count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_cosmos_hub_fee() {
        let fee = fixed_fee(Chain::Cosmos);
        assert_eq!(fee.amount, 3_000);
        assert_eq!(fee.fee_asset_id, AssetId::native(Chain::Cosmos));
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(map_tx_response(None).state, TransactionState::Pending);
        let mut response = CosmosTxResponse {
            txhash: "A".into(),
            code: 0,
            raw_log: String::new(),
            height: "100".into(),
        };
        assert_eq!(map_tx_response(Some(&response)).state, TransactionState::Confirmed);
        response.code = 5;
        assert_eq!(map_tx_response(Some(&response)).state, TransactionState::Reverted);
    }
}
