//! EVM 链家族：nonce + EIP-1559 手续费
//!
//! 一个 `EvmClient` 服务所有已配置 RPC 的 EVM 链。OP Stack 链（Optimism / Base）
//! 的手续费额外叠加 L1 数据费（`GasPriceOracle.getL1Fee`）。

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::{
    codec::{
        decode_hex,
        evm::{erc20_approve_data, erc20_transfer_data, keccak256, parse_address, signing_payload, NATIVE_TRANSFER_GAS},
        CryptoCodec, EvmTransaction, SigningInput,
    },
    domain::{
        mask_address, Account, AssetId, Chain, ChainSignData, ChainType, EvmChainData, Fee,
        FeePriority, GenericTransfer, NativeTransfer, SignerParams, SwapApproval, SwapTransfer, TokenApproval,
        TokenTransfer, TransactionChanges, TransactionState, TransactionStateRequest,
        TransactionType, TransferParams,
    },
    error::{ChainError, ChainResult},
    infrastructure::RpcClient,
    service::{
        clients::{BroadcastClient, SignClient, SignerPreloader, TransactionStatusClient},
        node_status::{BlockInfo, LatestBlock},
    },
};

/// feeHistory 奖励分位（slow / normal / fast）
pub const REWARD_PERCENTILES: [u8; 3] = [25, 50, 75];
pub const FEE_HISTORY_BLOCKS: u64 = 10;
const GAS_PRICE_ORACLE: &str = "0x420000000000000000000000000000000000000F";

/// `eth_estimateGas` 调用参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvmCall {
    pub from: String,
    pub to: String,
    pub value: u128,
    pub data: Vec<u8>,
}

impl EvmCall {
    fn to_json(&self) -> serde_json::Value {
        json!({
            "from": self.from,
            "to": self.to,
            "value": to_quantity(self.value),
            "data": format!("0x{}", hex::encode(&self.data)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmFeeHistory {
    #[serde(default)]
    pub base_fee_per_gas: Vec<String>,
    #[serde(default)]
    pub reward: Vec<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmReceipt {
    #[serde(default)]
    pub status: Option<String>,
    pub gas_used: String,
    #[serde(default)]
    pub effective_gas_price: Option<String>,
    /// OP Stack 回执携带的 L1 数据费
    #[serde(default)]
    pub l1_fee: Option<String>,
}

pub fn parse_quantity(value: &str) -> ChainResult<u128> {
    let trimmed = value.trim();
    match trimmed.strip_prefix("0x") {
        Some("") => Ok(0),
        Some(hex) => u128::from_str_radix(hex, 16),
        None => trimmed.parse(),
    }
    .map_err(|_| ChainError::rpc(format!("invalid quantity {}", value)))
}

pub fn to_quantity(value: u128) -> String {
    format!("0x{:x}", value)
}

#[async_trait]
pub trait EvmRpc: Send + Sync {
    /// pending 状态下的 nonce
    async fn nonce(&self, address: &str) -> ChainResult<u64>;

    async fn estimate_gas(&self, call: &EvmCall) -> ChainResult<u128>;

    async fn fee_history(&self, blocks: u64, percentiles: &[u8]) -> ChainResult<EvmFeeHistory>;

    /// OP Stack L1 数据费，入参为未签名交易
    async fn l1_fee(&self, unsigned: &[u8]) -> ChainResult<u128>;

    async fn send_raw_transaction(&self, raw: &[u8]) -> ChainResult<String>;

    async fn receipt(&self, hash: &str) -> ChainResult<Option<EvmReceipt>>;

    async fn chain_id(&self) -> ChainResult<u64>;

    async fn block_number(&self) -> ChainResult<u64>;

    async fn syncing(&self) -> ChainResult<bool>;
}

// ---------------------------------------------------------------- HTTP 适配器

pub struct HttpEvmRpc {
    client: RpcClient,
}

impl HttpEvmRpc {
    pub fn new(client: RpcClient) -> Self {
        Self { client }
    }

    async fn quantity(&self, method: &str, params: serde_json::Value) -> ChainResult<u128> {
        let value: String = self.client.json_rpc(method, params).await?;
        parse_quantity(&value)
    }
}

/// `getL1Fee(bytes)` 调用数据
pub fn l1_fee_call_data(unsigned: &[u8]) -> Vec<u8> {
    let mut data = keccak256(b"getL1Fee(bytes)")[..4].to_vec();
    let mut offset = [0u8; 32];
    offset[31] = 0x20;
    data.extend_from_slice(&offset);
    let mut length = [0u8; 32];
    length[24..].copy_from_slice(&(unsigned.len() as u64).to_be_bytes());
    data.extend_from_slice(&length);
    data.extend_from_slice(unsigned);
    let padding = (32 - unsigned.len() % 32) % 32;
    data.extend(std::iter::repeat(0u8).take(padding));
    data
}

#[async_trait]
impl EvmRpc for HttpEvmRpc {
    async fn nonce(&self, address: &str) -> ChainResult<u64> {
        let nonce = self
            .quantity("eth_getTransactionCount", json!([address, "pending"]))
            .await?;
        u64::try_from(nonce).map_err(|_| ChainError::rpc("nonce overflow"))
    }

    async fn estimate_gas(&self, call: &EvmCall) -> ChainResult<u128> {
        self.quantity("eth_estimateGas", json!([call.to_json()])).await
    }

    async fn fee_history(&self, blocks: u64, percentiles: &[u8]) -> ChainResult<EvmFeeHistory> {
        self.client
            .json_rpc(
                "eth_feeHistory",
                json!([to_quantity(u128::from(blocks)), "latest", percentiles]),
            )
            .await
    }

    async fn l1_fee(&self, unsigned: &[u8]) -> ChainResult<u128> {
        let data = format!("0x{}", hex::encode(l1_fee_call_data(unsigned)));
        self.quantity("eth_call", json!([{ "to": GAS_PRICE_ORACLE, "data": data }, "latest"]))
            .await
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> ChainResult<String> {
        let params = json!([format!("0x{}", hex::encode(raw))]);
        self.client
            .json_rpc_call("eth_sendRawTransaction", params, false)
            .await?
            .map_err(|e| ChainError::rejected(self.client.chain(), e.message))
    }

    async fn receipt(&self, hash: &str) -> ChainResult<Option<EvmReceipt>> {
        self.client
            .json_rpc("eth_getTransactionReceipt", json!([hash]))
            .await
    }

    async fn chain_id(&self) -> ChainResult<u64> {
        let id = self.quantity("eth_chainId", json!([])).await?;
        u64::try_from(id).map_err(|_| ChainError::rpc("chain id overflow"))
    }

    async fn block_number(&self) -> ChainResult<u64> {
        let number = self.quantity("eth_blockNumber", json!([])).await?;
        u64::try_from(number).map_err(|_| ChainError::rpc("block number overflow"))
    }

    async fn syncing(&self) -> ChainResult<bool> {
        // 同步完成时返回 false，否则返回进度对象
        let value: serde_json::Value = self.client.json_rpc("eth_syncing", json!([])).await?;
        Ok(!matches!(value, serde_json::Value::Bool(false)))
    }
}

#[async_trait]
impl LatestBlock for HttpEvmRpc {
    async fn latest_block(&self) -> ChainResult<BlockInfo> {
        let (chain_id, number, syncing) =
            tokio::try_join!(self.chain_id(), self.block_number(), self.syncing())?;
        Ok(BlockInfo {
            chain_id: chain_id.to_string(),
            number,
            in_sync: !syncing,
        })
    }
}

// ---------------------------------------------------------------- 手续费

/// 估算值为 21000 时保持不变，否则上浮 50%
pub fn padded_gas_limit(estimated: u128) -> u128 {
    if estimated == NATIVE_TRANSFER_GAS {
        estimated
    } else {
        estimated + estimated / 2
    }
}

/// 基础费取历史最大值；priority 按分位列求平均
pub fn base_and_priority_fees(history: &EvmFeeHistory) -> ChainResult<(u128, [u128; 3])> {
    let base_fee = history
        .base_fee_per_gas
        .iter()
        .map(|v| parse_quantity(v))
        .collect::<ChainResult<Vec<_>>>()?
        .into_iter()
        .max()
        .ok_or_else(|| ChainError::rpc("unable to calculate base fee"))?;

    let mut priority = [0u128; 3];
    for (index, slot) in priority.iter_mut().enumerate() {
        let column = history
            .reward
            .iter()
            .filter_map(|row| row.get(index).or_else(|| row.last()))
            .map(|v| parse_quantity(v))
            .collect::<ChainResult<Vec<_>>>()?;
        if !column.is_empty() {
            *slot = column.iter().sum::<u128>() / column.len() as u128;
        }
    }
    Ok((base_fee, priority))
}

/// 签名与估算共用的交易形态
struct CallShape {
    to: String,
    value: u128,
    data: Vec<u8>,
    gas_limit: Option<u128>,
    native_max: bool,
}

fn memo_data(memo: Option<&str>) -> ChainResult<Vec<u8>> {
    match memo {
        Some(memo) if memo.starts_with("0x") => decode_hex(memo),
        Some(memo) => Ok(memo.as_bytes().to_vec()),
        None => Ok(Vec::new()),
    }
}

fn token_contract(asset_id: &AssetId) -> ChainResult<&str> {
    asset_id
        .token_id
        .as_deref()
        .ok_or_else(|| ChainError::precondition("token transfer without token id"))
}

fn shape(params: &TransferParams) -> ChainResult<CallShape> {
    Ok(match params {
        TransferParams::Stake(_) => return Err(ChainError::unsupported("stake")),
        TransferParams::Native(p) => CallShape {
            to: p.destination.clone(),
            value: p.amount,
            data: memo_data(p.memo.as_deref())?,
            gas_limit: None,
            native_max: p.is_max_amount,
        },
        TransferParams::Token(p) => CallShape {
            to: token_contract(&p.asset_id)?.to_lowercase(),
            value: 0,
            data: erc20_transfer_data(&parse_address(&p.destination)?, p.amount),
            gas_limit: None,
            native_max: false,
        },
        TransferParams::Swap(p) => CallShape {
            to: p.to.clone(),
            value: p.value,
            data: decode_hex(&p.swap_payload)?,
            gas_limit: p.gas_limit,
            native_max: false,
        },
        TransferParams::Generic(p) => CallShape {
            to: p.destination.clone(),
            value: p.amount,
            data: decode_hex(&p.payload)?,
            gas_limit: p.gas_limit,
            native_max: false,
        },
        TransferParams::TokenApproval(p) => CallShape {
            to: p.contract.clone(),
            value: 0,
            data: decode_hex(&p.data)?,
            gas_limit: None,
            native_max: false,
        },
    })
}

fn approval_shape(approval: &SwapApproval) -> ChainResult<CallShape> {
    Ok(CallShape {
        to: approval.token.clone(),
        value: 0,
        data: erc20_approve_data(&parse_address(&approval.spender)?),
        gas_limit: None,
        native_max: false,
    })
}

// ---------------------------------------------------------------- 预加载 / 广播 / 状态

pub struct EvmClient {
    rpcs: HashMap<Chain, Arc<dyn EvmRpc>>,
}

impl EvmClient {
    pub fn new(rpcs: impl IntoIterator<Item = (Chain, Arc<dyn EvmRpc>)>) -> Self {
        Self {
            rpcs: rpcs
                .into_iter()
                .filter(|(chain, _)| chain.chain_type() == ChainType::Ethereum)
                .collect(),
        }
    }

    fn rpc(&self, chain: Chain) -> ChainResult<&Arc<dyn EvmRpc>> {
        self.rpcs.get(&chain).ok_or(ChainError::UnsupportedChain(chain))
    }

    async fn preload(&self, input: TransferParams) -> ChainResult<SignerParams> {
        let chain = input.chain();
        let rpc = self.rpc(chain)?;
        let chain_id = chain
            .evm_chain_id()
            .ok_or(ChainError::UnsupportedChain(chain))?;
        let from = input.from().address.clone();
        // 带授权的兑换：估算 approve，兑换本身使用报价给出的 gas 上限
        let (call, swap_gas) = match &input {
            TransferParams::Swap(SwapTransfer {
                approval: Some(approval),
                gas_limit,
                ..
            }) => {
                let swap_gas = gas_limit.ok_or_else(|| {
                    ChainError::precondition("swap with approval requires a quoted gas limit")
                })?;
                (approval_shape(approval)?, Some(swap_gas))
            }
            _ => (shape(&input)?, None),
        };

        let estimate = async {
            match call.gas_limit {
                Some(limit) => Ok::<u128, ChainError>(limit),
                None => {
                    let estimated = rpc
                        .estimate_gas(&EvmCall {
                            from: from.clone(),
                            to: call.to.clone(),
                            value: call.value,
                            data: call.data.clone(),
                        })
                        .await?;
                    Ok(padded_gas_limit(estimated))
                }
            }
        };
        let (nonce, gas_limit, history) = tokio::try_join!(
            rpc.nonce(&from),
            estimate,
            rpc.fee_history(FEE_HISTORY_BLOCKS, &REWARD_PERCENTILES),
        )?;
        let (base_fee, priority_fees) = base_and_priority_fees(&history)?;

        let mut fees = Vec::with_capacity(FeePriority::ALL.len());
        for (priority, priority_fee) in FeePriority::ALL.into_iter().zip(priority_fees) {
            let max_gas_price = base_fee + priority_fee;
            let miner_fee = if call.native_max { max_gas_price } else { priority_fee };
            let fee = Fee::gas(AssetId::native(chain), priority, gas_limit, max_gas_price, miner_fee);
            let mut amount = fee.amount;
            if let Some(swap_gas) = swap_gas {
                amount = amount.saturating_add(swap_gas.saturating_mul(max_gas_price));
            }
            if chain.is_op_stack() {
                let unsigned = signing_payload(&EvmTransaction {
                    chain_id,
                    nonce,
                    max_priority_fee_per_gas: miner_fee,
                    max_fee_per_gas: max_gas_price,
                    gas_limit,
                    to: parse_address(&call.to)?,
                    value: call.value,
                    data: call.data.clone(),
                });
                let l1_fee = rpc.l1_fee(&unsigned).await?;
                amount = amount.saturating_add(l1_fee);
            }
            fees.push(fee.with_amount(amount));
        }

        tracing::info!(
            chain = %chain,
            sender = %mask_address(&from),
            nonce,
            gas_limit = %gas_limit,
            base_fee = %base_fee,
            "EVM preload complete"
        );
        Ok(SignerParams::new(
            input,
            ChainSignData::Evm(EvmChainData { chain_id, nonce, fees }),
        ))
    }
}

#[async_trait]
impl SignerPreloader for EvmClient {
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

    async fn preload_generic(&self, params: &GenericTransfer) -> ChainResult<SignerParams> {
        self.preload(TransferParams::Generic(params.clone())).await
    }

    async fn preload_token_approval(&self, params: &TokenApproval) -> ChainResult<SignerParams> {
        self.preload(TransferParams::TokenApproval(params.clone())).await
    }
}

#[async_trait]
impl BroadcastClient for EvmClient {
    fn supported(&self, chain: Chain) -> bool {
        self.rpcs.contains_key(&chain)
    }

    async fn send(&self, account: &Account, signed: &[u8], tx_type: TransactionType) -> ChainResult<String> {
        let hash = self.rpc(account.chain)?.send_raw_transaction(signed).await?;
        tracing::info!(
            chain = %account.chain,
            sender = %mask_address(&account.address),
            tx_type = ?tx_type,
            hash = %hash,
            "EVM transaction broadcast"
        );
        Ok(hash)
    }
}

pub fn map_receipt(receipt: Option<&EvmReceipt>) -> ChainResult<TransactionChanges> {
    let Some(receipt) = receipt else {
        return Ok(TransactionChanges::pending());
    };
    let state = match receipt.status.as_deref() {
        Some("0x1") => TransactionState::Confirmed,
        Some("0x0") => TransactionState::Reverted,
        _ => return Ok(TransactionChanges::pending()),
    };
    let gas_used = parse_quantity(&receipt.gas_used)?;
    let gas_price = match &receipt.effective_gas_price {
        Some(price) => parse_quantity(price)?,
        None => 0,
    };
    let l1_fee = match &receipt.l1_fee {
        Some(fee) => parse_quantity(fee)?,
        None => 0,
    };
    Ok(TransactionChanges::new(state).with_fee(gas_used * gas_price + l1_fee))
}

#[async_trait]
impl TransactionStatusClient for EvmClient {
    fn supported(&self, chain: Chain) -> bool {
        self.rpcs.contains_key(&chain)
    }

    async fn get_status(&self, request: &TransactionStateRequest) -> ChainResult<TransactionChanges> {
        let receipt = self.rpc(request.chain)?.receipt(&request.hash).await?;
        map_receipt(receipt.as_ref())
    }
}

// ---------------------------------------------------------------- 签名

pub struct EvmSignClient {
    codec: Arc<dyn CryptoCodec>,
}

impl EvmSignClient {
    pub fn new(codec: Arc<dyn CryptoCodec>) -> Self {
        Self { codec }
    }

    fn transaction(
        data: &EvmChainData,
        nonce: u64,
        fee: &Fee,
        gas_limit: u128,
        to: &str,
        value: u128,
        call_data: Vec<u8>,
    ) -> ChainResult<EvmTransaction> {
        let gas = fee
            .gas
            .as_ref()
            .ok_or_else(|| ChainError::precondition("EVM fee has no gas parameters"))?;
        Ok(EvmTransaction {
            chain_id: data.chain_id,
            nonce,
            max_priority_fee_per_gas: gas.miner_fee,
            max_fee_per_gas: gas.max_gas_price,
            gas_limit,
            to: parse_address(to)?,
            value,
            data: call_data,
        })
    }

    fn sign_single(
        &self,
        chain_data: &ChainSignData,
        fee: &Fee,
        to: &str,
        value: u128,
        call_data: Vec<u8>,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let data = crate::expect_chain_data!(chain_data, Evm);
        let gas_limit = fee.gas_limit().unwrap_or_default();
        let tx = Self::transaction(data, data.nonce, fee, gas_limit, to, value, call_data)?;
        Ok(vec![self.codec.encode(&SigningInput::Evm(tx), private_key)?])
    }
}

impl SignClient for EvmSignClient {
    fn supported(&self, chain: Chain) -> bool {
        chain.chain_type() == ChainType::Ethereum
    }

    fn sign_native_transfer(
        &self,
        params: &NativeTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let data = memo_data(params.memo.as_deref())?;
        self.sign_single(chain_data, fee, &params.destination, final_amount, data, private_key)
    }

    fn sign_token_transfer(
        &self,
        params: &TokenTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let contract = token_contract(&params.asset_id)?;
        let data = erc20_transfer_data(&parse_address(&params.destination)?, final_amount);
        self.sign_single(chain_data, fee, contract, 0, data, private_key)
    }

    /// 需要授权时输出 `[approve, swap]`：approve 使用预加载估算的 gas 上限，
    /// swap 使用下一个 nonce 与报价的 gas 上限
    fn sign_swap(
        &self,
        params: &SwapTransfer,
        chain_data: &ChainSignData,
        _final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let data = crate::expect_chain_data!(chain_data, Evm);
        let gas_limit = fee.gas_limit().unwrap_or_default();
        let swap_data = decode_hex(&params.swap_payload)?;

        let Some(approval) = &params.approval else {
            let tx = Self::transaction(data, data.nonce, fee, gas_limit, &params.to, params.value, swap_data)?;
            return Ok(vec![self.codec.encode(&SigningInput::Evm(tx), private_key)?]);
        };

        let swap_gas = params
            .gas_limit
            .ok_or_else(|| ChainError::precondition("swap with approval requires a quoted gas limit"))?;
        let approve = Self::transaction(
            data,
            data.nonce,
            fee,
            gas_limit,
            &approval.token,
            0,
            erc20_approve_data(&parse_address(&approval.spender)?),
        )?;
        let swap = Self::transaction(data, data.nonce + 1, fee, swap_gas, &params.to, params.value, swap_data)?;
        Ok(vec![
            self.codec.encode(&SigningInput::Evm(approve), private_key)?,
            self.codec.encode(&SigningInput::Evm(swap), private_key)?,
        ])
    }

    fn sign_generic(
        &self,
        params: &GenericTransfer,
        chain_data: &ChainSignData,
        final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let data = decode_hex(&params.payload)?;
        self.sign_single(chain_data, fee, &params.destination, final_amount, data, private_key)
    }

    fn sign_token_approval(
        &self,
        params: &TokenApproval,
        chain_data: &ChainSignData,
        _final_amount: u128,
        fee: &Fee,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let data = decode_hex(&params.data)?;
        self.sign_single(chain_data, fee, &params.contract, 0, data, private_key)
    }

    fn sign_message(&self, chain: Chain, message: &[u8], private_key: &[u8]) -> ChainResult<Vec<u8>> {
        self.codec.sign_message(chain, message, private_key)
    }
}
