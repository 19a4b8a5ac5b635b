//! 按链路由的代理层
//!
//! 每个 Proxy 由一组实现构建，构建时对 `Chain::all()` 做穷尽校验：
//! 每条链必须恰好有一个实现声明 `supported(chain)`，否则返回 `Configuration` 错误。
//! 之后的分发只是一次哈希表查找。

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Instant,
};

use futures::future::join_all;
use tokio::sync::mpsc;

use super::chains::tron;
use super::clients::{
    BroadcastClient, NodeStatus, NodeStatusClient, SignClient, SignerPreloader,
    TransactionStatusClient,
};
use crate::{
    codec::{decode_hex, evm},
    domain::{
        mask_address, Account, Chain, FeePriority, NativeTransfer, SignerParams, SwapTransfer,
        TokenTransfer, TransactionChanges, TransactionStateRequest, TransactionType,
        TransferParams, TRANSFER_SWAP_PROVIDERS,
    },
    error::{ChainError, ChainResult},
    infrastructure::NodeSelector,
    metrics::{self, Stage},
};

/// 链 -> 实现 的注册表
pub struct ChainRegistry<T: ?Sized> {
    table: HashMap<Chain, Arc<T>>,
}

impl<T: ?Sized> ChainRegistry<T> {
    pub fn build(
        kind: &str,
        implementations: Vec<Arc<T>>,
        supported: impl Fn(&T, Chain) -> bool,
    ) -> ChainResult<Self> {
        let mut table = HashMap::new();
        for chain in Chain::all() {
            let mut matches = implementations.iter().filter(|i| supported(i.as_ref(), chain));
            let first = matches.next().ok_or_else(|| {
                ChainError::Configuration(format!("no {} registered for {}", kind, chain))
            })?;
            if matches.next().is_some() {
                return Err(ChainError::Configuration(format!(
                    "multiple {} implementations registered for {}",
                    kind, chain
                )));
            }
            table.insert(chain, Arc::clone(first));
        }
        Ok(Self { table })
    }

    pub fn get(&self, chain: Chain) -> ChainResult<&Arc<T>> {
        self.table.get(&chain).ok_or(ChainError::UnsupportedChain(chain))
    }
}

fn record<T>(stage: Stage, chain: Chain, result: &ChainResult<T>) {
    metrics::record(stage, chain, result.is_ok());
}

/// Ethereum / Tron 上的代币兑换：存款地址取自 `transfer(address,uint256)` 调用数据，
/// 调用数据不合法时在签名前失败。其余情况为兑换目标地址
fn swap_deposit_address(swap: &SwapTransfer) -> ChainResult<String> {
    if swap.from_asset.is_native() {
        return Ok(swap.to.clone());
    }
    let recipient = || {
        decode_hex(&swap.swap_payload)
            .and_then(|data| evm::transfer_recipient_bytes(&data))
            .map_err(|_| ChainError::precondition("invalid call data"))
    };
    match swap.from_asset.chain {
        Chain::Ethereum => Ok(format!("0x{}", hex::encode(recipient()?))),
        Chain::Tron => Ok(tron::tron_address_from_bytes(&recipient()?)),
        _ => Ok(swap.to.clone()),
    }
}

/// 转账式兑换：把兑换改写为一笔到存款地址的普通转账
pub fn transfer_like_swap(swap: &SwapTransfer) -> ChainResult<TransferParams> {
    let destination = swap_deposit_address(swap)?;
    Ok(if swap.from_asset.is_native() {
        TransferParams::Native(NativeTransfer {
            from: swap.from.clone(),
            destination,
            amount: swap.from_amount,
            memo: None,
            is_max_amount: swap.is_max_amount,
        })
    } else {
        TransferParams::Token(TokenTransfer {
            from: swap.from.clone(),
            destination,
            asset_id: swap.from_asset.clone(),
            amount: swap.from_amount,
            memo: None,
            is_max_amount: swap.is_max_amount,
        })
    })
}

fn is_transfer_like(swap: &SwapTransfer) -> bool {
    TRANSFER_SWAP_PROVIDERS.contains(&swap.protocol_id.as_str())
}

// ---------------------------------------------------------------- 预加载

pub struct SignerPreloaderProxy {
    registry: ChainRegistry<dyn SignerPreloader>,
}

impl SignerPreloaderProxy {
    pub fn new(preloaders: Vec<Arc<dyn SignerPreloader>>) -> ChainResult<Self> {
        Ok(Self {
            registry: ChainRegistry::build("preloader", preloaders, |p, c| p.supported(c))?,
        })
    }

    /// 校验交易描述后路由到对应链的预加载器。
    /// 返回的 `SignerParams.input` 始终是调用方传入的原始描述
    pub async fn preload(&self, params: &TransferParams) -> ChainResult<SignerParams> {
        let chain = params.chain();
        let result = self.dispatch(params).await;
        record(Stage::Preload, chain, &result);
        match &result {
            Ok(_) => tracing::info!(
                chain = %chain,
                sender = %mask_address(&params.from().address),
                tx_type = ?params.transaction_type(),
                "preload complete"
            ),
            Err(e) => tracing::warn!(chain = %chain, code = e.code(), error = %e, "preload failed"),
        }
        result
    }

    async fn dispatch(&self, params: &TransferParams) -> ChainResult<SignerParams> {
        params.validate()?;
        let preloader = self.registry.get(params.chain())?;
        match params {
            TransferParams::Native(p) => preloader.preload_native_transfer(p).await,
            TransferParams::Token(p) => preloader.preload_token_transfer(p).await,
            TransferParams::Swap(p) if is_transfer_like(p) => {
                let loaded = match transfer_like_swap(p)? {
                    TransferParams::Native(t) => preloader.preload_native_transfer(&t).await?,
                    TransferParams::Token(t) => preloader.preload_token_transfer(&t).await?,
                    _ => return Err(ChainError::unsupported("swap")),
                };
                Ok(SignerParams::new(params.clone(), loaded.chain_data))
            }
            TransferParams::Swap(p) => preloader.preload_swap(p).await,
            TransferParams::Generic(p) => preloader.preload_generic(p).await,
            TransferParams::TokenApproval(p) => preloader.preload_token_approval(p).await,
            TransferParams::Stake(p) => preloader.preload_stake(p).await,
        }
    }
}

// ---------------------------------------------------------------- 签名

pub struct SignClientProxy {
    registry: ChainRegistry<dyn SignClient>,
}

impl SignClientProxy {
    pub fn new(clients: Vec<Arc<dyn SignClient>>) -> ChainResult<Self> {
        Ok(Self {
            registry: ChainRegistry::build("sign client", clients, |c, chain| c.supported(chain))?,
        })
    }

    /// 按所选档位的手续费签名，返回按顺序广播的载荷
    pub fn sign(
        &self,
        params: &SignerParams,
        priority: FeePriority,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let chain = params.input.chain();
        let result = self.dispatch(params, priority, private_key);
        record(Stage::Sign, chain, &result);
        match &result {
            Ok(payloads) => tracing::info!(chain = %chain, payloads = payloads.len(), "transaction signed"),
            Err(e) => tracing::warn!(chain = %chain, code = e.code(), error = %e, "signing failed"),
        }
        result
    }

    fn dispatch(
        &self,
        params: &SignerParams,
        priority: FeePriority,
        private_key: &[u8],
    ) -> ChainResult<Vec<Vec<u8>>> {
        let client = self.registry.get(params.input.chain())?;
        let fee = params
            .fee(priority)
            .ok_or_else(|| ChainError::insufficient("no fee in chain data"))?;
        let data = &params.chain_data;

        match &params.input {
            TransferParams::Swap(p) if is_transfer_like(p) => {
                let input = transfer_like_swap(p)?;
                let amount = input.final_amount(fee);
                match &input {
                    TransferParams::Native(t) => client.sign_native_transfer(t, data, amount, fee, private_key),
                    TransferParams::Token(t) => client.sign_token_transfer(t, data, amount, fee, private_key),
                    _ => Err(ChainError::unsupported("swap")),
                }
            }
            input => {
                let amount = input.final_amount(fee);
                match input {
                    TransferParams::Native(p) => client.sign_native_transfer(p, data, amount, fee, private_key),
                    TransferParams::Token(p) => client.sign_token_transfer(p, data, amount, fee, private_key),
                    TransferParams::Swap(p) => client.sign_swap(p, data, amount, fee, private_key),
                    TransferParams::Generic(p) => client.sign_generic(p, data, amount, fee, private_key),
                    TransferParams::TokenApproval(p) => {
                        client.sign_token_approval(p, data, amount, fee, private_key)
                    }
                    TransferParams::Stake(p) => client.sign_stake(p, data, amount, fee, private_key),
                }
            }
        }
    }

    pub fn sign_message(&self, chain: Chain, message: &[u8], private_key: &[u8]) -> ChainResult<Vec<u8>> {
        self.registry.get(chain)?.sign_message(chain, message, private_key)
    }
}

// ---------------------------------------------------------------- 广播

pub struct BroadcastProxy {
    registry: ChainRegistry<dyn BroadcastClient>,
}

impl BroadcastProxy {
    pub fn new(clients: Vec<Arc<dyn BroadcastClient>>) -> ChainResult<Self> {
        Ok(Self {
            registry: ChainRegistry::build("broadcast client", clients, |c, chain| c.supported(chain))?,
        })
    }

    pub async fn send(&self, account: &Account, signed: &[u8], tx_type: TransactionType) -> ChainResult<String> {
        let chain = account.chain;
        let result = match self.registry.get(chain) {
            Ok(client) => client.send(account, signed, tx_type).await,
            Err(e) => Err(e),
        };
        record(Stage::Broadcast, chain, &result);
        if let Err(e) = &result {
            tracing::warn!(
                chain = %chain,
                sender = %mask_address(&account.address),
                code = e.code(),
                error = %e,
                "broadcast failed"
            );
        }
        result
    }
}

// ---------------------------------------------------------------- 交易状态

pub struct TransactionStatusProxy {
    registry: ChainRegistry<dyn TransactionStatusClient>,
}

impl TransactionStatusProxy {
    pub fn new(clients: Vec<Arc<dyn TransactionStatusClient>>) -> ChainResult<Self> {
        Ok(Self {
            registry: ChainRegistry::build("transaction status client", clients, |c, chain| {
                c.supported(chain)
            })?,
        })
    }

    pub async fn get_status(&self, request: &TransactionStateRequest) -> ChainResult<TransactionChanges> {
        let result = match self.registry.get(request.chain) {
            Ok(client) => client.get_status(request).await,
            Err(e) => Err(e),
        };
        record(Stage::StatusPoll, request.chain, &result);
        result
    }
}

// ---------------------------------------------------------------- 节点状态

/// 一次节点探测的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStatusEvent {
    pub chain: Chain,
    pub url: String,
    pub result: ChainResult<NodeStatus>,
}

pub struct NodeStatusClientsProxy {
    registry: ChainRegistry<dyn NodeStatusClient>,
    selector: Arc<NodeSelector>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<NodeStatusEvent>>>,
}

impl NodeStatusClientsProxy {
    pub fn new(clients: Vec<Arc<dyn NodeStatusClient>>, selector: Arc<NodeSelector>) -> ChainResult<Self> {
        Ok(Self {
            registry: ChainRegistry::build("node status client", clients, |c, chain| c.supported(chain))?,
            selector,
            subscribers: Mutex::new(Vec::new()),
        })
    }

    /// 订阅探测事件。接收端由调用方持有，丢弃后自动退订
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<NodeStatusEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.push(tx);
        rx
    }

    pub async fn get_node_status(&self, chain: Chain, url: &str) -> ChainResult<NodeStatus> {
        self.registry.get(chain)?.get_node_status(chain, url).await
    }

    /// 并发探测该链所有已配置节点，结果回写节点选择器并推送给订阅者
    pub async fn probe_all(&self, chain: Chain) -> ChainResult<Vec<NodeStatusEvent>> {
        let client = Arc::clone(self.registry.get(chain)?);
        let endpoints = self.selector.endpoints(chain).await;

        let probes = endpoints.into_iter().map(|endpoint| {
            let client = Arc::clone(&client);
            async move {
                let started = Instant::now();
                let result = client.get_node_status(chain, &endpoint.url).await;
                (endpoint.url, result, started.elapsed().as_millis() as i64)
            }
        });

        let mut events = Vec::new();
        for (url, result, elapsed_ms) in join_all(probes).await {
            match &result {
                Ok(status) if status.in_sync => {
                    self.selector
                        .record_success(chain, &url, status.latency_ms as i64)
                        .await
                }
                Ok(_) => {
                    tracing::warn!(chain = %chain, url = %url, elapsed_ms, "node is not in sync");
                    self.selector.record_failure(chain, &url).await
                }
                Err(e) => {
                    tracing::warn!(chain = %chain, url = %url, elapsed_ms, error = %e, "node probe failed");
                    self.selector.record_failure(chain, &url).await
                }
            }
            events.push(NodeStatusEvent { chain, url, result });
        }

        self.publish(&events);
        Ok(events)
    }

    fn publish(&self, events: &[NodeStatusEvent]) {
        let mut subscribers = match self.subscribers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        subscribers.retain(|tx| events.iter().all(|event| tx.send(event.clone()).is_ok()));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    use super::*;
    use crate::domain::{
        AssetId, ChainSignData, ChainType, EvmChainData, Fee, GenericTransfer, TonChainData,
    };

    struct FamilyPreloader {
        chain_type: ChainType,
        seen: StdMutex<Vec<String>>,
    }

    impl FamilyPreloader {
        fn new(chain_type: ChainType) -> Self {
            Self {
                chain_type,
                seen: StdMutex::new(vec![]),
            }
        }

        fn chain_data(chain: Chain) -> ChainSignData {
            ChainSignData::Evm(EvmChainData {
                chain_id: chain.evm_chain_id().unwrap_or(0),
                nonce: 3,
                fees: vec![Fee::new(AssetId::native(chain), FeePriority::Normal, 21)],
            })
        }
    }

    #[async_trait]
    impl SignerPreloader for FamilyPreloader {
        fn supported(&self, chain: Chain) -> bool {
            chain.chain_type() == self.chain_type
        }

        async fn preload_native_transfer(&self, params: &NativeTransfer) -> ChainResult<SignerParams> {
            self.seen.lock().unwrap().push(format!("native:{}", params.destination));
            Ok(SignerParams::new(
                TransferParams::Native(params.clone()),
                Self::chain_data(params.from.chain),
            ))
        }

        async fn preload_token_transfer(&self, params: &TokenTransfer) -> ChainResult<SignerParams> {
            self.seen.lock().unwrap().push(format!("token:{}", params.destination));
            Ok(SignerParams::new(
                TransferParams::Token(params.clone()),
                Self::chain_data(params.from.chain),
            ))
        }
    }

    struct RecordingSigner {
        chain_type: ChainType,
        calls: StdMutex<Vec<String>>,
    }

    impl SignClient for RecordingSigner {
        fn supported(&self, chain: Chain) -> bool {
            chain.chain_type() == self.chain_type
        }

        fn sign_native_transfer(
            &self,
            params: &NativeTransfer,
            _chain_data: &ChainSignData,
            final_amount: u128,
            _fee: &Fee,
            _private_key: &[u8],
        ) -> ChainResult<Vec<Vec<u8>>> {
            let call = format!("native:{}:{}", params.destination, final_amount);
            self.calls.lock().unwrap().push(call.clone());
            Ok(vec![call.into_bytes()])
        }

        fn sign_token_transfer(
            &self,
            params: &TokenTransfer,
            _chain_data: &ChainSignData,
            final_amount: u128,
            _fee: &Fee,
            _private_key: &[u8],
        ) -> ChainResult<Vec<Vec<u8>>> {
            let call = format!("token:{}:{}", params.destination, final_amount);
            self.calls.lock().unwrap().push(call.clone());
            Ok(vec![call.into_bytes()])
        }
    }

    const FAMILIES: [ChainType; 10] = crate::service::chains::CHAIN_TYPES;

    fn preloaders() -> Vec<Arc<dyn SignerPreloader>> {
        FAMILIES
            .iter()
            .map(|t| Arc::new(FamilyPreloader::new(*t)) as Arc<dyn SignerPreloader>)
            .collect()
    }

    fn signers() -> Vec<Arc<dyn SignClient>> {
        FAMILIES
            .iter()
            .map(|t| {
                Arc::new(RecordingSigner {
                    chain_type: *t,
                    calls: StdMutex::new(vec![]),
                }) as Arc<dyn SignClient>
            })
            .collect()
    }

    fn swap(payload: &str, token: bool) -> SwapTransfer {
        SwapTransfer {
            from: Account::new(Chain::Ethereum, "0x1111111111111111111111111111111111111111", ""),
            from_asset: if token {
                AssetId::token(Chain::Ethereum, "0xdAC17F958D2ee523a2206206994597C13D831ec7")
            } else {
                AssetId::native(Chain::Ethereum)
            },
            to_asset: AssetId::native(Chain::Near),
            from_amount: 5_000,
            to_amount: 1,
            to: "0x2222222222222222222222222222222222222222".into(),
            value: 0,
            swap_payload: payload.into(),
            protocol_id: "near_intents".into(),
            approval: None,
            gas_limit: None,
            is_max_amount: false,
        }
    }

    /// Test 1: 每条链恰好一个实现
    #[test]
    fn test_registry_requires_exactly_one_implementation() {
        assert!(SignerPreloaderProxy::new(preloaders()).is_ok());

        let mut missing = preloaders();
        missing.pop();
        let err = SignerPreloaderProxy::new(missing).err().unwrap();
        assert!(matches!(err, ChainError::Configuration(ref m) if m.contains("near")));

        let mut duplicate = preloaders();
        duplicate.push(Arc::new(FamilyPreloader::new(ChainType::Ton)));
        let err = SignerPreloaderProxy::new(duplicate).err().unwrap();
        assert!(matches!(err, ChainError::Configuration(ref m) if m.contains("multiple")));
    }

    /// Test 2: 未实现的交易类型返回 UnsupportedOperation
    #[tokio::test]
    async fn test_unsupported_operation_passes_through() {
        let proxy = SignerPreloaderProxy::new(preloaders()).unwrap();
        let generic = TransferParams::Generic(GenericTransfer {
            from: Account::new(Chain::Ton, "EQsender", ""),
            destination: "EQdest".into(),
            amount: 1,
            memo: None,
            payload: "".into(),
            gas_limit: None,
        });
        assert!(matches!(
            proxy.preload(&generic).await,
            Err(ChainError::UnsupportedOperation { operation: "generic transfer" })
        ));
    }

    /// Test 3: 转账式兑换按 ERC-20 调用数据中的存款地址签名
    #[tokio::test]
    async fn test_transfer_like_swap_uses_deposit_address() {
        let deposit = [0x33u8; 20];
        let payload = hex::encode(evm::erc20_transfer_data(&deposit, 5_000));
        let params = TransferParams::Swap(swap(&payload, true));

        let preloader = SignerPreloaderProxy::new(preloaders()).unwrap();
        let loaded = preloader.preload(&params).await.unwrap();
        assert_eq!(loaded.input, params);

        let signer = SignClientProxy::new(signers()).unwrap();
        let signed = signer.sign(&loaded, FeePriority::Normal, &[1u8; 32]).unwrap();
        assert_eq!(
            String::from_utf8(signed[0].clone()).unwrap(),
            format!("token:0x{}:5000", hex::encode(deposit))
        );
    }

    #[test]
    fn test_transfer_like_native_swap_falls_back_to_target() {
        let mut params = swap("0xdeadbeef", false);
        params.is_max_amount = true;
        let TransferParams::Native(transfer) = transfer_like_swap(&params).unwrap() else {
            panic!("expected native transfer");
        };
        assert_eq!(transfer.destination, "0x2222222222222222222222222222222222222222");
        assert_eq!(transfer.amount, 5_000);
        assert!(transfer.is_max_amount);
    }

    /// 调用数据不是 `transfer(address,uint256)` 的代币兑换在签名前失败
    #[tokio::test]
    async fn test_transfer_like_token_swap_rejects_invalid_call_data() {
        for payload in ["0xdeadbeef", "", "not hex"] {
            assert_eq!(
                transfer_like_swap(&swap(payload, true)),
                Err(ChainError::precondition("invalid call data"))
            );
        }

        let params = TransferParams::Swap(swap("0xdeadbeef", true));
        let err = SignerPreloaderProxy::new(preloaders()).unwrap().preload(&params).await.unwrap_err();
        assert!(matches!(err, ChainError::EncodingPrecondition(ref m) if m == "invalid call data"));

        let loaded = SignerParams::new(params, FamilyPreloader::chain_data(Chain::Ethereum));
        let err = SignClientProxy::new(signers()).unwrap().sign(&loaded, FeePriority::Normal, &[1u8; 32]);
        assert!(matches!(err, Err(ChainError::EncodingPrecondition(_))));
    }

    #[test]
    fn test_transfer_like_token_swap_keeps_max_flag() {
        let mut params = swap(&hex::encode(evm::erc20_transfer_data(&[0x44; 20], 5_000)), true);
        params.is_max_amount = true;
        let TransferParams::Token(transfer) = transfer_like_swap(&params).unwrap() else {
            panic!("expected token transfer");
        };
        assert_eq!(transfer.destination, format!("0x{}", hex::encode([0x44u8; 20])));
        assert!(transfer.is_max_amount);
    }

    #[test]
    fn test_transfer_like_tron_swap_decodes_base58_deposit() {
        let deposit = [0x55u8; 20];
        let mut params = swap(&hex::encode(evm::erc20_transfer_data(&deposit, 5_000)), true);
        params.from = Account::new(Chain::Tron, "TJRabPrwbZy45sbavfcjinPJC18kjpRTv8", "");
        params.from_asset = AssetId::token(Chain::Tron, "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t");
        let TransferParams::Token(transfer) = transfer_like_swap(&params).unwrap() else {
            panic!("expected token transfer");
        };
        assert!(transfer.destination.starts_with('T'));
        assert_eq!(tron::tron_address_bytes(&transfer.destination).unwrap(), deposit);
    }

    /// 其他链的代币兑换不解析调用数据
    #[test]
    fn test_transfer_like_token_swap_on_other_chain_uses_target() {
        let mut params = swap("0xdeadbeef", true);
        params.from = Account::new(Chain::Solana, "7v91N7iZ9mNicL8WfG6cgSCKyRXydQjLh6UYBWwm6y1Q", "");
        params.from_asset = AssetId::token(Chain::Solana, "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v");
        params.to = "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T".into();
        let TransferParams::Token(transfer) = transfer_like_swap(&params).unwrap() else {
            panic!("expected token transfer");
        };
        assert_eq!(transfer.destination, "4Nd1mBQtrMJVYVfKf2PJy9NZUZdTAsp7D4xWLs4gDB4T");
    }

    /// Test 4: 所选档位缺失时使用链数据中的唯一手续费
    #[test]
    fn test_sign_falls_back_to_available_fee() {
        let signer = SignClientProxy::new(signers()).unwrap();
        let params = SignerParams::new(
            TransferParams::Native(NativeTransfer {
                from: Account::new(Chain::Aptos, "0x1", ""),
                destination: "0x2".into(),
                amount: 1,
                memo: None,
                is_max_amount: false,
            }),
            ChainSignData::Ton(TonChainData {
                sequence: 1,
                jetton_wallet_address: None,
                expire_at: None,
                fee: Fee::new(AssetId::native(Chain::Ton), FeePriority::Normal, 10),
            }),
        );
        let signed = signer.sign(&params, FeePriority::Fast, &[1u8; 32]).unwrap();
        assert_eq!(signed[0], b"native:0x2:1".to_vec());
    }

    struct FixedNodeStatus {
        chain_type: ChainType,
    }

    #[async_trait]
    impl NodeStatusClient for FixedNodeStatus {
        fn supported(&self, chain: Chain) -> bool {
            chain.chain_type() == self.chain_type
        }

        async fn get_node_status(&self, _chain: Chain, url: &str) -> ChainResult<NodeStatus> {
            if url.contains("down") {
                return Err(ChainError::NetworkUnavailable("connection refused".into()));
            }
            Ok(NodeStatus {
                chain_id: "1".into(),
                latest_block: 100,
                in_sync: true,
                latency_ms: 12,
            })
        }
    }

    /// Test 5: 探测结果推送给订阅者并回写节点选择器
    #[tokio::test]
    async fn test_probe_all_publishes_events() {
        let selector = Arc::new(NodeSelector::new());
        selector.register(Chain::Ethereum, "http://up.example", 1).await;
        selector.register(Chain::Ethereum, "http://down.example", 2).await;

        let clients = FAMILIES
            .iter()
            .map(|t| Arc::new(FixedNodeStatus { chain_type: *t }) as Arc<dyn NodeStatusClient>)
            .collect();
        let proxy = NodeStatusClientsProxy::new(clients, Arc::clone(&selector)).unwrap();
        let mut events = proxy.subscribe();

        let results = proxy.probe_all(Chain::Ethereum).await.unwrap();
        assert_eq!(results.len(), 2);

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert!(first.result.is_ok());
        assert!(matches!(second.result, Err(ChainError::NetworkUnavailable(_))));

        let endpoints = selector.endpoints(Chain::Ethereum).await;
        let down = endpoints.iter().find(|e| e.url.contains("down")).unwrap();
        assert_eq!(down.fail_count, 1);
        let up = endpoints.iter().find(|e| e.url.contains("up")).unwrap();
        assert_eq!(up.avg_latency_ms, 12);
    }
}
