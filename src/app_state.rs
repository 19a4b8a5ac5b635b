use std::sync::Arc;

use crate::{
    codec::{BuiltinCodec, CryptoCodec},
    config::Config,
    domain::{Chain, ChainType},
    error::ChainResult,
    infrastructure::{build_http_client, KeySigner, LocalKeySigner, NodeSelector, RpcClient},
    service::{
        chains::{
            aptos::{AptosClient, AptosSignClient, HttpAptosRpc},
            bitcoin::{BitcoinClient, BitcoinRpc, BitcoinSignClient, HttpBitcoinRpc},
            cosmos::{CosmosClient, CosmosRpc, CosmosSignClient, HttpCosmosRpc},
            evm::{EvmClient, EvmRpc, EvmSignClient, HttpEvmRpc},
            near::{HttpNearRpc, NearClient, NearSignClient},
            probe_factory,
            solana::{HttpSolanaRpc, SolanaClient, SolanaSignClient},
            sui::{HttpSuiRpc, SuiClient, SuiSignClient},
            ton::{HttpTonRpc, TonClient, TonSignClient},
            tron::{HttpTronRpc, TronClient, TronSignClient},
            xrp::{HttpXrpRpc, XrpClient, XrpSignClient},
            CHAIN_TYPES,
        },
        clients::{BroadcastClient, NodeStatusClient, SignClient, SignerPreloader, TransactionStatusClient},
        node_status::HttpNodeStatusClient,
        pipeline::TransactionPipeline,
        proxy::{
            BroadcastProxy, NodeStatusClientsProxy, SignClientProxy, SignerPreloaderProxy,
            TransactionStatusProxy,
        },
    },
};

/// 同时承担预加载、广播与状态查询的链客户端
trait ChainClient: SignerPreloader + BroadcastClient + TransactionStatusClient {}

impl<T: SignerPreloader + BroadcastClient + TransactionStatusClient> ChainClient for T {}

/// 应用状态：所有代理与流水线的组合根
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub selector: Arc<NodeSelector>,
    pub preloaders: Arc<SignerPreloaderProxy>,
    pub signers: Arc<SignClientProxy>,
    pub broadcasters: Arc<BroadcastProxy>,
    pub statuses: Arc<TransactionStatusProxy>,
    pub node_status: Arc<NodeStatusClientsProxy>,
    pub pipeline: TransactionPipeline,
}

struct ChainClients {
    preloaders: Vec<Arc<dyn SignerPreloader>>,
    broadcasters: Vec<Arc<dyn BroadcastClient>>,
    statuses: Vec<Arc<dyn TransactionStatusClient>>,
}

impl ChainClients {
    fn new() -> Self {
        Self {
            preloaders: Vec::new(),
            broadcasters: Vec::new(),
            statuses: Vec::new(),
        }
    }

    fn add<T: ChainClient + 'static>(&mut self, client: T) {
        let client = Arc::new(client);
        self.preloaders.push(client.clone());
        self.broadcasters.push(client.clone());
        self.statuses.push(client);
    }
}

fn chains_of(chain_type: ChainType) -> impl Iterator<Item = Chain> {
    Chain::all().filter(move |c| c.chain_type() == chain_type)
}

impl AppState {
    /// 使用进程内签名器构建
    pub fn new(config: Config) -> ChainResult<Self> {
        Self::with_signer(config, Arc::new(LocalKeySigner))
    }

    pub fn with_signer(config: Config, signer: Arc<dyn KeySigner>) -> ChainResult<Self> {
        let codec: Arc<dyn CryptoCodec> = Arc::new(BuiltinCodec::new(signer));
        Self::with_codec(config, codec)
    }

    pub fn with_codec(config: Config, codec: Arc<dyn CryptoCodec>) -> ChainResult<Self> {
        let http = build_http_client(&config.rpc)?;
        let selector = Arc::new(NodeSelector::from_config(&config.rpc));
        let rpc = |chain: Chain| RpcClient::from_config(chain, &config.rpc, http.clone(), Arc::clone(&selector));

        let mut clients = ChainClients::new();
        clients.add(EvmClient::new(chains_of(ChainType::Ethereum).map(|c| {
            (c, Arc::new(HttpEvmRpc::new(rpc(c))) as Arc<dyn EvmRpc>)
        })));
        clients.add(BitcoinClient::new(chains_of(ChainType::Bitcoin).map(|c| {
            (c, Arc::new(HttpBitcoinRpc::new(rpc(c))) as Arc<dyn BitcoinRpc>)
        })));
        clients.add(CosmosClient::new(chains_of(ChainType::Cosmos).map(|c| {
            (c, Arc::new(HttpCosmosRpc::new(rpc(c))) as Arc<dyn CosmosRpc>)
        })));
        clients.add(SolanaClient::new(Arc::new(HttpSolanaRpc::new(rpc(Chain::Solana)))));
        clients.add(TonClient::new(
            Arc::new(HttpTonRpc::new(rpc(Chain::Ton))),
            config.pipeline.ton_jetton_activity,
        ));
        clients.add(TronClient::new(Arc::new(HttpTronRpc::new(rpc(Chain::Tron)))));
        clients.add(AptosClient::new(Arc::new(HttpAptosRpc::new(rpc(Chain::Aptos)))));
        clients.add(SuiClient::new(Arc::new(HttpSuiRpc::new(rpc(Chain::Sui)))));
        clients.add(XrpClient::new(Arc::new(HttpXrpRpc::new(rpc(Chain::Xrp)))));
        clients.add(NearClient::new(Arc::new(HttpNearRpc::new(rpc(Chain::Near)))));

        let sign_clients: Vec<Arc<dyn SignClient>> = vec![
            Arc::new(EvmSignClient::new(Arc::clone(&codec))),
            Arc::new(BitcoinSignClient::new(Arc::clone(&codec))),
            Arc::new(CosmosSignClient::new(Arc::clone(&codec))),
            Arc::new(SolanaSignClient::new(Arc::clone(&codec))),
            Arc::new(TonSignClient::new(Arc::clone(&codec), config.pipeline.ton_message_ttl_secs)),
            Arc::new(TronSignClient::new(Arc::clone(&codec))),
            Arc::new(AptosSignClient::new(Arc::clone(&codec))),
            Arc::new(SuiSignClient::new(Arc::clone(&codec))),
            Arc::new(XrpSignClient::new(Arc::clone(&codec))),
            Arc::new(NearSignClient::new(Arc::clone(&codec))),
        ];

        let node_clients: Vec<Arc<dyn NodeStatusClient>> = CHAIN_TYPES
            .iter()
            .map(|t| {
                Arc::new(HttpNodeStatusClient::new(
                    chains_of(*t).collect(),
                    http.clone(),
                    probe_factory(*t),
                )) as Arc<dyn NodeStatusClient>
            })
            .collect();

        let preloaders = Arc::new(SignerPreloaderProxy::new(clients.preloaders)?);
        let signers = Arc::new(SignClientProxy::new(sign_clients)?);
        let broadcasters = Arc::new(BroadcastProxy::new(clients.broadcasters)?);
        let statuses = Arc::new(TransactionStatusProxy::new(clients.statuses)?);
        let node_status = Arc::new(NodeStatusClientsProxy::new(node_clients, Arc::clone(&selector))?);

        let pipeline = TransactionPipeline::new(
            Arc::clone(&preloaders),
            Arc::clone(&signers),
            Arc::clone(&broadcasters),
            Arc::clone(&statuses),
            &config.pipeline,
        );

        tracing::info!(chains = Chain::ALL.len(), "chain clients initialized");

        Ok(Self {
            config: Arc::new(config),
            selector,
            preloaders,
            signers,
            broadcasters,
            statuses,
            node_status,
            pipeline,
        })
    }
}
