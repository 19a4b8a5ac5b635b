//! 服务层：链客户端契约、各链实现、按链路由的代理与交易流水线

pub mod chains;
pub mod clients;
pub mod node_status;
pub mod pipeline;
pub mod proxy;

pub use clients::{
    BroadcastClient, NodeStatus, NodeStatusClient, SignClient, SignerPreloader,
    TransactionStatusClient,
};
pub use node_status::{BlockInfo, HttpNodeStatusClient, LatestBlock, ProbeFactory};
pub use pipeline::TransactionPipeline;
pub use proxy::{
    BroadcastProxy, ChainRegistry, NodeStatusClientsProxy, NodeStatusEvent, SignClientProxy,
    SignerPreloaderProxy, TransactionStatusProxy,
};
