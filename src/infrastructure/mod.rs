//! 基础设施层：日志、节点选择、HTTP/JSON-RPC 客户端与密钥签名

pub mod key_signer;
pub mod logging;
pub mod node_selector;
pub mod rpc_client;

pub use key_signer::{KeySigner, LocalKeySigner};
pub use node_selector::{CircuitState, NodeEndpoint, NodeSelector};
pub use rpc_client::{build_http_client, query_escape, HttpResponse, JsonRpcError, RpcClient};
