//! Aptos 新账户端到端：账户不存在时 sequence 为 0，模拟 gas 计费，BCS 提交，状态轮询

mod common;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chainbridge::{
    codec::aptos::bcs_address,
    domain::{
        Account, Chain, FeePriority, NativeTransfer, TransactionState, TransactionStateRequest,
        TransferParams,
    },
    error::ChainError,
    AppState,
};
use serde_json::{json, Value};
use zeroize::Zeroizing;

const SENDER: &str = "0x80c3cca35602e4568a7ac88d4d91110f8efa6c45c659439c2b4ed04033059c6f";
const RECIPIENT: &str = "0xd7257c62806cea85fc8eaf947377b672fe062b81e6c0b19b6d8a3f408e59cf8c";
const TX_HASH: &str = "0x5b2a9f4c6f3e3b0c1a1d7f2e8c9b0a1d2e3f4a5b6c7d8e9f0a1b2c3d4e5f6a7b";

#[derive(Clone)]
struct AptosNode {
    /// 账户接口返回的 error_code 与 message
    account_error: (&'static str, &'static str),
    status_polls: Arc<AtomicUsize>,
    submitted: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
}

impl AptosNode {
    fn new(account_error: (&'static str, &'static str)) -> Self {
        Self {
            account_error,
            status_polls: Arc::default(),
            submitted: Arc::default(),
        }
    }
}

async fn account(State(node): State<AptosNode>, Path(address): Path<String>) -> Response {
    assert_eq!(address, SENDER);
    let (code, message) = node.account_error;
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "message": message, "error_code": code, "vm_error_code": null })),
    )
        .into_response()
}

async fn gas_price() -> Json<Value> {
    Json(json!({ "gas_estimate": 100, "prioritized_gas_estimate": 150 }))
}

async fn simulate(Json(body): Json<Value>) -> Json<Value> {
    assert_eq!(body["sequence_number"], "0");
    assert_eq!(body["payload"]["arguments"][0], RECIPIENT);
    Json(json!([{ "success": true, "gas_used": "9", "vm_status": "Executed successfully" }]))
}

async fn submit(State(node): State<AptosNode>, headers: HeaderMap, body: Bytes) -> Json<Value> {
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    node.submitted.lock().unwrap().push((content_type, body.to_vec()));
    Json(json!({ "hash": TX_HASH }))
}

async fn transaction(State(node): State<AptosNode>, Path(hash): Path<String>) -> Response {
    assert_eq!(hash, TX_HASH);
    if node.status_polls.fetch_add(1, Ordering::SeqCst) == 0 {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": "Transaction not found", "error_code": "transaction_not_found" })),
        )
            .into_response();
    }
    Json(json!({
        "type": "user_transaction",
        "hash": TX_HASH,
        "success": true,
        "vm_status": "Executed successfully",
        "gas_used": "9",
        "gas_unit_price": "150"
    }))
    .into_response()
}

fn aptos_node(node: AptosNode) -> Router {
    Router::new()
        .route("/v1/accounts/:address", get(account))
        .route("/v1/estimate_gas_price", get(gas_price))
        .route("/v1/transactions/simulate", post(simulate))
        .route("/v1/transactions", post(submit))
        .route("/v1/transactions/by_hash/:hash", get(transaction))
        .with_state(node)
}

fn transfer() -> TransferParams {
    TransferParams::Native(NativeTransfer {
        from: Account::new(Chain::Aptos, SENDER, "m/44'/637'/0'/0'/0'"),
        destination: RECIPIENT.into(),
        amount: 10_000_000_000,
        memo: None,
        is_max_amount: false,
    })
}

/// Test 1: 新账户 sequence 为 0，手续费 = 模拟 gas × 优先价，提交 BCS，Pending 后 Confirmed
#[tokio::test]
async fn test_aptos_new_account_end_to_end() {
    let node = AptosNode::new(("account_not_found", "Account not found by Address(0x80c3) and Ledger version(1)"));
    let url = common::spawn_mock_node(aptos_node(node.clone())).await;
    let state = AppState::new(common::test_config(&[(Chain::Aptos, &url)])).unwrap();

    let params = transfer();
    let loaded = state.pipeline.preload(&params).await.unwrap();
    assert_eq!(loaded.chain_data.sequence(), Some(0));
    let normal = loaded.fee(FeePriority::Normal).unwrap();
    assert_eq!(normal.amount, 1_350);
    assert_eq!(normal.gas_limit(), Some(9));
    assert_eq!(loaded.fee(FeePriority::Slow).unwrap().amount, 900);

    let payloads = state
        .pipeline
        .sign(loaded, FeePriority::Normal, Zeroizing::new(vec![2u8; 32]))
        .await
        .unwrap();
    assert_eq!(payloads.len(), 1);
    let recipient = bcs_address(RECIPIENT).unwrap();
    assert!(payloads[0].windows(32).any(|w| w == recipient));

    let hashes = state
        .pipeline
        .broadcast_all(params.from().clone(), payloads.clone(), chainbridge::domain::TransactionType::Transfer)
        .await
        .unwrap();
    assert_eq!(hashes, vec![TX_HASH.to_string()]);

    let submitted = node.submitted.lock().unwrap().clone();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].0, "application/x.aptos.signed_transaction+bcs");
    assert_eq!(submitted[0].1, payloads[0]);

    let request = TransactionStateRequest::new(Chain::Aptos, TX_HASH, SENDER);
    let first = state.pipeline.poll_status(&request).await.unwrap();
    assert_eq!(first.state, TransactionState::Pending);

    let second = state.pipeline.poll_status(&request).await.unwrap();
    assert_eq!(second.state, TransactionState::Confirmed);
    assert_eq!(second.fee, Some(1_350));
}

/// Test 2: 其他错误信息原样作为失败返回
#[tokio::test]
async fn test_aptos_other_account_error_fails_with_message() {
    let node = AptosNode::new(("resource_not_found", "Resource not found by Address(0x80c3)"));
    let url = common::spawn_mock_node(aptos_node(node)).await;
    let state = AppState::new(common::test_config(&[(Chain::Aptos, &url)])).unwrap();

    let err = state.pipeline.preload(&transfer()).await.unwrap_err();
    assert_eq!(err, ChainError::Rpc("Resource not found by Address(0x80c3)".into()));
}
