//! 共享的节点 HTTP 客户端
//!
//! 每条链一个 `RpcClient`：节点由 `NodeSelector` 选出，只读请求按线性退避重试，
//! 广播只发送一次。每次请求都会把成功（延迟）或失败回写到选择器。

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;

use super::node_selector::NodeSelector;
use crate::{
    config::RpcConfig,
    domain::Chain,
    error::{ChainError, ChainResult},
};

const MAX_ERROR_BODY: usize = 256;

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    fn is_server_fault(&self) -> bool {
        self.status >= 500 || self.status == 429
    }

    pub fn json<T: DeserializeOwned>(&self) -> ChainResult<T> {
        Ok(serde_json::from_str(&self.body)?)
    }

    /// 非 2xx 状态转为错误
    pub fn error_for_status(self) -> ChainResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(status_error(self.status, &self.body))
        }
    }
}

/// JSON-RPC 层的业务错误（节点正常响应但 `error` 非空）
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JsonRpcError {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Option<Value>,
}

impl std::fmt::Display for JsonRpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

pub fn status_error(status: u16, body: &str) -> ChainError {
    if status >= 500 || status == 429 {
        ChainError::ServiceUnavailable(format!("HTTP {}", status))
    } else {
        ChainError::Rpc(format!("HTTP {}: {}", status, truncate(body)))
    }
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

#[derive(Clone, Copy)]
enum Body<'a> {
    Json(&'a Value),
    Bytes(&'a str, &'a [u8]),
}

/// 查询参数转义（保留 RFC 3986 unreserved 字符）
pub fn query_escape(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b':' => {
                (b as char).to_string()
            }
            other => format!("%{:02X}", other),
        })
        .collect()
}

fn join_url(base: &str, path: &str) -> String {
    if path.is_empty() {
        return base.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// 按 RPC 配置构建带超时的 reqwest 客户端
pub fn build_http_client(config: &RpcConfig) -> ChainResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(10)
        .build()
        .map_err(|e| ChainError::Configuration(format!("failed to build HTTP client: {}", e)))
}

#[derive(Clone)]
pub struct RpcClient {
    chain: Chain,
    http: reqwest::Client,
    selector: Arc<NodeSelector>,
    max_retries: u32,
    retry_delay: Duration,
}

impl RpcClient {
    pub fn new(
        chain: Chain,
        http: reqwest::Client,
        selector: Arc<NodeSelector>,
        max_retries: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            chain,
            http,
            selector,
            max_retries: max_retries.max(1),
            retry_delay,
        }
    }

    pub fn from_config(
        chain: Chain,
        config: &RpcConfig,
        http: reqwest::Client,
        selector: Arc<NodeSelector>,
    ) -> Self {
        Self::new(
            chain,
            http,
            selector,
            config.max_retries,
            Duration::from_millis(config.retry_delay_ms),
        )
    }

    /// 固定单节点的客户端（测试与节点探测使用）
    pub fn single(chain: Chain, url: impl Into<String>) -> Self {
        Self::new(
            chain,
            reqwest::Client::new(),
            Arc::new(NodeSelector::single(chain, url)),
            1,
            Duration::ZERO,
        )
    }

    /// 指定节点的客户端，复用已有连接池（节点探测使用）
    pub fn for_endpoint(chain: Chain, http: reqwest::Client, url: impl Into<String>) -> Self {
        Self::new(
            chain,
            http,
            Arc::new(NodeSelector::single(chain, url)),
            1,
            Duration::ZERO,
        )
    }

    pub fn with_retries(mut self, max_retries: u32, retry_delay: Duration) -> Self {
        self.max_retries = max_retries.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn chain(&self) -> Chain {
        self.chain
    }

    pub fn selector(&self) -> &Arc<NodeSelector> {
        &self.selector
    }

    pub async fn get_raw(&self, path: &str) -> ChainResult<HttpResponse> {
        self.execute(reqwest::Method::GET, path, None, true).await
    }

    /// `retry = false` 用于广播等非幂等请求
    pub async fn post_raw(&self, path: &str, body: &Value, retry: bool) -> ChainResult<HttpResponse> {
        self.execute(reqwest::Method::POST, path, Some(Body::Json(body)), retry)
            .await
    }

    /// 原始字节请求体（例如 BCS 编码的交易），不重试
    pub async fn post_bytes(&self, path: &str, content_type: &str, body: &[u8]) -> ChainResult<HttpResponse> {
        self.execute(
            reqwest::Method::POST,
            path,
            Some(Body::Bytes(content_type, body)),
            false,
        )
        .await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ChainResult<T> {
        self.get_raw(path).await?.error_for_status()?.json()
    }

    pub async fn post_json<T: DeserializeOwned>(&self, path: &str, body: &Value) -> ChainResult<T> {
        self.post_raw(path, body, true)
            .await?
            .error_for_status()?
            .json()
    }

    /// JSON-RPC 2.0 调用。外层错误为传输/解析失败，内层为节点返回的业务错误
    pub async fn json_rpc_call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
        retry: bool,
    ) -> ChainResult<Result<T, JsonRpcError>> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response = self.post_raw("", &payload, retry).await?;

        let body: Value = match serde_json::from_str(&response.body) {
            Ok(v) => v,
            Err(_) if !response.is_success() => {
                return Err(status_error(response.status, &response.body))
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            let error: JsonRpcError = serde_json::from_value(error.clone()).unwrap_or_else(|_| {
                JsonRpcError {
                    code: 0,
                    message: error.to_string(),
                    data: None,
                }
            });
            return Ok(Err(error));
        }

        let result = body.get("result").cloned().unwrap_or(Value::Null);
        Ok(Ok(serde_json::from_value(result)?))
    }

    /// 只读 JSON-RPC 调用，节点业务错误归为 `ChainError::Rpc`
    pub async fn json_rpc<T: DeserializeOwned>(&self, method: &str, params: Value) -> ChainResult<T> {
        self.json_rpc_call(method, params, true)
            .await?
            .map_err(|e| ChainError::Rpc(format!("{}: {}", method, e)))
    }

    async fn execute(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<Body<'_>>,
        retry: bool,
    ) -> ChainResult<HttpResponse> {
        let attempts = if retry { self.max_retries } else { 1 };
        let mut last_error: Option<ChainError> = None;

        for attempt in 1..=attempts {
            let endpoint = self.selector.select(self.chain).await.ok_or_else(|| {
                ChainError::Configuration(format!("no RPC endpoint configured for {}", self.chain))
            })?;
            let url = join_url(&endpoint.url, path);
            let started = Instant::now();

            let mut request = self.http.request(method.clone(), &url);
            match body {
                Some(Body::Json(value)) => request = request.json(value),
                Some(Body::Bytes(content_type, bytes)) => {
                    request = request
                        .header(reqwest::header::CONTENT_TYPE, content_type)
                        .body(bytes.to_vec())
                }
                None => {}
            }

            let outcome = match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    response
                        .text()
                        .await
                        .map(|body| HttpResponse { status, body })
                        .map_err(ChainError::from)
                }
                Err(e) => Err(ChainError::from(e)),
            };

            let error = match outcome {
                Ok(response) if !response.is_server_fault() => {
                    let latency_ms = started.elapsed().as_millis() as i64;
                    self.selector
                        .record_success(self.chain, &endpoint.url, latency_ms)
                        .await;
                    return Ok(response);
                }
                Ok(response) => status_error(response.status, &response.body),
                Err(e) => e,
            };

            self.selector.record_failure(self.chain, &endpoint.url).await;
            tracing::warn!(
                chain = %self.chain,
                endpoint = %endpoint.url,
                attempt,
                error = %error,
                "RPC request attempt failed"
            );

            let retryable = error.is_retryable();
            last_error = Some(error);
            if !retryable {
                break;
            }
            if attempt < attempts {
                tokio::time::sleep(self.retry_delay * attempt).await;
            }
        }

        Err(last_error.unwrap_or_else(|| {
            ChainError::NetworkUnavailable(format!("{} request failed after {} attempts", self.chain, attempts))
        }))
    }
}
