//! 交易流水线：预加载 -> 签名 -> 顺序广播 -> 状态轮询
//!
//! 私钥只以 `Zeroizing` 形式经过签名阶段，不被任何组件保存。
//! 广播在独立任务中执行：调用方丢弃 future 不会中断已经发出的广播。

use std::{sync::Arc, time::Duration};

use zeroize::Zeroizing;

use super::proxy::{BroadcastProxy, SignClientProxy, SignerPreloaderProxy, TransactionStatusProxy};
use crate::{
    config::PipelineConfig,
    domain::{
        mask_address, Account, FeePriority, SignerParams, TransactionChanges,
        TransactionStateRequest, TransactionType, TransferParams,
    },
    error::{ChainError, ChainResult},
};

#[derive(Clone)]
pub struct TransactionPipeline {
    preloaders: Arc<SignerPreloaderProxy>,
    signers: Arc<SignClientProxy>,
    broadcasters: Arc<BroadcastProxy>,
    statuses: Arc<TransactionStatusProxy>,
    broadcast_delay: Duration,
}

impl TransactionPipeline {
    pub fn new(
        preloaders: Arc<SignerPreloaderProxy>,
        signers: Arc<SignClientProxy>,
        broadcasters: Arc<BroadcastProxy>,
        statuses: Arc<TransactionStatusProxy>,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            preloaders,
            signers,
            broadcasters,
            statuses,
            broadcast_delay: Duration::from_millis(config.broadcast_delay_ms),
        }
    }

    pub async fn preload(&self, params: &TransferParams) -> ChainResult<SignerParams> {
        self.preloaders.preload(params).await
    }

    /// 在阻塞线程池中签名，`params` 随之被消耗
    pub async fn sign(
        &self,
        params: SignerParams,
        priority: FeePriority,
        private_key: Zeroizing<Vec<u8>>,
    ) -> ChainResult<Vec<Vec<u8>>> {
        let signers = Arc::clone(&self.signers);
        tokio::task::spawn_blocking(move || signers.sign(&params, priority, &private_key))
            .await
            .map_err(|e| ChainError::Signing(format!("signing task failed: {}", e)))?
    }

    /// 按顺序广播，每个载荷确认后间隔 `broadcast_delay` 再发下一个。
    /// 任一载荷失败即停止，返回该错误
    pub async fn broadcast_all(
        &self,
        account: Account,
        payloads: Vec<Vec<u8>>,
        tx_type: TransactionType,
    ) -> ChainResult<Vec<String>> {
        if payloads.is_empty() {
            return Err(ChainError::precondition("nothing to broadcast"));
        }
        let broadcasters = Arc::clone(&self.broadcasters);
        let delay = self.broadcast_delay;

        let task = tokio::spawn(async move {
            let mut hashes = Vec::with_capacity(payloads.len());
            for (index, payload) in payloads.iter().enumerate() {
                if index > 0 && !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                match broadcasters.send(&account, payload, tx_type).await {
                    Ok(hash) => {
                        tracing::info!(
                            chain = %account.chain,
                            sender = %mask_address(&account.address),
                            index,
                            hash = %hash,
                            "payload broadcast"
                        );
                        hashes.push(hash);
                    }
                    Err(e) => {
                        tracing::error!(
                            chain = %account.chain,
                            sender = %mask_address(&account.address),
                            index,
                            sent = hashes.len(),
                            error = %e,
                            "broadcast aborted"
                        );
                        return Err(e);
                    }
                }
            }
            Ok(hashes)
        });

        task.await
            .map_err(|e| ChainError::NetworkUnavailable(format!("broadcast task failed: {}", e)))?
    }

    pub async fn poll_status(&self, request: &TransactionStateRequest) -> ChainResult<TransactionChanges> {
        self.statuses.get_status(request).await
    }

    /// 预加载、签名并广播，返回各载荷的交易哈希
    pub async fn send(
        &self,
        params: &TransferParams,
        priority: FeePriority,
        private_key: Zeroizing<Vec<u8>>,
    ) -> ChainResult<Vec<String>> {
        let loaded = self.preload(params).await?;
        let payloads = self.sign(loaded, priority, private_key).await?;
        self.broadcast_all(params.from().clone(), payloads, params.transaction_type())
            .await
    }
}
