//! 后台任务：清理崩溃或中断请求遗留的暂存文件。

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::STAGED_CLEAN_INTERVAL_SECS;
use crate::storage::Storage;

/// 启动暂存文件清理任务；`ttl` 为零时不启动。
pub fn spawn_background_tasks(storage: Arc<Storage>, ttl: Duration) {
    if ttl.is_zero() {
        return;
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(STAGED_CLEAN_INTERVAL_SECS));
        loop {
            interval.tick().await;
            match storage.sweep_staged(ttl).await {
                Ok(removed) => debug!(removed, "staged file sweep finished"),
                Err(err) => warn!(error = %err, "staged file sweep failed"),
            }
        }
    });
}
