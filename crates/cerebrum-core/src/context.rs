use crate::bus::MessageBus;
use cerebrum_container::ContainerRuntime;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

/// 既定のワーカープールの並列数
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Fleet配下の全コンポーネントが共有する外部コラボレーター
///
/// グローバルなクライアントを持たず、Fleet → Ranch → ServerContainer へ
/// このハンドルを明示的に渡す。
#[derive(Clone)]
pub struct FleetContext {
    pub runtime: Arc<dyn ContainerRuntime>,
    pub bus: Arc<dyn MessageBus>,
    pool: Arc<Semaphore>,
}

impl FleetContext {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        bus: Arc<dyn MessageBus>,
        pool_size: usize,
    ) -> Self {
        Self {
            runtime,
            bus,
            pool: Arc::new(Semaphore::new(pool_size.max(1))),
        }
    }

    /// 並列数を制限したワーカープールでタスクを実行する
    pub fn spawn<F>(&self, task: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        tokio::spawn(async move {
            let _permit = pool.acquire_owned().await;
            task.await
        })
    }
}
