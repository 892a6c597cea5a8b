use crate::error::Outcome;
use async_trait::async_trait;

/// 管理下のアプリケーションから届く準備状態の通知
#[async_trait]
pub trait ServerEvents: Send + Sync {
    /// サーバーがネットワークに参加した（ロード完了）
    async fn on_server_joined(&self, ranch: &str, name: &str) -> Outcome;

    /// サーバーがネットワークから離脱した
    async fn on_server_left(&self, ranch: &str, name: &str) -> Outcome;
}
