//! メッセージバスの契約とプロセス内実装
//!
//! ホスト間の転送（Redisなど）はこのクレートの外側で [`MessageBus`] を
//! 実装して差し込む。[`LocalBus`] は単一ホスト構成とテストで使う。

use crate::error::Outcome;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Weak;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

/// シャットダウン要求の送信者名
pub const SENDER_NAME: &str = "cerebrum";

const CHANNEL_CAPACITY: usize = 256;

#[derive(Error, Debug)]
pub enum BusError {
    #[error("メッセージのエンコードに失敗しました: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("転送エラー: {0}")]
    Transport(String),

    #[error("リモートサービスが登録されていません")]
    NoRemoteService,
}

/// トピック
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    StartServer,
    ServerShutdown,
    ProxyNotify,
    ServerAdded,
    ServerRemoved,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StartServer => "cerebrum-start-server",
            Self::ServerShutdown => "server-shutdown",
            Self::ProxyNotify => "velocity-notify",
            Self::ServerAdded => "server-added",
            Self::ServerRemoved => "server-removed",
        }
    }
}

/// バス上を流れるメッセージ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMessage {
    /// 他ホストが所有するランチへの起動要求
    StartServer {
        origin: Uuid,
        ranch: String,
        server: String,
    },
    /// ロード済みサーバーへの正常終了要求
    ServerShutdown { sender: String, server: String },
    /// プロキシの起動/終了通知
    ProxyNotify { shutdown: bool },
    /// サーバーがネットワークに参加した（アプリケーションの準備完了）
    ServerAdded { server: String },
    /// サーバーがネットワークから離脱した
    ServerRemoved { server: String },
}

impl BusMessage {
    pub fn topic(&self) -> Topic {
        match self {
            Self::StartServer { .. } => Topic::StartServer,
            Self::ServerShutdown { .. } => Topic::ServerShutdown,
            Self::ProxyNotify { .. } => Topic::ProxyNotify,
            Self::ServerAdded { .. } => Topic::ServerAdded,
            Self::ServerRemoved { .. } => Topic::ServerRemoved,
        }
    }

    /// 転送用のJSON表現
    pub fn encode(&self) -> Result<String, BusError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(payload: &str) -> Result<Self, BusError> {
        Ok(serde_json::from_str(payload)?)
    }
}

/// バス経由で呼び出される起動サービス
#[async_trait]
pub trait RemoteService: Send + Sync {
    /// `ranch_server` 形式の名前でサーバーを起動する
    async fn create_server(&self, name: &str) -> Outcome;
}

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, message: BusMessage) -> Result<(), BusError>;

    fn subscribe(&self, topic: Topic) -> broadcast::Receiver<BusMessage>;

    /// リモート起動サービスを登録する
    ///
    /// バスは弱参照しか持たない。サービスの所有者が破棄すると呼び出せなくなる。
    fn register_remote_service(&self, service: Weak<dyn RemoteService>);
}

/// `tokio::sync::broadcast` を使ったプロセス内バス
#[derive(Default)]
pub struct LocalBus {
    channels: DashMap<Topic, broadcast::Sender<BusMessage>>,
    remote: RwLock<Option<Weak<dyn RemoteService>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn sender(&self, topic: Topic) -> broadcast::Sender<BusMessage> {
        self.channels
            .entry(topic)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .clone()
    }

    /// 登録済みのリモートサービスを呼び出す
    pub async fn call_remote(&self, name: &str) -> Result<Outcome, BusError> {
        let service = self
            .remote
            .read()
            .as_ref()
            .and_then(Weak::upgrade)
            .ok_or(BusError::NoRemoteService)?;
        Ok(service.create_server(name).await)
    }
}

#[async_trait]
impl MessageBus for LocalBus {
    async fn publish(&self, message: BusMessage) -> Result<(), BusError> {
        let topic = message.topic();
        // 購読者がいない場合も配送済みとみなす
        if self.sender(topic).send(message).is_err() {
            debug!(topic = topic.as_str(), "no subscribers for message");
        }
        Ok(())
    }

    fn subscribe(&self, topic: Topic) -> broadcast::Receiver<BusMessage> {
        self.sender(topic).subscribe()
    }

    fn register_remote_service(&self, service: Weak<dyn RemoteService>) {
        *self.remote.write() = Some(service);
    }
}
