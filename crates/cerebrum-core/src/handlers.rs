//! バスから届くメッセージの処理

use crate::bus::{BusMessage, MessageBus, Topic};
use crate::error::Outcome;
use crate::events::ServerEvents;
use crate::fleet::{Fleet, PROXY_RANCH, PROXY_SERVER};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Fleet が購読するトピック
pub const TOPICS: [Topic; 4] = [
    Topic::StartServer,
    Topic::ProxyNotify,
    Topic::ServerAdded,
    Topic::ServerRemoved,
];

/// 1件のメッセージを Fleet に適用する
///
/// 自ホストが発行した起動要求は実行しない。
pub async fn dispatch(fleet: &Fleet, message: BusMessage) -> Outcome {
    match message {
        BusMessage::StartServer {
            origin,
            ranch,
            server,
        } => {
            if origin == fleet.origin() {
                debug!(ranch = %ranch, server = %server, "ignoring own start request");
                return Ok(());
            }
            fleet.start_server(&ranch, &server, true).await
        }
        BusMessage::ProxyNotify { shutdown } => {
            info!(shutdown, "proxy notification");
            if shutdown {
                fleet.on_server_left(PROXY_RANCH, PROXY_SERVER).await
            } else {
                fleet.on_server_joined(PROXY_RANCH, PROXY_SERVER).await
            }
        }
        BusMessage::ServerAdded { server } => {
            let (ranch, name) = fleet.resolve_server_name(&server);
            fleet.on_server_joined(&ranch, &name).await
        }
        BusMessage::ServerRemoved { server } => {
            let (ranch, name) = fleet.resolve_server_name(&server);
            fleet.on_server_left(&ranch, &name).await
        }
        // 管理下のサーバー宛て
        BusMessage::ServerShutdown { .. } => Ok(()),
    }
}

/// トピックごとに購読タスクを起動する
///
/// タスクは Fleet を弱参照で持ち、Fleet が破棄されるかバスが閉じると終了する。
pub fn listen(fleet: &Arc<Fleet>, bus: &Arc<dyn MessageBus>) -> Vec<JoinHandle<()>> {
    TOPICS
        .iter()
        .map(|&topic| {
            let mut receiver = bus.subscribe(topic);
            let fleet = Arc::downgrade(fleet);
            tokio::spawn(async move {
                loop {
                    let message = match receiver.recv().await {
                        Ok(message) => message,
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(topic = topic.as_str(), skipped, "bus subscriber lagged");
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };

                    let Some(fleet) = fleet.upgrade() else {
                        break;
                    };
                    if let Err(e) = dispatch(&fleet, message).await {
                        warn!(topic = topic.as_str(), error = %e, "message handling failed");
                    }
                }
                debug!(topic = topic.as_str(), "bus listener stopped");
            })
        })
        .collect()
}
