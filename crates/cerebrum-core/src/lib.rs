//! Cerebrum core
//!
//! ランチ（コンテナグループ）とサーバーコンテナの状態モデル、
//! 起動中コンテナとの突き合わせ、ホスト間の起動要求ルーティング、
//! running/loaded の2段階状態の伝播、成果物の配布を担う。
//!
//! ```text
//! Fleet ──1:*── Ranch ──1:*── ServerContainer
//!   │                              │
//!   ├── MessageBus (publish/subscribe)
//!   └── ContainerRuntime (list/create/start/stop/connect)
//! ```

pub mod bus;
pub mod container;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod fleet;
pub mod handlers;
pub mod ranch;
pub mod share;

#[cfg(test)]
pub(crate) mod testing;

pub use bus::{BusError, BusMessage, LocalBus, MessageBus, RemoteService, Topic};
pub use container::{ContainerKind, ServerContainer, ServerState};
pub use context::FleetContext;
pub use descriptor::ContainerDescriptor;
pub use error::{FleetError, Outcome, Reason, evaluate, reason_of};
pub use events::ServerEvents;
pub use fleet::{Fleet, FleetOptions};
pub use ranch::Ranch;
