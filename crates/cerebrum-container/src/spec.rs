//! ランタイムに渡すコンテナ記述子

use crate::error::{ContainerError, Result};
use serde::{Deserialize, Serialize};

/// コンテナ内の作業ディレクトリ
pub const SERVER_DIR: &str = "/server";

/// コンテナ内のログディレクトリ
pub const LOGS_DIR: &str = "/server/logs";

/// コンテナを実行するユーザー (uid:gid)
pub const CONTAINER_USER: &str = "1000:1000";

/// プロトコル種別
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl Protocol {
    /// 文字列からProtocolをパース（udp以外はtcp）
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "udp" => Protocol::Udp,
            _ => Protocol::Tcp,
        }
    }

    /// Docker APIで使用する文字列に変換
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }
}

/// 公開ポート。ホスト側も同じ番号でバインドする
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PortMapping {
    pub port: u16,
    pub protocol: Protocol,
}

impl PortMapping {
    pub fn tcp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Tcp,
        }
    }

    /// `"25565"` または `"udp:19132"` 形式をパース
    pub fn parse(s: &str) -> Result<Self> {
        let invalid = || ContainerError::InvalidPort(s.to_string());
        let (protocol, port) = match s.split_once(':') {
            Some((proto, port)) => (Protocol::parse(proto.trim()), port),
            None => (Protocol::Tcp, s),
        };
        let port = port.trim().parse::<u16>().map_err(|_| invalid())?;
        Ok(Self { port, protocol })
    }

    /// Docker APIのキー形式（例: `25565/tcp`）
    pub fn key(&self) -> String {
        format!("{}/{}", self.port, self.protocol.as_str())
    }
}

/// コンテナのネットワーク接続方法
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NetworkAttachment {
    /// 指定なし（ランタイムのデフォルト）
    #[default]
    Default,
    /// HostConfig の network_mode で指定
    Mode(String),
    /// 起動後に connect_network で固定IPv4を割り当てる
    StaticIpv4 { network: String, ipv4: String },
}

/// コンテナ作成に必要な情報一式
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// `host:container` 形式のバインド
    pub binds: Vec<String>,
    pub network: NetworkAttachment,
    pub ports: Vec<PortMapping>,
    pub env: Vec<String>,
    pub entrypoint: Vec<String>,
}

impl ContainerSpec {
    /// 起動スクリプトのエントリポイントを組み立てる
    pub fn startup_entrypoint(name: &str, world: Option<&str>) -> Vec<String> {
        let mut entrypoint = vec!["/bin/sh".to_string(), "start.sh".to_string(), name.to_string()];
        if let Some(world) = world.filter(|w| !w.is_empty()) {
            entrypoint.push("--docker-world".to_string());
            entrypoint.push(world.to_string());
        }
        entrypoint
    }
}
