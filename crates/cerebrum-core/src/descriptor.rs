//! コンテナ設定セクションの解決

use crate::error::{FleetError, Result};
use cerebrum_config::Section;
use cerebrum_container::{ContainerSpec, LOGS_DIR, NetworkAttachment, PortMapping, SERVER_DIR};
use std::path::PathBuf;
use tracing::warn;

/// ログディレクトリ中でコンテナ名に置換されるプレースホルダ
pub const NAME_PLACEHOLDER: &str = "{name}";

/// 設定セクションから解決したコンテナ記述子
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ContainerDescriptor {
    pub image: Option<String>,
    pub server_dir: String,
    pub logs_dir: PathBuf,
    pub world: Option<String>,
    pub timezone: Option<String>,
    pub network: NetworkAttachment,
    pub ports: Vec<PortMapping>,
}

impl ContainerDescriptor {
    /// セクションを解決する
    ///
    /// `server` と `logs` は必須。`port` が `ports` より優先される。
    /// ファイルシステムには触れない。
    pub fn resolve(name: &str, section: &Section) -> Result<Self> {
        let server_dir = section.require_string("server", name)?;
        let logs_dir = PathBuf::from(
            section
                .require_string("logs", name)?
                .replace(NAME_PLACEHOLDER, name),
        );

        Ok(Self {
            image: non_empty(section.get_string("image")),
            server_dir,
            logs_dir,
            world: non_empty(section.get_string("world")),
            timezone: non_empty(section.get_string("timezone")),
            network: resolve_network(name, section)?,
            ports: resolve_ports(name, section)?,
        })
    }

    /// ログディレクトリがなければ作成する。失敗しても警告のみ
    pub async fn prepare_logs_dir(&self, name: &str) {
        if tokio::fs::try_exists(&self.logs_dir).await.unwrap_or(false) {
            return;
        }
        if let Err(e) = tokio::fs::create_dir_all(&self.logs_dir).await {
            warn!(
                server = %name,
                path = %self.logs_dir.display(),
                error = %e,
                "cannot create logs directory"
            );
        }
    }

    /// ランタイムに渡すコンテナ仕様を組み立てる
    pub fn to_spec(&self, name: &str, image: &str) -> ContainerSpec {
        ContainerSpec {
            name: name.to_string(),
            image: image.to_string(),
            binds: vec![
                format!("{}:{}", self.server_dir, SERVER_DIR),
                format!("{}:{}", self.logs_dir.display(), LOGS_DIR),
            ],
            network: self.network.clone(),
            ports: self.ports.clone(),
            env: self
                .timezone
                .iter()
                .map(|zone| format!("TZ={}", zone))
                .collect(),
            entrypoint: ContainerSpec::startup_entrypoint(name, self.world.as_deref()),
        }
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

fn resolve_network(name: &str, section: &Section) -> Result<NetworkAttachment> {
    if let Some(ipv4) = non_empty(section.get_string("ipv4")) {
        // 固定IPv4は接続先ネットワークが必要
        let network = section.require_string("net", name)?;
        return Ok(NetworkAttachment::StaticIpv4 { network, ipv4 });
    }

    Ok(match non_empty(section.get_string("net")) {
        Some(mode) => NetworkAttachment::Mode(mode),
        None => NetworkAttachment::Default,
    })
}

fn resolve_ports(name: &str, section: &Section) -> Result<Vec<PortMapping>> {
    let invalid = |value: String| FleetError::InvalidPort {
        server: name.to_string(),
        value,
    };

    if section.contains("port") {
        let port = section
            .get_int("port")
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| invalid(section.get_string("port").unwrap_or_default()))?;
        return Ok(vec![PortMapping::tcp(port)]);
    }

    section
        .get_string_list("ports")
        .into_iter()
        .map(|entry| PortMapping::parse(&entry).map_err(|_| invalid(entry)))
        .collect()
}
