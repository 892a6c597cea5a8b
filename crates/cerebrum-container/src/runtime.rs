use crate::error::Result;
use crate::spec::ContainerSpec;
use async_trait::async_trait;

/// コンテナランタイムのトレイト
///
/// Docker以外のランタイムやテスト用のフェイクも同じ操作だけで扱えるよう、
/// コアが必要とする最小限の操作に絞っている。
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// コンテナ一覧（停止中を含む）。`name_prefix` で名前を絞り込む
    async fn list_containers(&self, name_prefix: Option<&str>) -> Result<Vec<ContainerSummary>>;

    /// ローカルにイメージが存在するか
    async fn image_exists(&self, image: &str) -> Result<bool>;

    /// コンテナを作成し、IDを返す
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start_container(&self, name: &str) -> Result<()>;

    async fn stop_container(&self, name: &str) -> Result<()>;

    /// 起動済みコンテナをネットワークに接続する
    async fn connect_network(&self, network: &str, container: &str, ipv4: Option<&str>)
    -> Result<()>;
}

/// コンテナのステータス
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSummary {
    /// 先頭の `/` を除いたコンテナ名
    pub name: String,
    /// ランタイムが報告する状態文字列（例: "running", "exited"）
    pub state: String,
    pub image: String,
}

impl ContainerSummary {
    pub fn new(name: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: state.into(),
            image: String::new(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.state.contains("running")
    }
}
