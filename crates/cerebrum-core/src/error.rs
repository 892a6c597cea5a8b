use crate::bus::BusError;
use cerebrum_config::ConfigError;
use cerebrum_container::ContainerError;
use thiserror::Error;

/// コマンド層に返す結果の分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    Ok,
    Error,
    RanchError,
    ServerError,
}

#[derive(Error, Debug)]
pub enum FleetError {
    #[error("ランチが登録されていません")]
    NoRanches,

    #[error("ランチ '{0}' は登録されていません")]
    RanchNotFound(String),

    #[error("サーバー '{server}' はランチ '{ranch}' に登録されていません")]
    ServerNotFound { ranch: String, server: String },

    #[error("ランチ '{0}' にサーバーがありません")]
    EmptyRanch(String),

    #[error("コンテナ '{0}' は既に起動しています")]
    AlreadyRunning(String),

    #[error("コンテナ '{0}' は既に停止しています")]
    AlreadyStopped(String),

    #[error("コンテナ '{0}' は起動中ですがロードされていません。強制停止します")]
    ForceStopped(String),

    #[error(
        "{server}: イメージ '{image}' が見つかりません\n\nヒント:\n  • docker pull {image} でイメージをダウンロードしてください"
    )]
    ImageNotFound { server: String, image: String },

    #[error("{0}: image が設定されていません")]
    MissingImage(String),

    #[error("{server}: 不正なポート指定 '{value}'")]
    InvalidPort { server: String, value: String },

    #[error("設定エラー: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Runtime(#[from] ContainerError),

    #[error("メッセージバスエラー: {0}")]
    Bus(#[from] BusError),

    #[error("配布するファイルが見つかりません")]
    NoArtifacts,

    #[error("'{prefix}' を '{destination}' に配布できませんでした: {reason}")]
    ArtifactCopy {
        prefix: String,
        destination: String,
        reason: String,
    },

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

impl FleetError {
    pub fn reason(&self) -> Reason {
        match self {
            Self::NoRanches | Self::RanchNotFound(_) => Reason::RanchError,
            Self::ServerNotFound { .. }
            | Self::EmptyRanch(_)
            | Self::AlreadyRunning(_)
            | Self::AlreadyStopped(_)
            | Self::ForceStopped(_)
            | Self::ImageNotFound { .. }
            | Self::MissingImage(_) => Reason::ServerError,
            Self::InvalidPort { .. }
            | Self::Config(_)
            | Self::Runtime(_)
            | Self::Bus(_)
            | Self::NoArtifacts
            | Self::ArtifactCopy { .. }
            | Self::Io(_) => Reason::Error,
        }
    }
}

/// ライフサイクル操作の結果。`Ok(())` が [`Reason::Ok`]
pub type Outcome = std::result::Result<(), FleetError>;

pub type Result<T> = std::result::Result<T, FleetError>;

/// 成功時は `success`、失敗時はエラーメッセージを返す
pub fn evaluate(outcome: &Outcome, success: impl Into<String>) -> String {
    match outcome {
        Ok(()) => success.into(),
        Err(e) => e.to_string(),
    }
}

pub fn reason_of(outcome: &Outcome) -> Reason {
    match outcome {
        Ok(()) => Reason::Ok,
        Err(e) => e.reason(),
    }
}
