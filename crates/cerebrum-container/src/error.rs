use thiserror::Error;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error(
        "Dockerに接続できません: {0}\n\nヒント:\n  • Dockerが起動しているか確認してください\n  • DOCKER_HOST の設定を確認してください"
    )]
    DockerConnectionFailed(String),

    #[error("コンテナ '{container}' が見つかりません")]
    ContainerNotFound { container: String },

    #[error("コンテナ '{container}' は既に存在します")]
    ContainerAlreadyExists { container: String },

    #[error("ネットワーク '{network}' が見つかりません")]
    NetworkNotFound { network: String },

    #[error("Docker APIエラー: {0}")]
    DockerApiError(String),

    #[error("不正なポート指定: '{0}'")]
    InvalidPort(String),
}

impl From<bollard::errors::Error> for ContainerError {
    fn from(err: bollard::errors::Error) -> Self {
        // 404/409 は呼び出し側で名前付きのエラーに変換する
        let err_str = err.to_string();
        if err_str.contains("Connection refused") || err_str.contains("No such file or directory")
        {
            ContainerError::DockerConnectionFailed(err_str)
        } else {
            ContainerError::DockerApiError(err_str)
        }
    }
}

/// bollardのエラーがHTTPステータス `code` の応答かどうか
pub fn is_status(err: &bollard::errors::Error, code: u16) -> bool {
    matches!(
        err,
        bollard::errors::Error::DockerResponseServerError { status_code, .. } if *status_code == code
    )
}

pub type Result<T> = std::result::Result<T, ContainerError>;
