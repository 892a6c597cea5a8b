use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(
        "設定ファイル '{name}' が見つかりません。以下の場所を確認してください:\n\
        - カレントディレクトリ\n\
        - ~/.config/cerebrum/\n\
        または {env} 環境変数で直接指定できます"
    )]
    FileNotFound { name: String, env: String },

    #[error("{owner}: 必須キー '{key}' が設定されていません")]
    MissingKey { owner: String, key: String },

    #[error("YAMLパースエラー: {path}\n理由: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("IO エラー: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
