pub mod error;
pub mod section;

pub use error::*;
pub use section::*;

use std::path::{Path, PathBuf};
use tracing::info;

/// 同梱の settings.yml テンプレート
pub const SETTINGS_TEMPLATE: &str = include_str!("../templates/settings.yml");

/// 同梱の share.yml テンプレート
pub const SHARE_TEMPLATE: &str = include_str!("../templates/share.yml");

/// 設定ファイルを探す
///
/// 以下の優先順位で検索:
/// 1. 環境変数 `env_var` (直接パス指定)
/// 2. カレントディレクトリ: `file_name`
/// 3. ~/.config/cerebrum/`file_name` (グローバル設定)
pub fn find_config_file(file_name: &str, env_var: &str) -> Result<PathBuf> {
    // 1. 環境変数で直接指定
    if let Ok(config_path) = std::env::var(env_var) {
        let path = PathBuf::from(config_path);
        if path.exists() {
            return Ok(path);
        }
    }

    // 2. カレントディレクトリ
    let local = std::env::current_dir()?.join(file_name);
    if local.exists() {
        return Ok(local);
    }

    // 3. グローバル設定
    if let Some(config_dir) = dirs::config_dir() {
        let global = config_dir.join("cerebrum").join(file_name);
        if global.exists() {
            return Ok(global);
        }
    }

    Err(ConfigError::FileNotFound {
        name: file_name.to_string(),
        env: env_var.to_string(),
    })
}

/// 設定ファイルを読み込む。存在しなければテンプレートから作成する
pub fn load_or_create(path: &Path, template: &str) -> Result<Section> {
    if !path.exists() {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, template)?;
        info!(path = %path.display(), "created configuration from template");
    }
    Section::load(path)
}

/// 検索に失敗した場合はカレントディレクトリにテンプレートから作成して読み込む
pub fn resolve_and_load(file_name: &str, env_var: &str, template: &str) -> Result<(PathBuf, Section)> {
    let path = match find_config_file(file_name, env_var) {
        Ok(path) => path,
        Err(ConfigError::FileNotFound { .. }) => std::env::current_dir()?.join(file_name),
        Err(e) => return Err(e),
    };
    let section = load_or_create(&path, template)?;
    Ok((path, section))
}
