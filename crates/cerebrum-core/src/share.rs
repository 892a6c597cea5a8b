//! 成果物（プラグインjar）の配布

use crate::error::{FleetError, Outcome};
use cerebrum_config::Section;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// 配布対象の拡張子
pub const ARTIFACT_EXTENSION: &str = ".jar";

/// 配布先サーバーディレクトリ内のサブディレクトリ
pub const PLUGINS_DIR: &str = "plugins";

#[derive(Debug)]
struct Artifact {
    path: PathBuf,
    file_name: String,
    prefix: String,
}

/// 配布ディレクトリ内のファイルを share の各配布先へコピーする
///
/// ファイル名が share のキーで始まる jar を対象にする。全配布先へのコピーに
/// 成功したファイルだけを削除する。コピーに失敗したファイルは残りの配布先を
/// 飛ばして次のファイルへ進み、最後に最初の失敗を返す。
pub async fn distribute_artifacts(staging_dir: &Path, share: &Section, settings: &Section) -> Outcome {
    tokio::fs::create_dir_all(staging_dir).await?;

    let artifacts = collect_artifacts(staging_dir, &share.keys()).await?;
    if artifacts.is_empty() {
        warn!(dir = %staging_dir.display(), "artifact update aborted, no files found");
        return Err(FleetError::NoArtifacts);
    }

    let mut first_error = None;
    for artifact in artifacts {
        info!(prefix = %artifact.prefix, file = %artifact.file_name, "updating artifact");

        if let Err(e) = copy_to_destinations(&artifact, share, settings).await {
            error!(prefix = %artifact.prefix, error = %e, "artifact update failed");
            first_error.get_or_insert(e);
            continue;
        }

        match tokio::fs::remove_file(&artifact.path).await {
            Ok(()) => info!(prefix = %artifact.prefix, "artifact updated"),
            Err(e) => warn!(prefix = %artifact.prefix, error = %e, "artifact could not be removed"),
        }
    }

    first_error.map_or(Ok(()), Err)
}

async fn collect_artifacts(staging_dir: &Path, prefixes: &[String]) -> std::io::Result<Vec<Artifact>> {
    let mut artifacts = Vec::new();
    let mut entries = tokio::fs::read_dir(staging_dir).await?;

    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let file_name = entry.file_name().to_string_lossy().into_owned();
        if !file_name.ends_with(ARTIFACT_EXTENSION) {
            continue;
        }
        if let Some(prefix) = prefixes.iter().find(|p| file_name.starts_with(p.as_str())) {
            artifacts.push(Artifact {
                path: entry.path(),
                file_name,
                prefix: prefix.clone(),
            });
        }
    }

    artifacts.sort_by(|a, b| a.file_name.cmp(&b.file_name));
    Ok(artifacts)
}

async fn copy_to_destinations(artifact: &Artifact, share: &Section, settings: &Section) -> Outcome {
    for destination in share.get_string_list(&artifact.prefix) {
        let failed = |reason: String| FleetError::ArtifactCopy {
            prefix: artifact.prefix.clone(),
            destination: destination.clone(),
            reason,
        };

        let server_dir = settings
            .section(&destination)
            .get_string("server")
            .filter(|s| !s.is_empty())
            .ok_or_else(|| failed("server ディレクトリが設定されていません".to_string()))?;
        let target = Path::new(&server_dir)
            .join(PLUGINS_DIR)
            .join(&artifact.file_name);

        let source = artifact.path.clone();
        let copy_target = target.clone();
        tokio::task::spawn_blocking(move || copy_preserving(&source, &copy_target))
            .await
            .map_err(|e| failed(e.to_string()))?
            .map_err(|e| failed(e.to_string()))?;

        info!(
            prefix = %artifact.prefix,
            destination = %destination,
            path = %target.display(),
            "artifact copied"
        );
    }
    Ok(())
}

/// 上書きコピーし、パーミッションと更新日時を引き継ぐ
fn copy_preserving(source: &Path, target: &Path) -> std::io::Result<()> {
    std::fs::copy(source, target)?;
    let modified = std::fs::metadata(source)?.modified()?;
    std::fs::File::options()
        .write(true)
        .open(target)?
        .set_modified(modified)
}
