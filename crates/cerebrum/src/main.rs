mod commands;
mod docker;

use cerebrum_config::{SETTINGS_TEMPLATE, SHARE_TEMPLATE, Section};
use cerebrum_core::context::DEFAULT_POOL_SIZE;
use cerebrum_core::fleet::DEFAULT_STAGING_DIR;
use cerebrum_core::{Fleet, FleetContext, FleetOptions, LocalBus, MessageBus};
use clap::Parser;
use colored::Colorize;
use commands::{ConfigPaths, ShellLine};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

const SETTINGS_FILE: &str = "settings.yml";
const SHARE_FILE: &str = "share.yml";

#[derive(Parser)]
#[command(name = "cerebrum", version)]
#[command(about = "ゲームサーバーコンテナのフリートを管理する", long_about = None)]
struct Cli {
    /// settings.yml のパス（省略時はカレントディレクトリ → ~/.config/cerebrum）
    #[arg(long, env = "CEREBRUM_SETTINGS")]
    settings: Option<PathBuf>,

    /// share.yml のパス
    #[arg(long, env = "CEREBRUM_SHARE")]
    share: Option<PathBuf>,

    /// 配布するjarを置くディレクトリ
    #[arg(long, env = "CEREBRUM_STAGING_DIR", default_value = DEFAULT_STAGING_DIR)]
    staging_dir: PathBuf,

    /// 起動時の突き合わせを並列に行う数
    #[arg(long, env = "CEREBRUM_POOL_SIZE", default_value_t = DEFAULT_POOL_SIZE)]
    pool_size: usize,

    /// リモート起動サービスを登録しない
    #[arg(long, env = "CEREBRUM_NO_REMOTE_SERVICE")]
    no_remote_service: bool,
}

/// 明示されたパスがあればそれを、なければ検索して読み込む
fn load_config(
    explicit: Option<&Path>,
    file_name: &str,
    env_var: &str,
    template: &str,
) -> anyhow::Result<(PathBuf, Section)> {
    match explicit {
        Some(path) => {
            let section = cerebrum_config::load_or_create(path, template)?;
            Ok((path.to_path_buf(), section))
        }
        None => Ok(cerebrum_config::resolve_and_load(
            file_name, env_var, template,
        )?),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // stdoutはコマンドの出力に使うので、ログはstderrに出力
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (settings_path, settings) = load_config(
        cli.settings.as_deref(),
        SETTINGS_FILE,
        "CEREBRUM_SETTINGS",
        SETTINGS_TEMPLATE,
    )?;
    let (share_path, share) = load_config(
        cli.share.as_deref(),
        SHARE_FILE,
        "CEREBRUM_SHARE",
        SHARE_TEMPLATE,
    )?;
    info!(
        settings = %settings_path.display(),
        share = %share_path.display(),
        "configuration loaded"
    );

    let runtime = Arc::new(docker::init_docker_with_error_handling().await?);
    let bus: Arc<dyn MessageBus> = Arc::new(LocalBus::new());
    let ctx = FleetContext::new(runtime, bus, cli.pool_size);
    let options = FleetOptions {
        staging_dir: cli.staging_dir,
        remote_service: !cli.no_remote_service,
    };
    let fleet = Arc::new(Fleet::new(settings, share, ctx, options));

    let listeners = fleet.post_execution().await?;
    let paths = ConfigPaths {
        settings: settings_path,
        share: share_path,
    };

    println!("{}", "✓ Cerebrum を起動しました".green().bold());
    println!("  {}", fleet.completions().join(" ").dimmed());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = line else {
            break;
        };

        let command = match ShellLine::parse_line(&line) {
            None => continue,
            Some(Ok(parsed)) => parsed.command,
            Some(Err(e)) => {
                let _ = e.print();
                continue;
            }
        };

        let reply = commands::execute(&fleet, &paths, command).await;
        println!("{}", reply.text);
        if reply.quit {
            break;
        }
    }

    for listener in listeners {
        listener.abort();
    }
    info!("cerebrum stopped");
    Ok(())
}
