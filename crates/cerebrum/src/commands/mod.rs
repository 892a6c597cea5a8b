//! 対話シェルのコマンド

use cerebrum_config::Section;
use cerebrum_core::{Fleet, Outcome, Reason, evaluate, reason_of};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

/// `-s` を省略した場合の対象（ランチ内の全サーバー）
const ALL_SERVERS: &str = "all";

/// 1行分の入力
#[derive(Parser, Debug)]
#[command(no_binary_name = true, name = "cerebrum>")]
pub struct ShellLine {
    #[command(subcommand)]
    pub command: ShellCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    /// サーバーを起動（-s 省略時はランチのリーダー全て）
    Start {
        /// ランチ名
        #[arg(short, long)]
        ranch: String,
        /// サーバー名
        #[arg(short, long, default_value = ALL_SERVERS)]
        server: String,
    },
    /// サーバーを停止（-s 省略時はランチの全サーバー）
    Stop {
        /// ランチ名
        #[arg(short, long)]
        ranch: String,
        /// サーバー名
        #[arg(short, long, default_value = ALL_SERVERS)]
        server: String,
    },
    /// 全サーバーを停止
    Stopall,
    /// 全サーバーを起動
    Startall,
    /// サーバーの状態を表示
    List {
        /// ランチ名（all で全ランチ）
        #[arg(default_value = "all")]
        ranch: String,
    },
    /// 設定ファイルを読み直してランチを再構築
    Reload {
        /// コンテナを残したまま設定だけを差し替える
        #[arg(long)]
        soft: bool,
    },
    /// 配布ディレクトリのjarを各サーバーへ配布
    Update,
    /// 終了
    Quit,
    /// 全サーバーを停止して終了
    End,
}

impl ShellLine {
    /// 空白区切りの1行をパースする。空行は `None`
    pub fn parse_line(line: &str) -> Option<Result<Self, clap::Error>> {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            return None;
        }
        Some(Self::try_parse_from(words))
    }
}

/// 設定ファイルの場所
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    pub settings: PathBuf,
    pub share: PathBuf,
}

/// コマンドの実行結果
#[derive(Debug)]
pub struct Reply {
    pub text: String,
    pub quit: bool,
}

impl Reply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            quit: false,
        }
    }

    fn outcome(outcome: &Outcome, success: impl Into<String>) -> Self {
        Self::text(render(outcome, success))
    }
}

/// 結果の種別に応じて色付けする
fn render(outcome: &Outcome, success: impl Into<String>) -> String {
    let message = evaluate(outcome, success);
    match reason_of(outcome) {
        Reason::Ok => format!("✓ {}", message).green().to_string(),
        Reason::RanchError | Reason::ServerError => format!("⚠ {}", message).yellow().to_string(),
        Reason::Error => format!("✗ {}", message).red().to_string(),
    }
}

pub async fn execute(fleet: &Fleet, paths: &ConfigPaths, command: ShellCommand) -> Reply {
    info!(command = ?command, "command issued");

    match command {
        ShellCommand::Start { ranch, server } if server.eq_ignore_ascii_case(ALL_SERVERS) => {
            let outcome = fleet.start_ranch(&ranch).await;
            Reply::outcome(
                &outcome,
                format!("ランチ '{}' のサーバーを起動しています", ranch),
            )
        }
        ShellCommand::Start { ranch, server } => {
            let outcome = fleet.start_server(&ranch, &server, false).await;
            Reply::outcome(
                &outcome,
                format!("サーバー '{}.{}' を起動しています", ranch, server),
            )
        }
        ShellCommand::Stop { ranch, server } if server.eq_ignore_ascii_case(ALL_SERVERS) => {
            let outcome = fleet.stop_ranch(&ranch).await;
            Reply::outcome(
                &outcome,
                format!("ランチ '{}' のサーバーを停止しています", ranch),
            )
        }
        ShellCommand::Stop { ranch, server } => {
            let outcome = fleet.stop_server(&ranch, &server).await;
            Reply::outcome(
                &outcome,
                format!("サーバー '{}.{}' を停止しています", ranch, server),
            )
        }
        ShellCommand::Stopall => {
            Reply::outcome(&fleet.stop_all().await, "全サーバーを停止しています")
        }
        ShellCommand::Startall => {
            Reply::outcome(&fleet.start_all().await, "全サーバーを起動しています")
        }
        ShellCommand::List { ranch } => match fleet.list(&ranch) {
            Ok(listing) => Reply::text(listing),
            Err(e) => Reply::outcome(&Err(e), ""),
        },
        ShellCommand::Reload { soft } => {
            Reply::outcome(&reload(fleet, paths, soft).await, "設定を再読み込みしました")
        }
        ShellCommand::Update => Reply::outcome(&fleet.update_jars().await, "jarを更新しました"),
        ShellCommand::Quit => Reply {
            text: "終了します".to_string(),
            quit: true,
        },
        ShellCommand::End => {
            let stopped = render(&fleet.stop_all().await, "全サーバーを停止しています");
            Reply {
                text: format!("{}\n終了します", stopped),
                quit: true,
            }
        }
    }
}

async fn reload(fleet: &Fleet, paths: &ConfigPaths, soft: bool) -> Outcome {
    let settings = Section::load(&paths.settings)?;
    if soft {
        return fleet.refresh_configuration(settings);
    }
    let share = Section::load(&paths.share)?;
    fleet.reload(settings, share).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> ShellCommand {
        ShellLine::parse_line(line).unwrap().unwrap().command
    }

    #[test]
    fn test_parse_start() {
        assert_eq!(
            parse("start -r survival -s lobby-3"),
            ShellCommand::Start {
                ranch: "survival".to_string(),
                server: "lobby-3".to_string(),
            }
        );
        assert_eq!(
            parse("start --ranch survival"),
            ShellCommand::Start {
                ranch: "survival".to_string(),
                server: "all".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(parse("stopall"), ShellCommand::Stopall);
        assert_eq!(parse("startall"), ShellCommand::Startall);
        assert_eq!(parse("update"), ShellCommand::Update);
        assert_eq!(parse("end"), ShellCommand::End);
        assert_eq!(
            parse("list"),
            ShellCommand::List {
                ranch: "all".to_string()
            }
        );
        assert_eq!(parse("reload --soft"), ShellCommand::Reload { soft: true });
    }

    #[test]
    fn test_parse_errors() {
        assert!(ShellLine::parse_line("   ").is_none());
        assert!(ShellLine::parse_line("start").unwrap().is_err());
        assert!(ShellLine::parse_line("reboot").unwrap().is_err());
    }

    #[test]
    fn test_render_marks_reason() {
        colored::control::set_override(false);

        assert_eq!(render(&Ok(()), "done"), "✓ done");
        let failed: Outcome = Err(cerebrum_core::FleetError::NoArtifacts);
        assert_eq!(render(&failed, "done"), "✗ 配布するファイルが見つかりません");
        let missing: Outcome = Err(cerebrum_core::FleetError::RanchNotFound("nope".into()));
        assert_eq!(
            render(&missing, "done"),
            "⚠ ランチ 'nope' は登録されていません"
        );
    }
}
