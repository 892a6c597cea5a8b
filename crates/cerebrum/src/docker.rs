use cerebrum_container::{DockerRuntime, connect_docker};
use colored::Colorize;

/// Docker接続を初期化（エラーハンドリング付き）
pub async fn init_docker_with_error_handling() -> anyhow::Result<DockerRuntime> {
    match connect_docker().await {
        Ok(docker) => Ok(DockerRuntime::new(docker)),
        Err(e) => {
            eprintln!();
            eprintln!("{}", "✗ Docker接続エラー".red().bold());
            eprintln!();
            eprintln!("{}", "原因:".yellow());
            eprintln!("  {}", e);
            eprintln!();
            eprintln!("{}", "解決方法:".yellow());
            eprintln!("  • Dockerが起動しているか確認してください");
            eprintln!("  • docker ps コマンドが正常に動作するか確認してください");
            eprintln!("  • 実行ユーザーが docker グループに所属しているか確認してください");
            Err(anyhow::anyhow!("Docker接続に失敗しました"))
        }
    }
}
