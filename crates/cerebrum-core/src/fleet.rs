use crate::bus::{BusMessage, RemoteService};
use crate::container::{ContainerKind, ServerContainer};
use crate::context::FleetContext;
use crate::error::{FleetError, Outcome, Result};
use crate::events::ServerEvents;
use crate::handlers;
use crate::ranch::{NAME_SEPARATOR, Ranch};
use crate::share;
use async_trait::async_trait;
use cerebrum_config::Section;
use cerebrum_container::ContainerSummary;
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// プロキシを収容する疑似ランチ名
pub const PROXY_RANCH: &str = "server";

/// プロキシの疑似コンテナ名
pub const PROXY_SERVER: &str = "velocity";

/// 配布ファイルを置くディレクトリの既定値
pub const DEFAULT_STAGING_DIR: &str = "share";

/// `list` で全ランチを対象にする指定
pub const ALL: &str = "all";

/// ホストごとのオプション
#[derive(Debug, Clone)]
pub struct FleetOptions {
    /// 配布ファイルの置き場所
    pub staging_dir: PathBuf,
    /// バスにリモート起動サービスを登録するか
    pub remote_service: bool,
}

impl Default for FleetOptions {
    fn default() -> Self {
        Self {
            staging_dir: PathBuf::from(DEFAULT_STAGING_DIR),
            remote_service: true,
        }
    }
}

type RanchMap = Arc<HashMap<String, Arc<Ranch>>>;

/// 1ホストが管理するランチ全体
///
/// ランチのマップは再読み込み時に丸ごと差し替える。読み取り側は
/// 古い世代か新しい世代のどちらかを見る。
pub struct Fleet {
    origin: Uuid,
    settings: RwLock<Section>,
    share: RwLock<Section>,
    ranches: RwLock<RanchMap>,
    ctx: FleetContext,
    options: FleetOptions,
}

impl Fleet {
    pub fn new(settings: Section, share: Section, ctx: FleetContext, options: FleetOptions) -> Self {
        Self {
            origin: Uuid::new_v4(),
            settings: RwLock::new(settings),
            share: RwLock::new(share),
            ranches: RwLock::new(Arc::new(HashMap::new())),
            ctx,
            options,
        }
    }

    /// エコー抑止に使うこのホストの識別子
    pub fn origin(&self) -> Uuid {
        self.origin
    }

    pub fn context(&self) -> &FleetContext {
        &self.ctx
    }

    pub fn options(&self) -> &FleetOptions {
        &self.options
    }

    pub fn settings(&self) -> Section {
        self.settings.read().clone()
    }

    pub fn share(&self) -> Section {
        self.share.read().clone()
    }

    fn snapshot(&self) -> RanchMap {
        self.ranches.read().clone()
    }

    fn swap_ranches(&self, ranches: HashMap<String, Arc<Ranch>>) {
        *self.ranches.write() = Arc::new(ranches);
    }

    pub fn ranch(&self, name: &str) -> Option<Arc<Ranch>> {
        self.snapshot().get(name).cloned()
    }

    /// 現在の世代のランチ（名前順）
    pub fn ranches(&self) -> Vec<Arc<Ranch>> {
        let mut ranches: Vec<_> = self.snapshot().values().cloned().collect();
        ranches.sort_by(|a, b| a.name().cmp(b.name()));
        ranches
    }

    pub fn registered_ranches(&self) -> BTreeSet<String> {
        self.snapshot().keys().cloned().collect()
    }

    /// バスの購読を開始し、ランチを探索してから成果物を配布する
    pub async fn post_execution(self: &Arc<Self>) -> Result<Vec<JoinHandle<()>>> {
        let listeners = handlers::listen(self, &self.ctx.bus);
        if self.options.remote_service {
            let service: Arc<dyn RemoteService> = Arc::clone(self) as Arc<dyn RemoteService>;
            self.ctx.bus.register_remote_service(Arc::downgrade(&service));
            info!("remote start service registered");
        }

        self.find_ranches().await?;

        if let Err(e) = self.update_jars().await {
            warn!(error = %e, "artifact update skipped");
        }
        Ok(listeners)
    }

    /// コンテナ一覧を1度だけ取得し、ランチごとに突き合わせる
    ///
    /// ランチ間の突き合わせはワーカープール上で並行に行い、全て終わってから
    /// 新しい世代に差し替える。一覧の取得に失敗した場合は現在の世代のまま。
    pub async fn find_ranches(&self) -> Result<()> {
        let live = self.ctx.runtime.list_containers(None).await?;
        let settings = self.settings();

        let ranches: HashMap<String, Arc<Ranch>> = settings
            .keys()
            .into_iter()
            .map(|name| {
                let ranch = Ranch::new(name.clone(), settings.section(&name), self.ctx.clone());
                (name, Arc::new(ranch))
            })
            .collect();

        let tasks: Vec<_> = ranches
            .values()
            .cloned()
            .map(|ranch| {
                let prefix = ranch.prefix();
                let partition: Vec<ContainerSummary> = live
                    .iter()
                    .filter(|c| c.name.starts_with(&prefix))
                    .cloned()
                    .collect();
                self.ctx.spawn(async move {
                    ranch.find_containers(&partition);
                    ranch.register_leaders().await;
                })
            })
            .collect();

        for task in tasks {
            if let Err(e) = task.await {
                error!(error = %e, "ranch reconciliation task failed");
            }
        }

        self.swap_ranches(ranches);
        info!(ranches = ?self.registered_ranches(), "ranches registered");
        Ok(())
    }

    /// サーバーを起動する
    ///
    /// ランチがこのホストになければバスへ起動要求を流す。`is_remote_flush` が
    /// true の場合はバス経由で届いた要求なので、再送せずに終了する。
    pub async fn start_server(&self, ranch: &str, server: &str, is_remote_flush: bool) -> Outcome {
        let Some(local) = self.ranch(ranch) else {
            if is_remote_flush {
                debug!(ranch, server, "ranch not owned by this host, dropping forwarded request");
                return Ok(());
            }
            info!(ranch, server, "ranch not owned by this host, forwarding start request");
            self.ctx
                .bus
                .publish(BusMessage::StartServer {
                    origin: self.origin,
                    ranch: ranch.to_string(),
                    server: server.to_string(),
                })
                .await?;
            return Ok(());
        };

        let qualified = local.qualified_name(server);
        if let Some(pattern) = local
            .workers()
            .into_iter()
            .find(|pattern| qualified.starts_with(&local.qualified_name(pattern)))
        {
            info!(ranch, server = %qualified, pattern = %pattern, "starting worker container");
            let worker = local.register_worker(&qualified, &pattern, false, false)?;
            return worker.start().await;
        }

        let container = self.lookup(&local, server, "start")?;
        info!(ranch, server = %container.name(), "starting container");
        container.start().await
    }

    /// サーバーを停止する。停止要求はホスト間で転送しない
    pub async fn stop_server(&self, ranch: &str, server: &str) -> Outcome {
        let container = self.find_server(ranch, server, "stop")?;
        info!(ranch, server = %container.name(), "stopping container");
        container.stop().await
    }

    pub fn set_running(&self, ranch: &str, server: &str, running: bool) -> Outcome {
        let container = self.find_server(ranch, server, "status change")?;
        info!(server = %container.name(), running, "setting running state");
        container.set_running(running);
        Ok(())
    }

    pub fn set_loaded(&self, ranch: &str, server: &str, loaded: bool) -> Outcome {
        let container = self.find_server(ranch, server, "loaded change")?;
        info!(server = %container.name(), loaded, "setting loaded state");
        container.set_loaded(loaded);
        Ok(())
    }

    fn find_server(&self, ranch: &str, server: &str, operation: &str) -> Result<Arc<ServerContainer>> {
        let local = self
            .ranch(ranch)
            .ok_or_else(|| FleetError::RanchNotFound(ranch.to_string()))?;
        self.lookup(&local, server, operation)
    }

    fn lookup(&self, ranch: &Ranch, server: &str, operation: &str) -> Result<Arc<ServerContainer>> {
        ranch.server(server).ok_or_else(|| {
            warn!(ranch = %ranch.name(), server, operation, "operation failed, server is not registered");
            FleetError::ServerNotFound {
                ranch: ranch.name().to_string(),
                server: server.to_string(),
            }
        })
    }

    /// 完全修飾名を (ランチ, ローカル名) に分解する
    ///
    /// 接頭辞が既知のランチでなければプロキシ用の疑似ランチに属するとみなす。
    pub fn resolve_server_name(&self, name: &str) -> (String, String) {
        match name.split_once(NAME_SEPARATOR) {
            Some((ranch, local)) if self.ranch(ranch).is_some() => {
                (ranch.to_string(), local.to_string())
            }
            _ => (PROXY_RANCH.to_string(), name.to_string()),
        }
    }

    fn all_servers(&self) -> Result<Vec<Arc<ServerContainer>>> {
        let ranches = self.ranches();
        if ranches.is_empty() {
            return Err(FleetError::NoRanches);
        }
        Ok(ranches.iter().flat_map(|r| r.servers()).collect())
    }

    /// 全ランチの全サーバーを起動する。最初の失敗で中断
    pub async fn start_all(&self) -> Outcome {
        for server in self.all_servers()? {
            server.start().await?;
        }
        Ok(())
    }

    /// 全ランチの全サーバーを停止する。最初の失敗で中断
    pub async fn stop_all(&self) -> Outcome {
        for server in self.all_servers()? {
            server.stop().await?;
        }
        Ok(())
    }

    pub async fn start_ranch(&self, ranch: &str) -> Outcome {
        self.ranch(ranch)
            .ok_or_else(|| FleetError::RanchNotFound(ranch.to_string()))?
            .start_leaders()
            .await
    }

    pub async fn stop_ranch(&self, ranch: &str) -> Outcome {
        self.ranch(ranch)
            .ok_or_else(|| FleetError::RanchNotFound(ranch.to_string()))?
            .shutdown()
            .await
    }

    /// サーバー一覧を整形する
    ///
    /// `all` の場合、起動もロードもしていないワーカーは表示しない。
    pub fn list(&self, target: &str) -> Result<String> {
        let mut out = String::from("\n");

        if target.eq_ignore_ascii_case(ALL) {
            for ranch in self.ranches() {
                let servers = ranch.servers().into_iter().filter(|s| {
                    let state = s.state();
                    s.kind() == ContainerKind::Leader || state.running || state.loaded
                });
                write_ranch(&mut out, &ranch, servers);
            }
            return Ok(out);
        }

        let ranch = self
            .ranch(target)
            .ok_or_else(|| FleetError::RanchNotFound(target.to_string()))?;
        write_ranch(&mut out, &ranch, ranch.servers());
        Ok(out)
    }

    /// コンテナ一覧からランチを作り直し、完成した世代で丸ごと置き換える
    pub async fn recalculate_configuration(&self) -> Result<()> {
        info!("recalculating configuration");
        self.find_ranches().await.inspect_err(|e| {
            warn!(error = %e, "recalculation failed, keeping current ranches");
        })
    }

    /// 設定を差し替えてから作り直す
    pub async fn reload(&self, settings: Section, share: Section) -> Result<()> {
        *self.settings.write() = settings;
        *self.share.write() = share;
        self.recalculate_configuration().await
    }

    /// 既存のランチとコンテナを残したまま設定だけを差し替える
    ///
    /// 新しい設定にないランチはそのまま残る。最初のエラーを返す。
    pub fn refresh_configuration(&self, settings: Section) -> Outcome {
        *self.settings.write() = settings.clone();

        let mut first_error = None;
        for ranch in self.ranches() {
            if !settings.contains(ranch.name()) {
                warn!(ranch = %ranch.name(), "ranch no longer configured, keeping previous section");
                continue;
            }
            if let Err(e) = ranch.recalculate_configuration(settings.section(ranch.name())) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// 配布ディレクトリのファイルを各サーバーの plugins へコピーする
    pub async fn update_jars(&self) -> Outcome {
        let share = self.share();
        let settings = self.settings();
        share::distribute_artifacts(&self.options.staging_dir, &share, &settings).await
    }

    /// 補完候補（ランチ名と完全修飾サーバー名）
    pub fn completions(&self) -> Vec<String> {
        let mut words: Vec<String> = self.registered_ranches().into_iter().collect();
        for ranch in self.ranches() {
            words.extend(ranch.servers().iter().map(|s| s.name().to_string()));
        }
        words
    }
}

fn write_ranch(
    out: &mut String,
    ranch: &Ranch,
    servers: impl IntoIterator<Item = Arc<ServerContainer>>,
) {
    let _ = writeln!(out, "{}:", ranch.name());
    for server in servers {
        let state = server.state();
        let _ = writeln!(
            out,
            "  {} (Loaded: {}) (Running: {})",
            ranch.local_name(server.name()),
            state.loaded,
            state.running
        );
    }
}

#[async_trait]
impl ServerEvents for Fleet {
    async fn on_server_joined(&self, ranch: &str, name: &str) -> Outcome {
        info!(ranch, server = name, "server joined");
        self.set_loaded(ranch, name, true)
    }

    async fn on_server_left(&self, ranch: &str, name: &str) -> Outcome {
        info!(ranch, server = name, "server left");
        self.set_running(ranch, name, false)
    }
}

#[async_trait]
impl RemoteService for Fleet {
    async fn create_server(&self, name: &str) -> Outcome {
        let (ranch, server) = name
            .split_once(NAME_SEPARATOR)
            .ok_or_else(|| FleetError::RanchNotFound(name.to_string()))?;
        self.start_server(ranch, server, false).await
    }
}
