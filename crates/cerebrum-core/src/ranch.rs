use crate::container::{ContainerKind, ServerContainer, ServerState};
use crate::context::FleetContext;
use crate::error::{FleetError, Outcome, Result};
use cerebrum_config::Section;
use cerebrum_container::ContainerSummary;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

/// コンテナ名のランチ名と残りの区切り
pub const NAME_SEPARATOR: char = '_';

/// 名前の接頭辞と設定サブツリーを共有するコンテナグループ
pub struct Ranch {
    name: String,
    section: RwLock<Section>,
    servers: DashMap<String, Arc<ServerContainer>>,
    next_id: AtomicU64,
    ctx: FleetContext,
}

impl Ranch {
    pub fn new(name: impl Into<String>, section: Section, ctx: FleetContext) -> Self {
        Self {
            name: name.into(),
            section: RwLock::new(section),
            servers: DashMap::new(),
            next_id: AtomicU64::new(1),
            ctx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn section(&self) -> Section {
        self.section.read().clone()
    }

    /// このランチのコンテナ名の接頭辞（`ranch_`）
    pub fn prefix(&self) -> String {
        format!("{}{}", self.name, NAME_SEPARATOR)
    }

    pub fn qualified_name(&self, local: &str) -> String {
        format!("{}{}", self.prefix(), local)
    }

    /// 完全修飾名からランチの接頭辞を外す
    pub fn local_name<'a>(&self, name: &'a str) -> &'a str {
        name.strip_prefix(&self.prefix()).unwrap_or(name)
    }

    fn pattern_section(&self, kind: ContainerKind, pattern: &str) -> Section {
        self.section
            .read()
            .section(kind.as_str())
            .section(pattern)
    }

    /// コンテナを登録する。同じローカル名の既存エントリは置き換える
    pub fn register_container(
        &self,
        name: &str,
        registered_name: &str,
        kind: ContainerKind,
        section: Section,
        running: bool,
        loaded: bool,
    ) -> Result<Arc<ServerContainer>> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let container = Arc::new(ServerContainer::new(
            id,
            name,
            registered_name,
            kind,
            section,
            ServerState::new(running, loaded),
            self.ctx.clone(),
        )?);

        self.servers
            .insert(self.local_name(name).to_string(), Arc::clone(&container));
        debug!(ranch = %self.name, server = %name, id, "container registered");
        Ok(container)
    }

    /// `worker.<pattern>` セクションでワーカーを登録する
    pub fn register_worker(
        &self,
        name: &str,
        pattern: &str,
        running: bool,
        loaded: bool,
    ) -> Result<Arc<ServerContainer>> {
        let section = self.pattern_section(ContainerKind::Worker, pattern);
        self.register_container(name, pattern, ContainerKind::Worker, section, running, loaded)
    }

    /// ローカル名でサーバーを取得
    pub fn server(&self, local: &str) -> Option<Arc<ServerContainer>> {
        self.servers.get(local).map(|entry| Arc::clone(entry.value()))
    }

    /// 登録済みサーバー（名前順）
    pub fn servers(&self) -> Vec<Arc<ServerContainer>> {
        let mut servers: Vec<_> = self
            .servers
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        servers.sort_by(|a, b| a.name().cmp(b.name()));
        servers
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    /// 設定上のパターン名一覧
    pub fn patterns(&self, kind: ContainerKind) -> Vec<String> {
        self.section.read().section(kind.as_str()).keys()
    }

    /// 設定されたワーカーパターン名
    pub fn workers(&self) -> BTreeSet<String> {
        self.patterns(ContainerKind::Worker).into_iter().collect()
    }

    /// 起動済みコンテナとの突き合わせ
    ///
    /// 各パターンに先頭一致するコンテナを登録する。ランタイム上に存在する
    /// コンテナはロード済みとみなす。
    pub fn find_containers(&self, live: &[ContainerSummary]) {
        let names: Vec<&str> = live.iter().map(|c| c.name.as_str()).collect();
        info!(ranch = %self.name, containers = ?names, "containers already present");

        for kind in ContainerKind::ALL {
            for pattern in self.patterns(kind) {
                let qualified = self.qualified_name(&pattern);
                for container in live.iter().filter(|c| c.name.starts_with(&qualified)) {
                    info!(
                        ranch = %self.name,
                        server = %container.name,
                        state = %container.state,
                        kind = kind.as_str(),
                        "found container"
                    );
                    let section = self.pattern_section(kind, &pattern);
                    if let Err(e) = self.register_container(
                        &container.name,
                        &pattern,
                        kind,
                        section,
                        container.is_running(),
                        true,
                    ) {
                        error!(ranch = %self.name, server = %container.name, error = %e, "cannot register container");
                    }
                }
            }
        }
    }

    /// 起動していないリーダーを登録し、`startup: false` 以外は起動する
    pub async fn register_leaders(&self) {
        for leader in self.patterns(ContainerKind::Leader) {
            if self.server(&leader).is_some_and(|s| s.is_running()) {
                continue;
            }

            let name = self.qualified_name(&leader);
            let section = self.pattern_section(ContainerKind::Leader, &leader);
            let startup = section.get_bool("startup", true);

            let container = match self.register_container(
                &name,
                &leader,
                ContainerKind::Leader,
                section,
                false,
                false,
            ) {
                Ok(container) => container,
                Err(e) => {
                    error!(ranch = %self.name, server = %name, error = %e, "cannot register leader");
                    continue;
                }
            };

            if startup {
                if let Err(e) = container.start().await {
                    warn!(ranch = %self.name, server = %name, error = %e, "leader did not start");
                }
            }
            info!(ranch = %self.name, server = %name, startup, "registered leader");
        }
    }

    /// 設定を差し替え、登録済みの各コンテナを再設定する
    ///
    /// コンテナと状態はそのまま残る。失敗したコンテナは以前の設定を保ち、
    /// 最初のエラーを返す。
    pub fn recalculate_configuration(&self, section: Section) -> Outcome {
        *self.section.write() = section;

        let mut first_error = None;
        for server in self.servers() {
            let section = self.pattern_section(server.kind(), server.registered_name());
            if let Err(e) = server.configure(section) {
                warn!(ranch = %self.name, server = %server.name(), error = %e, "reconfiguration failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// 全サーバーを停止する。最初の失敗で中断
    pub async fn shutdown(&self) -> Outcome {
        if self.is_empty() {
            return Err(FleetError::EmptyRanch(self.name.clone()));
        }
        for server in self.servers() {
            server.stop().await?;
        }
        Ok(())
    }

    /// 全リーダーを起動する。最初の失敗で中断
    pub async fn start_leaders(&self) -> Outcome {
        if self.is_empty() {
            return Err(FleetError::EmptyRanch(self.name.clone()));
        }
        for server in self
            .servers()
            .into_iter()
            .filter(|s| s.kind() == ContainerKind::Leader)
        {
            server.start().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRuntime, RecordingBus, RuntimeCall, settings_yaml};
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        runtime: Arc<FakeRuntime>,
        settings: Section,
        ctx: FleetContext,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let runtime = Arc::new(FakeRuntime::with_images(&["paper:1.20"]));
        let bus = Arc::new(RecordingBus::new());
        let ctx = FleetContext::new(runtime.clone(), bus, 2);
        let settings = Section::from_yaml_str(&settings_yaml(temp.path())).unwrap();
        Fixture {
            _temp: temp,
            runtime,
            settings,
            ctx,
        }
    }

    fn ranch(f: &Fixture, name: &str) -> Ranch {
        Ranch::new(name, f.settings.section(name), f.ctx.clone())
    }

    #[test]
    fn test_names() {
        let f = fixture();
        let ranch = ranch(&f, "survival");
        assert_eq!(ranch.prefix(), "survival_");
        assert_eq!(ranch.qualified_name("main"), "survival_main");
        assert_eq!(ranch.local_name("survival_lobby-2"), "lobby-2");
        assert_eq!(ranch.local_name("creative_hub"), "creative_hub");
        assert_eq!(
            ranch.workers().into_iter().collect::<Vec<_>>(),
            vec!["lobby".to_string()]
        );
    }

    #[test]
    fn test_register_is_idempotent_by_key() {
        let f = fixture();
        let ranch = ranch(&f, "survival");

        let first = ranch
            .register_worker("survival_lobby-1", "lobby", false, false)
            .unwrap();
        let second = ranch
            .register_worker("survival_lobby-1", "lobby", true, false)
            .unwrap();

        assert_eq!(ranch.servers().len(), 1);
        assert_ne!(first.id(), second.id());
        let stored = ranch.server("lobby-1").unwrap();
        assert_eq!(stored.id(), second.id());
        assert!(stored.is_running());
        assert_eq!(stored.kind(), ContainerKind::Worker);
        assert_eq!(stored.registered_name(), "lobby");
    }

    #[test]
    fn test_find_containers() {
        let f = fixture();
        let ranch = ranch(&f, "survival");

        ranch.find_containers(&[
            ContainerSummary::new("survival_main", "running"),
            ContainerSummary::new("survival_lobby-1", "exited"),
            ContainerSummary::new("survival_lobby-2", "running"),
            ContainerSummary::new("survival_unknown", "running"),
        ]);

        let main = ranch.server("main").unwrap();
        assert_eq!(main.kind(), ContainerKind::Leader);
        assert_eq!(main.state(), ServerState::new(true, true));

        // running でないものは loaded も立たない
        let stopped = ranch.server("lobby-1").unwrap();
        assert_eq!(stopped.state(), ServerState::default());

        assert!(ranch.server("lobby-2").unwrap().is_loaded());
        assert!(ranch.server("unknown").is_none());
        assert_eq!(ranch.servers().len(), 3);
    }

    #[tokio::test]
    async fn test_register_leaders_starts_missing() {
        let f = fixture();
        let ranch = ranch(&f, "survival");

        ranch.register_leaders().await;

        let main = ranch.server("main").unwrap();
        assert_eq!(main.state(), ServerState::new(true, false));
        assert_eq!(f.runtime.created(), vec!["survival_main".to_string()]);
    }

    #[tokio::test]
    async fn test_register_leaders_skips_running() {
        let f = fixture();
        let ranch = ranch(&f, "survival");
        ranch.find_containers(&[ContainerSummary::new("survival_main", "running")]);
        let before = ranch.server("main").unwrap().id();

        ranch.register_leaders().await;

        assert_eq!(ranch.server("main").unwrap().id(), before);
        assert!(f.runtime.created().is_empty());
    }

    #[tokio::test]
    async fn test_register_leaders_respects_startup_flag() {
        let f = fixture();
        let ranch = ranch(&f, "creative");

        ranch.register_leaders().await;

        let hub = ranch.server("hub").unwrap();
        assert_eq!(hub.state(), ServerState::default());
        assert!(f.runtime.created().is_empty());
    }

    #[tokio::test]
    async fn test_aggregates_on_empty_ranch() {
        let f = fixture();
        let ranch = ranch(&f, "survival");

        assert!(matches!(
            ranch.shutdown().await,
            Err(FleetError::EmptyRanch(_))
        ));
        assert!(matches!(
            ranch.start_leaders().await,
            Err(FleetError::EmptyRanch(_))
        ));
    }

    #[tokio::test]
    async fn test_start_leaders_ignores_workers() {
        let f = fixture();
        let ranch = ranch(&f, "survival");
        ranch
            .register_container(
                "survival_main",
                "main",
                ContainerKind::Leader,
                ranch.pattern_section(ContainerKind::Leader, "main"),
                false,
                false,
            )
            .unwrap();
        ranch
            .register_worker("survival_lobby-1", "lobby", false, false)
            .unwrap();

        ranch.start_leaders().await.unwrap();

        assert!(ranch.server("main").unwrap().is_running());
        assert!(!ranch.server("lobby-1").unwrap().is_running());
    }

    #[tokio::test]
    async fn test_shutdown_fails_fast() {
        let f = fixture();
        let ranch = ranch(&f, "survival");
        // 名前順: lobby-1 (未ロード) → main (ロード済み)
        ranch
            .register_worker("survival_lobby-1", "lobby", true, false)
            .unwrap();
        ranch.find_containers(&[ContainerSummary::new("survival_main", "running")]);

        let result = ranch.shutdown().await;

        assert!(matches!(result, Err(FleetError::ForceStopped(_))));
        assert!(!ranch.server("lobby-1").unwrap().is_running());
        assert!(ranch.server("main").unwrap().is_loaded());

        f.runtime
            .wait_for(|c| c == &RuntimeCall::Stop("survival_lobby-1".to_string()))
            .await;
    }

    #[test]
    fn test_recalculate_preserves_identity_and_state() {
        let f = fixture();
        let ranch = ranch(&f, "survival");
        ranch.find_containers(&[ContainerSummary::new("survival_main", "running")]);
        let before = ranch.server("main").unwrap();

        let yaml = settings_yaml(f._temp.path()).replace("paper:1.20", "paper:1.21");
        let settings = Section::from_yaml_str(&yaml).unwrap();
        ranch
            .recalculate_configuration(settings.section("survival"))
            .unwrap();

        let after = ranch.server("main").unwrap();
        assert!(Arc::ptr_eq(&before, &after));
        assert_eq!(after.state(), ServerState::new(true, true));
        assert_eq!(after.descriptor().image.as_deref(), Some("paper:1.21"));
    }

    #[test]
    fn test_recalculate_reports_broken_section() {
        let f = fixture();
        let ranch = ranch(&f, "survival");
        ranch.find_containers(&[ContainerSummary::new("survival_main", "running")]);

        let broken = Section::from_yaml_str("leader:\n  main:\n    image: paper:1.21\n").unwrap();
        assert!(ranch.recalculate_configuration(broken).is_err());
        assert_eq!(
            ranch.server("main").unwrap().descriptor().image.as_deref(),
            Some("paper:1.20")
        );
    }
}
