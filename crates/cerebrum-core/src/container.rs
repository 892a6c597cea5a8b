use crate::bus::{BusMessage, SENDER_NAME};
use crate::context::FleetContext;
use crate::descriptor::ContainerDescriptor;
use crate::error::{FleetError, Outcome, Result};
use cerebrum_config::Section;
use cerebrum_container::{ContainerSpec, NetworkAttachment};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// コンテナの種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContainerKind {
    /// 常時起動が期待されるコンテナ
    Leader,
    /// 要求に応じて生成されるコンテナ
    Worker,
}

impl ContainerKind {
    pub const ALL: [ContainerKind; 2] = [ContainerKind::Leader, ContainerKind::Worker];

    /// 設定ファイル上のセクション名
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Leader => "leader",
            Self::Worker => "worker",
        }
    }
}

/// 2段階の準備状態
///
/// `loaded` はアプリケーションからの通知でのみ立つ。`loaded ⟹ running` を常に保つ。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerState {
    pub running: bool,
    pub loaded: bool,
}

impl ServerState {
    pub fn new(running: bool, loaded: bool) -> Self {
        Self {
            running,
            loaded: running && loaded,
        }
    }
}

struct ResolvedConfig {
    section: Section,
    descriptor: ContainerDescriptor,
}

/// 1つの名前付きコンテナ
pub struct ServerContainer {
    id: u64,
    name: String,
    registered_name: String,
    kind: ContainerKind,
    state: Mutex<ServerState>,
    config: RwLock<ResolvedConfig>,
    ctx: FleetContext,
}

impl std::fmt::Debug for ServerContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContainer")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("registered_name", &self.registered_name)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl ServerContainer {
    /// 設定セクションを解決してコンテナを作成する
    ///
    /// 解決に失敗した場合はコンテナを作らずにエラーを返す。
    pub fn new(
        id: u64,
        name: impl Into<String>,
        registered_name: impl Into<String>,
        kind: ContainerKind,
        section: Section,
        state: ServerState,
        ctx: FleetContext,
    ) -> Result<Self> {
        let name = name.into();
        let descriptor = ContainerDescriptor::resolve(&name, &section)?;

        Ok(Self {
            id,
            name,
            registered_name: registered_name.into(),
            kind,
            state: Mutex::new(ServerState::new(state.running, state.loaded)),
            config: RwLock::new(ResolvedConfig {
                section,
                descriptor,
            }),
            ctx,
        })
    }

    /// 設定セクションを差し替える。失敗した場合は以前の設定のまま
    pub fn configure(&self, section: Section) -> Result<()> {
        let descriptor = ContainerDescriptor::resolve(&self.name, &section)?;
        *self.config.write() = ResolvedConfig {
            section,
            descriptor,
        };
        debug!(server = %self.name, "container reconfigured");
        Ok(())
    }

    /// 登録ごとに一意な内部ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// `ranch_local` 形式の完全修飾名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 設定上のパターン名
    pub fn registered_name(&self) -> &str {
        &self.registered_name
    }

    pub fn kind(&self) -> ContainerKind {
        self.kind
    }

    pub fn state(&self) -> ServerState {
        *self.state.lock()
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    pub fn is_loaded(&self) -> bool {
        self.state.lock().loaded
    }

    pub fn section(&self) -> Section {
        self.config.read().section.clone()
    }

    pub fn descriptor(&self) -> ContainerDescriptor {
        self.config.read().descriptor.clone()
    }

    /// running を変更する。false の場合は loaded も落とす
    pub fn set_running(&self, running: bool) {
        let mut state = self.state.lock();
        state.running = running;
        if !running {
            state.loaded = false;
        }
    }

    /// loaded を変更する。true の場合は running も立てる
    pub fn set_loaded(&self, loaded: bool) {
        let mut state = self.state.lock();
        state.loaded = loaded;
        if loaded {
            state.running = true;
        }
    }

    /// コンテナを作成して起動する
    ///
    /// ランタイムを呼ぶ前に running を立てる。作成・起動に失敗しても
    /// running は立ったままになる。
    pub async fn start(&self) -> Outcome {
        if self.is_running() {
            warn!(server = %self.name, "start failed, container is already running");
            return Err(FleetError::AlreadyRunning(self.name.clone()));
        }

        let (image, descriptor) = {
            let config = self.config.read();
            let image = config
                .descriptor
                .image
                .clone()
                .ok_or_else(|| FleetError::MissingImage(self.name.clone()))?;
            (image, config.descriptor.clone())
        };
        let spec = descriptor.to_spec(&self.name, &image);

        if !self.ctx.runtime.image_exists(&image).await? {
            error!(server = %self.name, image = %image, "cannot find image");
            return Err(FleetError::ImageNotFound {
                server: self.name.clone(),
                image,
            });
        }

        {
            let mut state = self.state.lock();
            if state.running {
                return Err(FleetError::AlreadyRunning(self.name.clone()));
            }
            state.running = true;
        }

        info!(server = %self.name, image = %image, "container is starting");
        descriptor.prepare_logs_dir(&self.name).await;
        if let Err(e) = self.launch(&spec).await {
            error!(server = %self.name, error = %e, "failed to launch container");
            return Err(e.into());
        }
        Ok(())
    }

    async fn launch(&self, spec: &ContainerSpec) -> cerebrum_container::Result<()> {
        let runtime = &self.ctx.runtime;
        runtime.create_container(spec).await?;
        runtime.start_container(&self.name).await?;

        if let NetworkAttachment::StaticIpv4 { network, ipv4 } = &spec.network {
            runtime
                .connect_network(network, &self.name, Some(ipv4))
                .await?;
        }
        Ok(())
    }

    /// コンテナを停止する
    ///
    /// ロード済みならバス経由で正常終了を要求し、ランタイムは呼ばない。
    /// ロード前ならランタイムで強制停止し、[`FleetError::ForceStopped`] を返す。
    pub async fn stop(&self) -> Outcome {
        let was_loaded = {
            let mut state = self.state.lock();
            if !state.running {
                drop(state);
                warn!(server = %self.name, "stop failed, container is already stopped");
                return Err(FleetError::AlreadyStopped(self.name.clone()));
            }
            let loaded = state.loaded;
            *state = ServerState::default();
            loaded
        };

        if !was_loaded {
            let runtime = Arc::clone(&self.ctx.runtime);
            let name = self.name.clone();
            self.ctx.spawn(async move {
                if let Err(e) = runtime.stop_container(&name).await {
                    warn!(server = %name, error = %e, "forced stop failed");
                }
            });
            warn!(server = %self.name, "container is running but not loaded, force-stopping");
            return Err(FleetError::ForceStopped(self.name.clone()));
        }

        info!(server = %self.name, "requesting graceful shutdown");
        self.ctx
            .bus
            .publish(BusMessage::ServerShutdown {
                sender: SENDER_NAME.to_string(),
                server: self.name.clone(),
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeRuntime, RecordingBus, RuntimeCall, container_yaml};
    use cerebrum_container::ContainerError;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        runtime: Arc<FakeRuntime>,
        bus: Arc<RecordingBus>,
        ctx: FleetContext,
        section: Section,
    }

    fn fixture(extra: &str) -> Fixture {
        let temp = TempDir::new().unwrap();
        let runtime = Arc::new(FakeRuntime::with_images(&["paper:1.20"]));
        let bus = Arc::new(RecordingBus::new());
        let ctx = FleetContext::new(runtime.clone(), bus.clone(), 2);
        let yaml = format!("{}{}", container_yaml(temp.path(), "main"), extra);
        let section = Section::from_yaml_str(&yaml).unwrap();
        Fixture {
            _temp: temp,
            runtime,
            bus,
            ctx,
            section,
        }
    }

    fn container(f: &Fixture, state: ServerState) -> ServerContainer {
        ServerContainer::new(
            1,
            "survival_main",
            "main",
            ContainerKind::Leader,
            f.section.clone(),
            state,
            f.ctx.clone(),
        )
        .unwrap()
    }

    #[test]
    fn test_loaded_without_running_is_normalized() {
        let f = fixture("");
        let server = container(&f, ServerState { running: false, loaded: true });
        assert_eq!(server.state(), ServerState::default());
    }

    #[test]
    fn test_state_cascades() {
        let f = fixture("");
        let server = container(&f, ServerState::default());

        server.set_loaded(true);
        assert_eq!(server.state(), ServerState::new(true, true));

        server.set_running(false);
        assert_eq!(server.state(), ServerState::default());

        server.set_running(true);
        server.set_loaded(false);
        assert_eq!(server.state(), ServerState::new(true, false));
    }

    #[test]
    fn test_invalid_section_creates_nothing() {
        let f = fixture("");
        let result = ServerContainer::new(
            1,
            "survival_main",
            "main",
            ContainerKind::Leader,
            Section::from_yaml_str("image: paper:1.20\n").unwrap(),
            ServerState::default(),
            f.ctx.clone(),
        );
        assert!(matches!(result, Err(FleetError::Config(_))));
    }

    #[tokio::test]
    async fn test_start_issues_create_then_start() {
        let f = fixture("");
        let server = container(&f, ServerState::default());

        server.start().await.unwrap();

        assert_eq!(server.state(), ServerState::new(true, false));
        let calls = f.runtime.calls();
        assert_eq!(calls[0], RuntimeCall::ImageExists("paper:1.20".to_string()));
        assert!(matches!(&calls[1], RuntimeCall::Create(spec) if spec.name == "survival_main"));
        assert_eq!(calls[2], RuntimeCall::Start("survival_main".to_string()));
        assert_eq!(calls.len(), 3);
        assert!(server.descriptor().logs_dir.is_dir());
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let f = fixture("");
        let server = container(&f, ServerState::default());

        server.start().await.unwrap();
        let calls = f.runtime.calls().len();

        let second = server.start().await;
        assert!(matches!(second, Err(FleetError::AlreadyRunning(_))));
        assert_eq!(second.unwrap_err().reason(), crate::Reason::ServerError);
        assert!(server.is_running());
        assert_eq!(f.runtime.calls().len(), calls);
    }

    #[tokio::test]
    async fn test_missing_image_does_not_create() {
        let f = fixture("");
        f.runtime.remove_image("paper:1.20");
        let server = container(&f, ServerState::default());

        let result = server.start().await;
        assert!(matches!(result, Err(FleetError::ImageNotFound { .. })));
        assert!(!server.is_running());
        assert!(
            !f.runtime
                .calls()
                .iter()
                .any(|c| matches!(c, RuntimeCall::Create(_)))
        );
    }

    #[tokio::test]
    async fn test_runtime_failure_keeps_running() {
        let f = fixture("");
        f.runtime.fail_create(ContainerError::ContainerAlreadyExists {
            container: "survival_main".to_string(),
        });
        let server = container(&f, ServerState::default());

        let result = server.start().await;
        assert_eq!(result.unwrap_err().reason(), crate::Reason::Error);
        assert!(server.is_running());
    }

    #[tokio::test]
    async fn test_static_ipv4_connects_after_start() {
        let f = fixture("net: cerebrum\nipv4: 172.20.0.10\n");
        let server = container(&f, ServerState::default());

        server.start().await.unwrap();

        let calls = f.runtime.calls();
        assert_eq!(
            calls.last().unwrap(),
            &RuntimeCall::Connect {
                network: "cerebrum".to_string(),
                container: "survival_main".to_string(),
                ipv4: Some("172.20.0.10".to_string()),
            }
        );
    }

    #[tokio::test]
    async fn test_stop_unloaded_forces_runtime_stop() {
        let f = fixture("");
        let server = container(&f, ServerState::new(true, false));

        let result = server.stop().await;
        assert!(matches!(result, Err(FleetError::ForceStopped(_))));
        assert_eq!(server.state(), ServerState::default());

        f.runtime
            .wait_for(|c| c == &RuntimeCall::Stop("survival_main".to_string()))
            .await;
        assert!(f.bus.published().is_empty());
    }

    #[tokio::test]
    async fn test_stop_loaded_publishes_shutdown() {
        let f = fixture("");
        let server = container(&f, ServerState::new(true, true));

        server.stop().await.unwrap();

        assert_eq!(server.state(), ServerState::default());
        assert_eq!(
            f.bus.published(),
            vec![BusMessage::ServerShutdown {
                sender: "cerebrum".to_string(),
                server: "survival_main".to_string(),
            }]
        );

        tokio::task::yield_now().await;
        assert!(
            !f.runtime
                .calls()
                .iter()
                .any(|c| matches!(c, RuntimeCall::Stop(_)))
        );
    }

    #[tokio::test]
    async fn test_stop_when_stopped() {
        let f = fixture("");
        let server = container(&f, ServerState::default());

        assert!(matches!(
            server.stop().await,
            Err(FleetError::AlreadyStopped(_))
        ));
        assert!(f.bus.published().is_empty());
    }

    #[test]
    fn test_configure_failure_keeps_previous() {
        let f = fixture("port: 25565\n");
        let server = container(&f, ServerState::new(true, true));

        let bad = Section::from_yaml_str("image: paper:1.21\n").unwrap();
        assert!(server.configure(bad).is_err());
        assert_eq!(server.descriptor().image.as_deref(), Some("paper:1.20"));
        assert_eq!(server.state(), ServerState::new(true, true));
    }
}
