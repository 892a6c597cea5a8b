//! テスト用のランタイムとバス

use crate::bus::{BusError, BusMessage, LocalBus, MessageBus, RemoteService, Topic};
use async_trait::async_trait;
use cerebrum_container::{
    ContainerError, ContainerRuntime, ContainerSpec, ContainerSummary, Result,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Notify, broadcast};

#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeCall {
    List(Option<String>),
    ImageExists(String),
    Create(ContainerSpec),
    Start(String),
    Stop(String),
    Connect {
        network: String,
        container: String,
        ipv4: Option<String>,
    },
}

/// 呼び出しを記録するランタイム
#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<Vec<ContainerSummary>>,
    images: Mutex<HashSet<String>>,
    calls: Mutex<Vec<RuntimeCall>>,
    create_error: Mutex<Option<ContainerError>>,
    list_error: Mutex<Option<ContainerError>>,
    list_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeRuntime {
    pub fn with_images(images: &[&str]) -> Self {
        let runtime = Self::default();
        runtime
            .images
            .lock()
            .extend(images.iter().map(|i| i.to_string()));
        runtime
    }

    pub fn set_containers(&self, containers: Vec<ContainerSummary>) {
        *self.containers.lock() = containers;
    }

    pub fn remove_image(&self, image: &str) {
        self.images.lock().remove(image);
    }

    /// 次回以降の create を失敗させる
    pub fn fail_create(&self, error: ContainerError) {
        *self.create_error.lock() = Some(error);
    }

    /// 次回の一覧取得を失敗させる
    pub fn fail_listing(&self, error: ContainerError) {
        *self.list_error.lock() = Some(error);
    }

    /// 次回の一覧取得を、返した `Notify` が通知されるまで止める
    pub fn hold_listing(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.list_gate.lock() = Some(Arc::clone(&gate));
        gate
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.calls.lock().clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                RuntimeCall::Create(spec) => Some(spec.name.clone()),
                _ => None,
            })
            .collect()
    }

    /// 条件に合う呼び出しが記録されるまで待つ
    pub async fn wait_for(&self, predicate: impl Fn(&RuntimeCall) -> bool) {
        for _ in 0..200 {
            if self.calls.lock().iter().any(&predicate) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected runtime call was not observed: {:?}", self.calls());
    }

    fn record(&self, call: RuntimeCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn list_containers(&self, name_prefix: Option<&str>) -> Result<Vec<ContainerSummary>> {
        self.record(RuntimeCall::List(name_prefix.map(str::to_string)));
        let gate = self.list_gate.lock().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if let Some(error) = self.list_error.lock().take() {
            return Err(error);
        }
        Ok(self
            .containers
            .lock()
            .iter()
            .filter(|c| name_prefix.is_none_or(|p| c.name.starts_with(p)))
            .cloned()
            .collect())
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        self.record(RuntimeCall::ImageExists(image.to_string()));
        Ok(self.images.lock().contains(image))
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        self.record(RuntimeCall::Create(spec.clone()));
        match self.create_error.lock().take() {
            Some(error) => Err(error),
            None => Ok(format!("id-{}", spec.name)),
        }
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.record(RuntimeCall::Start(name.to_string()));
        Ok(())
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        self.record(RuntimeCall::Stop(name.to_string()));
        Ok(())
    }

    async fn connect_network(
        &self,
        network: &str,
        container: &str,
        ipv4: Option<&str>,
    ) -> Result<()> {
        self.record(RuntimeCall::Connect {
            network: network.to_string(),
            container: container.to_string(),
            ipv4: ipv4.map(str::to_string),
        });
        Ok(())
    }
}

/// 発行されたメッセージを記録するバス。配送は [`LocalBus`] に任せる
#[derive(Default)]
pub struct RecordingBus {
    inner: LocalBus,
    published: Mutex<Vec<BusMessage>>,
    remote_registered: Mutex<bool>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published(&self) -> Vec<BusMessage> {
        self.published.lock().clone()
    }

    pub fn remote_registered(&self) -> bool {
        *self.remote_registered.lock()
    }

    pub async fn call_remote(&self, name: &str) -> crate::Outcome {
        self.inner
            .call_remote(name)
            .await
            .map_err(crate::FleetError::from)?
    }
}

#[async_trait]
impl MessageBus for RecordingBus {
    async fn publish(&self, message: BusMessage) -> std::result::Result<(), BusError> {
        self.published.lock().push(message.clone());
        self.inner.publish(message).await
    }

    fn subscribe(&self, topic: Topic) -> broadcast::Receiver<BusMessage> {
        self.inner.subscribe(topic)
    }

    fn register_remote_service(&self, service: Weak<dyn RemoteService>) {
        *self.remote_registered.lock() = true;
        self.inner.register_remote_service(service);
    }
}

/// `root` 配下にサーバー/ログディレクトリを持つコンテナセクション
pub fn container_yaml(root: &Path, pattern: &str) -> String {
    let server = root.join("srv").join(pattern);
    std::fs::create_dir_all(server.join("plugins")).unwrap();
    format!(
        "image: paper:1.20\nserver: {}/\nlogs: {}/logs/{{name}}\n",
        server.display(),
        root.display()
    )
}

/// `survival`（leader: main, worker: lobby）と `creative`（leader: hub, startup: false）
pub fn settings_yaml(root: &Path) -> String {
    let indent = |yaml: String| {
        yaml.lines()
            .map(|line| format!("      {}\n", line))
            .collect::<String>()
    };
    format!(
        "survival:\n  leader:\n    main:\n{}      port: 25565\n  worker:\n    lobby:\n{}\
         creative:\n  leader:\n    hub:\n{}      startup: false\n",
        indent(container_yaml(root, "main")),
        indent(container_yaml(root, "lobby")),
        indent(container_yaml(root, "hub")),
    )
}
