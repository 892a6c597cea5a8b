//! ContainerSpec から Docker API パラメータへの変換

// Bollard 0.19 の非推奨APIを一時的に使用
#![allow(deprecated)]

use crate::spec::{CONTAINER_USER, ContainerSpec, NetworkAttachment, SERVER_DIR};
use bollard::container::{Config, CreateContainerOptions};
use bollard::models::{HostConfig, PortBinding};
use std::collections::HashMap;

/// ContainerSpecをDockerのコンテナ設定に変換
pub fn spec_to_container_config(
    spec: &ContainerSpec,
) -> (Config<String>, CreateContainerOptions<String>) {
    // ポートバインディングの設定（ホスト側も同じ番号）
    let mut port_bindings = HashMap::new();
    let mut exposed_ports = HashMap::new();

    for port in &spec.ports {
        let container_port = port.key();
        exposed_ports.insert(container_port.clone(), HashMap::new());
        port_bindings.insert(
            container_port,
            Some(vec![PortBinding {
                host_ip: None,
                host_port: Some(port.port.to_string()),
            }]),
        );
    }

    // 固定IPv4の場合は起動後に connect_network するので network_mode は設定しない
    let network_mode = match &spec.network {
        NetworkAttachment::Mode(mode) => Some(mode.clone()),
        NetworkAttachment::Default | NetworkAttachment::StaticIpv4 { .. } => None,
    };

    let host_config = Some(HostConfig {
        auto_remove: Some(true),
        binds: Some(spec.binds.clone()),
        network_mode,
        port_bindings: if port_bindings.is_empty() {
            None
        } else {
            Some(port_bindings)
        },
        ..Default::default()
    });

    let config = Config {
        image: Some(spec.image.clone()),
        hostname: Some(spec.name.clone()),
        user: Some(CONTAINER_USER.to_string()),
        working_dir: Some(SERVER_DIR.to_string()),
        env: if spec.env.is_empty() {
            None
        } else {
            Some(spec.env.clone())
        },
        entrypoint: Some(spec.entrypoint.clone()),
        exposed_ports: if exposed_ports.is_empty() {
            None
        } else {
            Some(exposed_ports)
        },
        open_stdin: Some(true),
        tty: Some(true),
        host_config,
        ..Default::default()
    };

    let options = CreateContainerOptions {
        name: spec.name.clone(),
        platform: None,
    };

    (config, options)
}
