// Bollard 0.19 の非推奨APIを一時的に使用
#![allow(deprecated)]

use crate::converter::spec_to_container_config;
use crate::error::{ContainerError, Result, is_status};
use crate::runtime::{ContainerRuntime, ContainerSummary};
use crate::spec::ContainerSpec;
use async_trait::async_trait;
use bollard::Docker;
use bollard::container::ListContainersOptions;
use bollard::image::ListImagesOptions;
use bollard::models::{EndpointIpamConfig, EndpointSettings, NetworkConnectRequest};
use std::collections::HashMap;
use tracing::debug;

/// Docker接続を初期化
pub async fn connect_docker() -> Result<Docker> {
    let docker = Docker::connect_with_local_defaults()
        .map_err(|e| ContainerError::DockerConnectionFailed(e.to_string()))?;

    // 接続テスト
    docker
        .ping()
        .await
        .map_err(|e| ContainerError::DockerConnectionFailed(e.to_string()))?;

    Ok(docker)
}

/// bollard を使った [`ContainerRuntime`] 実装
#[derive(Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// ローカルのDockerに接続して作成
    pub async fn connect() -> Result<Self> {
        Ok(Self::new(connect_docker().await?))
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn list_containers(&self, name_prefix: Option<&str>) -> Result<Vec<ContainerSummary>> {
        let mut filters = HashMap::new();
        if let Some(prefix) = name_prefix {
            // name フィルタは部分一致なので先頭一致は後段で確認する
            filters.insert("name".to_string(), vec![prefix.to_string()]);
        }

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.docker.list_containers(Some(options)).await?;

        let summaries = containers
            .into_iter()
            .filter_map(|container| {
                let name = container
                    .names
                    .as_ref()
                    .and_then(|n| n.first())
                    .map(|n| n.trim_start_matches('/').to_string())?;
                let state = container
                    .state
                    .map(|s| s.to_string())
                    .unwrap_or_default();
                Some(ContainerSummary {
                    name,
                    state,
                    image: container.image.unwrap_or_default(),
                })
            })
            .filter(|c| name_prefix.is_none_or(|prefix| c.name.starts_with(prefix)))
            .collect();

        Ok(summaries)
    }

    async fn image_exists(&self, image: &str) -> Result<bool> {
        let mut filters = HashMap::new();
        filters.insert("reference".to_string(), vec![image.to_string()]);

        let images = self
            .docker
            .list_images(Some(ListImagesOptions {
                all: false,
                filters,
                ..Default::default()
            }))
            .await?;

        Ok(!images.is_empty())
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String> {
        let (config, options) = spec_to_container_config(spec);

        match self.docker.create_container(Some(options), config).await {
            Ok(response) => {
                debug!(container = %spec.name, id = %response.id, "container created");
                Ok(response.id)
            }
            Err(e) if is_status(&e, 409) => Err(ContainerError::ContainerAlreadyExists {
                container: spec.name.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        match self
            .docker
            .start_container(name, None::<bollard::query_parameters::StartContainerOptions>)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(ContainerError::ContainerNotFound {
                container: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn stop_container(&self, name: &str) -> Result<()> {
        match self
            .docker
            .stop_container(name, None::<bollard::query_parameters::StopContainerOptions>)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(ContainerError::ContainerNotFound {
                container: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn connect_network(
        &self,
        network: &str,
        container: &str,
        ipv4: Option<&str>,
    ) -> Result<()> {
        let endpoint_config = ipv4.map(|ip| EndpointSettings {
            ipam_config: Some(EndpointIpamConfig {
                ipv4_address: Some(ip.to_string()),
                ..Default::default()
            }),
            ..Default::default()
        });

        let request = NetworkConnectRequest {
            container: Some(container.to_string()),
            endpoint_config,
            ..Default::default()
        };

        match self.docker.connect_network(network, request).await {
            Ok(_) => Ok(()),
            Err(e) if is_status(&e, 404) => Err(ContainerError::NetworkNotFound {
                network: network.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
