/// Runtime Gateway - thin async wrapper over the Docker API
///
/// Every call maps one-to-one onto a runtime operation. Policy (what to
/// mount, which limits, when to clean up) lives in the sandbox engine.
use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, InspectContainerOptions, ListContainersOptions, LogOutput,
    LogsOptions, RemoveContainerOptions, StartContainerOptions, StopContainerOptions,
    UploadToContainerOptions, WaitContainerOptions,
};
use bollard::errors::Error as DockerError;
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use bollard::volume::{CreateVolumeOptions, ListVolumesOptions, RemoveVolumeOptions};
use bollard::Docker;
use futures_util::stream::{Stream, StreamExt};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Set on every container and volume this process creates
pub const MANAGED_LABEL: &str = "codejudge.managed";
pub const RUN_ID_LABEL: &str = "codejudge.run-id";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("docker error: {0}")]
    Docker(#[from] DockerError),

    #[error("failed to build archive: {0}")]
    Archive(#[from] std::io::Error),

    #[error("invalid target path: {0}")]
    InvalidPath(String),

    #[error("memory limit {0} is outside the runtime's range")]
    MemoryLimit(u64),

    #[error("container {0} reported no state")]
    MissingState(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeHandle {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeMount {
    pub volume: String,
    pub target: String,
    pub read_only: bool,
}

#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    /// Becomes the container entrypoint
    pub command: Vec<String>,
    pub mounts: Vec<VolumeMount>,
    pub memory_limit_bytes: u64,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    Exited,
    TimedOut,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerExit {
    pub exit_code: i64,
    pub oom_killed: bool,
}

/// Labels every managed object carries; `run_id` groups one sandbox
pub fn run_labels(run_id: &str) -> HashMap<String, String> {
    HashMap::from([
        (MANAGED_LABEL.to_string(), "true".to_string()),
        (RUN_ID_LABEL.to_string(), run_id.to_string()),
    ])
}

/// `key=value` filter for list calls
pub fn label_filter(key: &str, value: &str) -> String {
    format!("{}={}", key, value)
}

/// Container operations the sandbox engine is built on. `RuntimeGateway`
/// is the Docker implementation.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn image_exists(&self, name: &str) -> Result<bool, GatewayError>;

    async fn pull_image(&self, name: &str) -> Result<(), GatewayError>;

    async fn create_volume(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> Result<VolumeHandle, GatewayError>;

    async fn delete_volume(&self, volume: &VolumeHandle) -> Result<(), GatewayError>;

    /// Writes `contents` to `target_path` inside the container as a mode
    /// 0777 file
    async fn copy_to_container(
        &self,
        container_id: &str,
        target_path: &str,
        contents: &[u8],
    ) -> Result<(), GatewayError>;

    async fn create_container(&self, spec: ContainerSpec) -> Result<String, GatewayError>;

    async fn start_container(&self, id: &str) -> Result<(), GatewayError>;

    /// Zero grace period: the runtime sends SIGKILL right away
    async fn stop_container(&self, id: &str) -> Result<(), GatewayError>;

    async fn remove_container(&self, id: &str) -> Result<(), GatewayError>;

    /// Waits at most `timeout_ms`. A timed out container is left running;
    /// stopping it is the caller's call.
    async fn wait_container(&self, id: &str, timeout_ms: u64) -> WaitOutcome;

    async fn container_state(&self, id: &str) -> Result<ContainerExit, GatewayError>;

    /// Whole log of the selected streams with `\r\n` folded to `\n`
    async fn get_log(&self, id: &str, stdout: bool, stderr: bool) -> Result<String, GatewayError>;

    /// Ids of all containers, running or not, carrying `label`
    async fn list_containers(&self, label: &str) -> Result<Vec<String>, GatewayError>;

    async fn list_volumes(&self, label: &str) -> Result<Vec<VolumeHandle>, GatewayError>;
}

#[derive(Clone)]
pub struct RuntimeGateway {
    docker: Docker,
}

impl RuntimeGateway {
    pub fn new(docker: Docker) -> Self {
        Self { docker }
    }

    /// Connects through `DOCKER_HOST` or the local socket
    pub fn connect() -> Result<Self, GatewayError> {
        Ok(Self::new(Docker::connect_with_local_defaults()?))
    }
}

#[async_trait]
impl ContainerRuntime for RuntimeGateway {
    async fn image_exists(&self, name: &str) -> Result<bool, GatewayError> {
        match self.docker.inspect_image(name).await {
            Ok(_) => Ok(true),
            Err(DockerError::DockerResponseServerError {
                status_code: 404, ..
            }) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    async fn pull_image(&self, name: &str) -> Result<(), GatewayError> {
        let options = Some(CreateImageOptions {
            from_image: name,
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(progress) = stream.next().await {
            let info = progress?;
            if let Some(status) = info.status {
                debug!(image = name, %status, "pull progress");
            }
        }
        Ok(())
    }

    async fn create_volume(
        &self,
        name: &str,
        labels: HashMap<String, String>,
    ) -> Result<VolumeHandle, GatewayError> {
        let volume = self
            .docker
            .create_volume(CreateVolumeOptions {
                name: name.to_string(),
                driver: "local".to_string(),
                driver_opts: HashMap::new(),
                labels,
            })
            .await?;
        Ok(VolumeHandle { name: volume.name })
    }

    async fn delete_volume(&self, volume: &VolumeHandle) -> Result<(), GatewayError> {
        self.docker
            .remove_volume(&volume.name, Some(RemoveVolumeOptions { force: true }))
            .await?;
        Ok(())
    }

    /// One-entry tar uploaded to the parent directory
    async fn copy_to_container(
        &self,
        container_id: &str,
        target_path: &str,
        contents: &[u8],
    ) -> Result<(), GatewayError> {
        let (dir, file_name) = split_target(target_path)?;
        let archive = build_archive(&file_name, contents)?;

        let options = Some(UploadToContainerOptions {
            path: dir,
            ..Default::default()
        });
        self.docker
            .upload_to_container(container_id, options, archive.into())
            .await?;
        Ok(())
    }

    async fn create_container(&self, spec: ContainerSpec) -> Result<String, GatewayError> {
        let memory = memory_limit(spec.memory_limit_bytes)?;

        let mounts = spec
            .mounts
            .iter()
            .map(|mount| Mount {
                target: Some(mount.target.clone()),
                source: Some(mount.volume.clone()),
                typ: Some(MountTypeEnum::VOLUME),
                read_only: Some(mount.read_only),
                ..Default::default()
            })
            .collect();

        let config = Config {
            image: Some(spec.image),
            entrypoint: Some(spec.command),
            env: Some(vec!["PYTHONUNBUFFERED=1".to_string()]),
            labels: Some(spec.labels),
            tty: Some(false),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true),
            host_config: Some(HostConfig {
                mounts: Some(mounts),
                memory: Some(memory),
                // no swap beyond the memory limit
                memory_swap: Some(memory),
                ..Default::default()
            }),
            ..Default::default()
        };

        let options = Some(CreateContainerOptions {
            name: spec.name,
            platform: None,
        });
        let created = self.docker.create_container(options, config).await?;
        Ok(created.id)
    }

    async fn start_container(&self, id: &str) -> Result<(), GatewayError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str) -> Result<(), GatewayError> {
        self.docker
            .stop_container(id, Some(StopContainerOptions { t: 0 }))
            .await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), GatewayError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    v: false,
                    ..Default::default()
                }),
            )
            .await?;
        Ok(())
    }

    async fn wait_container(&self, id: &str, timeout_ms: u64) -> WaitOutcome {
        let stream = self.docker.wait_container(
            id,
            Some(WaitContainerOptions {
                condition: "not-running",
            }),
        );
        race_wait(stream, timeout_ms).await
    }

    async fn container_state(&self, id: &str) -> Result<ContainerExit, GatewayError> {
        let inspected = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await?;
        let state = inspected
            .state
            .ok_or_else(|| GatewayError::MissingState(id.to_string()))?;
        let exit_code = state
            .exit_code
            .ok_or_else(|| GatewayError::MissingState(id.to_string()))?;

        Ok(ContainerExit {
            exit_code,
            oom_killed: state.oom_killed.unwrap_or(false),
        })
    }

    async fn get_log(&self, id: &str, stdout: bool, stderr: bool) -> Result<String, GatewayError> {
        let options = Some(LogsOptions::<String> {
            stdout,
            stderr,
            follow: false,
            tail: "all".to_string(),
            ..Default::default()
        });
        collect_log(self.docker.logs(id, options)).await
    }

    async fn list_containers(&self, label: &str) -> Result<Vec<String>, GatewayError> {
        let filters = HashMap::from([("label".to_string(), vec![label.to_string()])]);
        let containers = self
            .docker
            .list_containers(Some(ListContainersOptions {
                all: true,
                filters,
                ..Default::default()
            }))
            .await?;
        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }

    async fn list_volumes(&self, label: &str) -> Result<Vec<VolumeHandle>, GatewayError> {
        let filters = HashMap::from([("label".to_string(), vec![label.to_string()])]);
        let response = self
            .docker
            .list_volumes(Some(ListVolumesOptions { filters }))
            .await?;
        Ok(response
            .volumes
            .unwrap_or_default()
            .into_iter()
            .map(|volume| VolumeHandle { name: volume.name })
            .collect())
    }
}

/// Classifies the first event of a wait stream, bounded by `timeout_ms`
pub async fn race_wait<T, S>(stream: S, timeout_ms: u64) -> WaitOutcome
where
    S: Stream<Item = Result<T, DockerError>>,
{
    let mut stream = std::pin::pin!(stream);
    match tokio::time::timeout(Duration::from_millis(timeout_ms), stream.next()).await {
        Err(_) => WaitOutcome::TimedOut,
        Ok(Some(Ok(_))) => WaitOutcome::Exited,
        // bollard reports a non-zero exit as an error
        Ok(Some(Err(DockerError::DockerContainerWaitError { .. }))) => WaitOutcome::Exited,
        Ok(Some(Err(err))) => WaitOutcome::Failed(err.to_string()),
        Ok(None) => WaitOutcome::Failed("wait stream ended before exit".to_string()),
    }
}

/// Concatenates every frame's raw bytes and decodes once, so a character
/// split across frames survives
pub async fn collect_log<S>(stream: S) -> Result<String, GatewayError>
where
    S: Stream<Item = Result<LogOutput, DockerError>>,
{
    let mut stream = std::pin::pin!(stream);
    let mut collected = Vec::new();
    while let Some(chunk) = stream.next().await {
        let message = match chunk? {
            LogOutput::StdOut { message }
            | LogOutput::StdErr { message }
            | LogOutput::Console { message }
            | LogOutput::StdIn { message } => message,
        };
        collected.extend_from_slice(&message);
    }
    Ok(normalize_newlines(&String::from_utf8_lossy(&collected)))
}

/// Docker reads a zero memory limit as unlimited
fn memory_limit(bytes: u64) -> Result<i64, GatewayError> {
    match i64::try_from(bytes) {
        Ok(memory) if memory > 0 => Ok(memory),
        _ => Err(GatewayError::MemoryLimit(bytes)),
    }
}

fn split_target(target_path: &str) -> Result<(String, String), GatewayError> {
    let path = Path::new(target_path);
    let dir = path
        .parent()
        .and_then(|dir| dir.to_str())
        .filter(|dir| !dir.is_empty());
    let file_name = path.file_name().and_then(|name| name.to_str());

    match (dir, file_name) {
        (Some(dir), Some(file_name)) => Ok((dir.to_string(), file_name.to_string())),
        _ => Err(GatewayError::InvalidPath(target_path.to_string())),
    }
}

fn build_archive(file_name: &str, contents: &[u8]) -> Result<Vec<u8>, GatewayError> {
    let mut header = tar::Header::new_gnu();
    header.set_size(contents.len() as u64);
    header.set_mode(0o777);
    header.set_mtime(0);

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, file_name, contents)?;
    Ok(builder.into_inner()?)
}

pub fn normalize_newlines(raw: &str) -> String {
    raw.replace("\r\n", "\n")
}
