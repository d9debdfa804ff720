/// Sandbox Engine - two-phase container lifecycle for one submission
///
/// create (image + program volume + source) → compile once → run many
/// times, each run with its own stdin volume → cleanup. The program volume
/// is read-only during runs, so concurrent `run` calls on one instance
/// never observe each other.
use async_trait::async_trait;
use codejudge_common::recipe::{
    self, LanguageRecipe, COMPILE_MEMORY_LIMIT, PROGRAM_DIR, SOURCE_PATH, STAGING_MEMORY_LIMIT,
    STDIN_DIR, STDIN_PATH,
};
use codejudge_common::types::Language;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::SandboxEngine;
use crate::gateway::{
    label_filter, run_labels, ContainerExit, ContainerRuntime, ContainerSpec, GatewayError,
    VolumeHandle, VolumeMount, WaitOutcome, MANAGED_LABEL,
};

/// How long a staging container may idle while files are copied in
const STAGING_IDLE_SECS: u64 = 600;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Image,
    Volume,
    Staging,
    Compile,
    Run,
    Cleanup,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Image => "image",
            Stage::Volume => "volume",
            Stage::Staging => "staging",
            Stage::Compile => "compile",
            Stage::Run => "run",
            Stage::Cleanup => "cleanup",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("runtime error during {stage}: {source}")]
    Runtime {
        stage: Stage,
        #[source]
        source: GatewayError,
    },

    #[error("wait failed during {stage}: {reason}")]
    Wait { stage: Stage, reason: String },

    #[error("sandbox {run_id} is not compiled")]
    NotCompiled { run_id: String },
}

impl SandboxError {
    pub fn runtime(stage: Stage) -> impl FnOnce(GatewayError) -> SandboxError {
        move |source| SandboxError::Runtime { stage, source }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SandboxState {
    Created,
    Compiled,
    CompileFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Set when waiting on the compile container itself failed
    pub wait_error: Option<String>,
}

impl CompileOutput {
    pub fn success() -> Self {
        Self {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            timed_out: false,
            wait_error: None,
        }
    }

    pub fn is_success(&self) -> bool {
        !self.timed_out && self.wait_error.is_none() && self.exit_code == 0
    }

    /// Text shown to the submitter when the build failed
    pub fn diagnostics(&self) -> String {
        if self.timed_out {
            return "compilation timed out".to_string();
        }
        if let Some(reason) = &self.wait_error {
            return format!("compilation did not finish: {}", reason);
        }
        format!("{}{}", self.stdout, self.stderr)
    }
}

/// One submission's compiled-program context
#[derive(Debug, Clone)]
pub struct SandboxInstance {
    pub run_id: String,
    pub language: Language,
    pub image: String,
    pub recipe: &'static LanguageRecipe,
    pub program_volume: VolumeHandle,
    pub state: SandboxState,
    pub compile: Option<CompileOutput>,
}

impl SandboxInstance {
    pub fn new(run_id: String, recipe: &'static LanguageRecipe, program_volume: VolumeHandle) -> Self {
        Self {
            run_id,
            language: recipe.language,
            image: recipe.image.to_string(),
            recipe,
            program_volume,
            state: SandboxState::Created,
            compile: None,
        }
    }

    /// Records a compile outcome and moves the state machine forward
    pub fn record_compile(&mut self, output: CompileOutput) {
        self.state = if output.is_success() {
            SandboxState::Compiled
        } else {
            SandboxState::CompileFailed
        };
        self.compile = Some(output);
    }

    pub fn ensure_compiled(&self) -> Result<(), SandboxError> {
        if self.state == SandboxState::Compiled {
            Ok(())
        } else {
            Err(SandboxError::NotCompiled {
                run_id: self.run_id.clone(),
            })
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxRunResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    pub timed_out: bool,
    pub oom_killed: bool,
}

impl SandboxRunResult {
    /// What gets stored and compared: stdout then stderr
    pub fn output(&self) -> String {
        format!("{}{}", self.stdout, self.stderr)
    }
}

pub fn program_volume_name(run_id: &str) -> String {
    format!("codejudge-{}-program", run_id)
}

pub fn stdin_volume_name(run_id: &str, suffix: &str) -> String {
    format!("codejudge-{}-stdin-{}", run_id, suffix)
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Raw result of one container execution
struct Execution {
    wait: WaitOutcome,
    exit_code: i64,
    oom_killed: bool,
    stdout: String,
    stderr: String,
}

/// Container-backed implementation of `SandboxEngine`
#[derive(Clone)]
pub struct DockerSandbox {
    runtime: Arc<dyn ContainerRuntime>,
}

impl DockerSandbox {
    pub fn new<R: ContainerRuntime + 'static>(runtime: R) -> Self {
        Self::with_runtime(Arc::new(runtime))
    }

    pub fn with_runtime(runtime: Arc<dyn ContainerRuntime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &dyn ContainerRuntime {
        self.runtime.as_ref()
    }

    async fn ensure_image(&self, image: &str) -> Result<(), SandboxError> {
        let exists = self
            .runtime
            .image_exists(image)
            .await
            .map_err(SandboxError::runtime(Stage::Image))?;
        if !exists {
            info!(image, "pulling image");
            self.runtime
                .pull_image(image)
                .await
                .map_err(SandboxError::runtime(Stage::Image))?;
        }
        Ok(())
    }

    /// Copies `contents` into `volume` at `target_path` through a short-lived
    /// container that opens up permissions on the mount and then idles.
    /// The container is removed on every path.
    async fn stage_file(
        &self,
        run_id: &str,
        image: &str,
        volume: &VolumeHandle,
        mount_dir: &str,
        target_path: &str,
        contents: &[u8],
    ) -> Result<(), SandboxError> {
        let spec = ContainerSpec {
            name: format!("codejudge-{}-staging-{}", run_id, short_id()),
            image: image.to_string(),
            command: recipe::shell_command(&format!(
                "chmod -R 777 {} && sleep {}",
                mount_dir, STAGING_IDLE_SECS
            )),
            mounts: vec![VolumeMount {
                volume: volume.name.clone(),
                target: mount_dir.to_string(),
                read_only: false,
            }],
            memory_limit_bytes: STAGING_MEMORY_LIMIT,
            labels: run_labels(run_id),
        };

        let container_id = self
            .runtime
            .create_container(spec)
            .await
            .map_err(SandboxError::runtime(Stage::Staging))?;

        let staged = match self.runtime.start_container(&container_id).await {
            Ok(()) => {
                self.runtime
                    .copy_to_container(&container_id, target_path, contents)
                    .await
            }
            Err(err) => Err(err),
        }
        .map_err(SandboxError::runtime(Stage::Staging));

        self.discard_container(&container_id).await;
        staged
    }

    /// Create, start, wait (bounded), collect, remove. The container is
    /// gone when this returns, whatever happened.
    async fn execute(
        &self,
        spec: ContainerSpec,
        timeout_ms: u64,
        stage: Stage,
    ) -> Result<Execution, SandboxError> {
        let container_id = self
            .runtime
            .create_container(spec)
            .await
            .map_err(SandboxError::runtime(stage))?;

        if let Err(err) = self.runtime.start_container(&container_id).await {
            self.discard_container(&container_id).await;
            return Err(SandboxError::runtime(stage)(err));
        }

        let wait = self.runtime.wait_container(&container_id, timeout_ms).await;
        if wait == WaitOutcome::TimedOut {
            debug!(container_id = %container_id, %stage, timeout_ms, "time limit reached, stopping");
            if let Err(err) = self.runtime.stop_container(&container_id).await {
                warn!(container_id = %container_id, error = %err, "failed to stop timed out container");
            }
        }

        let collected = self.collect(&container_id, &wait, stage).await;
        self.discard_container(&container_id).await;
        let (exit, stdout, stderr) = collected?;

        Ok(Execution {
            wait,
            exit_code: exit.exit_code,
            oom_killed: exit.oom_killed,
            stdout,
            stderr,
        })
    }

    /// Exit state and both logs of a finished container. Only a timed out
    /// container may lose its logs; its partial output is best effort.
    async fn collect(
        &self,
        container_id: &str,
        wait: &WaitOutcome,
        stage: Stage,
    ) -> Result<(ContainerExit, String, String), SandboxError> {
        let exit = self
            .runtime
            .container_state(container_id)
            .await
            .map_err(SandboxError::runtime(stage))?;

        let partial = *wait == WaitOutcome::TimedOut;
        let stdout = self
            .read_log(container_id, true, false, partial)
            .await
            .map_err(SandboxError::runtime(stage))?;
        let stderr = self
            .read_log(container_id, false, true, partial)
            .await
            .map_err(SandboxError::runtime(stage))?;

        Ok((exit, stdout, stderr))
    }

    async fn read_log(
        &self,
        container_id: &str,
        stdout: bool,
        stderr: bool,
        best_effort: bool,
    ) -> Result<String, GatewayError> {
        match self.runtime.get_log(container_id, stdout, stderr).await {
            Err(err) if best_effort => {
                warn!(container_id, error = %err, "failed to read partial log");
                Ok(String::new())
            }
            other => other,
        }
    }

    async fn discard_container(&self, container_id: &str) {
        if let Err(err) = self.runtime.remove_container(container_id).await {
            warn!(container_id, error = %err, "failed to remove container");
        }
    }

    async fn discard_volume(&self, volume: &VolumeHandle) {
        if let Err(err) = self.runtime.delete_volume(volume).await {
            warn!(volume = %volume.name, error = %err, "failed to delete volume");
        }
    }

    /// Removes every managed container and volume; returns how many objects
    /// were removed. Meant for start-up, before any sandbox is live.
    pub async fn reap_orphans(&self) -> Result<usize, SandboxError> {
        let filter = label_filter(MANAGED_LABEL, "true");
        let mut removed = 0;

        let containers = self
            .runtime
            .list_containers(&filter)
            .await
            .map_err(SandboxError::runtime(Stage::Cleanup))?;
        for container_id in containers {
            self.runtime
                .remove_container(&container_id)
                .await
                .map_err(SandboxError::runtime(Stage::Cleanup))?;
            removed += 1;
        }

        let volumes = self
            .runtime
            .list_volumes(&filter)
            .await
            .map_err(SandboxError::runtime(Stage::Cleanup))?;
        for volume in volumes {
            self.runtime
                .delete_volume(&volume)
                .await
                .map_err(SandboxError::runtime(Stage::Cleanup))?;
            removed += 1;
        }

        Ok(removed)
    }
}

#[async_trait]
impl SandboxEngine for DockerSandbox {
    async fn create_sandbox(&self, language: &str, code: &str) -> Result<SandboxInstance, SandboxError> {
        let recipe = recipe::recipe_for(language)
            .ok_or_else(|| SandboxError::UnsupportedLanguage(language.to_string()))?;

        let run_id = short_id();
        self.ensure_image(recipe.image).await?;

        let volume = self
            .runtime
            .create_volume(&program_volume_name(&run_id), run_labels(&run_id))
            .await
            .map_err(SandboxError::runtime(Stage::Volume))?;

        if let Err(err) = self
            .stage_file(
                &run_id,
                recipe.image,
                &volume,
                PROGRAM_DIR,
                SOURCE_PATH,
                code.as_bytes(),
            )
            .await
        {
            self.discard_volume(&volume).await;
            return Err(err);
        }

        info!(run_id = %run_id, language = %recipe.language, "sandbox created");
        Ok(SandboxInstance::new(run_id, recipe, volume))
    }

    async fn compile_sandbox(&self, instance: &mut SandboxInstance) -> Result<CompileOutput, SandboxError> {
        let spec = ContainerSpec {
            name: format!("codejudge-{}-compile", instance.run_id),
            image: instance.image.clone(),
            command: recipe::shell_command(instance.recipe.compile_cmd),
            mounts: vec![VolumeMount {
                volume: instance.program_volume.name.clone(),
                target: PROGRAM_DIR.to_string(),
                read_only: false,
            }],
            memory_limit_bytes: COMPILE_MEMORY_LIMIT,
            labels: run_labels(&instance.run_id),
        };

        let execution = self
            .execute(spec, instance.recipe.compile_timeout_ms, Stage::Compile)
            .await?;

        let output = CompileOutput {
            exit_code: execution.exit_code,
            stdout: execution.stdout,
            stderr: execution.stderr,
            timed_out: execution.wait == WaitOutcome::TimedOut,
            wait_error: match execution.wait {
                WaitOutcome::Failed(reason) => Some(reason),
                _ => None,
            },
        };

        info!(
            run_id = %instance.run_id,
            exit_code = output.exit_code,
            success = output.is_success(),
            "compile finished"
        );
        instance.record_compile(output.clone());
        Ok(output)
    }

    async fn run(
        &self,
        instance: &SandboxInstance,
        stdin: &str,
        memory_limit_bytes: u64,
        time_limit_ms: u64,
    ) -> Result<SandboxRunResult, SandboxError> {
        instance.ensure_compiled()?;

        let suffix = short_id();
        let stdin_volume = self
            .runtime
            .create_volume(
                &stdin_volume_name(&instance.run_id, &suffix),
                run_labels(&instance.run_id),
            )
            .await
            .map_err(SandboxError::runtime(Stage::Volume))?;

        let result = self
            .run_with_stdin(instance, &stdin_volume, &suffix, stdin, memory_limit_bytes, time_limit_ms)
            .await;

        self.discard_volume(&stdin_volume).await;
        result
    }

    async fn cleanup(&self, instance: SandboxInstance) -> Result<(), SandboxError> {
        self.runtime
            .delete_volume(&instance.program_volume)
            .await
            .map_err(SandboxError::runtime(Stage::Cleanup))?;
        debug!(run_id = %instance.run_id, "sandbox cleaned up");
        Ok(())
    }
}

impl DockerSandbox {
    async fn run_with_stdin(
        &self,
        instance: &SandboxInstance,
        stdin_volume: &VolumeHandle,
        suffix: &str,
        stdin: &str,
        memory_limit_bytes: u64,
        time_limit_ms: u64,
    ) -> Result<SandboxRunResult, SandboxError> {
        self.stage_file(
            &instance.run_id,
            &instance.image,
            stdin_volume,
            STDIN_DIR,
            STDIN_PATH,
            stdin.as_bytes(),
        )
        .await?;

        let spec = ContainerSpec {
            name: format!("codejudge-{}-run-{}", instance.run_id, suffix),
            image: instance.image.clone(),
            command: recipe::shell_command(instance.recipe.run_cmd),
            mounts: vec![
                VolumeMount {
                    volume: instance.program_volume.name.clone(),
                    target: PROGRAM_DIR.to_string(),
                    read_only: true,
                },
                VolumeMount {
                    volume: stdin_volume.name.clone(),
                    target: STDIN_DIR.to_string(),
                    read_only: true,
                },
            ],
            memory_limit_bytes,
            labels: run_labels(&instance.run_id),
        };

        let execution = self.execute(spec, time_limit_ms, Stage::Run).await?;
        if let WaitOutcome::Failed(reason) = &execution.wait {
            return Err(SandboxError::Wait {
                stage: Stage::Run,
                reason: reason.clone(),
            });
        }

        Ok(SandboxRunResult {
            stdout: execution.stdout,
            stderr: execution.stderr,
            exit_code: execution.exit_code,
            timed_out: execution.wait == WaitOutcome::TimedOut,
            oom_killed: execution.oom_killed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::errors::Error as DockerError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Scripted runtime: every call succeeds unless told otherwise, and
    /// container and volume lifetimes are tracked
    #[derive(Default)]
    struct FakeRuntime {
        wait: Option<WaitOutcome>,
        exit_code: i64,
        stdout: String,
        fail_inspect: bool,
        fail_logs: bool,
        containers: Mutex<Vec<String>>,
        stopped: Mutex<Vec<String>>,
        volumes: Mutex<Vec<String>>,
    }

    impl FakeRuntime {
        fn live_containers(&self) -> usize {
            self.containers.lock().unwrap().len()
        }

        fn live_volumes(&self) -> usize {
            self.volumes.lock().unwrap().len()
        }
    }

    fn daemon_error() -> GatewayError {
        GatewayError::Docker(DockerError::DockerResponseServerError {
            status_code: 500,
            message: "daemon unavailable".to_string(),
        })
    }

    #[async_trait]
    impl ContainerRuntime for FakeRuntime {
        async fn image_exists(&self, _name: &str) -> Result<bool, GatewayError> {
            Ok(true)
        }

        async fn pull_image(&self, _name: &str) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn create_volume(
            &self,
            name: &str,
            _labels: HashMap<String, String>,
        ) -> Result<VolumeHandle, GatewayError> {
            self.volumes.lock().unwrap().push(name.to_string());
            Ok(VolumeHandle {
                name: name.to_string(),
            })
        }

        async fn delete_volume(&self, volume: &VolumeHandle) -> Result<(), GatewayError> {
            self.volumes.lock().unwrap().retain(|name| name != &volume.name);
            Ok(())
        }

        async fn copy_to_container(
            &self,
            _container_id: &str,
            _target_path: &str,
            _contents: &[u8],
        ) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn create_container(&self, spec: ContainerSpec) -> Result<String, GatewayError> {
            self.containers.lock().unwrap().push(spec.name.clone());
            Ok(spec.name)
        }

        async fn start_container(&self, _id: &str) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn stop_container(&self, id: &str) -> Result<(), GatewayError> {
            self.stopped.lock().unwrap().push(id.to_string());
            Ok(())
        }

        async fn remove_container(&self, id: &str) -> Result<(), GatewayError> {
            self.containers.lock().unwrap().retain(|name| name != id);
            Ok(())
        }

        async fn wait_container(&self, _id: &str, _timeout_ms: u64) -> WaitOutcome {
            self.wait.clone().unwrap_or(WaitOutcome::Exited)
        }

        async fn container_state(&self, _id: &str) -> Result<ContainerExit, GatewayError> {
            if self.fail_inspect {
                return Err(daemon_error());
            }
            Ok(ContainerExit {
                exit_code: self.exit_code,
                oom_killed: false,
            })
        }

        async fn get_log(&self, _id: &str, stdout: bool, _stderr: bool) -> Result<String, GatewayError> {
            if self.fail_logs {
                return Err(daemon_error());
            }
            Ok(if stdout { self.stdout.clone() } else { String::new() })
        }

        async fn list_containers(&self, _label: &str) -> Result<Vec<String>, GatewayError> {
            Ok(self.containers.lock().unwrap().clone())
        }

        async fn list_volumes(&self, _label: &str) -> Result<Vec<VolumeHandle>, GatewayError> {
            Ok(self
                .volumes
                .lock()
                .unwrap()
                .iter()
                .map(|name| VolumeHandle { name: name.clone() })
                .collect())
        }
    }

    fn fake_sandbox(fake: FakeRuntime) -> (Arc<FakeRuntime>, DockerSandbox) {
        let fake = Arc::new(fake);
        let engine = DockerSandbox::with_runtime(fake.clone());
        (fake, engine)
    }

    fn compiled_instance() -> SandboxInstance {
        let mut instance = instance();
        instance.record_compile(CompileOutput::success());
        instance
    }

    fn instance() -> SandboxInstance {
        let recipe = Language::Python.recipe().unwrap();
        SandboxInstance::new(
            "abc".to_string(),
            recipe,
            VolumeHandle {
                name: program_volume_name("abc"),
            },
        )
    }

    #[test]
    fn test_volume_names() {
        assert_eq!(program_volume_name("abc"), "codejudge-abc-program");
        assert_eq!(stdin_volume_name("abc", "42"), "codejudge-abc-stdin-42");
    }

    #[test]
    fn test_new_instance_is_created() {
        let instance = instance();
        assert_eq!(instance.state, SandboxState::Created);
        assert_eq!(instance.language, Language::Python);
        assert_eq!(instance.image, instance.recipe.image);
        assert!(instance.compile.is_none());
        assert!(matches!(
            instance.ensure_compiled(),
            Err(SandboxError::NotCompiled { .. })
        ));
    }

    #[test]
    fn test_record_compile_moves_state() {
        let mut compiled = instance();
        compiled.record_compile(CompileOutput::success());
        assert_eq!(compiled.state, SandboxState::Compiled);
        assert!(compiled.ensure_compiled().is_ok());

        let mut failed = instance();
        failed.record_compile(CompileOutput {
            exit_code: 1,
            stderr: "SyntaxError".to_string(),
            ..CompileOutput::success()
        });
        assert_eq!(failed.state, SandboxState::CompileFailed);
        assert!(failed.ensure_compiled().is_err());
    }

    #[test]
    fn test_compile_output_diagnostics() {
        let output = CompileOutput {
            exit_code: 1,
            stdout: "main.c:1: ".to_string(),
            stderr: "error\n".to_string(),
            ..CompileOutput::success()
        };
        assert!(!output.is_success());
        assert_eq!(output.diagnostics(), "main.c:1: error\n");

        let timed_out = CompileOutput {
            timed_out: true,
            ..CompileOutput::success()
        };
        assert!(!timed_out.is_success());
        assert_eq!(timed_out.diagnostics(), "compilation timed out");

        let wait_failed = CompileOutput {
            wait_error: Some("connection reset".to_string()),
            ..CompileOutput::success()
        };
        assert!(!wait_failed.is_success());
    }

    #[test]
    fn test_run_output_concatenates_streams() {
        let result = SandboxRunResult {
            stdout: "3\n".to_string(),
            stderr: "warn\n".to_string(),
            exit_code: 0,
            timed_out: false,
            oom_killed: false,
        };
        assert_eq!(result.output(), "3\nwarn\n");
    }

    #[test]
    fn test_runtime_error_names_stage() {
        let err = SandboxError::runtime(Stage::Compile)(GatewayError::MemoryLimit(u64::MAX));
        assert!(err.to_string().starts_with("runtime error during compile"));
    }

    #[tokio::test]
    async fn test_compile_inspect_failure_is_runtime_error() {
        let (fake, engine) = fake_sandbox(FakeRuntime {
            fail_inspect: true,
            ..Default::default()
        });
        let mut instance = engine.create_sandbox("python", "print(1)").await.unwrap();

        let err = engine.compile_sandbox(&mut instance).await.unwrap_err();
        assert!(matches!(
            err,
            SandboxError::Runtime {
                stage: Stage::Compile,
                ..
            }
        ));
        assert_eq!(instance.state, SandboxState::Created);
        assert_eq!(fake.live_containers(), 0);

        engine.cleanup(instance).await.unwrap();
        assert_eq!(fake.live_volumes(), 0);
    }

    #[tokio::test]
    async fn test_compile_log_failure_is_runtime_error() {
        let (fake, engine) = fake_sandbox(FakeRuntime {
            fail_logs: true,
            ..Default::default()
        });
        let mut instance = engine.create_sandbox("c", "int main() {}").await.unwrap();

        assert!(matches!(
            engine.compile_sandbox(&mut instance).await,
            Err(SandboxError::Runtime {
                stage: Stage::Compile,
                ..
            })
        ));
        assert_eq!(fake.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_run_log_failure_is_runtime_error() {
        let (fake, engine) = fake_sandbox(FakeRuntime {
            fail_logs: true,
            ..Default::default()
        });

        let err = engine
            .run(&compiled_instance(), "", 64 * 1024 * 1024, 1000)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SandboxError::Runtime {
                stage: Stage::Run,
                ..
            }
        ));
        assert_eq!(fake.live_containers(), 0);
        assert_eq!(fake.live_volumes(), 0);
    }

    #[tokio::test]
    async fn test_run_inspect_failure_is_runtime_error() {
        let (fake, engine) = fake_sandbox(FakeRuntime {
            fail_inspect: true,
            stdout: "3\n".to_string(),
            ..Default::default()
        });

        let result = engine.run(&compiled_instance(), "1\n2\n", 64 * 1024 * 1024, 1000).await;
        assert!(matches!(
            result,
            Err(SandboxError::Runtime {
                stage: Stage::Run,
                ..
            })
        ));
        assert_eq!(fake.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_timed_out_run_keeps_going_without_logs() {
        let (fake, engine) = fake_sandbox(FakeRuntime {
            wait: Some(WaitOutcome::TimedOut),
            exit_code: 137,
            fail_logs: true,
            ..Default::default()
        });

        let result = engine
            .run(&compiled_instance(), "", 64 * 1024 * 1024, 10)
            .await
            .unwrap();
        assert!(result.timed_out);
        assert_eq!(result.exit_code, 137);
        assert!(result.stdout.is_empty());
        assert_eq!(fake.stopped.lock().unwrap().len(), 1);
        assert_eq!(fake.live_containers(), 0);
    }

    #[tokio::test]
    async fn test_run_wait_failure_is_wait_error() {
        let (fake, engine) = fake_sandbox(FakeRuntime {
            wait: Some(WaitOutcome::Failed("connection reset".to_string())),
            ..Default::default()
        });

        let err = engine
            .run(&compiled_instance(), "", 64 * 1024 * 1024, 1000)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SandboxError::Wait {
                stage: Stage::Run,
                ref reason,
            } if reason == "connection reset"
        ));
        assert_eq!(fake.live_containers(), 0);
        assert_eq!(fake.live_volumes(), 0);
    }

    #[tokio::test]
    async fn test_compile_wait_outcomes_fail_the_build() {
        let (_fake, engine) = fake_sandbox(FakeRuntime {
            wait: Some(WaitOutcome::Failed("connection reset".to_string())),
            ..Default::default()
        });
        let mut instance = engine.create_sandbox("go", "package main").await.unwrap();
        let output = engine.compile_sandbox(&mut instance).await.unwrap();
        assert_eq!(output.wait_error.as_deref(), Some("connection reset"));
        assert_eq!(instance.state, SandboxState::CompileFailed);

        let (fake, engine) = fake_sandbox(FakeRuntime {
            wait: Some(WaitOutcome::TimedOut),
            exit_code: 137,
            ..Default::default()
        });
        let mut instance = engine.create_sandbox("rust", "fn main() {}").await.unwrap();
        let output = engine.compile_sandbox(&mut instance).await.unwrap();
        assert!(output.timed_out);
        assert_eq!(instance.state, SandboxState::CompileFailed);
        assert_eq!(fake.stopped.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_collects_output_and_cleans_up() {
        let (fake, engine) = fake_sandbox(FakeRuntime {
            stdout: "3\n".to_string(),
            ..Default::default()
        });
        let mut instance = engine.create_sandbox("python", "print(3)").await.unwrap();
        assert!(engine.compile_sandbox(&mut instance).await.unwrap().is_success());

        let result = engine.run(&instance, "", 64 * 1024 * 1024, 1000).await.unwrap();
        assert_eq!(result.output(), "3\n");
        assert_eq!(result.exit_code, 0);
        assert!(!result.timed_out);

        engine.cleanup(instance).await.unwrap();
        assert_eq!(fake.live_containers(), 0);
        assert_eq!(fake.live_volumes(), 0);
    }
}
