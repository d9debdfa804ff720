/// Sandbox Engine abstraction
///
/// The grader only talks to this trait. `DockerSandbox` is the production
/// implementation; `DummyEngine` executes nothing and is deterministic,
/// which keeps grading and consumer tests free of a container runtime.
use async_trait::async_trait;
use codejudge_common::recipe;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::gateway::VolumeHandle;
use crate::sandbox::{
    program_volume_name, CompileOutput, SandboxError, SandboxInstance, SandboxRunResult, Stage,
};

#[async_trait]
pub trait SandboxEngine: Send + Sync {
    /// Resolves the recipe, provisions the image and the program volume and
    /// delivers the source. Fails with `UnsupportedLanguage` before touching
    /// the runtime when no recipe exists.
    async fn create_sandbox(&self, language: &str, code: &str) -> Result<SandboxInstance, SandboxError>;

    /// Build failures come back as a failed `CompileOutput`; `Err` is
    /// reserved for runtime faults
    async fn compile_sandbox(&self, instance: &mut SandboxInstance) -> Result<CompileOutput, SandboxError>;

    /// Executes the compiled program once against `stdin`. Safe to call
    /// concurrently on one instance.
    async fn run(
        &self,
        instance: &SandboxInstance,
        stdin: &str,
        memory_limit_bytes: u64,
        time_limit_ms: u64,
    ) -> Result<SandboxRunResult, SandboxError>;

    async fn cleanup(&self, instance: SandboxInstance) -> Result<(), SandboxError>;
}

/// Canned behavior for one particular stdin
#[derive(Debug, Clone)]
pub enum DummyResponse {
    Exit { code: i64, stdout: String },
    TimedOut,
    Error,
}

/// Dummy engine for hermetic tests
///
/// **Dummy Execution Rules:**
/// 1. Source code is ignored
/// 2. stdout = stdin, byte for byte (echo semantics)
/// 3. Exit code 0, never times out
/// 4. Responses can be overridden per stdin
///
/// Counters record what the grader asked for, so tests can check cleanup
/// and the parallelism bound.
#[derive(Debug, Default)]
pub struct DummyEngine {
    compile_failure: Option<String>,
    responses: HashMap<String, DummyResponse>,
    delay: Option<Duration>,
    created: AtomicUsize,
    runs: AtomicUsize,
    cleanups: AtomicUsize,
    active_runs: AtomicUsize,
    max_active_runs: AtomicUsize,
}

impl DummyEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every compile fails with `diagnostics` on stderr
    pub fn with_compile_failure(mut self, diagnostics: &str) -> Self {
        self.compile_failure = Some(diagnostics.to_string());
        self
    }

    pub fn with_response(mut self, stdin: &str, response: DummyResponse) -> Self {
        self.responses.insert(stdin.to_string(), response);
        self
    }

    /// Each run sleeps this long, so that concurrent runs overlap
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    pub fn cleanups(&self) -> usize {
        self.cleanups.load(Ordering::SeqCst)
    }

    pub fn max_active_runs(&self) -> usize {
        self.max_active_runs.load(Ordering::SeqCst)
    }

    /// Program volumes created but not yet cleaned up
    pub fn live_sandboxes(&self) -> usize {
        self.created().saturating_sub(self.cleanups())
    }
}

#[async_trait]
impl SandboxEngine for DummyEngine {
    async fn create_sandbox(&self, language: &str, _code: &str) -> Result<SandboxInstance, SandboxError> {
        let recipe = recipe::recipe_for(language)
            .ok_or_else(|| SandboxError::UnsupportedLanguage(language.to_string()))?;

        let id = self.created.fetch_add(1, Ordering::SeqCst) + 1;
        let run_id = format!("dummy{}", id);
        let volume = VolumeHandle {
            name: program_volume_name(&run_id),
        };
        Ok(SandboxInstance::new(run_id, recipe, volume))
    }

    async fn compile_sandbox(&self, instance: &mut SandboxInstance) -> Result<CompileOutput, SandboxError> {
        let output = match &self.compile_failure {
            Some(diagnostics) => CompileOutput {
                exit_code: 1,
                stderr: diagnostics.clone(),
                ..CompileOutput::success()
            },
            None => CompileOutput::success(),
        };
        instance.record_compile(output.clone());
        Ok(output)
    }

    async fn run(
        &self,
        instance: &SandboxInstance,
        stdin: &str,
        _memory_limit_bytes: u64,
        _time_limit_ms: u64,
    ) -> Result<SandboxRunResult, SandboxError> {
        instance.ensure_compiled()?;

        self.runs.fetch_add(1, Ordering::SeqCst);
        let active = self.active_runs.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_runs.fetch_max(active, Ordering::SeqCst);

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let result = match self.responses.get(stdin) {
            None => Ok(SandboxRunResult {
                stdout: stdin.to_string(),
                stderr: String::new(),
                exit_code: 0,
                timed_out: false,
                oom_killed: false,
            }),
            Some(DummyResponse::Exit { code, stdout }) => Ok(SandboxRunResult {
                stdout: stdout.clone(),
                stderr: String::new(),
                exit_code: *code,
                timed_out: false,
                oom_killed: false,
            }),
            Some(DummyResponse::TimedOut) => Ok(SandboxRunResult {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 137,
                timed_out: true,
                oom_killed: false,
            }),
            Some(DummyResponse::Error) => Err(SandboxError::Wait {
                stage: Stage::Run,
                reason: "dummy failure".to_string(),
            }),
        };

        self.active_runs.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn cleanup(&self, _instance: SandboxInstance) -> Result<(), SandboxError> {
        self.cleanups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
