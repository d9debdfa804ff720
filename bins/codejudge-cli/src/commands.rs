// CLI commands for codejudge
use anyhow::{bail, Context, Result};
use codejudge_common::recipe::{MEMORY_MB, RECIPES};
use codejudge_common::redis::{RedisQueue, RedisStore};
use codejudge_common::store::{ChallengeRepository, SubmissionRepository};
use codejudge_common::types::{Challenge, ChallengeTestcase, NewSubmission};
use codejudge_common::validation::validate_testcases;
use codejudge_common::Config;
use codejudge_worker::{DockerSandbox, RuntimeGateway, SandboxEngine, SubmissionIntake};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::sync::Arc;

/// Challenge definition as written by authors. Limits fall back to the
/// configured defaults when omitted.
#[derive(Debug, Deserialize)]
pub struct ChallengeFile {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub testcases: Vec<TestcaseFile>,
}

#[derive(Debug, Deserialize)]
pub struct TestcaseFile {
    pub input: String,
    pub expected_output: String,
    /// Bytes
    pub memory_limit: Option<u64>,
    pub time_limit_ms: Option<u64>,
}

impl ChallengeFile {
    pub fn into_challenge(self, config: &Config) -> Challenge {
        Challenge {
            id: 0,
            name: self.name,
            description: self.description,
            testcases: self
                .testcases
                .into_iter()
                .map(|tc| ChallengeTestcase {
                    id: 0,
                    challenge_id: 0,
                    input: tc.input,
                    expected_output: tc.expected_output,
                    memory_limit: tc.memory_limit.unwrap_or(config.default_memory_bytes),
                    time_limit_ms: tc.time_limit_ms.unwrap_or(config.default_time_limit_ms),
                })
                .collect(),
        }
    }
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

async fn connect_redis(config: &Config) -> Result<::redis::aio::ConnectionManager> {
    let client = ::redis::Client::open(config.redis_url.as_str())
        .with_context(|| format!("Invalid redis url {}", config.redis_url))?;
    ::redis::aio::ConnectionManager::new(client)
        .await
        .with_context(|| format!("Failed to connect to Redis at {}", config.redis_url))
}

fn docker_sandbox() -> Result<DockerSandbox> {
    let gateway = RuntimeGateway::connect().context("Failed to connect to Docker daemon")?;
    Ok(DockerSandbox::new(gateway))
}

/// Limits for a one-off run, held to the same ceilings as challenge
/// testcases. Returns `(memory_bytes, time_limit_ms)`.
fn run_limits(config: &Config, memory_mb: Option<u64>, time_ms: Option<u64>) -> Result<(u64, u64)> {
    let memory_limit = match memory_mb {
        Some(mb) => mb
            .checked_mul(MEMORY_MB)
            .with_context(|| format!("--memory-mb {} is too large", mb))?,
        None => config.default_memory_bytes,
    };
    let time_limit = time_ms.unwrap_or(config.default_time_limit_ms);

    let testcase = ChallengeTestcase {
        id: 0,
        challenge_id: 0,
        input: String::new(),
        expected_output: String::new(),
        memory_limit,
        time_limit_ms: time_limit,
    };
    validate_testcases(&[testcase], &config.limits()).context("Invalid run limits")?;
    Ok((memory_limit, time_limit))
}

/// Print the recipe table
pub fn list_languages() {
    println!("📋 Supported languages:");
    println!();
    for recipe in RECIPES {
        println!("  • {} ({})", recipe.language, recipe.image);
        println!("    compile: {}", recipe.compile_cmd);
        println!("    run:     {}", recipe.run_cmd);
        println!("    compile timeout: {}ms", recipe.compile_timeout_ms);
    }
}

/// Create, compile, run once and clean up
pub async fn run_program(
    language: &str,
    file: &Path,
    stdin_file: Option<&Path>,
    memory_mb: Option<u64>,
    time_ms: Option<u64>,
) -> Result<()> {
    let config = Config::from_env();
    let code = read_file(file)?;
    let stdin = match stdin_file {
        Some(path) => read_file(path)?,
        None => String::new(),
    };
    let (memory_limit, time_limit) = run_limits(&config, memory_mb, time_ms)?;

    let engine = docker_sandbox()?;
    println!("🚀 Creating {} sandbox...", language);
    let mut instance = engine.create_sandbox(language, &code).await?;

    let outcome = async {
        let compile = engine.compile_sandbox(&mut instance).await?;
        if !compile.is_success() {
            println!("✗ Compilation failed:");
            println!("{}", compile.diagnostics());
            return Ok(None);
        }
        println!("✓ Compiled, running with {}MB / {}ms", memory_limit / MEMORY_MB, time_limit);
        let result = engine.run(&instance, &stdin, memory_limit, time_limit).await?;
        Ok::<_, anyhow::Error>(Some(result))
    }
    .await;

    engine.cleanup(instance).await?;

    if let Some(result) = outcome? {
        println!("───────────────────────────────────────────");
        println!("Exit code: {}", result.exit_code);
        println!("Timed out: {}", result.timed_out);
        println!("OOM killed: {}", result.oom_killed);
        println!("Stdout:");
        print!("{}", result.stdout);
        if !result.stderr.is_empty() {
            println!("Stderr:");
            print!("{}", result.stderr);
        }
    }
    Ok(())
}

/// Validate a challenge file and store it in Redis
pub async fn create_challenge(file: &Path) -> Result<()> {
    let config = Config::from_env();
    let content = read_file(file)?;
    let parsed: ChallengeFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", file.display()))?;
    let challenge = parsed.into_challenge(&config);

    if challenge.testcases.is_empty() {
        bail!("Challenge '{}' has no testcases", challenge.name);
    }
    validate_testcases(&challenge.testcases, &config.limits())?;

    let store = RedisStore::new(connect_redis(&config).await?);
    let created = store.create_challenge(challenge).await?;

    println!("✓ Challenge created: {} (id: {})", created.name, created.id);
    for (idx, testcase) in created.testcases.iter().enumerate() {
        println!(
            "  Testcase {} (id: {}) → {}MB / {}ms",
            idx + 1,
            testcase.id,
            testcase.memory_limit / MEMORY_MB,
            testcase.time_limit_ms
        );
    }
    Ok(())
}

/// Store a submission and enqueue it for the worker
pub async fn submit(challenge_id: u64, language: &str, file: &Path) -> Result<()> {
    let config = Config::from_env();
    let source_code = read_file(file)?;

    let conn = connect_redis(&config).await?;
    let store = Arc::new(RedisStore::new(conn.clone()));
    let queue = Arc::new(RedisQueue::new(conn, &config.queue_name));
    let intake = SubmissionIntake::new(store.clone(), store, queue);

    let submission = intake
        .submit_submission(NewSubmission {
            challenge_id,
            language: language.to_string(),
            source_code,
        })
        .await?;

    println!("✓ Submission {} enqueued on {}", submission.id, config.queue_name);
    println!("  Testcases: {}", submission.testcases.len());
    Ok(())
}

/// Print a stored submission
pub async fn show_status(id: u64) -> Result<()> {
    let config = Config::from_env();
    let store = RedisStore::new(connect_redis(&config).await?);

    let submission = store.find_submission(id).await?;
    println!("Submission {} (challenge {})", submission.id, submission.challenge_id);
    println!("Language: {}", submission.language);
    println!("Status:   {}", submission.status);
    if !submission.compile_output.is_empty() {
        println!("Compiler output:");
        println!("{}", submission.compile_output);
    }
    println!("───────────────────────────────────────────");
    for (idx, testcase) in submission.testcases.iter().enumerate() {
        println!(
            "Testcase {} (id: {}) → {}",
            idx + 1,
            testcase.id,
            testcase.status
        );
    }
    Ok(())
}
