//! Sandbox tests against a live Docker daemon.
//!
//! Ignored by default; run with `cargo test -p codejudge-worker -- --ignored`.
use codejudge_common::recipe::MEMORY_MB;
use codejudge_worker::gateway::{label_filter, ContainerRuntime, RUN_ID_LABEL};
use codejudge_worker::sandbox::SandboxState;
use codejudge_worker::{DockerSandbox, RuntimeGateway, SandboxEngine, SandboxInstance};
use std::time::{Duration, Instant};

const SUM_PYTHON: &str = "a = int(input())\nb = int(input())\nprint(a + b)\n";

const SUM_GO: &str = r#"package main

import "fmt"

func main() {
	var a, b int
	fmt.Scan(&a, &b)
	fmt.Println(a + b)
}
"#;

const SUM_C: &str = r#"#include <stdio.h>

int main(void) {
    int a, b;
    scanf("%d %d", &a, &b);
    printf("%d\n", a + b);
    return 0;
}
"#;

const SUM_CPP: &str = r#"#include <iostream>

int main() {
    int a, b;
    std::cin >> a >> b;
    std::cout << a + b << "\n";
    return 0;
}
"#;

const SUM_RUST: &str = r#"use std::io::Read;

fn main() {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input).unwrap();
    let sum: i64 = input.split_whitespace().map(|n| n.parse::<i64>().unwrap()).sum();
    println!("{}", sum);
}
"#;

fn sandbox() -> DockerSandbox {
    DockerSandbox::new(RuntimeGateway::connect().unwrap())
}

async fn compiled(engine: &DockerSandbox, language: &str, code: &str) -> SandboxInstance {
    let mut instance = engine.create_sandbox(language, code).await.unwrap();
    let output = engine.compile_sandbox(&mut instance).await.unwrap();
    assert!(output.is_success(), "compile failed: {}", output.diagnostics());
    instance
}

async fn assert_no_leftovers(engine: &DockerSandbox, run_id: &str) {
    let filter = label_filter(RUN_ID_LABEL, run_id);
    let containers = engine.runtime().list_containers(&filter).await.unwrap();
    let volumes = engine.runtime().list_volumes(&filter).await.unwrap();
    assert!(containers.is_empty(), "leaked containers: {:?}", containers);
    assert!(volumes.is_empty(), "leaked volumes: {:?}", volumes);
}

#[tokio::test]
#[ignore]
async fn test_sum_round_trip_every_language() {
    let engine = sandbox();
    let programs = [
        ("python", SUM_PYTHON),
        ("go", SUM_GO),
        ("c", SUM_C),
        ("cpp", SUM_CPP),
        ("rust", SUM_RUST),
    ];

    for (language, code) in programs {
        let instance = compiled(&engine, language, code).await;
        let result = engine
            .run(&instance, "1\n2\n", 256 * MEMORY_MB, 5_000)
            .await
            .unwrap();

        assert_eq!(result.stdout, "3\n", "{} stdout", language);
        assert_eq!(result.stderr, "", "{} stderr", language);
        assert_eq!(result.exit_code, 0, "{} exit code", language);
        assert!(!result.timed_out, "{} timed out", language);

        let run_id = instance.run_id.clone();
        engine.cleanup(instance).await.unwrap();
        assert_no_leftovers(&engine, &run_id).await;
    }
}

#[tokio::test]
#[ignore]
async fn test_memory_limit_kills_program() {
    let engine = sandbox();
    let code = "blocks = []\nwhile True:\n    blocks.append(bytearray(16 * 1024 * 1024))\n";
    let instance = compiled(&engine, "python", code).await;

    let result = engine
        .run(&instance, "", 32 * MEMORY_MB, 10_000)
        .await
        .unwrap();
    assert_eq!(result.exit_code, 137);
    assert!(!result.timed_out);

    engine.cleanup(instance).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_time_limit_stops_program() {
    let engine = sandbox();
    let code = "import time\ntime.sleep(30)\nprint('late')\n";
    let instance = compiled(&engine, "python", code).await;

    let started = Instant::now();
    let result = engine
        .run(&instance, "", 64 * MEMORY_MB, 1_000)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert!(result.timed_out);
    assert_eq!(result.exit_code, 137);
    assert!(!result.stdout.contains("late"));
    // staging, stop and log reads on top of the limit itself
    assert!(elapsed < Duration::from_secs(15), "overshoot: {:?}", elapsed);

    engine.cleanup(instance).await.unwrap();
}

#[tokio::test]
#[ignore]
async fn test_compile_failure_is_reported() {
    let engine = sandbox();
    let mut instance = engine
        .create_sandbox("c", "int main(void) { return }\n")
        .await
        .unwrap();

    let output = engine.compile_sandbox(&mut instance).await.unwrap();
    assert!(!output.is_success());
    assert_ne!(output.exit_code, 0);
    assert!(!output.diagnostics().is_empty());
    assert_eq!(instance.state, SandboxState::CompileFailed);
    assert!(engine.run(&instance, "", 64 * MEMORY_MB, 1_000).await.is_err());

    let run_id = instance.run_id.clone();
    engine.cleanup(instance).await.unwrap();
    assert_no_leftovers(&engine, &run_id).await;
}

#[tokio::test]
#[ignore]
async fn test_concurrent_runs_are_isolated() {
    let engine = sandbox();
    let code = "import sys\ndata = sys.stdin.read().split()\nprint(' '.join(reversed(data)))\n";
    let instance = compiled(&engine, "python", code).await;

    let inputs: Vec<String> = (0..8).map(|i| format!("{} {} {}\n", i, i * 10, i * 100)).collect();
    let runs = inputs
        .iter()
        .map(|input| engine.run(&instance, input, 64 * MEMORY_MB, 10_000));
    let results = futures_util::future::join_all(runs).await;

    for (i, result) in results.into_iter().enumerate() {
        let result = result.unwrap();
        assert_eq!(result.stdout, format!("{} {} {}\n", i * 100, i * 10, i));
        assert_eq!(result.exit_code, 0);
    }

    let run_id = instance.run_id.clone();
    engine.cleanup(instance).await.unwrap();
    assert_no_leftovers(&engine, &run_id).await;
}

#[tokio::test]
#[ignore]
async fn test_unsupported_language_touches_nothing() {
    let engine = sandbox();
    let err = engine.create_sandbox("cobol", "DISPLAY 'HI'.").await.unwrap_err();
    assert!(err.to_string().contains("unsupported language"));
}
