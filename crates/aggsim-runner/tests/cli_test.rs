//! Binary-level tests for the aggsim CLI.
//!
//! These tests exercise the `gen-keys`, `run`, and `topology` subcommands
//! end to end, including the byte-identical determinism guarantee for
//! single-threaded runs.

use std::process::{Command, Output};
use tempfile::TempDir;

fn aggsim(args: &[&str]) -> Output {
    let binary = env!("CARGO_BIN_EXE_aggsim");
    Command::new(binary)
        .args(args)
        .output()
        .expect("failed to execute aggsim")
}

fn gen_keys(dir: &TempDir) {
    let out_dir = dir.path().to_str().unwrap();
    let output = aggsim(&[
        "gen-keys",
        "--out-dir",
        out_dir,
        "--files",
        "2",
        "--keys-per-file",
        "20000",
        "--key-space",
        "64",
        "--zipf",
        "1.1",
        "--seed",
        "7",
    ]);
    assert!(
        output.status.success(),
        "gen-keys failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert!(dir.path().join("data-0").exists());
    assert!(dir.path().join("data-1").exists());
}

fn run_args<'a>(data_dir: &'a str) -> Vec<&'a str> {
    vec![
        "run",
        "--nracks",
        "4",
        "--msg-rate",
        "1000",
        "--gc-policy",
        "1",
        "--duration",
        "2",
        "--data-dir",
        data_dir,
    ]
}

#[test]
fn test_gen_keys_then_run_smoke() {
    let dir = TempDir::new().unwrap();
    gen_keys(&dir);

    let output = aggsim(&run_args(dir.path().to_str().unwrap()));
    assert!(
        output.status.success(),
        "run failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("second    1:"), "{stdout}");
    assert!(stdout.contains("(root)"), "{stdout}");
    // Four hubs at 1000 msgs/s x 32 bytes self-generate 0.13 MB per second.
    assert!(stdout.contains("second    2: self 0.13 MB"), "{stdout}");
}

#[test]
fn test_single_thread_runs_are_byte_identical() {
    let dir = TempDir::new().unwrap();
    gen_keys(&dir);

    let args = run_args(dir.path().to_str().unwrap());
    let first = aggsim(&args);
    let second = aggsim(&args);
    assert!(first.status.success());
    assert!(second.status.success());
    assert!(!first.stdout.is_empty());
    assert_eq!(first.stdout, second.stdout);
}

#[test]
fn test_stats_file_is_written() {
    let dir = TempDir::new().unwrap();
    gen_keys(&dir);
    let stats_path = dir.path().join("stats.json");

    let stats_arg = stats_path.to_str().unwrap().to_string();
    let mut args = run_args(dir.path().to_str().unwrap());
    args.push("--stats-file");
    args.push(stats_arg.as_str());
    let output = aggsim(&args);
    assert!(output.status.success());

    let body = std::fs::read_to_string(&stats_path).unwrap();
    let stats: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(stats["seconds"], 2);
    assert_eq!(stats["total_ticks"], 2000);
    assert!(stats["total_generated"].as_u64().unwrap() > 0);
}

#[test]
fn test_metrics_export_prometheus() {
    let dir = TempDir::new().unwrap();
    gen_keys(&dir);
    let metrics_path = dir.path().join("metrics.prom");

    let metrics_arg = metrics_path.to_str().unwrap().to_string();
    let mut args = run_args(dir.path().to_str().unwrap());
    args.push("--metrics-output");
    args.push("prometheus");
    args.push("--metrics-file");
    args.push(metrics_arg.as_str());
    let output = aggsim(&args);
    assert!(output.status.success());

    let body = std::fs::read_to_string(&metrics_path).unwrap();
    assert!(body.contains("# TYPE aggsim_traffic_self_bytes counter"), "{body}");
    assert!(body.contains("aggsim_sim_seconds 2"), "{body}");
}

#[test]
fn test_invalid_config_fails_fast() {
    let output = aggsim(&["run", "--fanout", "1", "--duration", "1"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("fanout"), "{stderr}");
}

#[test]
fn test_missing_key_files_are_fatal() {
    let dir = TempDir::new().unwrap();
    let output = aggsim(&[
        "run",
        "--duration",
        "1",
        "--data-dir",
        dir.path().to_str().unwrap(),
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("data-0"), "{stderr}");
}

#[test]
fn test_topology_listing() {
    let output = aggsim(&[
        "topology",
        "--nracks",
        "8",
        "--fanout",
        "4",
        "--multitree",
        "--gc-policy",
        "2",
    ]);
    assert!(
        output.status.success(),
        "{}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("3 tree(s)"), "{stdout}");
    assert!(stdout.contains("tree 2:"), "{stdout}");
    assert!(stdout.contains("policy decreasing-down"), "{stdout}");
    assert!(stdout.contains("parent -"), "{stdout}");
}
