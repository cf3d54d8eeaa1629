//! Command-line tests for the `tagsim` binary.
//!
//! These run the simulator as a subprocess so the global tracing and metrics
//! state of one run cannot leak into another test.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};

use serde::Deserialize;

const DEMO: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/models/phase_cancellation.yaml");

// ============================================================================
// JSON Deserialization Types
// ============================================================================

/// The fields of a JSON lines record this test looks at.
#[derive(Debug, Deserialize)]
struct RecordLine {
    seq: u64,
    time: u64,
    tag: String,
    record: String,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    voltage: Option<f64>,
}

/// Subset of the statistics printed on stdout.
#[derive(Debug, Deserialize)]
struct StatsLine {
    events_dispatched: u64,
    log_records: u64,
    faults: u64,
    stop_reason: String,
}

/// The parts of the metrics export this test reads.
#[derive(Debug, Deserialize)]
struct MetricsExport {
    metrics: HashMap<String, MetricValue>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MetricValue {
    Counter(CounterValue),
    Other(serde_json::Value),
}

#[derive(Debug, Deserialize)]
struct CounterValue {
    total: u64,
    #[serde(default)]
    labels: HashMap<String, HashMap<String, Box<CounterValue>>>,
}

impl MetricsExport {
    fn counter_total(&self, metric: &str, labels: &[(&str, &str)]) -> Option<u64> {
        let mut current = match self.metrics.get(metric)? {
            MetricValue::Counter(c) => c,
            MetricValue::Other(_) => return None,
        };
        for (name, value) in labels {
            current = current.labels.get(*name)?.get(*value)?;
        }
        Some(current.total)
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tagsim-cli-{}-{}", name, std::process::id()));
    fs::create_dir_all(&dir).expect("Failed to create scratch dir");
    dir
}

fn tagsim(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tagsim"))
        .args(args)
        .output()
        .expect("Failed to execute tagsim")
}

fn scratch_output(name: &str) -> (PathBuf, String) {
    let dir = scratch_dir(name);
    let output = dir.join("run.jsonl").to_string_lossy().into_owned();
    (dir, output)
}

fn run_and_collect(name: &str, extra: &[&str]) -> (StatsLine, Vec<RecordLine>) {
    let dir = scratch_dir(name);
    let output_path = dir.join("run.jsonl");
    let output_arg = output_path.to_string_lossy().into_owned();

    let mut args = vec!["run", DEMO, "--quiet", "--output", output_arg.as_str()];
    args.extend_from_slice(extra);
    let output = tagsim(&args);
    if !output.status.success() {
        panic!(
            "Simulation failed:\nstdout: {}\nstderr: {}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );
    }

    let stats: StatsLine =
        serde_json::from_slice(&output.stdout).expect("Failed to parse stats JSON");
    let records = fs::read_to_string(&output_path)
        .expect("Failed to read record output")
        .lines()
        .map(|line| serde_json::from_str(line).expect("Failed to parse record line"))
        .collect();
    let _ = fs::remove_dir_all(&dir);
    (stats, records)
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_run_writes_json_lines() {
    let (stats, records) = run_and_collect("run", &["--seed", "1"]);

    assert_eq!(stats.faults, 0);
    assert_eq!(stats.stop_reason, "time_limit");
    assert_eq!(stats.log_records as usize, records.len());

    for (i, record) in records.iter().enumerate() {
        assert_eq!(record.seq, i as u64, "records are numbered in order");
    }
    assert!(records.windows(2).all(|w| w[0].time <= w[1].time));

    let receptions: Vec<_> = records
        .iter()
        .filter(|r| r.tag == "receiver" && r.label.as_deref() == Some("rx"))
        .collect();
    assert!(!receptions.is_empty());
    assert!(receptions.iter().all(|r| r.record == "emit" && r.voltage.is_some()));
}

#[test]
fn test_cli_limits_override_model() {
    let (stats, _) = run_and_collect("limits", &["--max-events", "25"]);
    assert_eq!(stats.events_dispatched, 25);
    assert_eq!(stats.stop_reason, "event_limit");

    let (stats, short) = run_and_collect("duration", &["--duration", "3us"]);
    assert_eq!(stats.stop_reason, "time_limit");
    assert!(!short.is_empty());
    assert!(short.iter().all(|r| r.time <= 3_000));
}

#[test]
fn test_same_seed_same_output() {
    let (_, first) = run_and_collect("seed-a", &["--seed", "7"]);
    let (_, second) = run_and_collect("seed-b", &["--seed", "7"]);
    let voltages = |records: &[RecordLine]| -> Vec<Option<f64>> {
        records.iter().map(|r| r.voltage).collect()
    };
    assert_eq!(first.len(), second.len());
    assert_eq!(voltages(&first), voltages(&second));
}

#[test]
fn test_check_reports_model_summary() {
    let output = tagsim(&["check", DEMO]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Model OK"));
    assert!(stdout.contains("reflector_a"));
    assert!(stdout.contains("toggler"));
}

#[test]
fn test_check_rejects_bad_model() {
    let dir = scratch_dir("bad");
    let path = dir.join("bad.yaml");
    fs::write(
        &path,
        "machines:\n  - name: m\n    kind: input\n    entry: missing\n    states:\n      - name: s\n",
    )
    .unwrap();

    let output = tagsim(&["check", path.to_str().unwrap()]);
    let _ = fs::remove_dir_all(&dir);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("missing"), "stderr: {}", stderr);
}

#[test]
fn test_opcodes_lists_instructions() {
    let output = tagsim(&["opcodes"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for name in ["set_timer", "transition", "wait", "in.voltage"] {
        assert!(stdout.contains(name), "missing {}", name);
    }
}

#[test]
fn test_metrics_output_json() {
    let (dir, output_arg) = scratch_output("metrics");
    let output = tagsim(&[
        "run",
        DEMO,
        "--quiet",
        "--output",
        output_arg.as_str(),
        "--metrics-output",
        "json",
    ]);
    let _ = fs::remove_dir_all(&dir);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "stderr: {}", stderr);

    // Metrics replace the statistics on stdout.
    let stdout = String::from_utf8_lossy(&output.stdout);
    let json_start = stdout.find('{').expect("No JSON found in output");
    let export: MetricsExport =
        serde_json::from_str(&stdout[json_start..]).expect("Failed to parse metrics JSON");

    // Both reflectors send once per microsecond for 20us.
    let sent = export.counter_total("tagsim.signal.sent", &[]).expect("signals sent");
    assert!(sent >= 40, "sent {}", sent);
    for tag in ["reflector_a", "reflector_b"] {
        let per_tag = export.counter_total("tagsim.signal.sent", &[("tag", tag)]).unwrap();
        assert!(per_tag >= 20, "{} sent {}", tag, per_tag);
    }
    assert_eq!(export.counter_total("tagsim.signal.sent", &[("tag", "receiver")]), None);

    // The reflectors are equidistant from the receiver, so their
    // reflections land inside one resolution window.
    let merged = export
        .counter_total("tagsim.signal.arrivals_merged", &[("tag", "receiver")])
        .expect("merged arrivals at the receiver");
    assert!(merged > 0);
    assert!(export.metrics.contains_key("tagsim.signal.rx_voltage"));
}

#[test]
fn test_metric_selection_limits_export() {
    let (dir, output_arg) = scratch_output("metric-select");
    let output = tagsim(&[
        "run",
        DEMO,
        "--quiet",
        "--output",
        output_arg.as_str(),
        "--metrics-output",
        "json",
        "--metric",
        "tagsim.fsm.transitions/machine",
    ]);
    let _ = fs::remove_dir_all(&dir);
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    let export: MetricsExport = serde_json::from_str(&stdout[stdout.find('{').unwrap()..]).unwrap();
    assert_eq!(export.metrics.len(), 1);
    let total = export.counter_total("tagsim.fsm.transitions", &[]).unwrap();
    assert!(total > 0);
    // Only the output machines transition.
    assert_eq!(
        export.counter_total("tagsim.fsm.transitions", &[("machine", "output")]),
        Some(total)
    );
    assert_eq!(export.counter_total("tagsim.fsm.transitions", &[("tag", "reflector_a")]), None);
}

#[test]
fn test_trace_prints_selected_tag_only() {
    let (dir, output_arg) = scratch_output("trace");
    let output = Command::new(env!("CARGO_BIN_EXE_tagsim"))
        .args(["run", DEMO, "--quiet", "--output", output_arg.as_str()])
        .args(["--max-events", "200", "--trace", "reflector_a"])
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute tagsim");
    let _ = fs::remove_dir_all(&dir);
    assert!(output.status.success());

    let stderr = String::from_utf8_lossy(&output.stderr);
    let trace: Vec<&str> = stderr.lines().filter(|l| l.contains("tagsim::trace")).collect();
    assert!(!trace.is_empty(), "no trace lines in:\n{}", stderr);

    assert!(trace.iter().any(|l| l.contains("EVENT_RX")));
    assert!(trace.iter().any(|l| l.contains("STATE") && l.contains("high -> low")));
    assert!(trace.iter().any(|l| l.contains("SEND")));
    for line in &trace {
        assert!(line.contains("reflector_a ("), "untraced tag in: {}", line);
        assert!(!line.contains("reflector_b (") && !line.contains("receiver ("), "{}", line);
    }
}

#[test]
fn test_no_trace_without_flag() {
    let (dir, output_arg) = scratch_output("no-trace");
    let output = Command::new(env!("CARGO_BIN_EXE_tagsim"))
        .args(["run", DEMO, "--quiet", "--output", output_arg.as_str(), "--max-events", "50"])
        .env("NO_COLOR", "1")
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to execute tagsim");
    let _ = fs::remove_dir_all(&dir);
    assert!(output.status.success());
    assert!(!String::from_utf8_lossy(&output.stderr).contains("tagsim::trace"));
}
