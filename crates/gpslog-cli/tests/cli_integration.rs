//! CLI integration tests.
//!
//! These run the `gpslog` binary against a throwaway database and config
//! file, so they never touch the user's real data.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

struct Env {
    dir: TempDir,
}

impl Env {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("tempdir"),
        }
    }

    fn db(&self) -> PathBuf {
        self.dir.path().join("locations.db")
    }

    fn config(&self) -> PathBuf {
        self.dir.path().join("config.toml")
    }

    fn file(&self, name: &str, content: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, content).expect("write input");
        path
    }

    /// Run gpslog with this environment's database and config
    fn run(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_gpslog"))
            .env_remove("GPSLOG_DB")
            .env_remove("GPSLOG_CONFIG")
            .env_remove("RUST_LOG")
            .arg("--db")
            .arg(self.db())
            .arg("--config")
            .arg(self.config())
            .args(args)
            .output()
            .expect("Failed to run gpslog binary")
    }

    fn record(&self, input: &Path, extra: &[&str]) -> Output {
        let input = input.to_str().expect("utf-8 path");
        let mut args = vec!["record", "--input", input, "--min-distance", "0", "--no-purge"];
        args.extend_from_slice(extra);
        let output = self.run(&args);
        assert!(
            output.status.success(),
            "record failed: {}",
            String::from_utf8_lossy(&output.stderr)
        );
        output
    }

    fn list_json(&self) -> Vec<serde_json::Value> {
        let output = self.run(&["list", "--format", "json"]);
        assert!(output.status.success(), "list should succeed");
        serde_json::from_slice(&output.stdout).expect("list output should be JSON")
    }
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

// =============================================================================
// Help and version
// =============================================================================

#[test]
fn test_help_lists_commands() {
    let output = Env::new().run(&["--help"]);
    assert!(output.status.success());

    let text = stdout(&output);
    for cmd in ["record", "list", "purge", "clear", "delete", "config"] {
        assert!(text.contains(cmd), "help should list {}", cmd);
    }
}

#[test]
fn test_version() {
    let output = Env::new().run(&["--version"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("gpslog"));
}

#[test]
fn test_subcommand_help() {
    let env = Env::new();
    for cmd in ["record", "list", "purge", "clear", "delete", "config"] {
        let output = env.run(&[cmd, "--help"]);
        assert!(output.status.success(), "{} --help should succeed", cmd);
        assert!(!output.stdout.is_empty());
    }
}

// =============================================================================
// Recording and listing
// =============================================================================

#[test]
fn test_record_lines_then_list() {
    let env = Env::new();
    let input = env.file(
        "fixes.txt",
        "# lat,lon\n35.681,139.767\n35.690,139.700\n\n35.700,139.650\n",
    );
    env.record(&input, &[]);

    let records = env.list_json();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0]["latitude"], 35.681);
    assert_eq!(records[2]["longitude"], 139.65);
    for record in &records {
        assert!(record["id"].is_string(), "every stored record has an id");
    }
}

#[test]
fn test_invalid_lines_are_skipped() {
    let env = Env::new();
    let input = env.file("fixes.txt", "10,10\n91,0\nnot a fix\n20,20\n");
    env.record(&input, &[]);

    let latitudes: Vec<f64> = env
        .list_json()
        .iter()
        .map(|r| r["latitude"].as_f64().unwrap())
        .collect();
    assert_eq!(latitudes, vec![10.0, 20.0]);
}

#[test]
fn test_record_nmea() {
    let env = Env::new();
    let input = env.file(
        "track.nmea",
        "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A\n\
         $GPGSV,2,1,08,01,40,083,46,02,17,308,41,12,07,344,39,14,22,228,45*75\n",
    );
    let output = env.run(&[
        "record",
        "--kind",
        "nmea",
        "--input",
        input.to_str().unwrap(),
        "--min-distance",
        "0",
        "--no-purge",
    ]);
    assert!(output.status.success());

    let records = env.list_json();
    assert_eq!(records.len(), 1);
    let lat = records[0]["latitude"].as_f64().unwrap();
    assert!((lat - 48.1173).abs() < 1e-4);
}

#[test]
fn test_record_simulated_walk_with_geojson() {
    let env = Env::new();
    let pins = env.dir.path().join("map").join("pins.geojson");
    let output = env.run(&[
        "record",
        "--kind",
        "simulate",
        "--count",
        "5",
        "--min-distance",
        "0",
        "--no-purge",
        "--geojson",
        pins.to_str().unwrap(),
    ]);
    assert!(output.status.success());
    assert_eq!(env.list_json().len(), 5);

    let doc: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&pins).expect("pins written")).unwrap();
    assert_eq!(doc["type"], "FeatureCollection");
    assert_eq!(doc["features"].as_array().unwrap().len(), 5);
}

#[test]
fn test_list_csv_and_limit() {
    let env = Env::new();
    let input = env.file("fixes.txt", "1,1\n2,2\n3,3\n");
    env.record(&input, &[]);

    let output = env.run(&["list", "--format", "csv", "-n", "2", "--newest-first"]);
    assert!(output.status.success());
    let text = stdout(&output);
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "id,latitude,longitude,created_at");
    assert_eq!(lines.len(), 3);
    assert!(lines[1].contains(",3,3,"));
}

#[test]
fn test_list_empty_database() {
    let output = Env::new().run(&["list"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("No locations recorded"));
}

#[test]
fn test_list_rejects_bad_date() {
    let output = Env::new().run(&["list", "--since", "yesterday"]);
    assert!(!output.status.success());
}

// =============================================================================
// Deleting
// =============================================================================

#[test]
fn test_delete_by_id() {
    let env = Env::new();
    let input = env.file("fixes.txt", "1,1\n2,2\n");
    env.record(&input, &[]);

    let records = env.list_json();
    let id = records[0]["id"].as_str().unwrap().to_string();

    assert!(env.run(&["delete", &id]).status.success());
    let remaining = env.list_json();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0]["latitude"], 2.0);

    // Deleting it again reports the missing record
    assert!(!env.run(&["delete", &id]).status.success());
}

#[test]
fn test_clear_requires_confirmation() {
    let env = Env::new();
    let input = env.file("fixes.txt", "1,1\n2,2\n");
    env.record(&input, &[]);

    assert!(!env.run(&["clear"]).status.success());
    assert_eq!(env.list_json().len(), 2);

    assert!(env.run(&["clear", "--yes"]).status.success());
    assert!(env.list_json().is_empty());
}

#[test]
fn test_purge_keeps_recent_records() {
    let env = Env::new();
    let input = env.file("fixes.txt", "1,1\n");
    env.record(&input, &[]);

    let output = env.run(&["purge", "--older-than-hours", "24"]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("Removed 0 locations"));
    assert_eq!(env.list_json().len(), 1);
}

// =============================================================================
// Config
// =============================================================================

#[test]
fn test_config_path_and_init() {
    let env = Env::new();

    let output = env.run(&["config", "path"]);
    assert!(output.status.success());
    assert_eq!(stdout(&output).trim(), env.config().display().to_string());

    assert!(env.run(&["config", "init"]).status.success());
    assert!(env.config().exists());

    // A second init refuses to overwrite
    assert!(!env.run(&["config", "init"]).status.success());
    assert!(env.run(&["config", "init", "--force"]).status.success());
}

#[test]
fn test_config_show_reflects_file() {
    let env = Env::new();
    fs::write(env.config(), "retention_hours = 48\n").unwrap();

    let output = env.run(&["config", "show"]);
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains("retention_hours = 48"));
    assert!(text.contains("min_distance_m = 100.0"));
}
