use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;

fn unique_temp_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("scoped-data-cli-{}.sqlite3", ulid::Ulid::new()))
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn run_sdr<I, S>(db: &Path, args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_sdr"))
        .arg("--db")
        .arg(db)
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute sdr binary: {err}"))
}

fn parse_stdout(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn run_json<I, S>(db: &Path, args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_sdr(db, args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "sdr command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }
    parse_stdout(&output)
}

fn as_i64(value: &Value, key: &str) -> i64 {
    value
        .get(key)
        .and_then(Value::as_i64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn as_array<'a>(value: &'a Value, key: &str) -> &'a Vec<Value> {
    value
        .get(key)
        .and_then(Value::as_array)
        .unwrap_or_else(|| panic!("missing array field `{key}` in payload: {value}"))
}

fn text_value(instance: &Value) -> &str {
    instance
        .pointer("/value/value")
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing text value in payload: {instance}"))
}

fn register_chain(db: &Path) {
    run_json(
        db,
        ["container", "add", "--container-id", "1", "--container-type", "PROCESS_INSTANCE"],
    );
    run_json(
        db,
        [
            "container",
            "add",
            "--container-id",
            "10",
            "--container-type",
            "FLOW_NODE",
            "--parent-id",
            "1",
            "--parent-type",
            "PROCESS_INSTANCE",
        ],
    );
}

fn create_text(db: &Path, name: &str, container: (&str, &str), text: &str) -> Value {
    run_json(
        db,
        [
            "data",
            "create",
            "--name",
            name,
            "--container-id",
            container.0,
            "--container-type",
            container.1,
            "--text",
            text,
        ],
    )
}

const PROCESS: (&str, &str) = ("1", "PROCESS_INSTANCE");
const NODE: (&str, &str) = ("10", "FLOW_NODE");

#[test]
fn migrate_reports_contract_version_and_schema() {
    let db = unique_temp_db_path();

    let planned = run_json(&db, ["db", "migrate", "--dry-run"]);
    assert_eq!(planned["contract_version"], "cli.v1");
    assert_eq!(planned["dry_run"], true);
    assert_eq!(planned["would_apply_versions"], serde_json::json!([1, 2]));

    let applied = run_json(&db, ["db", "migrate"]);
    assert_eq!(applied["up_to_date"], true);

    let status = run_json(&db, ["db", "schema-version"]);
    assert_eq!(as_i64(&status, "current_version"), 2);

    let report = run_json(&db, ["db", "integrity-check"]);
    assert_eq!(report["quick_check_ok"], true);
}

#[test]
fn nearest_container_shadows_outer_value() {
    let db = unique_temp_db_path();
    register_chain(&db);

    create_text(&db, "x", PROCESS, "outer");
    let inner = create_text(&db, "x", NODE, "inner");
    create_text(&db, "y", PROCESS, "only-outer");

    let resolved = run_json(
        &db,
        ["data", "get", "--name", "x", "--container-id", "10", "--container-type", "FLOW_NODE"],
    );
    assert_eq!(text_value(&resolved), "inner");

    let all = run_json(
        &db,
        ["data", "get-all", "--container-id", "10", "--container-type", "FLOW_NODE"],
    );
    let names = as_array(&all, "data_instances")
        .iter()
        .map(|instance| instance["name"].as_str().unwrap_or_default().to_string())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["x".to_string(), "y".to_string()]);

    let local = run_json(
        &db,
        ["data", "get-local-all", "--container-id", "10", "--container-type", "FLOW_NODE"],
    );
    assert_eq!(as_array(&local, "data_instances").len(), 1);

    let inner_id = as_i64(&inner, "id").to_string();
    run_json(&db, ["data", "delete", "--id", inner_id.as_str()]);
    let fallback = run_json(
        &db,
        ["data", "get", "--name", "x", "--container-id", "10", "--container-type", "FLOW_NODE"],
    );
    assert_eq!(text_value(&fallback), "outer");
}

#[test]
fn updates_are_archived_and_readable_by_source() {
    let db = unique_temp_db_path();
    register_chain(&db);

    let created = create_text(&db, "x", NODE, "v1");
    let id = as_i64(&created, "id").to_string();
    let updated = run_json(&db, ["data", "update", "--id", id.as_str(), "--text", "v2"]);
    assert_eq!(text_value(&updated), "v2");

    let history = run_json(&db, ["archive", "history", "--source-id", id.as_str()]);
    let values = as_array(&history, "archived_data_instances")
        .iter()
        .map(|archived| text_value(archived).to_string())
        .collect::<Vec<_>>();
    assert_eq!(values, vec!["v1".to_string(), "v2".to_string()]);

    let latest = run_json(&db, ["archive", "by-source", "--source-id", id.as_str()]);
    assert_eq!(text_value(&latest), "v2");

    let early = run_sdr(
        &db,
        ["archive", "by-source", "--source-id", id.as_str(), "--as-of", "1970-01-01T00:00:00Z"],
    );
    assert!(!early.status.success());
    assert_eq!(parse_stdout(&early)["error"]["kind"], "not_found");

    let events = run_json(&db, ["events", "list"]);
    assert_eq!(as_array(&events, "events").len(), 2);
}

#[test]
fn archived_lookup_walks_archived_containers() {
    let db = unique_temp_db_path();
    register_chain(&db);
    create_text(&db, "x", PROCESS, "kept");

    run_json(
        &db,
        ["container", "archive", "--container-id", "10", "--container-type", "FLOW_NODE"],
    );

    let live = run_sdr(
        &db,
        ["data", "get", "--name", "x", "--container-id", "10", "--container-type", "FLOW_NODE"],
    );
    assert!(!live.status.success());
    assert_eq!(parse_stdout(&live)["error"]["kind"], "not_found");

    let archived = run_json(
        &db,
        ["archive", "get", "--name", "x", "--container-id", "10", "--container-type", "FLOW_NODE"],
    );
    assert_eq!(text_value(&archived), "kept");

    let hierarchy = run_json(
        &db,
        [
            "container",
            "hierarchy",
            "--container-id",
            "10",
            "--container-type",
            "FLOW_NODE",
            "--archived",
        ],
    );
    assert_eq!(as_array(&hierarchy, "containers").len(), 2);
}

#[test]
fn engine_errors_are_reported_as_json_with_kind() {
    let db = unique_temp_db_path();
    register_chain(&db);

    let missing = run_sdr(
        &db,
        [
            "data",
            "get",
            "--name",
            "nope",
            "--container-id",
            "1",
            "--container-type",
            "PROCESS_INSTANCE",
        ],
    );
    assert!(!missing.status.success());
    let payload = parse_stdout(&missing);
    assert_eq!(payload["contract_version"], "cli.v1");
    assert_eq!(payload["error"]["kind"], "not_found");

    let empty_update = {
        let created = create_text(&db, "x", PROCESS, "v1");
        let id = as_i64(&created, "id").to_string();
        run_sdr(&db, ["data", "update", "--id", id.as_str()])
    };
    assert_eq!(parse_stdout(&empty_update)["error"]["kind"], "validation");

    let no_value = run_sdr(
        &db,
        [
            "data",
            "create",
            "--name",
            "z",
            "--container-id",
            "1",
            "--container-type",
            "PROCESS_INSTANCE",
        ],
    );
    assert_eq!(parse_stdout(&no_value)["error"]["kind"], "internal");
}

#[test]
fn config_file_tunes_batches_and_change_events() {
    let db = unique_temp_db_path();
    let config = std::env::temp_dir().join(format!("scoped-data-cli-{}.yaml", ulid::Ulid::new()));
    fs::write(&config, "delete_batch_size: 2\nemit_change_events: false\n")
        .unwrap_or_else(|err| panic!("failed to write config {}: {err}", config.display()));
    let config = path_str(&config).to_string();

    register_chain(&db);
    for name in ["a", "b", "c", "d", "e"] {
        run_json(
            &db,
            [
                "--config",
                config.as_str(),
                "data",
                "create",
                "--name",
                name,
                "--container-id",
                "1",
                "--container-type",
                "PROCESS_INSTANCE",
                "--integer",
                "7",
            ],
        );
    }

    let events = run_json(&db, ["events", "list"]);
    assert!(as_array(&events, "events").is_empty());

    let deleted = run_json(
        &db,
        [
            "--config",
            config.as_str(),
            "data",
            "delete-all-local",
            "--container-id",
            "1",
            "--container-type",
            "PROCESS_INSTANCE",
        ],
    );
    assert_eq!(as_i64(&deleted, "deleted"), 5);

    let count = run_json(
        &db,
        ["data", "count-local", "--container-id", "1", "--container-type", "PROCESS_INSTANCE"],
    );
    assert_eq!(as_i64(&count, "count"), 0);

    let purged = run_json(
        &db,
        ["archive", "purge-local", "--container-id", "1", "--container-type", "PROCESS_INSTANCE"],
    );
    assert_eq!(as_i64(&purged, "purged"), 5);
}
