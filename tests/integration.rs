use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use flate2::write::GzEncoder;
use flate2::Compression;
use tempfile::TempDir;

fn sheetfeed_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("sheetfeed");
    path
}

fn write_gz(path: &Path, content: &str) {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(content.as_bytes()).unwrap();
    fs::write(path, encoder.finish().unwrap()).unwrap();
}

fn csv_with_rows(rows: usize) -> String {
    let mut out = String::from("id,name,city\n");
    for i in 0..rows {
        out.push_str(&format!("{},name-{},city-{}\n", i, i, i % 7));
    }
    out
}

fn setup_test_env() -> (TempDir, PathBuf) {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().to_path_buf();

    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();

    let config_content = format!(
        r#"[server]
bind = "127.0.0.1:0"
temp_dir = "{}/temp"

[upload]
max_cells_per_write = 9
max_cells_per_document = 10000000
max_concurrent_writes = 2
retry_base_delay_ms = 0

[sheets]
backend = "memory"
"#,
        root.display()
    );

    let config_path = config_dir.join("sheetfeed.toml");
    fs::write(&config_path, config_content).unwrap();

    (tmp, config_path)
}

fn run_sheetfeed(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let binary = sheetfeed_binary();
    let output = Command::new(&binary)
        .arg("--config")
        .arg(config_path.to_str().unwrap())
        .args(args)
        .output()
        .unwrap_or_else(|e| panic!("Failed to run sheetfeed binary at {:?}: {}", binary, e));

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

#[test]
fn test_plan_reports_chunks() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("data.csv.gz");
    write_gz(&file, &csv_with_rows(10));

    let (stdout, stderr, success) = run_sheetfeed(&config_path, &["plan", file.to_str().unwrap()]);
    assert!(success, "plan failed: {}", stderr);

    // 11 rows with the header, 3 rows per write of 9 cells.
    assert!(stdout.contains("rows: 10 (+ header)"), "stdout: {}", stdout);
    assert!(stdout.contains("fields: 3"));
    assert!(stdout.contains("documents required: 1"));
    assert!(stdout.contains("max rows per chunk: 3"));
    assert!(stdout.contains("chunks: 4"));
    assert!(stdout.contains("document 1: 4 chunks"));
}

#[test]
fn test_plan_without_config_uses_defaults() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("data.csv.gz");
    write_gz(&file, &csv_with_rows(50));

    let missing = tmp.path().join("nope.toml");
    let (stdout, stderr, success) = run_sheetfeed(&missing, &["plan", file.to_str().unwrap()]);
    assert!(success, "plan failed: {}", stderr);
    assert!(stdout.contains("max rows per chunk: 94133"), "stdout: {}", stdout);
    assert!(stdout.contains("chunks: 1"));
}

#[test]
fn test_plan_rejects_plain_csv() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("data.csv");
    fs::write(&file, csv_with_rows(3)).unwrap();

    let (_stdout, stderr, success) = run_sheetfeed(&config_path, &["plan", file.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("decompress"), "stderr: {}", stderr);
}

#[test]
fn test_plan_rejects_too_many_columns() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("wide.csv.gz");
    write_gz(&file, "a,b,c,d,e,f,g,h,i,j\n1,2,3,4,5,6,7,8,9,10\n");

    let (_stdout, _stderr, success) =
        run_sheetfeed(&config_path, &["plan", file.to_str().unwrap()]);
    assert!(!success, "ten columns cannot fit a nine-cell write");
}

#[test]
fn test_upload_with_memory_backend() {
    let (tmp, config_path) = setup_test_env();
    let file = tmp.path().join("data.csv.gz");
    write_gz(&file, &csv_with_rows(10));

    let (stdout, stderr, success) = run_sheetfeed(
        &config_path,
        &["--progress", "off", "upload", file.to_str().unwrap()],
    );
    assert!(success, "upload failed: {}", stderr);
    assert!(stdout.contains("Processing completed successfully:"));
    assert!(stdout.contains("- Rows processed: 10"));
    assert!(stdout.contains("- Chunks uploaded: 4"));
    assert!(stdout.contains("Spreadsheet 1: memory://mem-1"));
}

#[test]
fn test_missing_config_fails_for_upload() {
    let tmp = TempDir::new().unwrap();
    let file = tmp.path().join("data.csv.gz");
    write_gz(&file, &csv_with_rows(1));

    let missing = tmp.path().join("nope.toml");
    let (_stdout, stderr, success) =
        run_sheetfeed(&missing, &["upload", file.to_str().unwrap()]);
    assert!(!success);
    assert!(stderr.contains("Failed to read config file"), "stderr: {}", stderr);
}
