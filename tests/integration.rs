use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

fn redmine_ka_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    path.pop(); // remove test binary name
    path.pop(); // remove deps/
    path.push("redmine-ka");
    path
}

fn run_redmine_ka(config_path: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(redmine_ka_binary())
        .arg("--config")
        .arg(config_path)
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run redmine-ka");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    (stdout, stderr, output.status.success())
}

fn write_config(root: &Path, body: &str) -> PathBuf {
    let config_dir = root.join("config");
    fs::create_dir_all(&config_dir).unwrap();
    let path = config_dir.join("redmine.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_convert_textile_to_stdout() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("notes.textile");
    fs::write(&input, "h1. Title\n\n*a* and *b*\n\nbq. quoted").unwrap();

    let (stdout, stderr, ok) =
        run_redmine_ka(&tmp.path().join("missing.toml"), &["convert-textile", input.to_str().unwrap()]);
    assert!(ok, "convert-textile failed: {}", stderr);
    assert_eq!(stdout, "# Title\n\n**a** and **b**\n\n> quoted\n");
}

#[test]
fn test_convert_textile_to_file() {
    let tmp = TempDir::new().unwrap();
    let input = tmp.path().join("page.textile");
    let output = tmp.path().join("page.md");
    fs::write(&input, "h2. Screens\n\n!login.png!").unwrap();

    let (stdout, stderr, ok) = run_redmine_ka(
        &tmp.path().join("missing.toml"),
        &[
            "convert-textile",
            input.to_str().unwrap(),
            "-o",
            output.to_str().unwrap(),
            "--attachment-prefix",
            "./files",
        ],
    );
    assert!(ok, "convert-textile failed: {}", stderr);
    assert!(stdout.starts_with("wrote "));

    let markdown = fs::read_to_string(&output).unwrap();
    assert!(markdown.starts_with("## Screens"));
    assert!(markdown.contains("![login.png](./files/login.png)"));
}

#[test]
fn test_convert_textile_missing_input() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_redmine_ka(
        &tmp.path().join("missing.toml"),
        &["convert-textile", tmp.path().join("nope.textile").to_str().unwrap()],
    );
    assert!(!ok);
    assert!(stderr.contains("Failed to read"));
}

#[test]
fn test_extract_missing_file_reports_error_field() {
    let tmp = TempDir::new().unwrap();
    let (stdout, _, ok) = run_redmine_ka(
        &tmp.path().join("missing.toml"),
        &["extract", tmp.path().join("ghost.pdf").to_str().unwrap()],
    );
    assert!(ok, "extraction errors are data, not command failures");

    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert!(json["error"]
        .as_str()
        .unwrap()
        .starts_with("File not found"));
    assert_eq!(json["text"], "");
}

#[test]
fn test_list_projects_requires_config() {
    let tmp = TempDir::new().unwrap();
    let (_, stderr, ok) = run_redmine_ka(&tmp.path().join("missing.toml"), &["list-projects"]);
    assert!(!ok);
    assert!(stderr.contains("Failed to read config file"));
}

#[test]
fn test_fetch_rejects_invalid_url() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(
        tmp.path(),
        r#"
[redmine]
url = "redmine.example.com"
api_key = "secret"

[[outputs]]
path = "./out"
projects = ["demo"]
"#,
    );

    let (_, stderr, ok) = run_redmine_ka(&config, &["fetch"]);
    assert!(!ok);
    assert!(stderr.contains("redmine.url must start with http:// or https://"));
}

#[test]
fn test_fetch_reports_unset_api_key_variable() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(
        tmp.path(),
        r#"
[redmine]
url = "https://redmine.example.com"
api_key = "${REDMINE_KA_TEST_UNSET_KEY}"

[[outputs]]
path = "./out"
projects = ["demo"]
"#,
    );

    let output = Command::new(redmine_ka_binary())
        .arg("--config")
        .arg(&config)
        .arg("fetch")
        .env_remove("REDMINE_KA_TEST_UNSET_KEY")
        .output()
        .expect("failed to run redmine-ka");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("REDMINE_KA_TEST_UNSET_KEY is not set"));
}

#[test]
fn test_list_projects_unreachable_server() {
    let tmp = TempDir::new().unwrap();
    let config = write_config(
        tmp.path(),
        r#"
[redmine]
url = "http://127.0.0.1:9"
api_key = "secret"
timeout_secs = 2

[[outputs]]
path = "./out"
projects = ["demo"]

[logging]
level = "error"
"#,
    );

    let (stdout, stderr, ok) = run_redmine_ka(&config, &["list-projects"]);
    assert!(!ok);
    assert!(stdout.is_empty());
    assert!(!stderr.contains("secret"), "API key leaked: {}", stderr);
}
