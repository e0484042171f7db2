#![cfg(unix)]
#![allow(deprecated)] // cargo_bin! macro doesn't exist yet in assert_cmd 2.1

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use serial_test::serial;
use tempfile::TempDir;

/// Stand-in `sops`: "encrypts" by base64-encoding into a YAML document with a
/// `sops` block and refuses to encrypt paths containing "plain".
const FAKE_SOPS: &str = r#"#!/bin/sh
op=edit
file=
while [ $# -gt 0 ]; do
  case "$1" in
    --decrypt) op=decrypt ;;
    --encrypt) op=encrypt ;;
    --config|--output-type|--input-type|--aws-profile) shift ;;
    *) file="$1" ;;
  esac
  shift
done
seal() {
  printf 'data: %s\nsops:\n    version: 3.8.1\n' "$(base64 < "$1" | tr -d '\n')"
}
case "$op" in
  decrypt) sed -n 's/^data: //p' "$file" | base64 -d ;;
  encrypt)
    case "$file" in
      *plain*) echo "error loading config: no matching creation rules found" >&2; exit 1 ;;
    esac
    seal "$file"
    ;;
  edit)
    tmp="$(mktemp)"
    sed -n 's/^data: //p' "$file" | base64 -d > "$tmp"
    before="$(cksum < "$tmp")"
    $EDITOR "$tmp" || exit 1
    if [ "$before" = "$(cksum < "$tmp")" ]; then rm -f "$tmp"; exit 200; fi
    seal "$tmp" > "$file"
    rm -f "$tmp"
    ;;
esac
"#;

const FAILING_SOPS: &str = "#!/bin/sh
echo 'Failed to get the data key required to decrypt the SOPS file.' >&2
exit 128
";

/// Ciphertext of "password: hunter2\n" as produced by the fake engine.
const HUNTER2: &str = "data: cGFzc3dvcmQ6IGh1bnRlcjIK\nsops:\n    version: 3.8.1\n";

/// Ciphertext of "token: one\n".
const TOKEN_ONE: &str = "data: dG9rZW46IG9uZQo=\nsops:\n    version: 3.8.1\n";

struct Fixture {
    workspace: TempDir,
    config: TempDir,
    bin: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self::with_engine(FAKE_SOPS)
    }

    fn with_engine(script: &str) -> Self {
        let bin = TempDir::new().unwrap();
        write_executable(&bin.path().join("sops"), script);
        Self {
            workspace: TempDir::new().unwrap(),
            config: TempDir::new().unwrap(),
            bin,
        }
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("sops-shadow").unwrap();
        cmd.current_dir(self.workspace.path())
            .env("SOPS_SHADOW_CONFIG_DIR", self.config.path())
            .env("SOPS_SHADOW_BIN", self.bin.path().join("sops"))
            .env_remove("RUST_LOG")
            .env_remove("VISUAL")
            .env_remove("EDITOR");
        cmd
    }

    fn path(&self, name: &str) -> PathBuf {
        self.workspace.path().join(name)
    }

    fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    fn decrypted(&self, name: &str) -> String {
        let output = self.cmd().arg("decrypt").arg(name).output().unwrap();
        assert!(output.status.success(), "{output:?}");
        String::from_utf8(output.stdout).unwrap()
    }

    fn state(&self) -> serde_json::Value {
        let contents = std::fs::read_to_string(self.config.path().join("sessions.json")).unwrap();
        serde_json::from_str(&contents).unwrap()
    }
}

fn write_executable(path: &Path, contents: &str) {
    std::fs::write(path, contents).unwrap();
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).unwrap();
}

// ============================================================================
// Basic CLI tests
// ============================================================================

#[test]
fn test_help() {
    Command::cargo_bin("sops-shadow")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("decrypted shadow files"))
        .stdout(predicate::str::contains("open"))
        .stdout(predicate::str::contains("save"))
        .stdout(predicate::str::contains("close"))
        .stdout(predicate::str::contains("edit"));
}

#[test]
fn test_version() {
    Command::cargo_bin("sops-shadow")
        .unwrap()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("sops-shadow"));
}

#[test]
fn test_completions() {
    Command::cargo_bin("sops-shadow")
        .unwrap()
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("sops-shadow"));
}

// ============================================================================
// Open / save / close
// ============================================================================

#[test]
#[serial]
fn test_open_prints_shadow_and_records_it() {
    let fixture = Fixture::new();
    fixture.write("secret.yaml", HUNTER2);
    let shadow = fixture.path(".decrypted~secret.yaml");

    fixture
        .cmd()
        .args(["open", "secret.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::ends_with(format!("{}\n", shadow.display())));

    assert_eq!(std::fs::read_to_string(&shadow).unwrap(), "password: hunter2\n");
    let mode = std::fs::metadata(&shadow).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o600);

    let state = fixture.state();
    assert_eq!(state["sessions"][0]["shadow"], shadow.display().to_string());
    assert_eq!(state["sessions"][0]["references"], 1);
}

#[test]
#[serial]
fn test_close_deletes_after_last_reference() {
    let fixture = Fixture::new();
    fixture.write("secret.yaml", HUNTER2);
    let shadow = fixture.path(".decrypted~secret.yaml");

    fixture.cmd().args(["open", "secret.yaml"]).assert().success();
    fixture.cmd().args(["open", "secret.yaml"]).assert().success();
    assert_eq!(fixture.state()["sessions"][0]["references"], 2);

    fixture
        .cmd()
        .args(["close", "secret.yaml"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Still open"));
    assert!(shadow.exists());

    fixture.cmd().args(["close", "secret.yaml"]).assert().success();
    assert!(!shadow.exists());
    assert_eq!(fixture.state()["sessions"].as_array().unwrap().len(), 0);
}

#[test]
#[serial]
fn test_close_untracked_with_force() {
    let fixture = Fixture::new();
    fixture.write("secret.yaml", HUNTER2);
    let shadow = fixture.write(".decrypted~secret.yaml", "password: hunter2\n");

    fixture
        .cmd()
        .args(["close", "secret.yaml"])
        .assert()
        .success()
        .stderr(predicate::str::contains("is not open"));
    assert!(shadow.exists());

    fixture
        .cmd()
        .args(["close", "--force", "secret.yaml"])
        .assert()
        .success();
    assert!(!shadow.exists());
}

#[test]
#[serial]
fn test_save_re_encrypts_original() {
    let fixture = Fixture::new();
    let original = fixture.write("secret.yaml", HUNTER2);
    fixture.cmd().args(["open", "secret.yaml"]).assert().success();
    fixture.write(".decrypted~secret.yaml", "password: changed\n");

    fixture
        .cmd()
        .args(["save", ".decrypted~secret.yaml"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Encrypted changes"));

    assert_ne!(std::fs::read_to_string(&original).unwrap(), HUNTER2);
    assert_eq!(fixture.decrypted("secret.yaml"), "password: changed\n");
}

#[test]
#[serial]
fn test_save_unchanged_shadow() {
    let fixture = Fixture::new();
    let original = fixture.write("secret.yaml", HUNTER2);
    fixture.cmd().args(["open", "secret.yaml"]).assert().success();

    fixture
        .cmd()
        .args(["save", ".decrypted~secret.yaml"])
        .assert()
        .success()
        .stderr(predicate::str::contains("No changes"));
    assert_eq!(std::fs::read_to_string(&original).unwrap(), HUNTER2);
}

#[test]
#[serial]
fn test_save_create_encrypts_plain_file() {
    let fixture = Fixture::new();
    let original = fixture.write("fresh.yaml", "api_key: abc\n");

    fixture
        .cmd()
        .args(["--create", "save", "fresh.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("fresh.yaml"));

    assert!(std::fs::read_to_string(&original).unwrap().contains("sops:"));
    let shadow = fixture.path(".decrypted~fresh.yaml");
    assert_eq!(std::fs::read_to_string(&shadow).unwrap(), "api_key: abc\n");
    assert_eq!(fixture.state()["sessions"][0]["references"], 1);
}

#[test]
#[serial]
fn test_save_create_without_matching_rule() {
    let fixture = Fixture::new();
    let original = fixture.write("plain.yaml", "a: 1\n");

    fixture
        .cmd()
        .args(["--create", "save", "plain.yaml"])
        .assert()
        .success()
        .stderr(predicate::str::contains("No creation rule"));

    assert_eq!(std::fs::read_to_string(&original).unwrap(), "a: 1\n");
}

#[test]
#[serial]
fn test_save_plain_file_without_create_is_noop() {
    let fixture = Fixture::new();
    let original = fixture.write("fresh.yaml", "a: 1\n");

    fixture
        .cmd()
        .args(["save", "fresh.yaml"])
        .assert()
        .success()
        .stderr(predicate::str::contains("Nothing to do"));
    assert_eq!(std::fs::read_to_string(&original).unwrap(), "a: 1\n");
}

// ============================================================================
// Edit
// ============================================================================

#[test]
#[serial]
fn test_edit_round_trip_cleans_up() {
    let fixture = Fixture::new();
    fixture.write("secret.yaml", HUNTER2);
    let editor = fixture.bin.path().join("editor");
    write_executable(&editor, "#!/bin/sh\nprintf 'password: edited\\n' > \"$1\"\n");

    fixture
        .cmd()
        .args(["edit", "secret.yaml", "--editor"])
        .arg(&editor)
        .assert()
        .success();

    assert!(!fixture.path(".decrypted~secret.yaml").exists());
    assert_eq!(fixture.decrypted("secret.yaml"), "password: edited\n");
}

#[test]
#[serial]
fn test_edit_keeps_shadow_held_by_open() {
    let fixture = Fixture::new();
    fixture.write("secret.yaml", HUNTER2);
    let shadow = fixture.path(".decrypted~secret.yaml");
    let editor = fixture.bin.path().join("editor");
    write_executable(&editor, "#!/bin/sh\nprintf 'password: edited\\n' > \"$1\"\n");

    fixture.cmd().args(["open", "secret.yaml"]).assert().success();
    fixture
        .cmd()
        .args(["edit", "secret.yaml", "--editor"])
        .arg(&editor)
        .assert()
        .success();

    assert!(shadow.exists());
    assert_eq!(fixture.state()["sessions"][0]["references"], 1);
    assert_eq!(fixture.decrypted("secret.yaml"), "password: edited\n");

    fixture.cmd().args(["close", "secret.yaml"]).assert().success();
    assert!(!shadow.exists());
}

#[test]
#[serial]
fn test_edit_failing_editor_keeps_original() {
    let fixture = Fixture::new();
    let original = fixture.write("secret.yaml", HUNTER2);

    fixture
        .cmd()
        .args(["edit", "secret.yaml", "--editor", "false"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not encrypted"));

    assert!(!fixture.path(".decrypted~secret.yaml").exists());
    assert_eq!(std::fs::read_to_string(&original).unwrap(), HUNTER2);
}

// ============================================================================
// Read-only commands
// ============================================================================

#[test]
#[serial]
fn test_decrypt_prints_plaintext() {
    let fixture = Fixture::new();
    fixture.write("token.yaml", TOKEN_ONE);

    fixture
        .cmd()
        .args(["decrypt", "token.yaml"])
        .assert()
        .success()
        .stdout("token: one\n");
    assert!(!fixture.path(".decrypted~token.yaml").exists());
}

#[test]
#[serial]
fn test_plain_file_is_usage_error() {
    let fixture = Fixture::new();
    fixture.write("config.yaml", "a: 1\n");

    fixture
        .cmd()
        .args(["decrypt", "config.yaml"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("not a SOPS-encrypted file"));

    fixture
        .cmd()
        .args(["open", "config.yaml"])
        .assert()
        .code(2);
}

#[test]
#[serial]
fn test_unsupported_extension_is_usage_error() {
    let fixture = Fixture::new();
    fixture.write("notes.txt", "hello\n");

    fixture
        .cmd()
        .args(["open", "notes.txt"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("unsupported file type"));
}

#[test]
#[serial]
fn test_quiet_suppresses_error_output() {
    let fixture = Fixture::new();
    fixture.write("config.yaml", "a: 1\n");

    fixture
        .cmd()
        .args(["-q", "decrypt", "config.yaml"])
        .assert()
        .code(2)
        .stderr(predicate::str::is_empty());
}

#[test]
#[serial]
fn test_toggle() {
    let fixture = Fixture::new();
    let original = fixture.write("secret.yaml", HUNTER2);

    fixture
        .cmd()
        .args(["toggle", "secret.yaml"])
        .assert()
        .code(7);

    fixture.cmd().args(["open", "secret.yaml"]).assert().success();
    let shadow = fixture.path(".decrypted~secret.yaml");

    fixture
        .cmd()
        .args(["toggle", "secret.yaml"])
        .assert()
        .success()
        .stdout(format!("{}\n", shadow.display()));
    fixture
        .cmd()
        .args(["toggle", ".decrypted~secret.yaml"])
        .assert()
        .success()
        .stdout(format!("{}\n", original.display()));
}

#[test]
#[serial]
fn test_status_json() {
    let fixture = Fixture::new();
    fixture.write("secret.yaml", HUNTER2);
    fixture.cmd().args(["open", "secret.yaml"]).assert().success();

    let output = fixture
        .cmd()
        .args(["status", "secret.yaml", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{output:?}");

    let status: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(status["format"], "yaml");
    assert_eq!(status["encrypted"], true);
    assert_eq!(status["shadow_exists"], true);
    assert_eq!(status["pending"]["state"], "in_sync");
    assert_eq!(status["pending"]["decision"], "no_op");
    assert_eq!(status["original_fingerprint"], status["shadow_fingerprint"]);
    assert_eq!(status["tracked"]["references"], 1);
}

#[test]
#[serial]
fn test_status_table() {
    let fixture = Fixture::new();
    fixture.write("secret.yaml", HUNTER2);

    fixture
        .cmd()
        .args(["status", "secret.yaml"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Encrypted"))
        .stdout(predicate::str::contains("yes"));
}

#[test]
#[serial]
fn test_cleanup_deletes_all_recorded_shadows() {
    let fixture = Fixture::new();
    fixture.write("a.yaml", HUNTER2);
    fixture.write("b.yml", TOKEN_ONE);
    fixture.cmd().args(["open", "a.yaml"]).assert().success();
    fixture.cmd().args(["open", "b.yml"]).assert().success();

    fixture
        .cmd()
        .arg("cleanup")
        .assert()
        .success()
        .stdout(predicate::str::contains("deleted"));

    assert!(!fixture.path(".decrypted~a.yaml").exists());
    assert!(!fixture.path(".decrypted~b.yml").exists());
    assert_eq!(fixture.state()["sessions"].as_array().unwrap().len(), 0);

    fixture
        .cmd()
        .arg("cleanup")
        .assert()
        .success()
        .stderr(predicate::str::contains("No open shadows"));
}

#[test]
#[serial]
fn test_info_json_reports_engine() {
    let fixture = Fixture::new();
    std::fs::write(
        fixture.config.path().join("config.toml"),
        "engine_timeout = \"30s\"\n[associations]\n\"*.conf\" = \"ini\"\n",
    )
    .unwrap();

    let output = fixture.cmd().args(["info", "--json"]).output().unwrap();
    assert!(output.status.success(), "{output:?}");

    let info: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        info["engine_binary"],
        fixture.bin.path().join("sops").display().to_string()
    );
    assert_eq!(info["settings_file_exists"], true);
    assert_eq!(info["engine_timeout"], "30s");
    assert_eq!(info["associations"]["*.conf"], "ini");
}

#[test]
#[serial]
fn test_engine_failure_exit_code() {
    let fixture = Fixture::with_engine(FAILING_SOPS);
    fixture.write("secret.yaml", HUNTER2);

    fixture
        .cmd()
        .args(["open", "secret.yaml"])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("data key"));
    assert!(!fixture.path(".decrypted~secret.yaml").exists());
}
