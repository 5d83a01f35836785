use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

const CLEARED: [&str; 12] = [
    "CLUSTERDIFF_CONFIG",
    "CLUSTERDIFF_SOURCE",
    "CLUSTERDIFF_DESTINATION",
    "CLUSTERDIFF_SOURCE_SNAPSHOT",
    "CLUSTERDIFF_DESTINATION_SNAPSHOT",
    "CLUSTERDIFF_DATABASES",
    "CLUSTERDIFF_TABLES",
    "CLUSTERDIFF_THRESHOLD",
    "CLUSTERDIFF_SOURCE_PASSWORD",
    "CLUSTERDIFF_DESTINATION_PASSWORD",
    "RUST_LOG",
    "XDG_CONFIG_HOME",
];

/// A command isolated from the caller's environment and config files.
pub fn clusterdiff(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("clusterdiff");
    for key in CLEARED {
        cmd.env_remove(key);
    }
    cmd.current_dir(dir.path())
        .env("HOME", dir.path())
        .env("XDG_CONFIG_HOME", dir.path().join(".config"))
        .env("NO_COLOR", "1");
    cmd
}

pub fn stdout_json(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.assert().success().get_output().stdout.clone();
    serde_json::from_slice(&output).expect("json")
}

pub fn stderr_json(cmd: &mut Command) -> serde_json::Value {
    let output = cmd.assert().code(1).get_output().stderr.clone();
    let text = String::from_utf8_lossy(&output);
    let start = text.find('{').expect("json on stderr");
    serde_json::from_str(&text[start..]).expect("json")
}
