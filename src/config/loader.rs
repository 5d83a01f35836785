use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::env::{Env, split_list};
use super::schema::{ConfigFile, InstanceConfig, OutputFormat, OutputSettings};
use crate::error::AppError;

pub const ENV_CONFIG: &str = "CLUSTERDIFF_CONFIG";
pub const ENV_SOURCE: &str = "CLUSTERDIFF_SOURCE";
pub const ENV_DESTINATION: &str = "CLUSTERDIFF_DESTINATION";
pub const ENV_SOURCE_SNAPSHOT: &str = "CLUSTERDIFF_SOURCE_SNAPSHOT";
pub const ENV_DESTINATION_SNAPSHOT: &str = "CLUSTERDIFF_DESTINATION_SNAPSHOT";
pub const ENV_DATABASES: &str = "CLUSTERDIFF_DATABASES";
pub const ENV_TABLES: &str = "CLUSTERDIFF_TABLES";
pub const ENV_THRESHOLD: &str = "CLUSTERDIFF_THRESHOLD";

const CONFIG_DIR: &str = ".clusterdiff";
const CONFIG_NAMES: [&str; 3] = ["config.yaml", "config.yml", "config.json"];

/// Values taken from `diff`/`config` flags. Empty lists mean "not given".
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub config_path: Option<PathBuf>,
    pub env_file: Option<PathBuf>,
    pub source: Option<String>,
    pub destination: Option<String>,
    pub source_snapshot: Option<String>,
    pub destination_snapshot: Option<String>,
    pub databases: Vec<String>,
    pub tables: Vec<String>,
    pub ignore_tables: Vec<String>,
    pub threshold: Option<u64>,
    pub compare: Vec<String>,
    pub count_method: Option<String>,
    pub db_concurrency: Option<i64>,
    pub table_concurrency: Option<i64>,
    pub max_retries: Option<i64>,
    pub query_timeout_seconds: Option<u64>,
    pub csv: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoadOptions {
    pub cli: CliOverrides,
    pub cwd: PathBuf,
    pub home_dir: Option<PathBuf>,
    pub xdg_config_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub config_path: Option<PathBuf>,
    pub job: JobSettings,
    pub output: OutputSettingsResolved,
}

/// Unvalidated job settings after all layers have been applied.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobSettings {
    pub source: Option<String>,
    pub source_password: Option<String>,
    pub destination: Option<String>,
    pub destination_password: Option<String>,
    pub source_snapshot: Option<String>,
    pub destination_snapshot: Option<String>,
    pub databases: Option<Vec<String>>,
    pub tables: Option<Vec<String>>,
    pub ignore_tables: Vec<String>,
    pub threshold: u64,
    pub compare: Vec<String>,
    pub count_method: Option<String>,
    pub db_concurrency: Option<i64>,
    pub table_concurrency: Option<i64>,
    pub max_open_conns: Option<usize>,
    pub max_idle_conns: Option<usize>,
    pub conn_max_lifetime_minutes: Option<u64>,
    pub acquire_timeout_seconds: Option<u64>,
    pub close_timeout_seconds: Option<u64>,
    pub query_timeout_seconds: Option<u64>,
    pub max_retries: Option<i64>,
    pub retry_backoff_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct OutputSettingsResolved {
    pub default_format: OutputFormat,
    pub json_pretty: bool,
    pub csv: Option<String>,
}

impl Default for OutputSettingsResolved {
    fn default() -> Self {
        Self {
            default_format: OutputFormat::Pretty,
            json_pretty: true,
            csv: None,
        }
    }
}

pub fn load_config(options: &LoadOptions, env: &Env) -> Result<ResolvedConfig> {
    let config_path = resolve_config_path(options, env)?;
    let config_file = match &config_path {
        Some(path) => load_config_file(path)?,
        None => ConfigFile::default(),
    };

    let mut job = JobSettings::default();
    let mut output = OutputSettingsResolved::default();

    apply_file(&mut job, &config_file, env)?;
    if let Some(settings) = &config_file.output {
        apply_output_settings(&mut output, settings);
    }
    apply_env_overrides(&mut job, env)?;
    apply_cli_overrides(&mut job, &mut output, &options.cli)?;

    Ok(ResolvedConfig {
        config_path,
        job,
        output,
    })
}

fn resolve_config_path(options: &LoadOptions, env: &Env) -> Result<Option<PathBuf>> {
    if let Some(path) = &options.cli.config_path {
        if !path.exists() {
            return Err(
                AppError::config(format!("Config file not found: {}", path.display())).into(),
            );
        }
        return Ok(Some(path.clone()));
    }

    if let Some(path) = env.get(ENV_CONFIG) {
        let path = PathBuf::from(path);
        if !path.exists() {
            return Err(
                AppError::config(format!("Config file not found: {}", path.display())).into(),
            );
        }
        return Ok(Some(path));
    }

    if let Some(path) = find_local_config(&options.cwd, options.home_dir.as_deref()) {
        return Ok(Some(path));
    }

    Ok(find_global_config(options.xdg_config_dir.as_deref()))
}

fn find_local_config(start: &Path, home: Option<&Path>) -> Option<PathBuf> {
    for dir in start.ancestors() {
        for name in CONFIG_NAMES {
            let path = dir.join(CONFIG_DIR).join(name);
            if path.is_file() {
                return Some(path);
            }
        }

        if home.is_some_and(|home_dir| dir == home_dir) {
            break;
        }
    }

    None
}

fn find_global_config(xdg_config: Option<&Path>) -> Option<PathBuf> {
    let base = xdg_config?.join("clusterdiff");
    CONFIG_NAMES
        .iter()
        .map(|name| base.join(name))
        .find(|path| path.is_file())
}

fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let parsed = match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml") | Some("yml") => serde_yaml::from_str(&content).map_err(|err| err.to_string()),
        Some("json") => serde_json::from_str(&content).map_err(|err| err.to_string()),
        _ => Err("unsupported extension (expected .yaml, .yml or .json)".to_string()),
    };
    parsed.map_err(|err| {
        AppError::config(format!("Invalid config file {}: {}", path.display(), err)).into()
    })
}

fn apply_file(job: &mut JobSettings, file: &ConfigFile, env: &Env) -> Result<()> {
    if let Some(source) = &file.source {
        apply_instance(
            &mut job.source,
            &mut job.source_password,
            &mut job.source_snapshot,
            source,
            env,
        );
    }
    if let Some(destination) = &file.destination {
        apply_instance(
            &mut job.destination,
            &mut job.destination_password,
            &mut job.destination_snapshot,
            destination,
            env,
        );
    }
    set_selection(
        job,
        file.databases.as_deref().unwrap_or_default(),
        file.tables.as_deref().unwrap_or_default(),
        "config file",
    )?;
    if let Some(ignore) = &file.ignore_tables {
        job.ignore_tables = ignore.clone();
    }
    if let Some(threshold) = file.threshold {
        job.threshold = threshold;
    }
    if let Some(compare) = &file.compare {
        job.compare = compare.clone();
    }
    if let Some(method) = &file.count_method {
        job.count_method = Some(method.clone());
    }
    if let Some(concurrency) = &file.concurrency {
        job.db_concurrency = concurrency.databases.or(job.db_concurrency);
        job.table_concurrency = concurrency.tables.or(job.table_concurrency);
    }
    if let Some(pool) = &file.pool {
        job.max_open_conns = pool.max_open_conns;
        job.max_idle_conns = pool.max_idle_conns;
        job.conn_max_lifetime_minutes = pool.conn_max_lifetime_minutes;
        job.acquire_timeout_seconds = pool.acquire_timeout_seconds;
        job.close_timeout_seconds = pool.close_timeout_seconds;
    }
    job.query_timeout_seconds = file.query_timeout_seconds.or(job.query_timeout_seconds);
    job.max_retries = file.max_retries.or(job.max_retries);
    job.retry_backoff_ms = file.retry_backoff_ms.or(job.retry_backoff_ms);
    Ok(())
}

fn apply_instance(
    instance: &mut Option<String>,
    password: &mut Option<String>,
    snapshot: &mut Option<String>,
    config: &InstanceConfig,
    env: &Env,
) {
    if let Some(value) = &config.instance {
        *instance = Some(value.clone());
    }
    if let Some(key) = &config.password_env {
        if let Some(value) = env.get(key) {
            *password = Some(value);
        }
    }
    if let Some(ts) = &config.snapshot_ts {
        *snapshot = Some(ts.to_text());
    }
}

fn apply_output_settings(settings: &mut OutputSettingsResolved, overrides: &OutputSettings) {
    if let Some(default_format) = overrides.default_format {
        settings.default_format = default_format;
    }
    if let Some(pretty) = overrides.json.as_ref().and_then(|json| json.pretty) {
        settings.json_pretty = pretty;
    }
    if let Some(csv) = &overrides.csv {
        settings.csv = Some(csv.clone());
    }
}

fn apply_env_overrides(job: &mut JobSettings, env: &Env) -> Result<()> {
    if let Some(source) = env.get(ENV_SOURCE) {
        job.source = Some(source);
    }
    if let Some(destination) = env.get(ENV_DESTINATION) {
        job.destination = Some(destination);
    }
    if let Some(snapshot) = env.get(ENV_SOURCE_SNAPSHOT) {
        job.source_snapshot = Some(snapshot);
    }
    if let Some(snapshot) = env.get(ENV_DESTINATION_SNAPSHOT) {
        job.destination_snapshot = Some(snapshot);
    }
    let databases = env.get(ENV_DATABASES).map(|v| split_list(&v)).unwrap_or_default();
    let tables = env.get(ENV_TABLES).map(|v| split_list(&v)).unwrap_or_default();
    set_selection(job, &databases, &tables, "environment")?;
    if let Some(threshold) = env.get(ENV_THRESHOLD) {
        job.threshold = threshold.trim().parse::<u64>().map_err(|_| {
            AppError::config(format!(
                "{} must be a non-negative integer, got '{}'",
                ENV_THRESHOLD, threshold
            ))
        })?;
    }
    Ok(())
}

fn apply_cli_overrides(
    job: &mut JobSettings,
    output: &mut OutputSettingsResolved,
    cli: &CliOverrides,
) -> Result<()> {
    if let Some(source) = &cli.source {
        job.source = Some(source.clone());
    }
    if let Some(destination) = &cli.destination {
        job.destination = Some(destination.clone());
    }
    if let Some(snapshot) = &cli.source_snapshot {
        job.source_snapshot = Some(snapshot.clone());
    }
    if let Some(snapshot) = &cli.destination_snapshot {
        job.destination_snapshot = Some(snapshot.clone());
    }
    set_selection(job, &cli.databases, &cli.tables, "command line")?;
    if !cli.ignore_tables.is_empty() {
        job.ignore_tables = cli.ignore_tables.clone();
    }
    if let Some(threshold) = cli.threshold {
        job.threshold = threshold;
    }
    if !cli.compare.is_empty() {
        job.compare = cli.compare.clone();
    }
    if let Some(method) = &cli.count_method {
        job.count_method = Some(method.clone());
    }
    job.db_concurrency = cli.db_concurrency.or(job.db_concurrency);
    job.table_concurrency = cli.table_concurrency.or(job.table_concurrency);
    job.max_retries = cli.max_retries.or(job.max_retries);
    job.query_timeout_seconds = cli.query_timeout_seconds.or(job.query_timeout_seconds);
    if let Some(csv) = &cli.csv {
        output.csv = Some(csv.clone());
    }
    Ok(())
}

/// A layer naming either databases or tables replaces whatever selection a
/// lower layer made. Naming both in one layer is an error.
fn set_selection(
    job: &mut JobSettings,
    databases: &[String],
    tables: &[String],
    layer: &str,
) -> Result<()> {
    let databases = normalize_list(databases);
    let tables = normalize_list(tables);
    match (databases.is_empty(), tables.is_empty()) {
        (false, false) => Err(AppError::config(format!(
            "Both databases and tables are set in the {}; choose one",
            layer
        ))
        .into()),
        (false, true) => {
            job.databases = Some(databases);
            job.tables = None;
            Ok(())
        }
        (true, false) => {
            job.tables = Some(tables);
            job.databases = None;
            Ok(())
        }
        (true, true) => Ok(()),
    }
}

fn normalize_list(items: &[String]) -> Vec<String> {
    items.iter().flat_map(|item| split_list(item)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, classify_error};
    use tempfile::TempDir;

    fn options(cwd: &Path, cli: CliOverrides) -> LoadOptions {
        LoadOptions {
            cli,
            cwd: cwd.to_path_buf(),
            home_dir: None,
            xdg_config_dir: None,
        }
    }

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("config.yaml");
        fs::write(&path, body).expect("write config");
        path
    }

    #[test]
    fn loads_config_from_cli_path() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_config(
            dir.path(),
            "source: { instance: \"mysql://root@src:4000\", snapshotTs: 42 }\n\
             destination: { instance: \"mysql://root@dst:4000\" }\n\
             databases: [\"app_%\"]\nthreshold: 5\nconcurrency: { tables: 8 }\n",
        );
        let cli = CliOverrides {
            config_path: Some(path),
            ..CliOverrides::default()
        };
        let resolved = load_config(&options(dir.path(), cli), &Env::default()).expect("load");
        assert_eq!(resolved.job.source.as_deref(), Some("mysql://root@src:4000"));
        assert_eq!(resolved.job.source_snapshot.as_deref(), Some("42"));
        assert_eq!(resolved.job.databases, Some(vec!["app_%".to_string()]));
        assert_eq!(resolved.job.threshold, 5);
        assert_eq!(resolved.job.table_concurrency, Some(8));
        assert_eq!(resolved.job.db_concurrency, None);
    }

    #[test]
    fn finds_config_walking_up_from_cwd() {
        let root = TempDir::new().expect("temp dir");
        fs::create_dir_all(root.path().join(".clusterdiff")).expect("mkdir");
        fs::write(
            root.path().join(".clusterdiff/config.json"),
            r#"{"destination": {"instance": "mysql://u@found"}}"#,
        )
        .expect("write");
        let nested = root.path().join("a/b");
        fs::create_dir_all(&nested).expect("mkdir");

        let resolved =
            load_config(&options(&nested, CliOverrides::default()), &Env::default()).expect("load");
        assert_eq!(resolved.job.destination.as_deref(), Some("mysql://u@found"));
    }

    #[test]
    fn precedence_is_file_then_env_then_cli() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_config(
            dir.path(),
            "source: { instance: \"mysql://root@file\" }\nthreshold: 1\ndatabases: [db_%]\n",
        );
        let env = Env::from_pairs(&[
            (ENV_SOURCE, "mysql://root@env"),
            (ENV_THRESHOLD, "2"),
            (ENV_TABLES, "db1.t1, db1.t2"),
        ]);
        let cli = CliOverrides {
            config_path: Some(path),
            threshold: Some(3),
            ..CliOverrides::default()
        };
        let resolved = load_config(&options(dir.path(), cli), &env).expect("load");
        assert_eq!(resolved.job.source.as_deref(), Some("mysql://root@env"));
        assert_eq!(resolved.job.threshold, 3);
        assert_eq!(resolved.job.databases, None);
        assert_eq!(
            resolved.job.tables,
            Some(vec!["db1.t1".to_string(), "db1.t2".to_string()])
        );
    }

    #[test]
    fn both_selections_in_one_layer_is_an_error() {
        let dir = TempDir::new().expect("temp dir");
        let cli = CliOverrides {
            databases: vec!["a".into()],
            tables: vec!["a.t".into()],
            ..CliOverrides::default()
        };
        let err = load_config(&options(dir.path(), cli), &Env::default()).unwrap_err();
        assert_eq!(classify_error(&err), ErrorKind::Config);
    }

    #[test]
    fn password_env_is_used() {
        let dir = TempDir::new().expect("temp dir");
        let path = write_config(
            dir.path(),
            "source: { instance: \"mysql://root@h\", passwordEnv: SRC_PASS }\n",
        );
        let cli = CliOverrides {
            config_path: Some(path),
            ..CliOverrides::default()
        };
        let env = Env::from_pairs(&[("SRC_PASS", "secret")]);
        let resolved = load_config(&options(dir.path(), cli), &env).expect("load");
        assert_eq!(resolved.job.source_password.as_deref(), Some("secret"));
    }

    #[test]
    fn bad_threshold_in_env_is_a_config_error() {
        let dir = TempDir::new().expect("temp dir");
        let env = Env::from_pairs(&[(ENV_THRESHOLD, "-1")]);
        let err = load_config(&options(dir.path(), CliOverrides::default()), &env).unwrap_err();
        assert_eq!(classify_error(&err), ErrorKind::Config);
    }

    #[test]
    fn missing_explicit_config_is_an_error() {
        let dir = TempDir::new().expect("temp dir");
        let cli = CliOverrides {
            config_path: Some(dir.path().join("nope.yaml")),
            ..CliOverrides::default()
        };
        assert!(load_config(&options(dir.path(), cli), &Env::default()).is_err());
    }
}
