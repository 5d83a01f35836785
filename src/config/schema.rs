use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigFile {
    pub source: Option<InstanceConfig>,
    pub destination: Option<InstanceConfig>,
    pub databases: Option<Vec<String>>,
    pub tables: Option<Vec<String>>,
    pub ignore_tables: Option<Vec<String>>,
    pub threshold: Option<u64>,
    pub compare: Option<Vec<String>>,
    pub count_method: Option<String>,
    pub concurrency: Option<ConcurrencyConfig>,
    pub pool: Option<PoolConfig>,
    pub query_timeout_seconds: Option<u64>,
    pub max_retries: Option<i64>,
    pub retry_backoff_ms: Option<u64>,
    pub output: Option<OutputSettings>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct InstanceConfig {
    pub instance: Option<String>,
    /// Variable holding the password, used when `instance` carries none.
    pub password_env: Option<String>,
    pub snapshot_ts: Option<Scalar>,
}

/// A value written either as a bare number or a quoted string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(u64),
    Text(String),
}

impl Scalar {
    pub fn to_text(&self) -> String {
        match self {
            Scalar::Number(n) => n.to_string(),
            Scalar::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConcurrencyConfig {
    pub databases: Option<i64>,
    pub tables: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PoolConfig {
    pub max_open_conns: Option<usize>,
    pub max_idle_conns: Option<usize>,
    pub conn_max_lifetime_minutes: Option<u64>,
    pub acquire_timeout_seconds: Option<u64>,
    pub close_timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OutputSettings {
    pub default_format: Option<OutputFormat>,
    pub json: Option<JsonSettings>,
    pub csv: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct JsonSettings {
    pub pretty: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Pretty,
    Markdown,
    Json,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Pretty => "pretty",
            OutputFormat::Markdown => "markdown",
            OutputFormat::Json => "json",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_accepts_number_or_string() {
        let file: ConfigFile = serde_yaml::from_str(
            "source: { instance: \"mysql://a@h\", snapshotTs: 449123456789 }\n\
             destination: { instance: \"mysql://a@h\", snapshotTs: \"42\" }\n",
        )
        .expect("parse");
        let src = file.source.and_then(|s| s.snapshot_ts).expect("source ts");
        let dst = file.destination.and_then(|s| s.snapshot_ts).expect("dest ts");
        assert_eq!(src.to_text(), "449123456789");
        assert_eq!(dst, Scalar::Text("42".into()));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let parsed: Result<ConfigFile, _> = serde_yaml::from_str("treshold: 3\n");
        assert!(parsed.is_err());
    }
}
