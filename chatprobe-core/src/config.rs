use serde::{Deserialize, Serialize};
use secrecy::SecretString;
use std::{fs, path::Path, time::Duration};

use crate::error::{CoreResult, ProbeError};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TargetCfg {
    /// Base URL of the relay, without the `/v1/chat/completions` suffix.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Name of the environment variable that contains the bearer token.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for TargetCfg {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            model: default_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_endpoint() -> String {
    "http://localhost:3000".into()
}
fn default_model() -> String {
    "claude-3-5-sonnet-latest".into()
}
fn default_api_key_env() -> String {
    "CHATPROBE_API_KEY".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct HttpCfg {
    /// TCP connect timeout in milliseconds (default 5000ms)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Total request timeout in milliseconds (default 30000ms)
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for HttpCfg {
    fn default() -> Self {
        Self {
            connect_timeout_ms: default_connect_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct StreamingCheckCfg {
    #[serde(default = "default_stream_prompt")]
    pub prompt: String,
    #[serde(default = "default_stream_max_tokens")]
    pub max_tokens: u32,
}

impl Default for StreamingCheckCfg {
    fn default() -> Self {
        Self {
            prompt: default_stream_prompt(),
            max_tokens: default_stream_max_tokens(),
        }
    }
}

fn default_stream_prompt() -> String {
    "Briefly introduce artificial intelligence.".into()
}
fn default_stream_max_tokens() -> u32 {
    500
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct NonStreamingCheckCfg {
    #[serde(default = "default_plain_prompt")]
    pub prompt: String,
    #[serde(default = "default_plain_max_tokens")]
    pub max_tokens: u32,
    /// The reply must contain this text for the check to pass.
    /// Only meaningful together with the prompt above.
    #[serde(default = "default_expect_substring")]
    pub expect_substring: String,
}

impl Default for NonStreamingCheckCfg {
    fn default() -> Self {
        Self {
            prompt: default_plain_prompt(),
            max_tokens: default_plain_max_tokens(),
            expect_substring: default_expect_substring(),
        }
    }
}

fn default_plain_prompt() -> String {
    "Describe the Python programming language in one sentence.".into()
}
fn default_plain_max_tokens() -> u32 {
    200
}
fn default_expect_substring() -> String {
    "Python".into()
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct ChecksCfg {
    #[serde(default)]
    pub streaming: StreamingCheckCfg,
    #[serde(default)]
    pub non_streaming: NonStreamingCheckCfg,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Config {
    #[serde(default)]
    pub target: TargetCfg,
    /// HTTP client configuration (timeouts). Missing → defaults.
    #[serde(default)]
    pub http: HttpCfg,
    #[serde(default)]
    pub checks: ChecksCfg,
}

/// Everything needed to talk to one endpoint with one model.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub endpoint: String,
    pub credential: SecretString,
    pub model: String,
    pub timeout: Duration,
}

impl Config {
    /// Load a Config from a file path (JSON or TOML by extension). If the
    /// extension is missing or unrecognized, try JSON first, then TOML.
    pub fn from_path<P: AsRef<Path>>(path: P) -> CoreResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(ProbeError::from)?;
        let s = std::str::from_utf8(&bytes).map_err(|e| ProbeError::Other(e.into()))?;
        let cfg: Self = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => {
                serde_json::from_str::<Self>(s).map_err(|e| ProbeError::Other(e.into()))?
            }
            Some("toml") => toml::from_str::<Self>(s).map_err(|e| ProbeError::Other(e.into()))?,
            _ => serde_json::from_str::<Self>(s)
                .map_err(|e| ProbeError::Other(e.into()))
                .or_else(|_| toml::from_str::<Self>(s).map_err(|e| ProbeError::Other(e.into())))?,
        };
        Ok(cfg)
    }

    /// Resolve the target, reading the credential from the process environment.
    pub fn target(&self) -> CoreResult<ProbeTarget> {
        self.target_with(|name| std::env::var(name).ok())
    }

    /// Resolve the target with a caller-supplied variable lookup.
    pub fn target_with<F>(&self, lookup: F) -> CoreResult<ProbeTarget>
    where
        F: Fn(&str) -> Option<String>,
    {
        let endpoint = self.target.endpoint.trim_end_matches('/');
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ProbeError::Validation(format!(
                "endpoint must be an http(s) URL, got '{}'",
                self.target.endpoint
            )));
        }
        if self.target.model.trim().is_empty() {
            return Err(ProbeError::Validation("model must not be empty".into()));
        }
        let key = lookup(&self.target.api_key_env)
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                ProbeError::Validation(format!(
                    "credential variable {} is not set",
                    self.target.api_key_env
                ))
            })?;
        Ok(ProbeTarget {
            endpoint: endpoint.to_string(),
            credential: SecretString::new(key.into()),
            model: self.target.model.clone(),
            timeout: Duration::from_millis(self.http.request_timeout_ms),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::fs;
    use tempfile::tempdir;

    fn env_with_key(name: &str) -> Option<String> {
        (name == "CHATPROBE_API_KEY").then(|| "sk-test".to_string())
    }

    #[test]
    fn load_from_json() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("probe.json");
        let json = r#"{
          "target": {"endpoint":"http://relay.local:8080/","model":"gpt-4o"},
          "checks": {
            "non_streaming": {"prompt":"Name a Rust web framework","expect_substring":"axum"}
          }
        }"#;
        fs::write(&file, json).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.target.model, "gpt-4o");
        assert_eq!(cfg.target.api_key_env, "CHATPROBE_API_KEY");
        assert_eq!(cfg.checks.non_streaming.expect_substring, "axum");
        assert_eq!(cfg.checks.non_streaming.max_tokens, 200);
        assert_eq!(cfg.checks.streaming.max_tokens, 500);
        assert_eq!(cfg.http.connect_timeout_ms, 5_000);
        assert_eq!(cfg.http.request_timeout_ms, 30_000);
    }

    #[test]
    fn missing_file_returns_io_error() {
        let missing = std::path::PathBuf::from("/definitely/not/here/chatprobe-missing.json");
        let err = Config::from_path(&missing).unwrap_err();
        match err {
            ProbeError::Io(_) => {}
            other => panic!("expected Io error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_utf8_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.bin");
        fs::write(&file, vec![0xff, 0xfe, 0xfd, 0x00, 0x80]).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            ProbeError::Other(_) => {}
            other => panic!("expected Other(utf8) error, got: {:?}", other),
        }
    }

    #[test]
    fn bad_json_returns_other_error() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("bad.json");
        let json = r#"{ "target": { "model": 123 }"#;
        fs::write(&file, json).unwrap();
        let err = Config::from_path(&file).unwrap_err();
        match err {
            ProbeError::Other(_) => {}
            other => panic!("expected Other(json parse) error, got: {:?}", other),
        }
    }

    #[test]
    fn load_from_toml() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("probe.toml");
        let toml = r#"
[target]
endpoint = "https://relay.example.com"
api_key_env = "RELAY_KEY"

[http]
request_timeout_ms = 10000

[checks.streaming]
prompt = "Count to five"
max_tokens = 64
"#;
        fs::write(&file, toml).unwrap();
        let cfg = Config::from_path(&file).unwrap();
        assert_eq!(cfg.target.endpoint, "https://relay.example.com");
        assert_eq!(cfg.target.model, "claude-3-5-sonnet-latest");
        assert_eq!(cfg.target.api_key_env, "RELAY_KEY");
        assert_eq!(cfg.http.request_timeout_ms, 10_000);
        assert_eq!(cfg.http.connect_timeout_ms, 5_000);
        assert_eq!(cfg.checks.streaming.prompt, "Count to five");
        assert_eq!(cfg.checks.streaming.max_tokens, 64);
    }

    #[test]
    fn unknown_extension_falls_back_to_json_then_toml() {
        let dir = tempdir().unwrap();
        let json_path = dir.path().join("probe.conf");
        fs::write(&json_path, r#"{"target":{"model":"m-json"}}"#).unwrap();
        let cfg = Config::from_path(&json_path).unwrap();
        assert_eq!(cfg.target.model, "m-json");

        let toml_path = dir.path().join("probe2.conf");
        fs::write(&toml_path, "[target]\nmodel = \"m-toml\"\n").unwrap();
        let cfg = Config::from_path(&toml_path).unwrap();
        assert_eq!(cfg.target.model, "m-toml");
        assert_eq!(cfg.http.request_timeout_ms, 30_000);
    }

    #[test]
    fn target_trims_endpoint_and_reads_credential() {
        let mut cfg = Config::default();
        cfg.target.endpoint = "http://localhost:3000/".into();
        let target = cfg.target_with(env_with_key).unwrap();
        assert_eq!(target.endpoint, "http://localhost:3000");
        assert_eq!(target.credential.expose_secret(), "sk-test");
        assert_eq!(target.model, "claude-3-5-sonnet-latest");
        assert_eq!(target.timeout, Duration::from_secs(30));
    }

    #[test]
    fn target_without_credential_is_validation_error() {
        let cfg = Config::default();
        let err = cfg.target_with(|_| None).unwrap_err();
        assert!(matches!(err, ProbeError::Validation(m) if m.contains("CHATPROBE_API_KEY")));
    }

    #[test]
    fn target_rejects_non_http_endpoint() {
        let mut cfg = Config::default();
        cfg.target.endpoint = "localhost:3000".into();
        let err = cfg.target_with(env_with_key).unwrap_err();
        assert!(matches!(err, ProbeError::Validation(_)));
    }
}
