//! Service configuration for FlowLLM.
//!
//! One TOML tree describes the whole service: which backend to start, the
//! worker-pool size, per-transport listen addresses, the flow table, and the
//! named LLM / embedding / vector-store resources. The CLI applies dotted
//! `key=value` overrides on the parsed tree before deserialization, so any
//! field can be flipped from the command line without editing the file.
//!
//! Unknown keys are ignored; the config is frozen after service startup.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Default worker-pool size when `thread_pool_max_workers` is absent.
pub const DEFAULT_THREAD_POOL_MAX_WORKERS: usize = 128;

/// Default per-request deadline in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 600_000;

/// Default capacity of a stream outbox (chunks buffered before `emit` blocks).
pub const DEFAULT_STREAM_OUTBOX_CAPACITY: usize = 128;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("read config {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("override `{0}` is not of the form key=value")]
    MalformedOverride(String),
    #[error("override path `{0}` walks through a non-table value")]
    OverridePath(String),
}

/// Which service front-end to start.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// HTTP JSON + SSE service.
    #[default]
    Http,
    /// MCP SSE service.
    Mcp,
    /// One-shot command-line runner.
    Cmd,
}

impl std::str::FromStr for Backend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http" => Ok(Backend::Http),
            "mcp" => Ok(Backend::Mcp),
            "cmd" => Ok(Backend::Cmd),
            other => Err(format!("unknown backend: {other} (use http, mcp, or cmd)")),
        }
    }
}

/// HTTP listen address.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
        }
    }
}

/// MCP listen address and transport.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct McpConfig {
    pub host: String,
    pub port: u16,
    /// Only `sse` is supported.
    pub transport: String,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8002,
            transport: "sse".to_string(),
        }
    }
}

/// One declared input parameter of a flow.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ParamConfig {
    /// JSON-schema style type name: string, integer, number, boolean, array, object.
    #[serde(rename = "type", default = "default_param_type")]
    pub param_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<Value>,
}

fn default_param_type() -> String {
    "string".to_string()
}

/// One flow entry: the composition expression plus service-facing metadata.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FlowConfig {
    /// Expression in the flow composition language, e.g. `"EchoOp() >> LenOp(tool_index=1)"`.
    pub flow_content: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Whether the HTTP service exposes this flow as SSE.
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub input_schema: Option<BTreeMap<String, ParamConfig>>,
}

/// One named LLM resource.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    pub backend: String,
    pub model_name: String,
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
    /// Optional token counter name from the registry.
    #[serde(default)]
    pub token_count: Option<String>,
}

/// One named embedding-model resource.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EmbeddingModelConfig {
    pub backend: String,
    pub model_name: String,
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
}

/// One named vector-store resource.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    pub backend: String,
    /// Name of the embedding model this store embeds with.
    #[serde(default = "default_resource_name")]
    pub embedding_model: String,
    #[serde(default)]
    pub params: serde_json::Map<String, Value>,
}

fn default_resource_name() -> String {
    "default".to_string()
}

/// The whole service configuration tree.
///
/// Immutable after startup; changing it requires a restart.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub backend: Backend,
    pub thread_pool_max_workers: usize,
    /// Per-request deadline; a request may lower (never raise) it via `timeout_ms`.
    pub timeout_ms: u64,
    /// Preferred prompt locale suffix, e.g. `"zh"` selects `foo_zh` over `foo`.
    pub language: String,
    pub stream_outbox_capacity: usize,
    pub http: HttpConfig,
    pub mcp: McpConfig,
    pub flow: BTreeMap<String, FlowConfig>,
    pub llm: BTreeMap<String, LlmConfig>,
    pub embedding_model: BTreeMap<String, EmbeddingModelConfig>,
    pub vector_store: BTreeMap<String, VectorStoreConfig>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Http,
            thread_pool_max_workers: DEFAULT_THREAD_POOL_MAX_WORKERS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            language: String::new(),
            stream_outbox_capacity: DEFAULT_STREAM_OUTBOX_CAPACITY,
            http: HttpConfig::default(),
            mcp: McpConfig::default(),
            flow: BTreeMap::new(),
            llm: BTreeMap::new(),
            embedding_model: BTreeMap::new(),
            vector_store: BTreeMap::new(),
        }
    }
}

impl ServiceConfig {
    /// Parses a config from TOML text, applying dotted overrides on the raw
    /// tree first (`http.port=9000`, `flow.demo.stream=true`).
    pub fn from_toml_str(text: &str, overrides: &[String]) -> Result<Self, ConfigError> {
        let mut tree: toml::Value = toml::from_str(text)?;
        for entry in overrides {
            apply_override(&mut tree, entry)?;
        }
        Ok(tree.try_into()?)
    }

    /// Reads and parses a config file, applying dotted overrides.
    pub fn from_toml_path(path: &Path, overrides: &[String]) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text, overrides)
    }

    pub fn flow_names(&self) -> impl Iterator<Item = &str> {
        self.flow.keys().map(String::as_str)
    }
}

/// Sets `key=value` into the TOML tree, creating intermediate tables.
///
/// The value is parsed as a TOML literal when possible (`8080`, `true`,
/// `[1, 2]`) and falls back to a plain string otherwise.
fn apply_override(tree: &mut toml::Value, entry: &str) -> Result<(), ConfigError> {
    let (key, raw) = entry
        .split_once('=')
        .ok_or_else(|| ConfigError::MalformedOverride(entry.to_string()))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(ConfigError::MalformedOverride(entry.to_string()));
    }
    let value = parse_override_value(raw.trim());

    let mut current = tree;
    let segments: Vec<&str> = key.split('.').collect();
    for segment in &segments[..segments.len() - 1] {
        let table = current
            .as_table_mut()
            .ok_or_else(|| ConfigError::OverridePath(key.to_string()))?;
        current = table
            .entry(segment.to_string())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
    let table = current
        .as_table_mut()
        .ok_or_else(|| ConfigError::OverridePath(key.to_string()))?;
    table.insert(segments[segments.len() - 1].to_string(), value);
    Ok(())
}

fn parse_override_value(raw: &str) -> toml::Value {
    // Wrap in a dummy assignment so bare literals parse.
    if let Ok(parsed) = toml::from_str::<toml::map::Map<String, toml::Value>>(&format!("v = {raw}"))
    {
        if let Some(v) = parsed.get("v") {
            return v.clone();
        }
    }
    toml::Value::String(raw.to_string())
}
