//! CLI for FlowLLM.
//!
//! Selects a backend (`http` | `mcp` | `cmd`), loads the TOML service config,
//! applies dotted `key=value` overrides, registers the built-in ops and
//! resources, freezes the registry and hands off to the chosen service.
//! `cmd` runs one named flow to completion and prints the response.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use config::{Backend, ServiceConfig};
use flowllm::{Dispatcher, InvokeMode, OpArgs, Registry};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] config::ConfigError),
    #[error(transparent)]
    Flow(#[from] flowllm::FlowError),
    #[error(transparent)]
    Http(#[from] serve::ServeError),
    #[error(transparent)]
    Mcp(#[from] mcp::McpServeError),
    #[error("--flow is required with the cmd backend")]
    MissingFlow,
    #[error("--input must be a JSON object: {0}")]
    BadInput(String),
}

/// Serve user-defined op pipelines over HTTP or MCP, or run one flow.
#[derive(Parser, Debug)]
#[command(name = "flowllm", version, about)]
pub struct Args {
    /// Path to the TOML service config.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Backend to start; overrides the config's `backend`.
    #[arg(short, long)]
    pub backend: Option<Backend>,

    /// Flow to run (cmd backend).
    #[arg(long)]
    pub flow: Option<String>,

    /// JSON object with the flow inputs (cmd backend).
    #[arg(long, default_value = "{}")]
    pub input: String,

    /// Dotted config overrides, e.g. `http.port=9000` or `flow.demo.stream=true`.
    #[arg(value_name = "KEY=VALUE")]
    pub overrides: Vec<String>,
}

impl Args {
    /// Resolves the final service config: file (or defaults), then dotted
    /// overrides, then the `--backend` flag.
    pub fn resolve_config(&self) -> Result<ServiceConfig, CliError> {
        let mut config = match &self.config {
            Some(path) => ServiceConfig::from_toml_path(path, &self.overrides)?,
            None => ServiceConfig::from_toml_str("", &self.overrides)?,
        };
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        Ok(config)
    }
}

/// Initializes tracing from `RUST_LOG` (default `info`).
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Flows registered when the config declares none, so a bare `flowllm`
/// invocation has something to serve.
fn add_demo_flows(config: &mut ServiceConfig) {
    let demos = [
        ("demo_echo", "EchoOp()", false),
        ("inc3", "AddOneOp() >> AddOneOp() >> AddOneOp()", false),
        ("lens", "LenOp(tool_index=1) | LenOp(tool_index=2)", false),
        ("count", "CountStreamOp()", true),
    ];
    for (name, expr, stream) in demos {
        config.flow.insert(
            name.to_string(),
            config::FlowConfig {
                flow_content: expr.to_string(),
                description: None,
                stream,
                input_schema: None,
            },
        );
    }
    tracing::info!("no flows configured; registered the demo flows");
}

/// Runs the CLI to completion.
pub async fn run(args: Args) -> Result<(), CliError> {
    let _ = dotenv::dotenv();

    let mut config = args.resolve_config()?;
    if config.flow.is_empty() {
        add_demo_flows(&mut config);
    }

    flowllm::register_builtins();
    flowllm::op::demo::register_demo_ops();
    Registry::global().freeze();

    let backend = config.backend;
    let service = flowllm::ServiceHandles::new(config);
    let dispatcher = Arc::new(Dispatcher::from_config(service)?);

    match backend {
        Backend::Http => serve::run_http_service(dispatcher).await?,
        Backend::Mcp => mcp::run_mcp_service(dispatcher).await?,
        Backend::Cmd => {
            let flow = args.flow.as_deref().ok_or(CliError::MissingFlow)?;
            let kwargs = parse_input(&args.input)?;
            let response = dispatcher.execute(flow, kwargs, InvokeMode::Cli).await?;
            let rendered = serde_json::to_string_pretty(&response)
                .unwrap_or_else(|_| "<unserializable response>".to_string());
            println!("{rendered}");
        }
    }
    Ok(())
}

fn parse_input(input: &str) -> Result<OpArgs, CliError> {
    match serde_json::from_str::<serde_json::Value>(input) {
        Ok(serde_json::Value::Object(map)) => Ok(map),
        Ok(other) => Err(CliError::BadInput(format!("got {other}"))),
        Err(err) => Err(CliError::BadInput(err.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_flag_overrides_config() {
        let args = Args::parse_from(["flowllm", "--backend", "mcp"]);
        let config = args.resolve_config().unwrap();
        assert_eq!(config.backend, Backend::Mcp);
    }

    #[test]
    fn dotted_overrides_reach_the_config() {
        let args = Args::parse_from(["flowllm", "http.port=9100", "language=zh"]);
        let config = args.resolve_config().unwrap();
        assert_eq!(config.http.port, 9100);
        assert_eq!(config.language, "zh");
    }

    #[test]
    fn config_file_is_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("service.toml");
        std::fs::write(&path, "[flow.echo]\nflow_content = \"EchoOp()\"\n").unwrap();
        let args = Args::parse_from([
            "flowllm",
            "--config",
            path.to_str().unwrap(),
        ]);
        let config = args.resolve_config().unwrap();
        assert_eq!(config.flow["echo"].flow_content, "EchoOp()");
    }

    #[test]
    fn input_must_be_an_object() {
        assert!(parse_input("{\"a\": 1}").is_ok());
        assert!(matches!(parse_input("[1]"), Err(CliError::BadInput(_))));
        assert!(matches!(parse_input("not json"), Err(CliError::BadInput(_))));
    }

    #[test]
    fn demo_flows_fill_an_empty_table() {
        let mut config = ServiceConfig::default();
        add_demo_flows(&mut config);
        assert!(config.flow.contains_key("demo_echo"));
        assert!(config.flow["count"].stream);
    }
}
