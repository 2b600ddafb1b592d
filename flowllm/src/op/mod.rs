//! The Op contract and its composition algebra.
//!
//! An op is one unit of computation with a stable short name, an execution
//! mode (cooperative or blocking), a retry budget, an optional cache policy
//! and an optional tool schema. Ops compose into trees with
//! [`SequentialOp`] (`>>`), [`ParallelOp`] (`|`) and container children
//! (`<<` / `var.ops.NAME = ...`); the whole tree shares one [`Context`]
//! per invocation and is executed through [`runtime`].

pub mod chat;
pub mod demo;
pub mod parallel;
pub mod prompt;
pub mod retrieval;
pub mod runtime;
pub mod sequential;
pub mod tool_call;

pub use parallel::ParallelOp;
pub use prompt::PromptSet;
pub use sequential::SequentialOp;
pub use tool_call::{ParamAttrs, ParamType, ToolCall};

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::OnceCell;
use serde_json::Value;
use thiserror::Error;

use crate::context::Context;
use crate::embedding::EmbeddingModel;
use crate::error::FlowError;
use crate::llm::Llm;
use crate::registry::Registry;
use crate::vector_store::VectorStore;

/// Keyword arguments: constructor args, bound inputs, invocation kwargs.
pub type OpArgs = serde_json::Map<String, Value>;

/// Structural role of an op in the composition tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Combinator {
    Leaf,
    Sequential,
    Parallel,
}

#[derive(Debug, Error)]
pub enum CompositionError {
    #[error("{0} requires at least one child")]
    Empty(&'static str),
    #[error("{combinator} children must agree on async_mode")]
    MixedAsyncMode { combinator: &'static str },
    #[error("cannot attach container children to a {0:?} node")]
    ContainerNotAllowed(Combinator),
}

/// Cache policy of one op.
#[derive(Clone, Copy, Debug, Default)]
pub struct CachePolicy {
    pub enabled: bool,
    pub expire: Option<Duration>,
}

/// Converts a constructor name to its snake_case form (`AddOneOp` → `add_one_op`).
fn to_snake_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);
    for (i, c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev_lower = i > 0 && chars[i - 1].is_lowercase();
            let next_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if i > 0 && (prev_lower || next_lower) {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(*c);
        }
    }
    out
}

/// Stable short name of an op: snake_case constructor name without the
/// trailing `_op` (`AddOneOp` → `add_one`).
pub fn short_name_of(ctor_name: &str) -> String {
    let snake = to_snake_case(ctor_name);
    snake
        .strip_suffix("_op")
        .map(str::to_string)
        .unwrap_or(snake)
}

// --- kwarg helpers ----------------------------------------------------------

pub fn arg_str(args: &OpArgs, key: &str) -> Result<Option<String>, FlowError> {
    match args.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(other) => Err(FlowError::InputValidation(format!(
            "argument `{key}` must be a string, got {other}"
        ))),
    }
}

pub fn arg_bool(args: &OpArgs, key: &str) -> Result<Option<bool>, FlowError> {
    match args.get(key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(FlowError::InputValidation(format!(
            "argument `{key}` must be a boolean, got {other}"
        ))),
    }
}

pub fn arg_u64(args: &OpArgs, key: &str) -> Result<Option<u64>, FlowError> {
    match args.get(key) {
        None => Ok(None),
        Some(v) => v.as_u64().map(Some).ok_or_else(|| {
            FlowError::InputValidation(format!(
                "argument `{key}` must be a non-negative integer, got {v}"
            ))
        }),
    }
}

pub fn arg_f64(args: &OpArgs, key: &str) -> Result<Option<f64>, FlowError> {
    match args.get(key) {
        None => Ok(None),
        Some(v) => v.as_f64().map(Some).ok_or_else(|| {
            FlowError::InputValidation(format!("argument `{key}` must be a number, got {v}"))
        }),
    }
}

// --- OpBase -----------------------------------------------------------------

/// Shared op state: names, execution policy, tool schema, container children
/// and lazily-bound resource handles.
///
/// Concrete ops embed an `OpBase` and delegate the [`Op`] accessors to it.
/// Constructor kwargs common to all ops (`max_retries`, `raise_on_failure`,
/// `cache_enabled`, `cache_expire_s`, `save_answer`, `tool_index`, `llm`,
/// `embedding_model`, `vector_store`) are parsed here; the rest stay
/// available to the concrete op via [`OpBase::ctor_args`].
pub struct OpBase {
    ctor_name: String,
    short_name: String,
    async_mode: bool,
    max_retries: u32,
    raise_on_failure: bool,
    cache: CachePolicy,
    save_answer: bool,
    tool_call: Option<ToolCall>,
    tool_index: Option<u32>,
    ops: BTreeMap<String, Box<dyn Op>>,
    ctor_args: OpArgs,
    llm_name: String,
    embedding_name: String,
    vector_store_name: String,
    file_path: Option<PathBuf>,
    prompts: OnceCell<PromptSet>,
    llm_handle: OnceCell<Arc<dyn Llm>>,
    embedding_handle: OnceCell<Arc<dyn EmbeddingModel>>,
    vector_store_handle: OnceCell<Arc<dyn VectorStore>>,
}

impl OpBase {
    pub fn new(ctor_name: &str, args: OpArgs) -> Result<Self, FlowError> {
        let max_retries = match arg_u64(&args, "max_retries")? {
            Some(0) => {
                return Err(FlowError::InputValidation(
                    "max_retries must be at least 1".into(),
                ))
            }
            Some(n) => n as u32,
            None => 1,
        };
        let raise_on_failure = arg_bool(&args, "raise_on_failure")?.unwrap_or(true);
        let cache = CachePolicy {
            enabled: arg_bool(&args, "cache_enabled")?.unwrap_or(false),
            expire: arg_f64(&args, "cache_expire_s")?.map(Duration::from_secs_f64),
        };
        let save_answer = arg_bool(&args, "save_answer")?.unwrap_or(false);
        let tool_index = arg_u64(&args, "tool_index")?.map(|i| i as u32);
        let llm_name = arg_str(&args, "llm")?.unwrap_or_else(|| "default".to_string());
        let embedding_name =
            arg_str(&args, "embedding_model")?.unwrap_or_else(|| "default".to_string());
        let vector_store_name =
            arg_str(&args, "vector_store")?.unwrap_or_else(|| "default".to_string());

        Ok(Self {
            ctor_name: ctor_name.to_string(),
            short_name: short_name_of(ctor_name),
            async_mode: true,
            max_retries,
            raise_on_failure,
            cache,
            save_answer,
            tool_call: None,
            tool_index,
            ops: BTreeMap::new(),
            ctor_args: args,
            llm_name,
            embedding_name,
            vector_store_name,
            file_path: None,
            prompts: OnceCell::new(),
            llm_handle: OnceCell::new(),
            embedding_handle: OnceCell::new(),
            vector_store_handle: OnceCell::new(),
        })
    }

    /// Constructs a base with no constructor kwargs (combinator nodes).
    pub fn bare(ctor_name: &str) -> Self {
        Self {
            ctor_name: ctor_name.to_string(),
            short_name: short_name_of(ctor_name),
            async_mode: true,
            max_retries: 1,
            raise_on_failure: true,
            cache: CachePolicy::default(),
            save_answer: false,
            tool_call: None,
            tool_index: None,
            ops: BTreeMap::new(),
            ctor_args: OpArgs::new(),
            llm_name: "default".to_string(),
            embedding_name: "default".to_string(),
            vector_store_name: "default".to_string(),
            file_path: None,
            prompts: OnceCell::new(),
            llm_handle: OnceCell::new(),
            embedding_handle: OnceCell::new(),
            vector_store_handle: OnceCell::new(),
        }
    }

    pub fn with_async_mode(mut self, async_mode: bool) -> Self {
        self.async_mode = async_mode;
        self
    }

    pub fn with_raise_on_failure(mut self, raise_on_failure: bool) -> Self {
        self.raise_on_failure = raise_on_failure;
        self
    }

    /// Installs the tool schema; a `tool_index` constructor kwarg takes
    /// precedence over one set on the schema itself.
    pub fn with_tool_call(mut self, mut tool_call: ToolCall) -> Self {
        if let Some(index) = self.tool_index {
            tool_call.tool_index = Some(index);
        }
        self.tool_call = Some(tool_call);
        self
    }

    pub fn with_save_answer(mut self, save_answer: bool) -> Self {
        self.save_answer = save_answer;
        self
    }

    pub fn with_cache(mut self, cache: CachePolicy) -> Self {
        self.cache = cache;
        self
    }

    /// Declares the op's source file; prompts load from the sibling
    /// `*_prompt.yaml` (see [`PromptSet::prompt_path_for`]).
    pub fn with_file_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.file_path = Some(path.into());
        self
    }

    pub fn ctor_name(&self) -> &str {
        &self.ctor_name
    }

    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn async_mode(&self) -> bool {
        self.async_mode
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn raise_on_failure(&self) -> bool {
        self.raise_on_failure
    }

    pub fn cache_policy(&self) -> CachePolicy {
        self.cache
    }

    pub fn save_answer(&self) -> bool {
        self.save_answer
    }

    pub fn tool_call(&self) -> Option<&ToolCall> {
        self.tool_call.as_ref()
    }

    pub fn tool_index(&self) -> Option<u32> {
        self.tool_index
    }

    pub fn ctor_args(&self) -> &OpArgs {
        &self.ctor_args
    }

    pub fn ops(&self) -> &BTreeMap<String, Box<dyn Op>> {
        &self.ops
    }

    pub fn ops_mut(&mut self) -> &mut BTreeMap<String, Box<dyn Op>> {
        &mut self.ops
    }

    /// Canonical constructor expression, e.g. `LenOp(tool_index=1)`.
    pub fn call_expr(&self) -> String {
        let args: Vec<String> = self
            .ctor_args
            .iter()
            .collect::<BTreeMap<_, _>>()
            .into_iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect();
        format!("{}({})", self.ctor_name, args.join(", "))
    }

    // --- lazily-bound resources --------------------------------------------

    /// Resolves the op's LLM through the registry on first read; cached for
    /// the op's lifetime.
    pub fn llm(&self, ctx: &Context) -> Result<Arc<dyn Llm>, FlowError> {
        self.llm_handle
            .get_or_try_init(|| Registry::global().resolve_llm(&self.llm_name, ctx.config()))
            .cloned()
    }

    pub fn embedding_model(&self, ctx: &Context) -> Result<Arc<dyn EmbeddingModel>, FlowError> {
        self.embedding_handle
            .get_or_try_init(|| {
                Registry::global().resolve_embedding(&self.embedding_name, ctx.config())
            })
            .cloned()
    }

    pub fn vector_store(&self, ctx: &Context) -> Result<Arc<dyn VectorStore>, FlowError> {
        self.vector_store_handle
            .get_or_try_init(|| {
                Registry::global().resolve_vector_store(&self.vector_store_name, ctx.config())
            })
            .cloned()
    }

    /// Formats a named prompt template with `{var}` substitution, loading the
    /// sibling prompt file once per op lifetime. Locale variants
    /// (`{name}_{language}`) win over the bare name.
    pub fn prompt_format(
        &self,
        ctx: &Context,
        name: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<String, FlowError> {
        let prompts = self.prompts.get_or_try_init(|| {
            let path = self.file_path.as_deref().ok_or_else(|| {
                FlowError::Prompt(format!(
                    "op `{}` declares no file_path to locate prompts",
                    self.short_name
                ))
            })?;
            PromptSet::load_for_op(path)
        })?;
        prompts.format(name, ctx.language(), vars)
    }
}

impl Clone for OpBase {
    fn clone(&self) -> Self {
        Self {
            ctor_name: self.ctor_name.clone(),
            short_name: self.short_name.clone(),
            async_mode: self.async_mode,
            max_retries: self.max_retries,
            raise_on_failure: self.raise_on_failure,
            cache: self.cache,
            save_answer: self.save_answer,
            tool_call: self.tool_call.clone(),
            tool_index: self.tool_index,
            ops: self
                .ops
                .iter()
                .map(|(name, op)| (name.clone(), op.copy_op()))
                .collect(),
            ctor_args: self.ctor_args.clone(),
            llm_name: self.llm_name.clone(),
            embedding_name: self.embedding_name.clone(),
            vector_store_name: self.vector_store_name.clone(),
            file_path: self.file_path.clone(),
            // Resource handles re-resolve in the copy.
            prompts: OnceCell::new(),
            llm_handle: OnceCell::new(),
            embedding_handle: OnceCell::new(),
            vector_store_handle: OnceCell::new(),
        }
    }
}

impl std::fmt::Debug for OpBase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpBase")
            .field("ctor_name", &self.ctor_name)
            .field("short_name", &self.short_name)
            .field("async_mode", &self.async_mode)
            .field("max_retries", &self.max_retries)
            .field("children", &self.ops.len())
            .finish()
    }
}

// --- the Op trait -----------------------------------------------------------

/// One unit of computation executed through [`runtime`].
///
/// Concrete ops embed an [`OpBase`] and override exactly one body:
/// `async_execute` for cooperative ops or `execute` for blocking ops
/// (declared by `async_mode`). The runtime owns the rest of the lifecycle —
/// caching, retries, tool input/output binding, default fallback.
impl std::fmt::Debug for dyn Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("dyn Op").field("name", &self.name()).finish()
    }
}

#[async_trait]
pub trait Op: Send + Sync {
    fn base(&self) -> &OpBase;

    fn base_mut(&mut self) -> &mut OpBase;

    fn combinator(&self) -> Combinator {
        Combinator::Leaf
    }

    /// Stable short name (`add_one` for `AddOneOp`).
    fn name(&self) -> &str {
        self.base().short_name()
    }

    fn async_mode(&self) -> bool {
        self.base().async_mode()
    }

    fn max_retries(&self) -> u32 {
        self.base().max_retries()
    }

    fn raise_on_failure(&self) -> bool {
        self.base().raise_on_failure()
    }

    fn cache_policy(&self) -> CachePolicy {
        self.base().cache_policy()
    }

    fn tool_call(&self) -> Option<&ToolCall> {
        self.base().tool_call()
    }

    fn save_answer(&self) -> bool {
        self.base().save_answer()
    }

    /// Cooperative body. `inputs` is the bound input dict for tool ops, the
    /// invocation kwargs otherwise.
    async fn async_execute(&self, ctx: &Context, inputs: &OpArgs) -> Result<Value, FlowError> {
        let _ = (ctx, inputs);
        Err(FlowError::op_failed(format!(
            "op `{}` declares async_mode but has no cooperative body",
            self.name()
        )))
    }

    /// Blocking body; runs on the worker pool.
    fn execute(&self, ctx: &Context, inputs: &OpArgs) -> Result<Value, FlowError> {
        let _ = (ctx, inputs);
        Err(FlowError::op_failed(format!(
            "op `{}` declares blocking mode but has no blocking body",
            self.name()
        )))
    }

    /// Output used when every attempt failed and `raise_on_failure` is off.
    fn default_output(&self) -> Value {
        Value::Null
    }

    /// Deep copy. Required before concurrent re-execution of a shared
    /// sub-op (Parallel) and for blocking-body hand-off to the worker pool.
    fn copy_op(&self) -> Box<dyn Op>;

    /// Hands over this node's children (combinators only); used by the
    /// evaluator to flatten left-associative chains.
    fn take_children(&mut self) -> Vec<Box<dyn Op>> {
        Vec::new()
    }

    /// Attaches a container child (`<<` / `var.ops.NAME = ...`). Illegal on
    /// Sequential and Parallel nodes.
    fn add_child(&mut self, name: &str, child: Box<dyn Op>) -> Result<(), CompositionError> {
        match self.combinator() {
            Combinator::Leaf => {
                self.base_mut().ops_mut().insert(name.to_string(), child);
                Ok(())
            }
            other => Err(CompositionError::ContainerNotAllowed(other)),
        }
    }

    /// Serializes this subtree back to the flow expression language.
    fn to_expr(&self) -> String {
        self.base().call_expr()
    }
}
