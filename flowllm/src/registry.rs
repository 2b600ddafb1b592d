//! Process-wide registry: stable string names to constructors.
//!
//! Five categories — op, llm, embedding, vector_store, token_counter — each
//! a case-sensitive map populated by explicit `register_*` calls during
//! startup. Duplicate names fail; after [`Registry::freeze`] all
//! registration fails. Resolution stays available for the life of the
//! process. LLM / embedding / vector-store resolution goes through the
//! service config: the requested name selects a config entry (the entry
//! named `default` backs ops that name no resource), and the entry's
//! `backend` selects the registered constructor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use config::{EmbeddingModelConfig, LlmConfig, ServiceConfig, VectorStoreConfig};
use once_cell::sync::Lazy;

use crate::embedding::EmbeddingModel;
use crate::error::FlowError;
use crate::llm::Llm;
use crate::op::{Op, OpArgs};
use crate::token_counter::TokenCounter;
use crate::vector_store::VectorStore;

pub type OpCtor = Arc<dyn Fn(OpArgs) -> Result<Box<dyn Op>, FlowError> + Send + Sync>;
pub type LlmCtor = Arc<dyn Fn(&LlmConfig) -> Result<Arc<dyn Llm>, FlowError> + Send + Sync>;
pub type EmbeddingCtor =
    Arc<dyn Fn(&EmbeddingModelConfig) -> Result<Arc<dyn EmbeddingModel>, FlowError> + Send + Sync>;
pub type VectorStoreCtor = Arc<
    dyn Fn(&VectorStoreConfig, Arc<dyn EmbeddingModel>) -> Result<Arc<dyn VectorStore>, FlowError>
        + Send
        + Sync,
>;
pub type TokenCounterCtor = Arc<dyn Fn() -> Arc<dyn TokenCounter> + Send + Sync>;

static GLOBAL: Lazy<Registry> = Lazy::new(Registry::new);

pub struct Registry {
    ops: RwLock<HashMap<String, OpCtor>>,
    llms: RwLock<HashMap<String, LlmCtor>>,
    embeddings: RwLock<HashMap<String, EmbeddingCtor>>,
    vector_stores: RwLock<HashMap<String, VectorStoreCtor>>,
    token_counters: RwLock<HashMap<String, TokenCounterCtor>>,
    /// Vector stores hold state (inserted documents); every op resolving the
    /// same name must observe the same instance.
    vector_store_instances: RwLock<HashMap<String, Arc<dyn VectorStore>>>,
    frozen: AtomicBool,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            ops: RwLock::new(HashMap::new()),
            llms: RwLock::new(HashMap::new()),
            embeddings: RwLock::new(HashMap::new()),
            vector_stores: RwLock::new(HashMap::new()),
            token_counters: RwLock::new(HashMap::new()),
            vector_store_instances: RwLock::new(HashMap::new()),
            frozen: AtomicBool::new(false),
        }
    }

    /// The process-wide instance.
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    /// Rejects further registration. Resolution keeps working.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::SeqCst);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::SeqCst)
    }

    fn insert<T>(
        &self,
        map: &RwLock<HashMap<String, T>>,
        category: &'static str,
        name: &str,
        ctor: T,
    ) -> Result<(), FlowError> {
        if self.is_frozen() {
            return Err(FlowError::RegistryFrozen {
                category,
                name: name.to_string(),
            });
        }
        let mut guard = map.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if guard.contains_key(name) {
            return Err(FlowError::DuplicateRegistration {
                category,
                name: name.to_string(),
            });
        }
        guard.insert(name.to_string(), ctor);
        Ok(())
    }

    // --- ops ----------------------------------------------------------------

    pub fn register_op(&self, name: &str, ctor: OpCtor) -> Result<(), FlowError> {
        self.insert(&self.ops, "op", name, ctor)
    }

    pub fn has_op(&self, name: &str) -> bool {
        self.ops
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains_key(name)
    }

    pub fn op_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .ops
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Constructs an op by registered name with the given kwargs.
    pub fn build_op(&self, name: &str, args: OpArgs) -> Result<Box<dyn Op>, FlowError> {
        let ctor = self
            .ops
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::UnknownOp(name.to_string()))?;
        ctor(args)
    }

    // --- llms ---------------------------------------------------------------

    pub fn register_llm_backend(&self, backend: &str, ctor: LlmCtor) -> Result<(), FlowError> {
        self.insert(&self.llms, "llm", backend, ctor)
    }

    /// Resolves a named LLM: config entry by name, then constructor by the
    /// entry's `backend`.
    pub fn resolve_llm(
        &self,
        name: &str,
        config: &ServiceConfig,
    ) -> Result<Arc<dyn Llm>, FlowError> {
        let entry = config.llm.get(name).ok_or(FlowError::UnknownResource {
            category: "llm",
            name: name.to_string(),
        })?;
        let ctor = self
            .llms
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&entry.backend)
            .cloned()
            .ok_or_else(|| FlowError::UnknownResource {
                category: "llm backend",
                name: entry.backend.clone(),
            })?;
        ctor(entry)
    }

    // --- embeddings ---------------------------------------------------------

    pub fn register_embedding_backend(
        &self,
        backend: &str,
        ctor: EmbeddingCtor,
    ) -> Result<(), FlowError> {
        self.insert(&self.embeddings, "embedding", backend, ctor)
    }

    pub fn resolve_embedding(
        &self,
        name: &str,
        config: &ServiceConfig,
    ) -> Result<Arc<dyn EmbeddingModel>, FlowError> {
        let entry = config
            .embedding_model
            .get(name)
            .ok_or(FlowError::UnknownResource {
                category: "embedding_model",
                name: name.to_string(),
            })?;
        let ctor = self
            .embeddings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&entry.backend)
            .cloned()
            .ok_or_else(|| FlowError::UnknownResource {
                category: "embedding backend",
                name: entry.backend.clone(),
            })?;
        ctor(entry)
    }

    // --- vector stores ------------------------------------------------------

    pub fn register_vector_store_backend(
        &self,
        backend: &str,
        ctor: VectorStoreCtor,
    ) -> Result<(), FlowError> {
        self.insert(&self.vector_stores, "vector_store", backend, ctor)
    }

    pub fn resolve_vector_store(
        &self,
        name: &str,
        config: &ServiceConfig,
    ) -> Result<Arc<dyn VectorStore>, FlowError> {
        if let Some(instance) = self
            .vector_store_instances
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
        {
            return Ok(instance.clone());
        }
        let entry = config
            .vector_store
            .get(name)
            .ok_or(FlowError::UnknownResource {
                category: "vector_store",
                name: name.to_string(),
            })?;
        let embedding = self.resolve_embedding(&entry.embedding_model, config)?;
        let ctor = self
            .vector_stores
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&entry.backend)
            .cloned()
            .ok_or_else(|| FlowError::UnknownResource {
                category: "vector_store backend",
                name: entry.backend.clone(),
            })?;
        let instance = ctor(entry, embedding)?;
        self.vector_store_instances
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(name.to_string())
            .or_insert_with(|| instance.clone());
        Ok(instance)
    }

    // --- token counters -----------------------------------------------------

    pub fn register_token_counter(
        &self,
        name: &str,
        ctor: TokenCounterCtor,
    ) -> Result<(), FlowError> {
        self.insert(&self.token_counters, "token_counter", name, ctor)
    }

    pub fn resolve_token_counter(&self, name: &str) -> Result<Arc<dyn TokenCounter>, FlowError> {
        let ctor = self
            .token_counters
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| FlowError::UnknownResource {
                category: "token_counter",
                name: name.to_string(),
            })?;
        Ok(ctor())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registers the built-in resource backends on the global registry:
/// `openai` and `mock` LLMs and embeddings, the in-memory vector store and
/// the simple token counter. Safe to call more than once.
pub fn register_builtin_resources() {
    static ONCE: std::sync::Once = std::sync::Once::new();
    ONCE.call_once(|| {
        let registry = Registry::global();
        let results = [
            registry.register_llm_backend("openai", Arc::new(|cfg| {
                Ok(Arc::new(crate::llm::OpenAiChat::from_config(cfg)?) as Arc<dyn Llm>)
            })),
            registry.register_llm_backend("mock", Arc::new(|cfg| {
                let llm = match cfg.params.get("reply").and_then(serde_json::Value::as_str) {
                    Some(reply) => crate::llm::MockLlm::with_reply(reply),
                    None => crate::llm::MockLlm::new(),
                };
                Ok(Arc::new(llm) as Arc<dyn Llm>)
            })),
            registry.register_embedding_backend("openai", Arc::new(|cfg| {
                Ok(Arc::new(crate::embedding::OpenAiEmbedding::from_config(cfg)?)
                    as Arc<dyn EmbeddingModel>)
            })),
            registry.register_embedding_backend("mock", Arc::new(|cfg| {
                let dim = cfg
                    .params
                    .get("dim")
                    .and_then(serde_json::Value::as_u64)
                    .unwrap_or(32) as usize;
                Ok(Arc::new(crate::embedding::MockEmbedding::new(dim)) as Arc<dyn EmbeddingModel>)
            })),
            registry.register_vector_store_backend("in_memory", Arc::new(|_cfg, embedding| {
                Ok(Arc::new(crate::vector_store::InMemoryVectorStore::new(embedding))
                    as Arc<dyn VectorStore>)
            })),
            registry.register_token_counter("simple", Arc::new(|| {
                Arc::new(crate::token_counter::SimpleTokenCounter) as Arc<dyn TokenCounter>
            })),
        ];
        for result in results {
            if let Err(err) = result {
                tracing::error!(error = %err, "builtin resource registration failed");
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_ctor() -> OpCtor {
        Arc::new(|args| Ok(Box::new(crate::op::demo::EchoOp::new(args)?) as Box<dyn Op>))
    }

    #[test]
    fn duplicate_registration_fails() {
        let registry = Registry::new();
        registry.register_op("EchoOp", echo_ctor()).unwrap();
        let err = registry.register_op("EchoOp", echo_ctor()).unwrap_err();
        assert!(matches!(err, FlowError::DuplicateRegistration { .. }));
    }

    #[test]
    fn lookup_is_case_sensitive() {
        let registry = Registry::new();
        registry.register_op("EchoOp", echo_ctor()).unwrap();
        assert!(registry.has_op("EchoOp"));
        assert!(!registry.has_op("echoop"));
        let err = registry.build_op("echoop", OpArgs::new()).unwrap_err();
        assert!(matches!(err, FlowError::UnknownOp(_)));
    }

    #[test]
    fn frozen_registry_rejects_registration() {
        let registry = Registry::new();
        registry.freeze();
        let err = registry.register_op("EchoOp", echo_ctor()).unwrap_err();
        assert!(matches!(err, FlowError::RegistryFrozen { .. }));
    }

    #[test]
    fn default_resolver_requires_a_default_entry() {
        register_builtin_resources();
        let config = ServiceConfig::default();
        let err = Registry::global()
            .resolve_llm("default", &config)
            .unwrap_err();
        assert!(matches!(err, FlowError::UnknownResource { .. }));
    }

    #[test]
    fn resolve_llm_through_backend() {
        register_builtin_resources();
        let mut config = ServiceConfig::default();
        let mut params = serde_json::Map::new();
        params.insert("reply".into(), serde_json::json!("pong"));
        config.llm.insert(
            "default".into(),
            LlmConfig {
                backend: "mock".into(),
                model_name: "mock".into(),
                params,
                token_count: None,
            },
        );
        let llm = Registry::global().resolve_llm("default", &config).unwrap();
        assert_eq!(llm.model_name(), "mock");
    }

    #[test]
    fn vector_store_resolves_its_embedding() {
        register_builtin_resources();
        let mut config = ServiceConfig::default();
        config.embedding_model.insert(
            "default".into(),
            EmbeddingModelConfig {
                backend: "mock".into(),
                model_name: "mock".into(),
                params: serde_json::Map::new(),
            },
        );
        config.vector_store.insert(
            "default".into(),
            VectorStoreConfig {
                backend: "in_memory".into(),
                embedding_model: "default".into(),
                params: serde_json::Map::new(),
            },
        );
        Registry::global()
            .resolve_vector_store("default", &config)
            .unwrap();
    }

    #[test]
    fn token_counter_resolves() {
        register_builtin_resources();
        let counter = Registry::global().resolve_token_counter("simple").unwrap();
        assert!(counter.count("four characters here") > 0);
    }
}
