//! Prompt templates: a YAML map of `prompt_name -> template` loaded from the
//! op's sibling `*_prompt.yaml`, with `{var}` substitution and locale
//! fallback (`foo_zh` preferred over `foo` when the language is `zh`).

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::FlowError;

/// The prompt templates of one op, loaded once per op lifetime.
#[derive(Clone, Debug, Default)]
pub struct PromptSet {
    templates: BTreeMap<String, String>,
}

impl PromptSet {
    /// Prompt file next to the op's source file: `chat_op.rs` and `chat.rs`
    /// both map to `chat_prompt.yaml` in the same directory.
    pub fn prompt_path_for(op_path: &Path) -> PathBuf {
        let stem = op_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or_default();
        let stem = stem.strip_suffix("_op").unwrap_or(stem);
        op_path.with_file_name(format!("{stem}_prompt.yaml"))
    }

    /// Loads the prompt set for an op from its declared source path.
    pub fn load_for_op(op_path: &Path) -> Result<Self, FlowError> {
        Self::load(&Self::prompt_path_for(op_path))
    }

    pub fn load(path: &Path) -> Result<Self, FlowError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            FlowError::Prompt(format!("read {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, FlowError> {
        let templates: BTreeMap<String, String> = serde_yaml::from_str(text)
            .map_err(|e| FlowError::Prompt(format!("parse prompt yaml: {e}")))?;
        Ok(Self { templates })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Formats the named template with `{var}` substitution.
    ///
    /// When `language` is non-empty and `{name}_{language}` exists, the
    /// locale variant wins over the bare name.
    pub fn format(
        &self,
        name: &str,
        language: &str,
        vars: &BTreeMap<String, String>,
    ) -> Result<String, FlowError> {
        let template = if !language.is_empty() {
            let localized = format!("{name}_{language}");
            self.templates
                .get(&localized)
                .or_else(|| self.templates.get(name))
        } else {
            self.templates.get(name)
        }
        .ok_or_else(|| FlowError::Prompt(format!("unknown prompt: {name}")))?;

        let mut rendered = template.clone();
        for (key, value) in vars {
            rendered = rendered.replace(&format!("{{{key}}}"), value);
        }
        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn prompt_path_strips_op_suffix() {
        assert_eq!(
            PromptSet::prompt_path_for(Path::new("/ops/chat_op.rs")),
            PathBuf::from("/ops/chat_prompt.yaml")
        );
        assert_eq!(
            PromptSet::prompt_path_for(Path::new("/ops/chat.rs")),
            PathBuf::from("/ops/chat_prompt.yaml")
        );
    }

    #[test]
    fn format_substitutes_placeholders() {
        let prompts =
            PromptSet::from_yaml_str("greet: \"Hello {name}, welcome to {place}!\"\n").unwrap();
        let out = prompts
            .format("greet", "", &vars(&[("name", "Ada"), ("place", "here")]))
            .unwrap();
        assert_eq!(out, "Hello Ada, welcome to here!");
    }

    #[test]
    fn locale_variant_wins() {
        let prompts =
            PromptSet::from_yaml_str("greet: \"hello\"\ngreet_zh: \"ni hao\"\n").unwrap();
        assert_eq!(prompts.format("greet", "zh", &vars(&[])).unwrap(), "ni hao");
        assert_eq!(prompts.format("greet", "", &vars(&[])).unwrap(), "hello");
        assert_eq!(prompts.format("greet", "fr", &vars(&[])).unwrap(), "hello");
    }

    #[test]
    fn unknown_prompt_errors() {
        let prompts = PromptSet::from_yaml_str("a: \"x\"\n").unwrap();
        let err = prompts.format("b", "", &vars(&[])).unwrap_err();
        assert!(matches!(err, FlowError::Prompt(_)));
    }

    #[test]
    fn loads_sibling_file() {
        let dir = tempfile::tempdir().unwrap();
        let op_path = dir.path().join("search_op.rs");
        std::fs::write(
            dir.path().join("search_prompt.yaml"),
            "system: \"You search for {query}.\"\n",
        )
        .unwrap();
        let prompts = PromptSet::load_for_op(&op_path).unwrap();
        assert_eq!(
            prompts
                .format("system", "", &vars(&[("query", "rust")]))
                .unwrap(),
            "You search for rust."
        );
    }
}
