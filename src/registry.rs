//! Backend selection by model type, plus model file discovery inside directories.

use log::info;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{Config, ModelDirConfig};
use crate::error::{LlmError, Result};
use crate::llm::Llm;
use crate::session::LlmSession;

pub type LlmConstructor = fn(&Path, &Config) -> Result<Box<dyn Llm>>;

const MODEL_EXTENSIONS: [&str; 2] = ["gguf", "bin"];

pub struct Registry {
    constructors: BTreeMap<String, LlmConstructor>,
}

impl Registry {
    pub fn empty() -> Self {
        Self {
            constructors: BTreeMap::new(),
        }
    }

    pub fn register(&mut self, model_type: &str, constructor: LlmConstructor) {
        self.constructors.insert(model_type.to_lowercase(), constructor);
    }

    pub fn model_types(&self) -> Vec<&str> {
        self.constructors.keys().map(String::as_str).collect()
    }

    pub fn create(&self, model_type: &str, model_path: &Path, config: &Config) -> Result<Box<dyn Llm>> {
        let constructor = self
            .constructors
            .get(&model_type.to_lowercase())
            .ok_or_else(|| LlmError::UnsupportedModelType(model_type.to_string()))?;
        info!("Loading {} model from {}", model_type, model_path.display());
        constructor(model_path, config)
    }

    /// Resolves the model file and type, loads it, and wraps it in a session.
    pub fn from_pretrained(
        &self,
        model_path: &Path,
        model_type: Option<&str>,
        config: &Config,
    ) -> Result<LlmSession> {
        let model_file = resolve_model_path(model_path)?;
        let model_type = resolve_model_type(model_path, &model_file, model_type)?;
        let llm = self.create(&model_type, &model_file, config)?;
        Ok(LlmSession::new(llm))
    }
}

impl Default for Registry {
    fn default() -> Self {
        #[allow(unused_mut)]
        let mut registry = Self::empty();
        #[cfg(feature = "llama")]
        registry.register("llama", crate::llama::LlamaLlm::boxed);
        registry
    }
}

/// A file is used as given; in a directory the smallest `.gguf`/`.bin` file wins.
pub fn resolve_model_path(path: &Path) -> Result<PathBuf> {
    if path.is_file() {
        return Ok(path.to_path_buf());
    }
    if !path.is_dir() {
        return Err(LlmError::ModelNotFound(path.to_path_buf()));
    }

    let mut candidates = Vec::new();
    for entry in fs::read_dir(path)? {
        let entry = entry?;
        let file_path = entry.path();
        if !file_path.is_file() || !has_model_extension(&file_path) {
            continue;
        }
        candidates.push((entry.metadata()?.len(), file_path));
    }
    candidates
        .into_iter()
        .min()
        .map(|(_, file_path)| file_path)
        .ok_or_else(|| LlmError::ModelNotFound(path.to_path_buf()))
}

/// Explicit type, then `config.json` next to the model, then `llama` for GGUF files.
pub fn resolve_model_type(
    model_path: &Path,
    model_file: &Path,
    explicit: Option<&str>,
) -> Result<String> {
    if let Some(model_type) = explicit {
        return Ok(model_type.to_string());
    }

    let config_dir = if model_path.is_dir() {
        Some(model_path)
    } else {
        model_path.parent()
    };
    if let Some(dir) = config_dir {
        let config_path = dir.join("config.json");
        if config_path.is_file() {
            if let Some(model_type) = ModelDirConfig::load(&config_path)?.model_type {
                return Ok(model_type);
            }
        }
    }

    let is_gguf = model_file
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("gguf"))
        .unwrap_or(false);
    if is_gguf {
        return Ok("llama".to_string());
    }
    Err(LlmError::MissingModelType(model_path.to_path_buf()))
}

fn has_model_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| MODEL_EXTENSIONS.iter().any(|m| ext.eq_ignore_ascii_case(m)))
        .unwrap_or(false)
}
