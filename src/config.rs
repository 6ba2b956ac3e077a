use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use sysinfo::{System, SystemExt};

use crate::error::{LlmError, Result};
use crate::llm::SampleParams;

/// Load-time settings handed to a backend.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Non-positive values keep the library default context size.
    pub context_length: i32,
    pub gpu_layers: i32,
    pub mmap: bool,
    pub mlock: bool,
    /// Negative means one thread per physical core.
    pub threads: i32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            context_length: -1,
            gpu_layers: 0,
            mmap: true,
            mlock: false,
            threads: -1,
        }
    }
}

impl Config {
    pub fn load(config_path: &Path) -> Result<Self> {
        read_json(config_path)
    }
}

/// Sampling and generation settings for `text_generator`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GenerationConfig {
    pub top_k: i32,
    pub top_p: f32,
    pub temperature: f32,
    pub repetition_penalty: f32,
    pub last_n_tokens: i32,
    pub seed: i32,
    pub max_new_tokens: usize,
    pub stop: Vec<String>,
    pub batch_size: usize,
    pub threads: i32,
    pub reset: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            top_k: 40,
            top_p: 0.95,
            temperature: 0.8,
            repetition_penalty: 1.1,
            last_n_tokens: 64,
            seed: -1,
            max_new_tokens: 256,
            stop: Vec::new(),
            batch_size: 8,
            threads: -1,
            reset: true,
        }
    }
}

impl GenerationConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        read_json(config_path)
    }

    pub fn sample_params(&self) -> SampleParams {
        SampleParams {
            top_k: self.top_k,
            top_p: self.top_p,
            temperature: self.temperature,
            repetition_penalty: self.repetition_penalty,
            last_n_tokens: self.last_n_tokens,
            seed: self.seed,
        }
    }

    pub fn resolved_threads(&self) -> usize {
        resolve_threads(self.threads)
    }
}

/// The subset of a model directory's `config.json` needed to pick a backend.
#[derive(Deserialize, Debug, Default)]
pub struct ModelDirConfig {
    pub model_type: Option<String>,
}

impl ModelDirConfig {
    pub fn load(config_path: &Path) -> Result<Self> {
        read_json(config_path)
    }
}

/// Maps a negative thread request onto the machine's physical core count.
pub fn resolve_threads(requested: i32) -> usize {
    if requested > 0 {
        return requested as usize;
    }
    let sys = System::new();
    let cores = sys
        .physical_core_count()
        .or_else(|| std::thread::available_parallelism().ok().map(|n| n.get()))
        .unwrap_or(1);
    cores.max(1)
}

fn read_json<T: serde::de::DeserializeOwned>(config_path: &Path) -> Result<T> {
    if !config_path.exists() {
        return Err(LlmError::Config(format!(
            "Config file not found at: {}",
            config_path.display()
        )));
    }

    let mut file = File::open(config_path)?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;

    serde_json::from_str(&contents).map_err(|e| {
        LlmError::Config(format!(
            "Failed to deserialize JSON from {}: {}",
            config_path.display(),
            e
        ))
    })
}
