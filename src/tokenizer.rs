use std::path::Path;
use tokenizers::Tokenizer;

use crate::error::{LlmError, Result};
use crate::llm::TokenId;

/// HuggingFace `tokenizer.json` used in place of the backend's own vocabulary.
#[derive(Debug)]
pub struct TokenizerWrapper {
    tokenizer: Tokenizer,
}

impl TokenizerWrapper {
    pub fn new(tokenizer_path: &Path) -> Result<Self> {
        let mut tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| {
            LlmError::Tokenizer(format!(
                "Failed to load tokenizer from {:?}: {}",
                tokenizer_path, e
            ))
        })?;
        // Sequence length is managed by the session; padding would corrupt model input.
        tokenizer.with_padding(None);
        tokenizer
            .with_truncation(None)
            .map_err(|e| LlmError::Tokenizer(e.to_string()))?;
        Ok(Self { tokenizer })
    }

    pub fn encode(&self, text: &str, add_special_tokens: bool) -> Result<Vec<TokenId>> {
        let encoding = self
            .tokenizer
            .encode(text, add_special_tokens)
            .map_err(|e| LlmError::Tokenizer(format!("Encoding failed for text '{}': {}", text, e)))?;
        Ok(encoding.get_ids().iter().map(|&id| id as TokenId).collect())
    }

    pub fn decode(&self, ids: &[TokenId], skip_special_tokens: bool) -> Result<String> {
        // Negative ids cannot exist in a HF vocabulary.
        let ids: Vec<u32> = ids.iter().filter(|&&id| id >= 0).map(|&id| id as u32).collect();
        self.tokenizer
            .decode(&ids, skip_special_tokens)
            .map_err(|e| LlmError::Tokenizer(format!("Decoding failed for IDs {:?}: {}", ids, e)))
    }

    pub fn get_vocab_size(&self) -> usize {
        // Added tokens may also be in the model vocab; count distinct entries.
        self.tokenizer.get_vocab(true).len()
    }

    pub fn token_to_id(&self, token: &str) -> Option<TokenId> {
        self.tokenizer.token_to_id(token).map(|id| id as TokenId)
    }
}
