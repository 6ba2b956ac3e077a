//! The backend-agnostic model interface.
//!
//! Hosts hold a `Box<dyn Llm>` and never see which inference library sits behind it.
//! Implementations forward each call to their library. Anything stateful that is not
//! owned by the library (token history, past length) lives in [`crate::session::LlmSession`].

use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::Result;
use crate::ring_buffer::RingBuffer;

/// Token id as used by the wrapped inference libraries.
pub type TokenId = i32;

/// Sampling policy for a single `Llm::sample` call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleParams {
    pub top_k: i32,
    pub top_p: f32,
    pub temperature: f32,
    pub repetition_penalty: f32,
    /// Negative means the whole context.
    pub last_n_tokens: i32,
    /// Negative means seed from the clock.
    pub seed: i32,
}

impl Default for SampleParams {
    fn default() -> Self {
        Self {
            top_k: 40,
            top_p: 0.95,
            temperature: 0.8,
            repetition_penalty: 1.1,
            last_n_tokens: 64,
            seed: -1,
        }
    }
}

impl SampleParams {
    /// Greedy selection with a fixed seed.
    pub fn greedy(seed: i32) -> Self {
        Self {
            top_k: 1,
            top_p: 1.0,
            temperature: 1.0,
            repetition_penalty: 1.0,
            last_n_tokens: 0,
            seed,
        }
    }

    pub fn resolved_last_n(&self, context_length: usize) -> usize {
        if self.last_n_tokens < 0 {
            context_length
        } else {
            self.last_n_tokens as usize
        }
    }

    pub fn resolved_seed(&self) -> u32 {
        if self.seed >= 0 {
            return self.seed as u32;
        }
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0)
    }
}

pub trait Llm {
    fn tokenize(&self, text: &str, add_bos_token: bool) -> Result<Vec<TokenId>>;

    /// Bytes of a single token, or an empty slice for ids outside the vocabulary.
    ///
    /// The slice borrows a scratch buffer that the next call overwrites.
    fn detokenize(&mut self, id: TokenId) -> &[u8];

    fn is_eos_token(&self, token: TokenId) -> bool {
        token == self.eos_token()
    }

    fn eos_token(&self) -> TokenId;

    fn bos_token(&self) -> TokenId;

    fn vocab_size(&self) -> usize;

    fn context_length(&self) -> usize;

    fn architecture(&self) -> &str;

    /// Logits of the last evaluated position.
    fn logits(&self) -> &[f32];

    fn logits_mut(&mut self) -> &mut [f32];

    fn embeddings(&self) -> &[f32];

    /// Picks the next token from the current logits.
    ///
    /// `history` holds the recently evaluated tokens used for the repetition penalty.
    fn sample(&mut self, params: &SampleParams, history: &RingBuffer) -> TokenId;

    /// Runs one forward pass over `tokens`, which start at position `n_past`.
    fn eval(&mut self, tokens: &[TokenId], threads: usize, n_past: usize) -> Result<()>;
}
