//! Host-side state around a backend: past length, token history and batching.

use log::{debug, warn};

use crate::error::Result;
use crate::llm::{Llm, SampleParams, TokenId};
use crate::ring_buffer::RingBuffer;
use crate::tokenizer::TokenizerWrapper;

pub struct LlmSession {
    llm: Box<dyn Llm>,
    tokenizer: Option<TokenizerWrapper>,
    previous_tokens: RingBuffer,
    n_past: usize,
}

impl LlmSession {
    pub fn new(llm: Box<dyn Llm>) -> Self {
        let previous_tokens = RingBuffer::new(llm.context_length());
        Self {
            llm,
            tokenizer: None,
            previous_tokens,
            n_past: 0,
        }
    }

    /// Routes tokenize/detokenize through an external HuggingFace tokenizer.
    pub fn with_tokenizer(mut self, tokenizer: TokenizerWrapper) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    pub fn has_external_tokenizer(&self) -> bool {
        self.tokenizer.is_some()
    }

    pub fn tokenize(&self, text: &str, add_bos_token: bool) -> Result<Vec<TokenId>> {
        match &self.tokenizer {
            Some(tokenizer) => tokenizer.encode(text, add_bos_token),
            None => self.llm.tokenize(text, add_bos_token),
        }
    }

    /// Concatenated bytes of `tokens`; ids outside the vocabulary contribute nothing.
    pub fn detokenize_bytes(&mut self, tokens: &[TokenId]) -> Result<Vec<u8>> {
        if let Some(tokenizer) = &self.tokenizer {
            return Ok(tokenizer.decode(tokens, false)?.into_bytes());
        }
        let mut bytes = Vec::new();
        for &token in tokens {
            bytes.extend_from_slice(self.llm.detokenize(token));
        }
        Ok(bytes)
    }

    pub fn detokenize(&mut self, tokens: &[TokenId]) -> Result<String> {
        let bytes = self.detokenize_bytes(tokens)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Evaluates `tokens` in batches of at most `batch_size`, capped by the context length.
    pub fn eval(&mut self, tokens: &[TokenId], batch_size: usize, threads: usize) -> Result<()> {
        let batch_size = batch_size.min(self.llm.context_length()).max(1);
        if self.n_past + tokens.len() > self.llm.context_length() {
            warn!(
                "Evaluating {} tokens after {} past tokens exceeds the context length ({})",
                tokens.len(),
                self.n_past,
                self.llm.context_length()
            );
        }
        for batch in tokens.chunks(batch_size) {
            self.eval_batch(batch, threads)?;
        }
        Ok(())
    }

    fn eval_batch(&mut self, batch: &[TokenId], threads: usize) -> Result<()> {
        debug!("eval batch of {} tokens at n_past={}", batch.len(), self.n_past);
        self.llm.eval(batch, threads, self.n_past)?;
        self.n_past += batch.len();
        for &token in batch {
            self.previous_tokens.add(token);
        }
        Ok(())
    }

    pub fn sample(&mut self, params: &SampleParams) -> TokenId {
        self.llm.sample(params, &self.previous_tokens)
    }

    pub fn reset(&mut self) {
        self.n_past = 0;
        self.previous_tokens.clear();
    }

    /// Embeddings of `text` evaluated from an empty context.
    pub fn embed(&mut self, text: &str, batch_size: usize, threads: usize) -> Result<Vec<f32>> {
        self.reset();
        let tokens = self.tokenize(text, true)?;
        self.eval(&tokens, batch_size, threads)?;
        Ok(self.llm.embeddings().to_vec())
    }

    pub fn is_eos_token(&self, token: TokenId) -> bool {
        self.llm.is_eos_token(token)
    }

    pub fn eos_token(&self) -> TokenId {
        self.llm.eos_token()
    }

    pub fn bos_token(&self) -> TokenId {
        self.llm.bos_token()
    }

    pub fn vocab_size(&self) -> usize {
        self.llm.vocab_size()
    }

    pub fn context_length(&self) -> usize {
        self.llm.context_length()
    }

    pub fn architecture(&self) -> &str {
        self.llm.architecture()
    }

    pub fn logits(&self) -> &[f32] {
        self.llm.logits()
    }

    pub fn logits_mut(&mut self) -> &mut [f32] {
        self.llm.logits_mut()
    }

    pub fn n_past(&self) -> usize {
        self.n_past
    }

    pub fn history(&self) -> &RingBuffer {
        &self.previous_tokens
    }

    pub fn backend(&self) -> &dyn Llm {
        self.llm.as_ref()
    }
}
