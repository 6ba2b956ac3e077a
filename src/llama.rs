//! llama.cpp backend through the llama-cpp-2 bindings.

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::LlamaModel;
use llama_cpp_2::sampling::LlamaSampler;
use llama_cpp_2::token::data::LlamaTokenData;
use llama_cpp_2::token::data_array::LlamaTokenDataArray;
use llama_cpp_2::token::LlamaToken;
use llama_cpp_2::vocab::LlamaVocab;
use llama_cpp_2::DecodeError;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::mem::ManuallyDrop;
use std::num::NonZeroU32;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::OnceLock;

use crate::config::{resolve_threads, Config};
use crate::error::{LlmError, Result};
use crate::llm::{Llm, SampleParams, TokenId};
use crate::ring_buffer::RingBuffer;

static LLAMA_BACKEND: OnceLock<std::result::Result<LlamaBackend, String>> = OnceLock::new();

/// The llama.cpp backend can only be initialized once per process.
fn backend() -> Result<&'static LlamaBackend> {
    let result = LLAMA_BACKEND.get_or_init(|| {
        let mut backend = LlamaBackend::init().map_err(|e| e.to_string())?;
        backend.void_logs();
        Ok(backend)
    });
    match result {
        Ok(backend) => Ok(backend),
        Err(e) => Err(LlmError::ModelLoad(format!(
            "Failed to initialize llama.cpp backend: {}",
            e
        ))),
    }
}

pub struct LlamaLlm {
    // Borrows the model behind `model`; dropped first in `Drop`.
    ctx: ManuallyDrop<LlamaContext<'static>>,
    model: NonNull<LlamaModel>,
    n_ctx: usize,
    n_vocab: usize,
    architecture: String,
    logits: Vec<f32>,
    embeddings: Vec<f32>,
    detokenized: Vec<u8>,
}

impl LlamaLlm {
    pub fn load(model_path: &Path, config: &Config) -> Result<Self> {
        let backend = backend()?;

        let model_params = model_params(config);

        let model = LlamaModel::load_from_file(backend, model_path, &model_params)
            .map_err(|e| LlmError::ModelLoad(format!("{}: {}", model_path.display(), e)))?;
        let model = Box::into_raw(Box::new(model));
        // SAFETY: `model` comes from Box::into_raw and is only freed in Drop, after the context.
        let model_ref: &'static LlamaModel = unsafe { &*model };

        let threads = resolve_threads(config.threads) as i32;
        let mut ctx_params = LlamaContextParams::default()
            .with_embeddings(true)
            .with_n_threads(threads)
            .with_n_threads_batch(threads);
        if config.context_length > 0 {
            ctx_params = ctx_params.with_n_ctx(NonZeroU32::new(config.context_length as u32));
        }

        let ctx = match model_ref.new_context(backend, ctx_params) {
            Ok(ctx) => ctx,
            Err(e) => {
                // SAFETY: no context borrows the model yet.
                unsafe { drop(Box::from_raw(model)) };
                return Err(LlmError::ContextCreate(e.to_string()));
            }
        };

        let architecture = model_ref
            .meta_val_str("general.architecture")
            .unwrap_or_else(|e| {
                debug!("general.architecture missing from model metadata: {}", e);
                String::from("unknown")
            });
        let n_ctx = ctx.n_ctx() as usize;
        let n_vocab = model_ref.n_vocab().max(0) as usize;
        info!(
            "Loaded {} model: n_ctx={}, n_vocab={}, gpu_layers={}",
            architecture, n_ctx, n_vocab, config.gpu_layers
        );

        Ok(Self {
            ctx: ManuallyDrop::new(ctx),
            // SAFETY: Box::into_raw never returns null.
            model: unsafe { NonNull::new_unchecked(model) },
            n_ctx,
            n_vocab,
            architecture,
            logits: vec![0.0; n_vocab],
            embeddings: Vec::new(),
            detokenized: Vec::new(),
        })
    }

    pub fn boxed(model_path: &Path, config: &Config) -> Result<Box<dyn Llm>> {
        Ok(Box::new(Self::load(model_path, config)?))
    }

    fn model(&self) -> &LlamaModel {
        // SAFETY: the model outlives `self` and is never mutated after load.
        unsafe { self.model.as_ref() }
    }

    fn vocab(&self) -> LlamaVocab<'_> {
        self.model().vocab()
    }
}

impl Drop for LlamaLlm {
    fn drop(&mut self) {
        // SAFETY: the context is dropped exactly once and before the model it borrows;
        // the model pointer was produced by Box::into_raw in `load`.
        unsafe {
            ManuallyDrop::drop(&mut self.ctx);
            drop(Box::from_raw(self.model.as_ptr()));
        }
    }
}

fn model_params(config: &Config) -> LlamaModelParams {
    LlamaModelParams::default()
        .with_n_gpu_layers(config.gpu_layers.max(0) as u32)
        .with_use_mmap(config.mmap)
        .with_use_mlock(config.mlock)
}

fn decode_status(err: &DecodeError) -> i32 {
    match err {
        DecodeError::NoKvCacheSlot => 1,
        DecodeError::NTokensZero => -1,
        DecodeError::Unknown(status) => *status,
    }
}

/// Negative ids and ids past the vocabulary have no piece.
fn in_vocab(id: TokenId, n_vocab: usize) -> bool {
    id >= 0 && (id as usize) < n_vocab
}

/// Penalizes every candidate in `recent`: non-positive logits are multiplied, positive ones divided.
fn apply_repetition_penalty(candidates: &mut [LlamaTokenData], recent: &HashSet<TokenId>, penalty: f32) {
    if penalty == 1.0 || recent.is_empty() {
        return;
    }
    for data in candidates.iter_mut() {
        if recent.contains(&data.id().0) {
            let logit = data.logit();
            data.set_logit(if logit <= 0.0 { logit * penalty } else { logit / penalty });
        }
    }
}

impl Llm for LlamaLlm {
    fn tokenize(&self, text: &str, add_bos_token: bool) -> Result<Vec<TokenId>> {
        let tokens = self.vocab().tokenize(text.as_bytes(), add_bos_token, false);
        Ok(tokens.into_iter().map(|t| t.0).collect())
    }

    fn detokenize(&mut self, id: TokenId) -> &[u8] {
        self.detokenized.clear();
        if !in_vocab(id, self.n_vocab) {
            return &self.detokenized;
        }
        let model = self.model;
        // SAFETY: see `model()`; the copy keeps `self.detokenized` free to borrow mutably.
        let vocab = unsafe { model.as_ref() }.vocab();
        // Grows the buffer and retries when the piece does not fit.
        vocab.token_to_piece_into(LlamaToken(id), &mut self.detokenized, true, None);
        &self.detokenized
    }

    fn eos_token(&self) -> TokenId {
        self.vocab().eos().0
    }

    fn bos_token(&self) -> TokenId {
        self.vocab().bos().0
    }

    fn vocab_size(&self) -> usize {
        self.n_vocab
    }

    fn context_length(&self) -> usize {
        self.n_ctx
    }

    fn architecture(&self) -> &str {
        &self.architecture
    }

    fn logits(&self) -> &[f32] {
        &self.logits
    }

    fn logits_mut(&mut self) -> &mut [f32] {
        &mut self.logits
    }

    fn embeddings(&self) -> &[f32] {
        &self.embeddings
    }

    fn sample(&mut self, params: &SampleParams, history: &RingBuffer) -> TokenId {
        let last_n_tokens = params.resolved_last_n(self.n_ctx);
        let seed = params.resolved_seed();

        let mut candidates = LlamaTokenDataArray::from_iter(
            self.logits
                .iter()
                .enumerate()
                .map(|(id, &logit)| LlamaTokenData::new(LlamaToken(id as i32), logit, 0.0)),
            false,
        );

        apply_repetition_penalty(
            &mut candidates.data,
            &history.recent(last_n_tokens),
            params.repetition_penalty,
        );

        let mut chain = LlamaSampler::chain_simple([
            LlamaSampler::top_k(params.top_k),
            LlamaSampler::top_p(params.top_p, 1),
            LlamaSampler::temp(params.temperature),
        ]);
        candidates.apply_sampler(&mut chain);
        candidates.sample_token(seed).0
    }

    // Thread count is fixed when the context is created from `Config::threads`.
    fn eval(&mut self, tokens: &[TokenId], _threads: usize, n_past: usize) -> Result<()> {
        if tokens.is_empty() {
            return Ok(());
        }
        if n_past == 0 {
            self.ctx.clear_kv_cache();
        }

        let last = tokens.len() - 1;
        let mut batch = LlamaBatch::new(tokens.len(), 1);
        for (i, &token) in tokens.iter().enumerate() {
            batch
                .add(LlamaToken(token), (n_past + i) as i32, &[0], i == last)
                .map_err(|e| {
                    warn!("Failed to build batch: {}", e);
                    LlmError::Eval { status: -1 }
                })?;
        }
        self.ctx
            .decode(&mut batch)
            .map_err(|e| LlmError::Eval { status: decode_status(&e) })?;

        self.logits.clear();
        self.logits
            .extend_from_slice(self.ctx.get_logits_ith(last as i32));
        match self.ctx.embeddings_ith(last as i32) {
            Ok(embeddings) => {
                self.embeddings.clear();
                self.embeddings.extend_from_slice(embeddings);
            }
            Err(e) => {
                debug!("No embeddings for the last position: {}", e);
                self.embeddings.clear();
            }
        }
        Ok(())
    }
}
