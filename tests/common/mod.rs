// Byte-level scripted backend for driving the session and generator without a model file.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashSet;
use std::path::Path;
use std::rc::Rc;

use rust_llm_bridge::error::{LlmError, Result};
use rust_llm_bridge::{Config, Llm, RingBuffer, SampleParams, TokenId};

pub const BOS: TokenId = 256;
pub const EOS: TokenId = 257;
pub const VOCAB_SIZE: usize = 258;

#[derive(Debug, Default)]
pub struct CallLog {
    /// (tokens, n_past) for every eval call, including failed ones.
    pub evals: Vec<(Vec<TokenId>, usize)>,
    /// Recent-token sets seen by `sample`.
    pub sampled_history: Vec<HashSet<TokenId>>,
}

pub struct ScriptedLlm {
    context_length: usize,
    script: Vec<TokenId>,
    cursor: usize,
    fail_on_eval: Option<usize>,
    logits: Vec<f32>,
    embeddings: Vec<f32>,
    scratch: Vec<u8>,
    pub log: Rc<RefCell<CallLog>>,
}

impl ScriptedLlm {
    pub fn new(context_length: usize) -> Self {
        Self {
            context_length,
            script: Vec::new(),
            cursor: 0,
            fail_on_eval: None,
            logits: vec![0.0; VOCAB_SIZE],
            embeddings: Vec::new(),
            scratch: Vec::new(),
            log: Rc::new(RefCell::new(CallLog::default())),
        }
    }

    /// Tokens returned by successive `sample` calls; EOS once exhausted.
    pub fn with_script(mut self, script: Vec<TokenId>) -> Self {
        self.script = script;
        self
    }

    pub fn with_text_script(self, text: &str) -> Self {
        self.with_script(bytes_to_tokens(text.as_bytes()))
    }

    /// Makes the eval call with this index (0-based) fail.
    pub fn failing_on_eval(mut self, call: usize) -> Self {
        self.fail_on_eval = Some(call);
        self
    }

    pub fn log_handle(&self) -> Rc<RefCell<CallLog>> {
        Rc::clone(&self.log)
    }
}

pub fn bytes_to_tokens(bytes: &[u8]) -> Vec<TokenId> {
    bytes.iter().map(|&b| b as TokenId).collect()
}

impl Llm for ScriptedLlm {
    fn tokenize(&self, text: &str, add_bos_token: bool) -> Result<Vec<TokenId>> {
        let mut tokens = Vec::with_capacity(text.len() + 1);
        if add_bos_token {
            tokens.push(BOS);
        }
        tokens.extend(bytes_to_tokens(text.as_bytes()));
        Ok(tokens)
    }

    fn detokenize(&mut self, id: TokenId) -> &[u8] {
        self.scratch.clear();
        if (0..256).contains(&id) {
            self.scratch.push(id as u8);
        }
        &self.scratch
    }

    fn eos_token(&self) -> TokenId {
        EOS
    }

    fn bos_token(&self) -> TokenId {
        BOS
    }

    fn vocab_size(&self) -> usize {
        VOCAB_SIZE
    }

    fn context_length(&self) -> usize {
        self.context_length
    }

    fn architecture(&self) -> &str {
        "scripted"
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
        let last_n = params.resolved_last_n(self.context_length);
        self.log.borrow_mut().sampled_history.push(history.recent(last_n));
        let token = self.script.get(self.cursor).copied().unwrap_or(EOS);
        self.cursor += 1;
        token
    }

    fn eval(&mut self, tokens: &[TokenId], _threads: usize, n_past: usize) -> Result<()> {
        let call = {
            let mut log = self.log.borrow_mut();
            log.evals.push((tokens.to_vec(), n_past));
            log.evals.len() - 1
        };
        if self.fail_on_eval == Some(call) {
            return Err(LlmError::Eval { status: 1 });
        }
        let end = (n_past + tokens.len()) as f32;
        self.logits.iter_mut().for_each(|l| *l = end);
        self.embeddings = vec![n_past as f32, tokens.len() as f32];
        Ok(())
    }
}

pub fn scripted_constructor(_path: &Path, config: &Config) -> Result<Box<dyn Llm>> {
    let context_length = if config.context_length > 0 {
        config.context_length as usize
    } else {
        512
    };
    Ok(Box::new(ScriptedLlm::new(context_length).with_text_script("ok")))
}
