use log::{debug, warn};

use crate::config::GenerationConfig;
use crate::error::LlmError;
use crate::llm::{SampleParams, TokenId};
use crate::session::LlmSession;

#[derive(Debug)]
pub enum TextGeneratorError {
    Llm(LlmError),
    InvalidInput(String),
}

impl std::fmt::Display for TextGeneratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextGeneratorError::Llm(e) => write!(f, "Model error: {}", e),
            TextGeneratorError::InvalidInput(s) => write!(f, "Invalid input: {}", s),
        }
    }
}

impl std::error::Error for TextGeneratorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TextGeneratorError::Llm(ref e) => Some(e),
            _ => None,
        }
    }
}

impl From<LlmError> for TextGeneratorError {
    fn from(err: LlmError) -> TextGeneratorError {
        TextGeneratorError::Llm(err)
    }
}

pub type Result<T> = std::result::Result<T, TextGeneratorError>;

/// Yields sampled tokens until EOS. Each yielded token has already been evaluated.
pub struct TokenStream<'a> {
    session: &'a mut LlmSession,
    params: SampleParams,
    batch_size: usize,
    threads: usize,
    done: bool,
}

impl Iterator for TokenStream<'_> {
    type Item = Result<TokenId>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let token = self.session.sample(&self.params);
        if self.session.is_eos_token(token) {
            debug!("EOS token {} sampled", token);
            self.done = true;
            return None;
        }
        if let Err(e) = self.session.eval(&[token], self.batch_size, self.threads) {
            self.done = true;
            return Some(Err(e.into()));
        }
        Some(Ok(token))
    }
}

/// Evaluates `prompt_tokens` and returns an iterator over the generated tokens.
pub fn generate<'a>(
    session: &'a mut LlmSession,
    prompt_tokens: &[TokenId],
    config: &GenerationConfig,
) -> Result<TokenStream<'a>> {
    if prompt_tokens.is_empty() {
        return Err(TextGeneratorError::InvalidInput(
            "Prompt tokens cannot be empty.".to_string(),
        ));
    }

    if config.reset {
        session.reset();
    }

    // Without a reset the prompt continues after the tokens already in the context.
    let available = session.context_length().saturating_sub(session.n_past());
    if available == 0 {
        return Err(TextGeneratorError::InvalidInput(format!(
            "No room left in the context ({} tokens already evaluated); reset the session.",
            session.n_past()
        )));
    }
    let prompt_tokens = if prompt_tokens.len() > available {
        warn!(
            "Number of tokens ({}) exceeded the remaining context ({} of {}); keeping the last {}",
            prompt_tokens.len(),
            available,
            session.context_length(),
            available
        );
        &prompt_tokens[prompt_tokens.len() - available..]
    } else {
        prompt_tokens
    };

    let threads = config.resolved_threads();
    session.eval(prompt_tokens, config.batch_size, threads)?;

    Ok(TokenStream {
        session,
        params: config.sample_params(),
        batch_size: config.batch_size,
        threads,
        done: false,
    })
}

/// Yields decoded text chunks, honouring stop sequences and `max_new_tokens`.
pub struct TextStream<'a> {
    tokens: TokenStream<'a>,
    stop: Vec<String>,
    max_new_tokens: usize,
    count: usize,
    text: String,
    incomplete: Vec<u8>,
    // External tokenizers decode the whole sequence so inter-token spacing survives.
    generated: Vec<TokenId>,
    decoded: String,
    finished: bool,
}

impl TextStream<'_> {
    fn push_token(&mut self, token: TokenId) -> Result<()> {
        let session = &mut self.tokens.session;
        if !session.has_external_tokenizer() {
            let bytes = session.detokenize_bytes(&[token])?;
            self.incomplete.extend_from_slice(&bytes);
            let complete = take_complete_utf8(&mut self.incomplete);
            self.text.push_str(&complete);
            return Ok(());
        }

        self.generated.push(token);
        let full = session.detokenize(&self.generated)?;
        // A trailing replacement char is a byte sequence still waiting for its continuation.
        if full.ends_with(char::REPLACEMENT_CHARACTER) {
            return Ok(());
        }
        match full.strip_prefix(self.decoded.as_str()) {
            Some(suffix) => self.text.push_str(suffix),
            None => debug!("decoder rewrote already emitted text; skipping the difference"),
        }
        self.decoded = full;
        Ok(())
    }

    fn finish(&mut self) -> Option<Result<String>> {
        self.finished = true;
        self.incomplete.clear();
        if self.text.is_empty() {
            None
        } else {
            Some(Ok(std::mem::take(&mut self.text)))
        }
    }
}

impl Iterator for TextStream<'_> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.finished {
                return self.finish();
            }

            let token = match self.tokens.next() {
                None => return self.finish(),
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                Some(Ok(token)) => token,
            };

            if let Err(e) = self.push_token(token) {
                self.finished = true;
                return Some(Err(e));
            }

            self.count += 1;
            if self.count >= self.max_new_tokens {
                self.finished = true;
            }

            if let Some(pos) = find_stop(&self.text, &self.stop) {
                self.text.truncate(pos);
                return self.finish();
            }

            // Hold back text that may still grow into a stop sequence.
            let end = self.text.len() - longest_stop_prefix_suffix(&self.text, &self.stop);
            if end > 0 {
                let chunk: String = self.text.drain(..end).collect();
                return Some(Ok(chunk));
            }
        }
    }
}

pub fn stream<'a>(
    session: &'a mut LlmSession,
    prompt: &str,
    config: &GenerationConfig,
) -> Result<TextStream<'a>> {
    let prompt_tokens = session.tokenize(prompt, true)?;
    let stop: Vec<String> = config.stop.iter().filter(|s| !s.is_empty()).cloned().collect();
    let tokens = generate(session, &prompt_tokens, config)?;
    Ok(TextStream {
        tokens,
        stop,
        max_new_tokens: config.max_new_tokens,
        count: 0,
        text: String::new(),
        incomplete: Vec::new(),
        generated: Vec::new(),
        decoded: String::new(),
        finished: config.max_new_tokens == 0,
    })
}

/// Runs `stream` to completion and returns the whole generated text.
pub fn complete(session: &mut LlmSession, prompt: &str, config: &GenerationConfig) -> Result<String> {
    let mut output = String::new();
    for chunk in stream(session, prompt, config)? {
        output.push_str(&chunk?);
    }
    Ok(output)
}

/// Drains the decodable prefix of `buf`, leaving a trailing partial character in place.
/// Invalid byte sequences are dropped.
fn take_complete_utf8(buf: &mut Vec<u8>) -> String {
    let mut out = String::new();
    loop {
        match std::str::from_utf8(&buf[..]) {
            Ok(s) => {
                out.push_str(s);
                buf.clear();
                return out;
            }
            Err(e) => {
                let valid = e.valid_up_to();
                // Bytes up to valid_up_to are valid UTF-8 by definition.
                out.push_str(&String::from_utf8_lossy(&buf[..valid]));
                match e.error_len() {
                    None => {
                        buf.drain(..valid);
                        return out;
                    }
                    Some(len) => {
                        buf.drain(..valid + len);
                    }
                }
            }
        }
    }
}

fn find_stop(text: &str, stop: &[String]) -> Option<usize> {
    stop.iter().filter_map(|s| text.find(s.as_str())).min()
}

fn longest_stop_prefix_suffix(text: &str, stop: &[String]) -> usize {
    let mut longest = 0;
    for s in stop {
        for i in (1..=s.len()).rev() {
            if s.is_char_boundary(i) && text.ends_with(&s[..i]) {
                longest = longest.max(i);
                break;
            }
        }
    }
    longest
}
