mod common;

use std::collections::HashSet;
use std::path::PathBuf;

use common::{ScriptedLlm, BOS, EOS};
use rust_llm_bridge::tokenizer::TokenizerWrapper;
use rust_llm_bridge::{LlmError, LlmSession, SampleParams};

fn batch_shapes(log: &common::CallLog) -> Vec<(usize, usize)> {
    log.evals.iter().map(|(tokens, n_past)| (tokens.len(), *n_past)).collect()
}

#[test]
fn test_eval_splits_into_batches_and_tracks_n_past() {
    let llm = ScriptedLlm::new(16);
    let log = llm.log_handle();
    let mut session = LlmSession::new(Box::new(llm));

    let tokens: Vec<i32> = (1..=10).collect();
    session.eval(&tokens, 4, 1).expect("eval succeeds");

    assert_eq!(batch_shapes(&log.borrow()), vec![(4, 0), (4, 4), (2, 8)]);
    assert_eq!(session.n_past(), 10);
    assert_eq!(session.history().len(), 10);
    assert_eq!(session.history().recent(2), HashSet::from([9, 10]));
}

#[test]
fn test_batch_size_is_clamped_to_context_length() {
    let llm = ScriptedLlm::new(3);
    let log = llm.log_handle();
    let mut session = LlmSession::new(Box::new(llm));

    session.eval(&[1, 2, 3, 4, 5, 6, 7], 8, 1).expect("eval succeeds");
    assert_eq!(batch_shapes(&log.borrow()), vec![(3, 0), (3, 3), (1, 6)]);

    log.borrow_mut().evals.clear();
    session.reset();
    session.eval(&[1, 2], 0, 1).expect("eval succeeds");
    assert_eq!(batch_shapes(&log.borrow()), vec![(1, 0), (1, 1)]);
}

#[test]
fn test_failed_batch_stops_evaluation() {
    let llm = ScriptedLlm::new(32).failing_on_eval(1);
    let log = llm.log_handle();
    let mut session = LlmSession::new(Box::new(llm));

    let result = session.eval(&[1, 2, 3, 4, 5, 6], 2, 1);
    assert!(matches!(result, Err(LlmError::Eval { status: 1 })));
    assert_eq!(log.borrow().evals.len(), 2);
    assert_eq!(session.n_past(), 2);
    assert_eq!(session.history().len(), 2);
}

#[test]
fn test_reset_clears_history_and_position() {
    let mut session = LlmSession::new(Box::new(ScriptedLlm::new(8)));
    session.eval(&[5, 6, 7], 8, 1).expect("eval succeeds");
    session.reset();
    assert_eq!(session.n_past(), 0);
    assert!(session.history().is_empty());
}

#[test]
fn test_history_is_bounded_by_context_length() {
    let mut session = LlmSession::new(Box::new(ScriptedLlm::new(4)));
    session.eval(&[1, 2, 3, 4, 5, 6], 2, 1).expect("eval succeeds");
    assert_eq!(session.history().capacity(), 4);
    assert_eq!(session.history().recent(10), HashSet::from([3, 4, 5, 6]));
}

#[test]
fn test_sample_receives_session_history() {
    let llm = ScriptedLlm::new(8).with_script(vec![42]);
    let log = llm.log_handle();
    let mut session = LlmSession::new(Box::new(llm));
    session.eval(&[1, 2, 3], 8, 1).expect("eval succeeds");

    let params = SampleParams {
        last_n_tokens: 2,
        ..SampleParams::default()
    };
    assert_eq!(session.sample(&params), 42);
    assert_eq!(log.borrow().sampled_history[0], HashSet::from([2, 3]));

    // Negative window covers the whole context.
    let params = SampleParams {
        last_n_tokens: -1,
        ..SampleParams::default()
    };
    assert_eq!(session.sample(&params), EOS);
    assert_eq!(log.borrow().sampled_history[1], HashSet::from([1, 2, 3]));
}

#[test]
fn test_tokenize_detokenize_round_trip() {
    let mut session = LlmSession::new(Box::new(ScriptedLlm::new(64)));
    let tokens = session.tokenize("hello", true).expect("tokenize");
    assert_eq!(tokens[0], BOS);
    assert_eq!(session.detokenize(&tokens).expect("detokenize"), "hello");
}

#[test]
fn test_detokenize_out_of_range_is_empty() {
    let mut session = LlmSession::new(Box::new(ScriptedLlm::new(64)));
    let vocab = session.vocab_size() as i32;
    assert_eq!(session.detokenize(&[vocab]).expect("detokenize"), "");
    assert_eq!(session.detokenize(&[vocab + 100, -1]).expect("detokenize"), "");
    assert_eq!(session.detokenize(&[104, vocab, 105]).expect("detokenize"), "hi");
}

#[test]
fn test_detokenize_keeps_multibyte_characters_across_tokens() {
    let mut session = LlmSession::new(Box::new(ScriptedLlm::new(64)));
    let tokens = session.tokenize("naïve €", false).expect("tokenize");
    assert!(tokens.len() > "naïve €".chars().count());
    assert_eq!(session.detokenize(&tokens).expect("detokenize"), "naïve €");
}

#[test]
fn test_eos_metadata_is_consistent() {
    let session = LlmSession::new(Box::new(ScriptedLlm::new(8)));
    assert_eq!(session.eos_token(), EOS);
    assert_eq!(session.bos_token(), BOS);
    assert!(session.is_eos_token(session.eos_token()));
    assert!(!session.is_eos_token(session.bos_token()));
    assert_eq!(session.architecture(), "scripted");
}

#[test]
fn test_logits_are_mutable_through_the_session() {
    let mut session = LlmSession::new(Box::new(ScriptedLlm::new(8)));
    session.eval(&[1, 2], 8, 1).expect("eval succeeds");
    approx::assert_abs_diff_eq!(session.logits()[0], 2.0);

    session.logits_mut()[7] = -3.5;
    approx::assert_abs_diff_eq!(session.logits()[7], -3.5);
    assert_eq!(session.logits().len(), session.vocab_size());
}

#[test]
fn test_embed_resets_and_evaluates_with_bos() {
    let llm = ScriptedLlm::new(32);
    let log = llm.log_handle();
    let mut session = LlmSession::new(Box::new(llm));
    session.eval(&[9, 9, 9], 8, 1).expect("eval succeeds");

    let embedding = session.embed("abc", 8, 1).expect("embed");
    assert_eq!(embedding, vec![0.0, 4.0]);
    let last = log.borrow().evals.last().cloned().expect("eval logged");
    assert_eq!(last, (vec![BOS, 97, 98, 99], 0));
    assert_eq!(session.n_past(), 4);
}

#[test]
fn test_external_tokenizer_overrides_backend_vocabulary() {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/data/test_tokenizer.json");
    let tokenizer = TokenizerWrapper::new(&path).expect("fixture tokenizer loads");
    let mut session = LlmSession::new(Box::new(ScriptedLlm::new(8))).with_tokenizer(tokenizer);

    assert!(session.has_external_tokenizer());
    assert_eq!(session.tokenize("hello world", false).expect("tokenize"), vec![3, 4]);
    assert_eq!(session.detokenize(&[5, 6]).expect("detokenize"), "foo bar");
}
