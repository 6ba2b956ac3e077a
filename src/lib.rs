//! A pluggable `Llm` interface with a llama.cpp backend.
//!
//! ```rust,ignore
//! use rust_llm_bridge::{complete, Config, GenerationConfig, Registry};
//!
//! let mut session = Registry::default().from_pretrained("models/7b".as_ref(), None, &Config::default())?;
//! let text = complete(&mut session, "Once upon a time", &GenerationConfig::default())?;
//! ```

pub mod config;
pub mod error;
#[cfg(feature = "llama")]
pub mod llama;
pub mod llm;
pub mod registry;
pub mod ring_buffer;
pub mod runtime_interface;
pub mod session;
pub mod text_generator;
pub mod tokenizer;

pub use config::{Config, GenerationConfig};
pub use error::LlmError;
pub use llm::{Llm, SampleParams, TokenId};
pub use registry::Registry;
pub use ring_buffer::RingBuffer;
pub use session::LlmSession;
pub use text_generator::{complete, generate, stream, TextGeneratorError};
