// Command-line front end shared by the `llm_cli` binary.

use clap::Parser;
use log::info;
use std::error::Error;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use crate::config::{Config, GenerationConfig};
use crate::error::LlmError;
use crate::registry::Registry;
use crate::session::LlmSession;
use crate::text_generator::{self, TextGeneratorError};
use crate::tokenizer::TokenizerWrapper;

#[derive(Parser, Debug)]
#[command(author, version, about = "Run text generation through a pluggable LLM backend", long_about = None)]
pub struct CliArgs {
    /// Model file, or a directory containing one
    #[arg(long)]
    pub model_path: PathBuf,
    /// Backend name; inferred from config.json or the file extension when omitted
    #[arg(long)]
    pub model_type: Option<String>,
    /// HuggingFace tokenizer.json to use instead of the model vocabulary
    #[arg(long)]
    pub tokenizer_path: Option<PathBuf>,
    /// Prompt to complete; reads prompts from stdin when omitted
    #[arg(long)]
    pub prompt: Option<String>,

    /// JSON file with load-time settings
    #[arg(long)]
    pub load_config: Option<PathBuf>,
    /// JSON file with generation settings
    #[arg(long)]
    pub generation_config: Option<PathBuf>,

    #[arg(long, allow_negative_numbers = true)]
    pub context_length: Option<i32>,
    #[arg(long)]
    pub gpu_layers: Option<i32>,
    #[arg(long)]
    pub no_mmap: bool,
    #[arg(long)]
    pub mlock: bool,
    #[arg(long, allow_negative_numbers = true)]
    pub threads: Option<i32>,

    #[arg(long)]
    pub max_new_tokens: Option<usize>,
    #[arg(long)]
    pub top_k: Option<i32>,
    #[arg(long)]
    pub top_p: Option<f32>,
    #[arg(long)]
    pub temperature: Option<f32>,
    #[arg(long)]
    pub repetition_penalty: Option<f32>,
    #[arg(long, allow_negative_numbers = true)]
    pub last_n_tokens: Option<i32>,
    #[arg(long, allow_negative_numbers = true)]
    pub seed: Option<i32>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Stop sequence; may be repeated
    #[arg(long)]
    pub stop: Vec<String>,
    /// Print text as it is generated
    #[arg(long)]
    pub stream: bool,
}

#[derive(Debug)]
pub enum RuntimeError {
    Llm(LlmError),
    TextGenerator(TextGeneratorError),
    Io(io::Error),
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeError::Llm(e) => write!(f, "LLM error: {}", e),
            RuntimeError::TextGenerator(e) => write!(f, "Generation error: {}", e),
            RuntimeError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl Error for RuntimeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            RuntimeError::Llm(e) => Some(e),
            RuntimeError::TextGenerator(e) => Some(e),
            RuntimeError::Io(e) => Some(e),
        }
    }
}

impl From<LlmError> for RuntimeError {
    fn from(err: LlmError) -> Self {
        RuntimeError::Llm(err)
    }
}
impl From<TextGeneratorError> for RuntimeError {
    fn from(err: TextGeneratorError) -> Self {
        RuntimeError::TextGenerator(err)
    }
}
impl From<io::Error> for RuntimeError {
    fn from(err: io::Error) -> Self {
        RuntimeError::Io(err)
    }
}

/// Merges optional JSON config files with command-line overrides.
pub fn build_configs(args: &CliArgs) -> Result<(Config, GenerationConfig), RuntimeError> {
    let mut config = match &args.load_config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(v) = args.context_length {
        config.context_length = v;
    }
    if let Some(v) = args.gpu_layers {
        config.gpu_layers = v;
    }
    if args.no_mmap {
        config.mmap = false;
    }
    if args.mlock {
        config.mlock = true;
    }
    if let Some(v) = args.threads {
        config.threads = v;
    }

    let mut gen = match &args.generation_config {
        Some(path) => GenerationConfig::load(path)?,
        None => GenerationConfig::default(),
    };
    if let Some(v) = args.max_new_tokens {
        gen.max_new_tokens = v;
    }
    if let Some(v) = args.top_k {
        gen.top_k = v;
    }
    if let Some(v) = args.top_p {
        gen.top_p = v;
    }
    if let Some(v) = args.temperature {
        gen.temperature = v;
    }
    if let Some(v) = args.repetition_penalty {
        gen.repetition_penalty = v;
    }
    if let Some(v) = args.last_n_tokens {
        gen.last_n_tokens = v;
    }
    if let Some(v) = args.seed {
        gen.seed = v;
    }
    if let Some(v) = args.batch_size {
        gen.batch_size = v;
    }
    if let Some(v) = args.threads {
        gen.threads = v;
    }
    gen.stop.extend(args.stop.iter().cloned());

    Ok((config, gen))
}

fn run_prompt(
    session: &mut LlmSession,
    prompt: &str,
    gen: &GenerationConfig,
    stream: bool,
    out: &mut impl Write,
) -> Result<(), RuntimeError> {
    if stream {
        for chunk in text_generator::stream(session, prompt, gen)? {
            write!(out, "{}", chunk?)?;
            out.flush()?;
        }
        writeln!(out)?;
    } else {
        let text = text_generator::complete(session, prompt, gen)?;
        writeln!(out, "{}", text)?;
    }
    Ok(())
}

pub fn run_cli() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if let Err(e) = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init() {
        eprintln!("Failed to install logger: {}", e);
    }

    let args = CliArgs::parse();
    let (config, gen) = build_configs(&args)?;

    let registry = Registry::default();
    info!("Available backends: {:?}", registry.model_types());
    let mut session = registry
        .from_pretrained(&args.model_path, args.model_type.as_deref(), &config)
        .map_err(RuntimeError::from)?;
    if let Some(path) = &args.tokenizer_path {
        session = session.with_tokenizer(TokenizerWrapper::new(path).map_err(RuntimeError::from)?);
    }
    info!(
        "Model ready: architecture={}, context_length={}, vocab_size={}",
        session.architecture(),
        session.context_length(),
        session.vocab_size()
    );

    let stdout = io::stdout();
    let mut out = stdout.lock();

    if let Some(prompt) = &args.prompt {
        run_prompt(&mut session, prompt, &gen, args.stream, &mut out)?;
        return Ok(());
    }

    let stdin = io::stdin();
    loop {
        write!(out, "> ")?;
        out.flush()?;
        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if prompt == "exit" || prompt == "quit" {
            break;
        }
        run_prompt(&mut session, prompt, &gen, args.stream, &mut out)?;
    }
    Ok(())
}
