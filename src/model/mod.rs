//! The language model collaborator: tokenizer, GPT-2 weights and the
//! encode / generate / decode surface the chat pipeline is written against.

pub mod gpt2;
pub mod loader;
mod tokenizer;

pub use gpt2::{Cache, Gpt2, Gpt2Config};
pub use loader::{Gpt2LanguageModel, ModelFiles};
pub use tokenizer::TextTokenizer;

use crate::Result;

/// Surface form of GPT-2's end-of-sequence marker.
pub const GPT2_EOS_TOKEN: &str = "<|endoftext|>";

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    /// Maximum length of the returned sequence, prompt included.
    pub max_length: usize,
    /// Filler for positions past the end of a finished sequence. A single
    /// sequence stops at EOS and is never padded.
    pub pad_token_id: u32,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
    pub seed: u64,
}

impl GenerationParams {
    pub fn greedy(max_length: usize, pad_token_id: u32) -> Self {
        Self {
            max_length,
            pad_token_id,
            temperature: None,
            top_p: None,
            seed: 0,
        }
    }
}

/// A loaded causal language model and its tokenizer.
///
/// Implementations are shared read-only across requests, so every method
/// takes `&self` and must not carry state from one call to the next.
pub trait LanguageModel: Send + Sync {
    fn eos_token(&self) -> &str;

    fn eos_token_id(&self) -> u32;

    fn encode(&self, text: &str) -> Result<Vec<u32>>;

    /// Returns the input followed by the newly generated tokens.
    fn generate(&self, input: &[u32], params: &GenerationParams) -> Result<Vec<u32>>;

    fn decode(&self, tokens: &[u32], skip_special_tokens: bool) -> Result<String>;
}
