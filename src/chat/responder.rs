use crate::{
    Result,
    config::GenerationConfig,
    model::{GenerationParams, LanguageModel},
};
use std::sync::Arc;
use tracing::debug;

/// Turns one user message into one model reply.
///
/// Holds nothing but the shared model handle and fixed generation settings,
/// so every call is independent of every other.
pub struct ChatResponder {
    model: Arc<dyn LanguageModel>,
    generation: GenerationConfig,
}

impl ChatResponder {
    pub fn new(model: Arc<dyn LanguageModel>, generation: GenerationConfig) -> Self {
        Self { model, generation }
    }

    pub fn generation_config(&self) -> &GenerationConfig {
        &self.generation
    }

    /// Encodes `message` followed by the end-of-sequence marker, generates a
    /// continuation and decodes only the newly produced tokens.
    ///
    /// Any failure is returned as [`crate::Error::Generation`]. The reply may
    /// be empty.
    pub fn respond(&self, message: &str) -> Result<String> {
        self.run_pipeline(message)
            .map_err(crate::Error::into_generation)
    }

    fn run_pipeline(&self, message: &str) -> Result<String> {
        let prompt = format!("{}{}", message, self.model.eos_token());
        let input = self.model.encode(&prompt)?;

        let params = GenerationParams {
            max_length: self.generation.max_length,
            pad_token_id: self.model.eos_token_id(),
            temperature: self.generation.temperature,
            top_p: self.generation.top_p,
            seed: self.generation.seed,
        };
        let output = self.model.generate(&input, &params)?;

        let generated = output.get(input.len()..).unwrap_or_default();
        debug!(
            prompt_tokens = input.len(),
            generated_tokens = generated.len(),
            "Generation finished"
        );

        self.model.decode(generated, true)
    }
}
