use crate::{Error, Result};
use std::path::Path;
use tokenizers::{
    AddedToken, DecoderWrapper, ModelWrapper, NormalizerWrapper, PostProcessorWrapper,
    PreTokenizerWrapper, Tokenizer, TokenizerBuilder, models::bpe::BPE,
    pre_tokenizers::byte_level::ByteLevel,
};
use tracing::debug;

/// Byte-level BPE tokenizer with a known end-of-sequence token.
#[derive(Debug, Clone)]
pub struct TextTokenizer {
    inner: Tokenizer,
    eos_token: String,
    eos_token_id: u32,
}

impl TextTokenizer {
    /// Loads a serialized `tokenizer.json`.
    pub fn from_json(path: &Path, eos_token: &str) -> Result<Self> {
        debug!("Loading tokenizer from {}", path.display());
        let inner = Tokenizer::from_file(path)
            .map_err(|e| Error::tokenizer(format!("{}: {}", path.display(), e)))?;
        Self::with_eos(inner, eos_token)
    }

    /// Builds a GPT-2 style tokenizer from `vocab.json` and `merges.txt`.
    pub fn from_vocab_merges(vocab: &Path, merges: &Path, eos_token: &str) -> Result<Self> {
        debug!(
            "Building tokenizer from {} and {}",
            vocab.display(),
            merges.display()
        );
        let bpe = BPE::from_file(&vocab.to_string_lossy(), &merges.to_string_lossy())
            .build()
            .map_err(|e| Error::tokenizer(format!("failed to build BPE model: {}", e)))?;

        let tokenizer = TokenizerBuilder::<
            ModelWrapper,
            NormalizerWrapper,
            PreTokenizerWrapper,
            PostProcessorWrapper,
            DecoderWrapper,
        >::new()
        .with_model(bpe.into())
        .with_pre_tokenizer(Some(ByteLevel::new(false, true, true).into()))
        .with_decoder(Some(ByteLevel::default().into()))
        .build()
        .map_err(|e| Error::tokenizer(format!("failed to assemble tokenizer: {}", e)))?;

        let mut inner = Tokenizer::from(tokenizer);
        inner.add_special_tokens(&[AddedToken::from(eos_token.to_string(), true)]);

        Self::with_eos(inner, eos_token)
    }

    fn with_eos(inner: Tokenizer, eos_token: &str) -> Result<Self> {
        let eos_token_id = inner.token_to_id(eos_token).ok_or_else(|| {
            Error::tokenizer(format!("end-of-sequence token {} is not in the vocabulary", eos_token))
        })?;

        Ok(Self {
            inner,
            eos_token: eos_token.to_string(),
            eos_token_id,
        })
    }

    pub fn eos_token(&self) -> &str {
        &self.eos_token
    }

    pub fn eos_token_id(&self) -> u32 {
        self.eos_token_id
    }

    pub fn vocab_size(&self) -> usize {
        self.inner.get_vocab_size(true)
    }

    pub fn encode(&self, text: &str) -> Result<Vec<u32>> {
        let encoding = self
            .inner
            .encode(text, false)
            .map_err(|e| Error::tokenizer(format!("encode failed: {}", e)))?;
        Ok(encoding.get_ids().to_vec())
    }

    pub fn decode(&self, tokens: &[u32], skip_special_tokens: bool) -> Result<String> {
        self.inner
            .decode(tokens, skip_special_tokens)
            .map_err(|e| Error::tokenizer(format!("decode failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::GPT2_EOS_TOKEN;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_tiny_bpe(dir: &TempDir) -> (std::path::PathBuf, std::path::PathBuf) {
        let vocab = dir.path().join("vocab.json");
        let merges = dir.path().join("merges.txt");
        std::fs::write(
            &vocab,
            r#"{"h": 0, "i": 1, "hi": 2, "Ġ": 3, "Ġhi": 4, "<|endoftext|>": 5}"#,
        )
        .unwrap();
        std::fs::write(&merges, "#version: 0.2\nh i\nĠ hi\n").unwrap();
        (vocab, merges)
    }

    #[test]
    fn test_vocab_merges_registers_eos() {
        let dir = TempDir::new().unwrap();
        let (vocab, merges) = write_tiny_bpe(&dir);

        let tokenizer = TextTokenizer::from_vocab_merges(&vocab, &merges, GPT2_EOS_TOKEN).unwrap();

        assert_eq!(tokenizer.eos_token(), "<|endoftext|>");
        assert_eq!(tokenizer.eos_token_id(), 5);
    }

    #[test]
    fn test_encode_splits_out_eos_marker() {
        let dir = TempDir::new().unwrap();
        let (vocab, merges) = write_tiny_bpe(&dir);
        let tokenizer = TextTokenizer::from_vocab_merges(&vocab, &merges, GPT2_EOS_TOKEN).unwrap();

        let ids = tokenizer.encode("hi hi<|endoftext|>").unwrap();

        assert_eq!(ids, vec![2, 4, 5]);
    }

    #[test]
    fn test_decode_skips_special_tokens() {
        let dir = TempDir::new().unwrap();
        let (vocab, merges) = write_tiny_bpe(&dir);
        let tokenizer = TextTokenizer::from_vocab_merges(&vocab, &merges, GPT2_EOS_TOKEN).unwrap();

        assert_eq!(tokenizer.decode(&[2, 4, 5], true).unwrap(), "hi hi");
        assert_eq!(tokenizer.decode(&[5], true).unwrap(), "");
    }

    #[test]
    fn test_eos_missing_from_vocab_is_added() {
        let dir = TempDir::new().unwrap();
        let vocab = dir.path().join("vocab.json");
        let merges = dir.path().join("merges.txt");
        std::fs::write(&vocab, r#"{"a": 0}"#).unwrap();
        std::fs::write(&merges, "#version: 0.2\n").unwrap();

        let tokenizer = TextTokenizer::from_vocab_merges(&vocab, &merges, GPT2_EOS_TOKEN).unwrap();

        assert_eq!(tokenizer.eos_token_id(), 1);
    }

    #[test]
    fn test_missing_tokenizer_json() {
        let dir = TempDir::new().unwrap();

        let err = TextTokenizer::from_json(&dir.path().join("tokenizer.json"), GPT2_EOS_TOKEN)
            .unwrap_err();

        assert!(matches!(err, Error::Tokenizer(_)));
    }
}
