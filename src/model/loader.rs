use super::{
    GPT2_EOS_TOKEN, GenerationParams, LanguageModel, TextTokenizer,
    gpt2::{Gpt2, Gpt2Config},
};
use crate::{
    Error, Result,
    config::{DeviceKind, ModelConfig, Precision},
};
use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use hf_hub::{
    Repo, RepoType,
    api::sync::{ApiBuilder, ApiRepo},
};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq)]
pub enum TokenizerFiles {
    Json(PathBuf),
    VocabMerges { vocab: PathBuf, merges: PathBuf },
}

#[derive(Debug, Clone, PartialEq)]
pub enum WeightsFile {
    SafeTensors(PathBuf),
    Pytorch(PathBuf),
}

/// Locations of everything needed to build a [`Gpt2LanguageModel`].
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: TokenizerFiles,
    pub weights: WeightsFile,
}

impl ModelFiles {
    /// Resolves model files inside a local directory.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let require = |name: &str| -> Result<PathBuf> {
            let path = dir.join(name);
            if path.is_file() {
                Ok(path)
            } else {
                Err(Error::model_load(format!(
                    "{} not found in {}",
                    name,
                    dir.display()
                )))
            }
        };

        let config = require("config.json")?;

        let tokenizer = match require("tokenizer.json") {
            Ok(path) => TokenizerFiles::Json(path),
            Err(_) => TokenizerFiles::VocabMerges {
                vocab: require("vocab.json")?,
                merges: require("merges.txt")?,
            },
        };

        let weights = match require("model.safetensors") {
            Ok(path) => WeightsFile::SafeTensors(path),
            Err(_) => WeightsFile::Pytorch(require("pytorch_model.bin")?),
        };

        Ok(Self {
            config,
            tokenizer,
            weights,
        })
    }

    /// Downloads (or reuses cached) model files from the Hugging Face Hub.
    pub fn from_hub(config: &ModelConfig) -> Result<Self> {
        info!(
            "Fetching {} (revision {}) from the Hugging Face Hub",
            config.model_id, config.revision
        );

        let mut builder = ApiBuilder::new().with_progress(false);
        if let Some(cache_dir) = &config.cache_dir {
            builder = builder.with_cache_dir(PathBuf::from(cache_dir));
        }
        let api = builder
            .build()
            .map_err(|e| Error::model_load(format!("failed to create hub client: {}", e)))?;
        let repo = api.repo(Repo::with_revision(
            config.model_id.clone(),
            RepoType::Model,
            config.revision.clone(),
        ));

        let config_path = fetch(&repo, "config.json")?;

        let tokenizer = match fetch(&repo, "tokenizer.json") {
            Ok(path) => TokenizerFiles::Json(path),
            Err(e) => {
                debug!("Falling back to vocab.json/merges.txt: {}", e);
                TokenizerFiles::VocabMerges {
                    vocab: fetch(&repo, "vocab.json")?,
                    merges: fetch(&repo, "merges.txt")?,
                }
            }
        };

        let weights = match fetch(&repo, "model.safetensors") {
            Ok(path) => WeightsFile::SafeTensors(path),
            Err(e) => {
                debug!("Falling back to pytorch_model.bin: {}", e);
                WeightsFile::Pytorch(fetch(&repo, "pytorch_model.bin")?)
            }
        };

        Ok(Self {
            config: config_path,
            tokenizer,
            weights,
        })
    }
}

fn fetch(repo: &ApiRepo, name: &str) -> Result<PathBuf> {
    repo.get(name)
        .map_err(|e| Error::model_load(format!("failed to fetch {}: {}", name, e)))
}

fn select_device(kind: DeviceKind) -> Result<Device> {
    let device = match kind {
        DeviceKind::Cpu => Device::Cpu,
        DeviceKind::Cuda => Device::new_cuda(0)?,
        DeviceKind::Metal => Device::new_metal(0)?,
    };
    Ok(device)
}

fn select_dtype(precision: Precision) -> DType {
    match precision {
        Precision::F32 => DType::F32,
        Precision::F16 => DType::F16,
        Precision::Bf16 => DType::BF16,
    }
}

/// GPT-2 weights plus tokenizer: the process-wide model handle.
#[derive(Debug)]
pub struct Gpt2LanguageModel {
    model: Gpt2,
    tokenizer: TextTokenizer,
}

impl Gpt2LanguageModel {
    /// Resolves files from `local_dir` when set, otherwise from the Hub, and
    /// loads them. Every failure is reported as [`Error::ModelLoad`].
    pub fn load(config: &ModelConfig) -> Result<Self> {
        let files = match &config.local_dir {
            Some(dir) => ModelFiles::from_dir(Path::new(dir))?,
            None => ModelFiles::from_hub(config)?,
        };

        Self::from_files(&files, config.device, config.dtype).map_err(Error::into_model_load)
    }

    pub fn from_files(files: &ModelFiles, device: DeviceKind, precision: Precision) -> Result<Self> {
        let device = select_device(device)?;
        let dtype = select_dtype(precision);

        let config_str = std::fs::read_to_string(&files.config)?;
        let gpt2_config: Gpt2Config = serde_json::from_str(&config_str)?;
        debug!(?gpt2_config, "Parsed model config");

        let tokenizer = match &files.tokenizer {
            TokenizerFiles::Json(path) => TextTokenizer::from_json(path, GPT2_EOS_TOKEN)?,
            TokenizerFiles::VocabMerges { vocab, merges } => {
                TextTokenizer::from_vocab_merges(vocab, merges, GPT2_EOS_TOKEN)?
            }
        };
        if let Some(eos) = gpt2_config.eos_token_id {
            if eos != tokenizer.eos_token_id() {
                return Err(Error::model_load(format!(
                    "model eos_token_id {} does not match tokenizer id {}",
                    eos,
                    tokenizer.eos_token_id()
                )));
            }
        }

        let vb = match &files.weights {
            WeightsFile::SafeTensors(path) => {
                // SAFETY: the file is memory mapped read-only and is not
                // modified while the process runs.
                unsafe { VarBuilder::from_mmaped_safetensors(&[path], dtype, &device)? }
            }
            WeightsFile::Pytorch(path) => VarBuilder::from_pth(path, dtype, &device)?,
        };
        let model = Gpt2::load(&gpt2_config, vb)?;

        info!(
            "Model loaded: {} layers, {} embedding dims, vocabulary of {} tokens on {:?}",
            gpt2_config.n_layer,
            gpt2_config.n_embd,
            tokenizer.vocab_size(),
            device
        );

        Ok(Self { model, tokenizer })
    }
}

impl LanguageModel for Gpt2LanguageModel {
    fn eos_token(&self) -> &str {
        self.tokenizer.eos_token()
    }

    fn eos_token_id(&self) -> u32 {
        self.tokenizer.eos_token_id()
    }

    fn encode(&self, text: &str) -> Result<Vec<u32>> {
        self.tokenizer.encode(text)
    }

    fn generate(&self, input: &[u32], params: &GenerationParams) -> Result<Vec<u32>> {
        let tokens = self
            .model
            .generate(input, params, self.tokenizer.eos_token_id())?;
        Ok(tokens)
    }

    fn decode(&self, tokens: &[u32], skip_special_tokens: bool) -> Result<String> {
        self.tokenizer.decode(tokens, skip_special_tokens)
    }
}
