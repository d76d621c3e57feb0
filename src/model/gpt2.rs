//! GPT-2 decoder on candle.
//!
//! Weight layout follows the Hugging Face `GPT2LMHeadModel` checkpoints:
//! projections are stored as `Conv1D` (`[in, out]`, applied as `x @ W + b`)
//! and the LM head is tied to the token embedding.

use candle_core::{D, DType, Device, IndexOp, Module, Result, Tensor};
use candle_nn::{Activation, Embedding, LayerNorm, VarBuilder, embedding, layer_norm};
use candle_transformers::generation::LogitsProcessor;
use serde::Deserialize;
use tracing::trace;

use super::GenerationParams;

#[derive(Debug, Clone, Deserialize)]
pub struct Gpt2Config {
    pub vocab_size: usize,
    pub n_positions: usize,
    pub n_embd: usize,
    pub n_layer: usize,
    pub n_head: usize,
    #[serde(default)]
    pub n_inner: Option<usize>,
    #[serde(default = "default_layer_norm_epsilon")]
    pub layer_norm_epsilon: f64,
    #[serde(default = "default_activation")]
    pub activation_function: Activation,
    #[serde(default)]
    pub eos_token_id: Option<u32>,
}

fn default_layer_norm_epsilon() -> f64 {
    1e-5
}

fn default_activation() -> Activation {
    Activation::NewGelu
}

impl Gpt2Config {
    pub fn inner_dim(&self) -> usize {
        self.n_inner.unwrap_or(4 * self.n_embd)
    }
}

/// Per-generation key/value cache. One is created for every `generate`
/// call, so concurrent generations never share mutable buffers.
#[derive(Debug, Clone)]
pub struct Cache {
    kvs: Vec<Option<(Tensor, Tensor)>>,
    seq_len: usize,
}

impl Cache {
    pub fn new(n_layer: usize) -> Self {
        Self {
            kvs: vec![None; n_layer],
            seq_len: 0,
        }
    }

    /// Number of positions already processed.
    pub fn seq_len(&self) -> usize {
        self.seq_len
    }
}

#[derive(Debug, Clone)]
struct Conv1D {
    weight: Tensor,
    bias: Tensor,
}

impl Conv1D {
    fn load(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Self> {
        let weight = vb.get((in_dim, out_dim), "weight")?;
        let bias = vb.get(out_dim, "bias")?;
        Ok(Self { weight, bias })
    }
}

impl Module for Conv1D {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        xs.broadcast_matmul(&self.weight)?.broadcast_add(&self.bias)
    }
}

#[derive(Debug, Clone)]
struct Attention {
    c_attn: Conv1D,
    c_proj: Conv1D,
    n_head: usize,
    head_dim: usize,
    scale: f64,
}

impl Attention {
    fn load(config: &Gpt2Config, vb: VarBuilder) -> Result<Self> {
        let n_embd = config.n_embd;
        if n_embd % config.n_head != 0 {
            candle_core::bail!(
                "n_embd ({}) is not divisible by n_head ({})",
                n_embd,
                config.n_head
            );
        }
        let head_dim = n_embd / config.n_head;

        Ok(Self {
            c_attn: Conv1D::load(n_embd, 3 * n_embd, vb.pp("c_attn"))?,
            c_proj: Conv1D::load(n_embd, n_embd, vb.pp("c_proj"))?,
            n_head: config.n_head,
            head_dim,
            scale: 1.0 / (head_dim as f64).sqrt(),
        })
    }

    fn split_heads(&self, xs: &Tensor, b: usize, t: usize) -> Result<Tensor> {
        xs.reshape((b, t, self.n_head, self.head_dim))?
            .transpose(1, 2)?
            .contiguous()
    }

    fn forward(&self, xs: &Tensor, kv: &mut Option<(Tensor, Tensor)>) -> Result<Tensor> {
        let (b, t, c) = xs.dims3()?;
        let qkv = self.c_attn.forward(xs)?;

        let q = self.split_heads(&qkv.narrow(D::Minus1, 0, c)?, b, t)?;
        let k = self.split_heads(&qkv.narrow(D::Minus1, c, c)?, b, t)?;
        let v = self.split_heads(&qkv.narrow(D::Minus1, 2 * c, c)?, b, t)?;

        let (k, v) = match kv.take() {
            Some((prev_k, prev_v)) => (
                Tensor::cat(&[&prev_k, &k], 2)?,
                Tensor::cat(&[&prev_v, &v], 2)?,
            ),
            None => (k, v),
        };
        *kv = Some((k.clone(), v.clone()));

        let total = k.dim(2)?;
        let att = (q.matmul(&k.t()?)? * self.scale)?;
        let att = if t > 1 {
            let mask = causal_mask(t, total, att.device())?;
            masked_fill(&att, &mask.broadcast_as(att.shape())?, f32::NEG_INFINITY)?
        } else {
            att
        };
        let att = candle_nn::ops::softmax_last_dim(&att)?;

        let ys = att.matmul(&v)?.transpose(1, 2)?.reshape((b, t, c))?;
        self.c_proj.forward(&ys)
    }
}

/// Mask of shape `(t, total)` that is 1 where a query at position
/// `total - t + i` would attend to a later key.
fn causal_mask(t: usize, total: usize, device: &Device) -> Result<Tensor> {
    let offset = total - t;
    let mask: Vec<u8> = (0..t)
        .flat_map(|i| (0..total).map(move |j| u8::from(j > i + offset)))
        .collect();
    Tensor::from_slice(&mask, (t, total), device)
}

fn masked_fill(on_false: &Tensor, mask: &Tensor, on_true: f32) -> Result<Tensor> {
    let on_true = Tensor::new(on_true, on_false.device())?
        .to_dtype(on_false.dtype())?
        .broadcast_as(mask.shape().dims())?;
    mask.where_cond(&on_true, on_false)
}

#[derive(Debug, Clone)]
struct Mlp {
    c_fc: Conv1D,
    c_proj: Conv1D,
    activation: Activation,
}

impl Mlp {
    fn load(config: &Gpt2Config, vb: VarBuilder) -> Result<Self> {
        let inner = config.inner_dim();
        Ok(Self {
            c_fc: Conv1D::load(config.n_embd, inner, vb.pp("c_fc"))?,
            c_proj: Conv1D::load(inner, config.n_embd, vb.pp("c_proj"))?,
            activation: config.activation_function,
        })
    }
}

impl Module for Mlp {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let xs = self.c_fc.forward(xs)?;
        let xs = self.activation.forward(&xs)?;
        self.c_proj.forward(&xs)
    }
}

#[derive(Debug, Clone)]
struct Block {
    ln_1: LayerNorm,
    attn: Attention,
    ln_2: LayerNorm,
    mlp: Mlp,
}

impl Block {
    fn load(config: &Gpt2Config, vb: VarBuilder) -> Result<Self> {
        let eps = config.layer_norm_epsilon;
        Ok(Self {
            ln_1: layer_norm(config.n_embd, eps, vb.pp("ln_1"))?,
            attn: Attention::load(config, vb.pp("attn"))?,
            ln_2: layer_norm(config.n_embd, eps, vb.pp("ln_2"))?,
            mlp: Mlp::load(config, vb.pp("mlp"))?,
        })
    }

    fn forward(&self, xs: &Tensor, kv: &mut Option<(Tensor, Tensor)>) -> Result<Tensor> {
        let residual = xs;
        let xs = (self.attn.forward(&self.ln_1.forward(xs)?, kv)? + residual)?;
        let residual = &xs;
        self.mlp.forward(&self.ln_2.forward(&xs)?)? + residual
    }
}

#[derive(Debug, Clone)]
pub struct Gpt2 {
    wte: Embedding,
    wpe: Embedding,
    blocks: Vec<Block>,
    ln_f: LayerNorm,
    config: Gpt2Config,
    device: Device,
}

impl Gpt2 {
    /// Builds the model from a var builder rooted at the checkpoint.
    ///
    /// `GPT2LMHeadModel` checkpoints nest the decoder under `transformer.`,
    /// bare `GPT2Model` checkpoints do not; both are accepted.
    pub fn load(config: &Gpt2Config, vb: VarBuilder) -> Result<Self> {
        let vb = if vb.contains_tensor("transformer.wte.weight") {
            vb.pp("transformer")
        } else {
            vb
        };

        let wte = embedding(config.vocab_size, config.n_embd, vb.pp("wte"))?;
        let wpe = embedding(config.n_positions, config.n_embd, vb.pp("wpe"))?;
        let blocks = (0..config.n_layer)
            .map(|i| Block::load(config, vb.pp(format!("h.{i}"))))
            .collect::<Result<Vec<_>>>()?;
        let ln_f = layer_norm(config.n_embd, config.layer_norm_epsilon, vb.pp("ln_f"))?;

        Ok(Self {
            wte,
            wpe,
            blocks,
            ln_f,
            config: config.clone(),
            device: vb.device().clone(),
        })
    }

    pub fn config(&self) -> &Gpt2Config {
        &self.config
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn new_cache(&self) -> Cache {
        Cache::new(self.config.n_layer)
    }

    /// Runs `input_ids` of shape `(batch, seq)` after the positions already
    /// held in `cache` and returns the logits of the last position,
    /// shape `(batch, vocab)`.
    pub fn forward(&self, input_ids: &Tensor, cache: &mut Cache) -> Result<Tensor> {
        let (_b, t) = input_ids.dims2()?;
        let offset = cache.seq_len;
        if offset + t > self.config.n_positions {
            candle_core::bail!(
                "sequence of {} tokens exceeds the model context of {} positions",
                offset + t,
                self.config.n_positions
            );
        }

        let positions = Tensor::arange(offset as u32, (offset + t) as u32, &self.device)?;
        let mut xs = self
            .wte
            .forward(input_ids)?
            .broadcast_add(&self.wpe.forward(&positions)?)?;

        for (block, kv) in self.blocks.iter().zip(cache.kvs.iter_mut()) {
            xs = block.forward(&xs, kv)?;
        }
        cache.seq_len += t;

        let xs = self.ln_f.forward(&xs)?;
        let last = xs.i((.., t - 1, ..))?.contiguous()?;
        last.matmul(&self.wte.embeddings().t()?)
    }

    /// Autoregressive generation for a single sequence.
    ///
    /// Stops when `eos_token_id` is produced or the sequence reaches
    /// `params.max_length`. A single sequence is never padded, so
    /// `params.pad_token_id` does not appear in the output.
    pub fn generate(
        &self,
        input: &[u32],
        params: &GenerationParams,
        eos_token_id: u32,
    ) -> Result<Vec<u32>> {
        let mut tokens = input.to_vec();
        if input.is_empty() || tokens.len() >= params.max_length {
            return Ok(tokens);
        }

        let mut cache = self.new_cache();
        let mut logits_processor =
            LogitsProcessor::new(params.seed, params.temperature, params.top_p);
        let mut pending = tokens.clone();

        while tokens.len() < params.max_length {
            let input_ids = Tensor::new(pending.as_slice(), &self.device)?.unsqueeze(0)?;
            let logits = self
                .forward(&input_ids, &mut cache)?
                .squeeze(0)?
                .to_dtype(DType::F32)?;
            let next = logits_processor.sample(&logits)?;
            trace!(token = next, position = tokens.len(), "sampled token");

            tokens.push(next);
            if next == eos_token_id {
                break;
            }
            pending = vec![next];
        }

        Ok(tokens)
    }
}
