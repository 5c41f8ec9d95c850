// Transformer building blocks shared by the video encoder and the attentive
// classifier. Weight names follow the V-JEPA 2 checkpoints.

use {
    super::rope::Rope3d,
    candle_core::{Module, Result, Tensor},
    candle_nn::{LayerNorm, Linear, VarBuilder, layer_norm, linear},
};

/// Queries are processed in blocks of this many tokens so the attention
/// matrix stays bounded for long clips.
const ATTN_CHUNK: usize = 1024;

#[derive(Debug, Clone)]
pub(crate) struct Mlp {
    fc1: Linear,
    fc2: Linear,
}

impl Mlp {
    pub(crate) fn load(vb: VarBuilder, dim: usize, hidden: usize) -> Result<Self> {
        Ok(Self {
            fc1: linear(dim, hidden, vb.pp("fc1"))?,
            fc2: linear(hidden, dim, vb.pp("fc2"))?,
        })
    }
}

impl Module for Mlp {
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        xs.apply(&self.fc1)?.gelu_erf()?.apply(&self.fc2)
    }
}

/// `softmax(q k^T * scale) v` over `[B, H, N, hd]` tensors, chunked along queries.
pub(crate) fn attend(q: &Tensor, k: &Tensor, v: &Tensor, scale: f64) -> Result<Tensor> {
    let n = q.dim(2)?;
    let kt = k.t()?.contiguous()?;
    let v = v.contiguous()?;
    let mut chunks = Vec::with_capacity(n.div_ceil(ATTN_CHUNK));
    let mut start = 0;
    while start < n {
        let len = ATTN_CHUNK.min(n - start);
        let qc = q.narrow(2, start, len)?.contiguous()?;
        let att = (qc.matmul(&kt)? * scale)?;
        let att = candle_nn::ops::softmax_last_dim(&att)?;
        chunks.push(att.matmul(&v)?);
        start += len;
    }
    Tensor::cat(&chunks, 2)
}

#[derive(Debug, Clone)]
pub(crate) struct SelfAttention {
    qkv: Linear,
    proj: Linear,
    num_heads: usize,
}

impl SelfAttention {
    pub(crate) fn load(vb: VarBuilder, dim: usize, num_heads: usize) -> Result<Self> {
        Ok(Self {
            qkv: linear(dim, dim * 3, vb.pp("qkv"))?,
            proj: linear(dim, dim, vb.pp("proj"))?,
            num_heads,
        })
    }

    pub(crate) fn forward(&self, xs: &Tensor, rope: Option<&Rope3d>) -> Result<Tensor> {
        let (b, n, c) = xs.dims3()?;
        let head_dim = c / self.num_heads;
        let qkv = xs
            .apply(&self.qkv)?
            .reshape((b, n, 3, self.num_heads, head_dim))?
            .permute((2, 0, 3, 1, 4))?;
        let (mut q, mut k, v) = (qkv.get(0)?, qkv.get(1)?, qkv.get(2)?);
        if let Some(rope) = rope {
            q = rope.apply(&q)?;
            k = rope.apply(&k)?;
        }
        let out = attend(&q, &k, &v, (head_dim as f64).powf(-0.5))?;
        out.transpose(1, 2)?.reshape((b, n, c))?.apply(&self.proj)
    }
}

/// Pre-norm transformer block.
#[derive(Debug, Clone)]
pub(crate) struct Block {
    norm1: LayerNorm,
    attn: SelfAttention,
    norm2: LayerNorm,
    mlp: Mlp,
}

impl Block {
    pub(crate) fn load(
        vb: VarBuilder,
        dim: usize,
        num_heads: usize,
        mlp_hidden: usize,
        eps: f64,
    ) -> Result<Self> {
        Ok(Self {
            norm1: layer_norm(dim, eps, vb.pp("norm1"))?,
            attn: SelfAttention::load(vb.pp("attn"), dim, num_heads)?,
            norm2: layer_norm(dim, eps, vb.pp("norm2"))?,
            mlp: Mlp::load(vb.pp("mlp"), dim, mlp_hidden)?,
        })
    }

    pub(crate) fn forward(&self, xs: &Tensor, rope: Option<&Rope3d>) -> Result<Tensor> {
        let xs = (xs + self.attn.forward(&xs.apply(&self.norm1)?, rope)?)?;
        &xs + xs.apply(&self.norm2)?.apply(&self.mlp)?
    }
}

/// Queries attend to a separate token sequence.
#[derive(Debug, Clone)]
pub(crate) struct CrossAttention {
    q: Linear,
    kv: Linear,
    proj: Linear,
    num_heads: usize,
}

impl CrossAttention {
    pub(crate) fn load(vb: VarBuilder, dim: usize, num_heads: usize) -> Result<Self> {
        Ok(Self {
            q: linear(dim, dim, vb.pp("q"))?,
            kv: linear(dim, dim * 2, vb.pp("kv"))?,
            proj: linear(dim, dim, vb.pp("proj"))?,
            num_heads,
        })
    }

    pub(crate) fn forward(&self, queries: &Tensor, xs: &Tensor) -> Result<Tensor> {
        let (b, nq, c) = queries.dims3()?;
        let n = xs.dim(1)?;
        let head_dim = c / self.num_heads;
        let q = queries
            .apply(&self.q)?
            .reshape((b, nq, self.num_heads, head_dim))?
            .transpose(1, 2)?;
        let kv = xs
            .apply(&self.kv)?
            .reshape((b, n, 2, self.num_heads, head_dim))?
            .permute((2, 0, 3, 1, 4))?;
        let (k, v) = (kv.get(0)?, kv.get(1)?);
        let out = attend(&q, &k, &v, (head_dim as f64).powf(-0.5))?;
        out.transpose(1, 2)?.reshape((b, nq, c))?.apply(&self.proj)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct CrossAttentionBlock {
    norm1: LayerNorm,
    xattn: CrossAttention,
    norm2: LayerNorm,
    mlp: Mlp,
}

impl CrossAttentionBlock {
    pub(crate) fn load(
        vb: VarBuilder,
        dim: usize,
        num_heads: usize,
        mlp_hidden: usize,
        eps: f64,
    ) -> Result<Self> {
        Ok(Self {
            norm1: layer_norm(dim, eps, vb.pp("norm1"))?,
            xattn: CrossAttention::load(vb.pp("xattn"), dim, num_heads)?,
            norm2: layer_norm(dim, eps, vb.pp("norm2"))?,
            mlp: Mlp::load(vb.pp("mlp"), dim, mlp_hidden)?,
        })
    }

    pub(crate) fn forward(&self, queries: &Tensor, xs: &Tensor) -> Result<Tensor> {
        let queries = (queries + self.xattn.forward(queries, &xs.apply(&self.norm1)?)?)?;
        &queries + queries.apply(&self.norm2)?.apply(&self.mlp)?
    }
}
