use {
    super::{layers::Block, rope::Rope3d},
    crate::config::VitConfig,
    candle_core::{Module, Result, Tensor},
    candle_nn::{LayerNorm, VarBuilder, init::DEFAULT_KAIMING_NORMAL, layer_norm},
};

/// Tubelet embedding: non-overlapping `tubelet x patch x patch` cubes, each
/// projected to `embed_dim`.
///
/// The checkpoint stores a 3-D convolution kernel `[D, C, t, p, p]`; with
/// stride equal to kernel size that is a linear map over flattened cubes.
#[derive(Debug, Clone)]
struct PatchEmbed3d {
    kernel: Tensor,
    bias: Tensor,
    tubelet: usize,
    patch: usize,
}

impl PatchEmbed3d {
    fn load(vb: VarBuilder, cfg: &VitConfig) -> Result<Self> {
        let (d, c, t, p) = (cfg.embed_dim, cfg.in_chans, cfg.tubelet_size, cfg.patch_size);
        Ok(Self {
            kernel: vb.get_with_hints((d, c, t, p, p), "weight", DEFAULT_KAIMING_NORMAL)?,
            bias: vb.get(d, "bias")?,
            tubelet: t,
            patch: p,
        })
    }
}

impl Module for PatchEmbed3d {
    /// `[B, C, T, H, W]` to `[B, N, D]`, tokens ordered time, row, column.
    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        let (b, c, t, h, w) = xs.dims5()?;
        let (ts, p) = (self.tubelet, self.patch);
        let (gt, gh, gw) = (t / ts, h / p, w / p);
        let cubes = xs
            .reshape(vec![b, c, gt, ts, gh, p, gw, p])?
            .permute(vec![0, 2, 4, 6, 1, 3, 5, 7])?
            .contiguous()?
            .reshape((b, gt * gh * gw, c * ts * p * p))?;
        // the weight loader writes into this var in place
        let weight = self.kernel.flatten_from(1)?.t()?;
        cubes.broadcast_matmul(&weight)?.broadcast_add(&self.bias)
    }
}

/// Video vision transformer with 3-D rotary attention.
///
/// Produces one feature vector per tubelet; there is no class token.
#[derive(Debug, Clone)]
pub struct VisionTransformer {
    patch_embed: PatchEmbed3d,
    blocks: Vec<Block>,
    norm: LayerNorm,
    rope: Rope3d,
    config: VitConfig,
}

impl VisionTransformer {
    pub fn load(vb: VarBuilder, config: &VitConfig) -> Result<Self> {
        let patch_embed = PatchEmbed3d::load(vb.pp("patch_embed").pp("proj"), config)?;
        let blocks = (0..config.depth)
            .map(|i| {
                Block::load(
                    vb.pp("blocks").pp(i),
                    config.embed_dim,
                    config.num_heads,
                    config.mlp_hidden_dim(),
                    config.layer_norm_eps,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let norm = layer_norm(config.embed_dim, config.layer_norm_eps, vb.pp("norm"))?;
        let rope = Rope3d::new(config.head_dim(), config.grid(), vb.device())?;
        Ok(Self {
            patch_embed,
            blocks,
            norm,
            rope,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &VitConfig {
        &self.config
    }

    /// `[1, C, T, H, W]` clip to `[1, N, D]` features.
    pub fn forward(&self, clip: &Tensor) -> Result<Tensor> {
        let (_, c, t, h, w) = clip.dims5()?;
        let cfg = &self.config;
        if c != cfg.in_chans || t != cfg.num_frames || h != cfg.img_size || w != cfg.img_size {
            candle_core::bail!(
                "clip [_, {c}, {t}, {h}, {w}] does not match encoder input [_, {}, {}, {}, {}]",
                cfg.in_chans,
                cfg.num_frames,
                cfg.img_size,
                cfg.img_size
            );
        }
        let mut xs = self.patch_embed.forward(clip)?;
        for block in &self.blocks {
            xs = block.forward(&xs, Some(&self.rope))?;
        }
        xs.apply(&self.norm)
    }
}
