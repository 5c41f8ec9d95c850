use {
    super::layers::{Block, CrossAttentionBlock},
    candle_core::{Result, Tensor},
    candle_nn::{Init, Linear, VarBuilder, linear},
};

const MLP_RATIO: f64 = 4.0;
const LAYER_NORM_EPS: f64 = 1e-6;

/// Hyper-parameters of the attentive probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassifierConfig {
    pub embed_dim: usize,
    pub num_heads: usize,
    /// Self-attention blocks plus the final cross-attention block.
    pub depth: usize,
    pub num_classes: usize,
}

/// Attentive probe over encoder tokens.
///
/// `depth - 1` self-attention blocks refine the tokens, then one learnable
/// query cross-attends to them and a linear head maps it to class logits.
#[derive(Debug, Clone)]
pub struct AttentiveClassifier {
    query_tokens: Tensor,
    blocks: Vec<Block>,
    cross_attention_block: CrossAttentionBlock,
    linear: Linear,
    config: ClassifierConfig,
}

impl AttentiveClassifier {
    pub fn load(vb: VarBuilder, config: ClassifierConfig) -> Result<Self> {
        let dim = config.embed_dim;
        let hidden = (dim as f64 * MLP_RATIO) as usize;
        let pooler = vb.pp("pooler");
        let query_tokens = pooler.get_with_hints(
            (1, 1, dim),
            "query_tokens",
            Init::Randn {
                mean: 0.0,
                stdev: 0.02,
            },
        )?;
        let blocks = (0..config.depth.saturating_sub(1))
            .map(|i| {
                Block::load(
                    pooler.pp("blocks").pp(i),
                    dim,
                    config.num_heads,
                    hidden,
                    LAYER_NORM_EPS,
                )
            })
            .collect::<Result<Vec<_>>>()?;
        let cross_attention_block = CrossAttentionBlock::load(
            pooler.pp("cross_attention_block"),
            dim,
            config.num_heads,
            hidden,
            LAYER_NORM_EPS,
        )?;
        let linear = linear(dim, config.num_classes, vb.pp("linear"))?;
        Ok(Self {
            query_tokens,
            blocks,
            cross_attention_block,
            linear,
            config,
        })
    }

    pub fn config(&self) -> ClassifierConfig {
        self.config
    }

    /// `[B, N, D]` features to `[B, num_classes]` logits.
    pub fn forward(&self, features: &Tensor) -> Result<Tensor> {
        let (b, _, d) = features.dims3()?;
        let mut xs = features.clone();
        for block in &self.blocks {
            xs = block.forward(&xs, None)?;
        }
        let queries = self.query_tokens.broadcast_as((b, 1, d))?.contiguous()?;
        let pooled = self.cross_attention_block.forward(&queries, &xs)?;
        pooled.squeeze(1)?.apply(&self.linear)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn config() -> ClassifierConfig {
        ClassifierConfig {
            embed_dim: 16,
            num_heads: 4,
            depth: 3,
            num_classes: 7,
        }
    }

    #[test]
    fn test_logits_shape() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let classifier = AttentiveClassifier::load(vb, config()).unwrap();

        let features = Tensor::randn(0f32, 1.0, (1, 12, 16), &device).unwrap();
        let logits = classifier.forward(&features).unwrap();
        assert_eq!(logits.dims(), &[1, 7]);
        assert!(logits.to_vec2::<f32>().unwrap()[0].iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_checkpoint_names() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        AttentiveClassifier::load(vb, config()).unwrap();

        let data = varmap.data().lock().unwrap();
        for name in [
            "pooler.query_tokens",
            "pooler.blocks.1.attn.qkv.weight",
            "pooler.cross_attention_block.xattn.kv.weight",
            "pooler.cross_attention_block.mlp.fc1.bias",
            "linear.weight",
        ] {
            assert!(data.contains_key(name), "missing {name}");
        }
        assert!(!data.contains_key("pooler.blocks.2.attn.qkv.weight"));
    }

    #[test]
    fn test_depth_one_has_no_self_attention() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        AttentiveClassifier::load(
            vb,
            ClassifierConfig {
                depth: 1,
                ..config()
            },
        )
        .unwrap();

        let data = varmap.data().lock().unwrap();
        assert!(data.keys().all(|k| !k.starts_with("pooler.blocks.")));
    }
}
