use candle_core::{D, Device, Result, Tensor};

/// Rotary tables for one axis: `[N, dim]` each.
#[derive(Debug, Clone)]
struct AxisTable {
    cos: Tensor,
    sin: Tensor,
}

impl AxisTable {
    fn new(positions: &[f32], dim: usize, device: &Device) -> Result<Self> {
        let half = dim / 2;
        let omega: Vec<f32> = (0..half)
            .map(|i| 1.0 / 10000f32.powf(i as f32 / half as f32))
            .collect();
        let n = positions.len();
        let mut cos = Vec::with_capacity(n * dim);
        let mut sin = Vec::with_capacity(n * dim);
        for &pos in positions {
            // frequencies are laid out twice: [f0..fh, f0..fh]
            for _ in 0..2 {
                for &w in &omega {
                    cos.push((pos * w).cos());
                    sin.push((pos * w).sin());
                }
            }
        }
        Ok(Self {
            cos: Tensor::from_vec(cos, (n, dim), device)?,
            sin: Tensor::from_vec(sin, (n, dim), device)?,
        })
    }

    fn rotate(&self, xs: &Tensor) -> Result<Tensor> {
        let (b, h, n, d) = xs.dims4()?;
        let pairs = xs.reshape((b, h, n, d / 2, 2))?;
        let even = pairs.narrow(D::Minus1, 0, 1)?;
        let odd = pairs.narrow(D::Minus1, 1, 1)?;
        let swapped = Tensor::cat(&[&odd.neg()?, &even], D::Minus1)?.reshape((b, h, n, d))?;
        xs.broadcast_mul(&self.cos)? + swapped.broadcast_mul(&self.sin)?
    }
}

/// Separable 3-D rotary position embedding over a (time, height, width)
/// token grid.
///
/// Each head dimension is split into three equal even-sized slices, one per
/// axis. Whatever is left over at the end of the head passes through
/// unrotated.
#[derive(Debug, Clone)]
pub(crate) struct Rope3d {
    axis_dim: usize,
    depth: AxisTable,
    height: AxisTable,
    width: AxisTable,
}

impl Rope3d {
    pub(crate) fn new(
        head_dim: usize,
        grid: (usize, usize, usize),
        device: &Device,
    ) -> Result<Self> {
        let axis_dim = 2 * ((head_dim / 3) / 2);
        let (gt, gh, gw) = grid;
        let n = gt * gh * gw;
        let mut frames = Vec::with_capacity(n);
        let mut rows = Vec::with_capacity(n);
        let mut cols = Vec::with_capacity(n);
        for id in 0..n {
            frames.push((id / (gh * gw)) as f32);
            rows.push(((id / gw) % gh) as f32);
            cols.push((id % gw) as f32);
        }
        Ok(Self {
            axis_dim,
            depth: AxisTable::new(&frames, axis_dim, device)?,
            height: AxisTable::new(&rows, axis_dim, device)?,
            width: AxisTable::new(&cols, axis_dim, device)?,
        })
    }

    pub(crate) fn axis_dim(&self) -> usize {
        self.axis_dim
    }

    /// Rotate `[B, H, N, head_dim]` queries or keys.
    pub(crate) fn apply(&self, xs: &Tensor) -> Result<Tensor> {
        let head_dim = xs.dim(D::Minus1)?;
        let s = self.axis_dim;
        if s == 0 {
            return Ok(xs.clone());
        }
        let mut parts = vec![
            self.depth.rotate(&xs.narrow(D::Minus1, 0, s)?.contiguous()?)?,
            self.height.rotate(&xs.narrow(D::Minus1, s, s)?.contiguous()?)?,
            self.width.rotate(&xs.narrow(D::Minus1, 2 * s, s)?.contiguous()?)?,
        ];
        if head_dim > 3 * s {
            parts.push(xs.narrow(D::Minus1, 3 * s, head_dim - 3 * s)?);
        }
        Tensor::cat(&parts, D::Minus1)
    }
}
