pub mod basic;
pub mod bottleneck;

use candle_core::Tensor;
use candle_nn::{BatchNorm, Conv2d, Conv2dConfig, Init, ModuleT, VarBuilder};

use crate::error::{CandleResult, Result};
use crate::node::{Node, NodeFactory, TimeFold};
use crate::sew::Connect;
pub use basic::BasicBlock;
pub use bottleneck::Bottleneck;

/// A residual block whose merge point goes through the SEW connect function.
pub trait Block: Send + Sync {
    fn forward_t(&mut self, x: &Tensor, train: bool) -> CandleResult<Tensor>;

    /// resets every node owned by the block
    fn reset(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Basic,
    Bottleneck,
}

impl BlockKind {
    pub fn expansion(self) -> usize {
        match self {
            BlockKind::Basic => BasicBlock::EXPANSION,
            BlockKind::Bottleneck => Bottleneck::EXPANSION,
        }
    }

    pub fn build(self, args: &BlockArgs, vb: VarBuilder) -> Result<Box<dyn Block>> {
        Ok(match self {
            BlockKind::Basic => Box::new(BasicBlock::new(args, vb)?),
            BlockKind::Bottleneck => Box::new(Bottleneck::new(args, vb)?),
        })
    }
}

/// Everything a block needs at construction time
pub struct BlockArgs<'a> {
    pub inplanes: usize,
    pub planes: usize,
    pub stride: usize,
    /// the shortcut projection is built only when this is set
    pub downsample: bool,
    pub groups: usize,
    pub base_width: usize,
    pub dilation: usize,
    pub cnf: Connect,
    pub zero_init_residual: bool,
    pub nodes: &'a dyn NodeFactory,
    pub fold: TimeFold,
}

/// 3x3 convolution with padding
pub fn conv3x3(
    in_planes: usize,
    out_planes: usize,
    stride: usize,
    groups: usize,
    dilation: usize,
    vb: VarBuilder,
) -> CandleResult<Conv2d> {
    let cfg = Conv2dConfig {
        padding: dilation,
        stride,
        dilation,
        groups,
        ..Default::default()
    };
    conv2d(in_planes, out_planes, 3, cfg, vb)
}

/// 1x1 convolution
pub fn conv1x1(
    in_planes: usize,
    out_planes: usize,
    stride: usize,
    vb: VarBuilder,
) -> CandleResult<Conv2d> {
    let cfg = Conv2dConfig {
        stride,
        ..Default::default()
    };
    conv2d(in_planes, out_planes, 1, cfg, vb)
}

/// bias-free conv with kaiming normal init (fan_out, relu gain)
pub fn conv2d(
    in_planes: usize,
    out_planes: usize,
    kernel: usize,
    cfg: Conv2dConfig,
    vb: VarBuilder,
) -> CandleResult<Conv2d> {
    let fan_out = out_planes * kernel * kernel;
    let init = Init::Randn {
        mean: 0.0,
        stdev: (2.0 / fan_out as f64).sqrt(),
    };
    let ws = vb.get_with_hints(
        (out_planes, in_planes / cfg.groups, kernel, kernel),
        "weight",
        init,
    )?;
    Ok(Conv2d::new(ws, None, cfg))
}

/// BatchNorm2d with torchvision parameter names, weight 1 (or 0) and bias 0
pub fn batch_norm2d(channels: usize, zero_weight: bool, vb: VarBuilder) -> CandleResult<BatchNorm> {
    let weight_init = if zero_weight { 0.0 } else { 1.0 };
    let weight = vb.get_with_hints(channels, "weight", Init::Const(weight_init))?;
    let bias = vb.get_with_hints(channels, "bias", Init::Const(0.0))?;
    let running_mean = vb.get_with_hints(channels, "running_mean", Init::Const(0.0))?;
    let running_var = vb.get_with_hints(channels, "running_var", Init::Const(1.0))?;
    BatchNorm::new(channels, running_mean, running_var, weight, bias, 1e-5)
}

/// conv -> bn -> node, the unit every block and the stem is made of
pub struct ConvUnit {
    conv: Conv2d,
    bn: BatchNorm,
    node: Box<dyn Node>,
}

impl ConvUnit {
    pub fn new(conv: Conv2d, bn: BatchNorm, node: Box<dyn Node>) -> Self {
        Self { conv, bn, node }
    }

    pub fn forward_t(&mut self, x: &Tensor, train: bool) -> CandleResult<Tensor> {
        let x = x.apply(&self.conv)?;
        let x = self.bn.forward_t(&x, train)?;
        self.node.forward(&x)
    }

    pub fn reset(&mut self) {
        self.node.reset();
    }
}

/// Projection shortcut: conv1x1 -> bn under `downsample.{0,1}`, followed by its own node
pub(crate) fn shortcut(args: &BlockArgs, expansion: usize, vb: VarBuilder) -> Result<Option<ConvUnit>> {
    if !args.downsample {
        return Ok(None);
    }
    let out = args.planes * expansion;
    let conv = conv1x1(args.inplanes, out, args.stride, vb.pp("0"))?;
    let bn = batch_norm2d(out, false, vb.pp("1"))?;
    Ok(Some(ConvUnit::new(conv, bn, args.nodes.make(args.fold))))
}
