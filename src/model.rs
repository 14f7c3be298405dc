use candle_core::Tensor;
use candle_nn::{Conv2dConfig, Linear, Module, VarBuilder, linear};
use log::{debug, info};

use crate::block::{Block, BlockArgs, BlockKind, ConvUnit, batch_norm2d, conv2d};
use crate::config::{ExecMode, SewConfig};
use crate::encoder::Encoder;
use crate::error::{CandleResult, Result, SewError};
use crate::node::{Node, NodeFactory, TimeFold};
use crate::sew::Connect;

/// Stem, stack widths and head shape of a SEW-ResNet family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// 7x7/2 stem + max-pool, four stacks, single fc head
    ImageNet,
    /// 3x3 stem, three stacks, fc -> node -> fc head
    ResNet19,
    /// 3x3 stem, three stacks, single fc head
    Cifar,
}

impl Variant {
    pub fn name(self) -> &'static str {
        match self {
            Variant::ImageNet => "SEWResNet",
            Variant::ResNet19 => "SEWResNet19",
            Variant::Cifar => "SEWResNetCifar",
        }
    }

    pub fn stage_planes(self) -> &'static [usize] {
        match self {
            Variant::ImageNet => &[64, 128, 256, 512],
            Variant::ResNet19 | Variant::Cifar => &[128, 256, 512],
        }
    }

    fn stem_config(self) -> (usize, Conv2dConfig) {
        match self {
            Variant::ImageNet => (
                7,
                Conv2dConfig {
                    padding: 3,
                    stride: 2,
                    ..Default::default()
                },
            ),
            Variant::ResNet19 | Variant::Cifar => (
                3,
                Conv2dConfig {
                    padding: 1,
                    stride: 1,
                    ..Default::default()
                },
            ),
        }
    }
}

/// A sequence of blocks; only the first one may change width or stride
struct Stage {
    blocks: Vec<Box<dyn Block>>,
}

impl Stage {
    fn forward_t(&mut self, x: &Tensor, train: bool) -> CandleResult<Tensor> {
        let mut x = x.clone();
        for block in self.blocks.iter_mut() {
            x = block.forward_t(&x, train)?;
        }
        Ok(x)
    }

    fn reset(&mut self) {
        self.blocks.iter_mut().for_each(|b| b.reset());
    }
}

/// Running state threaded through consecutive `make_layer` calls
struct StageBuilder<'a> {
    kind: BlockKind,
    inplanes: usize,
    dilation: usize,
    groups: usize,
    base_width: usize,
    cnf: Connect,
    zero_init_residual: bool,
    nodes: &'a dyn NodeFactory,
    fold: TimeFold,
}

impl StageBuilder<'_> {
    fn make_layer(
        &mut self,
        planes: usize,
        blocks: usize,
        stride: usize,
        dilate: bool,
        vb: VarBuilder,
    ) -> Result<Stage> {
        let previous_dilation = self.dilation;
        let mut stride = stride;
        if dilate {
            self.dilation *= stride;
            stride = 1;
        }
        let out = planes * self.kind.expansion();
        let downsample = stride != 1 || self.inplanes != out;
        debug!(
            "stage {}->{} x{blocks}, stride {stride}, dilation {}, downsample {downsample}",
            self.inplanes, out, self.dilation
        );

        let mut layers = Vec::with_capacity(blocks);
        let first = self.args(planes, stride, downsample, previous_dilation);
        layers.push(self.kind.build(&first, vb.pp("0"))?);
        self.inplanes = out;
        for i in 1..blocks {
            let rest = self.args(planes, 1, false, self.dilation);
            layers.push(self.kind.build(&rest, vb.pp(i.to_string()))?);
        }
        Ok(Stage { blocks: layers })
    }

    fn args(&self, planes: usize, stride: usize, downsample: bool, dilation: usize) -> BlockArgs<'_> {
        BlockArgs {
            inplanes: self.inplanes,
            planes,
            stride,
            downsample,
            groups: self.groups,
            base_width: self.base_width,
            dilation,
            cnf: self.cnf,
            zero_init_residual: self.zero_init_residual,
            nodes: self.nodes,
            fold: self.fold,
        }
    }
}

enum Head {
    Linear(Linear),
    Hidden {
        fc1: Linear,
        node: Box<dyn Node>,
        fc2: Linear,
    },
}

impl Head {
    fn forward(&mut self, x: &Tensor) -> CandleResult<Tensor> {
        match self {
            Head::Linear(fc) => fc.forward(x),
            Head::Hidden { fc1, node, fc2 } => {
                let x = node.forward(&fc1.forward(x)?)?;
                fc2.forward(&x)
            }
        }
    }

    fn reset(&mut self) {
        if let Head::Hidden { node, .. } = self {
            node.reset();
        }
    }
}

/// Spike-element-wise ResNet
pub struct SewResNet {
    variant: Variant,
    stem: ConvUnit,
    stages: Vec<Stage>,
    head: Head,
    encoder: Encoder,
    mode: ExecMode,
    sum_output: bool,
    num_classes: usize,
    in_channels: usize,
}

impl SewResNet {
    /// Builds the network with nodes from `cfg.node`.
    pub fn new(
        variant: Variant,
        kind: BlockKind,
        layers: &[usize],
        cfg: &SewConfig,
        vb: VarBuilder,
    ) -> Result<Self> {
        Self::with_nodes(variant, kind, layers, cfg, &cfg.node, vb)
    }

    /// Builds the network with nodes from a caller-supplied factory.
    pub fn with_nodes(
        variant: Variant,
        kind: BlockKind,
        layers: &[usize],
        cfg: &SewConfig,
        nodes: &dyn NodeFactory,
        vb: VarBuilder,
    ) -> Result<Self> {
        cfg.validate()?;
        let planes = variant.stage_planes();
        if layers.len() != planes.len() {
            return Err(SewError::StageCount {
                variant: variant.name(),
                expected: planes.len(),
                got: layers.len(),
            });
        }
        let dilate = cfg.dilation_flags()?;
        let fold = match cfg.mode {
            ExecMode::Folded => TimeFold::Folded(cfg.step),
            ExecMode::Looped | ExecMode::Once => TimeFold::PerCall,
        };
        let in_channels = cfg.in_channels();

        let inplanes = 64;
        let (kernel, stem_cfg) = variant.stem_config();
        let stem = ConvUnit::new(
            conv2d(in_channels, inplanes, kernel, stem_cfg, vb.pp("conv1"))?,
            batch_norm2d(inplanes, false, vb.pp("bn1"))?,
            nodes.make(fold),
        );

        let mut builder = StageBuilder {
            kind,
            inplanes,
            dilation: 1,
            groups: cfg.groups,
            base_width: cfg.width_per_group,
            cnf: cfg.cnf,
            zero_init_residual: cfg.zero_init_residual,
            nodes,
            fold,
        };
        let mut stages = Vec::with_capacity(planes.len());
        for (i, (&p, &n)) in planes.iter().zip(layers).enumerate() {
            let (stride, dilate) = if i == 0 { (1, false) } else { (2, dilate[i - 1]) };
            let vb = vb.pp(format!("layer{}", i + 1));
            stages.push(builder.make_layer(p, n, stride, dilate, vb)?);
        }

        let features = 512 * kind.expansion();
        let head = match variant {
            Variant::ResNet19 => Head::Hidden {
                fc1: linear(features, 256, vb.pp("fc1"))?,
                node: nodes.make(fold),
                fc2: linear(256, cfg.num_classes, vb.pp("fc2"))?,
            },
            Variant::ImageNet | Variant::Cifar => {
                Head::Linear(linear(features, cfg.num_classes, vb.pp("fc"))?)
            }
        };

        info!(
            "built {} {:?} layers={:?} cnf={} step={} mode={:?} in_channels={in_channels}",
            variant.name(),
            kind,
            layers,
            cfg.cnf,
            cfg.step,
            cfg.mode
        );
        Ok(Self {
            variant,
            stem,
            stages,
            head,
            encoder: Encoder::new(cfg.encode_type, cfg.step),
            mode: cfg.mode,
            sum_output: cfg.sum_output,
            num_classes: cfg.num_classes,
            in_channels,
        })
    }

    pub fn variant(&self) -> Variant {
        self.variant
    }

    pub fn mode(&self) -> ExecMode {
        self.mode
    }

    pub fn step(&self) -> usize {
        self.encoder.step()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    /// clears the state of every node in the network
    pub fn reset(&mut self) {
        self.stem.reset();
        self.stages.iter_mut().for_each(Stage::reset);
        self.head.reset();
    }

    pub fn forward(&mut self, x: &Tensor) -> CandleResult<Tensor> {
        self.forward_t(x, false)
    }

    /// Logits as `(B, C)`, or `(T, B, C)` when `sum_output` is off.
    /// `Once` runs the body a single time on `x` and returns `(B, C)`.
    pub fn forward_t(&mut self, x: &Tensor, train: bool) -> CandleResult<Tensor> {
        match self.mode {
            ExecMode::Once => self.body(x, train),
            ExecMode::Folded => {
                let inputs = self.encoder.folded(x)?;
                self.reset();
                let out = self.body(&inputs, train)?;
                let (tb, c) = out.dims2()?;
                let step = self.step();
                self.aggregate(out.reshape((step, tb / step, c))?)
            }
            ExecMode::Looped => {
                let inputs = self.encoder.steps(x)?;
                self.reset();
                let outputs = inputs
                    .iter()
                    .map(|xt| self.body(xt, train))
                    .collect::<CandleResult<Vec<_>>>()?;
                self.aggregate(Tensor::stack(&outputs, 0)?)
            }
        }
    }

    fn aggregate(&self, per_step: Tensor) -> CandleResult<Tensor> {
        if self.sum_output {
            per_step.mean(0)
        } else {
            Ok(per_step)
        }
    }

    /// stem -> stacks -> global average pool -> head, for one (possibly folded) batch
    fn body(&mut self, x: &Tensor, train: bool) -> CandleResult<Tensor> {
        let mut x = self.stem.forward_t(x, train)?;
        if self.variant == Variant::ImageNet {
            x = max_pool_3x3_s2_p1(&x)?;
        }
        for stage in self.stages.iter_mut() {
            x = stage.forward_t(&x, train)?;
        }
        let x = x.mean((2, 3))?;
        self.head.forward(&x)
    }
}

/// 3x3 max-pool, stride 2, padding 1. Edge replication never wins over the value it copies,
/// so it stands in for -inf padding.
fn max_pool_3x3_s2_p1(x: &Tensor) -> CandleResult<Tensor> {
    x.pad_with_same(2, 1, 1)?
        .pad_with_same(3, 1, 1)?
        .max_pool2d_with_stride(3, 2)
}
