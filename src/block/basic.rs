use candle_core::Tensor;
use candle_nn::VarBuilder;

use super::{Block, BlockArgs, ConvUnit, batch_norm2d, conv3x3, shortcut};
use crate::error::{CandleResult, Result, SewError};
use crate::sew::{Connect, sew_function};

/// Two 3x3 conv stages; merges as `sew(identity, out)`.
pub struct BasicBlock {
    unit1: ConvUnit,
    unit2: ConvUnit,
    downsample: Option<ConvUnit>,
    cnf: Connect,
}

impl BasicBlock {
    pub const EXPANSION: usize = 1;

    pub fn new(args: &BlockArgs, vb: VarBuilder) -> Result<Self> {
        if args.groups != 1 || args.base_width != 64 {
            return Err(SewError::BasicBlockWidth {
                groups: args.groups,
                base_width: args.base_width,
            });
        }
        if args.dilation > 1 {
            return Err(SewError::BasicBlockDilation(args.dilation));
        }
        // both conv1 and the shortcut downsample when stride != 1
        let unit1 = ConvUnit::new(
            conv3x3(args.inplanes, args.planes, args.stride, 1, 1, vb.pp("conv1"))?,
            batch_norm2d(args.planes, false, vb.pp("bn1"))?,
            args.nodes.make(args.fold),
        );
        let unit2 = ConvUnit::new(
            conv3x3(args.planes, args.planes, 1, 1, 1, vb.pp("conv2"))?,
            batch_norm2d(args.planes, args.zero_init_residual, vb.pp("bn2"))?,
            args.nodes.make(args.fold),
        );
        let downsample = shortcut(args, Self::EXPANSION, vb.pp("downsample"))?;
        Ok(Self {
            unit1,
            unit2,
            downsample,
            cnf: args.cnf,
        })
    }

    pub(crate) fn merge(&self, identity: &Tensor, out: &Tensor) -> CandleResult<Tensor> {
        sew_function(identity, out, self.cnf)
    }
}

impl Block for BasicBlock {
    fn forward_t(&mut self, x: &Tensor, train: bool) -> CandleResult<Tensor> {
        let out = self.unit1.forward_t(x, train)?;
        let out = self.unit2.forward_t(&out, train)?;
        let identity = match self.downsample.as_mut() {
            Some(ds) => ds.forward_t(x, train)?,
            None => x.clone(),
        };
        self.merge(&identity, &out)
    }

    fn reset(&mut self) {
        self.unit1.reset();
        self.unit2.reset();
        if let Some(ds) = self.downsample.as_mut() {
            ds.reset();
        }
    }
}
