use candle_core::Tensor;
use candle_nn::VarBuilder;

use super::{Block, BlockArgs, ConvUnit, batch_norm2d, conv1x1, conv3x3, shortcut};
use crate::error::{CandleResult, Result};
use crate::sew::{Connect, sew_function};

/// 1x1 reduce, 3x3, 1x1 expand. The stride sits on the 3x3 conv (ResNet v1.5).
/// Merges as `sew(out, identity)`, the reverse of [`super::BasicBlock`].
pub struct Bottleneck {
    unit1: ConvUnit,
    unit2: ConvUnit,
    unit3: ConvUnit,
    downsample: Option<ConvUnit>,
    cnf: Connect,
}

impl Bottleneck {
    pub const EXPANSION: usize = 4;

    pub fn width(planes: usize, base_width: usize, groups: usize) -> usize {
        planes * base_width / 64 * groups
    }

    pub fn new(args: &BlockArgs, vb: VarBuilder) -> Result<Self> {
        let width = Self::width(args.planes, args.base_width, args.groups);
        let out = args.planes * Self::EXPANSION;
        let unit1 = ConvUnit::new(
            conv1x1(args.inplanes, width, 1, vb.pp("conv1"))?,
            batch_norm2d(width, false, vb.pp("bn1"))?,
            args.nodes.make(args.fold),
        );
        let unit2 = ConvUnit::new(
            conv3x3(
                width,
                width,
                args.stride,
                args.groups,
                args.dilation,
                vb.pp("conv2"),
            )?,
            batch_norm2d(width, false, vb.pp("bn2"))?,
            args.nodes.make(args.fold),
        );
        let unit3 = ConvUnit::new(
            conv1x1(width, out, 1, vb.pp("conv3"))?,
            batch_norm2d(out, args.zero_init_residual, vb.pp("bn3"))?,
            args.nodes.make(args.fold),
        );
        let downsample = shortcut(args, Self::EXPANSION, vb.pp("downsample"))?;
        Ok(Self {
            unit1,
            unit2,
            unit3,
            downsample,
            cnf: args.cnf,
        })
    }

    pub(crate) fn merge(&self, identity: &Tensor, out: &Tensor) -> CandleResult<Tensor> {
        sew_function(out, identity, self.cnf)
    }
}

impl Block for Bottleneck {
    fn forward_t(&mut self, x: &Tensor, train: bool) -> CandleResult<Tensor> {
        let out = self.unit1.forward_t(x, train)?;
        let out = self.unit2.forward_t(&out, train)?;
        let out = self.unit3.forward_t(&out, train)?;
        let identity = match self.downsample.as_mut() {
            Some(ds) => ds.forward_t(x, train)?,
            None => x.clone(),
        };
        self.merge(&identity, &out)
    }

    fn reset(&mut self) {
        self.unit1.reset();
        self.unit2.reset();
        self.unit3.reset();
        if let Some(ds) = self.downsample.as_mut() {
            ds.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::test_util::{args, values, var_builder};
    use crate::node::NodeConfig;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn middle_width_follows_base_width_and_groups() {
        assert_eq!(Bottleneck::width(64, 64, 1), 64);
        // resnext50_32x4d, first stack
        assert_eq!(Bottleneck::width(64, 4, 32), 128);
        // wide_resnet50_2
        assert_eq!(Bottleneck::width(128, 128, 1), 256);
    }

    #[test]
    fn keeps_shape_without_shortcut() {
        let varmap = VarMap::new();
        let nodes = NodeConfig::default();
        let mut block = Bottleneck::new(
            &args(&nodes, 16, 4, 1, false, Connect::Add),
            var_builder(&varmap),
        )
        .unwrap();
        let x = Tensor::rand(0f32, 1., (2, 16, 5, 5), &Device::Cpu).unwrap();
        assert_eq!(block.forward_t(&x, false).unwrap().dims(), &[2, 16, 5, 5]);
    }

    #[test]
    fn shortcut_expands_and_downsamples() {
        let varmap = VarMap::new();
        let nodes = NodeConfig::default();
        let mut block = Bottleneck::new(
            &args(&nodes, 8, 4, 2, true, Connect::Add),
            var_builder(&varmap),
        )
        .unwrap();
        let x = Tensor::rand(0f32, 1., (1, 8, 9, 9), &Device::Cpu).unwrap();
        assert_eq!(block.forward_t(&x, false).unwrap().dims(), &[1, 16, 5, 5]);
    }

    #[test]
    fn grouped_dilated_conv_keeps_spatial_size() {
        let varmap = VarMap::new();
        let nodes = NodeConfig::default();
        let mut a = args(&nodes, 16, 4, 1, false, Connect::Add);
        a.groups = 4;
        a.base_width = 16;
        a.dilation = 2;
        let mut block = Bottleneck::new(&a, var_builder(&varmap)).unwrap();
        let x = Tensor::rand(0f32, 1., (1, 16, 6, 6), &Device::Cpu).unwrap();
        assert_eq!(block.forward_t(&x, false).unwrap().dims(), &[1, 16, 6, 6]);

        let data = varmap.data().lock().unwrap();
        // width = 4 * 16 / 64 * 4 = 4, grouped into 4 -> one input channel per group
        assert_eq!(data["conv2.weight"].dims(), &[4, 1, 3, 3]);
    }

    #[test]
    fn iand_merges_residual_first() {
        let varmap = VarMap::new();
        let nodes = NodeConfig::default();
        let block = Bottleneck::new(
            &args(&nodes, 8, 2, 1, false, Connect::Iand),
            var_builder(&varmap),
        )
        .unwrap();
        let identity = Tensor::ones((1, 2, 1, 1), DType::F32, &Device::Cpu).unwrap();
        let out = Tensor::zeros((1, 2, 1, 1), DType::F32, &Device::Cpu).unwrap();
        // out * (1 - identity): the opposite of BasicBlock for the same operands
        let merged = block.merge(&identity, &out).unwrap();
        assert_eq!(merged.flatten_all().unwrap().to_vec1::<f32>().unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn zero_init_residual_zeroes_bn3_only() {
        let varmap = VarMap::new();
        let nodes = NodeConfig::default();
        let mut a = args(&nodes, 8, 4, 1, true, Connect::Add);
        a.zero_init_residual = true;
        Bottleneck::new(&a, var_builder(&varmap)).unwrap();

        assert!(values(&varmap, "bn3.weight").iter().all(|&w| w == 0.0));
        for name in ["bn1.weight", "bn2.weight", "downsample.1.weight"] {
            assert!(values(&varmap, name).iter().all(|&w| w == 1.0), "{name}");
        }
    }
}
