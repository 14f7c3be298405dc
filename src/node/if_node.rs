use candle_core::Tensor;

use super::{Membrane, Node, TimeFold};
use crate::error::CandleResult;

/// Integrate-and-fire node, no leak
#[allow(clippy::upper_case_acronyms)]
pub struct IFNode {
    membrane: Membrane,
    fold: TimeFold,
}

impl IFNode {
    pub(crate) fn new(membrane: Membrane, fold: TimeFold) -> Self {
        Self { membrane, fold }
    }

    fn step(&mut self, x: &Tensor) -> CandleResult<Tensor> {
        let mem = self.membrane.potential(x)?;
        self.membrane.fire(mem.add(x)?)
    }
}

impl Node for IFNode {
    fn forward(&mut self, x: &Tensor) -> CandleResult<Tensor> {
        let fold = self.fold;
        fold.unfold(x, |xt| self.step(xt))
    }

    fn reset(&mut self) {
        self.membrane.clear();
    }
}
