use candle_core::Tensor;

use super::{Membrane, Node, TimeFold};
use crate::error::CandleResult;

/// Leaky integrate-and-fire node
#[allow(clippy::upper_case_acronyms)]
pub struct LIFNode {
    membrane: Membrane,
    /// membrane time constant
    tau: f64,
    fold: TimeFold,
}

impl LIFNode {
    pub(crate) fn new(membrane: Membrane, tau: f64, fold: TimeFold) -> Self {
        Self {
            membrane,
            tau,
            fold,
        }
    }

    fn step(&mut self, x: &Tensor) -> CandleResult<Tensor> {
        let mem = self.membrane.potential(x)?;
        let dv = ((1.0 / self.tau) * x.sub(&mem)?)?;
        self.membrane.fire(mem.add(&dv)?)
    }
}

impl Node for LIFNode {
    fn forward(&mut self, x: &Tensor) -> CandleResult<Tensor> {
        let fold = self.fold;
        fold.unfold(x, |xt| self.step(xt))
    }

    fn reset(&mut self) {
        self.membrane.clear();
    }
}
