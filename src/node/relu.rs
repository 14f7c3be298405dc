use candle_core::Tensor;

use super::Node;
use crate::error::CandleResult;

/// Stateless ReLU, used to run the same topology as a plain ANN
pub struct ReluNode;

impl Node for ReluNode {
    fn forward(&mut self, x: &Tensor) -> CandleResult<Tensor> {
        x.relu()
    }

    fn reset(&mut self) {}
}
