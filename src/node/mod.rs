pub mod if_node;
pub mod lif;
pub mod relu;

use candle_core::Tensor;
use candle_nn::ops::sigmoid;
use serde::{Deserialize, Serialize};

use crate::error::CandleResult;
use if_node::IFNode;
use lif::LIFNode;
use relu::ReluNode;

/// A stateful nonlinearity standing in for an activation function.
pub trait Node: Send + Sync {
    /// advance the internal state by the timestep(s) in `x`, output has the shape of `x`
    fn forward(&mut self, x: &Tensor) -> CandleResult<Tensor>;

    /// resets internal state fully
    fn reset(&mut self);
}

/// How a node interprets the leading dimension of its input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeFold {
    /// each call is one timestep
    PerCall,
    /// leading dim is `(T * B)`, time-major
    Folded(usize),
}

impl TimeFold {
    /// Runs `step_fn` once per timestep contained in `x` and reassembles the outputs.
    pub fn unfold<F>(self, x: &Tensor, mut step_fn: F) -> CandleResult<Tensor>
    where
        F: FnMut(&Tensor) -> CandleResult<Tensor>,
    {
        match self {
            TimeFold::PerCall => step_fn(x),
            TimeFold::Folded(step) => {
                let n = x.dim(0)?;
                if step == 0 || n % step != 0 {
                    candle_core::bail!("leading dim {n} is not a multiple of step {step}")
                }
                let outs = x
                    .chunk(step, 0)?
                    .iter()
                    .map(&mut step_fn)
                    .collect::<CandleResult<Vec<_>>>()?;
                Tensor::cat(&outs, 0)
            }
        }
    }
}

/// Builds fresh, independent nodes while a network is being assembled
pub trait NodeFactory: Send + Sync {
    fn make(&self, fold: TimeFold) -> Box<dyn Node>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    #[default]
    Lif,
    If,
    Relu,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub kind: NodeKind,
    /// firing threshold
    pub threshold: f64,
    /// membrane time constant (LIF only)
    pub tau: f64,
    /// subtract the threshold on a spike instead of zeroing the membrane
    pub soft_reset: bool,
    /// slope of the sigmoid surrogate gradient
    pub surrogate_alpha: f64,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            kind: NodeKind::Lif,
            threshold: 0.5,
            tau: 2.0,
            soft_reset: false,
            surrogate_alpha: 4.0,
        }
    }
}

impl NodeFactory for NodeConfig {
    fn make(&self, fold: TimeFold) -> Box<dyn Node> {
        match self.kind {
            NodeKind::Lif => Box::new(LIFNode::new(Membrane::new(self), self.tau, fold)),
            NodeKind::If => Box::new(IFNode::new(Membrane::new(self), fold)),
            NodeKind::Relu => Box::new(ReluNode),
        }
    }
}

/// Membrane potential shared by the integrate-and-fire style nodes
pub(crate) struct Membrane {
    mem: Option<Tensor>,
    threshold: f64,
    soft_reset: bool,
    alpha: f64,
}

impl Membrane {
    fn new(cfg: &NodeConfig) -> Self {
        Self {
            mem: None,
            threshold: cfg.threshold,
            soft_reset: cfg.soft_reset,
            alpha: cfg.surrogate_alpha,
        }
    }

    /// current potential, zeros after a reset
    pub(crate) fn potential(&self, like: &Tensor) -> CandleResult<Tensor> {
        match &self.mem {
            Some(mem) if mem.dims() == like.dims() => Ok(mem.clone()),
            Some(mem) => candle_core::bail!(
                "node state has shape {:?} but input has {:?}, reset the node first",
                mem.dims(),
                like.dims()
            ),
            None => like.zeros_like(),
        }
    }

    /// emits spikes where `mem >= threshold` and applies the reset rule
    pub(crate) fn fire(&mut self, mem: Tensor) -> CandleResult<Tensor> {
        let v = mem.affine(1.0, -self.threshold)?;
        let heaviside = v.ge(0.0)?.to_dtype(mem.dtype())?;
        // forward value is exactly the step function, gradient flows through the sigmoid
        let sg = sigmoid(&v.affine(self.alpha, 0.0)?)?;
        let spikes = (&heaviside + (&sg - sg.detach())?)?;

        let mem = if self.soft_reset {
            (&mem - (self.threshold * &heaviside)?)?
        } else {
            mem.mul(&(1.0 - &heaviside)?)?
        };
        self.mem = Some(mem);
        Ok(spikes)
    }

    pub(crate) fn clear(&mut self) {
        self.mem = None;
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> Option<&Tensor> {
        self.mem.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn lif() -> NodeConfig {
        NodeConfig {
            kind: NodeKind::Lif,
            threshold: 1.0,
            tau: 2.0,
            ..Default::default()
        }
    }

    #[test]
    fn folded_node_matches_per_call_node() {
        let dev = Device::Cpu;
        let steps = [
            Tensor::new(&[[0.8f32, 2.5], [1.5, 0.1]], &dev).unwrap(),
            Tensor::new(&[[1.6f32, 0.0], [2.1, 3.0]], &dev).unwrap(),
            Tensor::new(&[[0.4f32, 2.2], [0.0, 1.9]], &dev).unwrap(),
        ];

        let mut per_call = lif().make(TimeFold::PerCall);
        let expected = steps
            .iter()
            .map(|x| per_call.forward(x))
            .collect::<CandleResult<Vec<_>>>()
            .unwrap();
        let expected = Tensor::cat(&expected, 0).unwrap();

        let mut folded = lif().make(TimeFold::Folded(3));
        let out = folded.forward(&Tensor::cat(&steps, 0).unwrap()).unwrap();

        assert_eq!(
            out.to_vec2::<f32>().unwrap(),
            expected.to_vec2::<f32>().unwrap()
        );
    }

    #[test]
    fn folded_node_rejects_indivisible_batch() {
        let x = Tensor::zeros((5, 2), DType::F32, &Device::Cpu).unwrap();
        let mut node = lif().make(TimeFold::Folded(2));
        assert!(node.forward(&x).is_err());
    }

    #[test]
    fn shape_change_without_reset_is_an_error() {
        let dev = Device::Cpu;
        let mut node = lif().make(TimeFold::PerCall);
        node.forward(&Tensor::ones((2, 3), DType::F32, &dev).unwrap())
            .unwrap();
        assert!(node
            .forward(&Tensor::ones((4, 3), DType::F32, &dev).unwrap())
            .is_err());

        node.reset();
        assert!(node
            .forward(&Tensor::ones((4, 3), DType::F32, &dev).unwrap())
            .is_ok());
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let cfg: NodeConfig = serde_json::from_str(r#"{"kind": "if", "threshold": 0.25}"#).unwrap();
        assert_eq!(cfg.kind, NodeKind::If);
        assert_eq!(cfg.threshold, 0.25);
        assert_eq!(cfg.tau, 2.0);
        assert!(!cfg.soft_reset);
    }
}
