use candle_core::Tensor;
use serde::{Deserialize, Serialize};

use crate::error::CandleResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncodeType {
    /// feed the input as-is at every timestep; event streams are split along their time axis
    #[default]
    Direct,
    /// Bernoulli spikes with probability clamp(x, 0, 1)
    Rate,
}

pub struct Encoder {
    encode_type: EncodeType,
    step: usize,
}

impl Encoder {
    pub fn new(encode_type: EncodeType, step: usize) -> Self {
        Self { encode_type, step }
    }

    pub fn step(&self) -> usize {
        self.step
    }

    /// `(T * B, ...)`, time-major
    pub fn folded(&self, x: &Tensor) -> CandleResult<Tensor> {
        Tensor::cat(&self.steps(x)?, 0)
    }

    /// one `(B, ...)` tensor per timestep
    pub fn steps(&self, x: &Tensor) -> CandleResult<Vec<Tensor>> {
        // (B, T, C, H, W) event frames already carry their own time axis
        let frames: Vec<Tensor> = if x.rank() == 5 {
            let t = x.dim(1)?;
            if t != self.step {
                candle_core::bail!("event input has {t} frames but the network runs {} steps", self.step)
            }
            (0..t)
                .map(|i| x.narrow(1, i, 1)?.squeeze(1)?.contiguous())
                .collect::<CandleResult<_>>()?
        } else {
            vec![x.clone(); self.step]
        };

        match self.encode_type {
            EncodeType::Direct => Ok(frames),
            EncodeType::Rate => frames.iter().map(bernoulli).collect(),
        }
    }
}

fn bernoulli(x: &Tensor) -> CandleResult<Tensor> {
    let p = x.clamp(0.0, 1.0)?;
    let random_vals = Tensor::rand_like(&p, 0.0, 1.0)?;
    random_vals.lt(&p)?.to_dtype(x.dtype())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn image() -> Tensor {
        Tensor::arange(0f32, 8., &Device::Cpu)
            .unwrap()
            .reshape((2, 1, 2, 2))
            .unwrap()
    }

    #[test]
    fn direct_folded_is_time_major() {
        let x = image();
        let enc = Encoder::new(EncodeType::Direct, 3);
        let out = enc.folded(&x).unwrap();
        assert_eq!(out.dims(), &[6, 1, 2, 2]);
        let expected = Tensor::cat(&[&x, &x, &x], 0).unwrap();
        assert_eq!(
            out.flatten_all().unwrap().to_vec1::<f32>().unwrap(),
            expected.flatten_all().unwrap().to_vec1::<f32>().unwrap()
        );
    }

    #[test]
    fn event_frames_are_split_along_time() {
        let dev = Device::Cpu;
        // (B=2, T=3, C=2, H=1, W=1), value encodes the frame index
        let x = Tensor::arange(0f32, 3., &dev)
            .unwrap()
            .reshape((1, 3, 1, 1, 1))
            .unwrap()
            .repeat((2, 1, 2, 1, 1))
            .unwrap();
        let enc = Encoder::new(EncodeType::Direct, 3);
        let steps = enc.steps(&x).unwrap();
        assert_eq!(steps.len(), 3);
        for (t, frame) in steps.iter().enumerate() {
            assert_eq!(frame.dims(), &[2, 2, 1, 1]);
            let v = frame.flatten_all().unwrap().to_vec1::<f32>().unwrap();
            assert!(v.iter().all(|&e| e == t as f32));
        }
    }

    #[test]
    fn event_frames_must_match_step() {
        let x = Tensor::zeros((1, 4, 2, 3, 3), DType::F32, &Device::Cpu).unwrap();
        let enc = Encoder::new(EncodeType::Direct, 3);
        assert!(enc.folded(&x).is_err());
    }

    #[test]
    fn rate_coding_is_binary_and_respects_extremes() {
        let dev = Device::Cpu;
        let x = Tensor::new(&[[0.0f32, 1.0, 0.5, 2.0]], &dev).unwrap();
        let enc = Encoder::new(EncodeType::Rate, 4);
        let steps = enc.steps(&x).unwrap();
        for s in steps {
            let v = s.to_vec2::<f32>().unwrap()[0].clone();
            assert_eq!(v[0], 0.0);
            assert_eq!(v[1], 1.0);
            assert!(v[2] == 0.0 || v[2] == 1.0);
            assert_eq!(v[3], 1.0);
        }
    }
}
