use crate::error::{CandleResult, SewError};
use candle_core::Tensor;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Spike-element-wise connect function applied where a residual block merges its two paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Connect {
    #[default]
    Add,
    And,
    Iand,
}

impl FromStr for Connect {
    type Err = SewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ADD" => Ok(Connect::Add),
            "AND" => Ok(Connect::And),
            "IAND" => Ok(Connect::Iand),
            other => Err(SewError::UnsupportedConnect(other.to_string())),
        }
    }
}

impl fmt::Display for Connect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Connect::Add => "ADD",
            Connect::And => "AND",
            Connect::Iand => "IAND",
        };
        f.write_str(tag)
    }
}

/// g(x, y). `Iand` is asymmetric: x * (1 - y).
pub fn sew_function(x: &Tensor, y: &Tensor, cnf: Connect) -> CandleResult<Tensor> {
    match cnf {
        Connect::Add => x.add(y),
        Connect::And => x.mul(y),
        Connect::Iand => x.mul(&(1.0 - y)?),
    }
}
