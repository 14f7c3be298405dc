//! Spike-element-wise (SEW) ResNets on candle.
//!
//! Residual blocks merge their two paths through a [`sew::Connect`] function instead of a plain
//! sum. Every conv/bn stage is followed by a stateful spiking [`node::Node`]. The network runs
//! for `step` timesteps per input, either looped or folded into the batch, or a single time.

pub mod block;
pub mod checkpoint;
pub mod config;
pub mod encoder;
pub mod error;
pub mod model;
pub mod node;
pub mod sew;
pub mod utils;
pub mod zoo;

pub use config::{ExecMode, SewConfig};
pub use error::{Result, SewError};
pub use model::{SewResNet, Variant};
pub use sew::{Connect, sew_function};
pub use zoo::Arch;
