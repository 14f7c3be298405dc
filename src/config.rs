use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::encoder::EncodeType;
use crate::error::{Result, SewError};
use crate::node::NodeConfig;
use crate::sew::Connect;

/// Forward-pass strategy, fixed when the network is built
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecMode {
    /// one pass over a `(T * B, ...)` batch
    Folded,
    /// one pass per timestep, node state carried across the loop
    #[default]
    Looped,
    /// a single pass with no time dimension, no encoder and no reset
    Once,
}

impl ExecMode {
    /// Maps the `layer_by_layer` / `once` flag pair onto a mode. `once` wins.
    pub fn from_flags(layer_by_layer: bool, once: bool) -> Self {
        match (once, layer_by_layer) {
            (true, _) => ExecMode::Once,
            (false, true) => ExecMode::Folded,
            (false, false) => ExecMode::Looped,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SewConfig {
    pub num_classes: usize,
    /// number of simulated timesteps
    pub step: usize,
    pub encode_type: EncodeType,
    /// start the last norm of every residual branch at zero
    pub zero_init_residual: bool,
    pub groups: usize,
    pub width_per_group: usize,
    pub replace_stride_with_dilation: Option<Vec<bool>>,
    pub cnf: Connect,
    pub node: NodeConfig,
    /// dataset name, only used to pick the input channel count
    pub dataset: String,
    pub mode: ExecMode,
    /// average logits over timesteps, otherwise return them per step as (T, B, C)
    pub sum_output: bool,
    pub pretrained: bool,
    pub progress: bool,
    /// local checkpoint to use instead of the torch hub cache
    pub checkpoint: Option<PathBuf>,
}

impl Default for SewConfig {
    fn default() -> Self {
        Self {
            num_classes: 1000,
            step: 8,
            encode_type: EncodeType::Direct,
            zero_init_residual: false,
            groups: 1,
            width_per_group: 64,
            replace_stride_with_dilation: None,
            cnf: Connect::Add,
            node: NodeConfig::default(),
            dataset: "imagenet".to_string(),
            mode: ExecMode::Looped,
            sum_output: true,
            pretrained: false,
            progress: true,
            checkpoint: None,
        }
    }
}

impl SewConfig {
    /// Default configuration running in the mode picked by the legacy
    /// `layer_by_layer` / `once` flags.
    pub fn from_flags(layer_by_layer: bool, once: bool) -> Self {
        Self {
            mode: ExecMode::from_flags(layer_by_layer, once),
            ..Default::default()
        }
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let cfg: SewConfig = serde_json::from_reader(std::io::BufReader::new(file))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.step == 0 {
            return Err(SewError::ZeroStep);
        }
        self.dilation_flags()?;
        Ok(())
    }

    /// per-stack stride-to-dilation flags for the stacks after the first
    pub fn dilation_flags(&self) -> Result<[bool; 3]> {
        match &self.replace_stride_with_dilation {
            None => Ok([false; 3]),
            Some(flags) => <[bool; 3]>::try_from(flags.as_slice())
                .map_err(|_| SewError::InvalidDilation(flags.len())),
        }
    }

    pub fn in_channels(&self) -> usize {
        if is_dvs_data(&self.dataset) { 2 } else { 3 }
    }
}

const EVENT_DATASETS: [&str; 6] = ["ncaltech101", "ncars", "nmnist", "n-mnist", "es-imagenet", "shd"];

/// event-camera datasets deliver two polarity channels instead of RGB
pub fn is_dvs_data(dataset: &str) -> bool {
    let name = dataset.to_lowercase();
    name.contains("dvs") || EVENT_DATASETS.iter().any(|d| name.starts_with(d))
}
