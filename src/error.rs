use std::path::PathBuf;

/// Result type for model construction, configuration and checkpoint loading
pub type Result<T> = std::result::Result<T, SewError>;

/// Tensor-level result used by forward passes
pub use candle_core::Result as CandleResult;

#[derive(Debug, thiserror::Error)]
pub enum SewError {
    #[error("unsupported connect function `{0}`, expected one of ADD, AND, IAND")]
    UnsupportedConnect(String),

    #[error("replace_stride_with_dilation should be None or a 3-element list, got {0} elements")]
    InvalidDilation(usize),

    #[error("BasicBlock only supports groups=1 and base_width=64, got groups={groups} base_width={base_width}")]
    BasicBlockWidth { groups: usize, base_width: usize },

    #[error("dilation > 1 not supported in BasicBlock, got {0}")]
    BasicBlockDilation(usize),

    #[error("{variant} expects {expected} layer counts, got {got}")]
    StageCount {
        variant: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("step must be at least 1")]
    ZeroStep,

    #[error("unknown architecture `{0}`")]
    UnknownArch(String),

    #[error("no cached checkpoint for {arch} at {path:?}, fetch it from {url}")]
    CheckpointNotCached {
        arch: String,
        url: &'static str,
        path: PathBuf,
    },

    #[error("checkpoint is missing parameter `{0}`")]
    MissingParameter(String),

    #[error("shape mismatch for `{name}`: model has {expected:?}, checkpoint has {actual:?}")]
    ShapeMismatch {
        name: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("parameter store lock poisoned")]
    Poisoned,

    #[error(transparent)]
    Candle(#[from] candle_core::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}
