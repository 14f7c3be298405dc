use candle_core::{DType, Tensor};
use candle_nn::VarMap;
use std::path::Path;

use crate::error::{Result, SewError};

/// BatchNorm statistics live in the var map next to the weights but are not trained.
const BUFFER_SUFFIXES: [&str; 2] = ["running_mean", "running_var"];

/// Number of trainable scalars in `varmap`, BatchNorm running statistics excluded.
pub fn parameter_count(varmap: &VarMap) -> Result<usize> {
    let data = varmap.data().lock().map_err(|_| SewError::Poisoned)?;
    Ok(data
        .iter()
        .filter(|(name, _)| !BUFFER_SUFFIXES.iter().any(|s| name.ends_with(s)))
        .map(|(_, var)| var.elem_count())
        .sum())
}

/// Writes logits as CSV: one row per sample for `(B, C)`, `step,sample,...` rows for `(T, B, C)`.
pub fn save_logits_csv<P: AsRef<Path>>(path: P, logits: &Tensor) -> Result<()> {
    let logits = logits.to_dtype(DType::F32)?;
    let mut w = csv::Writer::from_path(path)?;
    match logits.rank() {
        3 => {
            let (_, _, classes) = logits.dims3()?;
            w.write_record(header(["step", "sample"], classes))?;
            for (t, step) in logits.to_vec3::<f32>()?.into_iter().enumerate() {
                for (b, row) in step.into_iter().enumerate() {
                    let mut record = vec![t.to_string(), b.to_string()];
                    record.extend(row.iter().map(f32::to_string));
                    w.write_record(&record)?;
                }
            }
        }
        _ => {
            let (_, classes) = logits.dims2()?;
            w.write_record(header(["sample"], classes))?;
            for (b, row) in logits.to_vec2::<f32>()?.into_iter().enumerate() {
                let mut record = vec![b.to_string()];
                record.extend(row.iter().map(f32::to_string));
                w.write_record(&record)?;
            }
        }
    }
    w.flush()?;
    Ok(())
}

fn header<const N: usize>(index: [&str; N], classes: usize) -> Vec<String> {
    index
        .iter()
        .map(|s| s.to_string())
        .chain((0..classes).map(|c| format!("class_{c}")))
        .collect()
}
