use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use log::info;
use std::collections::HashMap;
use std::path::Path;
use tqdm::Iter;

use crate::error::{Result, SewError};

/// Reads a `.safetensors` or torch pickle (`.pth`/`.pt`) state dict.
pub fn read_state_dict(path: &Path, device: &Device) -> Result<HashMap<String, Tensor>> {
    let is_safetensors = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("safetensors"));
    if is_safetensors {
        Ok(candle_core::safetensors::load(path, device)?)
    } else {
        candle_core::pickle::read_all(path)?
            .into_iter()
            .map(|(name, t)| Ok::<_, SewError>((name, t.to_device(device)?)))
            .collect()
    }
}

/// Copies every parameter of `varmap` from the checkpoint at `path`.
///
/// Extra checkpoint entries (e.g. `num_batches_tracked`) are ignored, but a parameter that is
/// missing or shaped differently aborts the load.
pub fn load_into(varmap: &VarMap, path: &Path, progress: bool) -> Result<()> {
    let data = varmap.data().lock().map_err(|_| SewError::Poisoned)?;
    let device = match data.values().next() {
        Some(var) => var.device().clone(),
        None => return Ok(()),
    };
    let state = read_state_dict(path, &device)?;

    // check everything before touching any parameter
    let mut names: Vec<String> = data.keys().cloned().collect();
    names.sort();
    for name in &names {
        let expected = data[name].dims();
        let tensor = state
            .get(name)
            .ok_or_else(|| SewError::MissingParameter(name.clone()))?;
        if tensor.dims() != expected {
            return Err(SewError::ShapeMismatch {
                name: name.clone(),
                expected: expected.to_vec(),
                actual: tensor.dims().to_vec(),
            });
        }
    }

    let names: Box<dyn Iterator<Item = String>> = if progress {
        Box::new(names.into_iter().tqdm())
    } else {
        Box::new(names.into_iter())
    };
    let mut loaded = 0;
    for name in names {
        let var = &data[&name];
        var.set(&state[&name].to_dtype(var.dtype())?)?;
        loaded += 1;
    }
    info!("loaded {loaded} parameters from {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use candle_nn::{Init, VarBuilder};

    fn tmp(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("sew_resnet_{}_{name}", std::process::id()))
    }

    fn varmap_with(shape: (usize, usize), value: f64) -> VarMap {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        vb.get_with_hints(shape, "fc.weight", Init::Const(value)).unwrap();
        varmap
    }

    #[test]
    fn round_trips_safetensors() {
        let path = tmp("round_trip.safetensors");
        varmap_with((2, 3), 7.0).save(&path).unwrap();

        let target = varmap_with((2, 3), 0.0);
        load_into(&target, &path, false).unwrap();
        let data = target.data().lock().unwrap();
        let v = data["fc.weight"].flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(v.iter().all(|&x| x == 7.0));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn shape_mismatch_is_fatal_and_leaves_parameters_untouched() {
        let path = tmp("mismatch.safetensors");
        varmap_with((4, 3), 7.0).save(&path).unwrap();

        let target = varmap_with((2, 3), 0.0);
        let err = load_into(&target, &path, false);
        assert!(matches!(
            err,
            Err(SewError::ShapeMismatch { ref expected, ref actual, .. })
                if expected == &[2, 3] && actual == &[4, 3]
        ));
        let data = target.data().lock().unwrap();
        let v = data["fc.weight"].flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert!(v.iter().all(|&x| x == 0.0));
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn missing_parameter_is_fatal() {
        let path = tmp("missing.safetensors");
        let other = VarMap::new();
        VarBuilder::from_varmap(&other, DType::F32, &Device::Cpu)
            .get_with_hints((2, 3), "fc.bias", Init::Const(1.0))
            .unwrap();
        other.save(&path).unwrap();

        let target = varmap_with((2, 3), 0.0);
        assert!(matches!(
            load_into(&target, &path, false),
            Err(SewError::MissingParameter(name)) if name == "fc.weight"
        ));
        std::fs::remove_file(&path).ok();
    }
}
