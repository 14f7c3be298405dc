use std::error::Error;

use candle_core::Device;
use candle_nn::VarMap;
use sew_resnet::utils::parameter_count;
use sew_resnet::{Arch, SewConfig};

/// Builds each named architecture (all of them by default) and prints its parameter count.
fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let archs = std::env::args()
        .skip(1)
        .map(|name| name.parse::<Arch>())
        .collect::<Result<Vec<_>, _>>()?;
    let archs = if archs.is_empty() {
        Arch::ALL.to_vec()
    } else {
        archs
    };

    let cfg = SewConfig::default();
    for arch in archs {
        let varmap = VarMap::new();
        let model = arch.build(&cfg, &varmap, &Device::Cpu)?;
        let n_params = parameter_count(&varmap)?;
        println!(
            "{:<24} {:<15} {n_params:>12}",
            arch.name(),
            model.variant().name()
        );
    }
    Ok(())
}
