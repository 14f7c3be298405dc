use std::error::Error;
use tqdm::Iter;

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use log::info;
use sew_resnet::utils::{parameter_count, save_logits_csv};
use sew_resnet::{Arch, ExecMode, SewConfig};

const USAGE: &str = "usage: sew_resnet <arch> [config.json] [logits.csv]";

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let arch: Arch = args.next().ok_or(USAGE)?.parse()?;
    let cfg = match args.next() {
        Some(path) => SewConfig::from_json_file(path)?,
        None => SewConfig {
            num_classes: 10,
            step: 4,
            dataset: "cifar10".to_string(),
            ..Default::default()
        },
    };
    let csv_out = args.next();

    let device = Device::new_cuda(0).unwrap_or(Device::Cpu);
    let varmap = VarMap::new();
    let mut model = arch.build(&cfg, &varmap, &device)?;

    let n_params = parameter_count(&varmap)?;
    info!("{arch}: {n_params} parameters on {device:?}");

    let batch_size = 2;
    let image_size = 32;
    let shape = match cfg.mode {
        // event-stream datasets carry their own time axis
        ExecMode::Folded | ExecMode::Looped if model.in_channels() == 2 => {
            vec![batch_size, model.step(), 2, image_size, image_size]
        }
        _ => vec![batch_size, model.in_channels(), image_size, image_size],
    };

    let mut logits = None;
    for _ in (0..4).tqdm() {
        let input = Tensor::rand(0f32, 1., shape.as_slice(), &device)?;
        let out = model.forward(&input)?;
        info!("input {:?} -> logits {:?}", input.dims(), out.dims());
        logits = Some(out);
    }

    if let (Some(path), Some(logits)) = (csv_out, logits) {
        save_logits_csv(&path, &logits.to_device(&Device::Cpu)?)?;
        println!("Saved logits to {path}");
    }
    println!("Done");
    Ok(())
}
