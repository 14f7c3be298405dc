//! One constructor per published SEW-ResNet architecture.
//!
//! "Deep Residual Learning in Spiking Neural Networks" <https://arxiv.org/abs/2102.04159>,
//! built on the torchvision ResNet family.

use candle_core::{DType, Device};
use candle_nn::{VarBuilder, VarMap};
use log::{info, warn};
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::block::BlockKind;
use crate::checkpoint;
use crate::config::SewConfig;
use crate::error::{Result, SewError};
use crate::model::{SewResNet, Variant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    SewResnet18,
    SewResnet34,
    SewResnet50,
    SewResnet101,
    SewResnet152,
    SewResnext50_32x4d,
    SewResnext101_32x8d,
    SewWideResnet50_2,
    SewWideResnet101_2,
    SewResnet19,
    SewResnet20,
    SewResnet32,
    SewResnet44,
    SewResnet56,
}

/// Fixed topology of a published architecture
pub struct ArchSpec {
    pub variant: Variant,
    pub kind: BlockKind,
    pub layers: &'static [usize],
    /// `(groups, width_per_group)` override
    pub width: Option<(usize, usize)>,
}

impl ArchSpec {
    fn new(
        variant: Variant,
        kind: BlockKind,
        layers: &'static [usize],
        width: Option<(usize, usize)>,
    ) -> Self {
        Self {
            variant,
            kind,
            layers,
            width,
        }
    }
}

impl Arch {
    pub const ALL: [Arch; 14] = [
        Arch::SewResnet18,
        Arch::SewResnet34,
        Arch::SewResnet50,
        Arch::SewResnet101,
        Arch::SewResnet152,
        Arch::SewResnext50_32x4d,
        Arch::SewResnext101_32x8d,
        Arch::SewWideResnet50_2,
        Arch::SewWideResnet101_2,
        Arch::SewResnet19,
        Arch::SewResnet20,
        Arch::SewResnet32,
        Arch::SewResnet44,
        Arch::SewResnet56,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Arch::SewResnet18 => "sew_resnet18",
            Arch::SewResnet34 => "sew_resnet34",
            Arch::SewResnet50 => "sew_resnet50",
            Arch::SewResnet101 => "sew_resnet101",
            Arch::SewResnet152 => "sew_resnet152",
            Arch::SewResnext50_32x4d => "sew_resnext50_32x4d",
            Arch::SewResnext101_32x8d => "sew_resnext101_32x8d",
            Arch::SewWideResnet50_2 => "sew_wide_resnet50_2",
            Arch::SewWideResnet101_2 => "sew_wide_resnet101_2",
            Arch::SewResnet19 => "sew_resnet19",
            Arch::SewResnet20 => "sew_resnet20",
            Arch::SewResnet32 => "sew_resnet32",
            Arch::SewResnet44 => "sew_resnet44",
            Arch::SewResnet56 => "sew_resnet56",
        }
    }

    pub fn spec(self) -> ArchSpec {
        use BlockKind::{Basic, Bottleneck};
        use Variant::{Cifar, ImageNet, ResNet19};
        match self {
            Arch::SewResnet18 => ArchSpec::new(ImageNet, Basic, &[2, 2, 2, 2], None),
            Arch::SewResnet34 => ArchSpec::new(ImageNet, Basic, &[3, 4, 6, 3], None),
            Arch::SewResnet50 => ArchSpec::new(ImageNet, Bottleneck, &[3, 4, 6, 3], None),
            Arch::SewResnet101 => ArchSpec::new(ImageNet, Bottleneck, &[3, 4, 23, 3], None),
            Arch::SewResnet152 => ArchSpec::new(ImageNet, Bottleneck, &[3, 8, 36, 3], None),
            Arch::SewResnext50_32x4d => {
                ArchSpec::new(ImageNet, Bottleneck, &[3, 4, 6, 3], Some((32, 4)))
            }
            Arch::SewResnext101_32x8d => {
                ArchSpec::new(ImageNet, Bottleneck, &[3, 4, 23, 3], Some((32, 8)))
            }
            Arch::SewWideResnet50_2 => {
                ArchSpec::new(ImageNet, Bottleneck, &[3, 4, 6, 3], Some((1, 64 * 2)))
            }
            Arch::SewWideResnet101_2 => {
                ArchSpec::new(ImageNet, Bottleneck, &[3, 4, 23, 3], Some((1, 64 * 2)))
            }
            Arch::SewResnet19 => ArchSpec::new(ResNet19, Basic, &[3, 3, 2], None),
            Arch::SewResnet20 => ArchSpec::new(Cifar, Basic, &[3, 3, 3], None),
            Arch::SewResnet32 => ArchSpec::new(Cifar, Basic, &[5, 5, 5], None),
            Arch::SewResnet44 => ArchSpec::new(Cifar, Basic, &[7, 7, 7], None),
            Arch::SewResnet56 => ArchSpec::new(Cifar, Basic, &[9, 9, 9], None),
        }
    }

    /// torchvision ANN checkpoint the architecture can be initialised from
    pub fn model_url(self) -> Option<&'static str> {
        match self {
            Arch::SewResnet18 => Some("https://download.pytorch.org/models/resnet18-f37072fd.pth"),
            Arch::SewResnet34 => Some("https://download.pytorch.org/models/resnet34-b627a593.pth"),
            Arch::SewResnet50 => Some("https://download.pytorch.org/models/resnet50-0676ba61.pth"),
            Arch::SewResnet101 => Some("https://download.pytorch.org/models/resnet101-63fe2227.pth"),
            Arch::SewResnet152 => Some("https://download.pytorch.org/models/resnet152-394f9c45.pth"),
            Arch::SewResnext50_32x4d => {
                Some("https://download.pytorch.org/models/resnext50_32x4d-7cdf4587.pth")
            }
            Arch::SewResnext101_32x8d => {
                Some("https://download.pytorch.org/models/resnext101_32x8d-8ba56ff5.pth")
            }
            Arch::SewWideResnet50_2 => {
                Some("https://download.pytorch.org/models/wide_resnet50_2-95faca4d.pth")
            }
            Arch::SewWideResnet101_2 => {
                Some("https://download.pytorch.org/models/wide_resnet101_2-32ee1156.pth")
            }
            Arch::SewResnet19
            | Arch::SewResnet20
            | Arch::SewResnet32
            | Arch::SewResnet44
            | Arch::SewResnet56 => None,
        }
    }

    /// Builds the network into `varmap`, loading pretrained weights when `cfg.pretrained` is set.
    pub fn build(self, cfg: &SewConfig, varmap: &VarMap, device: &Device) -> Result<SewResNet> {
        let spec = self.spec();
        let mut cfg = cfg.clone();
        if let Some((groups, width_per_group)) = spec.width {
            cfg.groups = groups;
            cfg.width_per_group = width_per_group;
        }
        let vb = VarBuilder::from_varmap(varmap, DType::F32, device);
        let model = SewResNet::new(spec.variant, spec.kind, spec.layers, &cfg, vb)?;
        if cfg.pretrained {
            self.load_pretrained(&cfg, varmap)?;
        }
        Ok(model)
    }

    fn load_pretrained(self, cfg: &SewConfig, varmap: &VarMap) -> Result<()> {
        match self.checkpoint_path(cfg, &torch_home())? {
            Some(path) => {
                info!("initialising {self} from {}", path.display());
                checkpoint::load_into(varmap, &path, cfg.progress)
            }
            None => {
                warn!("{self} has no reference checkpoint, ignoring pretrained=true");
                Ok(())
            }
        }
    }

    /// `cfg.checkpoint` if set, else the cached hub file for [`Arch::model_url`]
    fn checkpoint_path(self, cfg: &SewConfig, torch_home: &Path) -> Result<Option<PathBuf>> {
        if let Some(path) = &cfg.checkpoint {
            return Ok(Some(path.clone()));
        }
        let Some(url) = self.model_url() else {
            return Ok(None);
        };
        let path = hub_checkpoint_path(torch_home, url);
        if !path.exists() {
            return Err(SewError::CheckpointNotCached {
                arch: self.to_string(),
                url,
                path,
            });
        }
        Ok(Some(path))
    }
}

/// `$TORCH_HOME`, else `$XDG_CACHE_HOME/torch`, else `~/.cache/torch`
pub fn torch_home() -> PathBuf {
    torch_home_from(|key| std::env::var_os(key))
}

fn torch_home_from(var: impl Fn(&str) -> Option<OsString>) -> PathBuf {
    if let Some(dir) = var("TORCH_HOME") {
        return PathBuf::from(dir);
    }
    let cache = var("XDG_CACHE_HOME").map(PathBuf::from).unwrap_or_else(|| {
        let home = var("HOME").map(PathBuf::from).unwrap_or_default();
        home.join(".cache")
    });
    cache.join("torch")
}

pub fn hub_checkpoint_path(torch_home: &Path, url: &str) -> PathBuf {
    let file = url.rsplit('/').next().unwrap_or(url);
    torch_home.join("hub").join("checkpoints").join(file)
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Arch {
    type Err = SewError;

    fn from_str(s: &str) -> Result<Self> {
        Arch::ALL
            .into_iter()
            .find(|a| a.name() == s)
            .ok_or_else(|| SewError::UnknownArch(s.to_string()))
    }
}

macro_rules! factories {
    ($($(#[$doc:meta])* $fn_name:ident => $arch:expr;)*) => {
        $(
            $(#[$doc])*
            pub fn $fn_name(cfg: &SewConfig, varmap: &VarMap, device: &Device) -> Result<SewResNet> {
                $arch.build(cfg, varmap, device)
            }
        )*
    };
}

factories! {
    /// SEW ResNet-18
    sew_resnet18 => Arch::SewResnet18;
    /// SEW ResNet-34
    sew_resnet34 => Arch::SewResnet34;
    /// SEW ResNet-50
    sew_resnet50 => Arch::SewResnet50;
    /// SEW ResNet-101
    sew_resnet101 => Arch::SewResnet101;
    /// SEW ResNet-152
    sew_resnet152 => Arch::SewResnet152;
    /// SEW ResNeXt-50 32x4d (groups 32, width 4)
    sew_resnext50_32x4d => Arch::SewResnext50_32x4d;
    /// SEW ResNeXt-101 32x8d (groups 32, width 8)
    sew_resnext101_32x8d => Arch::SewResnext101_32x8d;
    /// SEW Wide ResNet-50-2: bottleneck width doubled, outer 1x1 convs unchanged
    sew_wide_resnet50_2 => Arch::SewWideResnet50_2;
    /// SEW Wide ResNet-101-2
    sew_wide_resnet101_2 => Arch::SewWideResnet101_2;
    /// 19-layer hybrid: CIFAR stem, three stacks, fc -> node -> fc head
    sew_resnet19 => Arch::SewResnet19;
    sew_resnet20 => Arch::SewResnet20;
    sew_resnet32 => Arch::SewResnet32;
    sew_resnet44 => Arch::SewResnet44;
    sew_resnet56 => Arch::SewResnet56;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for arch in Arch::ALL {
            assert_eq!(arch.name().parse::<Arch>().unwrap(), arch);
        }
        assert!(matches!(
            "sew_resnet7".parse::<Arch>(),
            Err(SewError::UnknownArch(_))
        ));
    }

    #[test]
    fn only_imagenet_variants_have_checkpoints() {
        for arch in Arch::ALL {
            assert_eq!(
                arch.model_url().is_some(),
                arch.spec().variant == Variant::ImageNet,
                "{arch}"
            );
        }
    }

    fn env(vars: &[(&'static str, &'static str)]) -> impl Fn(&str) -> Option<OsString> {
        let vars = vars.to_vec();
        move |key: &str| vars.iter().find(|(k, _)| *k == key).map(|(_, v)| OsString::from(*v))
    }

    #[test]
    fn torch_home_prefers_torch_home_then_xdg_cache() {
        let all = [("TORCH_HOME", "/t"), ("XDG_CACHE_HOME", "/xdg"), ("HOME", "/home/u")];
        assert_eq!(torch_home_from(env(&all)), Path::new("/t"));
        assert_eq!(torch_home_from(env(&all[1..])), Path::new("/xdg/torch"));
        assert_eq!(torch_home_from(env(&all[2..])), Path::new("/home/u/.cache/torch"));
    }

    #[test]
    fn hub_path_uses_url_file_name() {
        let path = hub_checkpoint_path(
            Path::new("/opt/torch"),
            "https://download.pytorch.org/models/resnet18-f37072fd.pth",
        );
        assert_eq!(path, Path::new("/opt/torch/hub/checkpoints/resnet18-f37072fd.pth"));
    }

    #[test]
    fn missing_cache_names_the_url() {
        let cfg = SewConfig {
            pretrained: true,
            ..Default::default()
        };
        let empty_hub = std::env::temp_dir().join("sew_resnet_no_such_hub");
        let err = Arch::SewResnet50.checkpoint_path(&cfg, &empty_hub);
        assert!(matches!(
            err,
            Err(SewError::CheckpointNotCached { url, .. }) if url.ends_with("resnet50-0676ba61.pth")
        ));
    }

    #[test]
    fn explicit_checkpoint_wins_and_cifar_has_none() {
        let cfg = SewConfig {
            checkpoint: Some(PathBuf::from("weights.safetensors")),
            ..Default::default()
        };
        let hub = Path::new("/nonexistent");
        assert_eq!(
            Arch::SewResnet18.checkpoint_path(&cfg, hub).unwrap(),
            Some(PathBuf::from("weights.safetensors"))
        );
        assert_eq!(
            Arch::SewResnet20.checkpoint_path(&SewConfig::default(), hub).unwrap(),
            None
        );
    }
}
