use anyhow::{anyhow, Result};
use burn::module::{AutodiffModule, Module};
use burn::optim::AdamConfig;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use clap::{Parser, ValueEnum};
use cli_support::{prepare_output_dir, OutputDirArgs};
use edge_dataset::{DatasetFiles, TrainingData};
use edge_models::{BaselineEdgeNet, DilatedEdgeNet, EdgeModel};
use std::fs;
use std::path::{Path, PathBuf};

use crate::config::{ModelKind, RunConfig, RunSettings};
use crate::engine::{BurnEngine, TrainingEngine};
use crate::loss::LossComposer;
use crate::metrics::MetricsLog;
use crate::trainer::TrainingLoop;
use crate::{ADBackend, TrainBackend};

/// Resolved configuration snapshot written next to the metrics log.
pub const RUN_CONFIG_FILE: &str = "run_config.json";

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug)]
#[command(
    name = "train",
    about = "Train a boundary detector with periodic validation exports"
)]
pub struct TrainArgs {
    /// Architecture to train.
    #[arg(long, value_enum)]
    pub mode: Option<ModelKind>,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Directory with `<split>_images.json` and `<split>_labels.json`.
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// TOML file overlaid on the built-in defaults; CLI flags win over it.
    #[arg(long)]
    pub config: Option<PathBuf>,
    /// Train on train+valid and validate on the test split.
    #[arg(long, default_value_t = false)]
    pub combine_train_val: bool,
    #[arg(long)]
    pub epochs: Option<usize>,
    #[arg(long)]
    pub batch_size: Option<usize>,
    /// Initial learning rate.
    #[arg(long)]
    pub lr: Option<f64>,
    /// Export validation maps every N epochs.
    #[arg(long)]
    pub save_step: Option<usize>,
    /// Seed for shuffling and augmentation.
    #[arg(long)]
    pub seed: Option<u64>,
    #[command(flatten)]
    pub outputs: OutputDirArgs,
}

impl TrainArgs {
    /// Defaults, then the optional TOML file, then explicit flags.
    pub fn resolve_config(&self) -> Result<RunConfig> {
        let mut cfg = match &self.config {
            Some(path) => RunConfig::from_path(path)?,
            None => RunConfig::default(),
        };
        if let Some(mode) = self.mode {
            cfg.mode = mode;
        }
        if let Some(dir) = &self.data_dir {
            cfg.data_dir = dir.clone();
        }
        if self.combine_train_val {
            cfg.combine_train_val = true;
        }
        if let Some(n) = self.epochs {
            cfg.n_epochs = n;
        }
        if let Some(n) = self.batch_size {
            cfg.batch_size = n;
        }
        if let Some(lr) = self.lr {
            cfg.learning_rate = lr;
        }
        if let Some(n) = self.save_step {
            cfg.save_step = n;
        }
        if let Some(seed) = self.seed {
            cfg.seed = Some(seed);
        }
        if let Some(path) = &self.outputs.save_name {
            cfg.test_path = path.clone();
        }
        if let Some(path) = &self.outputs.log_path {
            cfg.log_path = path.clone();
        }
        if let Some(path) = &self.outputs.checkpoint_path {
            cfg.checkpoint_path = path.clone();
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

pub fn run_train(args: TrainArgs) -> Result<f32> {
    validate_backend_choice(args.backend)?;
    let cfg = args.resolve_config()?;

    let data = DatasetFiles::new(&cfg.data_dir)
        .load(cfg.combine_train_val)
        .map_err(|e| anyhow!("failed to load dataset at {}: {e}", cfg.data_dir.display()))?;
    let settings = RunSettings::new(cfg, &data)?;

    let policy = args.outputs.policy();
    let cfg = &settings.config;
    for dir in [&cfg.test_path, &cfg.log_path, &cfg.checkpoint_path] {
        prepare_output_dir(dir, policy)?;
    }
    fs::write(
        cfg.log_path.join(RUN_CONFIG_FILE),
        serde_json::to_string_pretty(cfg)?,
    )?;

    let device: <TrainBackend as Backend>::Device = Default::default();
    let model_cfg = cfg.model_config();
    match cfg.mode {
        ModelKind::Baseline => {
            let model = BaselineEdgeNet::<ADBackend>::new(&model_cfg, &device);
            train_model(&settings, &data, model, device)
        }
        ModelKind::Dilated => {
            let model = DilatedEdgeNet::<ADBackend>::new(&model_cfg, &device);
            train_model(&settings, &data, model, device)
        }
    }
}

/// Train `model` with Adam for the configured number of epochs.
pub fn train_model<M>(
    settings: &RunSettings,
    data: &TrainingData,
    model: M,
    device: <TrainBackend as Backend>::Device,
) -> Result<f32>
where
    M: AutodiffModule<ADBackend> + EdgeModel<ADBackend>,
    M::InnerModule: EdgeModel<TrainBackend>,
{
    let cfg = &settings.config;
    let optim = AdamConfig::new().init::<ADBackend, M>();
    let engine: BurnEngine<ADBackend, M, _> =
        BurnEngine::new(model, optim, LossComposer::new(cfg.sparsity), device);
    tracing::info!(
        "Training {:?} model with {} parameters on {} samples",
        cfg.mode,
        engine.parameter_count(),
        data.train.len()
    );

    let metrics = MetricsLog::create(&cfg.log_path)?;
    let mut trainer = TrainingLoop::new(settings, data, engine).with_metrics_log(metrics);
    let loss = trainer.run()?;
    tracing::info!("Saved checkpoint to {}", cfg.checkpoint_file().display());
    Ok(loss)
}

/// Restore parameters saved by [`TrainingEngine::save_checkpoint`] into `model`.
pub fn load_checkpoint<B: Backend, M: Module<B>>(model: M, path: &Path, device: &B::Device) -> Result<M> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .load_file(path.to_path_buf(), &recorder, device)
        .map_err(|e| anyhow!("failed to load checkpoint {}: {e}", path.display()))
}

pub fn validate_backend_choice(kind: BackendKind) -> Result<()> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => {
            anyhow::bail!("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")
        }
        (BackendKind::NdArray, true) => {
            tracing::warn!("built with backend-wgpu; training will still use the WGPU backend despite --backend nd-array");
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_config_file() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg_path = tmp.path().join("run.toml");
        fs::write(&cfg_path, "mode = \"dilated\"\nbatch_size = 4\nn_epochs = 9\n").unwrap();
        let args = TrainArgs::parse_from([
            "train",
            "--config",
            cfg_path.to_str().unwrap(),
            "--epochs",
            "3",
            "--save-name",
            "maps",
        ]);
        let cfg = args.resolve_config().unwrap();
        assert_eq!(cfg.mode, ModelKind::Dilated);
        assert_eq!(cfg.batch_size, 4);
        assert_eq!(cfg.n_epochs, 3);
        assert_eq!(cfg.test_path, PathBuf::from("maps"));
    }

    #[test]
    fn invalid_mode_is_a_parse_error() {
        assert!(TrainArgs::try_parse_from(["train", "--mode", "resnet"]).is_err());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let args = TrainArgs::parse_from(["train", "--batch-size", "0"]);
        assert!(args.resolve_config().is_err());
    }

    #[cfg(not(feature = "backend-wgpu"))]
    #[test]
    fn wgpu_requires_feature() {
        assert!(validate_backend_choice(BackendKind::Wgpu).is_err());
        assert!(validate_backend_choice(BackendKind::NdArray).is_ok());
    }
}
