use anyhow::{anyhow, bail, Context, Result};
use clap::ValueEnum;
use edge_dataset::TrainingData;
use edge_models::EdgeNetConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::schedule::LrPolicy;

/// File name of the overwritten model checkpoint inside `checkpoint_path`.
pub const CHECKPOINT_FILE: &str = "model.bin";

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Baseline,
    Dilated,
}

/// Immutable settings for one training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub mode: ModelKind,
    pub data_dir: PathBuf,
    pub combine_train_val: bool,
    pub n_epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    pub lr_policy: LrPolicy,
    pub save_step: usize,
    pub height: usize,
    pub width: usize,
    pub n_channels: usize,
    pub augment: bool,
    pub sparsity: f32,
    pub n_filters: usize,
    pub filter_size: usize,
    pub n_stages: usize,
    pub dropout: f64,
    pub seed: Option<u64>,
    /// Root for `T_<epoch>` export directories.
    pub test_path: PathBuf,
    pub log_path: PathBuf,
    pub checkpoint_path: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mode: ModelKind::Baseline,
            data_dir: PathBuf::from("./bsd_json"),
            combine_train_val: false,
            n_epochs: 250,
            batch_size: 10,
            learning_rate: 3e-2,
            lr_policy: LrPolicy::default(),
            save_step: 5,
            height: 321,
            width: 481,
            n_channels: 3,
            augment: true,
            sparsity: 1.0,
            n_filters: 8,
            filter_size: 3,
            n_stages: 3,
            dropout: 0.1,
            seed: None,
            test_path: PathBuf::from("./output"),
            log_path: PathBuf::from("./logs"),
            checkpoint_path: PathBuf::from("./checkpoints"),
        }
    }
}

/// TOML overlay: every key optional, unknown keys rejected.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfigFile {
    pub mode: Option<ModelKind>,
    pub data_dir: Option<PathBuf>,
    pub combine_train_val: Option<bool>,
    pub n_epochs: Option<usize>,
    pub batch_size: Option<usize>,
    pub learning_rate: Option<f64>,
    pub lr_policy: Option<LrPolicy>,
    pub save_step: Option<usize>,
    pub height: Option<usize>,
    pub width: Option<usize>,
    pub n_channels: Option<usize>,
    pub augment: Option<bool>,
    pub sparsity: Option<f32>,
    pub n_filters: Option<usize>,
    pub filter_size: Option<usize>,
    pub n_stages: Option<usize>,
    pub dropout: Option<f64>,
    pub seed: Option<u64>,
    pub test_path: Option<PathBuf>,
    pub log_path: Option<PathBuf>,
    pub checkpoint_path: Option<PathBuf>,
}

impl RunConfigFile {
    pub fn apply(self, base: RunConfig) -> RunConfig {
        RunConfig {
            mode: self.mode.unwrap_or(base.mode),
            data_dir: self.data_dir.unwrap_or(base.data_dir),
            combine_train_val: self.combine_train_val.unwrap_or(base.combine_train_val),
            n_epochs: self.n_epochs.unwrap_or(base.n_epochs),
            batch_size: self.batch_size.unwrap_or(base.batch_size),
            learning_rate: self.learning_rate.unwrap_or(base.learning_rate),
            lr_policy: self.lr_policy.unwrap_or(base.lr_policy),
            save_step: self.save_step.unwrap_or(base.save_step),
            height: self.height.unwrap_or(base.height),
            width: self.width.unwrap_or(base.width),
            n_channels: self.n_channels.unwrap_or(base.n_channels),
            augment: self.augment.unwrap_or(base.augment),
            sparsity: self.sparsity.unwrap_or(base.sparsity),
            n_filters: self.n_filters.unwrap_or(base.n_filters),
            filter_size: self.filter_size.unwrap_or(base.filter_size),
            n_stages: self.n_stages.unwrap_or(base.n_stages),
            dropout: self.dropout.unwrap_or(base.dropout),
            seed: self.seed.or(base.seed),
            test_path: self.test_path.unwrap_or(base.test_path),
            log_path: self.log_path.unwrap_or(base.log_path),
            checkpoint_path: self.checkpoint_path.unwrap_or(base.checkpoint_path),
        }
    }
}

impl RunConfig {
    /// Defaults overlaid with a TOML document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: RunConfigFile = toml::from_str(raw).map_err(|e| anyhow!("invalid run config: {e}"))?;
        Ok(file.apply(RunConfig::default()))
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("in {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_epochs == 0 {
            bail!("n_epochs must be at least 1");
        }
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.save_step == 0 {
            bail!("save_step must be at least 1");
        }
        if self.learning_rate <= 0.0 || !self.learning_rate.is_finite() {
            bail!("learning_rate must be positive, got {}", self.learning_rate);
        }
        if self.sparsity.is_nan() || self.sparsity < 0.0 {
            bail!("sparsity must be non-negative, got {}", self.sparsity);
        }
        if self.filter_size % 2 == 0 {
            bail!("filter_size must be odd, got {}", self.filter_size);
        }
        if self.n_stages == 0 || self.n_filters == 0 {
            bail!("model needs at least one stage and one filter");
        }
        // each baseline stage after the first halves both sides
        if self.mode == ModelKind::Baseline
            && self.height.min(self.width) >> (self.n_stages - 1) == 0
        {
            let min_side = 1usize << (self.n_stages - 1);
            bail!(
                "baseline with {} stages needs images of at least {min_side}x{min_side} pixels, got {}x{}",
                self.n_stages,
                self.height,
                self.width
            );
        }
        match self.lr_policy {
            LrPolicy::FixedInterval { interval, divisor } => {
                if interval == 0 {
                    bail!("lr_policy.interval must be at least 1");
                }
                check_divisor(divisor)?;
            }
            LrPolicy::Plateau { divisor, .. } => check_divisor(divisor)?,
        }
        Ok(())
    }

    pub fn model_config(&self) -> EdgeNetConfig {
        EdgeNetConfig {
            in_channels: self.n_channels,
            n_filters: self.n_filters,
            filter_size: self.filter_size,
            stages: self.n_stages,
            dropout: self.dropout,
        }
    }

    pub fn checkpoint_file(&self) -> PathBuf {
        self.checkpoint_path.join(CHECKPOINT_FILE)
    }
}

fn check_divisor(divisor: f64) -> Result<()> {
    if divisor > 1.0 && divisor.is_finite() {
        Ok(())
    } else {
        Err(anyhow!("lr_policy.divisor must be greater than 1, got {divisor}"))
    }
}

/// Config plus values derived once from the loaded data.
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub config: RunConfig,
    pub steps_per_epoch: usize,
    /// Batches between progress lines.
    pub display_step: usize,
}

impl RunSettings {
    pub fn new(config: RunConfig, data: &TrainingData) -> Result<Self> {
        config.validate()?;
        let train_len = data.train.len();
        let steps_per_epoch = train_len / config.batch_size;
        if steps_per_epoch == 0 {
            bail!(
                "training split has {train_len} samples, fewer than batch_size {}",
                config.batch_size
            );
        }
        if let Some(id) = data.train.ids().next() {
            let record = data.train.pair(id)?.0;
            let expected = (config.height, config.width, config.n_channels);
            if record.x.shape() != expected {
                bail!(
                    "sample {id} has shape {:?}, config expects {:?}",
                    record.x.shape(),
                    expected
                );
            }
        }
        Ok(Self {
            config,
            steps_per_epoch,
            display_step: (steps_per_epoch / 10).max(1),
        })
    }
}
