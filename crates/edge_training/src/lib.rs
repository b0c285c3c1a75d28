#![recursion_limit = "256"]

pub mod config;
pub mod engine;
pub mod export;
pub mod loss;
pub mod metrics;
pub mod schedule;
pub mod trainer;
pub mod util;

pub use config::{ModelKind, RunConfig, RunSettings};
pub use engine::{BurnEngine, TrainingEngine};
pub use export::{ExportSummary, ValidationExporter};
pub use loss::{ClassBalance, LossComposer};
pub use metrics::MetricsLog;
pub use schedule::{LearningRateController, LrDecision, LrPolicy, TrainingState};
pub use trainer::{EpochReport, Phase, TrainingLoop};
pub use util::{run_train, TrainArgs};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;

pub type ADBackend = burn::backend::Autodiff<TrainBackend>;
