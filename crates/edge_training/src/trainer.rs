//! Epoch controller: an explicit state machine over train, export, LR update
//! and checkpoint phases.

use anyhow::{anyhow, bail, Result};
use edge_dataset::{MinibatchSampler, SamplerConfig, TrainingData};
use serde::Serialize;
use std::fs;
use std::time::Instant;

use crate::config::RunSettings;
use crate::engine::TrainingEngine;
use crate::export::ValidationExporter;
use crate::metrics::MetricsLog;
use crate::schedule::{LearningRateController, LrDecision, TrainingState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    TrainEpoch,
    ExportValidation,
    UpdateLearningRate,
    Checkpoint,
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochReport {
    pub epoch: usize,
    pub mean_loss: f32,
    /// Rate used for this epoch's updates.
    pub learning_rate: f64,
    pub batches: usize,
    /// Seconds since the run started.
    pub elapsed_secs: f64,
    /// Artifacts written, when this epoch exported.
    pub exported: Option<usize>,
}

pub struct TrainingLoop<'a, E: TrainingEngine> {
    settings: &'a RunSettings,
    data: &'a TrainingData,
    engine: E,
    exporter: ValidationExporter,
    lr: LearningRateController,
    state: TrainingState,
    phase: Phase,
    current: Option<EpochReport>,
    last_report: Option<EpochReport>,
    metrics: Option<MetricsLog>,
    started: Instant,
}

impl<'a, E: TrainingEngine> TrainingLoop<'a, E> {
    pub fn new(settings: &'a RunSettings, data: &'a TrainingData, engine: E) -> Self {
        let cfg = &settings.config;
        Self {
            settings,
            data,
            engine,
            exporter: ValidationExporter::new(cfg.test_path.clone(), cfg.batch_size),
            lr: LearningRateController::new(cfg.lr_policy),
            state: TrainingState::new(cfg.learning_rate),
            phase: Phase::Init,
            current: None,
            last_report: None,
            metrics: None,
            started: Instant::now(),
        }
    }

    pub fn with_metrics_log(mut self, metrics: MetricsLog) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }

    pub fn last_report(&self) -> Option<&EpochReport> {
        self.last_report.as_ref()
    }

    /// Perform exactly one phase transition and return the new phase.
    pub fn step(&mut self) -> Result<Phase> {
        self.phase = match self.phase {
            Phase::Init => self.init(),
            Phase::TrainEpoch => self.train_epoch()?,
            Phase::ExportValidation => self.export_validation()?,
            Phase::UpdateLearningRate => self.update_learning_rate()?,
            Phase::Checkpoint => self.checkpoint()?,
            Phase::Terminal => Phase::Terminal,
        };
        Ok(self.phase)
    }

    /// Drive the machine to `Terminal`; returns the last epoch's mean loss.
    pub fn run(&mut self) -> Result<f32> {
        while self.phase != Phase::Terminal {
            self.step()?;
        }
        match &self.last_report {
            Some(report) => Ok(report.mean_loss),
            None => bail!("training finished without completing an epoch"),
        }
    }

    fn init(&mut self) -> Phase {
        let cfg = &self.settings.config;
        self.state = TrainingState::new(cfg.learning_rate);
        self.started = Instant::now();
        tracing::info!(
            "Beginning loop: {} epochs, {} steps per epoch, validating every {} epochs",
            cfg.n_epochs,
            self.settings.steps_per_epoch,
            cfg.save_step
        );
        if cfg.n_epochs == 0 {
            Phase::Terminal
        } else {
            Phase::TrainEpoch
        }
    }

    fn train_epoch(&mut self) -> Result<Phase> {
        let (settings, data) = (self.settings, self.data);
        let cfg = &settings.config;
        let epoch = self.state.epoch;
        let seed = cfg.seed.map(|s| s ^ epoch as u64);
        let sampler = MinibatchSampler::new(
            &data.train,
            SamplerConfig::training(cfg.batch_size, cfg.augment, seed),
        )?;
        let total = sampler.len();

        let mut loss_sum = 0.0f64;
        let mut batches = 0usize;
        for batch in sampler {
            let batch = batch?;
            let loss = self.engine.train_step(&batch, self.state.learning_rate)?;
            loss_sum += loss as f64;
            batches += 1;
            if batches % settings.display_step == 0 {
                tracing::debug!("epoch {epoch}: {batches}/{total} batches, loss {loss:.4}");
            }
        }
        if batches == 0 {
            bail!(
                "epoch {epoch} produced no batches: {} training samples, batch size {}",
                data.train.len(),
                cfg.batch_size
            );
        }

        let mean_loss = (loss_sum / batches as f64) as f32;
        let elapsed_secs = self.started.elapsed().as_secs_f64();
        tracing::info!(
            "[{epoch:04} | {elapsed_secs:.1}] Loss: {mean_loss:.4}, Learning rate: {:.2e}",
            self.state.learning_rate
        );
        self.current = Some(EpochReport {
            epoch,
            mean_loss,
            learning_rate: self.state.learning_rate,
            batches,
            elapsed_secs,
            exported: None,
        });

        if epoch % cfg.save_step == 0 {
            Ok(Phase::ExportValidation)
        } else {
            Ok(Phase::UpdateLearningRate)
        }
    }

    fn export_validation(&mut self) -> Result<Phase> {
        let summary = self
            .exporter
            .export(self.state.epoch, &self.data.valid, &self.engine)?;
        if let Some(report) = self.current.as_mut() {
            report.exported = Some(summary.written);
        }
        Ok(Phase::UpdateLearningRate)
    }

    fn update_learning_rate(&mut self) -> Result<Phase> {
        let Some(report) = self.current.as_ref() else {
            bail!("learning-rate update reached without a finished epoch");
        };
        // Higher is better for the plateau rule.
        let metric = -(report.mean_loss as f64);
        if self.lr.update(&mut self.state, metric) == LrDecision::Decayed {
            tracing::info!(
                "learning rate decayed to {:.2e} after epoch {}",
                self.state.learning_rate,
                self.state.epoch
            );
        }
        Ok(Phase::Checkpoint)
    }

    fn checkpoint(&mut self) -> Result<Phase> {
        let settings = self.settings;
        let cfg = &settings.config;
        fs::create_dir_all(&cfg.checkpoint_path)
            .map_err(|e| anyhow!("failed to create {}: {e}", cfg.checkpoint_path.display()))?;
        self.engine.save_checkpoint(&cfg.checkpoint_file())?;
        if let Some(report) = self.current.take() {
            if let Some(metrics) = self.metrics.as_mut() {
                metrics.record(&report)?;
            }
            self.last_report = Some(report);
        }
        self.state.epoch += 1;
        if self.state.epoch >= cfg.n_epochs {
            tracing::info!("Finished {} epochs", self.state.epoch);
            Ok(Phase::Terminal)
        } else {
            Ok(Phase::TrainEpoch)
        }
    }
}
