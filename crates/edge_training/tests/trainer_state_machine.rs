//! Epoch-controller behaviour against a scripted engine.

use anyhow::Result;
use edge_dataset::{Batch, DatasetSplit, ImageRecord, LabelRecord, PixelArray, TrainingData};
use edge_training::{
    LrPolicy, MetricsLog, Phase, RunConfig, RunSettings, TrainingEngine, TrainingLoop,
};
use std::cell::Cell;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

const H: usize = 4;
const W: usize = 6;

/// Records every call; losses come from a fixed script.
#[derive(Default)]
struct ScriptedEngine {
    loss: f32,
    rates: Vec<f64>,
    batch_ids: Vec<Vec<String>>,
    predicted: Cell<usize>,
    saves: Cell<usize>,
}

impl TrainingEngine for ScriptedEngine {
    fn train_step(&mut self, batch: &Batch, learning_rate: f64) -> Result<f32> {
        self.rates.push(learning_rate);
        self.batch_ids.push(batch.ids.clone());
        Ok(self.loss)
    }

    fn predict_fused(&self, batch: &Batch) -> Result<Vec<PixelArray>> {
        self.predicted.set(self.predicted.get() + batch.len());
        Ok((0..batch.len())
            .map(|_| PixelArray::filled(batch.height, batch.width, 1, 0.5))
            .collect())
    }

    fn save_checkpoint(&self, path: &Path) -> Result<()> {
        fs::write(path, b"ckpt")?;
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }

    fn parameter_count(&self) -> usize {
        0
    }
}

fn split(prefix: &str, n: usize, transposed: impl Fn(usize) -> bool) -> DatasetSplit {
    let mut images = BTreeMap::new();
    let mut labels = BTreeMap::new();
    for i in 0..n {
        let id = format!("{prefix}_{i:03}.jpg");
        images.insert(
            id.clone(),
            ImageRecord {
                x: PixelArray::filled(H, W, 3, 0.2),
                transposed: transposed(i),
            },
        );
        let mut mask = PixelArray::filled(H, W, 1, 0.0);
        mask.data[i % (H * W)] = 4.0;
        labels.insert(id, LabelRecord { y: mask });
    }
    DatasetSplit::new(images, labels).unwrap()
}

fn data(train: usize, valid: usize) -> TrainingData {
    TrainingData {
        train: split("train", train, |_| false),
        valid: split("valid", valid, |i| i == 0),
    }
}

fn config(root: &Path) -> RunConfig {
    RunConfig {
        height: H,
        width: W,
        n_epochs: 3,
        batch_size: 10,
        save_step: 2,
        seed: Some(11),
        test_path: root.join("maps"),
        log_path: root.join("logs"),
        checkpoint_path: root.join("checkpoints"),
        ..RunConfig::default()
    }
}

fn engine(loss: f32) -> ScriptedEngine {
    ScriptedEngine {
        loss,
        ..ScriptedEngine::default()
    }
}

#[test]
fn phases_follow_the_export_schedule() {
    let tmp = tempfile::tempdir().unwrap();
    let data = data(23, 5);
    let settings = RunSettings::new(config(tmp.path()), &data).unwrap();
    let mut trainer = TrainingLoop::new(&settings, &data, engine(0.5));

    let mut phases = vec![trainer.phase()];
    while trainer.phase() != Phase::Terminal {
        phases.push(trainer.step().unwrap());
    }
    use Phase::*;
    assert_eq!(
        phases,
        vec![
            Init,
            TrainEpoch,
            ExportValidation,
            UpdateLearningRate,
            Checkpoint,
            TrainEpoch,
            UpdateLearningRate,
            Checkpoint,
            TrainEpoch,
            ExportValidation,
            UpdateLearningRate,
            Checkpoint,
            Terminal,
        ]
    );
    // Terminal is absorbing.
    assert_eq!(trainer.step().unwrap(), Terminal);
    assert_eq!(trainer.state().epoch, 3);
}

#[test]
fn run_trains_exports_and_logs_each_epoch() {
    let tmp = tempfile::tempdir().unwrap();
    let data = data(23, 23);
    let settings = RunSettings::new(config(tmp.path()), &data).unwrap();
    assert_eq!(settings.steps_per_epoch, 2);

    let metrics = MetricsLog::create(&settings.config.log_path).unwrap();
    let mut trainer = TrainingLoop::new(&settings, &data, engine(0.25)).with_metrics_log(metrics);
    let loss = trainer.run().unwrap();
    assert!((loss - 0.25).abs() < 1e-6);

    let report = trainer.last_report().unwrap();
    assert_eq!(report.epoch, 2);
    assert_eq!(report.batches, 2);
    assert_eq!(report.exported, Some(20));

    let engine = trainer.into_engine();
    assert_eq!(engine.rates.len(), 6);
    assert!(engine.batch_ids.iter().all(|ids| ids.len() == 10));
    assert_eq!(engine.saves.get(), 3);
    // Epochs 0 and 2 export 20 of the 23 validation samples.
    assert_eq!(engine.predicted.get(), 40);

    let maps = tmp.path().join("maps");
    assert_eq!(fs::read_dir(maps.join("T_0")).unwrap().count(), 20);
    assert!(!maps.join("T_1").exists());
    assert_eq!(fs::read_dir(maps.join("T_2")).unwrap().count(), 20);
    assert!(maps.join("T_0/valid_019.png").exists());
    assert!(!maps.join("T_0/valid_020.png").exists());
    assert!(tmp.path().join("checkpoints/model.bin").exists());

    let lines = fs::read_to_string(tmp.path().join("logs/metrics.jsonl")).unwrap();
    let records: Vec<serde_json::Value> = lines
        .lines()
        .map(|l| serde_json::from_str(l).unwrap())
        .collect();
    assert_eq!(records.len(), 3);
    assert_eq!(records[1]["epoch"], 1);
    assert!(records[1]["exported"].is_null());
}

#[test]
fn transposed_samples_are_written_back_transposed() {
    let tmp = tempfile::tempdir().unwrap();
    let data = data(10, 2);
    let mut cfg = config(tmp.path());
    cfg.n_epochs = 1;
    cfg.batch_size = 2;
    let settings = RunSettings::new(cfg, &data).unwrap();
    TrainingLoop::new(&settings, &data, engine(1.0)).run().unwrap();

    let dir = tmp.path().join("maps/T_0");
    let flipped = image::open(dir.join("valid_000.png")).unwrap().to_luma8();
    let plain = image::open(dir.join("valid_001.png")).unwrap().to_luma8();
    assert_eq!(flipped.dimensions(), (H as u32, W as u32));
    assert_eq!(plain.dimensions(), (W as u32, H as u32));
    assert!(plain.pixels().all(|p| p.0[0] == 127));
}

#[test]
fn fixed_interval_schedule_divides_every_forty_epochs() {
    let tmp = tempfile::tempdir().unwrap();
    let data = data(2, 2);
    let mut cfg = config(tmp.path());
    cfg.n_epochs = 81;
    cfg.batch_size = 2;
    cfg.save_step = 1000;
    cfg.learning_rate = 0.03;
    let settings = RunSettings::new(cfg, &data).unwrap();
    let mut trainer = TrainingLoop::new(&settings, &data, engine(0.1));
    trainer.run().unwrap();

    let rates = &trainer.engine().rates;
    assert_eq!(rates.len(), 81);
    let close = |a: f64, b: f64| (a - b).abs() < 1e-12;
    assert!(close(rates[39], 0.03));
    assert!(close(rates[40], 0.003));
    assert!(close(rates[79], 0.003));
    assert!(close(rates[80], 0.0003));
    // Only epoch 0 is a multiple of save_step.
    assert_eq!(
        fs::read_dir(tmp.path().join("maps")).unwrap().count(),
        1
    );
}

#[test]
fn plateau_schedule_decays_on_flat_loss() {
    let tmp = tempfile::tempdir().unwrap();
    let data = data(2, 2);
    let mut cfg = config(tmp.path());
    cfg.n_epochs = 5;
    cfg.batch_size = 2;
    cfg.learning_rate = 1.0;
    cfg.lr_policy = LrPolicy::Plateau {
        delay: 1,
        divisor: 10.0,
    };
    let settings = RunSettings::new(cfg, &data).unwrap();
    let mut trainer = TrainingLoop::new(&settings, &data, engine(0.7));
    trainer.run().unwrap();

    // improve, wait, wait, decay after epoch 3
    assert_eq!(trainer.engine().rates, vec![1.0, 1.0, 1.0, 1.0, 0.1]);
    assert_eq!(trainer.state().learning_rate, 0.1);
}

#[test]
fn seeded_runs_repeat_their_batches() {
    let tmp = tempfile::tempdir().unwrap();
    let data = data(23, 2);
    let mut cfg = config(tmp.path());
    cfg.save_step = 1000;
    let settings = RunSettings::new(cfg, &data).unwrap();

    let mut first = TrainingLoop::new(&settings, &data, engine(0.1));
    first.run().unwrap();
    let mut second = TrainingLoop::new(&settings, &data, engine(0.1));
    second.run().unwrap();

    let a = &first.engine().batch_ids;
    let b = &second.engine().batch_ids;
    assert_eq!(a, b);
    // Different epochs reshuffle.
    assert_ne!(a[0..2], a[2..4]);
}

#[test]
fn train_split_smaller_than_batch_is_rejected() {
    let tmp = tempfile::tempdir().unwrap();
    let data = data(3, 2);
    let err = RunSettings::new(config(tmp.path()), &data).unwrap_err();
    assert!(err.to_string().contains("fewer than batch_size"));
}

#[test]
fn sample_shape_must_match_config() {
    let tmp = tempfile::tempdir().unwrap();
    let data = data(12, 2);
    let mut cfg = config(tmp.path());
    cfg.width = W + 1;
    assert!(RunSettings::new(cfg, &data).is_err());
}
