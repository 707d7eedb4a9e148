//! Model registry and the `Predictor` contract (spec §4.3).
//!
//! Grounded on `original_source/src/web/ai_models/model_registry.py`'s JSON-catalog persistence
//! (`load_registry`/`save_registry`, `register_model`, `get_active_models` sorted by accuracy,
//! `update_performance`, `deactivate_model`); the single-writer lock and atomic-write pattern
//! follow `backtest_v2::market_registry::MarketRegistry::{load_from_file, save_to_file}`.

use crate::types::{FeatureRow, Prediction};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// A trained model's catalog entry. Feature columns and the serialized model itself are opaque
/// blobs here — `ModelRegistry` only tracks identity, lineage, and performance bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub model_id: String,
    pub model_type: String,
    pub version: String,
    pub feature_cols: Vec<String>,
    pub performance_metrics: HashMap<String, f64>,
    pub trained_date: DateTime<Utc>,
    pub model_path: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub prediction_count: u64,
    #[serde(default)]
    pub last_used: Option<DateTime<Utc>>,
}

fn default_true() -> bool {
    true
}

impl ModelMetadata {
    pub fn accuracy(&self) -> f64 {
        self.performance_metrics.get("accuracy").copied().unwrap_or(0.0)
    }
}

/// JSON-backed catalog of trained models, single-writer via an internal lock (spec §4.3's
/// "single-writer catalog" requirement — concurrent `Predictor::train` calls register serially).
pub struct ModelRegistry {
    path: PathBuf,
    models: Mutex<HashMap<String, ModelMetadata>>,
}

impl ModelRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let models = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("reading model registry at {}", path.display()))?;
            serde_json::from_str(&content).with_context(|| "parsing model registry JSON")?
        } else {
            HashMap::new()
        };
        Ok(Self { path, models: Mutex::new(models) })
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating registry directory {}", parent.display()))?;
        }
        let models = self.models.lock();
        let json = serde_json::to_string_pretty(&*models)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("writing registry tmp file {}", tmp.display()))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("renaming registry tmp file into place at {}", self.path.display()))?;
        Ok(())
    }

    pub fn register_model(&self, metadata: ModelMetadata) -> Result<()> {
        self.models.lock().insert(metadata.model_id.clone(), metadata);
        self.save()
    }

    pub fn get_model(&self, model_id: &str) -> Option<ModelMetadata> {
        self.models.lock().get(model_id).cloned()
    }

    /// `get_active_models` (spec §4.3): active models, optionally filtered by type, sorted by
    /// accuracy descending — the order `EnsembleManager` consumes them in.
    pub fn get_active_models(&self, model_type: Option<&str>) -> Vec<ModelMetadata> {
        let models = self.models.lock();
        let mut active: Vec<ModelMetadata> = models
            .values()
            .filter(|m| m.is_active)
            .filter(|m| model_type.map(|t| m.model_type == t).unwrap_or(true))
            .cloned()
            .collect();
        active.sort_by(|a, b| b.accuracy().partial_cmp(&a.accuracy()).unwrap_or(std::cmp::Ordering::Equal));
        active
    }

    pub fn update_performance(&self, model_id: &str, metrics: HashMap<String, f64>) -> Result<()> {
        {
            let mut models = self.models.lock();
            if let Some(meta) = models.get_mut(model_id) {
                meta.performance_metrics.extend(metrics);
                meta.prediction_count += 1;
                meta.last_used = Some(Utc::now());
            }
        }
        self.save()
    }

    pub fn deactivate_model(&self, model_id: &str) -> Result<()> {
        {
            let mut models = self.models.lock();
            if let Some(meta) = models.get_mut(model_id) {
                meta.is_active = false;
            }
        }
        self.save()
    }
}

/// Train/predict contract every model family (`logistic`, future `xgboost`/`lstm`) implements
/// (spec §4.3). `train` returns the fitted performance metrics to hand to `ModelRegistry`.
pub trait Predictor {
    fn train(&mut self, rows: &[FeatureRow], labels: &[f64]) -> Result<HashMap<String, f64>>;
    fn predict_proba(&self, row: &FeatureRow) -> Result<Prediction>;
    fn save(&self, path: &Path) -> Result<()>;
    fn load(path: &Path) -> Result<Self>
    where
        Self: Sized;
}

/// Standard-score (zero-mean, unit-variance) scaling fit once at train time and reused at
/// predict time, so live features are normalized against the training distribution rather than
/// whatever happens to be in the current batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeatureScaler {
    means: HashMap<String, f64>,
    stds: HashMap<String, f64>,
}

impl FeatureScaler {
    pub fn fit(rows: &[FeatureRow], cols: &[String]) -> Self {
        let mut means = HashMap::new();
        let mut stds = HashMap::new();
        let n = rows.len().max(1) as f64;
        for col in cols {
            let mean: f64 = rows.iter().map(|r| r.get(col).copied().unwrap_or(0.0)).sum::<f64>() / n;
            let variance: f64 = rows
                .iter()
                .map(|r| (r.get(col).copied().unwrap_or(0.0) - mean).powi(2))
                .sum::<f64>()
                / n;
            means.insert(col.clone(), mean);
            stds.insert(col.clone(), variance.sqrt().max(1e-9));
        }
        Self { means, stds }
    }

    pub fn transform(&self, row: &FeatureRow, cols: &[String]) -> Vec<f64> {
        cols.iter()
            .map(|col| {
                let v = row.get(col).copied().unwrap_or(0.0);
                let mean = self.means.get(col).copied().unwrap_or(0.0);
                let std = self.stds.get(col).copied().unwrap_or(1.0);
                (v - mean) / std
            })
            .collect()
    }
}

/// A simple logistic-regression predictor trained by batch gradient descent — the baseline
/// model family spec §4.3 calls for before any heavier model is plugged in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticPredictor {
    pub feature_cols: Vec<String>,
    weights: Vec<f64>,
    bias: f64,
    scaler: FeatureScaler,
    learning_rate: f64,
    epochs: usize,
}

impl LogisticPredictor {
    pub fn new(feature_cols: Vec<String>) -> Self {
        let n = feature_cols.len();
        Self {
            feature_cols,
            weights: vec![0.0; n],
            bias: 0.0,
            scaler: FeatureScaler::default(),
            learning_rate: 0.05,
            epochs: 200,
        }
    }

    fn sigmoid(z: f64) -> f64 {
        1.0 / (1.0 + (-z).exp())
    }

    /// Time-ordered 80/20 train/test split — no shuffling, since shuffling a time series would
    /// leak future information into the training fold.
    pub fn time_ordered_split(rows: &[FeatureRow], labels: &[f64]) -> ((Vec<FeatureRow>, Vec<f64>), (Vec<FeatureRow>, Vec<f64>)) {
        let split_at = (rows.len() as f64 * 0.8) as usize;
        let train = (rows[..split_at].to_vec(), labels[..split_at].to_vec());
        let test = (rows[split_at..].to_vec(), labels[split_at..].to_vec());
        (train, test)
    }
}

impl Predictor for LogisticPredictor {
    fn train(&mut self, rows: &[FeatureRow], labels: &[f64]) -> Result<HashMap<String, f64>> {
        anyhow::ensure!(rows.len() == labels.len(), "feature rows and labels must have equal length");
        anyhow::ensure!(!rows.is_empty(), "cannot train on an empty dataset");

        self.scaler = FeatureScaler::fit(rows, &self.feature_cols);
        let x: Vec<Vec<f64>> = rows.iter().map(|r| self.scaler.transform(r, &self.feature_cols)).collect();
        let n = x.len() as f64;

        for _ in 0..self.epochs {
            let mut grad_w = vec![0.0; self.weights.len()];
            let mut grad_b = 0.0;
            for (xi, &yi) in x.iter().zip(labels.iter()) {
                let z: f64 = xi.iter().zip(self.weights.iter()).map(|(a, b)| a * b).sum::<f64>() + self.bias;
                let pred = Self::sigmoid(z);
                let error = pred - yi;
                for (g, xv) in grad_w.iter_mut().zip(xi.iter()) {
                    *g += error * xv;
                }
                grad_b += error;
            }
            for (w, g) in self.weights.iter_mut().zip(grad_w.iter()) {
                *w -= self.learning_rate * g / n;
            }
            self.bias -= self.learning_rate * grad_b / n;
        }

        let correct = rows
            .iter()
            .zip(labels.iter())
            .filter(|(row, &label)| {
                let p = self.predict_proba(row).map(|p| p.probability).unwrap_or(0.5);
                (p >= 0.5) == (label >= 0.5)
            })
            .count();
        let accuracy = correct as f64 / rows.len() as f64;

        let mut metrics = HashMap::new();
        metrics.insert("accuracy".to_string(), accuracy);
        metrics.insert("n_samples".to_string(), rows.len() as f64);
        Ok(metrics)
    }

    fn predict_proba(&self, row: &FeatureRow) -> Result<Prediction> {
        let x = self.scaler.transform(row, &self.feature_cols);
        let z: f64 = x.iter().zip(self.weights.iter()).map(|(a, b)| a * b).sum::<f64>() + self.bias;
        Ok(Prediction { probability: Self::sigmoid(z), ts: Utc::now() })
    }

    fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("writing predictor to {}", path.display()))
    }

    fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading predictor from {}", path.display()))?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn row(x: f64) -> FeatureRow {
        let mut r = FeatureRow::new();
        r.insert("x".to_string(), x);
        r
    }

    #[test]
    fn logistic_predictor_separates_linearly_separable_data() {
        let rows: Vec<FeatureRow> = (0..40).map(|i| row(i as f64 - 20.0)).collect();
        let labels: Vec<f64> = (0..40).map(|i| if i >= 20 { 1.0 } else { 0.0 }).collect();
        let mut model = LogisticPredictor::new(vec!["x".to_string()]);
        let metrics = model.train(&rows, &labels).unwrap();
        assert!(metrics["accuracy"] > 0.9);
        assert!(model.predict_proba(&row(10.0)).unwrap().probability > 0.5);
        assert!(model.predict_proba(&row(-10.0)).unwrap().probability < 0.5);
    }

    #[test]
    fn time_ordered_split_preserves_order_and_proportions() {
        let rows: Vec<FeatureRow> = (0..10).map(|i| row(i as f64)).collect();
        let labels: Vec<f64> = vec![0.0; 10];
        let ((train_rows, _), (test_rows, _)) = LogisticPredictor::time_ordered_split(&rows, &labels);
        assert_eq!(train_rows.len(), 8);
        assert_eq!(test_rows.len(), 2);
        assert_eq!(test_rows[0]["x"], 8.0);
    }

    #[test]
    fn registry_round_trips_through_disk_and_sorts_by_accuracy() {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path().join("registry.json")).unwrap();

        let mut weak = HashMap::new();
        weak.insert("accuracy".to_string(), 0.55);
        registry
            .register_model(ModelMetadata {
                model_id: "weak".into(),
                model_type: "logistic".into(),
                version: "v1".into(),
                feature_cols: vec!["x".into()],
                performance_metrics: weak,
                trained_date: Utc::now(),
                model_path: None,
                is_active: true,
                prediction_count: 0,
                last_used: None,
            })
            .unwrap();

        let mut strong = HashMap::new();
        strong.insert("accuracy".to_string(), 0.80);
        registry
            .register_model(ModelMetadata {
                model_id: "strong".into(),
                model_type: "logistic".into(),
                version: "v1".into(),
                feature_cols: vec!["x".into()],
                performance_metrics: strong,
                trained_date: Utc::now(),
                model_path: None,
                is_active: true,
                prediction_count: 0,
                last_used: None,
            })
            .unwrap();

        let active = registry.get_active_models(None);
        assert_eq!(active[0].model_id, "strong");

        registry.deactivate_model("strong").unwrap();
        let reloaded = ModelRegistry::new(dir.path().join("registry.json")).unwrap();
        assert_eq!(reloaded.get_active_models(None).len(), 1);
    }
}
