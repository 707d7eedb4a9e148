//! Ensemble combination of active models (spec §4.4).
//!
//! Grounded on `original_source/src/web/ai_models/ensemble_manager.py`: composite weight
//! derivation, weighted-average and voting combination methods, and agreement-based confidence.

use crate::config::EnsembleMethod;
use crate::registry::ModelRegistry;
use std::collections::HashMap;

/// Result of combining per-model predictions into a single probability.
#[derive(Debug, Clone)]
pub struct EnsembleResult {
    pub probability: f64,
    pub confidence: f64,
    pub method: EnsembleMethod,
    pub model_count: usize,
    pub weights_used: HashMap<String, f64>,
}

fn neutral_result(method: EnsembleMethod) -> EnsembleResult {
    EnsembleResult { probability: 0.5, confidence: 0.0, method, model_count: 0, weights_used: HashMap::new() }
}

/// Composite performance score behind each model's ensemble weight: `0.4*accuracy +
/// 0.4*normalized_sharpe + 0.2*win_rate`, with Sharpe normalized from an assumed `[-2, 5]` range
/// into `[0, 1]` and floored at zero.
fn composite_score(accuracy: f64, sharpe: f64, win_rate: f64) -> f64 {
    let normalized_sharpe = ((sharpe + 2.0) / 7.0).max(0.0);
    accuracy * 0.4 + normalized_sharpe * 0.4 + win_rate * 0.2
}

/// Derive normalized weights for every active model in the registry. Falls back to equal
/// weighting when every composite score is zero (e.g. freshly registered models with no
/// recorded Sharpe/win-rate yet).
pub fn derive_weights(registry: &ModelRegistry) -> HashMap<String, f64> {
    let active = registry.get_active_models(None);
    if active.is_empty() {
        return HashMap::new();
    }

    let scores: HashMap<String, f64> = active
        .iter()
        .map(|m| {
            let accuracy = m.performance_metrics.get("accuracy").copied().unwrap_or(0.5);
            let sharpe = m.performance_metrics.get("sharpe_ratio").copied().unwrap_or(0.0);
            let win_rate = m.performance_metrics.get("win_rate").copied().unwrap_or(0.5);
            (m.model_id.clone(), composite_score(accuracy, sharpe, win_rate))
        })
        .collect();

    let total: f64 = scores.values().sum();
    if total > 0.0 {
        scores.into_iter().map(|(id, s)| (id, s / total)).collect()
    } else {
        let w = 1.0 / active.len() as f64;
        active.iter().map(|m| (m.model_id.clone(), w)).collect()
    }
}

/// Combine per-model probabilities per spec §4.4. Predictions from models no longer active in
/// the registry are dropped before combination.
pub fn predict_ensemble(
    registry: &ModelRegistry,
    weights: &HashMap<String, f64>,
    predictions: &HashMap<String, f64>,
    method: EnsembleMethod,
) -> EnsembleResult {
    let active: HashMap<String, f64> = predictions
        .iter()
        .filter(|(model_id, _)| registry.get_model(model_id).map(|m| m.is_active).unwrap_or(false))
        .map(|(k, v)| (k.clone(), *v))
        .collect();

    if active.is_empty() {
        return neutral_result(method);
    }

    match method {
        EnsembleMethod::WeightedAverage => weighted_average(&active, weights, method),
        EnsembleMethod::Voting => voting(&active, method),
    }
}

fn weighted_average(predictions: &HashMap<String, f64>, weights: &HashMap<String, f64>, method: EnsembleMethod) -> EnsembleResult {
    let mut weighted_sum = 0.0;
    let mut total_weight = 0.0;
    let mut weights_used = HashMap::new();

    for (model_id, prob) in predictions {
        let w = weights.get(model_id).copied().unwrap_or(1.0);
        weighted_sum += prob * w;
        total_weight += w;
        weights_used.insert(model_id.clone(), w);
    }

    let probability = if total_weight > 0.0 { weighted_sum / total_weight } else { 0.5 };
    let confidence = agreement_confidence(predictions.values().copied());

    EnsembleResult { probability, confidence, method, model_count: predictions.len(), weights_used }
}

fn voting(predictions: &HashMap<String, f64>, method: EnsembleMethod) -> EnsembleResult {
    let votes: Vec<f64> = predictions
        .values()
        .map(|&p| {
            if p >= 0.6 {
                1.0
            } else if p >= 0.5 {
                0.5
            } else if p >= 0.4 {
                -0.5
            } else {
                -1.0
            }
        })
        .collect();

    let avg_vote = votes.iter().sum::<f64>() / votes.len() as f64;
    let probability = (avg_vote + 1.0) / 2.0;
    let confidence = (1.0 - stddev(&votes)).max(0.0);

    EnsembleResult { probability, confidence, method, model_count: predictions.len(), weights_used: HashMap::new() }
}

/// Agreement-based confidence: `1 - 2*stddev(p_i)`, clipped to `[0, 1]`. A single model can
/// never report disagreement, so its confidence is capped at 0.5 — agreement is meaningless
/// with nothing to agree against.
fn agreement_confidence(probs: impl Iterator<Item = f64>) -> f64 {
    let values: Vec<f64> = probs.collect();
    if values.len() <= 1 {
        return 0.5;
    }
    (1.0 - 2.0 * stddev(&values)).clamp(0.0, 1.0)
}

fn stddev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ModelMetadata;
    use chrono::Utc;
    use tempfile::tempdir;

    fn registry_with(models: &[(&str, f64)]) -> ModelRegistry {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path().join("registry.json")).unwrap();
        for (id, accuracy) in models {
            let mut metrics = HashMap::new();
            metrics.insert("accuracy".to_string(), *accuracy);
            registry
                .register_model(ModelMetadata {
                    model_id: id.to_string(),
                    model_type: "logistic".into(),
                    version: "v1".into(),
                    feature_cols: vec![],
                    performance_metrics: metrics,
                    trained_date: Utc::now(),
                    model_path: None,
                    is_active: true,
                    prediction_count: 0,
                    last_used: None,
                })
                .unwrap();
        }
        registry
    }

    #[test]
    fn single_model_confidence_capped_at_half() {
        let registry = registry_with(&[("m1", 0.7)]);
        let weights = derive_weights(&registry);
        let mut preds = HashMap::new();
        preds.insert("m1".to_string(), 0.9);
        let result = predict_ensemble(&registry, &weights, &preds, EnsembleMethod::WeightedAverage);
        assert_eq!(result.confidence, 0.5);
        assert_eq!(result.probability, 0.9);
    }

    #[test]
    fn full_agreement_yields_high_confidence() {
        let registry = registry_with(&[("m1", 0.7), ("m2", 0.7)]);
        let weights = derive_weights(&registry);
        let mut preds = HashMap::new();
        preds.insert("m1".to_string(), 0.8);
        preds.insert("m2".to_string(), 0.8);
        let result = predict_ensemble(&registry, &weights, &preds, EnsembleMethod::WeightedAverage);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn inactive_model_predictions_are_excluded() {
        let registry = registry_with(&[("m1", 0.7)]);
        registry.deactivate_model("m1").unwrap();
        let weights = derive_weights(&registry);
        let mut preds = HashMap::new();
        preds.insert("m1".to_string(), 0.95);
        let result = predict_ensemble(&registry, &weights, &preds, EnsembleMethod::WeightedAverage);
        assert_eq!(result.model_count, 0);
        assert_eq!(result.probability, 0.5);
    }

    #[test]
    fn equal_weights_when_no_performance_data() {
        let dir = tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path().join("registry.json")).unwrap();
        registry
            .register_model(ModelMetadata {
                model_id: "fresh".into(),
                model_type: "logistic".into(),
                version: "v1".into(),
                feature_cols: vec![],
                performance_metrics: HashMap::new(),
                trained_date: Utc::now(),
                model_path: None,
                is_active: true,
                prediction_count: 0,
                last_used: None,
            })
            .unwrap();
        let weights = derive_weights(&registry);
        assert_eq!(weights.get("fresh").copied().unwrap(), 1.0);
    }
}
