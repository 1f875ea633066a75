use super::ModelError;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// MFCC coefficients expected on the input.
pub const INPUT_SIZE: usize = 13;
pub const HIDDEN_SIZE: usize = 128;

pub const GENRE_LABELS: [&str; 8] = [
    "electronic",
    "rock",
    "pop",
    "jazz",
    "classical",
    "hip-hop",
    "ambient",
    "experimental",
];

/// One fully connected layer: `out = weights · in + bias`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseLayer {
    /// Row-major, `weights[out][in]`.
    pub weights: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl DenseLayer {
    fn input_size(&self) -> usize {
        self.weights.first().map_or(0, Vec::len)
    }

    fn output_size(&self) -> usize {
        self.bias.len()
    }

    fn forward(&self, input: &[f64]) -> Vec<f64> {
        self.weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(input).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect()
    }

    fn parameter_count(&self) -> usize {
        self.weights.iter().map(Vec::len).sum::<usize>() + self.bias.len()
    }
}

/// Feed-forward genre/mood classifier: 13 → 128 → 64 → 8, ReLU between
/// layers, softmax on the output. Inference only; weights are loaded from
/// disk or initialised deterministically.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioClassifier {
    pub layers: Vec<DenseLayer>,
}

impl AudioClassifier {
    /// Fresh network with uniform `±1/√fan_in` weights from a fixed seed.
    pub fn initialised(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let sizes = [INPUT_SIZE, HIDDEN_SIZE, HIDDEN_SIZE / 2, GENRE_LABELS.len()];
        let layers = sizes
            .windows(2)
            .map(|pair| {
                let (fan_in, fan_out) = (pair[0], pair[1]);
                let bound = 1.0 / (fan_in as f64).sqrt();
                let weights = (0..fan_out)
                    .map(|_| (0..fan_in).map(|_| rng.random_range(-bound..bound)).collect())
                    .collect();
                let bias = (0..fan_out).map(|_| rng.random_range(-bound..bound)).collect();
                DenseLayer { weights, bias }
            })
            .collect();
        Self { layers }
    }

    /// Checks that consecutive layer shapes line up.
    pub fn validate(&self) -> Result<(), ModelError> {
        let Some(first) = self.layers.first() else {
            return Err(ModelError::Shape("classifier has no layers".to_string()));
        };
        if first.input_size() != INPUT_SIZE {
            return Err(ModelError::Shape(format!(
                "classifier expects {INPUT_SIZE} inputs, first layer takes {}",
                first.input_size()
            )));
        }
        for (i, layer) in self.layers.iter().enumerate() {
            if layer.weights.len() != layer.output_size()
                || layer.weights.iter().any(|r| r.len() != layer.input_size())
            {
                return Err(ModelError::Shape(format!("layer {i} is ragged")));
            }
            if let Some(next) = self.layers.get(i + 1) {
                if next.input_size() != layer.output_size() {
                    return Err(ModelError::Shape(format!(
                        "layer {i} outputs {} but layer {} takes {}",
                        layer.output_size(),
                        i + 1,
                        next.input_size()
                    )));
                }
            }
        }
        let out = self.layers.last().map_or(0, DenseLayer::output_size);
        if out != GENRE_LABELS.len() {
            return Err(ModelError::Shape(format!(
                "classifier outputs {out} classes, expected {}",
                GENRE_LABELS.len()
            )));
        }
        Ok(())
    }

    /// Class probabilities for one feature vector.
    pub fn predict(&self, input: &[f64]) -> Result<Vec<f64>, ModelError> {
        if input.len() != INPUT_SIZE {
            return Err(ModelError::Shape(format!(
                "expected {INPUT_SIZE} MFCC coefficients, got {}",
                input.len()
            )));
        }
        let mut activations = input.to_vec();
        let last = self.layers.len().saturating_sub(1);
        for (i, layer) in self.layers.iter().enumerate() {
            activations = layer.forward(&activations);
            if i < last {
                for a in &mut activations {
                    *a = a.max(0.0);
                }
            }
        }
        Ok(softmax(&activations))
    }

    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(DenseLayer::parameter_count).sum()
    }
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|&l| (l - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.iter().map(|e| e / sum).collect()
}

/// Top-3 genre prediction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenrePrediction {
    pub predictions: Vec<(String, f64)>,
    pub top_genre: String,
    pub confidence: f64,
}

impl GenrePrediction {
    pub fn from_probabilities(probabilities: &[f64]) -> Self {
        let mut indexed: Vec<(usize, f64)> = probabilities.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        let predictions: Vec<(String, f64)> = indexed
            .iter()
            .take(3)
            .map(|&(i, p)| (GENRE_LABELS[i].to_string(), p))
            .collect();
        let (top_genre, confidence) = predictions
            .first()
            .cloned()
            .unwrap_or_else(|| (GENRE_LABELS[0].to_string(), 0.0));
        Self {
            predictions,
            top_genre,
            confidence,
        }
    }
}

/// Average a coefficient-major MFCC matrix over time into one vector.
pub fn mean_over_time(mfcc: &[Vec<f64>]) -> Vec<f64> {
    mfcc.iter()
        .map(|row| {
            if row.is_empty() {
                0.0
            } else {
                row.iter().sum::<f64>() / row.len() as f64
            }
        })
        .collect()
}
