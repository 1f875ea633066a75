use super::ModelError;
use serde::{Deserialize, Serialize};

/// Nearest-centroid segment clustering. Centroids come from an offline
/// fit; a model without centroids can't predict.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KMeansModel {
    pub centroids: Vec<Vec<f64>>,
}

impl KMeansModel {
    pub fn is_fitted(&self) -> bool {
        !self.centroids.is_empty()
    }

    pub fn n_clusters(&self) -> usize {
        self.centroids.len()
    }

    /// Index of the nearest centroid and the squared distance to it.
    pub fn predict(&self, row: &[f64]) -> Result<(usize, f64), ModelError> {
        if !self.is_fitted() {
            return Err(ModelError::NotFitted("audio_clustering".to_string()));
        }
        let mut best = (0, f64::INFINITY);
        for (i, c) in self.centroids.iter().enumerate() {
            if c.len() != row.len() {
                return Err(ModelError::Shape(format!(
                    "centroid {i} has {} dims, segment has {}",
                    c.len(),
                    row.len()
                )));
            }
            let d = squared_distance(c, row);
            if d < best.1 {
                best = (i, d);
            }
        }
        Ok(best)
    }
}

/// Per-dimension standardisation (`(x - mean) / scale`). An unfitted
/// scaler passes rows through unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl FeatureScaler {
    pub fn is_fitted(&self) -> bool {
        !self.mean.is_empty()
    }

    pub fn transform(&self, row: &[f64]) -> Result<Vec<f64>, ModelError> {
        if !self.is_fitted() {
            return Ok(row.to_vec());
        }
        if row.len() != self.mean.len() || self.scale.len() != self.mean.len() {
            return Err(ModelError::Shape(format!(
                "scaler fitted on {} dims, segment has {}",
                self.mean.len(),
                row.len()
            )));
        }
        Ok(row
            .iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(x, (m, s))| (x - m) / s.max(1e-10))
            .collect())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub cluster_id: usize,
    pub size: usize,
    pub percentage: f64,
    pub center: Vec<f64>,
    /// Mean per-dimension variance of the (scaled) members.
    pub variance: f64,
    pub segment_indices: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterReport {
    pub cluster_labels: Vec<usize>,
    pub n_clusters: usize,
    pub clusters: Vec<ClusterSummary>,
    /// Sum of squared distances of the given segments to their centroid.
    pub inertia: f64,
}

/// Scale, assign and summarise a segments × features matrix.
pub fn cluster_segments(
    segments: &[Vec<f64>],
    scaler: Option<&FeatureScaler>,
    model: &KMeansModel,
) -> Result<ClusterReport, ModelError> {
    let width = match segments.first() {
        Some(first) if !first.is_empty() => first.len(),
        _ => return Err(ModelError::Shape("features matrix is empty".to_string())),
    };
    if segments.iter().any(|r| r.len() != width) {
        return Err(ModelError::Shape("features matrix should be 2D".to_string()));
    }

    let scaled: Vec<Vec<f64>> = match scaler {
        Some(s) => segments
            .iter()
            .map(|r| s.transform(r))
            .collect::<Result<_, _>>()?,
        None => segments.to_vec(),
    };

    let mut labels = Vec::with_capacity(scaled.len());
    let mut inertia = 0.0;
    for row in &scaled {
        let (label, dist) = model.predict(row)?;
        labels.push(label);
        inertia += dist;
    }

    let total = labels.len() as f64;
    let clusters = (0..model.n_clusters())
        .map(|id| {
            let members: Vec<usize> = labels
                .iter()
                .enumerate()
                .filter(|&(_, &l)| l == id)
                .map(|(i, _)| i)
                .collect();
            let rows: Vec<&[f64]> = members.iter().map(|&i| scaled[i].as_slice()).collect();
            ClusterSummary {
                cluster_id: id,
                size: members.len(),
                percentage: members.len() as f64 / total * 100.0,
                center: model.centroids[id].clone(),
                variance: mean_variance(&rows, width),
                segment_indices: members,
            }
        })
        .collect();

    log::info!(
        "Audio clustered {} segments into {} clusters",
        labels.len(),
        model.n_clusters()
    );

    Ok(ClusterReport {
        cluster_labels: labels,
        n_clusters: model.n_clusters(),
        clusters,
        inertia,
    })
}

fn squared_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn mean_variance(rows: &[&[f64]], width: usize) -> f64 {
    if rows.is_empty() {
        return 0.0;
    }
    let n = rows.len() as f64;
    let total: f64 = (0..width)
        .map(|d| {
            let mean = rows.iter().map(|r| r[d]).sum::<f64>() / n;
            rows.iter().map(|r| (r[d] - mean).powi(2)).sum::<f64>() / n
        })
        .sum();
    total / width as f64
}
