pub mod cache;
pub mod classifier;
pub mod clustering;

use crate::features::FeatureSet;
use crate::mood::{MoodEngine, MoodError, MoodScore};
use cache::{CacheError, ModelCache};
use classifier::{AudioClassifier, GenrePrediction};
use clustering::{ClusterReport, FeatureScaler, KMeansModel};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Seed for freshly created classifier weights.
const CLASSIFIER_SEED: u64 = 42;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("Model not fitted: {0}")]
    NotFitted(String),
    #[error("Shape error: {0}")]
    Shape(String),
    #[error("Model {name} is not a {expected}")]
    WrongKind { name: String, expected: &'static str },
    #[error(transparent)]
    Mood(#[from] MoodError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Model file error: {0}")]
    Json(#[from] serde_json::Error),
}

/// The models the service knows how to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    Classifier,
    Clustering,
    Scaler,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [Self::Classifier, Self::Clustering, Self::Scaler];

    /// Name the model is cached under.
    pub fn cache_name(&self) -> &'static str {
        match self {
            Self::Classifier => "audio_classifier",
            Self::Clustering => "audio_clustering",
            Self::Scaler => "feature_scaler",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Self::Classifier => "audio_classifier.json",
            Self::Clustering => "audio_clustering.json",
            Self::Scaler => "feature_scaler.json",
        }
    }
}

#[derive(Debug)]
pub enum Model {
    Classifier(AudioClassifier),
    Clustering(KMeansModel),
    Scaler(FeatureScaler),
}

impl Model {
    pub fn kind(&self) -> ModelKind {
        match self {
            Self::Classifier(_) => ModelKind::Classifier,
            Self::Clustering(_) => ModelKind::Clustering,
            Self::Scaler(_) => ModelKind::Scaler,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            Self::Classifier(_) => "AudioClassifier",
            Self::Clustering(_) => "KMeans",
            Self::Scaler(_) => "StandardScaler",
        }
    }
}

/// Model files on disk. Missing files are created with defaults so the
/// next start loads the same weights.
#[derive(Debug, Clone)]
pub struct ModelStore {
    dir: PathBuf,
}

impl ModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, kind: ModelKind) -> PathBuf {
        self.dir.join(kind.file_name())
    }

    pub fn load_or_create(&self, kind: ModelKind) -> Result<Model, ModelError> {
        let path = self.path_for(kind);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            let model = match kind {
                ModelKind::Classifier => {
                    let m: AudioClassifier = serde_json::from_str(&contents)?;
                    m.validate()?;
                    Model::Classifier(m)
                }
                ModelKind::Clustering => Model::Clustering(serde_json::from_str(&contents)?),
                ModelKind::Scaler => Model::Scaler(serde_json::from_str(&contents)?),
            };
            log::info!("Loaded existing {} from {}", kind.cache_name(), path.display());
            return Ok(model);
        }

        std::fs::create_dir_all(&self.dir)?;
        let (model, json) = match kind {
            ModelKind::Classifier => {
                let m = AudioClassifier::initialised(CLASSIFIER_SEED);
                let json = serde_json::to_string(&m)?;
                (Model::Classifier(m), json)
            }
            ModelKind::Clustering => {
                let m = KMeansModel::default();
                let json = serde_json::to_string_pretty(&m)?;
                (Model::Clustering(m), json)
            }
            ModelKind::Scaler => {
                let m = FeatureScaler::default();
                let json = serde_json::to_string_pretty(&m)?;
                (Model::Scaler(m), json)
            }
        };
        std::fs::write(&path, json)?;
        log::info!("Created new {} at {}", kind.cache_name(), path.display());
        Ok(model)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelStatus {
    pub ready: bool,
    pub models_loaded: Vec<String>,
    pub cache_size: usize,
    pub max_cache_size: usize,
    pub details: BTreeMap<String, String>,
}

/// Model loading and inference on top of a shared, injected cache.
pub struct ModelManager {
    cache: Arc<ModelCache<Model>>,
    store: ModelStore,
    engine: MoodEngine,
    ready: AtomicBool,
}

impl ModelManager {
    pub fn new(cache: Arc<ModelCache<Model>>, store: ModelStore) -> Self {
        Self {
            cache,
            store,
            engine: MoodEngine::new(),
            ready: AtomicBool::new(false),
        }
    }

    pub fn cache(&self) -> &Arc<ModelCache<Model>> {
        &self.cache
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Load `kind` from the store and cache it. Returns the caller's handle.
    pub fn load_model(&self, kind: ModelKind) -> Result<Arc<Model>, ModelError> {
        let model = Arc::new(self.store.load_or_create(kind)?);
        self.cache.put_arc(kind.cache_name(), Arc::clone(&model));
        Ok(model)
    }

    pub fn load_default_models(&self) -> Result<(), ModelError> {
        for kind in ModelKind::ALL {
            if let Err(e) = self.load_model(kind) {
                log::error!("Error loading default models: {e}");
                self.ready.store(false, Ordering::Release);
                return Err(e);
            }
        }
        self.ready.store(true, Ordering::Release);
        log::info!("Default ML models loaded successfully");
        Ok(())
    }

    pub fn get_model(&self, name: &str) -> Result<Arc<Model>, ModelError> {
        Ok(self.cache.get(name)?)
    }

    pub fn evict_if_over_capacity(&self) -> Vec<String> {
        self.cache.evict_if_over_capacity()
    }

    pub fn compute_mood(&self, features: &FeatureSet) -> Result<MoodScore, ModelError> {
        Ok(self.engine.score(features)?)
    }

    /// Genre from a coefficient-major MFCC matrix, averaged over time.
    pub fn classify_genre(&self, mfcc: &[Vec<f64>]) -> Result<GenrePrediction, ModelError> {
        self.classify_genre_vector(&classifier::mean_over_time(mfcc))
    }

    pub fn classify_genre_vector(&self, mfcc_mean: &[f64]) -> Result<GenrePrediction, ModelError> {
        let handle = self.get_model(ModelKind::Classifier.cache_name())?;
        let Model::Classifier(model) = handle.as_ref() else {
            return Err(wrong_kind(ModelKind::Classifier, "classifier"));
        };
        let probabilities = model.predict(mfcc_mean)?;
        let prediction = GenrePrediction::from_probabilities(&probabilities);
        log::info!(
            "Audio genre classified: {} ({:.2})",
            prediction.top_genre,
            prediction.confidence
        );
        Ok(prediction)
    }

    /// Cluster a segments × features matrix with the cached clustering
    /// model, scaling first when a scaler is cached.
    pub fn cluster_segments(&self, segments: &[Vec<f64>]) -> Result<ClusterReport, ModelError> {
        let handle = self.get_model(ModelKind::Clustering.cache_name())?;
        let Model::Clustering(kmeans) = handle.as_ref() else {
            return Err(wrong_kind(ModelKind::Clustering, "clustering model"));
        };

        let scaler_handle = self.cache.get(ModelKind::Scaler.cache_name()).ok();
        let scaler = match scaler_handle.as_deref() {
            Some(Model::Scaler(s)) => Some(s),
            _ => None,
        };

        clustering::cluster_segments(segments, scaler, kmeans)
    }

    pub fn status(&self) -> ModelStatus {
        let cache = self.cache.status();
        let mut details = BTreeMap::new();
        for name in &cache.models_loaded {
            let Ok(model) = self.cache.get(name) else {
                continue;
            };
            match model.as_ref() {
                Model::Classifier(c) => {
                    details.insert(format!("{name}_params"), c.parameter_count().to_string());
                }
                other => {
                    details.insert(format!("{name}_type"), other.type_name().to_string());
                }
            }
        }
        ModelStatus {
            ready: self.is_ready(),
            models_loaded: cache.models_loaded,
            cache_size: cache.cache_size,
            max_cache_size: cache.max_cache_size,
            details,
        }
    }

    pub fn cleanup(&self) {
        self.cache.clear();
        self.ready.store(false, Ordering::Release);
        log::info!("ML models cleanup completed");
    }
}

fn wrong_kind(kind: ModelKind, expected: &'static str) -> ModelError {
    ModelError::WrongKind {
        name: kind.cache_name().to_string(),
        expected,
    }
}
