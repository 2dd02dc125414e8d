//! Process-wide embedding model registry.
//!
//! Models are loaded lazily on first use and then shared. Concurrent callers
//! during loading wait on the same initialisation, so a model is constructed
//! at most once per registry. Each model admits a single encoder at a time;
//! later callers queue up to a bounded depth.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OnceCell, Semaphore};
use tracing::{debug, info, warn};

use crate::error::{EmbeddingError, Result};
use crate::hashing::HashingProvider;
use crate::matrix::EmbeddingMatrix;
use crate::provider::{DEFAULT_REMOTE_BASE_URL, EmbeddingProvider, RemoteProvider};
use crate::{DEFAULT_DIMENSION, Embedding};

/// Compute device a model runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Cuda,
    Mps,
    Cpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cuda => "cuda",
            Self::Mps => "mps",
            Self::Cpu => "cpu",
        })
    }
}

/// Requested device, from `RAG_DEVICE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DevicePreference {
    #[default]
    Auto,
    Cpu,
    Cuda,
}

impl DevicePreference {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "auto" | "" => Some(Self::Auto),
            "cpu" => Some(Self::Cpu),
            "cuda" | "gpu" => Some(Self::Cuda),
            _ => None,
        }
    }

    /// Resolve to a concrete device, preferring cuda, then mps, then cpu.
    ///
    /// `lookup` reads environment variables.
    pub fn resolve(self, lookup: &dyn Fn(&str) -> Option<String>) -> Device {
        let cuda_visible = lookup("CUDA_VISIBLE_DEVICES")
            .is_some_and(|v| !v.trim().is_empty() && v.trim() != "-1");
        match self {
            Self::Cpu => Device::Cpu,
            Self::Cuda if cuda_visible => Device::Cuda,
            Self::Cuda => {
                warn!("RAG_DEVICE=cuda requested but no CUDA device is visible; using cpu");
                Device::Cpu
            }
            Self::Auto if cuda_visible => Device::Cuda,
            Self::Auto if cfg!(all(target_os = "macos", target_arch = "aarch64")) => Device::Mps,
            Self::Auto => Device::Cpu,
        }
    }
}

/// Settings for the remote provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Vector width when the model is not a well-known hosted one.
    pub dimension: usize,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REMOTE_BASE_URL.to_string(),
            api_key: None,
            dimension: DEFAULT_DIMENSION,
        }
    }
}

/// Registry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// Device preference.
    pub device: DevicePreference,

    /// Texts per provider call.
    pub batch_size: usize,

    /// Callers allowed to wait for a busy model before `QueueFull`.
    pub encode_queue_depth: usize,

    /// Run a dummy encode right after loading.
    pub warmup: bool,

    /// Settings for `remote:<model>` names.
    pub remote: RemoteConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            device: DevicePreference::Auto,
            batch_size: 64,
            encode_queue_depth: 32,
            warmup: true,
            remote: RemoteConfig::default(),
        }
    }
}

impl RegistryConfig {
    pub fn with_device(mut self, device: DevicePreference) -> Self {
        self.device = device;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.encode_queue_depth = depth;
        self
    }

    pub fn with_warmup(mut self, warmup: bool) -> Self {
        self.warmup = warmup;
        self
    }
}

/// Builds a provider for a model name on a device.
pub type ModelLoader =
    Arc<dyn Fn(&str, Device, &RegistryConfig) -> Result<Arc<dyn EmbeddingProvider>> + Send + Sync>;

/// Resolve the built-in model names.
///
/// * `hashing` / `hashing-<dim>`: [`HashingProvider`]
/// * `remote:<model>`: [`RemoteProvider`]
/// * `paraphrase-multilingual-minilm-l12-v2`: local model (feature `local-models`)
pub fn default_loader(
    name: &str,
    device: Device,
    config: &RegistryConfig,
) -> Result<Arc<dyn EmbeddingProvider>> {
    if let Some(provider) = HashingProvider::from_name(name) {
        return Ok(Arc::new(provider));
    }

    if let Some(model) = name.strip_prefix("remote:") {
        let dimension = RemoteProvider::known_dimension(model).unwrap_or(config.remote.dimension);
        let mut provider =
            RemoteProvider::new(model, dimension).with_base_url(&config.remote.base_url);
        if let Some(key) = &config.remote.api_key {
            provider = provider.with_api_key(key);
        }
        return Ok(Arc::new(provider));
    }

    #[cfg(feature = "local-models")]
    {
        let provider = crate::local::LocalProvider::load(name, device)?;
        Ok(Arc::new(provider))
    }

    #[cfg(not(feature = "local-models"))]
    {
        let _ = device;
        Err(EmbeddingError::load_failed(
            name,
            "unknown model (local models need the `local-models` feature)",
        ))
    }
}

/// A loaded model with a single-writer encode gate.
pub struct Model {
    name: String,
    device: Device,
    provider: Arc<dyn EmbeddingProvider>,
    gate: Semaphore,
    waiting: AtomicUsize,
    queue_depth: usize,
    batch_size: usize,
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("name", &self.name)
            .field("model_id", &self.provider.model_id())
            .field("device", &self.device)
            .finish()
    }
}

/// Decrements the waiter count when a queued caller leaves, even if cancelled.
struct WaitTicket<'a>(&'a AtomicUsize);

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Model {
    /// Wrap a provider. Mostly useful for tests; production code goes through
    /// [`ModelRegistry::get_model`].
    pub fn new(
        name: impl Into<String>,
        device: Device,
        provider: Arc<dyn EmbeddingProvider>,
        config: &RegistryConfig,
    ) -> Self {
        Self {
            name: name.into(),
            device,
            provider,
            gate: Semaphore::new(1),
            waiting: AtomicUsize::new(0),
            queue_depth: config.encode_queue_depth,
            batch_size: config.batch_size.max(1),
        }
    }

    /// Registry name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Provider model id, recorded in cache headers.
    pub fn model_id(&self) -> &str {
        self.provider.model_id()
    }

    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Encode with the configured batch size.
    pub async fn encode(&self, texts: &[String], normalize: bool) -> Result<EmbeddingMatrix> {
        self.encode_batched(texts, normalize, self.batch_size).await
    }

    /// Encode `texts` into a matrix, `batch_size` texts per provider call.
    pub async fn encode_batched(
        &self,
        texts: &[String],
        normalize: bool,
        batch_size: usize,
    ) -> Result<EmbeddingMatrix> {
        let _permit = match self.gate.try_acquire() {
            Ok(permit) => permit,
            Err(_) => {
                let waiting = self.waiting.fetch_add(1, Ordering::SeqCst) + 1;
                let _ticket = WaitTicket(&self.waiting);
                if waiting > self.queue_depth {
                    return Err(EmbeddingError::QueueFull {
                        model: self.name.clone(),
                        depth: self.queue_depth,
                    });
                }
                debug!("Waiting for model {} ({waiting} queued)", self.name);
                self.gate
                    .acquire()
                    .await
                    .map_err(|e| EmbeddingError::load_failed(&self.name, e))?
            }
        };

        let dim = self.dimension();
        let mut matrix = EmbeddingMatrix::new(dim);
        for chunk in texts.chunks(batch_size.max(1)) {
            let rows = self.provider.embed_batch(chunk).await?;
            if rows.len() != chunk.len() {
                return Err(EmbeddingError::InvalidResponse(format!(
                    "expected {} embeddings, got {}",
                    chunk.len(),
                    rows.len()
                )));
            }
            for row in rows {
                matrix.push_row(&row)?;
            }
        }
        if normalize {
            matrix.normalize_rows();
        }
        Ok(matrix)
    }

    /// Encode a single query into a unit vector.
    pub async fn encode_query(&self, text: &str) -> Result<Embedding> {
        let matrix = self.encode_batched(&[text.to_string()], true, 1).await?;
        matrix
            .row(0)
            .map(<[f32]>::to_vec)
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding returned".to_string()))
    }
}

/// Lazily loads and shares models by name.
pub struct ModelRegistry {
    config: RegistryConfig,
    device: Device,
    loader: ModelLoader,
    slots: Mutex<HashMap<String, Arc<OnceCell<Arc<Model>>>>>,
    loads: AtomicUsize,
}

impl ModelRegistry {
    /// Create a registry using [`default_loader`] and the process environment.
    pub fn new(config: RegistryConfig) -> Self {
        let device = config.device.resolve(&|key| std::env::var(key).ok());
        Self::with_loader(config, device, Arc::new(default_loader))
    }

    /// Create a registry with an explicit device and loader.
    pub fn with_loader(config: RegistryConfig, device: Device, loader: ModelLoader) -> Self {
        info!("Model registry using device {device}");
        Self {
            config,
            device,
            loader,
            slots: Mutex::new(HashMap::new()),
            loads: AtomicUsize::new(0),
        }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Number of models constructed so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    /// Get a model, loading and warming it on first use.
    pub async fn get_model(&self, name: &str) -> Result<Arc<Model>> {
        let cell = {
            let mut slots = self.slots.lock().await;
            Arc::clone(slots.entry(name.to_string()).or_default())
        };

        let model = cell.get_or_try_init(|| self.load(name)).await?;
        Ok(Arc::clone(model))
    }

    /// Names of models loaded so far.
    pub async fn loaded_models(&self) -> Vec<String> {
        let slots = self.slots.lock().await;
        let mut names: Vec<String> = slots
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    async fn load(&self, name: &str) -> Result<Arc<Model>> {
        info!("Loading embedding model {name}");
        let loader = Arc::clone(&self.loader);
        let config = self.config.clone();
        let device = self.device;
        let owned_name = name.to_string();
        let provider =
            tokio::task::spawn_blocking(move || loader(&owned_name, device, &config)).await??;
        self.loads.fetch_add(1, Ordering::SeqCst);

        let model = Arc::new(Model::new(name, self.device, provider, &self.config));
        if self.config.warmup {
            model
                .encode(&["warmup".to_string()], true)
                .await
                .map_err(|e| EmbeddingError::load_failed(name, e))?;
        }
        info!(
            model_id = model.model_id(),
            dimension = model.dimension(),
            "Loaded embedding model {name}"
        );
        Ok(model)
    }
}

static GLOBAL_REGISTRY: RwLock<Option<Arc<ModelRegistry>>> = RwLock::new(None);

/// Install the process-wide registry. Replaces any previous one.
pub fn init(config: RegistryConfig) -> Arc<ModelRegistry> {
    install(ModelRegistry::new(config))
}

/// Install an already constructed registry as the process-wide one.
pub fn install(registry: ModelRegistry) -> Arc<ModelRegistry> {
    let registry = Arc::new(registry);
    let mut slot = GLOBAL_REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    *slot = Some(Arc::clone(&registry));
    registry
}

/// The process-wide registry.
pub fn global() -> Result<Arc<ModelRegistry>> {
    GLOBAL_REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or(EmbeddingError::RegistryNotInitialized)
}

/// Drop the process-wide registry. Models are freed once the last handle goes.
pub fn shutdown() {
    let mut slot = GLOBAL_REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner);
    if slot.take().is_some() {
        info!("Model registry shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    /// Provider that sleeps inside every batch so callers overlap.
    struct SlowProvider;

    #[async_trait]
    impl EmbeddingProvider for SlowProvider {
        fn name(&self) -> &str {
            "slow"
        }
        fn model_id(&self) -> &str {
            "slow-2"
        }
        fn dimension(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(texts.iter().map(|_| vec![3.0, 4.0]).collect())
        }
        fn is_available(&self) -> bool {
            true
        }
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_device_resolution() {
        assert_eq!(DevicePreference::Cpu.resolve(&no_env), Device::Cpu);
        assert_eq!(DevicePreference::Cuda.resolve(&no_env), Device::Cpu);
        let cuda = |k: &str| (k == "CUDA_VISIBLE_DEVICES").then(|| "0".to_string());
        assert_eq!(DevicePreference::Auto.resolve(&cuda), Device::Cuda);
        assert_eq!(DevicePreference::parse("GPU"), Some(DevicePreference::Cuda));
        assert_eq!(DevicePreference::parse("tpu"), None);
    }

    #[tokio::test]
    async fn test_concurrent_get_loads_once() {
        let registry = Arc::new(ModelRegistry::with_loader(
            RegistryConfig::default(),
            Device::Cpu,
            Arc::new(default_loader),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry.get_model("hashing-32").await
            }));
        }
        for handle in handles {
            let model = handle.await.unwrap().unwrap();
            assert_eq!(model.model_id(), "hashing-32");
        }

        assert_eq!(registry.load_count(), 1);
        assert_eq!(registry.loaded_models().await, vec!["hashing-32".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_model_fails_to_load() {
        let registry = ModelRegistry::with_loader(
            RegistryConfig::default(),
            Device::Cpu,
            Arc::new(default_loader),
        );
        let err = registry.get_model("no-such-model").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::ModelLoadFailed { .. }));
    }

    #[tokio::test]
    async fn test_encode_batches_and_normalizes() {
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(SlowProvider);
        let model = Model::new("slow", Device::Cpu, provider, &RegistryConfig::default());
        let texts: Vec<String> = (0..5).map(|i| i.to_string()).collect();

        let matrix = model.encode_batched(&texts, true, 2).await.unwrap();
        assert_eq!(matrix.rows(), 5);
        assert_eq!(matrix.row(4), Some(&[0.6, 0.8][..]));
    }

    #[tokio::test]
    async fn test_queue_full_when_depth_exhausted() {
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(SlowProvider);
        let config = RegistryConfig::default().with_queue_depth(1);
        let model = Arc::new(Model::new("slow", Device::Cpu, provider, &config));
        let texts = vec!["a".to_string()];

        let first = {
            let model = Arc::clone(&model);
            let texts = texts.clone();
            tokio::spawn(async move { model.encode(&texts, true).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = {
            let model = Arc::clone(&model);
            let texts = texts.clone();
            tokio::spawn(async move { model.encode(&texts, true).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let third = model.encode(&texts, true).await;
        assert!(matches!(third, Err(EmbeddingError::QueueFull { depth: 1, .. })));

        assert!(first.await.unwrap().is_ok());
        assert!(second.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_global_lifecycle() {
        install(ModelRegistry::with_loader(
            RegistryConfig::default(),
            Device::Cpu,
            Arc::new(default_loader),
        ));
        assert!(global().is_ok());
        shutdown();
        assert!(matches!(global(), Err(EmbeddingError::RegistryNotInitialized)));
    }
}
