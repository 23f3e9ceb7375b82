use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{info, warn};

use super::{LandmarkError, LandmarkModel};

/// Produces a landmark model, possibly slowly
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn LandmarkModel>, LandmarkError>;
}

/// Loader for a model that already exists
struct Preloaded(Arc<dyn LandmarkModel>);

#[async_trait]
impl ModelLoader for Preloaded {
    async fn load(&self) -> Result<Arc<dyn LandmarkModel>, LandmarkError> {
        Ok(self.0.clone())
    }
}

/// Lazily loaded landmark model shared across sessions.
///
/// At most one load runs at a time: callers arriving while a load is in
/// flight wait for it instead of starting another. A successful load is kept
/// for the life of the handle. A failed load is not, so a later caller
/// retries.
pub struct SharedLandmarkModel {
    loader: Box<dyn ModelLoader>,
    cell: OnceCell<Arc<dyn LandmarkModel>>,
    load_attempts: AtomicUsize,
}

impl SharedLandmarkModel {
    pub fn new(loader: impl ModelLoader + 'static) -> Arc<Self> {
        Arc::new(Self {
            loader: Box::new(loader),
            cell: OnceCell::new(),
            load_attempts: AtomicUsize::new(0),
        })
    }

    /// Wrap a model that is already loaded
    pub fn ready(model: Arc<dyn LandmarkModel>) -> Arc<Self> {
        Arc::new(Self {
            loader: Box::new(Preloaded(model.clone())),
            cell: OnceCell::new_with(Some(model)),
            load_attempts: AtomicUsize::new(0),
        })
    }

    /// The loaded model, loading it first if needed
    pub async fn get(&self) -> Result<Arc<dyn LandmarkModel>, LandmarkError> {
        self.cell
            .get_or_try_init(|| async {
                let attempt = self.load_attempts.fetch_add(1, Ordering::SeqCst) + 1;
                info!(attempt, "Loading landmark model");
                match self.loader.load().await {
                    Ok(model) => {
                        info!("Landmark model ready: {}", model.name());
                        Ok(model)
                    }
                    Err(e) => {
                        warn!("Landmark model load failed: {}", e);
                        Err(e)
                    }
                }
            })
            .await
            .cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.initialized()
    }

    /// Loads started so far, successful or not
    pub fn load_attempts(&self) -> usize {
        self.load_attempts.load(Ordering::SeqCst)
    }
}
