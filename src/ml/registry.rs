use crate::error::InsufficientData;
use crate::ml::classifier::TrainedModel;
use parking_lot::RwLock;
use std::sync::Arc;

/// Process-wide holder of the published model.
///
/// Readers clone the `Arc` under a short read lock and keep using that
/// snapshot; the trainer replaces it under a write lock held only for the
/// assignment. A reader therefore always sees either the old model or the
/// new one, never a mix.
#[derive(Default)]
pub struct ModelRegistry {
    current: RwLock<Option<Arc<TrainedModel>>>,
    last_rejection: RwLock<Option<InsufficientData>>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with an already trained model
    pub fn with_model(model: TrainedModel) -> Self {
        let registry = Self::new();
        registry.publish(Arc::new(model));
        registry
    }

    /// Snapshot of the published model, if any
    pub fn current(&self) -> Option<Arc<TrainedModel>> {
        self.current.read().clone()
    }

    pub fn is_trained(&self) -> bool {
        self.current.read().is_some()
    }

    /// Replace the published model and clear any recorded rejection
    pub fn publish(&self, model: Arc<TrainedModel>) {
        *self.current.write() = Some(model);
        *self.last_rejection.write() = None;
    }

    /// Remember why the latest training attempt was refused
    pub fn record_rejection(&self, rejection: InsufficientData) {
        *self.last_rejection.write() = Some(rejection);
    }

    pub fn last_rejection(&self) -> Option<InsufficientData> {
        self.last_rejection.read().clone()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("trained", &self.is_trained())
            .field("last_rejection", &self.last_rejection())
            .finish()
    }
}
