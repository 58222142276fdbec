//! One-time model initialization for a face service.

use facecheck_core::service::{DetectorOptions, FaceService, ServiceError};
use facecheck_core::{Detection, SourceImage};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Wraps a [`FaceService`] so its models load at most once.
///
/// Concurrent callers of [`ensure_ready`](Self::ensure_ready) wait on the
/// single in-flight load. A failed or timed-out load is not remembered, so the
/// next call tries again. [`teardown`](Self::teardown) forgets readiness.
pub struct ModelGate<S> {
    service: S,
    model_dir: PathBuf,
    load_timeout: Duration,
    detect_timeout: Duration,
    loading: Mutex<()>,
    ready: AtomicBool,
}

impl<S: FaceService> ModelGate<S> {
    pub fn new(service: S, model_dir: PathBuf, load_timeout: Duration, detect_timeout: Duration) -> Self {
        Self {
            service,
            model_dir,
            load_timeout,
            detect_timeout,
            loading: Mutex::new(()),
            ready: AtomicBool::new(false),
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Load models unless already loaded.
    pub async fn ensure_ready(&self) -> Result<(), ServiceError> {
        if self.is_ready() {
            return Ok(());
        }

        let _guard = self.loading.lock().await;
        if self.is_ready() {
            return Ok(());
        }

        tracing::info!(dir = %self.model_dir.display(), "loading face models");
        match timeout(self.load_timeout, self.service.load_models(&self.model_dir)).await {
            Ok(Ok(())) => {
                self.ready.store(true, Ordering::Release);
                tracing::info!("face models ready");
                Ok(())
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "face model load failed");
                Err(e)
            }
            Err(_) => {
                tracing::warn!(secs = self.load_timeout.as_secs(), "face model load timed out");
                Err(ServiceError::Timeout {
                    stage: "model load",
                    secs: self.load_timeout.as_secs(),
                })
            }
        }
    }

    /// Run detection with the inference timeout applied.
    pub async fn detect(
        &self,
        image: &SourceImage,
        options: &DetectorOptions,
    ) -> Result<Vec<Detection>, ServiceError> {
        if !self.is_ready() {
            return Err(ServiceError::NotLoaded);
        }
        timeout(self.detect_timeout, self.service.detect_faces(image, options))
            .await
            .map_err(|_| ServiceError::Timeout {
                stage: "detection",
                secs: self.detect_timeout.as_secs(),
            })?
    }

    /// Forget readiness; the next [`ensure_ready`](Self::ensure_ready) reloads.
    pub async fn teardown(&self) {
        let _guard = self.loading.lock().await;
        if self.ready.swap(false, Ordering::AcqRel) {
            tracing::info!("face models released");
        }
    }
}
