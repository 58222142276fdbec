use crate::config::Config;
use crate::models::ModelGate;
use crate::state::{CheckProducts, Phase, UiState};
use facecheck_core::verdict::evaluate_pair;
use facecheck_core::{
    extract_faces, load_image, load_image_file, Canvas, CropError, EuclideanMatcher, FacePair,
    FaceService, LoaderError, ServiceError, SourceImage, VerdictError, VerificationResult,
};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use tokio::sync::watch;

#[derive(Error, Debug)]
pub enum ControllerError {
    #[error(transparent)]
    Loader(#[from] LoaderError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Verdict(#[from] VerdictError),
    #[error(transparent)]
    Crop(#[from] CropError),
    #[error("no image selected")]
    NoImage,
    #[error("a check is already running")]
    Busy,
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// How a [`VerificationController::check`] call ended.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    /// Results were committed. `None` when fewer than two faces were found.
    Completed(Option<VerificationResult>),
    /// The image was replaced or reset while the check ran; results dropped.
    Superseded,
}

struct Inner {
    state: Arc<UiState>,
    /// Bumped whenever the image changes, so in-flight checks can tell their
    /// results are stale.
    generation: u64,
}

/// Single owner of [`UiState`] for one verification session.
///
/// Views read snapshots through [`state`](Self::state) or
/// [`subscribe`](Self::subscribe). At most one check talks to the face
/// service at a time.
pub struct VerificationController<S> {
    gate: ModelGate<S>,
    config: Config,
    matcher: EuclideanMatcher,
    inner: Mutex<Inner>,
    publisher: watch::Sender<Arc<UiState>>,
    in_flight: tokio::sync::Mutex<()>,
}

impl<S: FaceService> VerificationController<S> {
    pub fn new(service: S, config: Config) -> Self {
        let gate = ModelGate::new(
            service,
            config.model_dir.clone(),
            config.model_load_timeout(),
            config.detect_timeout(),
        );
        let initial = Arc::new(UiState::initial());
        let (publisher, _) = watch::channel(initial.clone());

        Self {
            gate,
            matcher: EuclideanMatcher {
                threshold: config.match_threshold,
            },
            config,
            inner: Mutex::new(Inner {
                state: initial,
                generation: 0,
            }),
            publisher,
            in_flight: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn gate(&self) -> &ModelGate<S> {
        &self.gate
    }

    /// Current snapshot.
    pub fn state(&self) -> Arc<UiState> {
        self.lock_inner().state.clone()
    }

    /// Receive every new snapshot.
    pub fn subscribe(&self) -> watch::Receiver<Arc<UiState>> {
        self.publisher.subscribe()
    }

    /// Decode `bytes` and make it the current image.
    ///
    /// On failure the previous state is left untouched.
    pub async fn select_image(&self, bytes: Vec<u8>) -> Result<(), ControllerError> {
        let limits = self.config.load_limits();
        let image = tokio::task::spawn_blocking(move || load_image(&bytes, &limits)).await??;
        self.install_image(image);
        Ok(())
    }

    /// Read and decode an image file and make it the current image.
    pub async fn select_image_file(&self, path: impl AsRef<Path>) -> Result<(), ControllerError> {
        let path = path.as_ref().to_path_buf();
        let limits = self.config.load_limits();
        let image =
            tokio::task::spawn_blocking(move || load_image_file(&path, &limits)).await??;
        self.install_image(image);
        Ok(())
    }

    fn install_image(&self, image: SourceImage) {
        tracing::info!(
            width = image.width(),
            height = image.height(),
            name = image.name().unwrap_or("-"),
            "image selected"
        );
        self.commit(true, |state| state.with_image(image));
    }

    /// Detect faces in the current image and evaluate the designated pair.
    ///
    /// Dropping the returned future before it completes rolls the state back
    /// to `ImageLoaded` with `last_error` set.
    pub async fn check(&self) -> Result<CheckOutcome, ControllerError> {
        let _in_flight = self.in_flight.try_lock().map_err(|_| ControllerError::Busy)?;

        let (image, pair, generation) = {
            let mut inner = self.lock_inner();
            let Some(image) = inner.state.source_image.clone() else {
                return Err(ControllerError::NoImage);
            };
            let next = Arc::new(inner.state.begin_check());
            let pair = next.pair;
            inner.state = next.clone();
            self.publisher.send_replace(next);
            (image, pair, inner.generation)
        };
        let mut pending = PendingCheck {
            inner: &self.inner,
            publisher: &self.publisher,
            generation,
            armed: true,
        };

        let result = self.run_check(image, pair).await;

        pending.armed = false;
        let mut inner = self.lock_inner();
        if inner.generation != generation {
            tracing::debug!(generation, current = inner.generation, "discarding stale check results");
            return Ok(CheckOutcome::Superseded);
        }

        match result {
            Ok(products) => {
                let verification = products.verification;
                let next = Arc::new(inner.state.finish_check(products));
                inner.state = next.clone();
                self.publisher.send_replace(next);
                Ok(CheckOutcome::Completed(verification))
            }
            Err(e) => {
                tracing::warn!(error = %e, "check failed");
                let next = Arc::new(inner.state.fail_check(&e));
                inner.state = next.clone();
                self.publisher.send_replace(next);
                Err(e)
            }
        }
    }

    /// Whether a check still holds the face service.
    ///
    /// Stays true after a check is superseded until its service call returns,
    /// even though the published state no longer shows it loading.
    pub fn is_checking(&self) -> bool {
        self.in_flight.try_lock().is_err()
    }

    async fn run_check(
        &self,
        image: SourceImage,
        pair: FacePair,
    ) -> Result<CheckProducts, ControllerError> {
        self.gate.ensure_ready().await?;

        let detections = self
            .gate
            .detect(&image, &self.config.detector_options())
            .await?;
        tracing::info!(faces = detections.len(), "faces detected");

        let overlay = {
            let image = image.clone();
            let detections = detections.clone();
            tokio::task::spawn_blocking(move || {
                let mut canvas = Canvas::for_image(&image);
                canvas.render_overlay(&image, &detections);
                canvas.into_image()
            })
            .await?
        };

        let (verification, pair_error) = match evaluate_pair(&detections, pair, &self.matcher) {
            Ok(verification) => (verification, None),
            Err(e @ VerdictError::InvalidPair { .. }) => {
                tracing::warn!(error = %e, "designated pair does not fit detections");
                (None, Some(e.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        let extracted_faces = {
            let detections = detections.clone();
            tokio::task::spawn_blocking(move || extract_faces(&image, &detections)).await??
        };

        Ok(CheckProducts {
            detections,
            extracted_faces,
            overlay,
            verification,
            pair_error,
        })
    }

    /// Designate which detection is the reference face and which the probe.
    ///
    /// After a check the verdict is recomputed immediately; before one the
    /// designation is stored and used by the next check.
    pub fn select_pair(&self, pair: FacePair) -> Result<Option<VerificationResult>, ControllerError> {
        let mut inner = self.lock_inner();
        let verification = match inner.state.phase {
            Phase::Idle => return Err(ControllerError::NoImage),
            Phase::Detecting => return Err(ControllerError::Busy),
            Phase::ImageLoaded => None,
            Phase::Detected => evaluate_pair(&inner.state.detections, pair, &self.matcher)?,
        };

        let next = Arc::new(inner.state.with_verification(pair, verification));
        inner.state = next.clone();
        self.publisher.send_replace(next);
        Ok(verification)
    }

    /// Drop the image and every derived result.
    pub fn reset(&self) {
        tracing::info!("session reset");
        self.commit(true, |_| UiState::initial());
    }

    /// Release model readiness; the next check reloads.
    pub async fn shutdown(&self) {
        self.gate.teardown().await;
    }

    fn commit(&self, supersede: bool, transition: impl FnOnce(&UiState) -> UiState) {
        let mut inner = self.lock_inner();
        if supersede {
            inner.generation += 1;
        }
        let next = Arc::new(transition(&inner.state));
        inner.state = next.clone();
        self.publisher.send_replace(next);
    }

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        lock(&self.inner)
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Rolls back a check whose future was dropped mid-flight.
struct PendingCheck<'a> {
    inner: &'a Mutex<Inner>,
    publisher: &'a watch::Sender<Arc<UiState>>,
    generation: u64,
    armed: bool,
}

impl Drop for PendingCheck<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = lock(self.inner);
        if inner.generation != self.generation || inner.state.phase != Phase::Detecting {
            return;
        }
        tracing::warn!(generation = self.generation, "check cancelled");
        let next = Arc::new(inner.state.fail_check("check cancelled"));
        inner.state = next.clone();
        self.publisher.send_replace(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use facecheck_core::{BoundingBox, Descriptor, Detection, DetectorOptions, Verdict};
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct ScriptedService {
        detections: std::sync::Mutex<Vec<Detection>>,
        detect_delay: Option<Duration>,
        fail_detect: bool,
        loads: AtomicUsize,
        detect_calls: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
    }

    impl ScriptedService {
        fn with(detections: Vec<Detection>) -> Self {
            Self {
                detections: std::sync::Mutex::new(detections),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl FaceService for ScriptedService {
        async fn load_models(&self, _model_dir: &Path) -> Result<(), ServiceError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn detect_faces(
            &self,
            _image: &SourceImage,
            _options: &DetectorOptions,
        ) -> Result<Vec<Detection>, ServiceError> {
            self.detect_calls.fetch_add(1, Ordering::SeqCst);
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            if let Some(delay) = self.detect_delay {
                tokio::time::sleep(delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail_detect {
                return Err(ServiceError::Unavailable("inference backend down".into()));
            }
            Ok(self.detections.lock().unwrap().clone())
        }
    }

    fn face(x: f32, values: &[f32]) -> Detection {
        Detection {
            bounding_box: Some(BoundingBox::new(x, 4.0, 16.0, 16.0)),
            confidence: 0.9,
            landmarks: None,
            descriptor: Descriptor::new(values.to_vec()),
        }
    }

    fn png(shade: u8) -> Vec<u8> {
        let img = RgbaImage::from_pixel(64, 32, Rgba([shade, shade, shade, 255]));
        let mut buf = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)
            .unwrap();
        buf
    }

    fn config() -> Config {
        Config {
            model_dir: "/models".into(),
            detect_timeout_secs: 1,
            ..Config::default()
        }
    }

    fn controller(service: ScriptedService) -> Arc<VerificationController<ScriptedService>> {
        Arc::new(VerificationController::new(service, config()))
    }

    #[tokio::test]
    async fn test_zero_faces() {
        let ctl = controller(ScriptedService::with(vec![]));
        ctl.select_image(png(100)).await.unwrap();

        let outcome = ctl.check().await.unwrap();
        assert_eq!(outcome, CheckOutcome::Completed(None));

        let state = ctl.state();
        assert_eq!(state.phase, Phase::Detected);
        assert!(state.detections.is_empty());
        assert!(state.extracted_faces.is_empty());
        assert!(state.verification.is_none());
        assert!(!state.is_loading);
        assert_eq!(state.overlay.as_deref(), state.source_image.as_ref().map(|i| i.pixels()));
    }

    #[tokio::test]
    async fn test_one_face_has_no_verdict() {
        let ctl = controller(ScriptedService::with(vec![face(4.0, &[0.0, 0.0])]));
        ctl.select_image(png(100)).await.unwrap();
        ctl.check().await.unwrap();

        let state = ctl.state();
        assert_eq!(state.detections.len(), 1);
        assert_eq!(state.extracted_faces.len(), 1);
        assert!(state.verification.is_none());
        assert!(state.status_label().is_none());
    }

    #[tokio::test]
    async fn test_two_faces_close_match() {
        let ctl = controller(ScriptedService::with(vec![
            face(4.0, &[0.0, 0.0]),
            face(36.0, &[0.3, 0.0]),
        ]));
        ctl.select_image(png(100)).await.unwrap();

        let CheckOutcome::Completed(Some(result)) = ctl.check().await.unwrap() else {
            panic!("expected a verdict");
        };
        assert!((result.distance - 0.3).abs() < 1e-6);
        assert_eq!(result.verdict, Verdict::Matched);

        let state = ctl.state();
        assert_eq!(state.verification, Some(result));
        assert_eq!(state.extracted_faces.len(), 2);
        assert_eq!(state.extracted_faces[1].detection_index, 1);
        assert_eq!(state.status_label().as_deref(), Some("Status: Matched"));
    }

    #[tokio::test]
    async fn test_two_faces_far_apart_not_matched() {
        let ctl = controller(ScriptedService::with(vec![
            face(4.0, &[0.0, 0.0]),
            face(36.0, &[0.9, 0.0]),
        ]));
        ctl.select_image(png(100)).await.unwrap();
        ctl.check().await.unwrap();

        let verification = ctl.state().verification.unwrap();
        assert!((verification.distance - 0.9).abs() < 1e-6);
        assert_eq!(verification.verdict, Verdict::NotMatched);
    }

    #[tokio::test]
    async fn test_check_then_select_then_reset_is_idle() {
        let ctl = controller(ScriptedService::with(vec![
            face(4.0, &[0.0]),
            face(36.0, &[0.1]),
        ]));
        ctl.select_image(png(100)).await.unwrap();
        ctl.check().await.unwrap();
        ctl.select_image(png(200)).await.unwrap();

        let selected = ctl.state();
        assert_eq!(selected.phase, Phase::ImageLoaded);
        assert!(selected.detections.is_empty());
        assert!(selected.extracted_faces.is_empty());

        ctl.reset();
        assert_eq!(*ctl.state(), UiState::initial());
    }

    #[tokio::test]
    async fn test_reset_from_every_phase() {
        let ctl = controller(ScriptedService::with(vec![face(4.0, &[0.0]), face(36.0, &[1.0])]));
        ctl.reset();
        assert_eq!(*ctl.state(), UiState::initial());

        ctl.select_image(png(1)).await.unwrap();
        ctl.reset();
        assert_eq!(*ctl.state(), UiState::initial());

        ctl.select_image(png(1)).await.unwrap();
        ctl.check().await.unwrap();
        ctl.reset();
        assert_eq!(*ctl.state(), UiState::initial());
    }

    #[tokio::test]
    async fn test_check_without_image() {
        let ctl = controller(ScriptedService::default());
        assert!(matches!(ctl.check().await, Err(ControllerError::NoImage)));
        assert_eq!(*ctl.state(), UiState::initial());
    }

    #[tokio::test]
    async fn test_models_load_once_across_checks() {
        let ctl = controller(ScriptedService::with(vec![face(4.0, &[0.0])]));
        ctl.select_image(png(10)).await.unwrap();
        for _ in 0..3 {
            ctl.check().await.unwrap();
        }
        assert_eq!(ctl.gate().service().loads.load(Ordering::SeqCst), 1);
        assert_eq!(ctl.gate().service().detect_calls.load(Ordering::SeqCst), 3);

        ctl.shutdown().await;
        ctl.check().await.unwrap();
        assert_eq!(ctl.gate().service().loads.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_overlapping_check_is_rejected() {
        let ctl = controller(ScriptedService {
            detect_delay: Some(Duration::from_millis(100)),
            ..ScriptedService::with(vec![face(4.0, &[0.0])])
        });
        ctl.select_image(png(10)).await.unwrap();

        let mut rx = ctl.subscribe();
        let running = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.check().await }
        });
        rx.wait_for(|s| s.is_loading).await.unwrap();

        assert!(matches!(ctl.check().await, Err(ControllerError::Busy)));
        assert!(matches!(
            ctl.select_pair(FacePair::new(1, 0)),
            Err(ControllerError::Busy)
        ));

        running.await.unwrap().unwrap();
        assert_eq!(ctl.gate().service().max_active.load(Ordering::SeqCst), 1);
        assert!(!ctl.state().is_loading);
    }

    #[tokio::test]
    async fn test_new_image_during_check_discards_stale_results() {
        let ctl = controller(ScriptedService {
            detect_delay: Some(Duration::from_millis(100)),
            ..ScriptedService::with(vec![face(4.0, &[0.0]), face(36.0, &[0.2])])
        });
        ctl.select_image(png(10)).await.unwrap();

        let mut rx = ctl.subscribe();
        let running = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.check().await }
        });
        rx.wait_for(|s| s.is_loading).await.unwrap();

        ctl.select_image(png(20)).await.unwrap();
        let replaced = ctl.state().source_image.clone().unwrap();

        assert_eq!(running.await.unwrap().unwrap(), CheckOutcome::Superseded);

        let state = ctl.state();
        assert_eq!(state.phase, Phase::ImageLoaded);
        assert_eq!(state.source_image.as_ref(), Some(&replaced));
        assert!(state.detections.is_empty());
        assert!(state.verification.is_none());
        assert!(!state.is_loading);
    }

    #[tokio::test]
    async fn test_reset_during_check_stays_idle() {
        let ctl = controller(ScriptedService {
            detect_delay: Some(Duration::from_millis(100)),
            ..ScriptedService::with(vec![face(4.0, &[0.0]), face(36.0, &[0.2])])
        });
        ctl.select_image(png(10)).await.unwrap();

        let mut rx = ctl.subscribe();
        let running = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.check().await }
        });
        rx.wait_for(|s| s.is_loading).await.unwrap();
        ctl.reset();

        assert_eq!(running.await.unwrap().unwrap(), CheckOutcome::Superseded);
        assert_eq!(*ctl.state(), UiState::initial());
    }

    #[tokio::test]
    async fn test_service_failure_leaves_consistent_state() {
        let ctl = controller(ScriptedService {
            fail_detect: true,
            ..ScriptedService::default()
        });
        ctl.select_image(png(10)).await.unwrap();

        let err = ctl.check().await.unwrap_err();
        assert!(matches!(err, ControllerError::Service(ServiceError::Unavailable(_))));

        let state = ctl.state();
        assert_eq!(state.phase, Phase::ImageLoaded);
        assert!(state.source_image.is_some());
        assert!(state.detections.is_empty());
        assert!(state.extracted_faces.is_empty());
        assert!(state.verification.is_none());
        assert!(!state.is_loading);
        assert!(state.last_error.is_some());
    }

    #[tokio::test]
    async fn test_detection_timeout() {
        let ctl = controller(ScriptedService {
            detect_delay: Some(Duration::from_secs(3)),
            ..ScriptedService::default()
        });
        ctl.select_image(png(10)).await.unwrap();

        let err = ctl.check().await.unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Service(ServiceError::Timeout { stage: "detection", .. })
        ));
        assert!(!ctl.state().is_loading);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails_check() {
        let ctl = controller(ScriptedService::with(vec![
            face(4.0, &[0.0, 0.0]),
            face(36.0, &[0.0]),
        ]));
        ctl.select_image(png(10)).await.unwrap();

        let err = ctl.check().await.unwrap_err();
        assert!(matches!(
            err,
            ControllerError::Verdict(VerdictError::DimensionMismatch { left: 2, right: 1 })
        ));
        let state = ctl.state();
        assert!(state.detections.is_empty());
        assert!(state.extracted_faces.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_box_is_skipped_in_crops() {
        let mut boxless = face(0.0, &[0.5]);
        boxless.bounding_box = None;
        let ctl = controller(ScriptedService::with(vec![
            boxless,
            face(36.0, &[0.5]),
        ]));
        ctl.select_image(png(10)).await.unwrap();
        ctl.check().await.unwrap();

        let state = ctl.state();
        assert_eq!(state.detections.len(), 2);
        assert_eq!(state.extracted_faces.len(), 1);
        assert_eq!(state.extracted_faces[0].detection_index, 1);
        // Verdict does not depend on boxes.
        assert_eq!(state.verification.unwrap().verdict, Verdict::Matched);
    }

    #[tokio::test]
    async fn test_select_pair_reevaluates() {
        let ctl = controller(ScriptedService::with(vec![
            face(0.0, &[0.0]),
            face(20.0, &[0.9]),
            face(40.0, &[0.1]),
        ]));
        assert!(matches!(
            ctl.select_pair(FacePair::new(0, 2)),
            Err(ControllerError::NoImage)
        ));

        ctl.select_image(png(10)).await.unwrap();
        ctl.check().await.unwrap();
        assert_eq!(ctl.state().verification.unwrap().verdict, Verdict::NotMatched);

        let result = ctl.select_pair(FacePair::new(0, 2)).unwrap().unwrap();
        assert_eq!(result.verdict, Verdict::Matched);
        assert_eq!(result.pair, FacePair::new(0, 2));
        assert_eq!(ctl.state().pair, FacePair::new(0, 2));

        assert!(matches!(
            ctl.select_pair(FacePair::new(0, 7)),
            Err(ControllerError::Verdict(VerdictError::InvalidPair { .. }))
        ));
        assert_eq!(ctl.state().pair, FacePair::new(0, 2));
    }

    #[tokio::test]
    async fn test_pair_chosen_before_check_is_used() {
        let ctl = controller(ScriptedService::with(vec![
            face(0.0, &[0.0]),
            face(20.0, &[0.9]),
            face(40.0, &[0.1]),
        ]));
        ctl.select_image(png(10)).await.unwrap();
        assert_eq!(ctl.select_pair(FacePair::new(2, 0)).unwrap(), None);

        let CheckOutcome::Completed(Some(result)) = ctl.check().await.unwrap() else {
            panic!("expected a verdict");
        };
        assert_eq!(result.pair, FacePair::new(2, 0));
        assert_eq!(result.verdict, Verdict::Matched);
    }

    #[tokio::test]
    async fn test_pair_beyond_detections_keeps_faces() {
        let ctl = controller(ScriptedService::with(vec![face(4.0, &[0.0]), face(36.0, &[0.2])]));
        ctl.select_image(png(10)).await.unwrap();
        ctl.select_pair(FacePair::new(0, 2)).unwrap();

        assert_eq!(ctl.check().await.unwrap(), CheckOutcome::Completed(None));

        let state = ctl.state();
        assert_eq!(state.phase, Phase::Detected);
        assert_eq!(state.detections.len(), 2);
        assert_eq!(state.extracted_faces.len(), 2);
        assert!(state.overlay.is_some());
        assert!(state.verification.is_none());
        assert!(state.last_error.as_deref().unwrap().contains("0/2"));

        let result = ctl.select_pair(FacePair::POSITIONAL).unwrap().unwrap();
        assert_eq!(result.verdict, Verdict::Matched);
    }

    #[tokio::test]
    async fn test_dropped_check_rolls_back_loading() {
        let ctl = controller(ScriptedService {
            detect_delay: Some(Duration::from_millis(200)),
            ..ScriptedService::with(vec![face(4.0, &[0.0]), face(36.0, &[0.2])])
        });
        ctl.select_image(png(10)).await.unwrap();

        let cancelled = tokio::time::timeout(Duration::from_millis(50), ctl.check()).await;
        assert!(cancelled.is_err());

        let state = ctl.state();
        assert_eq!(state.phase, Phase::ImageLoaded);
        assert!(!state.is_loading);
        assert_eq!(state.loading_indicator(), None);
        assert!(state.source_image.is_some());
        assert!(state.last_error.is_some());
        assert!(!ctl.is_checking());
        assert_eq!(ctl.select_pair(FacePair::new(1, 0)).unwrap(), None);

        assert!(matches!(ctl.check().await.unwrap(), CheckOutcome::Completed(Some(_))));
    }

    #[tokio::test]
    async fn test_superseded_check_still_reports_checking() {
        let ctl = controller(ScriptedService {
            detect_delay: Some(Duration::from_millis(100)),
            ..ScriptedService::with(vec![face(4.0, &[0.0])])
        });
        ctl.select_image(png(10)).await.unwrap();
        assert!(!ctl.is_checking());

        let mut rx = ctl.subscribe();
        let running = tokio::spawn({
            let ctl = ctl.clone();
            async move { ctl.check().await }
        });
        rx.wait_for(|s| s.is_loading).await.unwrap();
        ctl.select_image(png(20)).await.unwrap();

        assert!(!ctl.state().is_loading);
        assert!(ctl.is_checking());
        assert!(matches!(ctl.check().await, Err(ControllerError::Busy)));

        assert_eq!(running.await.unwrap().unwrap(), CheckOutcome::Superseded);
        assert!(!ctl.is_checking());
    }

    #[tokio::test]
    async fn test_unreadable_image_keeps_prior_state() {
        let ctl = controller(ScriptedService::with(vec![face(4.0, &[0.0])]));
        ctl.select_image(png(10)).await.unwrap();
        ctl.check().await.unwrap();
        let before = ctl.state();

        let err = ctl.select_image(b"GIF89a-but-not-really".to_vec()).await.unwrap_err();
        assert!(matches!(err, ControllerError::Loader(LoaderError::UnreadableFile(_))));
        assert_eq!(ctl.state(), before);
    }

    #[tokio::test]
    async fn test_select_image_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pair.png");
        std::fs::write(&path, png(42)).unwrap();

        let ctl = controller(ScriptedService::default());
        ctl.select_image_file(&path).await.unwrap();
        let state = ctl.state();
        assert_eq!(state.phase, Phase::ImageLoaded);
        assert_eq!(state.source_image.as_ref().and_then(|i| i.name()), Some("pair.png"));
    }

    #[tokio::test]
    async fn test_subscribers_see_committed_state() {
        let ctl = controller(ScriptedService::with(vec![face(4.0, &[0.0])]));
        let rx = ctl.subscribe();
        ctl.select_image(png(10)).await.unwrap();
        ctl.check().await.unwrap();
        assert_eq!(rx.borrow().phase, Phase::Detected);
        assert_eq!(rx.borrow().detections.len(), 1);
    }
}
