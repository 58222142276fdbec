//! Match verdicts from descriptor distance.
//!
//! The default threshold is the usual Euclidean cut-off for 128-d face
//! descriptors. It is not calibrated for any false-accept rate and should be
//! treated as configuration.

use crate::types::{Descriptor, Detection, FacePair, Verdict, VerificationResult};
use thiserror::Error;

/// Descriptor distance below which two faces are considered the same person.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VerdictError {
    #[error("descriptor dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },
    #[error("invalid face pair {reference}/{probe} for {count} detections")]
    InvalidPair {
        reference: usize,
        probe: usize,
        count: usize,
    },
}

/// Strategy for comparing a reference descriptor with a probe descriptor.
pub trait Matcher {
    fn compare(
        &self,
        reference: &Descriptor,
        probe: &Descriptor,
    ) -> Result<VerificationResult, VerdictError>;
}

/// Euclidean-distance matcher: `Matched` iff `distance < threshold`.
#[derive(Debug, Clone, Copy)]
pub struct EuclideanMatcher {
    pub threshold: f32,
}

impl Default for EuclideanMatcher {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
        }
    }
}

impl Matcher for EuclideanMatcher {
    fn compare(
        &self,
        reference: &Descriptor,
        probe: &Descriptor,
    ) -> Result<VerificationResult, VerdictError> {
        evaluate(reference, probe, self.threshold)
    }
}

/// Compare two descriptors against `threshold`.
///
/// A distance equal to the threshold is `NotMatched`.
pub fn evaluate(
    a: &Descriptor,
    b: &Descriptor,
    threshold: f32,
) -> Result<VerificationResult, VerdictError> {
    if a.len() != b.len() {
        return Err(VerdictError::DimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }

    let distance = a.euclidean_distance(b);
    Ok(VerificationResult {
        distance,
        verdict: classify(distance, threshold),
        threshold,
        pair: FacePair::POSITIONAL,
    })
}

/// Classify a precomputed distance.
pub fn classify(distance: f32, threshold: f32) -> Verdict {
    if distance < threshold {
        Verdict::Matched
    } else {
        Verdict::NotMatched
    }
}

/// Evaluate the designated pair of a detection set.
///
/// Returns `Ok(None)` with fewer than two detections: no verdict exists yet,
/// which is different from a computed `NotMatched`.
pub fn evaluate_pair(
    detections: &[Detection],
    pair: FacePair,
    matcher: &dyn Matcher,
) -> Result<Option<VerificationResult>, VerdictError> {
    if detections.len() < 2 {
        return Ok(None);
    }

    let invalid = || VerdictError::InvalidPair {
        reference: pair.reference,
        probe: pair.probe,
        count: detections.len(),
    };
    if pair.reference == pair.probe {
        return Err(invalid());
    }
    let reference = detections.get(pair.reference).ok_or_else(invalid)?;
    let probe = detections.get(pair.probe).ok_or_else(invalid)?;

    let mut result = matcher.compare(&reference.descriptor, &probe.descriptor)?;
    result.pair = pair;

    tracing::info!(
        reference = pair.reference,
        probe = pair.probe,
        distance = result.distance,
        verdict = %result.verdict,
        "face pair evaluated"
    );

    Ok(Some(result))
}
