//! Bounded worker pool for photo analysis: decode → margin → detect → gate.
//!
//! Requests travel over a bounded mpsc channel to dedicated OS threads and
//! replies come back over oneshot channels. Each worker owns its own
//! detector instance, loaded once at startup and read-only afterwards
//! (ONNX sessions take `&mut self` to run, so the model handle cannot be
//! shared across threads directly).

use std::sync::{Arc, Mutex};

use image::RgbImage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use faceid_core::quality;
use faceid_core::{AcceptedFace, DetectorError, FaceDetector, GateConfig, GateRejection};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error(transparent)]
    Detector(#[from] DetectorError),
    #[error("analysis worker pool unavailable")]
    ChannelClosed,
}

/// One photo that cleared the gate: the accepted face plus its crop, taken
/// from the same margined buffer the box coordinates refer to.
#[derive(Debug, Clone)]
pub struct AnalyzedPhoto {
    pub face: AcceptedFace,
    pub crop: RgbImage,
}

/// Outcome of one analysis pass. A gate rejection is an expected result,
/// not an error.
#[derive(Debug)]
pub enum Analysis {
    Accepted(Box<AnalyzedPhoto>),
    Rejected(GateRejection),
}

struct AnalyzeRequest {
    bytes: Vec<u8>,
    profile: GateConfig,
    reply: oneshot::Sender<Result<Analysis, AnalysisError>>,
}

/// Clone-safe handle to the analysis pool.
#[derive(Clone)]
pub struct AnalysisHandle {
    tx: mpsc::Sender<AnalyzeRequest>,
}

impl AnalysisHandle {
    /// Analyze one photo under the given gate profile.
    ///
    /// Suspends at the hand-off to the pool. If the caller is cancelled
    /// while the task runs, the task completes and its result is discarded.
    pub async fn analyze(
        &self,
        bytes: Vec<u8>,
        profile: GateConfig,
    ) -> Result<Analysis, AnalysisError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(AnalyzeRequest {
                bytes,
                profile,
                reply: reply_tx,
            })
            .await
            .map_err(|_| AnalysisError::ChannelClosed)?;
        reply_rx.await.map_err(|_| AnalysisError::ChannelClosed)?
    }
}

/// Spawn the analysis pool.
///
/// `make_detector` is called once per worker before any thread starts, so
/// a missing model fails the whole startup rather than a later request.
/// The pool shuts down when every handle is dropped.
pub fn spawn_analysis_pool<D, F>(
    workers: usize,
    queue_depth: usize,
    mut make_detector: F,
) -> Result<AnalysisHandle, DetectorError>
where
    D: FaceDetector + 'static,
    F: FnMut(usize) -> Result<D, DetectorError>,
{
    let workers = workers.max(1);
    let (tx, rx) = mpsc::channel::<AnalyzeRequest>(queue_depth.max(1));
    let rx = Arc::new(Mutex::new(rx));

    for worker in 0..workers {
        let mut detector = make_detector(worker)?;
        let rx = Arc::clone(&rx);
        std::thread::Builder::new()
            .name(format!("faceid-analysis-{worker}"))
            .spawn(move || {
                tracing::info!(worker, "analysis worker started");
                loop {
                    let request = {
                        let Ok(mut guard) = rx.lock() else { break };
                        guard.blocking_recv()
                    };
                    let Some(request) = request else { break };
                    let result = run_analysis(&mut detector, &request.bytes, &request.profile);
                    // A closed reply channel means the caller went away; the
                    // finished result is dropped, never partially applied.
                    let _ = request.reply.send(result);
                }
                tracing::info!(worker, "analysis worker exiting");
            })
            .expect("failed to spawn analysis worker");
    }

    Ok(AnalysisHandle { tx })
}

fn run_analysis<D: FaceDetector>(
    detector: &mut D,
    bytes: &[u8],
    profile: &GateConfig,
) -> Result<Analysis, AnalysisError> {
    let decoded = image::load_from_memory(bytes)
        .map_err(|e| AnalysisError::Decode(e.to_string()))?
        .to_rgb8();

    let margined = quality::add_margin(&decoded, profile.margin_ratio);
    let detections = detector.detect(&margined)?;

    match quality::select_best_face(&margined, &detections, profile) {
        Ok(face) => {
            let crop = quality::crop_face(&margined, &face.meta.bbox);
            Ok(Analysis::Accepted(Box::new(AnalyzedPhoto { face, crop })))
        }
        Err(rejection) => Ok(Analysis::Rejected(rejection)),
    }
}
