use crate::config::Config;
use image::RgbImage;
use rollcall_core::detector::DetectorError;
use rollcall_core::embedder::EmbedderError;
use rollcall_core::{ArcFaceEmbedder, BoundingBox, Embedding, FaceDetector, FaceEmbedder, ScrfdDetector};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("embedder error: {0}")]
    Embedder(#[from] EmbedderError),
    #[error("failed to start engine thread: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from request handlers to the engine thread.
enum EngineRequest {
    Detect {
        frame: Arc<RgbImage>,
        reply: oneshot::Sender<Result<Vec<BoundingBox>, DetectorError>>,
    },
    Embed {
        face: RgbImage,
        reply: oneshot::Sender<Result<Embedding, EmbedderError>>,
    },
    Probe {
        reply: oneshot::Sender<()>,
    },
}

/// Clone-safe handle to the engine thread that owns the face models.
///
/// Requests are served one at a time in arrival order, so at most one
/// inference call runs at any moment.
#[derive(Clone)]
pub struct ModelService {
    tx: mpsc::Sender<EngineRequest>,
}

impl ModelService {
    /// Detect faces in a frame.
    pub async fn detect(&self, frame: Arc<RgbImage>) -> Result<Vec<BoundingBox>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Detect {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Embed one prepared face crop.
    pub async fn embed(&self, face: RgbImage) -> Result<Embedding, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Embed {
                face,
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| EngineError::ChannelClosed)??)
    }

    /// Round-trip an empty request through the engine thread.
    pub async fn is_ready(&self) -> bool {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(EngineRequest::Probe { reply: reply_tx }).await.is_err() {
            return false;
        }
        reply_rx.await.is_ok()
    }
}

/// Load both ONNX models and start the engine. Fails fast if either model
/// is unavailable.
pub fn load(config: &Config) -> Result<ModelService, EngineError> {
    let scrfd_path = config.scrfd_model_path();
    let detector = ScrfdDetector::load(&scrfd_path)?;
    tracing::info!(path = %scrfd_path, "SCRFD detector loaded");

    let arcface_path = config.arcface_model_path();
    let embedder = ArcFaceEmbedder::load(&arcface_path)?;
    tracing::info!(path = %arcface_path, "ArcFace embedder loaded");

    spawn(Box::new(detector), Box::new(embedder))
}

/// Spawn the engine on a dedicated OS thread that owns `detector` and
/// `embedder`.
pub fn spawn(
    mut detector: Box<dyn FaceDetector + Send>,
    mut embedder: Box<dyn FaceEmbedder + Send>,
) -> Result<ModelService, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(16);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Detect { frame, reply } => {
                        let _ = reply.send(detector.detect(&frame));
                    }
                    EngineRequest::Embed { face, reply } => {
                        let _ = reply.send(embedder.embed(&face));
                    }
                    EngineRequest::Probe { reply } => {
                        let _ = reply.send(());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(ModelService { tx })
}

#[cfg(test)]
pub(crate) mod fakes {
    //! Deterministic stand-ins for the ONNX models.

    use super::*;

    /// Returns the same boxes for every frame, or fails if `fail` is set.
    pub struct FixedDetector {
        pub boxes: Vec<BoundingBox>,
        pub fail: bool,
    }

    impl FaceDetector for FixedDetector {
        fn detect(&mut self, _frame: &RgbImage) -> Result<Vec<BoundingBox>, DetectorError> {
            if self.fail {
                return Err(DetectorError::InferenceFailed("detector offline".into()));
            }
            Ok(self.boxes.clone())
        }
    }

    /// Embeds a crop as the normalized RGB of its centre pixel. Black crops
    /// fail.
    pub struct ColorEmbedder;

    impl FaceEmbedder for ColorEmbedder {
        fn embed(&mut self, face: &RgbImage) -> Result<Embedding, EmbedderError> {
            let (w, h) = face.dimensions();
            let px = face.get_pixel(w / 2, h / 2).0;
            if px == [0, 0, 0] {
                return Err(EmbedderError::InferenceFailed("blank crop".into()));
            }
            Ok(Embedding::normalized(px.iter().map(|c| *c as f32).collect()))
        }
    }

    pub fn face_box(x: f32, y: f32, size: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: size,
            height: size,
            confidence: 0.95,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fakes::*;
    use super::*;
    use image::Rgb;

    #[tokio::test]
    async fn test_requests_round_trip_through_engine() {
        let service = spawn(
            Box::new(FixedDetector {
                boxes: vec![face_box(10.0, 10.0, 80.0)],
                fail: false,
            }),
            Box::new(ColorEmbedder),
        )
        .unwrap();
        assert!(service.is_ready().await);

        let frame = Arc::new(RgbImage::from_pixel(120, 120, Rgb([255, 0, 0])));
        let boxes = service.detect(frame).await.unwrap();
        assert_eq!(boxes.len(), 1);

        let emb = service
            .embed(RgbImage::from_pixel(112, 112, Rgb([0, 0, 9])))
            .await
            .unwrap();
        assert_eq!(emb.values, vec![0.0, 0.0, 1.0]);
    }

    #[tokio::test]
    async fn test_model_errors_are_returned_not_fatal() {
        let service = spawn(
            Box::new(FixedDetector {
                boxes: vec![],
                fail: true,
            }),
            Box::new(ColorEmbedder),
        )
        .unwrap();
        let frame = Arc::new(RgbImage::new(60, 60));
        assert!(matches!(service.detect(frame).await, Err(EngineError::Detector(_))));
        assert!(matches!(
            service.embed(RgbImage::new(112, 112)).await,
            Err(EngineError::Embedder(_))
        ));
        assert!(service.is_ready().await);
    }
}
