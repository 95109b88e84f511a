use crate::config::Config;
use crate::engine::ModelService;
use axum::Router;
use rollcall_core::Clock;
use rollcall_store::SqliteStore;
use std::sync::Arc;

pub mod attendance;
pub mod health;
pub mod recognize;
pub mod register;
pub mod students;

/// Shared handler state. Everything in it is cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub models: ModelService,
    pub store: SqliteStore,
    pub clock: Arc<dyn Clock>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(health::routes())
        .merge(recognize::routes())
        .merge(attendance::routes())
        .merge(register::routes())
        .merge(students::routes())
        .with_state(state)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::engine::fakes::{ColorEmbedder, FixedDetector};
    use crate::engine;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use chrono::{NaiveDate, NaiveDateTime};
    use http_body_util::BodyExt;
    use image::{ImageFormat, Rgb, RgbImage};
    use rollcall_core::BoundingBox;
    use serde_json::Value;
    use std::io::Cursor;
    use std::sync::Mutex;
    use tower::ServiceExt;

    /// Clock that tests can move.
    pub struct TestClock(pub Mutex<NaiveDateTime>);

    impl TestClock {
        pub fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> Arc<Self> {
            let t = NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, s).unwrap();
            Arc::new(Self(Mutex::new(t)))
        }

        pub fn advance(&self, secs: i64) {
            let mut t = self.0.lock().unwrap();
            *t += chrono::Duration::seconds(secs);
        }
    }

    impl Clock for TestClock {
        fn now(&self) -> NaiveDateTime {
            *self.0.lock().unwrap()
        }
    }

    pub struct Harness {
        pub state: AppState,
        pub clock: Arc<TestClock>,
    }

    impl Harness {
        /// In-memory store, fake models detecting `boxes`, clock at
        /// Monday 2026-03-02 10:15.
        pub async fn new(boxes: Vec<BoundingBox>) -> Self {
            Self::with_detector(FixedDetector { boxes, fail: false }).await
        }

        pub async fn with_detector(detector: FixedDetector) -> Self {
            let store = rollcall_store::SqliteStore::open_in_memory().await.unwrap();
            Self::build(detector, store)
        }

        /// Same as `new`, over an already opened store.
        pub fn with_store(boxes: Vec<BoundingBox>, store: rollcall_store::SqliteStore) -> Self {
            Self::build(FixedDetector { boxes, fail: false }, store)
        }

        fn build(detector: FixedDetector, store: rollcall_store::SqliteStore) -> Self {
            let clock = TestClock::at(2026, 3, 2, 10, 15, 0);
            let state = AppState {
                config: Arc::new(Config::default()),
                models: engine::spawn(Box::new(detector), Box::new(ColorEmbedder)).unwrap(),
                store,
                clock: clock.clone(),
            };
            Self { state, clock }
        }

        pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
            self.send(Request::get(uri).body(Body::empty()).unwrap()).await
        }

        pub async fn post(&self, uri: &str, body: Value, headers: &[(&str, &str)]) -> (StatusCode, Value) {
            let mut builder = Request::post(uri).header("content-type", "application/json");
            for (k, v) in headers {
                builder = builder.header(*k, *v);
            }
            self.send(builder.body(Body::from(body.to_string())).unwrap()).await
        }

        /// POST an arbitrary body, for malformed-request cases.
        pub async fn post_raw(&self, uri: &str, body: &str) -> (StatusCode, Value) {
            let req = Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap();
            self.send(req).await
        }

        async fn send(&self, req: Request<Body>) -> (StatusCode, Value) {
            let resp = router(self.state.clone()).oneshot(req).await.unwrap();
            let status = resp.status();
            let bytes = resp.into_body().collect().await.unwrap().to_bytes();
            let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
            (status, body)
        }
    }

    /// Solid-colour PNG, base64 encoded.
    pub fn png_base64(width: u32, height: u32, color: [u8; 3]) -> String {
        encode_png(RgbImage::from_pixel(width, height, Rgb(color)))
    }

    /// PNG split down the middle: `left` on the left half, `right` on the rest.
    pub fn png_base64_halves(width: u32, height: u32, left: [u8; 3], right: [u8; 3]) -> String {
        encode_png(RgbImage::from_fn(width, height, |x, _| {
            Rgb(if x < width / 2 { left } else { right })
        }))
    }

    fn encode_png(img: RgbImage) -> String {
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();
        STANDARD.encode(buf.into_inner())
    }
}
