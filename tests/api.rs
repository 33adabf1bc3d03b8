// 该文件是 Yejian （叶鉴） 项目的一部分。
// tests/api.rs - HTTP 接口测试
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::{
  io::Cursor,
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
};

use approx::assert_relative_eq;
use axum::{
  Router,
  body::Body,
  http::{Request, StatusCode, header},
};
use http_body_util::BodyExt;
use image::{ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use tower::ServiceExt;

use yejian::{
  api::{AppState, router},
  error::InferenceError,
  model::{ClassLabels, Model, ModelHandle, ModelRegistry, ModelRole},
  preprocess::ImageLimits,
  service::{ComparisonService, ExecutionMode},
  tensor::Tensor,
};

const BOUNDARY: &str = "yejian-test-boundary";

struct Canned {
  output: Vec<f32>,
  calls: Arc<AtomicUsize>,
}

impl Model for Canned {
  fn forward(&self, _input: &Tensor) -> Result<Vec<f32>, InferenceError> {
    self.calls.fetch_add(1, Ordering::SeqCst);
    Ok(self.output.clone())
  }

  fn describe(&self) -> String {
    "canned".to_string()
  }
}

struct Failing;

impl Model for Failing {
  fn forward(&self, _input: &Tensor) -> Result<Vec<f32>, InferenceError> {
    Err(InferenceError::Backend("segfault in kernel 0x7f3a".to_string()))
  }

  fn describe(&self) -> String {
    "failing".to_string()
  }
}

struct Fixture {
  app: Router,
  calls: Arc<AtomicUsize>,
}

fn handle<M: Model + 'static>(role: ModelRole, backend: M) -> ModelHandle {
  ModelHandle::new(role, ClassLabels::potato(), role.default_policy(), backend)
}

fn fixture_with(mobilenet: ModelHandle, max_upload_bytes: usize) -> Fixture {
  let calls = Arc::new(AtomicUsize::new(0));
  let custom = handle(
    ModelRole::CustomCnn,
    Canned {
      output: vec![0.05, 0.923, 0.027],
      calls: calls.clone(),
    },
  );
  let registry = ModelRegistry::new(custom, mobilenet).unwrap();
  let service = ComparisonService::new(Arc::new(registry), ImageLimits::default(), ExecutionMode::Parallel);
  Fixture {
    app: router(AppState::new(Arc::new(service), max_upload_bytes)),
    calls,
  }
}

fn fixture() -> Fixture {
  let mobilenet = handle(
    ModelRole::MobileNet,
    Canned {
      output: vec![0.08, 0.887, 0.033],
      calls: Arc::new(AtomicUsize::new(0)),
    },
  );
  fixture_with(mobilenet, 10 * 1024 * 1024)
}

fn png(width: u32, height: u32) -> Vec<u8> {
  // 伪随机像素，避免 PNG 压缩得过小
  let mut seed = 0x2545_f491_u32;
  let image = RgbImage::from_fn(width, height, |_, _| {
    seed ^= seed << 13;
    seed ^= seed >> 17;
    seed ^= seed << 5;
    let [r, g, b, _] = seed.to_le_bytes();
    Rgb([r, g, b])
  });
  let mut bytes = Cursor::new(Vec::new());
  image.write_to(&mut bytes, ImageFormat::Png).unwrap();
  bytes.into_inner()
}

fn multipart(field: &str, filename: &str, content_type: &str, data: &[u8]) -> Request<Body> {
  let mut body = Vec::new();
  body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
  body.extend_from_slice(
    format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n").as_bytes(),
  );
  body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
  body.extend_from_slice(data);
  body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

  Request::builder()
    .method("POST")
    .uri("/predict")
    .header(
      header::CONTENT_TYPE,
      format!("multipart/form-data; boundary={BOUNDARY}"),
    )
    .body(Body::from(body))
    .unwrap()
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
  let response = app.oneshot(request).await.unwrap();
  let status = response.status();
  let bytes = response.into_body().collect().await.unwrap().to_bytes();
  (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn predict_returns_both_results() {
  let f = fixture();
  let (status, json) = send(f.app, multipart("image", "leaf.png", "image/png", &png(300, 200))).await;

  assert_eq!(status, StatusCode::OK);
  assert_eq!(json["custom_cnn"]["prediction"], "Late_Blight");
  assert_relative_eq!(json["custom_cnn"]["confidence"].as_f64().unwrap(), 92.3);
  assert_eq!(json["mobilenet"]["prediction"], "Late_Blight");
  assert_relative_eq!(json["mobilenet"]["confidence"].as_f64().unwrap(), 88.7);
  assert_eq!(json["agreement"], true);
  assert!(json["custom_cnn"]["inference_time_ms"].as_f64().unwrap() >= 0.0);

  let probabilities = json["mobilenet"]["class_probabilities"].as_object().unwrap();
  assert_eq!(probabilities.len(), 3);
  let total: f64 = probabilities.values().filter_map(Value::as_f64).sum();
  assert_relative_eq!(total, 100.0, epsilon = 0.5);
  assert_eq!(f.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn missing_image_field_is_rejected() {
  let f = fixture();
  let (status, json) = send(f.app, multipart("file", "leaf.png", "image/png", &png(100, 100))).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(json["code"], "missing_file");
  assert_eq!(f.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn text_upload_never_reaches_models() {
  let f = fixture();
  let (status, json) = send(
    f.app,
    multipart("image", "notes.txt", "text/plain", b"leaves are green"),
  )
  .await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(json["code"], "not_an_image");
  assert!(json.get("custom_cnn").is_none());
  assert_eq!(f.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn zero_byte_image_is_unprocessable() {
  let f = fixture();
  let (status, json) = send(f.app, multipart("image", "leaf.jpg", "image/jpeg", b"")).await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
  assert_eq!(json["code"], "invalid_image");
  assert_eq!(f.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn tiny_image_is_rejected() {
  let f = fixture();
  let (status, json) = send(f.app, multipart("image", "leaf.png", "image/png", &png(20, 20))).await;
  assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
  assert_eq!(json["code"], "image_too_small");
}

#[tokio::test]
async fn non_multipart_request_is_rejected() {
  let f = fixture();
  let request = Request::builder()
    .method("POST")
    .uri("/predict")
    .header(header::CONTENT_TYPE, "application/json")
    .body(Body::from("{}"))
    .unwrap();
  let (status, json) = send(f.app, request).await;
  assert_eq!(status, StatusCode::BAD_REQUEST);
  assert_eq!(json["code"], "bad_multipart");
}

#[tokio::test]
async fn oversized_upload_is_rejected() {
  let mobilenet = handle(
    ModelRole::MobileNet,
    Canned {
      output: vec![0.1, 0.1, 0.8],
      calls: Arc::new(AtomicUsize::new(0)),
    },
  );
  let f = fixture_with(mobilenet, 16 * 1024);
  let (status, json) = send(f.app, multipart("image", "leaf.png", "image/png", &png(200, 200))).await;
  assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
  assert_eq!(json["code"], "payload_too_large");
  assert_eq!(f.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn inference_failure_hides_details() {
  let f = fixture_with(handle(ModelRole::MobileNet, Failing), 10 * 1024 * 1024);
  let (status, json) = send(f.app, multipart("image", "leaf.png", "image/png", &png(128, 128))).await;
  assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
  assert_eq!(json["code"], "inference_failed");
  assert!(!json["error"].as_str().unwrap().contains("0x7f3a"));
  assert!(json.get("custom_cnn").is_none());
  assert!(json.get("agreement").is_none());
}

#[tokio::test]
async fn health_reports_loaded_models() {
  let f = fixture();
  let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
  let (status, json) = send(f.app, request).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(json["status"], "healthy");
  assert_eq!(json["models_loaded"], true);
  assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn models_lists_shapes_and_labels() {
  let f = fixture();
  let request = Request::builder().uri("/models").body(Body::empty()).unwrap();
  let (status, json) = send(f.app, request).await;
  assert_eq!(status, StatusCode::OK);
  assert_eq!(json["custom_cnn"]["input"], "256x256x3");
  assert_eq!(json["custom_cnn"]["policy"], "custom");
  assert_eq!(json["mobilenet"]["input"], "224x224x3");
  assert_eq!(json["mobilenet"]["policy"], "mobilenet");
  assert_eq!(json["mobilenet"]["layout"], "nhwc");
  assert_eq!(
    json["mobilenet"]["labels"],
    serde_json::json!(["Early_Blight", "Late_Blight", "Healthy"])
  );
}
