// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/api.rs - HTTP 接口
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

use std::{sync::Arc, time::Instant};

use axum::{
  Json, Router,
  extract::{
    DefaultBodyLimit, Multipart, State,
    multipart::{MultipartError, MultipartRejection},
  },
  http::StatusCode,
  response::{IntoResponse, Response},
  routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::{
  cors::{Any, CorsLayer},
  trace::TraceLayer,
};
use tracing::{debug, error, warn};

use crate::{
  error::{InputError, PreprocessError, ServiceError},
  input::ImageInput,
  model::ModelHandle,
  preprocess::PreprocessPolicy,
  service::ComparisonService,
  synth::ComparisonResponse,
  tensor::TensorLayout,
};

/// 上传表单中图像字段的名称
pub const IMAGE_FIELD: &str = "image";

pub struct AppState {
  service: Arc<ComparisonService>,
  max_upload_bytes: usize,
  started_at: DateTime<Utc>,
  started: Instant,
}

pub type SharedState = Arc<AppState>;

impl AppState {
  pub fn new(service: Arc<ComparisonService>, max_upload_bytes: usize) -> Self {
    Self {
      service,
      max_upload_bytes,
      started_at: Utc::now(),
      started: Instant::now(),
    }
  }

  pub fn service(&self) -> &Arc<ComparisonService> {
    &self.service
  }

  pub fn uptime_seconds(&self) -> u64 {
    self.started.elapsed().as_secs()
  }
}

pub fn router(state: AppState) -> Router {
  let body_limit = state.max_upload_bytes;
  Router::new()
    .route("/predict", post(predict))
    .route("/health", get(health))
    .route("/models", get(models))
    .with_state(Arc::new(state))
    .layer(DefaultBodyLimit::max(body_limit))
    .layer(TraceLayer::new_for_http())
    .layer(
      CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any),
    )
}

/// 对外的错误响应，状态码由错误类别决定
#[derive(Debug)]
pub struct ApiError(pub ServiceError);

#[derive(Serialize)]
struct ErrorBody {
  error: String,
  code: &'static str,
}

impl ApiError {
  pub fn status(&self) -> StatusCode {
    match &self.0 {
      ServiceError::Input(InputError::PayloadTooLarge) => StatusCode::PAYLOAD_TOO_LARGE,
      ServiceError::Input(_) => StatusCode::BAD_REQUEST,
      ServiceError::Preprocess(_) => StatusCode::UNPROCESSABLE_ENTITY,
      ServiceError::Inference { .. } | ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }
}

impl From<ServiceError> for ApiError {
  fn from(err: ServiceError) -> Self {
    ApiError(err)
  }
}

impl From<InputError> for ApiError {
  fn from(err: InputError) -> Self {
    ApiError(err.into())
  }
}

impl From<PreprocessError> for ApiError {
  fn from(err: PreprocessError) -> Self {
    ApiError(err.into())
  }
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = self.status();
    if self.0.is_client_error() {
      warn!("请求被拒绝 ({}): {}", status, self.0);
    } else {
      error!("请求处理失败 ({}): {}", status, self.0);
    }
    let body = ErrorBody {
      error: self.0.public_message(),
      code: self.0.code(),
    };
    (status, Json(body)).into_response()
  }
}

fn multipart_error(err: MultipartError) -> InputError {
  if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
    InputError::PayloadTooLarge
  } else {
    InputError::Multipart(err.body_text())
  }
}

/// 读取表单中的图像字段，其余字段忽略
async fn read_image_field(mut multipart: Multipart) -> Result<ImageInput, InputError> {
  while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
    if field.name() != Some(IMAGE_FIELD) {
      debug!("忽略表单字段: {:?}", field.name());
      continue;
    }
    if field.file_name().is_some_and(str::is_empty) {
      return Err(InputError::MissingFile);
    }
    let content_type = field.content_type().map(str::to_string);
    let bytes = field.bytes().await.map_err(multipart_error)?;
    debug!("收到图像: {} 字节, {:?}", bytes.len(), content_type);
    return Ok(ImageInput::new(bytes.to_vec(), content_type));
  }
  Err(InputError::MissingFile)
}

/// POST /predict - 上传一张图像，返回两个模型的对比结果
pub async fn predict(
  State(state): State<SharedState>,
  multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ComparisonResponse>, ApiError> {
  let multipart = multipart.map_err(|rejection| InputError::Multipart(rejection.body_text()))?;
  let input = read_image_field(multipart).await?;

  let service = state.service.clone();
  let response = tokio::task::spawn_blocking(move || service.compare(&input))
    .await
    .map_err(|e| ServiceError::Internal(format!("推理任务异常结束: {}", e)))??;
  Ok(Json(response))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
  pub status: &'static str,
  pub message: &'static str,
  pub uptime_seconds: u64,
  pub version: &'static str,
  pub started_at: DateTime<Utc>,
  pub models_loaded: bool,
}

/// GET /health - 服务状态，模型加载失败时服务不会启动
pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
  Json(HealthResponse {
    status: "healthy",
    message: "服务运行中",
    uptime_seconds: state.uptime_seconds(),
    version: env!("CARGO_PKG_VERSION"),
    started_at: state.started_at,
    models_loaded: true,
  })
}

#[derive(Debug, Serialize)]
pub struct ModelInfo {
  pub name: &'static str,
  pub source: String,
  pub policy: PreprocessPolicy,
  pub input: String,
  pub layout: TensorLayout,
  pub labels: Vec<String>,
}

impl From<&ModelHandle> for ModelInfo {
  fn from(handle: &ModelHandle) -> Self {
    Self {
      name: handle.role().display_name(),
      source: handle.source(),
      policy: handle.policy(),
      input: handle.input_shape().to_string(),
      layout: handle.layout(),
      labels: handle.labels().iter().map(str::to_string).collect(),
    }
  }
}

#[derive(Debug, Serialize)]
pub struct ModelsResponse {
  pub custom_cnn: ModelInfo,
  pub mobilenet: ModelInfo,
}

/// GET /models - 已加载模型的输入形状与类别
pub async fn models(State(state): State<SharedState>) -> Json<ModelsResponse> {
  let registry = state.service.registry();
  Json(ModelsResponse {
    custom_cnn: registry.custom_cnn().into(),
    mobilenet: registry.mobilenet().into(),
  })
}
