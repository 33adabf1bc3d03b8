// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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
  path::PathBuf,
  sync::{Mutex, MutexGuard},
  time::{Duration, Instant},
};

use ort::{
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor as OrtTensor,
};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  error::{InferenceError, StartupError},
  model::{ClassLabels, Model, ModelHandle, ModelRole},
  preprocess::PreprocessPolicy,
  tensor::{InputShape, Tensor, TensorLayout},
};

fn runtime_error<E: std::fmt::Display>(err: E) -> StartupError {
  StartupError::Runtime(err.to_string())
}

fn backend_error<E: std::fmt::Display>(err: E) -> InferenceError {
  InferenceError::Backend(err.to_string())
}

pub(crate) fn init_runtime() -> Result<(), StartupError> {
  ort::init().with_name("yejian").commit().map_err(runtime_error)?;
  info!("ONNX Runtime 初始化完成");
  Ok(())
}

pub struct OnnxModel {
  session: Mutex<Session>,
  input_name: String,
  output_name: String,
  layout: TensorLayout,
  path: PathBuf,
}

/// 取得会话锁；持锁线程崩溃后会话本身仍可用，直接恢复
fn lock_recovering<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(|poisoned| {
    warn!("推理会话锁曾被异常释放，继续使用");
    let guard = poisoned.into_inner();
    mutex.clear_poison();
    guard
  })
}

impl Model for OnnxModel {
  fn forward(&self, input: &Tensor) -> Result<Vec<f32>, InferenceError> {
    self.forward_timed(input).map(|(output, _)| output)
  }

  /// 只对 `session.run` 计时，输入拷贝与等待会话锁不计入
  fn forward_timed(&self, input: &Tensor) -> Result<(Vec<f32>, Duration), InferenceError> {
    let dims = input.shape().batched_dims(self.layout).to_vec();
    let value =
      OrtTensor::from_array((dims, input.as_slice().to_vec())).map_err(backend_error)?;

    let mut session = lock_recovering(&self.session);

    debug!("执行模型推理: {}", self.path.display());
    let now = Instant::now();
    let outputs = session
      .run(ort::inputs![self.input_name.as_str() => value])
      .map_err(backend_error)?;
    let elapsed = now.elapsed();

    let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
      InferenceError::Backend(format!("模型输出 '{}' 不存在", self.output_name))
    })?;
    let (_, data) = output.try_extract_tensor::<f32>().map_err(backend_error)?;
    Ok((data.to_vec(), elapsed))
  }

  fn layout(&self) -> TensorLayout {
    self.layout
  }

  fn describe(&self) -> String {
    format!("onnx://{}", self.path.display())
  }
}

/// 由 URL 构造的 ONNX 模型加载器
///
/// 格式: `onnx:///path/model.onnx?labels=A,B,C&policy=mobilenet&layout=nhwc`，
/// 也可用 `labels_file=/path/labels.toml` 指定类别文件。
pub struct OnnxModelBuilder {
  model_path: PathBuf,
  labels: Option<ClassLabels>,
  policy: Option<PreprocessPolicy>,
  layout: Option<TensorLayout>,
  threads: usize,
}

impl FromUrlWithScheme for OnnxModelBuilder {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxModelBuilder {
  type Error = StartupError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(StartupError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    let mut builder = OnnxModelBuilder {
      model_path: PathBuf::from(url.path()),
      labels: None,
      policy: None,
      layout: None,
      threads: 1,
    };

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "labels" => builder.labels = Some(ClassLabels::parse_csv(&value)?),
        "labels_file" => builder.labels = Some(ClassLabels::from_toml_file(&*value)?),
        "policy" => {
          builder.policy = Some(value.parse().map_err(|v| StartupError::UnknownOption {
            key: "policy".to_string(),
            value: v,
          })?)
        }
        "layout" => {
          builder.layout = Some(value.parse().map_err(|v| StartupError::UnknownOption {
            key: "layout".to_string(),
            value: v,
          })?)
        }
        other => warn!("忽略未知的模型参数: {}={}", other, value),
      }
    }

    Ok(builder)
  }
}

/// 在声明的输入形状下识别模型的输入布局，负数维度视为动态维度
fn match_layout(dims: &[i64], expected: InputShape, hint: Option<TensorLayout>) -> Option<TensorLayout> {
  if dims.len() != 4 {
    return None;
  }

  let fits = |layout: TensorLayout| {
    expected
      .batched_dims(layout)
      .iter()
      .zip(dims)
      .skip(1)
      .all(|(want, got)| *got < 0 || got == want)
  };

  match hint {
    Some(layout) => fits(layout).then_some(layout),
    None if fits(TensorLayout::Nhwc) => Some(TensorLayout::Nhwc),
    None if fits(TensorLayout::Nchw) => Some(TensorLayout::Nchw),
    None => None,
  }
}

impl OnnxModelBuilder {
  pub fn threads(mut self, threads: usize) -> Self {
    self.threads = threads.max(1);
    self
  }

  pub fn build(self, role: ModelRole) -> Result<ModelHandle, StartupError> {
    if !self.model_path.is_file() {
      error!("模型文件不存在: {}", self.model_path.display());
      return Err(StartupError::ArtifactMissing(self.model_path));
    }

    let policy = self.policy.unwrap_or_else(|| role.default_policy());
    let labels = self.labels.unwrap_or_else(ClassLabels::potato);
    let expected = policy.input_shape();

    info!("加载模型文件: {} ({})", self.model_path.display(), role);
    let size = std::fs::metadata(&self.model_path)?.len();
    debug!("模型文件大小: {:.2} MB", size as f64 / (1024.0 * 1024.0));

    let session = Session::builder()
      .map_err(runtime_error)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(runtime_error)?
      .with_intra_threads(self.threads)
      .map_err(runtime_error)?
      .commit_from_file(&self.model_path)
      .map_err(|e| StartupError::InvalidModel(e.to_string()))?;

    if session.inputs.len() != 1 {
      return Err(StartupError::InvalidModel(format!(
        "预期模型输入数量为 1, 实际为 {}",
        session.inputs.len()
      )));
    }
    let input = &session.inputs[0];
    let input_dims: Vec<i64> = input
      .input_type
      .tensor_shape()
      .map(|shape| shape.iter().copied().collect())
      .ok_or_else(|| StartupError::InvalidModel(format!("模型输入 '{}' 不是张量", input.name)))?;

    let layout = match_layout(&input_dims, expected, self.layout).ok_or_else(|| {
      error!("模型输入形状 {:?} 与声明的 {} 不一致", input_dims, expected);
      StartupError::InputShapeMismatch {
        expected,
        actual: input_dims.clone(),
      }
    })?;

    let output = session
      .outputs
      .first()
      .ok_or_else(|| StartupError::InvalidModel("模型没有输出".to_string()))?;
    if let Some(&classes) = output
      .output_type
      .tensor_shape()
      .and_then(|shape| shape.last())
      && classes > 0
      && classes as usize != labels.len()
    {
      return Err(StartupError::Labels(format!(
        "模型输出 {} 个类别, 标签列表有 {} 个",
        classes,
        labels.len()
      )));
    }

    let input_name = input.name.clone();
    let output_name = output.name.clone();

    info!(
      "模型加载完成: 输入 '{}' {:?} ({}), 输出 '{}', {} 个类别, 预处理策略 {}",
      input_name,
      input_dims,
      layout,
      output_name,
      labels.len(),
      policy
    );

    let model = OnnxModel {
      session: Mutex::new(session),
      input_name,
      output_name,
      layout,
      path: self.model_path,
    };

    Ok(ModelHandle::new(role, labels, policy, model))
  }
}
