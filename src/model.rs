// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/model.rs - 模型
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
  collections::HashSet,
  fmt,
  path::Path,
  sync::Arc,
  time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};

use crate::{
  error::{InferenceError, StartupError},
  preprocess::PreprocessPolicy,
  tensor::{InputShape, Tensor, TensorLayout},
};

/// 马铃薯叶片病害类别，按训练时的顺序排列
pub const POTATO_LABELS: [&str; 3] = ["Early_Blight", "Late_Blight", "Healthy"];

/// 推理后端
///
/// 实现只需完成一次前向推理并返回按类别顺序排列的概率向量，
/// 计时、数值校验与结果整理由调用方负责。
pub trait Model: Send + Sync {
  fn forward(&self, input: &Tensor) -> Result<Vec<f32>, InferenceError>;

  /// 前向推理并返回推理本身的耗时
  ///
  /// 默认对整个 `forward` 计时；需要准备输入或等待共享资源的后端应覆盖此方法，
  /// 只对推理调用计时。
  fn forward_timed(&self, input: &Tensor) -> Result<(Vec<f32>, Duration), InferenceError> {
    let now = Instant::now();
    let output = self.forward(input)?;
    Ok((output, now.elapsed()))
  }

  /// 模型期望的输入内存布局
  fn layout(&self) -> TensorLayout {
    TensorLayout::Nhwc
  }

  /// 模型来源描述，用于日志与模型信息接口
  fn describe(&self) -> String;
}

/// 对比中的两个模型角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelRole {
  CustomCnn,
  MobileNet,
}

impl ModelRole {
  pub fn default_policy(&self) -> PreprocessPolicy {
    match self {
      ModelRole::CustomCnn => PreprocessPolicy::Custom,
      ModelRole::MobileNet => PreprocessPolicy::MobileNet,
    }
  }

  pub fn display_name(&self) -> &'static str {
    match self {
      ModelRole::CustomCnn => "Custom CNN",
      ModelRole::MobileNet => "MobileNetV2",
    }
  }
}

impl fmt::Display for ModelRole {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ModelRole::CustomCnn => f.write_str("custom_cnn"),
      ModelRole::MobileNet => f.write_str("mobilenet"),
    }
  }
}

/// 有序的类别标签列表，下标与模型输出一一对应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabels(Arc<[String]>);

#[derive(Deserialize)]
struct LabelFile {
  labels: Vec<String>,
}

impl ClassLabels {
  pub fn from_list<S: Into<String>>(labels: impl IntoIterator<Item = S>) -> Result<Self, StartupError> {
    let labels: Vec<String> = labels.into_iter().map(Into::into).collect();
    if labels.is_empty() {
      return Err(StartupError::Labels("类别列表为空".to_string()));
    }

    let mut seen = HashSet::new();
    for label in &labels {
      if label.trim().is_empty() {
        return Err(StartupError::Labels("类别名称不能为空".to_string()));
      }
      if !seen.insert(label.as_str()) {
        return Err(StartupError::Labels(format!("类别名称重复: {}", label)));
      }
    }

    Ok(Self(labels.into()))
  }

  /// 逗号分隔的类别列表
  pub fn parse_csv(text: &str) -> Result<Self, StartupError> {
    Self::from_list(text.split(',').map(str::trim))
  }

  /// 从 TOML 文件读取，格式为 `labels = ["...", ...]`
  pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, StartupError> {
    let text = std::fs::read_to_string(path.as_ref())?;
    let file: LabelFile = toml::from_str(&text)
      .map_err(|e| StartupError::Labels(format!("{}: {}", path.as_ref().display(), e)))?;
    Self::from_list(file.labels)
  }

  pub fn potato() -> Self {
    Self(POTATO_LABELS.iter().map(|s| s.to_string()).collect())
  }

  pub fn get(&self, index: usize) -> Option<&str> {
    self.0.get(index).map(String::as_str)
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.0.iter().map(String::as_str)
  }
}

struct HandleInner {
  role: ModelRole,
  labels: ClassLabels,
  policy: PreprocessPolicy,
  backend: Box<dyn Model>,
}

/// 已加载模型的只读句柄，可在请求之间共享
#[derive(Clone)]
pub struct ModelHandle {
  inner: Arc<HandleInner>,
}

impl ModelHandle {
  pub fn new<M: Model + 'static>(
    role: ModelRole,
    labels: ClassLabels,
    policy: PreprocessPolicy,
    backend: M,
  ) -> Self {
    Self {
      inner: Arc::new(HandleInner {
        role,
        labels,
        policy,
        backend: Box::new(backend),
      }),
    }
  }

  pub fn role(&self) -> ModelRole {
    self.inner.role
  }

  pub fn labels(&self) -> &ClassLabels {
    &self.inner.labels
  }

  pub fn policy(&self) -> PreprocessPolicy {
    self.inner.policy
  }

  pub fn input_shape(&self) -> InputShape {
    self.inner.policy.input_shape()
  }

  pub fn layout(&self) -> TensorLayout {
    self.inner.backend.layout()
  }

  pub fn source(&self) -> String {
    self.inner.backend.describe()
  }

  pub(crate) fn backend(&self) -> &dyn Model {
    self.inner.backend.as_ref()
  }
}

impl fmt::Debug for ModelHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ModelHandle")
      .field("role", &self.inner.role)
      .field("policy", &self.inner.policy)
      .field("labels", &self.inner.labels)
      .field("source", &self.inner.backend.describe())
      .finish()
  }
}

/// 进程级模型注册表，启动时构造一次，之后只读
#[derive(Debug, Clone)]
pub struct ModelRegistry {
  custom_cnn: ModelHandle,
  mobilenet: ModelHandle,
}

impl ModelRegistry {
  pub fn new(custom_cnn: ModelHandle, mobilenet: ModelHandle) -> Result<Self, StartupError> {
    for (handle, role) in [
      (&custom_cnn, ModelRole::CustomCnn),
      (&mobilenet, ModelRole::MobileNet),
    ] {
      if handle.role() != role {
        return Err(StartupError::InvalidModel(format!(
          "期望 {} 模型，实际为 {}",
          role,
          handle.role()
        )));
      }
    }
    Ok(Self {
      custom_cnn,
      mobilenet,
    })
  }

  pub fn custom_cnn(&self) -> &ModelHandle {
    &self.custom_cnn
  }

  pub fn mobilenet(&self) -> &ModelHandle {
    &self.mobilenet
  }

  pub fn handles(&self) -> [&ModelHandle; 2] {
    [&self.custom_cnn, &self.mobilenet]
  }
}

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxModel, OnnxModelBuilder};

/// 加载两个模型，在进程生命周期内只调用一次
#[cfg(feature = "onnx")]
pub fn load_models(config: &crate::config::ModelsConfig) -> Result<ModelRegistry, StartupError> {
  use crate::FromUrl;

  onnx::init_runtime()?;

  let load = |url: &url::Url, role: ModelRole| -> Result<ModelHandle, StartupError> {
    OnnxModelBuilder::from_url(url)
      .and_then(|builder| builder.threads(config.onnx_threads).build(role))
      .map_err(|e| e.for_role(role))
  };

  let custom_cnn = load(&config.custom_cnn, ModelRole::CustomCnn)?;
  let mobilenet = load(&config.mobilenet, ModelRole::MobileNet)?;
  ModelRegistry::new(custom_cnn, mobilenet)
}

#[cfg(test)]
pub(crate) mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  /// 返回固定概率向量的模型，记录调用次数
  pub(crate) struct FixedModel {
    pub(crate) output: Vec<f32>,
    pub(crate) calls: Arc<AtomicUsize>,
  }

  impl FixedModel {
    pub(crate) fn new(output: Vec<f32>) -> Self {
      Self {
        output,
        calls: Arc::new(AtomicUsize::new(0)),
      }
    }
  }

  impl Model for FixedModel {
    fn forward(&self, _input: &Tensor) -> Result<Vec<f32>, InferenceError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(self.output.clone())
    }

    fn describe(&self) -> String {
      "fixed".to_string()
    }
  }

  pub(crate) fn handle(role: ModelRole, labels: &[&str], output: Vec<f32>) -> ModelHandle {
    ModelHandle::new(
      role,
      ClassLabels::from_list(labels.iter().copied()).unwrap(),
      role.default_policy(),
      FixedModel::new(output),
    )
  }

  #[test]
  fn labels_reject_duplicates_and_blanks() {
    assert!(ClassLabels::from_list(["a", "b", "a"]).is_err());
    assert!(ClassLabels::from_list(["a", " "]).is_err());
    assert!(ClassLabels::from_list(Vec::<String>::new()).is_err());
  }

  #[test]
  fn labels_from_csv_keep_order() {
    let labels = ClassLabels::parse_csv("Healthy, Early_Blight ,Late_Blight").unwrap();
    let collected: Vec<_> = labels.iter().collect();
    assert_eq!(collected, ["Healthy", "Early_Blight", "Late_Blight"]);
    assert_eq!(labels.get(1), Some("Early_Blight"));
    assert_eq!(labels.get(3), None);
  }

  #[test]
  fn labels_from_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("labels.toml");
    std::fs::write(&path, "labels = [\"Late_Blight\", \"Healthy\"]\n").unwrap();
    let labels = ClassLabels::from_toml_file(&path).unwrap();
    assert_eq!(labels.len(), 2);
    assert_eq!(labels.get(0), Some("Late_Blight"));

    std::fs::write(&path, "names = []\n").unwrap();
    assert!(matches!(
      ClassLabels::from_toml_file(&path),
      Err(StartupError::Labels(_))
    ));
  }

  #[test]
  fn registry_checks_roles() {
    let a = handle(ModelRole::CustomCnn, &POTATO_LABELS, vec![1.0, 0.0, 0.0]);
    let b = handle(ModelRole::MobileNet, &POTATO_LABELS, vec![1.0, 0.0, 0.0]);
    assert!(ModelRegistry::new(b.clone(), a.clone()).is_err());
    let registry = ModelRegistry::new(a, b).unwrap();
    assert_eq!(registry.custom_cnn().input_shape(), InputShape::rgb(256, 256));
    assert_eq!(registry.mobilenet().input_shape(), InputShape::rgb(224, 224));
  }

  #[test]
  fn role_names() {
    assert_eq!(ModelRole::CustomCnn.to_string(), "custom_cnn");
    assert_eq!(ModelRole::MobileNet.to_string(), "mobilenet");
    assert_eq!(ModelRole::MobileNet.default_policy(), PreprocessPolicy::MobileNet);
  }
}
