// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/service.rs - 双模型对比推理
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

use std::sync::Arc;

use image::RgbImage;
use tracing::{debug, error, info, warn};

use crate::{
  error::{ServiceError, Stage},
  input::{ImageInput, validate_content_type},
  model::{ModelHandle, ModelRegistry},
  preprocess::{ImageLimits, decode_image},
  runner,
  synth::{self, ComparisonResponse, InferenceResult},
};

/// 两个模型的执行方式，两者之间没有共享的可变状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecutionMode {
  #[default]
  Sequential,
  Parallel,
}

pub struct ComparisonService {
  registry: Arc<ModelRegistry>,
  limits: ImageLimits,
  mode: ExecutionMode,
}

impl ComparisonService {
  pub fn new(registry: Arc<ModelRegistry>, limits: ImageLimits, mode: ExecutionMode) -> Self {
    Self {
      registry,
      limits,
      mode,
    }
  }

  pub fn registry(&self) -> &ModelRegistry {
    &self.registry
  }

  pub fn limits(&self) -> ImageLimits {
    self.limits
  }

  /// 对一张图像运行两个模型并生成对比结果
  ///
  /// 输入校验与解码在任何模型运行之前完成；任一模型失败则整个对比失败。
  pub fn compare(&self, input: &ImageInput) -> Result<ComparisonResponse, ServiceError> {
    validate_content_type(input.content_type()).inspect_err(|e| {
      warn!("[{}] 拒绝上传内容: {}", Stage::Validate, e);
    })?;

    let image = decode_image(input.bytes(), &self.limits).inspect_err(|e| {
      warn!("[{}] 图像无法使用: {}", Stage::Decode, e);
    })?;

    let (custom_cnn, mobilenet) = match self.mode {
      ExecutionMode::Sequential => (
        self.evaluate(self.registry.custom_cnn(), &image),
        self.evaluate(self.registry.mobilenet(), &image),
      ),
      ExecutionMode::Parallel => std::thread::scope(|scope| {
        let mobilenet = scope.spawn(|| self.evaluate(self.registry.mobilenet(), &image));
        let custom_cnn = self.evaluate(self.registry.custom_cnn(), &image);
        let mobilenet = mobilenet.join().unwrap_or_else(|_| {
          Err(ServiceError::Internal(
            "MobileNet 推理线程异常退出".to_string(),
          ))
        });
        (custom_cnn, mobilenet)
      }),
    };

    let response = synth::compare(custom_cnn?, mobilenet?);
    info!(
      "对比完成: custom_cnn={} ({:.2}%, {} ms), mobilenet={} ({:.2}%, {} ms), 一致: {}",
      response.custom_cnn.prediction,
      response.custom_cnn.confidence,
      response.custom_cnn.inference_time_ms,
      response.mobilenet.prediction,
      response.mobilenet.confidence,
      response.mobilenet.inference_time_ms,
      response.agreement
    );
    Ok(response)
  }

  fn evaluate(&self, handle: &ModelHandle, image: &RgbImage) -> Result<InferenceResult, ServiceError> {
    let role = handle.role();
    let policy = handle.policy();
    let tensor = policy.apply(image);
    debug!(
      "[{}] {} 模型输入: {} ({}, {})",
      Stage::Preprocess,
      role,
      tensor.shape(),
      tensor.layout(),
      policy
    );

    let raw = runner::run(handle, tensor).map_err(|source| {
      error!("[{}] {} 模型推理失败: {}", Stage::Inference, role, source);
      ServiceError::Inference {
        role,
        stage: Stage::Inference,
        source,
      }
    })?;

    synth::synthesize(handle, &raw.probabilities, raw.elapsed).map_err(|source| {
      error!("[{}] {} 模型输出无法整理: {}", Stage::Synthesize, role, source);
      ServiceError::Inference {
        role,
        stage: Stage::Synthesize,
        source,
      }
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    error::{InferenceError, InputError, PreprocessError},
    model::{
      ClassLabels, Model, ModelRole, POTATO_LABELS,
      tests::{FixedModel, handle},
    },
    preprocess::tests::{leaf_pattern, png_bytes},
    tensor::Tensor,
  };
  use approx::assert_relative_eq;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct Counted {
    registry: Arc<ModelRegistry>,
    custom_calls: Arc<AtomicUsize>,
    mobile_calls: Arc<AtomicUsize>,
  }

  fn counted(custom: Vec<f32>, mobile: Vec<f32>) -> Counted {
    let a = FixedModel::new(custom);
    let b = FixedModel::new(mobile);
    let (custom_calls, mobile_calls) = (a.calls.clone(), b.calls.clone());
    let registry = ModelRegistry::new(
      ModelHandle::new(
        ModelRole::CustomCnn,
        ClassLabels::potato(),
        ModelRole::CustomCnn.default_policy(),
        a,
      ),
      ModelHandle::new(
        ModelRole::MobileNet,
        ClassLabels::potato(),
        ModelRole::MobileNet.default_policy(),
        b,
      ),
    )
    .unwrap();
    Counted {
      registry: Arc::new(registry),
      custom_calls,
      mobile_calls,
    }
  }

  fn png_input() -> ImageInput {
    ImageInput::new(
      png_bytes(&leaf_pattern(256, 256)),
      Some("image/png".to_string()),
    )
  }

  #[test]
  fn both_models_agree_on_late_blight() {
    let c = counted(vec![0.05, 0.923, 0.027], vec![0.08, 0.887, 0.033]);
    for mode in [ExecutionMode::Sequential, ExecutionMode::Parallel] {
      let service = ComparisonService::new(c.registry.clone(), ImageLimits::default(), mode);
      let response = service.compare(&png_input()).unwrap();
      assert_eq!(response.custom_cnn.prediction, "Late_Blight");
      assert_relative_eq!(response.custom_cnn.confidence, 92.3, epsilon = 1e-9);
      assert_eq!(response.mobilenet.prediction, "Late_Blight");
      assert_relative_eq!(response.mobilenet.confidence, 88.7, epsilon = 1e-9);
      assert!(response.agreement);
    }
    assert_eq!(c.custom_calls.load(Ordering::SeqCst), 2);
    assert_eq!(c.mobile_calls.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn non_image_never_reaches_models() {
    let c = counted(vec![1.0, 0.0, 0.0], vec![1.0, 0.0, 0.0]);
    let service = ComparisonService::new(c.registry.clone(), ImageLimits::default(), ExecutionMode::Sequential);
    let input = ImageInput::new(b"just some notes".to_vec(), Some("text/plain".to_string()));
    assert!(matches!(
      service.compare(&input),
      Err(ServiceError::Input(InputError::NotAnImage(_)))
    ));
    assert_eq!(c.custom_calls.load(Ordering::SeqCst), 0);
    assert_eq!(c.mobile_calls.load(Ordering::SeqCst), 0);
  }

  #[test]
  fn zero_byte_image_is_a_preprocess_error() {
    let c = counted(vec![1.0, 0.0, 0.0], vec![1.0, 0.0, 0.0]);
    let service = ComparisonService::new(c.registry.clone(), ImageLimits::default(), ExecutionMode::Sequential);
    let input = ImageInput::new(Vec::new(), Some("image/jpeg".to_string()));
    let err = service.compare(&input).unwrap_err();
    assert!(matches!(err, ServiceError::Preprocess(PreprocessError::Empty)));
    assert!(err.is_client_error());

    let input = ImageInput::new(b"\xff\xd8\xff\xe0garbage".to_vec(), Some("image/jpeg".to_string()));
    assert!(matches!(
      service.compare(&input),
      Err(ServiceError::Preprocess(_))
    ));
    assert_eq!(c.custom_calls.load(Ordering::SeqCst), 0);
    assert_eq!(c.mobile_calls.load(Ordering::SeqCst), 0);
  }

  struct Broken;

  impl Model for Broken {
    fn forward(&self, _input: &Tensor) -> Result<Vec<f32>, InferenceError> {
      Err(InferenceError::Backend("boom".to_string()))
    }

    fn describe(&self) -> String {
      "broken".to_string()
    }
  }

  #[test]
  fn one_failure_aborts_whole_comparison() {
    for mode in [ExecutionMode::Sequential, ExecutionMode::Parallel] {
      let registry = ModelRegistry::new(
        handle(ModelRole::CustomCnn, &POTATO_LABELS, vec![0.2, 0.7, 0.1]),
        ModelHandle::new(
          ModelRole::MobileNet,
          ClassLabels::potato(),
          ModelRole::MobileNet.default_policy(),
          Broken,
        ),
      )
      .unwrap();
      let service = ComparisonService::new(Arc::new(registry), ImageLimits::default(), mode);
      match service.compare(&png_input()) {
        Err(ServiceError::Inference { role, stage, .. }) => {
          assert_eq!(role, ModelRole::MobileNet);
          assert_eq!(stage, Stage::Inference);
        }
        other => panic!("unexpected: {:?}", other),
      }
    }
  }

  #[test]
  fn label_count_mismatch_is_a_synthesis_failure() {
    let registry = ModelRegistry::new(
      handle(ModelRole::CustomCnn, &POTATO_LABELS, vec![0.5, 0.5]),
      handle(ModelRole::MobileNet, &POTATO_LABELS, vec![0.2, 0.7, 0.1]),
    )
    .unwrap();
    let service = ComparisonService::new(Arc::new(registry), ImageLimits::default(), ExecutionMode::Sequential);
    assert!(matches!(
      service.compare(&png_input()),
      Err(ServiceError::Inference {
        role: ModelRole::CustomCnn,
        stage: Stage::Synthesize,
        ..
      })
    ));
  }

  #[test]
  fn repeated_runs_are_identical() {
    let c = counted(vec![0.3, 0.3, 0.4], vec![0.6, 0.1, 0.3]);
    let service = ComparisonService::new(c.registry.clone(), ImageLimits::default(), ExecutionMode::Sequential);
    let a = service.compare(&png_input()).unwrap();
    let b = service.compare(&png_input()).unwrap();
    assert_eq!(a.custom_cnn.class_probabilities, b.custom_cnn.class_probabilities);
    assert_eq!(a.mobilenet.class_probabilities, b.mobilenet.class_probabilities);
    assert!(!a.agreement);
  }
}
