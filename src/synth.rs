// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/synth.rs - 推理结果整理与双模型对比
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

use std::time::Duration;

use serde::{Serialize, Serializer, ser::SerializeMap};
use tracing::debug;

use crate::{error::InferenceError, model::ModelHandle, runner::elapsed_ms};

/// 百分比，保留两位小数
fn percent(probability: f32) -> f64 {
  (probability as f64 * 10_000.0).round() / 100.0
}

/// 首个最大值的下标，并列时取模型类别顺序中靠前的一个
pub fn argmax(values: &[f32]) -> Option<usize> {
  let mut best: Option<(usize, f32)> = None;
  for (index, &value) in values.iter().enumerate() {
    match best {
      Some((_, max)) if value <= max => {}
      _ => best = Some((index, value)),
    }
  }
  best.map(|(index, _)| index)
}

/// 按类别名称索引的概率（百分比），保持模型自身的类别顺序
///
/// 两个模型的类别顺序可能不同，跨模型比较必须按名称查找。
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ClassProbabilities(Vec<(String, f64)>);

impl ClassProbabilities {
  pub fn get(&self, label: &str) -> Option<f64> {
    self
      .0
      .iter()
      .find(|(name, _)| name == label)
      .map(|(_, pct)| *pct)
  }

  pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
    self.0.iter().map(|(name, pct)| (name.as_str(), *pct))
  }

  pub fn len(&self) -> usize {
    self.0.len()
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn total(&self) -> f64 {
    self.0.iter().map(|(_, pct)| pct).sum()
  }
}

impl Serialize for ClassProbabilities {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.0.len()))?;
    for (name, pct) in &self.0 {
      map.serialize_entry(name, pct)?;
    }
    map.end()
  }
}

/// 单个模型的推理结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceResult {
  pub prediction: String,
  pub confidence: f64,
  pub inference_time_ms: f64,
  pub class_probabilities: ClassProbabilities,
}

/// 两个模型的对比结果，两个结果总是同时存在
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonResponse {
  pub custom_cnn: InferenceResult,
  pub mobilenet: InferenceResult,
  pub agreement: bool,
}

impl ComparisonResponse {
  /// 按类别名称合并两个模型的概率，顺序以自定义 CNN 为准，
  /// 仅出现在 MobileNet 中的类别追加在末尾
  pub fn joined_probabilities(&self) -> Vec<(String, Option<f64>, Option<f64>)> {
    let mut rows: Vec<(String, Option<f64>, Option<f64>)> = self
      .custom_cnn
      .class_probabilities
      .iter()
      .map(|(label, pct)| {
        (
          label.to_string(),
          Some(pct),
          self.mobilenet.class_probabilities.get(label),
        )
      })
      .collect();

    for (label, pct) in self.mobilenet.class_probabilities.iter() {
      if self.custom_cnn.class_probabilities.get(label).is_none() {
        rows.push((label.to_string(), None, Some(pct)));
      }
    }
    rows
  }
}

/// 由概率向量与模型类别列表生成推理结果
pub fn synthesize(
  handle: &ModelHandle,
  probabilities: &[f32],
  elapsed: Duration,
) -> Result<InferenceResult, InferenceError> {
  let labels = handle.labels();
  if probabilities.len() != labels.len() {
    return Err(InferenceError::OutputLength {
      expected: labels.len(),
      actual: probabilities.len(),
    });
  }

  let best = argmax(probabilities).ok_or(InferenceError::OutputLength {
    expected: labels.len(),
    actual: 0,
  })?;
  let prediction = labels.get(best).unwrap_or_default().to_string();

  let class_probabilities = ClassProbabilities(
    labels
      .iter()
      .zip(probabilities)
      .map(|(label, &p)| (label.to_string(), percent(p)))
      .collect(),
  );

  let result = InferenceResult {
    prediction,
    confidence: percent(probabilities[best]),
    inference_time_ms: elapsed_ms(elapsed),
    class_probabilities,
  };
  debug!(
    "{} 模型预测: {} ({:.2}%)",
    handle.role(),
    result.prediction,
    result.confidence
  );
  Ok(result)
}

/// 两个模型的预测类别名称相同即视为一致，与置信度无关
pub fn compare(custom_cnn: InferenceResult, mobilenet: InferenceResult) -> ComparisonResponse {
  let agreement = custom_cnn.prediction == mobilenet.prediction;
  ComparisonResponse {
    custom_cnn,
    mobilenet,
    agreement,
  }
}
