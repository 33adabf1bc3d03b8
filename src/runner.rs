// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/runner.rs - 单次前向推理与计时
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

use tracing::{debug, info};

use crate::{error::InferenceError, model::ModelHandle, tensor::Tensor};

const PROBABILITY_TOLERANCE: f32 = 1e-4;

/// 一次前向推理的原始输出
#[derive(Debug, Clone, PartialEq)]
pub struct RawOutput {
  pub probabilities: Vec<f32>,
  pub elapsed: Duration,
}

impl RawOutput {
  pub fn elapsed_ms(&self) -> f64 {
    elapsed_ms(self.elapsed)
  }
}

/// 毫秒，保留一位小数
pub fn elapsed_ms(elapsed: Duration) -> f64 {
  (elapsed.as_secs_f64() * 10_000.0).round() / 10.0
}

/// 概率向量之和与 1 的最大允许偏差
const DISTRIBUTION_TOLERANCE: f32 = 1e-3;

/// 执行一次前向推理
///
/// 计时由后端报告，只覆盖推理调用本身，布局转换与输入准备不计入。
/// 输出中出现非有限值、超出 [0, 1] 的值或总和不为 1 时直接报错，
/// 不做重试也不做替换；容差范围内的越界值截断到 [0, 1]。
pub fn run(handle: &ModelHandle, tensor: Tensor) -> Result<RawOutput, InferenceError> {
  let expected = handle.input_shape();
  if tensor.shape() != expected {
    return Err(InferenceError::InputShape {
      expected,
      actual: tensor.shape(),
    });
  }

  let tensor = tensor.to_layout(handle.layout());

  debug!("{} 模型开始推理", handle.role());
  let (probabilities, elapsed) = handle.backend().forward_timed(&tensor)?;

  for (index, &value) in probabilities.iter().enumerate() {
    if !value.is_finite() {
      return Err(InferenceError::NonFinite { index, value });
    }
    if !(-PROBABILITY_TOLERANCE..=1.0 + PROBABILITY_TOLERANCE).contains(&value) {
      return Err(InferenceError::NotProbability { index, value });
    }
  }

  let sum: f32 = probabilities.iter().sum();
  if (sum - 1.0).abs() > DISTRIBUTION_TOLERANCE {
    return Err(InferenceError::NotDistribution { sum });
  }

  // 负零也归为 0，避免序列化出 -0.0
  let probabilities = probabilities
    .into_iter()
    .map(|value| if value <= 0.0 { 0.0 } else { value.min(1.0) })
    .collect();

  info!("{} 模型推理完成，耗时: {:.2?}", handle.role(), elapsed);
  Ok(RawOutput {
    probabilities,
    elapsed,
  })
}
