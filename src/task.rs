// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/task.rs - 命令行对比任务
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

use serde::Serialize;
use tracing::{info, warn};

use crate::{
  error::ServiceError,
  input::ImageInput,
  service::ComparisonService,
  synth::ComparisonResponse,
};

pub trait Task<I>: Sized {
  type Output;
  type Error;
  fn run_task(self, input: I, service: &ComparisonService) -> Result<Self::Output, Self::Error>;
}

pub struct OneShotTask;

impl Task<&ImageInput> for OneShotTask {
  type Output = ComparisonResponse;
  type Error = ServiceError;

  fn run_task(self, input: &ImageInput, service: &ComparisonService) -> Result<Self::Output, Self::Error> {
    info!("开始任务...");
    let now = std::time::Instant::now();
    let response = service.compare(input)?;
    info!("对比完成，总耗时: {:.2?}", now.elapsed());
    Ok(response)
  }
}

/// 重复对比的延迟统计，不含预热轮次
#[derive(Debug, Clone, Serialize)]
pub struct LatencyReport {
  pub runs: usize,
  pub custom_cnn_mean_ms: f64,
  pub mobilenet_mean_ms: f64,
  pub last: ComparisonResponse,
}

#[derive(Debug)]
pub struct RepeatShotTask {
  times: usize,
}

impl RepeatShotTask {
  /// 预热轮次，不计入统计
  pub const WARMUP: usize = 2;

  pub fn new(times: usize) -> Self {
    Self {
      times: times.max(Self::WARMUP + 1),
    }
  }
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self::new(100)
  }
}

impl Task<&ImageInput> for RepeatShotTask {
  type Output = LatencyReport;
  type Error = ServiceError;

  fn run_task(self, input: &ImageInput, service: &ComparisonService) -> Result<Self::Output, Self::Error> {
    info!("开始任务，共 {} 次...", self.times);
    let mut custom = Vec::with_capacity(self.times);
    let mut mobile = Vec::with_capacity(self.times);
    let mut last = None;

    for i in 0..self.times {
      let response = service.compare(input)?;
      info!(
        "({}) custom_cnn {} ms / mobilenet {} ms",
        i, response.custom_cnn.inference_time_ms, response.mobilenet.inference_time_ms
      );
      custom.push(response.custom_cnn.inference_time_ms);
      mobile.push(response.mobilenet.inference_time_ms);
      last = Some(response);
    }

    let mean = |times: &[f64]| {
      let measured = &times[Self::WARMUP..];
      measured.iter().sum::<f64>() / measured.len() as f64
    };

    let report = LatencyReport {
      runs: self.times - Self::WARMUP,
      custom_cnn_mean_ms: mean(&custom),
      mobilenet_mean_ms: mean(&mobile),
      last: last.ok_or_else(|| ServiceError::Internal("没有完成任何对比".to_string()))?,
    };

    warn!(
      "平均推理时间: custom_cnn {:.2} ms, mobilenet {:.2} ms",
      report.custom_cnn_mean_ms, report.mobilenet_mean_ms
    );
    Ok(report)
  }
}
