// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/error.rs - 错误定义
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

use std::{fmt, path::PathBuf};

use thiserror::Error;

use crate::{model::ModelRole, tensor::InputShape};

/// 客户端输入错误，在任何模型运行之前检测
#[derive(Error, Debug)]
pub enum InputError {
  #[error("未提供图像文件（字段 `image`）")]
  MissingFile,
  #[error("上传内容不是图像: {0}")]
  NotAnImage(String),
  #[error("上传内容超过大小限制")]
  PayloadTooLarge,
  #[error("无法解析 multipart 请求: {0}")]
  Multipart(String),
}

/// 图像解码与校验错误
#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("图像数据为空")]
  Empty,
  #[error("无法识别图像格式")]
  UnknownFormat,
  #[error("图像解码失败: {0}")]
  Decode(#[from] image::ImageError),
  #[error("图像尺寸 {width}x{height} 过小，最小边长为 {min}")]
  TooSmall { width: u32, height: u32, min: u32 },
  #[error("图像尺寸 {width}x{height} 过大，最大边长为 {max}")]
  TooLarge { width: u32, height: u32, max: u32 },
}

/// 前向推理错误，属于服务端故障
#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("推理后端错误: {0}")]
  Backend(String),
  #[error("模型输出包含非有限值: 索引 {index}, 值 {value}")]
  NonFinite { index: usize, value: f32 },
  #[error("模型输出不是概率分布: 索引 {index}, 值 {value}")]
  NotProbability { index: usize, value: f32 },
  #[error("模型输出之和为 {sum}，不是概率分布")]
  NotDistribution { sum: f32 },
  #[error("模型输出长度 {actual} 与类别数 {expected} 不一致")]
  OutputLength { expected: usize, actual: usize },
  #[error("输入张量形状 {actual} 与模型输入 {expected} 不一致")]
  InputShape {
    expected: InputShape,
    actual: InputShape,
  },
}

/// 启动错误，服务无法开始接受请求
#[derive(Error, Debug)]
pub enum StartupError {
  #[error("模型文件不存在: {}", .0.display())]
  ArtifactMissing(PathBuf),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("模型无效: {0}")]
  InvalidModel(String),
  #[error("模型输入形状不匹配: 期望 {expected}, 实际 {actual:?}")]
  InputShapeMismatch { expected: InputShape, actual: Vec<i64> },
  #[error("类别标签错误: {0}")]
  Labels(String),
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch {
    expected: &'static str,
    actual: String,
  },
  #[error("未知的参数值 {key}={value}")]
  UnknownOption { key: String, value: String },
  #[error("推理运行时错误: {0}")]
  Runtime(String),
  #[error("{role} 模型加载失败: {source}")]
  Load {
    role: ModelRole,
    #[source]
    source: Box<StartupError>,
  },
}

impl StartupError {
  pub fn for_role(self, role: ModelRole) -> Self {
    StartupError::Load {
      role,
      source: Box::new(self),
    }
  }
}

/// 请求处理阶段，用于日志与错误上下文
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
  Validate,
  Decode,
  Preprocess,
  Inference,
  Synthesize,
}

impl fmt::Display for Stage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Stage::Validate => "validate",
      Stage::Decode => "decode",
      Stage::Preprocess => "preprocess",
      Stage::Inference => "inference",
      Stage::Synthesize => "synthesize",
    };
    f.write_str(name)
  }
}

/// 一次对比请求的错误
///
/// 任一模型失败都会中止整个对比，不会返回单个模型的部分结果。
#[derive(Error, Debug)]
pub enum ServiceError {
  #[error(transparent)]
  Input(#[from] InputError),
  #[error(transparent)]
  Preprocess(#[from] PreprocessError),
  #[error("{role} 模型在 {stage} 阶段失败: {source}")]
  Inference {
    role: ModelRole,
    stage: Stage,
    #[source]
    source: InferenceError,
  },
  #[error("内部错误: {0}")]
  Internal(String),
}

impl ServiceError {
  /// 稳定的错误代码，供调用方区分错误类别
  pub fn code(&self) -> &'static str {
    match self {
      ServiceError::Input(InputError::MissingFile) => "missing_file",
      ServiceError::Input(InputError::NotAnImage(_)) => "not_an_image",
      ServiceError::Input(InputError::PayloadTooLarge) => "payload_too_large",
      ServiceError::Input(InputError::Multipart(_)) => "bad_multipart",
      ServiceError::Preprocess(PreprocessError::TooSmall { .. }) => "image_too_small",
      ServiceError::Preprocess(PreprocessError::TooLarge { .. }) => "image_too_large",
      ServiceError::Preprocess(_) => "invalid_image",
      ServiceError::Inference { .. } => "inference_failed",
      ServiceError::Internal(_) => "internal_error",
    }
  }

  /// 对外展示的错误信息，服务端错误不暴露内部细节
  pub fn public_message(&self) -> String {
    match self {
      ServiceError::Input(_) | ServiceError::Preprocess(_) => self.to_string(),
      ServiceError::Inference { role, .. } => format!("{} 模型推理失败", role),
      ServiceError::Internal(_) => "服务内部错误".to_string(),
    }
  }

  pub fn is_client_error(&self) -> bool {
    matches!(self, ServiceError::Input(_) | ServiceError::Preprocess(_))
  }
}
