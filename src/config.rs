// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/config.rs - 项目参数配置
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

use clap::{Args, Parser};
use url::Url;

use crate::{preprocess::ImageLimits, service::ExecutionMode};

/// 模型与推理相关参数，服务端与命令行工具共用
#[derive(Args, Debug, Clone)]
pub struct ModelsConfig {
  /// 自定义 CNN 模型 URL
  /// 格式: onnx:///path/potatoes.onnx[?labels=A,B,C|labels_file=FILE][&layout=nhwc|nchw]
  #[arg(long, env = "YEJIAN_CUSTOM_CNN", value_name = "MODEL")]
  pub custom_cnn: Url,

  /// MobileNetV2 模型 URL，格式同上
  #[arg(long, env = "YEJIAN_MOBILENET", value_name = "MODEL")]
  pub mobilenet: Url,

  /// 每个模型的 ONNX Runtime 线程数
  #[arg(long, env = "YEJIAN_ONNX_THREADS", default_value_t = 1, value_name = "COUNT")]
  pub onnx_threads: usize,

  /// 图像最小边长（像素）
  #[arg(long, default_value_t = 50, value_name = "PIXELS")]
  pub min_side: u32,

  /// 图像最大边长（像素）
  #[arg(long, default_value_t = 4000, value_name = "PIXELS")]
  pub max_side: u32,

  /// 两个模型并行推理
  #[arg(long, env = "YEJIAN_PARALLEL")]
  pub parallel: bool,
}

impl ModelsConfig {
  pub fn limits(&self) -> ImageLimits {
    ImageLimits {
      min_side: self.min_side,
      max_side: self.max_side,
    }
  }

  pub fn mode(&self) -> ExecutionMode {
    if self.parallel {
      ExecutionMode::Parallel
    } else {
      ExecutionMode::Sequential
    }
  }
}

/// Yejian 服务参数配置
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct ServerArgs {
  #[command(flatten)]
  pub models: ModelsConfig,

  /// 监听地址
  #[arg(long, env = "YEJIAN_HOST", default_value = "0.0.0.0")]
  pub host: String,

  /// 监听端口
  #[arg(long, env = "YEJIAN_PORT", default_value_t = 5000)]
  pub port: u16,

  /// 上传请求体大小上限（字节）
  #[arg(long, env = "YEJIAN_MAX_UPLOAD_BYTES", default_value_t = 10 * 1024 * 1024, value_name = "BYTES")]
  pub max_upload_bytes: usize,
}
