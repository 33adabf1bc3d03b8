// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/bin/compare_repeatshot.rs - 重复对比以测量推理耗时
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use tracing::info;
use yejian::{
  FromUrl,
  config::ModelsConfig,
  input::ImageInput,
  model::load_models,
  service::ComparisonService,
  task::{RepeatShotTask, Task},
};

/// 对同一张图像重复运行两个模型，统计平均推理耗时
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(flatten)]
  pub models: ModelsConfig,
  /// 输入图像，格式: image:///path/to/leaf.jpg
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 重复次数，含两次预热
  #[arg(long, default_value_t = 100)]
  pub times: usize,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("自定义 CNN 模型: {}", args.models.custom_cnn);
  info!("MobileNet 模型: {}", args.models.mobilenet);
  info!("输入来源: {}", args.input);

  let input = ImageInput::from_url(&args.input)?;
  let registry = load_models(&args.models)?;
  let service = ComparisonService::new(Arc::new(registry), args.models.limits(), args.models.mode());

  let report = RepeatShotTask::new(args.times).run_task(&input, &service)?;
  println!("{}", serde_json::to_string_pretty(&report)?);

  Ok(())
}
