// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use yejian::{
  api::{AppState, router},
  config::ServerArgs,
  model::load_models,
  service::ComparisonService,
};

#[tokio::main]
async fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("yejian=info,tower_http=info")),
    )
    .init();

  let args = ServerArgs::parse();

  info!("Yejian 叶片病害对比服务 v{}", env!("CARGO_PKG_VERSION"));
  info!("自定义 CNN 模型: {}", args.models.custom_cnn);
  info!("MobileNet 模型: {}", args.models.mobilenet);
  info!(
    "图像边长限制: {}..={} 像素, 上传上限: {} 字节, 执行方式: {:?}",
    args.models.min_side,
    args.models.max_side,
    args.max_upload_bytes,
    args.models.mode()
  );

  // 模型加载失败时直接退出，不接受任何请求
  info!("正在加载模型...");
  let registry = load_models(&args.models)?;
  for handle in registry.handles() {
    info!("{:?}", handle);
  }
  info!("模型加载完成");

  let service = ComparisonService::new(Arc::new(registry), args.models.limits(), args.models.mode());
  let app = router(AppState::new(Arc::new(service), args.max_upload_bytes));

  let addr: SocketAddr = format!("{}:{}", args.host, args.port).parse()?;
  let listener = tokio::net::TcpListener::bind(addr).await?;
  info!("服务监听于 http://{}", addr);

  axum::serve(listener, app)
    .with_graceful_shutdown(async {
      if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("无法监听退出信号: {}", e);
      }
      info!("收到退出信号，正在停止服务...");
    })
    .await?;

  info!("服务已停止");
  Ok(())
}
