// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/input.rs - 图像输入
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

use image::ImageFormat;
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, error::InputError};

/// 上传的原始图像，每个请求一份，预处理后即丢弃
#[derive(Debug, Clone)]
pub struct ImageInput {
  bytes: Vec<u8>,
  content_type: Option<String>,
}

impl ImageInput {
  pub fn new(bytes: Vec<u8>, content_type: Option<String>) -> Self {
    Self {
      bytes,
      content_type,
    }
  }

  pub fn bytes(&self) -> &[u8] {
    &self.bytes
  }

  pub fn content_type(&self) -> Option<&str> {
    self.content_type.as_deref()
  }
}

/// 检查声明的内容类型是否为图像
pub fn validate_content_type(content_type: Option<&str>) -> Result<(), InputError> {
  let declared = content_type.map(str::trim).unwrap_or_default();
  let essence = declared
    .split(';')
    .next()
    .unwrap_or_default()
    .trim()
    .to_ascii_lowercase();

  match essence.split_once('/') {
    Some(("image", subtype)) if !subtype.is_empty() => Ok(()),
    _ if declared.is_empty() => Err(InputError::NotAnImage("未声明内容类型".to_string())),
    _ => Err(InputError::NotAnImage(declared.to_string())),
  }
}

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("无法解析为本地路径: {0}")]
  InvalidPath(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

impl FromUrlWithScheme for ImageInput {
  const SCHEME: &'static str = "image";
}

/// 从 `image:///path/to/leaf.jpg` 读取本地图像，内容类型由扩展名推断
impl FromUrl for ImageInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch(url.scheme().to_string()));
    }

    // 借助 file 方案还原路径中的百分号编码
    let path = Url::parse(&format!("file://{}", url.path()))
      .ok()
      .and_then(|file| file.to_file_path().ok())
      .ok_or_else(|| ImageFileInputError::InvalidPath(url.to_string()))?;
    let bytes = std::fs::read(&path)?;
    let content_type = ImageFormat::from_path(&path)
      .ok()
      .map(|format| format.to_mime_type().to_string());
    debug!(
      "读取图像文件: {} ({} 字节, {:?})",
      path.display(),
      bytes.len(),
      content_type
    );

    Ok(ImageInput::new(bytes, content_type))
  }
}
