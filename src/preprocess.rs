// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/preprocess.rs - 图像解码与预处理
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

use std::{fmt, io::Cursor, str::FromStr};

use image::{
  ImageReader, Limits, RgbImage,
  imageops::{self, FilterType},
};
use serde::Serialize;
use tracing::debug;

use crate::{
  error::PreprocessError,
  tensor::{InputShape, RGB_CHANNELS, Tensor, TensorLayout},
};

const CUSTOM_CNN_INPUT: InputShape = InputShape::rgb(256, 256);
const MOBILENET_INPUT: InputShape = InputShape::rgb(224, 224);

/// 缩放插值方式，固定以保证同一输入得到逐位相同的张量
const RESIZE_FILTER: FilterType = FilterType::CatmullRom;

/// 图像尺寸限制
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageLimits {
  pub min_side: u32,
  pub max_side: u32,
}

impl Default for ImageLimits {
  fn default() -> Self {
    Self {
      min_side: 50,
      max_side: 4000,
    }
  }
}

/// 每通道线性归一化: `value / divisor - offset`
#[derive(Debug, Clone, Copy, PartialEq)]
struct Normalization {
  divisor: [f32; RGB_CHANNELS],
  offset: [f32; RGB_CHANNELS],
}

impl Normalization {
  #[inline]
  fn apply(&self, channel: usize, value: u8) -> f32 {
    value as f32 / self.divisor[channel] - self.offset[channel]
  }
}

/// 预处理策略，与模型训练时的输入约定一一对应
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PreprocessPolicy {
  /// 256x256，线性缩放到 [0, 1]
  Custom,
  /// 224x224，MobileNetV2 归一化到 [-1, 1]
  MobileNet,
}

impl PreprocessPolicy {
  pub fn input_shape(&self) -> InputShape {
    match self {
      PreprocessPolicy::Custom => CUSTOM_CNN_INPUT,
      PreprocessPolicy::MobileNet => MOBILENET_INPUT,
    }
  }

  fn normalization(&self) -> Normalization {
    match self {
      PreprocessPolicy::Custom => Normalization {
        divisor: [255.0; RGB_CHANNELS],
        offset: [0.0; RGB_CHANNELS],
      },
      // keras.applications.mobilenet_v2.preprocess_input: x / 127.5 - 1
      PreprocessPolicy::MobileNet => Normalization {
        divisor: [127.5; RGB_CHANNELS],
        offset: [1.0; RGB_CHANNELS],
      },
    }
  }

  /// 单个通道值的归一化结果
  pub fn normalize(&self, channel: usize, value: u8) -> f32 {
    self.normalization().apply(channel, value)
  }

  /// 缩放并归一化为 NHWC 张量
  pub fn apply(&self, image: &RgbImage) -> Tensor {
    let shape = self.input_shape();
    let norm = self.normalization();

    let resized = imageops::resize(
      image,
      shape.width as u32,
      shape.height as u32,
      RESIZE_FILTER,
    );

    let mut tensor = Tensor::zeros(shape, TensorLayout::Nhwc);
    for (dst, pixel) in tensor
      .as_mut()
      .chunks_exact_mut(RGB_CHANNELS)
      .zip(resized.pixels())
    {
      for (c, slot) in dst.iter_mut().enumerate() {
        *slot = norm.apply(c, pixel[c]);
      }
    }

    debug!(
      "预处理完成: 策略 {}, {}x{} -> {}",
      self,
      image.width(),
      image.height(),
      shape
    );
    tensor
  }
}

impl fmt::Display for PreprocessPolicy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PreprocessPolicy::Custom => f.write_str("custom"),
      PreprocessPolicy::MobileNet => f.write_str("mobilenet"),
    }
  }
}

impl FromStr for PreprocessPolicy {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "custom" => Ok(PreprocessPolicy::Custom),
      "mobilenet" | "mobilenet_v2" | "mobilenetv2" => Ok(PreprocessPolicy::MobileNet),
      other => Err(other.to_string()),
    }
  }
}

fn guess_reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, PreprocessError> {
  let reader = ImageReader::new(Cursor::new(bytes))
    .with_guessed_format()
    .map_err(|_| PreprocessError::UnknownFormat)?;
  if reader.format().is_none() {
    return Err(PreprocessError::UnknownFormat);
  }
  Ok(reader)
}

/// 解码上传的图像并转换为 8 位 RGB
///
/// 先读取图像头校验尺寸，再带着解码限制完整解码，避免恶意图像头导致的超大内存分配。
pub fn decode_image(bytes: &[u8], limits: &ImageLimits) -> Result<RgbImage, PreprocessError> {
  if bytes.is_empty() {
    return Err(PreprocessError::Empty);
  }

  let (width, height) = guess_reader(bytes)?.into_dimensions()?;
  if width.max(height) > limits.max_side {
    return Err(PreprocessError::TooLarge {
      width,
      height,
      max: limits.max_side,
    });
  }
  if width.min(height) < limits.min_side {
    return Err(PreprocessError::TooSmall {
      width,
      height,
      min: limits.min_side,
    });
  }

  let mut reader = guess_reader(bytes)?;
  let mut decode_limits = Limits::default();
  decode_limits.max_image_width = Some(limits.max_side);
  decode_limits.max_image_height = Some(limits.max_side);
  reader.limits(decode_limits);

  let image = reader.decode()?;
  debug!("图像解码完成: {}x{}, {:?}", width, height, image.color());
  Ok(image.to_rgb8())
}

/// 以默认尺寸限制解码并按策略预处理
pub fn preprocess(bytes: &[u8], policy: PreprocessPolicy) -> Result<Tensor, PreprocessError> {
  let image = decode_image(bytes, &ImageLimits::default())?;
  Ok(policy.apply(&image))
}
