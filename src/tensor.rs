// 该文件是 Yejian （叶鉴） 项目的一部分。
// src/tensor.rs - 模型输入张量定义
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

use std::fmt;

use serde::Serialize;

pub const RGB_CHANNELS: usize = 3;

/// 模型输入分辨率（宽 x 高 x 通道）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InputShape {
  pub width: usize,
  pub height: usize,
  pub channels: usize,
}

impl InputShape {
  pub const fn rgb(width: usize, height: usize) -> Self {
    Self {
      width,
      height,
      channels: RGB_CHANNELS,
    }
  }

  pub fn len(&self) -> usize {
    self.width * self.height * self.channels
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// 带批次维度的形状，批次固定为 1
  pub fn batched_dims(&self, layout: TensorLayout) -> [i64; 4] {
    let (w, h, c) = (self.width as i64, self.height as i64, self.channels as i64);
    match layout {
      TensorLayout::Nhwc => [1, h, w, c],
      TensorLayout::Nchw => [1, c, h, w],
    }
  }
}

impl fmt::Display for InputShape {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}x{}x{}", self.width, self.height, self.channels)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
  Nhwc,
  Nchw,
}

impl std::str::FromStr for TensorLayout {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "nhwc" => Ok(TensorLayout::Nhwc),
      "nchw" => Ok(TensorLayout::Nchw),
      other => Err(other.to_string()),
    }
  }
}

impl fmt::Display for TensorLayout {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TensorLayout::Nhwc => f.write_str("NHWC"),
      TensorLayout::Nchw => f.write_str("NCHW"),
    }
  }
}

/// 已归一化的输入张量，批次为 1
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  shape: InputShape,
  layout: TensorLayout,
  data: Box<[f32]>,
}

impl Tensor {
  pub fn zeros(shape: InputShape, layout: TensorLayout) -> Self {
    Self {
      shape,
      layout,
      data: vec![0.0f32; shape.len()].into_boxed_slice(),
    }
  }

  /// 以给定数据构造张量，长度必须与形状一致
  pub fn from_vec(shape: InputShape, layout: TensorLayout, data: Vec<f32>) -> Option<Self> {
    if data.len() != shape.len() {
      return None;
    }
    Some(Self {
      shape,
      layout,
      data: data.into_boxed_slice(),
    })
  }

  pub fn shape(&self) -> InputShape {
    self.shape
  }

  pub fn layout(&self) -> TensorLayout {
    self.layout
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  /// 转换到指定的内存布局，布局相同时直接返回
  pub fn to_layout(self, layout: TensorLayout) -> Self {
    if self.layout == layout {
      return self;
    }

    let InputShape {
      width,
      height,
      channels,
    } = self.shape;
    let mut data = vec![0.0f32; self.data.len()];

    for h in 0..height {
      for w in 0..width {
        for c in 0..channels {
          let nhwc = h * width * channels + w * channels + c;
          let nchw = c * height * width + h * width + w;
          match layout {
            TensorLayout::Nchw => data[nchw] = self.data[nhwc],
            TensorLayout::Nhwc => data[nhwc] = self.data[nchw],
          }
        }
      }
    }

    Self {
      shape: self.shape,
      layout,
      data: data.into_boxed_slice(),
    }
  }
}

impl AsMut<[f32]> for Tensor {
  fn as_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}
