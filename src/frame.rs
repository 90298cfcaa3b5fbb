// 该文件是 Mengmian （蒙面） 项目的一部分。
// src/frame.rs - 跨线程传输的 RGBA 像素载荷
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

use image::RgbaImage;
use thiserror::Error;

pub const RGBA_CHANNELS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PayloadError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
  #[error("图像尺寸为零: {0}x{1}")]
  ZeroDimensions(u32, u32),
}

/// 跨越工作线程边界的原始像素。
///
/// 该类型刻意不实现 `Clone`：载荷发送后所有权随之转移，
/// 同一块缓冲区不可能被发送两次。需要再次使用同一图像时，
/// 应从保留的 [`RgbaImage`] 重新生成一份新的载荷。
#[derive(Debug, PartialEq, Eq)]
pub struct PixelPayload {
  width: u32,
  height: u32,
  pixels: Vec<u8>,
}

impl PixelPayload {
  pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self, PayloadError> {
    if width == 0 || height == 0 {
      return Err(PayloadError::ZeroDimensions(width, height));
    }

    let expected = RGBA_CHANNELS * width as usize * height as usize;
    if pixels.len() != expected {
      return Err(PayloadError::LengthMismatch {
        expected,
        actual: pixels.len(),
      });
    }

    Ok(Self {
      width,
      height,
      pixels,
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn pixels(&self) -> &[u8] {
    &self.pixels
  }

  pub fn into_rgba_image(self) -> RgbaImage {
    // 构造时已校验长度，这里不会失败
    RgbaImage::from_raw(self.width, self.height, self.pixels)
      .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
  }
}

impl From<&RgbaImage> for PixelPayload {
  fn from(image: &RgbaImage) -> Self {
    Self {
      width: image.width(),
      height: image.height(),
      pixels: image.as_raw().clone(),
    }
  }
}

impl From<RgbaImage> for PixelPayload {
  fn from(image: RgbaImage) -> Self {
    let (width, height) = image.dimensions();
    Self {
      width,
      height,
      pixels: image.into_raw(),
    }
  }
}
