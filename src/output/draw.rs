// 该文件是 Mengmian （蒙面） 项目的一部分。
// src/output/draw.rs - 人脸区域模糊渲染
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

use image::{RgbaImage, imageops};
use imageproc::filter::gaussian_blur_f32;
use tracing::{debug, warn};

use crate::{
  config::BlurConfig,
  frame::PixelPayload,
  model::{BoundingBox, Detection},
  output::{EncodeError, EncodedImage, encode},
};

/// 图像内的整数像素区域
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

/// 按比例外扩边界框并裁剪到图像范围，退化为空区域时返回 `None`
pub fn expanded_region(
  bbox: &BoundingBox,
  padding_ratio: f32,
  image_width: u32,
  image_height: u32,
) -> Option<Region> {
  let (w, h) = (image_width as f32, image_height as f32);
  let pad_x = bbox.width.max(0.0) * padding_ratio.max(0.0);
  let pad_y = bbox.height.max(0.0) * padding_ratio.max(0.0);

  let x_min = (bbox.x - pad_x).floor();
  let y_min = (bbox.y - pad_y).floor();
  let x_max = (bbox.right() + pad_x).ceil();
  let y_max = (bbox.bottom() + pad_y).ceil();

  if ![x_min, y_min, x_max, y_max].iter().all(|v| v.is_finite()) {
    return None;
  }

  let x_min = x_min.clamp(0.0, w) as u32;
  let y_min = y_min.clamp(0.0, h) as u32;
  let x_max = x_max.clamp(0.0, w) as u32;
  let y_max = y_max.clamp(0.0, h) as u32;

  if x_min >= x_max || y_min >= y_max {
    return None;
  }

  Some(Region {
    x: x_min,
    y: y_min,
    width: x_max - x_min,
    height: y_max - y_min,
  })
}

/// 将检测到的人脸区域重复做高斯模糊
#[derive(Debug, Clone, Copy, Default)]
pub struct BlurRenderer {
  config: BlurConfig,
}

impl BlurRenderer {
  pub fn new(config: BlurConfig) -> Self {
    Self { config }
  }

  pub fn config(&self) -> &BlurConfig {
    &self.config
  }

  /// 在原图上模糊每个检测区域，返回实际处理的区域数
  pub fn blur_detections(&self, image: &mut RgbaImage, detections: &[Detection]) -> usize {
    let (width, height) = image.dimensions();
    let mut blurred = 0;

    for detection in detections {
      match expanded_region(&detection.bbox, self.config.padding_ratio, width, height) {
        Some(region) => {
          self.blur_region(image, region);
          blurred += 1;
        }
        None => {
          warn!("跳过退化的人脸区域: {:?}", detection.bbox);
        }
      }
    }

    blurred
  }

  /// 区域被单独取出后再模糊，区域外的像素不会渗入
  fn blur_region(&self, image: &mut RgbaImage, region: Region) {
    if self.config.passes == 0 || !(self.config.sigma.is_finite() && self.config.sigma > 0.0) {
      return;
    }

    let mut patch = imageops::crop_imm(image, region.x, region.y, region.width, region.height)
      .to_image();
    for _ in 0..self.config.passes {
      patch = gaussian_blur_f32(&patch, self.config.sigma);
    }
    imageops::replace(image, &patch, region.x as i64, region.y as i64);

    debug!(
      "模糊区域 ({}, {}, {}x{})",
      region.x, region.y, region.width, region.height
    );
  }

  pub fn render(
    &self,
    payload: PixelPayload,
    detections: &[Detection],
  ) -> Result<EncodedImage, EncodeError> {
    let mut surface = payload.into_rgba_image();
    let blurred = self.blur_detections(&mut surface, detections);
    debug!("共模糊 {} / {} 个区域", blurred, detections.len());
    encode(&surface)
  }
}
