// 该文件是 Mengmian （蒙面） 项目的一部分。
// tests/common/mod.rs - 集成测试共用的假模型与图像
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

#![allow(dead_code)]

use std::collections::BTreeMap;

use image::{Rgba, RgbaImage};
use mengmian::{
  input::ImageSource,
  model::{
    BoundingBox, DESCRIPTOR_LEN, Descriptor, Detection, FaceAttributes, FaceModel, Gender,
    ModelError, Point,
  },
  output::encode,
};

pub const BACKGROUND: Rgba<u8> = Rgba([128, 128, 128, 255]);

/// 把每种非背景颜色的色块当作一张人脸。
///
/// 特征向量前三维为 `rgb / 100`，同色即同一人。
/// 关键点为色块的四个角，属性中的年龄等于色块宽度。
pub struct ColourKeyed;

pub fn descriptor_of(colour: Rgba<u8>) -> Descriptor {
  let mut values = [0.0; DESCRIPTOR_LEN];
  for (value, channel) in values.iter_mut().zip(colour.0.iter().take(3)) {
    *value = *channel as f32 / 100.0;
  }
  Descriptor::new(values)
}

impl FaceModel for ColourKeyed {
  fn detect_faces(&mut self, image: &RgbaImage) -> Result<Vec<Detection>, ModelError> {
    let mut extents: BTreeMap<[u8; 4], (u32, u32, u32, u32)> = BTreeMap::new();
    for (x, y, pixel) in image.enumerate_pixels() {
      if *pixel == BACKGROUND {
        continue;
      }
      let extent = extents.entry(pixel.0).or_insert((x, y, x, y));
      extent.0 = extent.0.min(x);
      extent.1 = extent.1.min(y);
      extent.2 = extent.2.max(x);
      extent.3 = extent.3.max(y);
    }

    Ok(
      extents
        .into_iter()
        .map(|(colour, (x0, y0, x1, y1))| {
          let (left, top, right, bottom) = (x0 as f32, y0 as f32, (x1 + 1) as f32, (y1 + 1) as f32);
          Detection::new(
            BoundingBox::from_corners(left, top, right, bottom),
            0.9,
            descriptor_of(Rgba(colour)),
          )
          .with_landmarks(vec![
            Point { x: left, y: top },
            Point { x: right, y: top },
            Point { x: right, y: bottom },
            Point { x: left, y: bottom },
          ])
          .with_attributes(FaceAttributes {
            age: right - left,
            gender: Gender::Female,
            gender_probability: 0.9,
            expressions: BTreeMap::from([("neutral".to_string(), 1.0)]),
          })
        })
        .collect(),
    )
  }
}

/// 灰色背景上画若干方形“人脸”
pub fn canvas(width: u32, height: u32, faces: &[(u32, u32, u32, Rgba<u8>)]) -> RgbaImage {
  let mut image = RgbaImage::from_pixel(width, height, BACKGROUND);
  for &(x, y, size, colour) in faces {
    for dy in 0..size {
      for dx in 0..size {
        image.put_pixel(x + dx, y + dy, colour);
      }
    }
  }
  image
}

pub fn source(image: &RgbaImage) -> ImageSource {
  ImageSource::Bytes(encode(image).unwrap().into_data())
}
