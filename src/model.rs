// 该文件是 Mengmian （蒙面） 项目的一部分。
// src/model.rs - 人脸检测结果与模型能力定义
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

use std::collections::BTreeMap;
use std::fmt;

use image::RgbaImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DESCRIPTOR_LEN: usize = 128;

/// 人脸身份特征向量，固定 128 维。
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f32>", into = "Vec<f32>")]
pub struct Descriptor([f32; DESCRIPTOR_LEN]);

impl Descriptor {
  pub fn new(values: [f32; DESCRIPTOR_LEN]) -> Self {
    Self(values)
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.0
  }
}

impl fmt::Debug for Descriptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "Descriptor([{:.4}, {:.4}, {:.4}, ..])",
      self.0[0], self.0[1], self.0[2]
    )
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("特征向量长度错误: 期望 {DESCRIPTOR_LEN}, 实际 {0}")]
pub struct DescriptorLengthError(pub usize);

impl TryFrom<Vec<f32>> for Descriptor {
  type Error = DescriptorLengthError;

  fn try_from(values: Vec<f32>) -> Result<Self, Self::Error> {
    let len = values.len();
    let values: [f32; DESCRIPTOR_LEN] = values
      .try_into()
      .map_err(|_| DescriptorLengthError(len))?;
    Ok(Self(values))
  }
}

impl TryFrom<&[f32]> for Descriptor {
  type Error = DescriptorLengthError;

  fn try_from(values: &[f32]) -> Result<Self, Self::Error> {
    let values: [f32; DESCRIPTOR_LEN] = values
      .try_into()
      .map_err(|_| DescriptorLengthError(values.len()))?;
    Ok(Self(values))
  }
}

impl From<Descriptor> for Vec<f32> {
  fn from(descriptor: Descriptor) -> Self {
    descriptor.0.to_vec()
  }
}

/// 像素坐标下的边界框 (左上角 + 宽高)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  pub x: f32,
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

impl BoundingBox {
  pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  /// 由 [x_min, y_min, x_max, y_max] 构造
  pub fn from_corners(x_min: f32, y_min: f32, x_max: f32, y_max: f32) -> Self {
    Self {
      x: x_min,
      y: y_min,
      width: (x_max - x_min).max(0.0),
      height: (y_max - y_min).max(0.0),
    }
  }

  pub fn right(&self) -> f32 {
    self.x + self.width
  }

  pub fn bottom(&self) -> f32 {
    self.y + self.height
  }

  pub fn area(&self) -> f32 {
    self.width.max(0.0) * self.height.max(0.0)
  }

  /// 裁剪到 `image_width x image_height` 的范围内
  pub fn clamped(&self, image_width: u32, image_height: u32) -> Self {
    let (w, h) = (image_width as f32, image_height as f32);
    let x_min = finite_or_zero(self.x).clamp(0.0, w);
    let y_min = finite_or_zero(self.y).clamp(0.0, h);
    let x_max = finite_or_zero(self.right()).clamp(x_min, w);
    let y_max = finite_or_zero(self.bottom()).clamp(y_min, h);
    Self::from_corners(x_min, y_min, x_max, y_max)
  }

  /// 计算两个边界框的 IoU
  pub fn iou(&self, other: &BoundingBox) -> f32 {
    let x1 = self.x.max(other.x);
    let y1 = self.y.max(other.y);
    let x2 = self.right().min(other.right());
    let y2 = self.bottom().min(other.bottom());

    let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = self.area() + other.area() - intersection;

    if union > 0.0 {
      intersection / union
    } else {
      0.0
    }
  }
}

fn finite_or_zero(v: f32) -> f32 {
  if v.is_finite() { v } else { 0.0 }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
  pub x: f32,
  pub y: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
  Male,
  Female,
}

/// 年龄、性别与表情等附加属性
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceAttributes {
  pub age: f32,
  pub gender: Gender,
  pub gender_probability: f32,
  pub expressions: BTreeMap<String, f32>,
}

/// 单张图像中的一张人脸
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub bbox: BoundingBox,
  pub score: f32,
  pub descriptor: Descriptor,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub landmarks: Option<Vec<Point>>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub attributes: Option<FaceAttributes>,
}

impl Detection {
  pub fn new(bbox: BoundingBox, score: f32, descriptor: Descriptor) -> Self {
    Self {
      bbox,
      score,
      descriptor,
      landmarks: None,
      attributes: None,
    }
  }

  pub fn with_landmarks(mut self, landmarks: Vec<Point>) -> Self {
    self.landmarks = Some(landmarks);
    self
  }

  pub fn with_attributes(mut self, attributes: FaceAttributes) -> Self {
    self.attributes = Some(attributes);
    self
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型加载错误: {0}")]
  Load(String),
  #[error("模型路径错误: {0}")]
  ModelPath(String),
  #[error("推理错误: {0}")]
  Inference(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
}

/// 外部人脸识别能力：给定像素，返回零个或多个检测结果。
///
/// 实现者只在工作线程内被调用，因此可以持有可变状态。
pub trait FaceModel: Send {
  /// 检测图像中的全部人脸，边界框需已裁剪到图像范围内。
  fn detect_faces(&mut self, image: &RgbaImage) -> Result<Vec<Detection>, ModelError>;

  /// 检测最显著的一张人脸
  fn detect_single_face(&mut self, image: &RgbaImage) -> Result<Option<Detection>, ModelError> {
    let faces = self.detect_faces(image)?;
    Ok(most_prominent(faces))
  }
}

impl<M: FaceModel + ?Sized> FaceModel for Box<M> {
  fn detect_faces(&mut self, image: &RgbaImage) -> Result<Vec<Detection>, ModelError> {
    (**self).detect_faces(image)
  }

  fn detect_single_face(&mut self, image: &RgbaImage) -> Result<Option<Detection>, ModelError> {
    (**self).detect_single_face(image)
  }
}

/// 置信度最高者优先，置信度相同时取面积较大者
pub fn most_prominent(faces: Vec<Detection>) -> Option<Detection> {
  faces.into_iter().max_by(|a, b| {
    a.score
      .total_cmp(&b.score)
      .then(a.bbox.area().total_cmp(&b.bbox.area()))
  })
}

/// 工作线程内模型的生命周期
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ModelState {
  #[default]
  NotLoaded,
  Loading,
  Ready,
  Failed(String),
}

mod nms;
pub use self::nms::non_max_suppression;

#[cfg(feature = "backend-tract")]
mod tract;
#[cfg(feature = "backend-tract")]
pub use self::tract::{TractFaceModel, TractFaceModelBuilder};
