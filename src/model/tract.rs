// 该文件是 Mengmian （蒙面） 项目的一部分。
// src/model/tract.rs - 基于 tract 的 ONNX 人脸检测与特征提取
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

use std::path::{Path, PathBuf};

use image::{RgbaImage, imageops, imageops::FilterType};
use tract_onnx::prelude::*;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  model::{
    BoundingBox, DESCRIPTOR_LEN, Descriptor, Detection, FaceModel, ModelError,
    non_max_suppression,
  },
};

pub const DETECTOR_FILE: &str = "face_detector.onnx";
pub const RECOGNIZER_FILE: &str = "face_recognition.onnx";

// UltraFace RFB-320
const DETECTOR_INPUT_W: usize = 320;
const DETECTOR_INPUT_H: usize = 240;
const DETECTOR_MEAN: f32 = 127.0;
const DETECTOR_SCALE: f32 = 128.0;

const RECOGNIZER_INPUT: usize = 112;
const RECOGNIZER_MEAN: f32 = 127.5;
const RECOGNIZER_SCALE: f32 = 128.0;

const DEFAULT_SCORE_THRESHOLD: f32 = 0.7;
const DEFAULT_NMS_THRESHOLD: f32 = 0.3;

type Plan = TypedRunnableModel<TypedModel>;

pub struct TractFaceModel {
  detector: Plan,
  recognizer: Plan,
  score_threshold: f32,
  nms_threshold: f32,
}

/// 从模型目录加载检测与识别网络
pub struct TractFaceModelBuilder {
  model_dir: PathBuf,
  score_threshold: f32,
  nms_threshold: f32,
}

impl FromUrl for TractFaceModelBuilder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "模型路径方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ModelError::ModelPath(format!(
        "模型路径必须使用 {} 方案: {}",
        Self::SCHEME,
        url
      )));
    }

    let model_dir = url
      .to_file_path()
      .map_err(|_| ModelError::ModelPath(format!("无法转换为本地路径: {}", url)))?;
    Ok(Self::from_path(model_dir))
  }
}

impl FromUrlWithScheme for TractFaceModelBuilder {
  const SCHEME: &'static str = "file";
}

impl TractFaceModelBuilder {
  pub fn from_path(model_dir: impl Into<PathBuf>) -> Self {
    Self {
      model_dir: model_dir.into(),
      score_threshold: DEFAULT_SCORE_THRESHOLD,
      nms_threshold: DEFAULT_NMS_THRESHOLD,
    }
  }

  pub fn score_threshold(mut self, threshold: f32) -> Self {
    self.score_threshold = threshold;
    self
  }

  pub fn nms_threshold(mut self, threshold: f32) -> Self {
    self.nms_threshold = threshold;
    self
  }

  pub fn build(self) -> Result<TractFaceModel, ModelError> {
    let detector = load_plan(
      &self.model_dir.join(DETECTOR_FILE),
      [1, 3, DETECTOR_INPUT_H, DETECTOR_INPUT_W],
    )?;
    let recognizer = load_plan(
      &self.model_dir.join(RECOGNIZER_FILE),
      [1, 3, RECOGNIZER_INPUT, RECOGNIZER_INPUT],
    )?;
    info!("模型加载完成: {}", self.model_dir.display());

    Ok(TractFaceModel {
      detector,
      recognizer,
      score_threshold: self.score_threshold,
      nms_threshold: self.nms_threshold,
    })
  }
}

fn load_plan(path: &Path, shape: [usize; 4]) -> Result<Plan, ModelError> {
  if !path.is_file() {
    return Err(ModelError::Load(format!("找不到模型文件: {}", path.display())));
  }

  info!("加载模型文件: {}", path.display());
  let load_error = |e: TractError| ModelError::Load(format!("{}: {}", path.display(), e));
  tract_onnx::onnx()
    .model_for_path(path)
    .map_err(load_error)?
    .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(
      shape[0], shape[1], shape[2], shape[3]
    )))
    .map_err(load_error)?
    .into_optimized()
    .map_err(load_error)?
    .into_runnable()
    .map_err(load_error)
}

fn inference_error(e: TractError) -> ModelError {
  ModelError::Inference(e.to_string())
}

/// NCHW 张量，每个通道做 `(v - mean) / scale`
fn nchw_tensor(image: &RgbaImage, mean: f32, scale: f32) -> Tensor {
  let (width, height) = (image.width() as usize, image.height() as usize);
  tract_ndarray::Array4::from_shape_fn((1, 3, height, width), |(_, c, y, x)| {
    (image.get_pixel(x as u32, y as u32)[c] as f32 - mean) / scale
  })
  .into_tensor()
}

impl TractFaceModel {
  /// 返回原图坐标下的候选框，已做非极大值抑制
  fn detect_boxes(&self, image: &RgbaImage) -> Result<Vec<(BoundingBox, f32)>, ModelError> {
    let resized = imageops::resize(
      image,
      DETECTOR_INPUT_W as u32,
      DETECTOR_INPUT_H as u32,
      FilterType::Triangle,
    );
    let input = nchw_tensor(&resized, DETECTOR_MEAN, DETECTOR_SCALE);
    let outputs = self
      .detector
      .run(tvec!(input.into()))
      .map_err(inference_error)?;

    let (scores, boxes) = match (outputs.first(), outputs.get(1)) {
      (Some(scores), Some(boxes)) => (
        scores.as_slice::<f32>().map_err(inference_error)?,
        boxes.as_slice::<f32>().map_err(inference_error)?,
      ),
      _ => {
        return Err(ModelError::Inference(format!(
          "检测网络输出数量错误: {}",
          outputs.len()
        )));
      }
    };

    let anchors = scores.len() / 2;
    if boxes.len() != anchors * 4 {
      return Err(ModelError::Inference(format!(
        "检测网络输出大小不匹配: scores {}, boxes {}",
        scores.len(),
        boxes.len()
      )));
    }

    let (w, h) = (image.width() as f32, image.height() as f32);
    let candidates = (0..anchors)
      .filter(|&i| scores[i * 2 + 1] >= self.score_threshold)
      .map(|i| {
        let b = &boxes[i * 4..i * 4 + 4];
        (
          BoundingBox::from_corners(b[0] * w, b[1] * h, b[2] * w, b[3] * h),
          scores[i * 2 + 1],
        )
      })
      .collect::<Vec<_>>();
    debug!("候选框数量: {}", candidates.len());

    Ok(non_max_suppression(candidates, self.nms_threshold))
  }

  /// 裁剪人脸并计算 L2 归一化的特征向量
  fn describe(&self, image: &RgbaImage, bbox: &BoundingBox) -> Result<Descriptor, ModelError> {
    let face = imageops::crop_imm(
      image,
      bbox.x as u32,
      bbox.y as u32,
      bbox.width as u32,
      bbox.height as u32,
    )
    .to_image();
    let face = imageops::resize(
      &face,
      RECOGNIZER_INPUT as u32,
      RECOGNIZER_INPUT as u32,
      FilterType::Triangle,
    );

    let input = nchw_tensor(&face, RECOGNIZER_MEAN, RECOGNIZER_SCALE);
    let outputs = self
      .recognizer
      .run(tvec!(input.into()))
      .map_err(inference_error)?;
    let values = outputs
      .first()
      .ok_or_else(|| ModelError::Inference("识别网络没有输出".to_string()))?
      .as_slice::<f32>()
      .map_err(inference_error)?;
    if values.len() != DESCRIPTOR_LEN {
      return Err(ModelError::Inference(format!(
        "特征向量长度错误: 期望 {}, 实际 {}",
        DESCRIPTOR_LEN,
        values.len()
      )));
    }

    let norm = values.iter().map(|v| v * v).sum::<f32>().sqrt();
    let normalized = values
      .iter()
      .map(|v| if norm > 0.0 { v / norm } else { *v })
      .collect::<Vec<_>>();
    Descriptor::try_from(normalized).map_err(|e| ModelError::Inference(e.to_string()))
  }
}

impl FaceModel for TractFaceModel {
  fn detect_faces(&mut self, image: &RgbaImage) -> Result<Vec<Detection>, ModelError> {
    let mut faces = Vec::new();
    for (bbox, score) in self.detect_boxes(image)? {
      let bbox = bbox.clamped(image.width(), image.height());
      if bbox.width < 1.0 || bbox.height < 1.0 {
        debug!("忽略过小的人脸框: {:?}", bbox);
        continue;
      }
      let descriptor = self.describe(image, &bbox)?;
      faces.push(Detection::new(bbox, score, descriptor));
    }
    Ok(faces)
  }
}
