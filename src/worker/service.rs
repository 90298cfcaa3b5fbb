// 该文件是 Mengmian （蒙面） 项目的一部分。
// src/worker/service.rs - 工作线程内的推理服务
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

use std::time::Instant;

use image::RgbaImage;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  frame::PixelPayload,
  matcher::Matcher,
  model::{Descriptor, Detection, FaceModel, ModelError},
  output::{EncodeError, draw::BlurRenderer},
  protocol::{Reply, Request},
};

#[derive(Error, Debug)]
enum ServiceError {
  #[error("{0}")]
  Model(#[from] ModelError),
  #[error("输出编码失败: {0}")]
  Encode(#[from] EncodeError),
}

/// 持有已加载模型，逐个执行请求
pub struct InferenceService<M: FaceModel> {
  model: M,
  matcher: Matcher,
  renderer: BlurRenderer,
}

impl<M: FaceModel> InferenceService<M> {
  pub fn new(model: M, matcher: Matcher, renderer: BlurRenderer) -> Self {
    Self {
      model,
      matcher,
      renderer,
    }
  }

  pub fn handle(&mut self, request: Request) -> Reply {
    let kind = request.kind();
    let now = Instant::now();

    let result = match request {
      Request::DetectExample(payload) => self.detect_example(payload).map(Reply::ExampleFace),
      Request::ExtractAllFaces(payload) => self.extract_all_faces(payload).map(Reply::Faces),
      Request::DetectMatchingFaces {
        payload,
        example_descriptors,
      } => self
        .detect_matching_faces(payload, &example_descriptors)
        .map(Reply::Faces),
      Request::DrawOutputImage {
        payload,
        detections,
      } => self
        .renderer
        .render(payload, &detections)
        .map(Reply::Image)
        .map_err(ServiceError::from),
    };

    debug!("{} 完成，耗时: {:.2?}", kind, now.elapsed());

    result.unwrap_or_else(|e| {
      warn!("{} 执行失败: {}", kind, e);
      Reply::Failed(e.to_string())
    })
  }

  fn detect_example(&mut self, payload: PixelPayload) -> Result<Option<Detection>, ServiceError> {
    let image = payload.into_rgba_image();
    let face = self.model.detect_single_face(&image)?;
    Ok(face.map(|face| clamp_to(face, &image)))
  }

  fn extract_all_faces(&mut self, payload: PixelPayload) -> Result<Vec<Detection>, ServiceError> {
    let image = payload.into_rgba_image();
    let faces = self.model.detect_faces(&image)?;
    debug!("检测到 {} 张人脸", faces.len());
    Ok(faces.into_iter().map(|face| clamp_to(face, &image)).collect())
  }

  fn detect_matching_faces(
    &mut self,
    payload: PixelPayload,
    example_descriptors: &[Descriptor],
  ) -> Result<Vec<Detection>, ServiceError> {
    let faces = self.extract_all_faces(payload)?;
    let total = faces.len();
    let matched = self.matcher.filter(faces, example_descriptors);
    debug!("匹配到 {} / {} 张人脸", matched.len(), total);
    Ok(matched)
  }
}

fn clamp_to(face: Detection, image: &RgbaImage) -> Detection {
  Detection {
    bbox: face.bbox.clamped(image.width(), image.height()),
    ..face
  }
}
