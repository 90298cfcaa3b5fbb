// 该文件是 Mengmian （蒙面） 项目的一部分。
// src/worker.rs - 推理工作线程
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

use std::sync::{Mutex, PoisonError};

use crate::{
  frame::PixelPayload,
  model::{Descriptor, Detection, FaceModel},
  output::EncodedImage,
  protocol::{JobKind, Reply, Request, WorkerFault},
};

mod handle;
mod service;

pub use self::handle::{PendingCall, WorkerBuilder, WorkerCanceller, WorkerHandle};
pub use self::service::InferenceService;

/// 推理工作线程对外提供的四个操作。
///
/// 实现者只需提供 [`FaceInference::call`]，其余方法负责组装请求并检查响应类型。
pub trait FaceInference {
  fn call(&self, request: Request) -> Result<Reply, WorkerFault>;

  /// 最显著的一张人脸，没有人脸时返回 `None`
  fn detect_example(&self, payload: PixelPayload) -> Result<Option<Detection>, WorkerFault> {
    self
      .call(Request::DetectExample(payload))?
      .into_example_face(JobKind::DetectExample)
  }

  fn extract_all_faces(&self, payload: PixelPayload) -> Result<Vec<Detection>, WorkerFault> {
    self
      .call(Request::ExtractAllFaces(payload))?
      .into_faces(JobKind::ExtractAllFaces)
  }

  fn detect_matching_faces(
    &self,
    payload: PixelPayload,
    example_descriptors: Vec<Descriptor>,
  ) -> Result<Vec<Detection>, WorkerFault> {
    self
      .call(Request::DetectMatchingFaces {
        payload,
        example_descriptors,
      })?
      .into_faces(JobKind::DetectMatchingFaces)
  }

  fn draw_output_image(
    &self,
    payload: PixelPayload,
    detections: Vec<Detection>,
  ) -> Result<EncodedImage, WorkerFault> {
    self
      .call(Request::DrawOutputImage {
        payload,
        detections,
      })?
      .into_image(JobKind::DrawOutputImage)
  }
}

impl<T: FaceInference + ?Sized> FaceInference for Box<T> {
  fn call(&self, request: Request) -> Result<Reply, WorkerFault> {
    (**self).call(request)
  }
}

/// 在调用者线程内直接执行的推理实现，不经过通道
pub struct LocalInference<M: FaceModel> {
  service: Mutex<InferenceService<M>>,
}

impl<M: FaceModel> LocalInference<M> {
  pub fn new(service: InferenceService<M>) -> Self {
    Self {
      service: Mutex::new(service),
    }
  }
}

impl<M: FaceModel> FaceInference for LocalInference<M> {
  fn call(&self, request: Request) -> Result<Reply, WorkerFault> {
    let mut service = self.service.lock().unwrap_or_else(PoisonError::into_inner);
    Ok(service.handle(request))
  }
}
