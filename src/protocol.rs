// 该文件是 Mengmian （蒙面） 项目的一部分。
// src/protocol.rs - 控制端与推理工作线程之间的消息协议
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
use std::time::Duration;

use thiserror::Error;

use crate::{
  frame::PixelPayload,
  model::{Descriptor, Detection},
  output::EncodedImage,
};

/// 调用关联 ID，在同一个工作线程句柄内唯一
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
  DetectExample,
  ExtractAllFaces,
  DetectMatchingFaces,
  DrawOutputImage,
}

impl fmt::Display for JobKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      JobKind::DetectExample => "detect_example",
      JobKind::ExtractAllFaces => "extract_all_faces",
      JobKind::DetectMatchingFaces => "detect_matching_faces",
      JobKind::DrawOutputImage => "draw_output_image",
    };
    f.write_str(name)
  }
}

/// 发往工作线程的请求，像素载荷随请求一起移交
#[derive(Debug)]
pub enum Request {
  DetectExample(PixelPayload),
  ExtractAllFaces(PixelPayload),
  DetectMatchingFaces {
    payload: PixelPayload,
    example_descriptors: Vec<Descriptor>,
  },
  DrawOutputImage {
    payload: PixelPayload,
    detections: Vec<Detection>,
  },
}

impl Request {
  pub fn kind(&self) -> JobKind {
    match self {
      Request::DetectExample(_) => JobKind::DetectExample,
      Request::ExtractAllFaces(_) => JobKind::ExtractAllFaces,
      Request::DetectMatchingFaces { .. } => JobKind::DetectMatchingFaces,
      Request::DrawOutputImage { .. } => JobKind::DrawOutputImage,
    }
  }
}

/// 工作线程返回的结果
#[derive(Debug)]
pub enum Reply {
  ExampleFace(Option<Detection>),
  Faces(Vec<Detection>),
  Image(EncodedImage),
  /// 请求在工作线程内执行失败
  Failed(String),
}

/// 带关联 ID 的消息信封
#[derive(Debug)]
pub struct Envelope<T> {
  pub id: CallId,
  pub body: T,
}

impl<T> Envelope<T> {
  pub fn new(id: CallId, body: T) -> Self {
    Self { id, body }
  }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WorkerFault {
  #[error("模型加载失败: {0}")]
  ModelLoad(String),
  #[error("请求 {0} 被工作线程拒绝: {1}")]
  Rejected(JobKind, String),
  #[error("工作线程已断开")]
  Disconnected,
  #[error("调用超时 ({0:?})")]
  Timeout(Duration),
}

impl WorkerFault {
  /// 通道本身失效，该工作线程不能再使用
  pub fn is_transport(&self) -> bool {
    !matches!(self, WorkerFault::Rejected(..))
  }
}

impl Reply {
  pub fn into_example_face(self, kind: JobKind) -> Result<Option<Detection>, WorkerFault> {
    match self {
      Reply::ExampleFace(face) => Ok(face),
      other => Err(other.unexpected(kind)),
    }
  }

  pub fn into_faces(self, kind: JobKind) -> Result<Vec<Detection>, WorkerFault> {
    match self {
      Reply::Faces(faces) => Ok(faces),
      other => Err(other.unexpected(kind)),
    }
  }

  pub fn into_image(self, kind: JobKind) -> Result<EncodedImage, WorkerFault> {
    match self {
      Reply::Image(image) => Ok(image),
      other => Err(other.unexpected(kind)),
    }
  }

  fn unexpected(self, kind: JobKind) -> WorkerFault {
    match self {
      Reply::Failed(reason) => WorkerFault::Rejected(kind, reason),
      other => WorkerFault::Rejected(kind, format!("意外的响应类型: {:?}", other)),
    }
  }
}
