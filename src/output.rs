// 该文件是 Mengmian （蒙面） 项目的一部分。
// src/output.rs - 输出图像编码与保存
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
use std::path::Path;

use base64::{Engine, engine::general_purpose::STANDARD};
use image::{ExtendedColorType, ImageEncoder, RgbaImage, codecs::png::PngEncoder};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::{input::ImageSource, model::Detection};

pub mod draw;

#[derive(Error, Debug)]
pub enum EncodeError {
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("记录序列化错误: {0}")]
  Json(#[from] serde_json::Error),
}

pub const PNG_MIME: &str = "image/png";

/// 编码后的可显示图像 (PNG)
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedImage {
  data: Vec<u8>,
  width: u32,
  height: u32,
}

impl fmt::Debug for EncodedImage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("EncodedImage")
      .field("bytes", &self.data.len())
      .field("width", &self.width)
      .field("height", &self.height)
      .finish()
  }
}

impl EncodedImage {
  pub fn data(&self) -> &[u8] {
    &self.data
  }

  pub fn into_data(self) -> Vec<u8> {
    self.data
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn mime_type(&self) -> &'static str {
    PNG_MIME
  }

  /// 生成可直接显示的 `data:` URL
  pub fn to_data_url(&self) -> String {
    format!("data:{};base64,{}", PNG_MIME, STANDARD.encode(&self.data))
  }

  pub fn save(&self, path: impl AsRef<Path>) -> Result<(), EncodeError> {
    let path = path.as_ref();
    if let Some(parent) = path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    std::fs::write(path, &self.data)?;
    info!("保存图像到文件: {}", path.display());
    Ok(())
  }
}

/// 无损编码为 PNG
pub fn encode(surface: &RgbaImage) -> Result<EncodedImage, EncodeError> {
  let (width, height) = surface.dimensions();
  let mut data = Vec::new();
  PngEncoder::new(&mut data).write_image(surface.as_raw(), width, height, ExtendedColorType::Rgba8)?;
  Ok(EncodedImage {
    data,
    width,
    height,
  })
}

#[derive(Serialize)]
struct RecordFile<'a> {
  source: &'a str,
  width: u32,
  height: u32,
  faces: &'a [Detection],
}

/// 输出文件名，以目标序号开头，同名的目标不会互相覆盖
pub fn output_file_name(source: &ImageSource, target_index: usize) -> String {
  let stem = match source {
    ImageSource::File(path) => path
      .file_stem()
      .map(|stem| stem.to_string_lossy().into_owned())
      .unwrap_or_else(|| "target".to_string()),
    _ => "target".to_string(),
  };
  format!("{:03}-{}.anonymized.png", target_index, stem)
}

/// 将被模糊的人脸以 JSON 形式记录在输出图像旁
pub struct Record;

impl Record {
  pub fn record(
    &self,
    source: &str,
    image: &EncodedImage,
    faces: &[Detection],
    path: &Path,
  ) -> Result<(), EncodeError> {
    let record = RecordFile {
      source,
      width: image.width(),
      height: image.height(),
      faces,
    };
    std::fs::write(path.with_extension("json"), serde_json::to_vec_pretty(&record)?)?;
    Ok(())
  }
}
