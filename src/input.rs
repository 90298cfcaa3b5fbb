// 该文件是 Mengmian （蒙面） 项目的一部分。
// src/input.rs - 图像输入与解码
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
use std::io::Cursor;
use std::path::PathBuf;

use image::{ImageReader, RgbaImage};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, frame::PixelPayload};

mod data_url;
pub use self::data_url::DataUrlError;

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("Data URL 错误: {0}")]
  DataUrl(#[from] DataUrlError),
  #[error("图像尺寸为零: {0}x{1}")]
  ZeroDimensions(u32, u32),
}

const FILE_SCHEME: &str = "file";
const DATA_SCHEME: &str = "data";

/// 可显示的图像来源
#[derive(Clone, PartialEq, Eq)]
pub enum ImageSource {
  /// 本地文件
  File(PathBuf),
  /// `data:` URL
  DataUrl(String),
  /// 已获取的编码字节
  Bytes(Vec<u8>),
}

impl fmt::Debug for ImageSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ImageSource::File(path) => f.debug_tuple("File").field(path).finish(),
      ImageSource::DataUrl(url) => write!(f, "DataUrl({} bytes)", url.len()),
      ImageSource::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
    }
  }
}

impl fmt::Display for ImageSource {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ImageSource::File(path) => write!(f, "{}", path.display()),
      ImageSource::DataUrl(url) => write!(f, "data-url[{}]", url.len()),
      ImageSource::Bytes(bytes) => write!(f, "bytes[{}]", bytes.len()),
    }
  }
}

impl FromUrl for ImageSource {
  type Error = DecodeError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      FILE_SCHEME => url
        .to_file_path()
        .map(ImageSource::File)
        .map_err(|_| DecodeError::SchemeMismatch(format!("无法转换为本地路径: {}", url))),
      DATA_SCHEME => Ok(ImageSource::DataUrl(url.as_str().to_string())),
      other => {
        error!(
          "URI 方案不匹配: 期望 '{}' 或 '{}', 实际 '{}'",
          FILE_SCHEME, DATA_SCHEME, other
        );
        Err(DecodeError::SchemeMismatch(other.to_string()))
      }
    }
  }
}

impl From<PathBuf> for ImageSource {
  fn from(path: PathBuf) -> Self {
    ImageSource::File(path)
  }
}

impl From<Vec<u8>> for ImageSource {
  fn from(bytes: Vec<u8>) -> Self {
    ImageSource::Bytes(bytes)
  }
}

/// 解码后的 RGBA 图像，可反复生成新的传输载荷
#[derive(Debug, Clone)]
pub struct DecodedImage {
  image: RgbaImage,
}

impl DecodedImage {
  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn image(&self) -> &RgbaImage {
    &self.image
  }

  /// 每次调用都复制出一块独立的缓冲区
  pub fn payload(&self) -> PixelPayload {
    PixelPayload::from(&self.image)
  }

  pub fn into_payload(self) -> PixelPayload {
    PixelPayload::from(self.image)
  }
}

impl TryFrom<RgbaImage> for DecodedImage {
  type Error = DecodeError;

  fn try_from(image: RgbaImage) -> Result<Self, Self::Error> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(DecodeError::ZeroDimensions(width, height));
    }
    Ok(Self { image })
  }
}

pub fn decode(source: &ImageSource) -> Result<DecodedImage, DecodeError> {
  let image = match source {
    ImageSource::File(path) => ImageReader::open(path)?.with_guessed_format()?.decode()?,
    ImageSource::DataUrl(url) => decode_bytes(&data_url::parse(url)?)?,
    ImageSource::Bytes(bytes) => decode_bytes(bytes)?,
  };

  let decoded = DecodedImage::try_from(image.into_rgba8())?;
  debug!(
    "图像解码完成: {} ({}x{})",
    source,
    decoded.width(),
    decoded.height()
  );
  Ok(decoded)
}

pub fn decode_payload(source: &ImageSource) -> Result<PixelPayload, DecodeError> {
  decode(source).map(DecodedImage::into_payload)
}

fn decode_bytes(bytes: &[u8]) -> Result<image::DynamicImage, DecodeError> {
  Ok(
    ImageReader::new(Cursor::new(bytes))
      .with_guessed_format()?
      .decode()?,
  )
}
