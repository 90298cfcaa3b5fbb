// 该文件是 Mengmian （蒙面） 项目的一部分。
// src/input/data_url.rs - data: URL 解析
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

use base64::{Engine, engine::general_purpose::STANDARD};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataUrlError {
  #[error("缺少 data: 前缀")]
  MissingPrefix,
  #[error("缺少 ',' 分隔符")]
  MissingComma,
  #[error("Base64 解码失败: {0}")]
  Base64(#[from] base64::DecodeError),
}

const DATA_PREFIX: &str = "data:";
const BASE64_MARKER: &str = ";base64";

/// 解析 `data:[<mediatype>][;base64],<data>`，返回原始字节
pub(super) fn parse(url: &str) -> Result<Vec<u8>, DataUrlError> {
  let rest = url
    .get(..DATA_PREFIX.len())
    .filter(|prefix| prefix.eq_ignore_ascii_case(DATA_PREFIX))
    .map(|_| &url[DATA_PREFIX.len()..])
    .ok_or(DataUrlError::MissingPrefix)?;

  let (header, body) = rest.split_once(',').ok_or(DataUrlError::MissingComma)?;

  if header.to_ascii_lowercase().ends_with(BASE64_MARKER) {
    // 浏览器生成的 data URL 可能夹带空白或换行
    let cleaned: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let cleaned = urlencoding::decode(&cleaned)
      .map(|s| s.into_owned())
      .unwrap_or(cleaned);
    Ok(STANDARD.decode(cleaned.as_bytes())?)
  } else {
    Ok(urlencoding::decode_binary(body.as_bytes()).into_owned())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_base64_payload() {
    let bytes = parse("data:image/png;base64,AAEC/w==").unwrap();
    assert_eq!(bytes, vec![0, 1, 2, 255]);
  }

  #[test]
  fn parses_percent_encoded_payload() {
    let bytes = parse("data:application/octet-stream,%89PNG").unwrap();
    assert_eq!(bytes, vec![0x89, b'P', b'N', b'G']);
  }

  #[test]
  fn tolerates_whitespace_and_case() {
    let bytes = parse("DATA:image/png;BASE64,AA EC\n/w==").unwrap();
    assert_eq!(bytes, vec![0, 1, 2, 255]);
  }

  #[test]
  fn rejects_malformed_urls() {
    assert!(matches!(parse("image/png;base64,AA"), Err(DataUrlError::MissingPrefix)));
    assert!(matches!(parse("data:image/png;base64"), Err(DataUrlError::MissingComma)));
    assert!(matches!(
      parse("data:image/png;base64,!!!"),
      Err(DataUrlError::Base64(_))
    ));
  }
}
