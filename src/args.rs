// 该文件是 Mengmian （蒙面） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use clap::Parser;
use mengmian::{
  config::{DEFAULT_CALL_TIMEOUT, DEFAULT_MODEL_PATH, MODEL_PATH_ENV},
  matcher::DEFAULT_MATCH_THRESHOLD,
};

/// Mengmian 人脸匹配与匿名化
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型目录（file:// URL 或本地路径）
  #[arg(long, env = MODEL_PATH_ENV, default_value = DEFAULT_MODEL_PATH, value_name = "MODELS")]
  pub models: String,

  /// 示例图像，其中的人脸会在目标图像中被模糊
  /// 支持本地路径、file:// URL 与 data: URL
  #[arg(long, value_name = "IMAGE", required_unless_present = "all_faces")]
  pub example: Option<String>,

  /// 目标图像，可重复指定
  #[arg(long = "target", value_name = "IMAGE", required = true)]
  pub targets: Vec<String>,

  /// 输出目录
  #[arg(long, default_value = ".", value_name = "DIR")]
  pub output_dir: PathBuf,

  /// 匹配阈值，特征距离小于该值视为同一人
  #[arg(long, default_value_t = DEFAULT_MATCH_THRESHOLD, value_name = "THRESHOLD")]
  pub threshold: f32,

  /// 单次推理调用的超时（秒）
  #[arg(long, default_value_t = DEFAULT_CALL_TIMEOUT.as_secs(), value_name = "SECONDS")]
  pub timeout_secs: u64,

  /// 模糊目标图像中的所有人脸，忽略示例图像
  #[arg(long)]
  pub all_faces: bool,

  /// 只使用示例图像中最显著的一张人脸
  #[arg(long)]
  pub prominent_only: bool,

  /// 在输出图像旁写入 JSON 检测记录
  #[arg(long)]
  pub record: bool,
}
