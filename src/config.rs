// 该文件是 Mengmian （蒙面） 项目的一部分。
// src/config.rs - 运行配置
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

use std::time::Duration;

use crate::matcher::DEFAULT_MATCH_THRESHOLD;

/// 模型目录的环境变量名
pub const MODEL_PATH_ENV: &str = "MENGMIAN_MODEL_PATH";
pub const DEFAULT_MODEL_PATH: &str = "file:///usr/share/mengmian/models";

/// 单次跨线程调用的上限
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(500);

pub const DEFAULT_PADDING_RATIO: f32 = 0.2;
pub const DEFAULT_BLUR_SIGMA: f32 = 50.0;
pub const DEFAULT_BLUR_PASSES: usize = 3;

/// 模糊渲染参数
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlurConfig {
  /// 每侧外扩的比例（相对于边界框的宽或高）
  pub padding_ratio: f32,
  /// 高斯模糊的标准差（像素）
  pub sigma: f32,
  /// 模糊重复次数
  pub passes: usize,
}

impl Default for BlurConfig {
  fn default() -> Self {
    Self {
      padding_ratio: DEFAULT_PADDING_RATIO,
      sigma: DEFAULT_BLUR_SIGMA,
      passes: DEFAULT_BLUR_PASSES,
    }
  }
}

impl BlurConfig {
  pub fn padding_ratio(mut self, ratio: f32) -> Self {
    self.padding_ratio = ratio;
    self
  }

  pub fn sigma(mut self, sigma: f32) -> Self {
    self.sigma = sigma;
    self
  }

  pub fn passes(mut self, passes: usize) -> Self {
    self.passes = passes;
    self
  }
}

/// 示例图像中用于匹配的人脸集合
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExampleFaces {
  /// 示例图像中的全部人脸
  #[default]
  All,
  /// 仅最显著的一张人脸
  Prominent,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnonymizerConfig {
  pub match_threshold: f32,
  pub call_timeout: Duration,
  pub load_timeout: Duration,
  pub example_faces: ExampleFaces,
  pub blur: BlurConfig,
}

impl Default for AnonymizerConfig {
  fn default() -> Self {
    Self {
      match_threshold: DEFAULT_MATCH_THRESHOLD,
      call_timeout: DEFAULT_CALL_TIMEOUT,
      load_timeout: DEFAULT_CALL_TIMEOUT,
      example_faces: ExampleFaces::default(),
      blur: BlurConfig::default(),
    }
  }
}

impl AnonymizerConfig {
  pub fn match_threshold(mut self, threshold: f32) -> Self {
    self.match_threshold = threshold;
    self
  }

  pub fn call_timeout(mut self, timeout: Duration) -> Self {
    self.call_timeout = timeout;
    self
  }

  pub fn load_timeout(mut self, timeout: Duration) -> Self {
    self.load_timeout = timeout;
    self
  }

  pub fn example_faces(mut self, faces: ExampleFaces) -> Self {
    self.example_faces = faces;
    self
  }

  pub fn blur(mut self, blur: BlurConfig) -> Self {
    self.blur = blur;
    self
  }
}
