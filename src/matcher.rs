// 该文件是 Mengmian （蒙面） 项目的一部分。
// src/matcher.rs - 人脸特征匹配
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

use crate::model::{Descriptor, Detection};

/// 默认匹配阈值。历史上也用过 0.6。
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.5;

pub fn euclidean_distance(a: &Descriptor, b: &Descriptor) -> f32 {
  a.as_slice()
    .iter()
    .zip(b.as_slice())
    .map(|(x, y)| (x - y) * (x - y))
    .sum::<f32>()
    .sqrt()
}

/// 任一示例特征与候选特征距离小于阈值即视为同一人。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matcher {
  threshold: f32,
}

impl Default for Matcher {
  fn default() -> Self {
    Self::new(DEFAULT_MATCH_THRESHOLD)
  }
}

impl Matcher {
  pub fn new(threshold: f32) -> Self {
    Self { threshold }
  }

  pub fn threshold(&self) -> f32 {
    self.threshold
  }

  pub fn is_match(&self, candidate: &Descriptor, examples: &[Descriptor]) -> bool {
    examples
      .iter()
      .any(|example| euclidean_distance(example, candidate) < self.threshold)
  }

  pub fn filter(&self, candidates: Vec<Detection>, examples: &[Descriptor]) -> Vec<Detection> {
    candidates
      .into_iter()
      .filter(|candidate| self.is_match(&candidate.descriptor, examples))
      .collect()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BoundingBox, DESCRIPTOR_LEN};

  /// 只在第一维取值的特征，两两距离即为取值之差
  fn axis(v: f32) -> Descriptor {
    let mut values = [0.0; DESCRIPTOR_LEN];
    values[0] = v;
    Descriptor::new(values)
  }

  fn face(v: f32) -> Detection {
    Detection::new(BoundingBox::new(0.0, 0.0, 4.0, 4.0), 0.9, axis(v))
  }

  #[test]
  fn distance_is_euclidean_and_symmetric() {
    let mut a = [0.0; DESCRIPTOR_LEN];
    let mut b = [0.0; DESCRIPTOR_LEN];
    a[0] = 3.0;
    b[1] = 4.0;
    let (a, b) = (Descriptor::new(a), Descriptor::new(b));
    assert!((euclidean_distance(&a, &b) - 5.0).abs() < 1e-6);
    assert_eq!(euclidean_distance(&a, &b), euclidean_distance(&b, &a));
    assert_eq!(euclidean_distance(&a, &a), 0.0);
  }

  #[test]
  fn any_single_close_example_is_enough() {
    // 候选与第一个示例相距 0.4，与第二个相距 0.9
    let examples = [axis(0.0), axis(1.3)];
    let candidate = axis(0.4);
    assert!(Matcher::new(0.5).is_match(&candidate, &examples));
  }

  #[test]
  fn threshold_is_strict() {
    let examples = [axis(0.0)];
    assert!(!Matcher::new(0.5).is_match(&axis(0.5), &examples));
    assert!(Matcher::new(0.5).is_match(&axis(0.49), &examples));
  }

  #[test]
  fn no_examples_never_match() {
    assert!(!Matcher::default().is_match(&axis(0.0), &[]));
  }

  #[test]
  fn match_set_grows_with_threshold() {
    let examples = [axis(0.0), axis(2.0)];
    let candidates: Vec<Detection> = (0..40).map(|i| face(i as f32 * 0.1)).collect();

    let mut previous: Vec<Detection> = Vec::new();
    for step in 0..30 {
      let threshold = step as f32 * 0.05;
      let current = Matcher::new(threshold).filter(candidates.clone(), &examples);
      for kept in &previous {
        assert!(current.contains(kept), "阈值 {threshold} 下丢失了已有匹配");
      }
      previous = current;
    }
  }
}
