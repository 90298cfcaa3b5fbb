// 该文件是 Mengmian （蒙面） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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

use super::BoundingBox;

/// 对 (边界框, 置信度) 候选做非极大值抑制，结果按置信度降序排列
pub fn non_max_suppression(
  mut candidates: Vec<(BoundingBox, f32)>,
  iou_threshold: f32,
) -> Vec<(BoundingBox, f32)> {
  // 按置信度降序排序
  candidates.sort_by(|a, b| b.1.total_cmp(&a.1));

  let mut result: Vec<(BoundingBox, f32)> = Vec::new();
  for candidate in candidates {
    let suppressed = result
      .iter()
      .any(|(kept, _)| kept.iou(&candidate.0) >= iou_threshold);
    if !suppressed {
      result.push(candidate);
    }
  }

  result
}
