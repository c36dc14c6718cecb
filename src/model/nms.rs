// 该文件是 Aycromo 项目的一部分。
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

use tracing::debug;

use crate::model::DetectionBox;

/// 计算两个边界框的 IoU，并集为 0 时返回 0
pub fn iou(a: &DetectionBox, b: &DetectionBox) -> f32 {
  let x1 = a.x.max(b.x);
  let y1 = a.y.max(b.y);
  let x2 = (a.x + a.w).min(b.x + b.w);
  let y2 = (a.y + a.h).min(b.y + b.h);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let union = a.area() + b.area() - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 贪心 NMS
///
/// 按分数降序（稳定排序，同分保持输入顺序）依次保留最高分框，
/// 并移除与其 IoU `>= iou_threshold` 的剩余框。输入不会被修改。
pub fn suppress(boxes: &[DetectionBox], iou_threshold: f32) -> Vec<DetectionBox> {
  let mut candidates = boxes.to_vec();
  candidates.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut suppressed = vec![false; candidates.len()];
  let mut kept = Vec::new();

  for i in 0..candidates.len() {
    if suppressed[i] {
      continue;
    }
    let best = candidates[i];
    kept.push(best);

    for j in (i + 1)..candidates.len() {
      if !suppressed[j] && iou(&best, &candidates[j]) >= iou_threshold {
        suppressed[j] = true;
      }
    }
  }

  debug!("NMS: {} -> {}", boxes.len(), kept.len());
  kept
}
