// 该文件是 Aycromo 项目的一部分。
// src/model/decode.rs - 检测输出解码
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

use thiserror::Error;
use tracing::debug;

use crate::{frame::Tensor, model::DetectionBox};

/// 输出行数: [cx, cy, w, h, score]
pub const DETECTION_ROWS: usize = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
  #[error("检测输出形状无效: 期望 [1, 5, N], 实际为 {0:?}")]
  UnexpectedShape(Vec<usize>),
}

/// 将 `[1, 5, N]` 检测输出解码为候选框
///
/// 分数严格大于 `score_threshold` 的候选才会保留；中心坐标转换为左上角坐标。
/// 结果未排序，也不做重叠抑制。
pub fn decode(output: &Tensor, score_threshold: f32) -> Result<Vec<DetectionBox>, DecodeError> {
  let n = match output.shape() {
    [1, DETECTION_ROWS, n] => *n,
    shape => return Err(DecodeError::UnexpectedShape(shape.to_vec())),
  };

  let data = output.as_slice();
  let row = |r: usize| &data[r * n..(r + 1) * n];
  let (cx, cy, w, h, score) = (row(0), row(1), row(2), row(3), row(4));

  let boxes: Vec<_> = (0..n)
    .filter(|&i| score[i] > score_threshold)
    .map(|i| DetectionBox {
      x: cx[i] - w[i] / 2.0,
      y: cy[i] - h[i] / 2.0,
      w: w[i],
      h: h[i],
      score: score[i],
    })
    .collect();

  debug!("{} 个候选中 {} 个超过阈值 {}", n, boxes.len(), score_threshold);
  Ok(boxes)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn tensor(rows: [&[f32]; 5]) -> Tensor {
    let n = rows[0].len();
    let data = rows.iter().flat_map(|r| r.iter().copied()).collect();
    Tensor::from_parts(vec![1, 5, n], data).unwrap()
  }

  #[test]
  fn keeps_candidates_above_threshold() {
    let output = tensor([
      &[100.0, 200.0, 300.0],
      &[50.0, 60.0, 70.0],
      &[20.0, 20.0, 40.0],
      &[10.0, 10.0, 30.0],
      &[0.9, 0.3, 0.6],
    ]);

    let boxes = decode(&output, 0.5).unwrap();
    assert_eq!(boxes.len(), 2);
    assert_eq!(
      boxes[0],
      DetectionBox {
        x: 90.0,
        y: 45.0,
        w: 20.0,
        h: 10.0,
        score: 0.9
      }
    );
    assert_eq!(boxes[1].score, 0.6);
    assert_eq!((boxes[1].x, boxes[1].y), (280.0, 55.0));
  }

  #[test]
  fn threshold_is_strict() {
    let output = tensor([&[1.0], &[1.0], &[1.0], &[1.0], &[0.5]]);
    assert!(decode(&output, 0.5).unwrap().is_empty());
    assert_eq!(decode(&output, 0.49).unwrap().len(), 1);
  }

  #[test]
  fn empty_anchor_set_is_not_an_error() {
    let output = Tensor::from_parts(vec![1, 5, 0], Vec::new()).unwrap();
    assert!(decode(&output, 0.5).unwrap().is_empty());
  }

  #[test]
  fn raising_threshold_never_adds_candidates() {
    let scores: Vec<f32> = (0..50).map(|i| (i as f32 * 0.37).fract()).collect();
    let ones = vec![1.0f32; scores.len()];
    let output = tensor([&ones, &ones, &ones, &ones, &scores]);

    let mut previous = usize::MAX;
    for step in 0..=20 {
      let count = decode(&output, step as f32 / 20.0).unwrap().len();
      assert!(count <= previous);
      previous = count;
    }
  }

  #[test]
  fn rejects_unexpected_shape() {
    let output = Tensor::from_parts(vec![1, 6, 2], vec![0.0; 12]).unwrap();
    assert_eq!(
      decode(&output, 0.5),
      Err(DecodeError::UnexpectedShape(vec![1, 6, 2]))
    );
  }
}
