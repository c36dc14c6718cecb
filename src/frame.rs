// 该文件是 Aycromo 项目的一部分。
// src/frame.rs - 张量定义
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

pub const RGB_CHANNELS: usize = 3;
/// 检测器输入宽度
pub const DETECTOR_INPUT_W: u32 = 640;
/// 检测器输入高度
pub const DETECTOR_INPUT_H: u32 = 640;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorShapeError {
  #[error("数据长度不匹配: 形状 {shape:?} 需要 {expected} 个元素, 实际为 {actual}")]
  LengthMismatch {
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
}

/// 连续存储的 f32 张量，`data.len()` 恒等于各维度之积
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  data: Box<[f32]>,
  shape: Box<[usize]>,
}

impl Tensor {
  pub fn zeros(shape: &[usize]) -> Self {
    let size = shape.iter().product();
    Self {
      data: vec![0.0f32; size].into_boxed_slice(),
      shape: shape.into(),
    }
  }

  pub fn from_parts(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, TensorShapeError> {
    let expected: usize = shape.iter().product();
    if data.len() != expected {
      return Err(TensorShapeError::LengthMismatch {
        shape,
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      data: data.into_boxed_slice(),
      shape: shape.into_boxed_slice(),
    })
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn len(&self) -> usize {
    self.data.len()
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn as_slice(&self) -> &[f32] {
    &self.data
  }

  pub fn into_data(self) -> Vec<f32> {
    self.data.into_vec()
  }
}

impl AsRef<[f32]> for Tensor {
  fn as_ref(&self) -> &[f32] {
    &self.data
  }
}

impl AsMut<[f32]> for Tensor {
  fn as_mut(&mut self) -> &mut [f32] {
    &mut self.data
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn zeros_matches_shape_product() {
    let tensor = Tensor::zeros(&[1, 3, 4, 5]);
    assert_eq!(tensor.len(), 60);
    assert_eq!(tensor.shape(), &[1, 3, 4, 5]);
    assert!(tensor.as_slice().iter().all(|&v| v == 0.0));
  }

  #[test]
  fn from_parts_rejects_length_mismatch() {
    let err = Tensor::from_parts(vec![1, 5, 2], vec![0.0; 9]).unwrap_err();
    assert_eq!(
      err,
      TensorShapeError::LengthMismatch {
        shape: vec![1, 5, 2],
        expected: 10,
        actual: 9,
      }
    );
  }

  #[test]
  fn zero_sized_dimension_is_empty() {
    let tensor = Tensor::from_parts(vec![1, 5, 0], Vec::new()).unwrap();
    assert!(tensor.is_empty());
    assert_eq!(tensor.shape(), &[1, 5, 0]);
  }
}
