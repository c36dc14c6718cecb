// 该文件是 Aycromo 项目的一部分。
// src/input/read_image_file.rs - 图像文件读取与预处理
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

use std::path::{Path, PathBuf};

use image::{DynamicImage, ImageReader, imageops::FilterType};
use thiserror::Error;
use tracing::debug;

use crate::frame::{DETECTOR_INPUT_H, DETECTOR_INPUT_W, RGB_CHANNELS, Tensor};

#[derive(Error, Debug)]
pub enum ImageDecodeError {
  #[error("无法读取图像文件 {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("无法解码图像 {path}: {source}")]
  Decode {
    path: PathBuf,
    #[source]
    source: image::ImageError,
  },
}

/// 读取图像文件并转换为检测器输入张量 `[1, 3, 640, 640]`
///
/// 图像被直接拉伸到 640x640（不保持宽高比），丢弃 alpha 通道，
/// 像素值除以 255 归一化到 [0, 1]，按 NCHW 平面布局存储。
pub fn prepare<P: AsRef<Path>>(path: P) -> Result<Tensor, ImageDecodeError> {
  let path = path.as_ref();
  let io_error = |source| ImageDecodeError::Io {
    path: path.to_path_buf(),
    source,
  };

  let image = ImageReader::open(path)
    .map_err(io_error)?
    .with_guessed_format()
    .map_err(io_error)?
    .decode()
    .map_err(|source| ImageDecodeError::Decode {
      path: path.to_path_buf(),
      source,
    })?;

  debug!(
    "读取图像 {}: {}x{}",
    path.display(),
    image.width(),
    image.height()
  );

  Ok(image_to_tensor(&image))
}

/// 将已解码图像转换为 NCHW 张量
pub fn image_to_tensor(image: &DynamicImage) -> Tensor {
  let resized = image
    .resize_exact(DETECTOR_INPUT_W, DETECTOR_INPUT_H, FilterType::Triangle)
    .to_rgb8();

  let width = DETECTOR_INPUT_W as usize;
  let height = DETECTOR_INPUT_H as usize;
  let plane = width * height;

  let mut tensor = Tensor::zeros(&[1, RGB_CHANNELS, height, width]);
  let slice = tensor.as_mut();

  for (x, y, pixel) in resized.enumerate_pixels() {
    let index = (y as usize) * width + (x as usize);
    for c in 0..RGB_CHANNELS {
      slice[c * plane + index] = f32::from(pixel[c]) / 255.0;
    }
  }

  tensor
}
