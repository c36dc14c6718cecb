// 该文件是 Aycromo 项目的一部分。
// src/model/onnx.rs - ONNX 进程内推理引擎
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

use ort::{
  inputs,
  session::{Session, builder::GraphOptimizationLevel},
  value::Tensor as OrtTensor,
};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  frame::{DETECTOR_INPUT_H, DETECTOR_INPUT_W, RGB_CHANNELS, Tensor, TensorShapeError},
  input::{ImageDecodeError, prepare},
  model::{
    BatchResult, DecodeError, DetectionBox, DetectionParams, ImageResult, decode, image_key,
    suppress,
  },
  task::CancellationToken,
};

const DEFAULT_INTRA_THREADS: usize = 4;

#[derive(Error, Debug)]
pub enum TensorEngineError {
  #[error("模型加载错误: {path}: {reason}")]
  ModelLoad { path: PathBuf, reason: String },
  #[error("图像预处理失败: {0}")]
  Prepare(#[from] ImageDecodeError),
  #[error("模型推理错误: {0}")]
  Inference(#[from] ort::Error),
  #[error("模型输出无效: {0}")]
  Decode(#[from] DecodeError),
  #[error("模型输出形状无效: {0}")]
  Shape(#[from] TensorShapeError),
  #[error("任务已取消")]
  Cancelled,
}

impl TensorEngineError {
  fn load(path: &Path, reason: impl ToString) -> Self {
    TensorEngineError::ModelLoad {
      path: path.to_path_buf(),
      reason: reason.to_string(),
    }
  }
}

/// 进程内 ONNX 推理引擎
///
/// 每次 `run_batch` 加载一次模型，会话在调用返回时释放。
#[derive(Debug, Clone)]
pub struct TensorEngine {
  params: DetectionParams,
  intra_threads: usize,
}

impl TensorEngine {
  pub fn new(params: DetectionParams) -> Self {
    Self {
      params,
      intra_threads: DEFAULT_INTRA_THREADS,
    }
  }

  pub fn with_intra_threads(mut self, intra_threads: usize) -> Self {
    self.intra_threads = intra_threads.max(1);
    self
  }

  pub fn params(&self) -> DetectionParams {
    self.params
  }

  pub fn run_batch(
    &self,
    model_path: &Path,
    images: &[PathBuf],
    cancel: &CancellationToken,
  ) -> Result<BatchResult, TensorEngineError> {
    self.run_with(|| self.load_session(model_path), images, cancel)
  }

  /// 加载一次模型后按顺序处理全部图像
  ///
  /// 单张图像的预处理、前向或解码失败只记录在该图像的结果中；
  /// 模型加载失败与取消会终止整个批次。
  fn run_with<M, L>(
    &self,
    load: L,
    images: &[PathBuf],
    cancel: &CancellationToken,
  ) -> Result<BatchResult, TensorEngineError>
  where
    M: ForwardPass,
    L: FnOnce() -> Result<M, TensorEngineError>,
  {
    let mut model = load()?;
    let mut batch = BatchResult::default();

    for image in images {
      if cancel.is_cancelled() {
        warn!("推理被取消，已处理 {} / {} 张图像", batch.len(), images.len());
        return Err(TensorEngineError::Cancelled);
      }

      let key = image_key(image);
      let now = std::time::Instant::now();
      let result = match self.detect_image(&mut model, image) {
        Ok(boxes) => {
          debug!(
            "{}: 检测到 {} 个目标，耗时 {:.2?}",
            key,
            boxes.len(),
            now.elapsed()
          );
          ImageResult::success(key, boxes)
        }
        Err(e) => {
          warn!("图像 {} 处理失败，跳过: {}", key, e);
          ImageResult::failed(key, e.to_string())
        }
      };
      batch.insert(result);
    }

    Ok(batch)
  }

  fn detect_image<M: ForwardPass>(
    &self,
    model: &mut M,
    image: &Path,
  ) -> Result<Vec<DetectionBox>, TensorEngineError> {
    let input = prepare(image)?;
    let output = model.forward(input)?;
    let candidates = decode(&output, self.params.score_threshold)?;
    Ok(suppress(&candidates, self.params.iou_threshold))
  }

  fn load_session(&self, model_path: &Path) -> Result<Session, TensorEngineError> {
    if !model_path.is_file() {
      return Err(TensorEngineError::load(model_path, "模型文件不存在"));
    }

    info!("加载 ONNX 模型: {}", model_path.display());
    let now = std::time::Instant::now();
    let session = build_session(model_path, self.intra_threads)
      .map_err(|e| TensorEngineError::load(model_path, e))?;
    info!("模型加载完成，耗时 {:.2?}", now.elapsed());

    Ok(session)
  }
}

/// 一次前向推理: `[1, 3, 640, 640]` 输入到 `[1, 5, N]` 输出
trait ForwardPass {
  fn forward(&mut self, input: Tensor) -> Result<Tensor, TensorEngineError>;
}

impl ForwardPass for Session {
  fn forward(&mut self, input: Tensor) -> Result<Tensor, TensorEngineError> {
    let shape = [
      1,
      RGB_CHANNELS,
      DETECTOR_INPUT_H as usize,
      DETECTOR_INPUT_W as usize,
    ];
    let input = OrtTensor::from_array((shape, input.into_data()))?;
    let outputs = self.run(inputs![input])?;

    let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;
    let shape: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
    debug!("模型输出形状: {:?}", shape);

    Ok(Tensor::from_parts(shape, data.to_vec())?)
  }
}

fn build_session(model_path: &Path, intra_threads: usize) -> Result<Session, ort::Error> {
  let session = Session::builder()?
    .with_optimization_level(GraphOptimizationLevel::Level3)?
    .with_intra_threads(intra_threads)?
    .commit_from_file(model_path)?;
  Ok(session)
}
