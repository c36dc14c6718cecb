// 该文件是 Aycromo 项目的一部分。
// src/benchmark.rs - 模型评估与吞吐量测试
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

use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  input::{ListFilesError, list_images},
  model::{BatchDetector, BatchResult, DatasetReference, ModelReference},
  task::CancellationToken,
};

/// 单个模型在数据集上的评估指标
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkMetrics {
  pub model_id: String,
  pub map50: f64,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub map5095: Option<f64>,
  pub precision: f64,
  pub recall: f64,
  pub avg_latency_ms: f64,
}

/// 评估结果: 成功的指标，或不中断整体流程的软失败
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricsOutcome {
  Measured(BenchmarkMetrics),
  Failed { error: String },
}

/// 指标来源，由调度器或测试替身实现
pub trait MetricsSource {
  fn measure(
    &self,
    model: &ModelReference,
    dataset_root: &Path,
    cancel: &CancellationToken,
  ) -> MetricsOutcome;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelFailure {
  pub model_id: String,
  pub error: String,
}

/// 多模型对比结果，`ranking` 按 map50 降序排列
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
  pub ranking: Vec<BenchmarkMetrics>,
  pub failures: Vec<ModelFailure>,
}

#[derive(Error, Debug)]
pub enum BenchmarkError {
  #[error("不支持远程数据集: {0}")]
  UnsupportedDataset(String),
  #[error("数据集中没有可用的图像: {0}")]
  NoImages(String),
  #[error("测得的耗时为 0，无法计算吞吐量")]
  ZeroElapsed,
  #[error("列出数据集图像失败: {0}")]
  ListFiles(#[from] ListFilesError),
  #[error("推理失败: {0}")]
  Inference(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("任务已取消")]
  Cancelled,
}

fn local_root(
  dataset: &DatasetReference,
  base: Option<&Path>,
) -> Result<std::path::PathBuf, BenchmarkError> {
  dataset.local_root(base).ok_or_else(|| {
    warn!("拒绝远程数据集 {} ({})", dataset.id, dataset.root_path);
    BenchmarkError::UnsupportedDataset(dataset.root_path.clone())
  })
}

/// 依次评估每个模型，单个模型失败不会中断整体流程
pub fn compare_models<S: MetricsSource + ?Sized>(
  source: &S,
  models: &[ModelReference],
  dataset: &DatasetReference,
  base: Option<&Path>,
  cancel: &CancellationToken,
) -> Result<Comparison, BenchmarkError> {
  let root = local_root(dataset, base)?;

  let mut comparison = Comparison::default();
  for (index, model) in models.iter().enumerate() {
    if cancel.is_cancelled() {
      warn!("对比被取消，已完成 {} / {} 个模型", index, models.len());
      return Err(BenchmarkError::Cancelled);
    }

    info!("({}/{}) 评估模型 {}", index + 1, models.len(), model.id());
    let now = Instant::now();
    match source.measure(model, &root, cancel) {
      MetricsOutcome::Measured(metrics) => {
        info!(
          "模型 {} 评估完成: mAP50 = {:.4}，耗时 {:.2?}",
          model.id(),
          metrics.map50,
          now.elapsed()
        );
        comparison.ranking.push(metrics);
      }
      MetricsOutcome::Failed { error } => {
        warn!("模型 {} 评估失败: {}", model.id(), error);
        comparison.failures.push(ModelFailure {
          model_id: model.id().to_string(),
          error,
        });
      }
    }
  }

  comparison
    .ranking
    .sort_by(|a, b| b.map50.total_cmp(&a.map50));
  Ok(comparison)
}

/// 单模型吞吐量报告
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputReport {
  pub model_id: String,
  pub dataset_id: String,
  pub image_count: usize,
  pub elapsed_ms: f64,
  pub fps: f64,
  pub avg_latency_ms: f64,
  pub total_detections: usize,
  pub failed_images: usize,
}

impl ThroughputReport {
  pub fn from_batch(
    model_id: &str,
    dataset_id: &str,
    image_count: usize,
    elapsed: Duration,
    batch: &BatchResult,
  ) -> Result<Self, BenchmarkError> {
    if image_count == 0 {
      return Err(BenchmarkError::NoImages(dataset_id.to_string()));
    }
    if elapsed.is_zero() {
      return Err(BenchmarkError::ZeroElapsed);
    }

    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    Ok(Self {
      model_id: model_id.to_string(),
      dataset_id: dataset_id.to_string(),
      image_count,
      elapsed_ms,
      fps: image_count as f64 / elapsed.as_secs_f64(),
      avg_latency_ms: elapsed_ms / image_count as f64,
      total_detections: batch.total_count(),
      failed_images: batch.failed_count(),
    })
  }
}

/// 对数据集目录中的全部图像计时执行一次批量推理
pub fn throughput<D>(
  detector: &D,
  model: &ModelReference,
  dataset: &DatasetReference,
  base: Option<&Path>,
  cancel: &CancellationToken,
) -> Result<ThroughputReport, BenchmarkError>
where
  D: BatchDetector + ?Sized,
  D::Error: std::error::Error + Send + Sync + 'static,
{
  let root = local_root(dataset, base)?;
  let images = list_images(&root)?;
  if images.is_empty() {
    return Err(BenchmarkError::NoImages(dataset.id.clone()));
  }

  info!("吞吐量测试: {} 张图像", images.len());
  let now = Instant::now();
  let batch = detector
    .detect_batch(model, &images, cancel)
    .map_err(|e| BenchmarkError::Inference(Box::new(e)))?;
  let elapsed = now.elapsed();

  let report = ThroughputReport::from_batch(model.id(), &dataset.id, images.len(), elapsed, &batch)?;
  info!(
    "吞吐量: {:.2} FPS，平均延迟 {:.2} ms",
    report.fps, report.avg_latency_ms
  );
  Ok(report)
}
