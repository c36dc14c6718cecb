// 该文件是 Aycromo 项目的一部分。
// src/output/console.rs - 控制台输出
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

use std::fmt::Write as _;
use std::io::Write;

use crate::{
  FromUrl, FromUrlWithScheme,
  benchmark::{Comparison, ThroughputReport},
  model::{BatchResult, DatasetReference, ImageStatus, ModelReference},
  output::{OutputError, Render},
};

/// 以表格形式打印到标准输出
#[derive(Debug, Clone, Copy, Default)]
pub struct ConsoleOutput;

impl FromUrlWithScheme for ConsoleOutput {
  const SCHEME: &'static str = "console";
}

impl FromUrl for ConsoleOutput {
  type Error = OutputError;

  fn from_url(url: &url::Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch);
    }
    Ok(ConsoleOutput)
  }
}

fn write_stdout(text: &str) -> std::io::Result<()> {
  let mut stdout = std::io::stdout().lock();
  stdout.write_all(text.as_bytes())?;
  stdout.flush()
}

pub(crate) fn format_batch(model: &ModelReference, batch: &BatchResult) -> String {
  let mut text = String::new();
  let _ = writeln!(text, "模型: {} ({})", model.display_name(), model.id());
  for result in batch.iter() {
    match &result.status {
      ImageStatus::Success => {
        let _ = writeln!(text, "  {}: {} 条染色体", result.image_path, result.count);
        for b in &result.boxes {
          let _ = writeln!(
            text,
            "    - {:.2}% at ({:.0}, {:.0}, {:.0}x{:.0})",
            b.score * 100.0,
            b.x,
            b.y,
            b.w,
            b.h
          );
        }
      }
      ImageStatus::Error { message } => {
        let _ = writeln!(text, "  {}: 错误: {}", result.image_path, message);
      }
    }
  }
  let _ = writeln!(
    text,
    "共 {} 张图像，检测到 {} 条染色体，失败 {} 张",
    batch.len(),
    batch.total_count(),
    batch.failed_count()
  );
  text
}

pub(crate) fn format_comparison(dataset: &DatasetReference, comparison: &Comparison) -> String {
  let mut text = String::new();
  let _ = writeln!(text, "数据集: {} ({})", dataset.display_name, dataset.id);
  let _ = writeln!(
    text,
    "{:<4} {:<24} {:>8} {:>10} {:>10} {:>8} {:>12}",
    "排名", "模型", "mAP50", "mAP50-95", "Precision", "Recall", "延迟(ms)"
  );
  for (rank, m) in comparison.ranking.iter().enumerate() {
    let map5095 = m
      .map5095
      .map(|v| format!("{:.4}", v))
      .unwrap_or_else(|| "-".to_string());
    let _ = writeln!(
      text,
      "{:<4} {:<24} {:>8.4} {:>10} {:>10.4} {:>8.4} {:>12.2}",
      rank + 1,
      m.model_id,
      m.map50,
      map5095,
      m.precision,
      m.recall,
      m.avg_latency_ms
    );
  }
  for failure in &comparison.failures {
    let _ = writeln!(text, "失败: {}: {}", failure.model_id, failure.error);
  }
  text
}

pub(crate) fn format_throughput(model: &ModelReference, report: &ThroughputReport) -> String {
  let mut text = String::new();
  let _ = writeln!(text, "模型: {} ({})", model.display_name(), model.id());
  let _ = writeln!(text, "数据集: {}", report.dataset_id);
  let _ = writeln!(text, "图像数: {}", report.image_count);
  let _ = writeln!(text, "总耗时: {:.2} ms", report.elapsed_ms);
  let _ = writeln!(text, "FPS: {:.2}", report.fps);
  let _ = writeln!(text, "平均延迟: {:.2} ms", report.avg_latency_ms);
  let _ = writeln!(text, "检测总数: {}", report.total_detections);
  if report.failed_images > 0 {
    let _ = writeln!(text, "失败图像: {}", report.failed_images);
  }
  text
}

impl Render<ModelReference, BatchResult> for ConsoleOutput {
  type Error = std::io::Error;

  fn render_result(&self, model: &ModelReference, batch: &BatchResult) -> Result<(), Self::Error> {
    write_stdout(&format_batch(model, batch))
  }
}

impl Render<DatasetReference, Comparison> for ConsoleOutput {
  type Error = std::io::Error;

  fn render_result(
    &self,
    dataset: &DatasetReference,
    comparison: &Comparison,
  ) -> Result<(), Self::Error> {
    write_stdout(&format_comparison(dataset, comparison))
  }
}

impl Render<ModelReference, ThroughputReport> for ConsoleOutput {
  type Error = std::io::Error;

  fn render_result(
    &self,
    model: &ModelReference,
    report: &ThroughputReport,
  ) -> Result<(), Self::Error> {
    write_stdout(&format_throughput(model, report))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::benchmark::{BenchmarkMetrics, ModelFailure};
  use crate::model::{DetectionBox, ImageResult};

  #[test]
  fn batch_summary_lists_errors() {
    let mut batch = BatchResult::default();
    let b = DetectionBox {
      x: 1.0,
      y: 2.0,
      w: 3.0,
      h: 4.0,
      score: 0.5,
    };
    batch.insert(ImageResult::success("a.jpg", vec![b]));
    batch.insert(ImageResult::failed("b.jpg", "Arquivo não encontrado"));
    let text = format_batch(&ModelReference::from_artifact("best.pt"), &batch);
    assert!(text.contains("a.jpg: 1 条染色体"));
    assert!(text.contains("50.00% at (1, 2, 3x4)"));
    assert!(text.contains("b.jpg: 错误: Arquivo não encontrado"));
    assert!(text.contains("共 2 张图像，检测到 1 条染色体，失败 1 张"));
  }

  #[test]
  fn comparison_table_keeps_ranking_order() {
    let metrics = |id: &str, map50| BenchmarkMetrics {
      model_id: id.to_string(),
      map50,
      map5095: None,
      precision: 0.5,
      recall: 0.5,
      avg_latency_ms: 1.0,
    };
    let comparison = Comparison {
      ranking: vec![metrics("first", 0.9), metrics("second", 0.4)],
      failures: vec![ModelFailure {
        model_id: "broken".to_string(),
        error: "boom".to_string(),
      }],
    };
    let text = format_comparison(&DatasetReference::parse("/data"), &comparison);
    let first = text.find("first").unwrap();
    let second = text.find("second").unwrap();
    assert!(first < second);
    assert!(text.contains("失败: broken: boom"));
  }
}
