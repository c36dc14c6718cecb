// 该文件是 Aycromo 项目的一部分。
// src/script/payload.rs - 外部脚本 JSON 负载解析
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

use std::path::PathBuf;

use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::{
  benchmark::{BenchmarkMetrics, MetricsOutcome},
  model::{BatchResult, DetectionBox, ImageResult, image_key},
  script::ScriptError,
};

#[derive(Debug, Deserialize)]
struct ImageEntry {
  #[serde(default)]
  count: Option<usize>,
  #[serde(default)]
  status: Option<String>,
  #[serde(default)]
  error: Option<String>,
  #[serde(default, alias = "details")]
  boxes: Vec<BoxEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BoxEntry {
  Object {
    #[serde(alias = "x1")]
    x: f32,
    #[serde(alias = "y1")]
    y: f32,
    w: f32,
    h: f32,
    #[serde(default = "full_score", alias = "conf")]
    score: f32,
  },
  Corners([f32; 4]),
}

fn full_score() -> f32 {
  1.0
}

impl From<BoxEntry> for DetectionBox {
  fn from(entry: BoxEntry) -> Self {
    match entry {
      BoxEntry::Object { x, y, w, h, score } => DetectionBox { x, y, w, h, score },
      BoxEntry::Corners([x1, y1, x2, y2]) => DetectionBox {
        x: x1,
        y: y1,
        w: x2 - x1,
        h: y2 - y1,
        score: 1.0,
      },
    }
  }
}

fn reported_error(payload: &Value) -> Option<String> {
  payload
    .get("error")
    .map(|e| e.as_str().map(str::to_string).unwrap_or_else(|| e.to_string()))
}

/// 将检测脚本输出转换为批结果，结果覆盖且仅覆盖输入的图像列表
pub fn decode_batch(payload: &Value, images: &[PathBuf]) -> Result<BatchResult, ScriptError> {
  let object = payload
    .as_object()
    .ok_or_else(|| ScriptError::malformed("检测输出不是 JSON 对象", payload.to_string()))?;

  let mut batch = BatchResult::default();
  for image in images {
    let key = image_key(image);
    let Some(entry) = object.get(&key) else {
      if let Some(message) = reported_error(payload) {
        return Err(ScriptError::Reported(message));
      }
      warn!("脚本输出中缺少图像 {}", key);
      batch.insert(ImageResult::failed(key, "脚本输出中缺少该图像"));
      continue;
    };

    let entry = ImageEntry::deserialize(entry)
      .map_err(|e| ScriptError::malformed(format!("{}: {}", key, e), payload.to_string()))?;

    let failure = entry.error.or_else(|| {
      entry
        .status
        .filter(|status| status != "success")
        .map(|status| format!("脚本返回状态 {}", status))
    });

    let result = match failure {
      Some(message) => ImageResult::failed(key, message),
      None => {
        let boxes: Vec<DetectionBox> = entry.boxes.into_iter().map(Into::into).collect();
        let mut result = ImageResult::success(key, boxes);
        if let Some(count) = entry.count {
          result.count = count;
        }
        result
      }
    };
    batch.insert(result);
  }

  Ok(batch)
}

#[derive(Debug, Deserialize)]
struct MetricsEntry {
  map50: f64,
  #[serde(default)]
  map5095: Option<f64>,
  precision: f64,
  recall: f64,
  #[serde(default)]
  speed: Option<f64>,
}

/// 将评估脚本输出转换为单模型指标；脚本自报的错误作为软失败返回
pub fn decode_metrics(payload: &Value, model_id: &str) -> Result<MetricsOutcome, ScriptError> {
  if let Some(message) = reported_error(payload) {
    return Ok(MetricsOutcome::Failed { error: message });
  }

  let entry = MetricsEntry::deserialize(payload)
    .map_err(|e| ScriptError::malformed(e.to_string(), payload.to_string()))?;

  if !(0.0..=1.0).contains(&entry.map50) {
    return Err(ScriptError::malformed(
      format!("map50 超出 [0, 1]: {}", entry.map50),
      payload.to_string(),
    ));
  }

  Ok(MetricsOutcome::Measured(BenchmarkMetrics {
    model_id: model_id.to_string(),
    map50: entry.map50,
    map5095: entry.map5095,
    precision: entry.precision,
    recall: entry.recall,
    avg_latency_ms: entry.speed.unwrap_or(0.0),
  }))
}
