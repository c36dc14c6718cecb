// 该文件是 Aycromo 项目的一部分。
// src/model.rs - 模型与检测结果定义
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

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::{FromUrl, input::resolve_dataset_path, task::CancellationToken};

pub const DEFAULT_SCORE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
/// 表示“使用脚本自带默认模型”的占位路径
pub const DEFAULT_ARTIFACT_SENTINEL: &str = "default";

/// 批量检测接口，由调度器或测试替身实现
pub trait BatchDetector {
  type Error;

  fn detect_batch(
    &self,
    model: &ModelReference,
    images: &[PathBuf],
    cancel: &CancellationToken,
  ) -> Result<BatchResult, Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionParams {
  pub score_threshold: f32,
  pub iou_threshold: f32,
}

impl Default for DetectionParams {
  fn default() -> Self {
    Self {
      score_threshold: DEFAULT_SCORE_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
    }
  }
}

/// 检测框，坐标位于预处理后 (640x640) 的图像空间，(x, y) 为左上角
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DetectionBox {
  pub x: f32,
  pub y: f32,
  pub w: f32,
  pub h: f32,
  pub score: f32,
}

impl DetectionBox {
  pub fn area(&self) -> f32 {
    self.w * self.h
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
  Success,
  Error { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageResult {
  pub image_path: String,
  pub count: usize,
  pub status: ImageStatus,
  pub boxes: Vec<DetectionBox>,
}

impl ImageResult {
  pub fn success(image_path: impl Into<String>, boxes: Vec<DetectionBox>) -> Self {
    Self {
      image_path: image_path.into(),
      count: boxes.len(),
      status: ImageStatus::Success,
      boxes,
    }
  }

  pub fn failed(image_path: impl Into<String>, message: impl Into<String>) -> Self {
    Self {
      image_path: image_path.into(),
      count: 0,
      status: ImageStatus::Error {
        message: message.into(),
      },
      boxes: Vec::new(),
    }
  }

  pub fn is_success(&self) -> bool {
    self.status == ImageStatus::Success
  }
}

/// 图像路径到检测结果的映射
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchResult {
  entries: BTreeMap<String, ImageResult>,
}

impl BatchResult {
  pub fn insert(&mut self, result: ImageResult) {
    self.entries.insert(result.image_path.clone(), result);
  }

  pub fn get(&self, image_path: &str) -> Option<&ImageResult> {
    self.entries.get(image_path)
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn iter(&self) -> impl Iterator<Item = &ImageResult> {
    self.entries.values()
  }

  pub fn total_count(&self) -> usize {
    self.iter().map(|r| r.count).sum()
  }

  pub fn failed_count(&self) -> usize {
    self.iter().filter(|r| !r.is_success()).count()
  }
}

/// 批结果中图像的键
pub fn image_key(path: &Path) -> String {
  path.to_string_lossy().into_owned()
}

/// 由模型文件扩展名确定的模型格式
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelFormat {
  Onnx,
  PyTorch,
  TensorRtEngine,
  Default,
  Unknown(String),
}

/// 推理引擎
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
  Script,
  Tensor,
}

impl ModelFormat {
  /// 对任意字符串都有定义，不会失败
  pub fn from_artifact(artifact: &str) -> Self {
    let artifact = artifact.trim();
    if artifact.is_empty() || artifact.eq_ignore_ascii_case(DEFAULT_ARTIFACT_SENTINEL) {
      return ModelFormat::Default;
    }

    let ext = Path::new(artifact)
      .extension()
      .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
      .unwrap_or_default();

    match ext.as_str() {
      "onnx" => ModelFormat::Onnx,
      "pt" => ModelFormat::PyTorch,
      "engine" => ModelFormat::TensorRtEngine,
      _ => ModelFormat::Unknown(ext),
    }
  }

  pub fn engine(&self) -> EngineKind {
    match self {
      ModelFormat::Onnx => EngineKind::Tensor,
      ModelFormat::PyTorch
      | ModelFormat::TensorRtEngine
      | ModelFormat::Default
      | ModelFormat::Unknown(_) => EngineKind::Script,
    }
  }
}

/// 配置文件中的模型条目
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelEntry {
  pub id: String,
  pub name: String,
  pub path: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub framework: Option<String>,
}

/// 已注册的模型，格式在创建时解析一次
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ModelEntry", into = "ModelEntry")]
pub struct ModelReference {
  id: String,
  display_name: String,
  artifact_path: String,
  framework: Option<String>,
  format: ModelFormat,
}

impl ModelReference {
  pub fn new(
    id: impl Into<String>,
    display_name: impl Into<String>,
    artifact_path: impl Into<String>,
    framework: Option<String>,
  ) -> Self {
    let artifact_path = artifact_path.into();
    let format = ModelFormat::from_artifact(&artifact_path);
    Self {
      id: id.into(),
      display_name: display_name.into(),
      artifact_path,
      framework,
      format,
    }
  }

  /// 以模型文件本身创建引用，id 取文件名主干
  pub fn from_artifact(artifact_path: &str) -> Self {
    let path = Path::new(artifact_path);
    let id = path
      .file_stem()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| artifact_path.to_string());
    let name = path
      .file_name()
      .map(|s| s.to_string_lossy().into_owned())
      .unwrap_or_else(|| artifact_path.to_string());
    Self::new(id, name, artifact_path, None)
  }

  pub fn id(&self) -> &str {
    &self.id
  }

  pub fn display_name(&self) -> &str {
    &self.display_name
  }

  pub fn artifact_path(&self) -> &str {
    &self.artifact_path
  }

  pub fn framework(&self) -> Option<&str> {
    self.framework.as_deref()
  }

  pub fn format(&self) -> &ModelFormat {
    &self.format
  }

  pub fn engine(&self) -> EngineKind {
    self.format.engine()
  }
}

impl From<ModelEntry> for ModelReference {
  fn from(entry: ModelEntry) -> Self {
    Self::new(entry.id, entry.name, entry.path, entry.framework)
  }
}

impl From<ModelReference> for ModelEntry {
  fn from(model: ModelReference) -> Self {
    ModelEntry {
      id: model.id,
      name: model.display_name,
      path: model.artifact_path,
      framework: model.framework,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locality {
  Local,
  Remote,
}

#[derive(Error, Debug)]
pub enum DatasetUrlError {
  #[error("不支持的数据集 URL 方案: {0}")]
  SchemeMismatch(String),
  #[error("无法解码数据集路径: {0}")]
  InvalidPath(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetReference {
  pub id: String,
  #[serde(rename = "name")]
  pub display_name: String,
  #[serde(rename = "path")]
  pub root_path: String,
  #[serde(rename = "type")]
  pub locality: Locality,
}

impl FromUrl for DatasetReference {
  type Error = DatasetUrlError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let (root_path, locality) = match url.scheme() {
      "file" => {
        let path = urlencoding::decode(url.path())
          .map_err(|_| DatasetUrlError::InvalidPath(url.to_string()))?;
        (path.into_owned(), Locality::Local)
      }
      // Windows 盘符，例如 `C:\data`
      drive if drive.len() == 1 => {
        return Err(DatasetUrlError::SchemeMismatch(drive.to_string()));
      }
      _ => (url.to_string(), Locality::Remote),
    };

    Ok(DatasetReference {
      id: root_path.clone(),
      display_name: root_path.clone(),
      root_path,
      locality,
    })
  }
}

impl DatasetReference {
  /// 解析数据集位置: file URL 或普通路径为本地，其余 URL 为远程
  pub fn parse(location: &str) -> Self {
    if let Ok(url) = Url::parse(location) {
      if let Ok(dataset) = Self::from_url(&url) {
        return dataset;
      }
    }

    DatasetReference {
      id: location.to_string(),
      display_name: location.to_string(),
      root_path: location.to_string(),
      locality: Locality::Local,
    }
  }

  pub fn is_remote(&self) -> bool {
    self.locality == Locality::Remote
  }

  /// 本地数据集的根目录，远程数据集返回 `None`
  pub fn local_root(&self, base: Option<&Path>) -> Option<PathBuf> {
    match self.locality {
      Locality::Local => Some(resolve_dataset_path(base, Path::new(&self.root_path))),
      Locality::Remote => None,
    }
  }
}

pub mod decode;
pub mod nms;
pub mod onnx;

pub use self::decode::{DecodeError, decode};
pub use self::nms::{iou, suppress};
pub use self::onnx::{TensorEngine, TensorEngineError};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn format_resolution_is_total() {
    let cases = [
      ("model.onnx", ModelFormat::Onnx),
      ("MODEL.ONNX", ModelFormat::Onnx),
      ("weights/best.pt", ModelFormat::PyTorch),
      ("best.engine", ModelFormat::TensorRtEngine),
      ("default", ModelFormat::Default),
      ("", ModelFormat::Default),
      ("model", ModelFormat::Unknown(String::new())),
      ("model.tflite", ModelFormat::Unknown("tflite".to_string())),
      (".onnx", ModelFormat::Unknown(String::new())),
    ];
    for (artifact, expected) in cases {
      assert_eq!(ModelFormat::from_artifact(artifact), expected, "{artifact}");
    }
  }

  #[test]
  fn only_onnx_runs_in_process() {
    assert_eq!(ModelFormat::Onnx.engine(), EngineKind::Tensor);
    assert_eq!(ModelFormat::PyTorch.engine(), EngineKind::Script);
    assert_eq!(ModelFormat::Default.engine(), EngineKind::Script);
    assert_eq!(
      ModelFormat::Unknown("xyz".into()).engine(),
      EngineKind::Script
    );
  }

  #[test]
  fn model_reference_round_trips_through_entry_json() {
    let json = r#"{"id":"m1","name":"Best","path":"/models/best.onnx","framework":"YOLO"}"#;
    let model: ModelReference = serde_json::from_str(json).unwrap();
    assert_eq!(model.id(), "m1");
    assert_eq!(model.format(), &ModelFormat::Onnx);
    assert_eq!(model.framework(), Some("YOLO"));

    let value = serde_json::to_value(&model).unwrap();
    assert_eq!(value["path"], "/models/best.onnx");
  }

  #[test]
  fn dataset_locality_from_location() {
    let remote = DatasetReference::parse("https://www.kaggle.com/datasets/x/y");
    assert!(remote.is_remote());
    assert_eq!(remote.local_root(None), None);

    let file = DatasetReference::parse("file:///data/my%20set");
    assert_eq!(file.locality, Locality::Local);
    assert_eq!(file.root_path, "/data/my set");

    let relative = DatasetReference::parse("datasets/yolo/images");
    assert_eq!(
      relative.local_root(Some(Path::new("/srv"))),
      Some(PathBuf::from("/srv/datasets/yolo/images"))
    );
  }

  #[test]
  fn object_store_locations_are_remote() {
    for location in ["s3://bucket/chromo", "gs://b/x", "ftp://host/chromo"] {
      let dataset = DatasetReference::parse(location);
      assert!(dataset.is_remote(), "{location}");
      assert_eq!(dataset.local_root(Some(Path::new("/srv"))), None);
    }

    let drive = DatasetReference::parse(r"C:\data\imgs");
    assert_eq!(drive.locality, Locality::Local);
    assert_eq!(drive.root_path, r"C:\data\imgs");
  }

  #[test]
  fn batch_result_counts() {
    let mut batch = BatchResult::default();
    let b = DetectionBox {
      x: 0.0,
      y: 0.0,
      w: 1.0,
      h: 1.0,
      score: 0.9,
    };
    batch.insert(ImageResult::success("a.jpg", vec![b, b]));
    batch.insert(ImageResult::failed("b.jpg", "broken"));
    assert_eq!(batch.len(), 2);
    assert_eq!(batch.total_count(), 2);
    assert_eq!(batch.failed_count(), 1);
    assert_eq!(batch.get("a.jpg").map(|r| r.count), Some(2));
  }
}
