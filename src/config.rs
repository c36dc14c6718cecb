// 该文件是 Aycromo 项目的一部分。
// src/config.rs - 配置与当前选择
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
use std::sync::mpsc::{Receiver, Sender, channel};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  dispatch::DEFAULT_ARTIFACT,
  model::{DatasetReference, DetectionParams, Locality, ModelReference},
  script::{DEFAULT_DETECT_SCRIPT, DEFAULT_INTERPRETER, DEFAULT_METRICS_SCRIPT},
};

pub const DEFAULT_CONFIG_FILE: &str = "aycromo.json";
pub const DEFAULT_MODEL_ID: &str = "yolo-v11";
pub const DEFAULT_DATASET_ID: &str = "ds-interno-yolo";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件失败 {path}: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
  #[error("配置文件格式错误 {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },
  #[error("序列化配置失败: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("未注册的模型: {0}")]
  UnknownModel(String),
  #[error("未注册的数据集: {0}")]
  UnknownDataset(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptsConfig {
  pub interpreter: String,
  pub detect: PathBuf,
  pub metrics: PathBuf,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub timeout_secs: Option<u64>,
}

impl Default for ScriptsConfig {
  fn default() -> Self {
    Self {
      interpreter: DEFAULT_INTERPRETER.to_string(),
      detect: PathBuf::from(DEFAULT_DETECT_SCRIPT),
      metrics: PathBuf::from(DEFAULT_METRICS_SCRIPT),
      timeout_secs: None,
    }
  }
}

/// 当前选中的模型与数据集
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionState {
  pub model: String,
  pub dataset: String,
}

impl Default for SelectionState {
  fn default() -> Self {
    Self {
      model: DEFAULT_MODEL_ID.to_string(),
      dataset: DEFAULT_DATASET_ID.to_string(),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
  pub detection: DetectionParams,
  pub scripts: ScriptsConfig,
  pub default_artifact: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub dataset_base: Option<PathBuf>,
  pub models: Vec<ModelReference>,
  pub datasets: Vec<DatasetReference>,
  pub selection: SelectionState,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      detection: DetectionParams::default(),
      scripts: ScriptsConfig::default(),
      default_artifact: DEFAULT_ARTIFACT.to_string(),
      dataset_base: None,
      models: vec![ModelReference::new(
        DEFAULT_MODEL_ID,
        "YOLO v11 (Padrão)",
        "default",
        Some("YOLO".to_string()),
      )],
      datasets: vec![
        DatasetReference {
          id: DEFAULT_DATASET_ID.to_string(),
          display_name: "Dataset Interno YOLO".to_string(),
          root_path: "datasets/yolo/images".to_string(),
          locality: Locality::Local,
        },
        DatasetReference {
          id: "ds-kaggle".to_string(),
          display_name: "Kaggle: Dataset Cromossomo".to_string(),
          root_path: "https://www.kaggle.com/datasets/jorgelucaslima/dataset-cromossomo".to_string(),
          locality: Locality::Remote,
        },
      ],
      selection: SelectionState::default(),
    }
  }
}

impl Config {
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
      path: path.to_path_buf(),
      source,
    })?;
    info!("已加载配置文件: {}", path.display());
    Ok(config)
  }

  /// 配置文件不存在时使用内置默认配置
  pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
    if path.exists() {
      Self::load(path)
    } else {
      debug!("配置文件 {} 不存在，使用默认配置", path.display());
      Ok(Self::default())
    }
  }

  pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
    let text = serde_json::to_string_pretty(self)?;
    std::fs::write(path, text).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    info!("配置已保存: {}", path.display());
    Ok(())
  }

  /// 只写回当前选择，文件中的其余配置保持不变
  pub fn save_selection(path: &Path, selection: &SelectionState) -> Result<(), ConfigError> {
    let mut stored = Config::load_or_default(path)?;
    stored.selection = selection.clone();
    stored.save(path)
  }

  pub fn model(&self, id: &str) -> Option<&ModelReference> {
    self.models.iter().find(|m| m.id() == id)
  }

  pub fn dataset(&self, id: &str) -> Option<&DatasetReference> {
    self.datasets.iter().find(|d| d.id == id)
  }

  /// 按 id 查找已注册模型，找不到时视为模型文件路径
  pub fn resolve_model(&self, key: &str) -> ModelReference {
    self
      .model(key)
      .cloned()
      .unwrap_or_else(|| ModelReference::from_artifact(key))
  }

  /// 按 id 查找已注册数据集，找不到时视为路径或 URL
  pub fn resolve_dataset(&self, key: &str) -> DatasetReference {
    self
      .dataset(key)
      .cloned()
      .unwrap_or_else(|| DatasetReference::parse(key))
  }

  pub fn active_model(&self) -> Result<ModelReference, ConfigError> {
    self
      .model(&self.selection.model)
      .cloned()
      .ok_or_else(|| ConfigError::UnknownModel(self.selection.model.clone()))
  }

  pub fn active_dataset(&self) -> Result<DatasetReference, ConfigError> {
    self
      .dataset(&self.selection.dataset)
      .cloned()
      .ok_or_else(|| ConfigError::UnknownDataset(self.selection.dataset.clone()))
  }

  pub fn dataset_base(&self) -> Option<&Path> {
    self.dataset_base.as_deref()
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectionEvent {
  ModelChanged(String),
  DatasetChanged(String),
}

/// 当前选择，变更时通知全部订阅者
#[derive(Debug, Default)]
pub struct Selection {
  state: SelectionState,
  subscribers: Vec<Sender<SelectionEvent>>,
}

impl Selection {
  pub fn new(state: SelectionState) -> Self {
    Self {
      state,
      subscribers: Vec::new(),
    }
  }

  pub fn state(&self) -> &SelectionState {
    &self.state
  }

  pub fn subscribe(&mut self) -> Receiver<SelectionEvent> {
    let (tx, rx) = channel();
    self.subscribers.push(tx);
    rx
  }

  pub fn select_model(&mut self, config: &Config, id: &str) -> Result<(), ConfigError> {
    if config.model(id).is_none() {
      return Err(ConfigError::UnknownModel(id.to_string()));
    }
    if self.state.model != id {
      self.state.model = id.to_string();
      self.notify(SelectionEvent::ModelChanged(id.to_string()));
    }
    Ok(())
  }

  pub fn select_dataset(&mut self, config: &Config, id: &str) -> Result<(), ConfigError> {
    if config.dataset(id).is_none() {
      return Err(ConfigError::UnknownDataset(id.to_string()));
    }
    if self.state.dataset != id {
      self.state.dataset = id.to_string();
      self.notify(SelectionEvent::DatasetChanged(id.to_string()));
    }
    Ok(())
  }

  fn notify(&mut self, event: SelectionEvent) {
    // 接收端已释放的订阅者直接移除
    self
      .subscribers
      .retain(|tx| tx.send(event.clone()).is_ok());
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn default_config_has_builtins() {
    let config = Config::default();
    let model = config.active_model().unwrap();
    assert_eq!(model.id(), "yolo-v11");
    assert_eq!(model.artifact_path(), "default");
    assert!(!config.active_dataset().unwrap().is_remote());
    assert!(config.dataset("ds-kaggle").unwrap().is_remote());
    assert_eq!(config.default_artifact, "yolo11n.pt");
  }

  #[test]
  fn save_then_load() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aycromo.json");
    let mut config = Config::default();
    config.detection.score_threshold = 0.3;
    config
      .models
      .push(ModelReference::new("m2", "Best", "runs/best.onnx", None));
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded, config);
  }

  #[test]
  fn partial_config_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("partial.json");
    std::fs::write(&path, r#"{"scripts": {"interpreter": "python3"}}"#).unwrap();
    let config = Config::load(&path).unwrap();
    assert_eq!(config.scripts.interpreter, "python3");
    assert_eq!(config.scripts.detect, PathBuf::from(DEFAULT_DETECT_SCRIPT));
    assert_eq!(config.detection, DetectionParams::default());
  }

  #[test]
  fn broken_config_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(Config::load(&path), Err(ConfigError::Parse { .. })));
    assert!(matches!(
      Config::load_or_default(&dir.path().join("missing.json")),
      Ok(config) if config == Config::default()
    ));
  }

  #[test]
  fn unregistered_keys_resolve_to_paths() {
    let config = Config::default();
    assert_eq!(config.resolve_model("yolo-v11").artifact_path(), "default");
    let model = config.resolve_model("weights/best.onnx");
    assert_eq!(model.id(), "best");
    assert_eq!(config.resolve_dataset("ds-kaggle").id, "ds-kaggle");
    assert_eq!(config.resolve_dataset("/data/imgs").root_path, "/data/imgs");
  }

  #[test]
  fn selection_notifies_subscribers() {
    let mut config = Config::default();
    config
      .models
      .push(ModelReference::new("m2", "Best", "best.pt", None));
    let mut selection = Selection::new(config.selection.clone());
    let rx = selection.subscribe();
    let dropped = selection.subscribe();
    drop(dropped);

    selection.select_model(&config, "m2").unwrap();
    selection.select_model(&config, "m2").unwrap();
    selection.select_dataset(&config, "ds-kaggle").unwrap();
    assert!(matches!(
      selection.select_model(&config, "nope"),
      Err(ConfigError::UnknownModel(_))
    ));

    let events: Vec<_> = rx.try_iter().collect();
    assert_eq!(
      events,
      vec![
        SelectionEvent::ModelChanged("m2".to_string()),
        SelectionEvent::DatasetChanged("ds-kaggle".to_string()),
      ]
    );
    assert_eq!(selection.subscribers.len(), 1);
    assert_eq!(selection.state().model, "m2");
  }

  #[test]
  fn saving_selection_keeps_stored_thresholds() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("aycromo.json");
    let mut stored = Config::default();
    stored.detection.score_threshold = 0.3;
    stored
      .models
      .push(ModelReference::new("m2", "Best", "best.pt", None));
    stored.save(&path).unwrap();

    let mut running = Config::load(&path).unwrap();
    running.detection.score_threshold = 0.9;
    let mut selection = Selection::new(running.selection.clone());
    selection.select_model(&running, "m2").unwrap();
    Config::save_selection(&path, selection.state()).unwrap();

    let reloaded = Config::load(&path).unwrap();
    assert_eq!(reloaded.detection.score_threshold, 0.3);
    assert_eq!(reloaded.selection.model, "m2");
    assert_eq!(reloaded.models, stored.models);
  }
}
