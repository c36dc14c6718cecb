// 该文件是 Aycromo 项目的一部分。
// src/dispatch.rs - 推理引擎调度
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

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  benchmark::{MetricsOutcome, MetricsSource},
  config::Config,
  model::{
    BatchDetector, BatchResult, EngineKind, ModelFormat, ModelReference, TensorEngine,
    TensorEngineError,
  },
  script::{ScriptError, ScriptKind, ScriptRunner, decode_batch, decode_metrics},
  task::CancellationToken,
};

/// 默认模型占位符实际使用的模型文件
pub const DEFAULT_ARTIFACT: &str = "yolo11n.pt";

/// 根据模型文件路径选择推理引擎，对任意字符串都有定义
pub fn select_engine(artifact_path: &str) -> EngineKind {
  ModelFormat::from_artifact(artifact_path).engine()
}

#[derive(Error, Debug)]
pub enum InferenceError {
  #[error(transparent)]
  Script(#[from] ScriptError),
  #[error(transparent)]
  Tensor(#[from] TensorEngineError),
}

/// 将推理与评估请求分发到进程内引擎或外部脚本
#[derive(Debug, Clone)]
pub struct Dispatcher {
  runner: ScriptRunner,
  tensor: TensorEngine,
  default_artifact: String,
}

impl Dispatcher {
  pub fn new(runner: ScriptRunner, tensor: TensorEngine) -> Self {
    Self {
      runner,
      tensor,
      default_artifact: DEFAULT_ARTIFACT.to_string(),
    }
  }

  pub fn from_config(config: &Config) -> Self {
    let scripts = &config.scripts;
    let runner = ScriptRunner::new(&scripts.interpreter)
      .with_script(ScriptKind::Detect, &scripts.detect)
      .with_script(ScriptKind::Metrics, &scripts.metrics)
      .with_timeout(scripts.timeout_secs.map(Duration::from_secs));
    Self::new(runner, TensorEngine::new(config.detection))
      .with_default_artifact(&config.default_artifact)
  }

  pub fn with_default_artifact(mut self, artifact: impl Into<String>) -> Self {
    self.default_artifact = artifact.into();
    self
  }

  /// 传给外部脚本的模型文件，占位符替换为默认模型
  fn script_artifact<'a>(&'a self, model: &'a ModelReference) -> &'a str {
    match model.format() {
      ModelFormat::Default => &self.default_artifact,
      _ => model.artifact_path(),
    }
  }

  pub fn run_inference(
    &self,
    model: &ModelReference,
    images: &[PathBuf],
    cancel: &CancellationToken,
  ) -> Result<BatchResult, InferenceError> {
    if images.is_empty() {
      debug!("图像列表为空，跳过推理");
      return Ok(BatchResult::default());
    }

    info!(
      "模型 {} ({:?}) 使用 {:?} 引擎处理 {} 张图像",
      model.id(),
      model.format(),
      model.engine(),
      images.len()
    );

    match model.engine() {
      EngineKind::Tensor => Ok(
        self
          .tensor
          .run_batch(Path::new(model.artifact_path()), images, cancel)?,
      ),
      EngineKind::Script => {
        let mut args = Vec::with_capacity(images.len() + 1);
        args.push(OsString::from(self.script_artifact(model)));
        args.extend(images.iter().map(|image| image.as_os_str().to_os_string()));
        let payload = self.runner.run_external(ScriptKind::Detect, &args, cancel)?;
        Ok(decode_batch(&payload, images)?)
      }
    }
  }

  /// 评估失败以软错误返回，不会中断调用方的流程
  pub fn run_benchmark_metrics(
    &self,
    model: &ModelReference,
    dataset_root: &Path,
    cancel: &CancellationToken,
  ) -> MetricsOutcome {
    let args = [
      OsString::from(self.script_artifact(model)),
      dataset_root.as_os_str().to_os_string(),
    ];
    let outcome = self
      .runner
      .run_external(ScriptKind::Metrics, &args, cancel)
      .and_then(|payload| decode_metrics(&payload, model.id()));

    outcome.unwrap_or_else(|e| {
      warn!("模型 {} 评估出错: {}", model.id(), e);
      MetricsOutcome::Failed {
        error: e.to_string(),
      }
    })
  }
}

impl BatchDetector for Dispatcher {
  type Error = InferenceError;

  fn detect_batch(
    &self,
    model: &ModelReference,
    images: &[PathBuf],
    cancel: &CancellationToken,
  ) -> Result<BatchResult, Self::Error> {
    self.run_inference(model, images, cancel)
  }
}

impl MetricsSource for Dispatcher {
  fn measure(
    &self,
    model: &ModelReference,
    dataset_root: &Path,
    cancel: &CancellationToken,
  ) -> MetricsOutcome {
    self.run_benchmark_metrics(model, dataset_root, cancel)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectionParams;
  use std::io::Write;

  #[test]
  fn engine_selection_is_total() {
    assert_eq!(select_engine("a/b/model.onnx"), EngineKind::Tensor);
    assert_eq!(select_engine("model.ONNX"), EngineKind::Tensor);
    for artifact in ["best.pt", "best.engine", "default", "", "x.tflite", "noext", "..."] {
      assert_eq!(select_engine(artifact), EngineKind::Script, "{artifact}");
    }
  }

  fn sh_dispatcher(dir: &Path, kind: ScriptKind, body: &str) -> Dispatcher {
    let script = dir.join("fake.sh");
    let mut file = std::fs::File::create(&script).unwrap();
    file.write_all(body.as_bytes()).unwrap();
    let runner = ScriptRunner::new("sh").with_script(kind, &script);
    Dispatcher::new(runner, TensorEngine::new(DetectionParams::default()))
  }

  #[test]
  fn empty_image_list_invokes_nothing() {
    let dispatcher = Dispatcher::new(
      ScriptRunner::new("definitely-not-an-interpreter"),
      TensorEngine::new(DetectionParams::default()),
    );
    let model = ModelReference::from_artifact("best.pt");
    let batch = dispatcher
      .run_inference(&model, &[], &CancellationToken::new())
      .unwrap();
    assert!(batch.is_empty());
  }

  #[test]
  fn sentinel_is_replaced_by_default_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = sh_dispatcher(
      dir.path(),
      ScriptKind::Detect,
      "printf '{\"%s\":{\"count\":%d,\"status\":\"%s\"}}' \"$2\" 1 \"$1\"\n",
    );
    let model = ModelReference::new("yolo-v11", "YOLO v11", "default", None);
    let images = vec![PathBuf::from("a.jpg")];
    let batch = dispatcher
      .run_inference(&model, &images, &CancellationToken::new())
      .unwrap();
    let entry = batch.get("a.jpg").unwrap();
    assert!(!entry.is_success());
    assert_eq!(
      entry.status,
      crate::model::ImageStatus::Error {
        message: format!("脚本返回状态 {}", DEFAULT_ARTIFACT)
      }
    );
  }

  #[test]
  fn script_failure_is_typed() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = sh_dispatcher(
      dir.path(),
      ScriptKind::Detect,
      "echo 'CUDA out of memory' >&2\nexit 1\n",
    );
    let err = dispatcher
      .run_inference(
        &ModelReference::from_artifact("best.pt"),
        &[PathBuf::from("a.jpg")],
        &CancellationToken::new(),
      )
      .unwrap_err();
    match err {
      InferenceError::Script(ScriptError::Execution { stderr, .. }) => {
        assert_eq!(stderr.trim_end(), "CUDA out of memory");
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn onnx_goes_to_tensor_engine() {
    let dispatcher = Dispatcher::new(
      ScriptRunner::new("definitely-not-an-interpreter"),
      TensorEngine::new(DetectionParams::default()),
    );
    let err = dispatcher
      .run_inference(
        &ModelReference::from_artifact("/nonexistent/model.onnx"),
        &[PathBuf::from("a.jpg")],
        &CancellationToken::new(),
      )
      .unwrap_err();
    assert!(matches!(
      err,
      InferenceError::Tensor(TensorEngineError::ModelLoad { .. })
    ));
  }

  #[test]
  fn metrics_errors_become_soft_failures() {
    let dispatcher = Dispatcher::new(
      ScriptRunner::new("definitely-not-an-interpreter"),
      TensorEngine::new(DetectionParams::default()),
    );
    let outcome = dispatcher.run_benchmark_metrics(
      &ModelReference::from_artifact("best.pt"),
      Path::new("/data"),
      &CancellationToken::new(),
    );
    assert!(matches!(outcome, MetricsOutcome::Failed { .. }));
  }

  #[test]
  fn metrics_are_read_from_script() {
    let dir = tempfile::tempdir().unwrap();
    let dispatcher = sh_dispatcher(
      dir.path(),
      ScriptKind::Metrics,
      "echo 'Ultralytics 8.3'\nprintf '{\"model\":\"%s\",\"map50\":0.9,\"map5095\":0.6,\"precision\":0.8,\"recall\":0.7,\"speed\":3.5}\\n' \"$1\"\n",
    );
    let outcome = dispatcher.run_benchmark_metrics(
      &ModelReference::new("m1", "M1", "best.pt", None),
      dir.path(),
      &CancellationToken::new(),
    );
    match outcome {
      MetricsOutcome::Measured(metrics) => {
        assert_eq!(metrics.model_id, "m1");
        assert_eq!(metrics.map50, 0.9);
        assert_eq!(metrics.avg_latency_ms, 3.5);
      }
      other => panic!("unexpected outcome: {other:?}"),
    }
  }
}
