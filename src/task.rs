// 该文件是 Aycromo 项目的一部分。
// src/task.rs - 任务定义与取消信号
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
use std::sync::{
  Arc,
  atomic::{AtomicBool, Ordering},
};
use std::{thread, time::Duration};

use tracing::{info, warn};

use crate::{
  benchmark::{
    Comparison, MetricsSource, ThroughputReport, compare_models, throughput,
  },
  model::{BatchDetector, BatchResult, DatasetReference, ModelReference},
  output::Render,
};

/// 协作式取消信号，在图像之间、模型之间以及等待子进程时检查
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
  cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn cancel(&self) {
    self.cancelled.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancelled.load(Ordering::SeqCst)
  }
}

/// 注册 Ctrl-C 处理函数: 第一次中断触发取消，30 秒内未退出则强制退出
pub fn install_ctrlc(cancel: CancellationToken) -> Result<(), ctrlc::Error> {
  ctrlc::set_handler(move || {
    if cancel.is_cancelled() {
      warn!("再次收到中断信号，强制退出程序");
      std::process::exit(130);
    }
    info!("收到中断信号，准备退出...");
    cancel.cancel();
    thread::spawn(|| {
      thread::sleep(Duration::from_secs(30));
      warn!("强制退出程序");
      std::process::exit(1);
    });
  })
}

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 对一组图像执行一次批量检测
pub struct DetectTask {
  model: ModelReference,
  cancel: CancellationToken,
}

impl DetectTask {
  pub fn new(model: ModelReference, cancel: CancellationToken) -> Self {
    Self { model, cancel }
  }
}

impl<D, O> Task<Vec<PathBuf>, &D, &O> for DetectTask
where
  D: BatchDetector,
  D::Error: std::error::Error + Send + Sync + 'static,
  O: Render<ModelReference, BatchResult>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, images: Vec<PathBuf>, detector: &D, output: &O) -> Result<(), Self::Error> {
    info!("开始检测任务: {} 张图像", images.len());
    let now = std::time::Instant::now();
    let result = detector.detect_batch(&self.model, &images, &self.cancel)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    output.render_result(&self.model, &result)?;
    Ok(())
  }
}

/// 在同一数据集上比较多个模型
pub struct CompareTask {
  dataset_base: Option<PathBuf>,
  cancel: CancellationToken,
}

impl CompareTask {
  pub fn new(dataset_base: Option<PathBuf>, cancel: CancellationToken) -> Self {
    Self {
      dataset_base,
      cancel,
    }
  }
}

impl<S, O> Task<(DatasetReference, Vec<ModelReference>), &S, &O> for CompareTask
where
  S: MetricsSource,
  O: Render<DatasetReference, Comparison>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(
    self,
    (dataset, models): (DatasetReference, Vec<ModelReference>),
    source: &S,
    output: &O,
  ) -> Result<(), Self::Error> {
    info!("开始对比任务: {} 个模型, 数据集 {}", models.len(), dataset.id);
    let comparison = compare_models(
      source,
      &models,
      &dataset,
      self.dataset_base.as_deref(),
      &self.cancel,
    )?;
    output.render_result(&dataset, &comparison)?;
    Ok(())
  }
}

/// 单模型吞吐量测试
pub struct ThroughputTask {
  model: ModelReference,
  dataset_base: Option<PathBuf>,
  cancel: CancellationToken,
}

impl ThroughputTask {
  pub fn new(
    model: ModelReference,
    dataset_base: Option<PathBuf>,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      model,
      dataset_base,
      cancel,
    }
  }
}

impl<D, O> Task<DatasetReference, &D, &O> for ThroughputTask
where
  D: BatchDetector,
  D::Error: std::error::Error + Send + Sync + 'static,
  O: Render<ModelReference, ThroughputReport>,
  O::Error: std::error::Error + Send + Sync + 'static,
{
  type Error = anyhow::Error;

  fn run_task(self, dataset: DatasetReference, detector: &D, output: &O) -> Result<(), Self::Error> {
    info!("开始吞吐量测试: 模型 {}, 数据集 {}", self.model.id(), dataset.id);
    let report = throughput(
      detector,
      &self.model,
      &dataset,
      self.dataset_base.as_deref(),
      &self.cancel,
    )?;
    output.render_result(&self.model, &report)?;
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::cell::RefCell;
  use std::convert::Infallible;

  #[test]
  fn token_is_shared_between_clones() {
    let token = CancellationToken::new();
    let clone = token.clone();
    assert!(!clone.is_cancelled());
    token.cancel();
    assert!(clone.is_cancelled());
  }

  struct CountingDetector;

  impl BatchDetector for CountingDetector {
    type Error = Infallible;

    fn detect_batch(
      &self,
      _model: &ModelReference,
      images: &[PathBuf],
      _cancel: &CancellationToken,
    ) -> Result<BatchResult, Self::Error> {
      let mut batch = BatchResult::default();
      for image in images {
        batch.insert(crate::model::ImageResult::success(
          crate::model::image_key(image),
          Vec::new(),
        ));
      }
      Ok(batch)
    }
  }

  #[derive(Default)]
  struct Captured {
    rendered: RefCell<Vec<(String, usize)>>,
  }

  impl Render<ModelReference, BatchResult> for Captured {
    type Error = Infallible;

    fn render_result(&self, model: &ModelReference, result: &BatchResult) -> Result<(), Self::Error> {
      self
        .rendered
        .borrow_mut()
        .push((model.id().to_string(), result.len()));
      Ok(())
    }
  }

  #[test]
  fn detect_task_renders_batch() {
    let output = Captured::default();
    DetectTask::new(ModelReference::from_artifact("best.pt"), CancellationToken::new())
      .run_task(
        vec![PathBuf::from("a.jpg"), PathBuf::from("b.jpg")],
        &CountingDetector,
        &output,
      )
      .unwrap();
    assert_eq!(output.rendered.into_inner(), vec![("best".to_string(), 2)]);
  }
}
