// 该文件是 Aycromo 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use aycromo::{
  FromUrl,
  config::{Config, Selection},
  dispatch::Dispatcher,
  input::{list_images, resolve_dataset_path},
  output::{ConsoleOutput, MultiOutput, OutputWrapper},
  task::{CancellationToken, CompareTask, DetectTask, Task, ThroughputTask, install_ctrlc},
};

use args::{Args, Command};

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let mut config = Config::load_or_default(&args.config)?;
  if let Some(score_threshold) = args.score_threshold {
    config.detection.score_threshold = score_threshold;
  }
  if let Some(iou_threshold) = args.iou_threshold {
    config.detection.iou_threshold = iou_threshold;
  }
  info!("置信度阈值: {}", config.detection.score_threshold);
  info!("NMS 阈值: {}", config.detection.iou_threshold);

  let cancel = CancellationToken::new();
  install_ctrlc(cancel.clone())?;

  let mut output = MultiOutput::default().with(OutputWrapper::ConsoleOutput(ConsoleOutput));
  if let Some(record) = &args.record {
    info!("历史记录输出: {}", record);
    output = output.with(OutputWrapper::from_url(record)?);
  }

  let dispatcher = Dispatcher::from_config(&config);
  let base = config.dataset_base.clone();

  match args.command {
    Command::Detect { model, images } => {
      let model = match model {
        Some(key) => config.resolve_model(&key),
        None => config.active_model()?,
      };
      info!("模型: {} ({})", model.id(), model.artifact_path());
      DetectTask::new(model, cancel).run_task(images, &dispatcher, &output)?;
    }
    Command::Compare { dataset, models } => {
      let dataset = match dataset {
        Some(key) => config.resolve_dataset(&key),
        None => config.active_dataset()?,
      };
      let models = if models.is_empty() {
        config.models.clone()
      } else {
        models.iter().map(|key| config.resolve_model(key)).collect()
      };
      CompareTask::new(base, cancel).run_task((dataset, models), &dispatcher, &output)?;
    }
    Command::Throughput { model, dataset } => {
      let model = match model {
        Some(key) => config.resolve_model(&key),
        None => config.active_model()?,
      };
      let dataset = match dataset {
        Some(key) => config.resolve_dataset(&key),
        None => config.active_dataset()?,
      };
      ThroughputTask::new(model, base, cancel).run_task(dataset, &dispatcher, &output)?;
    }
    Command::List { path } => {
      let dir = resolve_dataset_path(config.dataset_base(), &path);
      for image in list_images(&dir)? {
        println!("{}", image.display());
      }
    }
    Command::Select { model, dataset } => {
      let mut selection = Selection::new(config.selection.clone());
      let events = selection.subscribe();
      if let Some(id) = model {
        selection.select_model(&config, &id)?;
      }
      if let Some(id) = dataset {
        selection.select_dataset(&config, &id)?;
      }
      for event in events.try_iter() {
        info!("选择已变更: {:?}", event);
      }
      let state = selection.state();
      Config::save_selection(&args.config, state)?;
      println!("当前模型: {}，当前数据集: {}", state.model, state.dataset);
    }
  }

  Ok(())
}
