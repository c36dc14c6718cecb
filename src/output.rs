// 该文件是 Aycromo 项目的一部分。
// src/output.rs - 输出定义
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

use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  benchmark::{Comparison, ThroughputReport},
  model::BatchResult,
};

pub trait Render<Subject, Output>: Sized {
  type Error;
  fn render_result(&self, subject: &Subject, result: &Output) -> Result<(), Self::Error>;
}

/// 可以写入历史记录的结果
pub trait Record: Serialize {
  const KIND: &'static str;
}

impl Record for BatchResult {
  const KIND: &'static str = "detect";
}

impl Record for Comparison {
  const KIND: &'static str = "compare";
}

impl Record for ThroughputReport {
  const KIND: &'static str = "throughput";
}

mod console;
pub use self::console::ConsoleOutput;

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("控制台输出错误: {0}")]
  ConsoleError(#[from] std::io::Error),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配")]
  SchemeMismatch,
}

pub enum OutputWrapper {
  ConsoleOutput(ConsoleOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ConsoleOutput::SCHEME => {
        let output = ConsoleOutput::from_url(url)?;
        Ok(OutputWrapper::ConsoleOutput(output))
      }
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      _ => Err(OutputError::SchemeMismatch),
    }
  }
}

impl<S, T> Render<S, T> for OutputWrapper
where
  S: Serialize,
  T: Record,
  ConsoleOutput: Render<S, T, Error = std::io::Error>,
{
  type Error = OutputError;

  fn render_result(&self, subject: &S, result: &T) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::ConsoleOutput(output) => output
        .render_result(subject, result)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(subject, result)
        .map_err(OutputError::from),
    }
  }
}

/// 依次渲染到多个输出
#[derive(Default)]
pub struct MultiOutput {
  outputs: Vec<OutputWrapper>,
}

impl MultiOutput {
  pub fn with(mut self, output: OutputWrapper) -> Self {
    self.outputs.push(output);
    self
  }

  pub fn len(&self) -> usize {
    self.outputs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.outputs.is_empty()
  }
}

impl<S, T> Render<S, T> for MultiOutput
where
  OutputWrapper: Render<S, T, Error = OutputError>,
{
  type Error = OutputError;

  fn render_result(&self, subject: &S, result: &T) -> Result<(), Self::Error> {
    for output in &self.outputs {
      output.render_result(subject, result)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn output_is_selected_by_scheme() {
    let console = OutputWrapper::from_url(&Url::parse("console://").unwrap()).unwrap();
    assert!(matches!(console, OutputWrapper::ConsoleOutput(_)));

    let err = OutputWrapper::from_url(&Url::parse("rtsp://host/stream").unwrap());
    assert!(matches!(err, Err(OutputError::SchemeMismatch)));
  }

  #[cfg(feature = "directory_record")]
  #[test]
  fn folder_scheme_creates_directory_record() {
    let output = OutputWrapper::from_url(&Url::parse("folder:///tmp/aycromo").unwrap()).unwrap();
    assert!(matches!(output, OutputWrapper::DirectoryRecordOutput(_)));
  }
}
