// 该文件是 Aycromo 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::{
  FromUrl, FromUrlWithScheme,
  output::{Record, Render},
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("无效的记录目录: {0}")]
  InvalidPath(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

#[derive(Serialize)]
struct RecordEntry<'a, S, T> {
  kind: &'static str,
  recorded_at: String,
  subject: &'a S,
  result: &'a T,
}

/// 按日期归档的 JSON 历史记录: `<dir>/YYYY/MM/DD/HH-MM-SS-XXXX.json`
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  record_counter: AtomicU16,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &url::Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    // folder://records 中 records 被解析为主机名，按相对路径处理
    let raw = format!("{}{}", uri.host_str().unwrap_or_default(), uri.path());
    let path = urlencoding::decode(&raw)
      .map_err(|_| DirectoryRecordOutputError::InvalidPath(uri.to_string()))?;
    if path.is_empty() {
      return Err(DirectoryRecordOutputError::InvalidPath(uri.to_string()));
    }

    Ok(DirectoryRecordOutput::new(PathBuf::from(path.into_owned())))
  }
}

impl DirectoryRecordOutput {
  pub fn new(directory: PathBuf) -> Self {
    Self {
      directory,
      record_counter: AtomicU16::new(0),
    }
  }

  fn record_id(&self) -> u16 {
    self.record_counter.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
  }

  fn record_dir(&self, now: &DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;
    Ok(directory)
  }

  /// 创建新的记录文件，已存在的文件不会被覆盖
  fn create_record(
    &self,
    directory: &Path,
    now: &DateTime<Utc>,
  ) -> Result<(PathBuf, File), DirectoryRecordOutputError> {
    let stamp = now.format("%H-%M-%S");
    for _ in 0..=u16::MAX {
      let path = directory.join(format!("{}-{:04X}.json", stamp, self.record_id()));
      match OpenOptions::new().write(true).create_new(true).open(&path) {
        Ok(file) => return Ok((path, file)),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
        Err(e) => return Err(e.into()),
      }
    }
    Err(std::io::Error::new(ErrorKind::AlreadyExists, "同一秒内的记录编号已用尽").into())
  }
}

impl<S: Serialize, T: Record> Render<S, T> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, subject: &S, result: &T) -> Result<(), Self::Error> {
    let now = Utc::now();
    let directory = self.record_dir(&now)?;
    let (path, file) = self.create_record(&directory, &now)?;
    let entry = RecordEntry {
      kind: T::KIND,
      recorded_at: now.to_rfc3339(),
      subject,
      result,
    };
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, &entry)?;
    writer.flush()?;
    info!("已写入记录: {}", path.display());
    Ok(())
  }
}
