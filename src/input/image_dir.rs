// 该文件是 Aycromo 项目的一部分。
// src/input/image_dir.rs - 数据集目录图像枚举
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

use thiserror::Error;
use tracing::debug;

/// 支持的栅格图像扩展名（不区分大小写）
pub const RASTER_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

#[derive(Error, Debug)]
pub enum ListFilesError {
  #[error("目录不存在: {0}")]
  NotFound(PathBuf),
  #[error("路径不是目录: {0}")]
  NotADirectory(PathBuf),
  #[error("读取目录 {path} 失败: {source}")]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },
}

pub fn is_raster_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      RASTER_EXTENSIONS
        .iter()
        .any(|known| ext.eq_ignore_ascii_case(known))
    })
    .unwrap_or(false)
}

/// 相对路径以数据集根目录为基准解析，绝对路径原样返回
pub fn resolve_dataset_path(base: Option<&Path>, path: &Path) -> PathBuf {
  match base {
    Some(base) if path.is_relative() => base.join(path),
    _ => path.to_path_buf(),
  }
}

/// 列出目录下的全部图像文件（不递归），返回按字典序排列的绝对路径
///
/// 目录不存在与目录为空可以区分: 前者返回 [`ListFilesError::NotFound`]，
/// 后者返回空列表。
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>, ListFilesError> {
  let io_error = |source| ListFilesError::Io {
    path: dir.to_path_buf(),
    source,
  };

  let metadata = match std::fs::metadata(dir) {
    Ok(metadata) => metadata,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
      return Err(ListFilesError::NotFound(dir.to_path_buf()));
    }
    Err(e) => return Err(io_error(e)),
  };
  if !metadata.is_dir() {
    return Err(ListFilesError::NotADirectory(dir.to_path_buf()));
  }

  let dir = std::path::absolute(dir).map_err(io_error)?;
  let mut images = Vec::new();
  for entry in std::fs::read_dir(&dir).map_err(io_error)? {
    let path = entry.map_err(io_error)?.path();
    if path.is_file() && is_raster_image(&path) {
      images.push(path);
    }
  }
  images.sort();

  debug!("目录 {} 中找到 {} 张图像", dir.display(), images.len());
  Ok(images)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn raster_extensions_ignore_case() {
    assert!(is_raster_image(Path::new("a.JPG")));
    assert!(is_raster_image(Path::new("b.Jpeg")));
    assert!(is_raster_image(Path::new("dir/c.webp")));
    assert!(is_raster_image(Path::new("d.BMP")));
    assert!(!is_raster_image(Path::new("e.gif")));
    assert!(!is_raster_image(Path::new("labels.txt")));
    assert!(!is_raster_image(Path::new("png")));
  }

  #[test]
  fn lists_only_images_sorted_and_absolute() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["b.png", "a.JPG", "notes.txt", "c.webp"] {
      std::fs::write(dir.path().join(name), b"x").unwrap();
    }
    std::fs::create_dir(dir.path().join("nested.png")).unwrap();

    let images = list_images(dir.path()).unwrap();
    let names: Vec<_> = images
      .iter()
      .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
      .collect();
    assert_eq!(names, ["a.JPG", "b.png", "c.webp"]);
    assert!(images.iter().all(|p| p.is_absolute()));
  }

  #[test]
  fn empty_directory_is_not_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(list_images(dir.path()).unwrap().is_empty());
  }

  #[test]
  fn missing_directory_is_distinguishable() {
    let dir = tempfile::tempdir().unwrap();
    let err = list_images(&dir.path().join("absent")).unwrap_err();
    assert!(matches!(err, ListFilesError::NotFound(_)));
  }

  #[test]
  fn file_is_not_a_directory() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("a.png");
    std::fs::write(&file, b"x").unwrap();
    let err = list_images(&file).unwrap_err();
    assert!(matches!(err, ListFilesError::NotADirectory(_)));
  }

  #[test]
  fn relative_paths_resolve_against_base() {
    let base = Path::new("/data/sets");
    assert_eq!(
      resolve_dataset_path(Some(base), Path::new("yolo/images")),
      PathBuf::from("/data/sets/yolo/images")
    );
    assert_eq!(
      resolve_dataset_path(Some(base), Path::new("/abs/images")),
      PathBuf::from("/abs/images")
    );
    assert_eq!(
      resolve_dataset_path(None, Path::new("rel")),
      PathBuf::from("rel")
    );
  }
}
