// 该文件是 Aycromo 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::{Parser, Subcommand};
use url::Url;

/// Aycromo 染色体检测推理与评估工具
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 配置文件路径，不存在时使用内置默认配置
  #[arg(long, global = true, value_name = "FILE", default_value = aycromo::config::DEFAULT_CONFIG_FILE)]
  pub config: PathBuf,

  /// 置信度阈值 (0.0 - 1.0)，覆盖配置文件
  #[arg(long, global = true, value_name = "THRESHOLD")]
  pub score_threshold: Option<f32>,

  /// NMS IOU 阈值 (0.0 - 1.0)，覆盖配置文件
  #[arg(long, global = true, value_name = "THRESHOLD")]
  pub iou_threshold: Option<f32>,

  /// 历史记录输出，例如 folder:///var/lib/aycromo/records
  #[arg(long, global = true, value_name = "OUTPUT")]
  pub record: Option<Url>,

  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 对图像执行染色体检测
  Detect {
    /// 模型 id 或模型文件路径，默认为当前选中的模型
    #[arg(long, value_name = "MODEL")]
    model: Option<String>,
    /// 待检测的图像
    #[arg(required = true, value_name = "IMAGES")]
    images: Vec<PathBuf>,
  },
  /// 在同一数据集上比较多个模型
  Compare {
    /// 数据集 id、路径或 URL，默认为当前选中的数据集
    #[arg(long, value_name = "DATASET")]
    dataset: Option<String>,
    /// 参与比较的模型，默认为全部已注册模型
    #[arg(long, num_args = 1.., value_name = "MODEL")]
    models: Vec<String>,
  },
  /// 测量单个模型在数据集上的吞吐量
  Throughput {
    #[arg(long, value_name = "MODEL")]
    model: Option<String>,
    #[arg(long, value_name = "DATASET")]
    dataset: Option<String>,
  },
  /// 列出目录中的图像文件
  List {
    /// 相对于数据集根目录的路径
    #[arg(value_name = "PATH")]
    path: PathBuf,
  },
  /// 修改当前选中的模型或数据集并写回配置文件
  Select {
    #[arg(long, value_name = "MODEL")]
    model: Option<String>,
    #[arg(long, value_name = "DATASET")]
    dataset: Option<String>,
  },
}
