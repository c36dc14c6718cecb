// 该文件是 Aycromo 项目的一部分。
// src/script.rs - 外部脚本执行
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
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::task::CancellationToken;

mod payload;
pub use self::payload::{decode_batch, decode_metrics};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const STDOUT_TAIL_CHARS: usize = 2000;

pub const DEFAULT_INTERPRETER: &str = "python";
pub const DEFAULT_DETECT_SCRIPT: &str = "scripts/detect_chromosomes.py";
pub const DEFAULT_METRICS_SCRIPT: &str = "scripts/benchmark.py";

/// 进程退出码，被信号终止时没有退出码
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitCode(pub Option<i32>);

impl fmt::Display for ExitCode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.0 {
      Some(code) => write!(f, "{}", code),
      None => write!(f, "被信号终止"),
    }
  }
}

#[derive(Error, Debug)]
pub enum ScriptError {
  #[error("找不到解释器 `{interpreter}`，请安装 Python 运行环境或在配置中指定解释器路径")]
  InterpreterNotFound { interpreter: String },
  #[error("无法启动外部脚本: {0}")]
  Spawn(#[source] std::io::Error),
  #[error("外部脚本执行失败 (退出码 {code}): {stderr}{}", stdout_note(.stdout))]
  Execution {
    code: ExitCode,
    stderr: String,
    /// 标准输出的末尾部分，脚本常把错误写成 JSON 输出到这里
    stdout: String,
  },
  #[error("外部脚本输出无法解析: {reason}")]
  MalformedOutput { reason: String, raw: String },
  #[error("外部脚本报告错误: {0}")]
  Reported(String),
  #[error("读取脚本输出失败: {0}")]
  Io(#[from] std::io::Error),
  #[error("外部脚本超时 ({0:.2?})")]
  Timeout(Duration),
  #[error("任务已取消")]
  Cancelled,
}

impl ScriptError {
  pub fn malformed(reason: impl Into<String>, raw: impl Into<String>) -> Self {
    ScriptError::MalformedOutput {
      reason: reason.into(),
      raw: raw.into(),
    }
  }
}

fn stdout_note(stdout: &str) -> String {
  let stdout = stdout.trim();
  if stdout.is_empty() {
    String::new()
  } else {
    format!("\n标准输出: {}", stdout)
  }
}

/// 保留字符串最后 `max_chars` 个字符
fn tail(text: &str, max_chars: usize) -> &str {
  if max_chars == 0 {
    return "";
  }
  match text.char_indices().rev().nth(max_chars - 1) {
    Some((start, _)) => &text[start..],
    None => text,
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
  Detect,
  Metrics,
}

/// 从标准输出中提取 JSON 负载
///
/// 负载从第一个 `{` 开始，之前的内容（日志、横幅）被丢弃。
/// 日志中若出现 `{` 会导致误判，这是与外部脚本约定的已知限制。
pub fn extract_payload(stdout: &str) -> Result<Value, ScriptError> {
  let start = stdout
    .find('{')
    .ok_or_else(|| ScriptError::malformed("输出中没有 JSON 对象", stdout))?;
  serde_json::from_str(&stdout[start..]).map_err(|e| ScriptError::malformed(e.to_string(), stdout))
}

type Stream = JoinHandle<std::io::Result<Vec<u8>>>;

/// 一次脚本调用的状态
#[derive(Debug)]
enum Invocation {
  Spawned(Child),
  StreamingOutput {
    child: Child,
    stdout: Stream,
    stderr: Stream,
  },
  Exited {
    code: ExitCode,
    stdout: String,
    stderr: String,
  },
  Parsed(Value),
  Failed(ScriptError),
}

struct Watch<'a> {
  started: Instant,
  timeout: Option<Duration>,
  cancel: &'a CancellationToken,
}

impl Invocation {
  fn name(&self) -> &'static str {
    match self {
      Invocation::Spawned(_) => "Spawned",
      Invocation::StreamingOutput { .. } => "StreamingOutput",
      Invocation::Exited { .. } => "Exited",
      Invocation::Parsed(_) => "Parsed",
      Invocation::Failed(_) => "Failed",
    }
  }

  fn advance(self, watch: &Watch) -> Self {
    match self {
      Invocation::Spawned(mut child) => match (child.stdout.take(), child.stderr.take()) {
        (Some(stdout), Some(stderr)) => Invocation::StreamingOutput {
          child,
          stdout: drain(stdout),
          stderr: drain(stderr),
        },
        _ => {
          let _ = child.kill();
          let _ = child.wait();
          Invocation::Failed(ScriptError::Io(std::io::Error::other(
            "无法获取子进程输出管道",
          )))
        }
      },
      Invocation::StreamingOutput {
        mut child,
        stdout,
        stderr,
      } => {
        // 超时或取消时读取线程随管道关闭自行结束，不再等待
        let status = match wait_child(&mut child, watch) {
          Ok(status) => status,
          Err(e) => return Invocation::Failed(e),
        };
        match (collect(stdout), collect(stderr)) {
          (Ok(stdout), Ok(stderr)) => Invocation::Exited {
            code: ExitCode(status.code()),
            stdout,
            stderr,
          },
          (Err(e), _) | (_, Err(e)) => Invocation::Failed(e),
        }
      }
      Invocation::Exited {
        code: ExitCode(Some(0)),
        stdout,
        ..
      } => match extract_payload(&stdout) {
        Ok(value) => Invocation::Parsed(value),
        Err(e) => Invocation::Failed(e),
      },
      Invocation::Exited {
        code,
        stdout,
        stderr,
      } => {
        Invocation::Failed(ScriptError::Execution {
          code,
          stderr,
          stdout: tail(&stdout, STDOUT_TAIL_CHARS).to_string(),
        })
      }
      done @ (Invocation::Parsed(_) | Invocation::Failed(_)) => done,
    }
  }
}

fn drain<R: Read + Send + 'static>(mut reader: R) -> Stream {
  thread::spawn(move || {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    Ok(buf)
  })
}

fn collect(stream: Stream) -> Result<String, ScriptError> {
  let bytes = stream
    .join()
    .map_err(|_| std::io::Error::other("输出读取线程异常退出"))??;
  Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn wait_child(child: &mut Child, watch: &Watch) -> Result<ExitStatus, ScriptError> {
  loop {
    if let Some(status) = child.try_wait()? {
      return Ok(status);
    }

    let failure = if watch.cancel.is_cancelled() {
      Some(ScriptError::Cancelled)
    } else {
      watch
        .timeout
        .filter(|timeout| watch.started.elapsed() >= *timeout)
        .map(ScriptError::Timeout)
    };

    if let Some(failure) = failure {
      warn!("终止外部脚本进程 {}: {}", child.id(), failure);
      let _ = child.kill();
      let _ = child.wait();
      return Err(failure);
    }

    thread::sleep(POLL_INTERVAL);
  }
}

/// 外部脚本执行器
#[derive(Debug, Clone)]
pub struct ScriptRunner {
  interpreter: PathBuf,
  detect_script: PathBuf,
  metrics_script: PathBuf,
  timeout: Option<Duration>,
}

impl Default for ScriptRunner {
  fn default() -> Self {
    Self::new(DEFAULT_INTERPRETER)
  }
}

impl ScriptRunner {
  pub fn new(interpreter: impl Into<PathBuf>) -> Self {
    Self {
      interpreter: interpreter.into(),
      detect_script: PathBuf::from(DEFAULT_DETECT_SCRIPT),
      metrics_script: PathBuf::from(DEFAULT_METRICS_SCRIPT),
      timeout: None,
    }
  }

  pub fn with_script(mut self, kind: ScriptKind, path: impl Into<PathBuf>) -> Self {
    match kind {
      ScriptKind::Detect => self.detect_script = path.into(),
      ScriptKind::Metrics => self.metrics_script = path.into(),
    }
    self
  }

  /// 看门狗超时，默认不限制
  pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
    self.timeout = timeout;
    self
  }

  pub fn script_path(&self, kind: ScriptKind) -> &Path {
    match kind {
      ScriptKind::Detect => &self.detect_script,
      ScriptKind::Metrics => &self.metrics_script,
    }
  }

  /// 运行外部脚本并解析其 JSON 负载
  pub fn run_external(
    &self,
    kind: ScriptKind,
    args: &[OsString],
    cancel: &CancellationToken,
  ) -> Result<Value, ScriptError> {
    let script = self.script_path(kind);
    info!(
      "启动外部脚本: {} {} ({} 个参数)",
      self.interpreter.display(),
      script.display(),
      args.len()
    );

    let child = Command::new(&self.interpreter)
      .arg(script)
      .args(args)
      .stdin(Stdio::null())
      .stdout(Stdio::piped())
      .stderr(Stdio::piped())
      .spawn()
      .map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
          error!("找不到解释器: {}", self.interpreter.display());
          ScriptError::InterpreterNotFound {
            interpreter: self.interpreter.display().to_string(),
          }
        } else {
          ScriptError::Spawn(e)
        }
      })?;

    let watch = Watch {
      started: Instant::now(),
      timeout: self.timeout,
      cancel,
    };

    let mut state = Invocation::Spawned(child);
    loop {
      state = match state {
        Invocation::Parsed(value) => {
          info!("外部脚本完成，耗时 {:.2?}", watch.started.elapsed());
          return Ok(value);
        }
        Invocation::Failed(e) => {
          error!("外部脚本失败: {}", e);
          return Err(e);
        }
        state => {
          let next = state.advance(&watch);
          debug!("脚本调用状态: {}", next.name());
          next
        }
      };
    }
  }
}
