// 该文件是 Beifeng （北风） 项目的一部分。
// src/deploy.rs - 部署脚本：外部工具流水线
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

use std::{
  fmt, fs,
  path::{Path, PathBuf},
  process::Command,
};

use thiserror::Error;
use tracing::{error, info};

pub mod rpath;
pub mod sophgo;

#[derive(Error, Debug)]
pub enum DeployError {
  #[error("无法启动 {program}: {source}")]
  Spawn {
    program: String,
    source: std::io::Error,
  },
  #[error("命令执行失败 (退出码 {code:?}): {command}")]
  StepFailed { command: String, code: Option<i32> },
  #[error("复制 {from} 到 {to} 失败: {source}")]
  Copy {
    from: String,
    to: String,
    source: std::io::Error,
  },
  #[error("创建目录 {path} 失败: {source}")]
  CreateDir {
    path: String,
    source: std::io::Error,
  },
  #[error("环境变量 {0} 未设置")]
  MissingEnv(&'static str),
  #[error("路径无效: {0}")]
  InvalidPath(String),
}

/// 一次外部命令调用
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolStep {
  program: String,
  args: Vec<String>,
  working_dir: Option<PathBuf>,
}

impl ToolStep {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      working_dir: None,
    }
  }

  pub fn arg(mut self, arg: impl Into<String>) -> Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<S: Into<String>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
    self.working_dir = Some(dir.into());
    self
  }

  pub fn program(&self) -> &str {
    &self.program
  }

  pub fn arguments(&self) -> &[String] {
    &self.args
  }

  pub fn working_dir(&self) -> Option<&Path> {
    self.working_dir.as_deref()
  }

  pub fn run(&self) -> Result<(), DeployError> {
    info!("执行: {}", self);
    let mut command = Command::new(&self.program);
    command.args(&self.args);
    if let Some(dir) = &self.working_dir {
      command.current_dir(dir);
    }

    let status = command.status().map_err(|source| DeployError::Spawn {
      program: self.program.clone(),
      source,
    })?;
    if status.success() {
      Ok(())
    } else {
      error!("命令失败: {} ({:?})", self, status.code());
      Err(DeployError::StepFailed {
        command: self.to_string(),
        code: status.code(),
      })
    }
  }
}

impl fmt::Display for ToolStep {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(dir) = &self.working_dir {
      write!(f, "(cd {}) ", dir.display())?;
    }
    write!(f, "{}", self.program)?;
    for arg in &self.args {
      write!(f, " {}", arg)?;
    }
    Ok(())
  }
}

/// 流水线中的一个动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
  Run(ToolStep),
  /// 复制文件或整个目录
  Copy { from: PathBuf, to: PathBuf },
  CreateDir(PathBuf),
  /// 目标文件不存在时才执行
  RunUnlessExists { path: PathBuf, step: ToolStep },
}

impl fmt::Display for Action {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Action::Run(step) => write!(f, "{}", step),
      Action::Copy { from, to } => write!(f, "cp -r {} {}", from.display(), to.display()),
      Action::CreateDir(path) => write!(f, "mkdir -p {}", path.display()),
      Action::RunUnlessExists { path, step } => {
        write!(f, "[ -e {} ] || {}", path.display(), step)
      }
    }
  }
}

/// 按顺序执行的动作列表，任一动作失败即停止
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pipeline {
  actions: Vec<Action>,
}

impl Pipeline {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn step(mut self, step: ToolStep) -> Self {
    self.actions.push(Action::Run(step));
    self
  }

  pub fn step_unless_exists(mut self, path: impl Into<PathBuf>, step: ToolStep) -> Self {
    self.actions.push(Action::RunUnlessExists {
      path: path.into(),
      step,
    });
    self
  }

  pub fn copy(mut self, from: impl Into<PathBuf>, to: impl Into<PathBuf>) -> Self {
    self.actions.push(Action::Copy {
      from: from.into(),
      to: to.into(),
    });
    self
  }

  pub fn create_dir(mut self, path: impl Into<PathBuf>) -> Self {
    self.actions.push(Action::CreateDir(path.into()));
    self
  }

  pub fn actions(&self) -> &[Action] {
    &self.actions
  }

  pub fn run(&self) -> Result<(), DeployError> {
    for (i, action) in self.actions.iter().enumerate() {
      info!("[{}/{}] {}", i + 1, self.actions.len(), action);
      match action {
        Action::Run(step) => step.run()?,
        Action::RunUnlessExists { path, step } => {
          if !path.exists() {
            step.run()?;
          }
        }
        Action::Copy { from, to } => copy_recursive(from, to).map_err(|source| DeployError::Copy {
          from: from.display().to_string(),
          to: to.display().to_string(),
          source,
        })?,
        Action::CreateDir(path) => {
          fs::create_dir_all(path).map_err(|source| DeployError::CreateDir {
            path: path.display().to_string(),
            source,
          })?
        }
      }
    }
    Ok(())
  }
}

/// `to` 为已存在的目录时复制到其中，与 `cp -r` 一致
fn copy_recursive(from: &Path, to: &Path) -> std::io::Result<()> {
  let target = match from.file_name() {
    Some(name) if to.is_dir() => to.join(name),
    _ => to.to_path_buf(),
  };

  if from.is_dir() {
    fs::create_dir_all(&target)?;
    for entry in fs::read_dir(from)? {
      let entry = entry?;
      copy_recursive(&entry.path(), &target)?;
    }
  } else {
    fs::copy(from, &target)?;
  }
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_shows_command_line() {
    let step = ToolStep::new("paddle2onnx")
      .args(["--model_dir", "ppyoloe"])
      .current_dir("/work");
    assert_eq!(step.to_string(), "(cd /work) paddle2onnx --model_dir ppyoloe");
  }

  #[test]
  fn copy_and_mkdir_actions() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    fs::create_dir_all(src.join("nested")).unwrap();
    fs::write(src.join("nested/a.txt"), "a").unwrap();
    let dst = dir.path().join("dst");

    Pipeline::new()
      .create_dir(&dst)
      .copy(&src, &dst)
      .run()
      .unwrap();
    assert_eq!(
      fs::read_to_string(dst.join("src/nested/a.txt")).unwrap(),
      "a"
    );
  }

  #[cfg(unix)]
  #[test]
  fn stops_at_first_failure() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("never");
    let result = Pipeline::new()
      .step(ToolStep::new("false"))
      .create_dir(&marker)
      .run();
    assert!(matches!(result, Err(DeployError::StepFailed { code: Some(1), .. })));
    assert!(!marker.exists());
  }

  #[test]
  fn missing_program_is_spawn_error() {
    let result = ToolStep::new("beifeng-no-such-tool").run();
    assert!(matches!(result, Err(DeployError::Spawn { .. })));
  }
}
