// 该文件是 Beifeng （北风） 项目的一部分。
// src/model/detector.rs - 统一的检测器代理
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

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::{ConfigError, DeployConfig},
  frame::BgrFrame,
  model::{DetectResult, Model, variants::Variant},
  option::{ModelFormat, RuntimeOption},
  processor::{Postprocess, Preprocess, ProcessorError, Thresholds, check_unit},
  runtime::{ModelBlob, Runtime, RuntimeError},
};

/// 初始化失败的具体原因
#[derive(Error, Debug)]
pub enum InitError {
  #[error("不支持模型格式 {format}，可用格式: {allowed:?}")]
  UnsupportedFormat {
    format: ModelFormat,
    allowed: &'static [ModelFormat],
  },
  #[error("当前运行时无法加载 {0} 格式的模型")]
  RuntimeFormat(ModelFormat),
  #[error("{0} 格式需要参数文件")]
  MissingParams(ModelFormat),
  #[error("缺少部署配置文件")]
  MissingConfig,
  #[error("{0}")]
  Config(#[from] ConfigError),
  #[error("{0}")]
  Processor(#[from] ProcessorError),
  #[error("{0}")]
  Runtime(#[from] RuntimeError),
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("{model} 模型初始化失败: {source}")]
  Init {
    model: &'static str,
    #[source]
    source: InitError,
  },
  #[error("输入图像为空")]
  EmptyInput,
  #[error("{model} 模型暂不支持 batch_predict")]
  BatchNotSupported { model: &'static str },
  #[error("{model} 模型克隆失败: {source}")]
  Clone {
    model: &'static str,
    #[source]
    source: RuntimeError,
  },
  #[error("处理错误: {0}")]
  Processor(#[from] ProcessorError),
  #[error("运行时错误: {0}")]
  Runtime(#[from] RuntimeError),
}

/// 检测器家族：决定预处理、后处理的类型以及是否需要部署配置
pub trait Family: Sized + 'static {
  type Meta: Send;
  type Preprocessor: Preprocess<Meta = Self::Meta>;
  type Postprocessor: Postprocess<Meta = Self::Meta>;

  const NEEDS_CONFIG: bool;

  fn processors(
    variant: &Variant<Self>,
    config: Option<&DeployConfig>,
  ) -> Result<(Self::Preprocessor, Self::Postprocessor), ProcessorError>;
}

/// 模型相关文件路径
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelFiles {
  pub model_file: PathBuf,
  /// 单文件格式会忽略该项
  pub params_file: Option<PathBuf>,
  pub config_file: Option<PathBuf>,
}

impl ModelFiles {
  pub fn new(model_file: impl Into<PathBuf>) -> Self {
    Self {
      model_file: model_file.into(),
      ..Default::default()
    }
  }

  /// 模型、参数、配置三件套，空字符串表示不提供
  pub fn paddle(
    model_file: impl Into<PathBuf>,
    params_file: impl Into<PathBuf>,
    config_file: impl Into<PathBuf>,
  ) -> Self {
    Self::new(model_file)
      .with_params(params_file)
      .with_config(config_file)
  }

  pub fn with_params(mut self, params_file: impl Into<PathBuf>) -> Self {
    self.params_file = non_empty(params_file.into());
    self
  }

  pub fn with_config(mut self, config_file: impl Into<PathBuf>) -> Self {
    self.config_file = non_empty(config_file.into());
    self
  }
}

fn non_empty(path: PathBuf) -> Option<PathBuf> {
  (!path.as_os_str().is_empty()).then_some(path)
}

/// 统一的检测器：变体描述 + 运行时 + 预处理 + 后处理
pub struct Detector<F: Family, R: Runtime> {
  variant: &'static Variant<F>,
  option: RuntimeOption,
  format: ModelFormat,
  runtime: R,
  preprocessor: F::Preprocessor,
  postprocessor: F::Postprocessor,
}

impl<F: Family, R: Runtime> Detector<F, R> {
  /// 从模型文件加载，任一步失败都返回初始化错误
  pub fn from_files(
    variant: &'static Variant<F>,
    files: &ModelFiles,
    option: Option<RuntimeOption>,
    format: ModelFormat,
  ) -> Result<Self, ModelError> {
    let option = option.unwrap_or_default();
    info!("初始化 {} 模型, 格式: {}", variant.name, format);

    let (runtime, preprocessor, postprocessor) = Self::load(variant, files, &option, format)
      .map_err(|source| {
        error!("{} 模型初始化失败: {}", variant.name, source);
        ModelError::Init {
          model: variant.name,
          source,
        }
      })?;

    info!("{} 模型加载完成", variant.name);
    Ok(Self::from_existing_handle(
      variant,
      runtime,
      preprocessor,
      postprocessor,
      option,
      format,
    ))
  }

  fn load(
    variant: &'static Variant<F>,
    files: &ModelFiles,
    option: &RuntimeOption,
    format: ModelFormat,
  ) -> Result<(R, F::Preprocessor, F::Postprocessor), InitError> {
    if !variant.supports_format(format) {
      return Err(InitError::UnsupportedFormat {
        format,
        allowed: variant.formats,
      });
    }
    if !R::supported_formats().contains(&format) {
      return Err(InitError::RuntimeFormat(format));
    }

    let params = if format.is_single_file() {
      if files.params_file.is_some() {
        debug!("{} 为单文件格式，忽略参数文件", format);
      }
      None
    } else {
      Some(
        files
          .params_file
          .as_deref()
          .ok_or(InitError::MissingParams(format))?,
      )
    };

    let config = if F::NEEDS_CONFIG {
      let path = files.config_file.as_deref().ok_or(InitError::MissingConfig)?;
      Some(DeployConfig::from_file(path)?)
    } else {
      if let Some(path) = &files.config_file {
        warn!("{} 不需要部署配置，忽略 {}", variant.name, path.display());
      }
      None
    };

    let (preprocessor, postprocessor) = F::processors(variant, config.as_ref())?;
    let blob = ModelBlob::read(&files.model_file, params, format)?;
    let runtime = R::load(&blob, option)?;

    Ok((runtime, preprocessor, postprocessor))
  }

  /// 由已加载的运行时直接组装，不经过文件加载
  pub fn from_existing_handle(
    variant: &'static Variant<F>,
    runtime: R,
    preprocessor: F::Preprocessor,
    postprocessor: F::Postprocessor,
    option: RuntimeOption,
    format: ModelFormat,
  ) -> Self {
    Self {
      variant,
      option,
      format,
      runtime,
      preprocessor,
      postprocessor,
    }
  }

  /// 共享权重的副本，拥有独立的执行上下文与处理配置
  pub fn try_clone(&self) -> Result<Self, ModelError> {
    debug!("克隆 {} 模型", self.variant.name);
    let runtime = self
      .runtime
      .clone_runtime()
      .map_err(|source| ModelError::Clone {
        model: self.variant.name,
        source,
      })?;
    Ok(Self::from_existing_handle(
      self.variant,
      runtime,
      self.preprocessor.clone(),
      self.postprocessor.clone(),
      self.option.clone(),
      self.format,
    ))
  }

  pub fn predict(&self, frame: &BgrFrame) -> Result<DetectResult, ModelError> {
    let mut results = self.run(std::slice::from_ref(frame), &self.postprocessor)?;
    Ok(results.remove(0))
  }

  /// 使用本次调用的阈值进行检测
  pub fn predict_with(
    &self,
    frame: &BgrFrame,
    thresholds: Thresholds,
  ) -> Result<DetectResult, ModelError> {
    let postprocessor = self.scoped_postprocessor(thresholds)?;
    let mut results = self.run(std::slice::from_ref(frame), &postprocessor)?;
    Ok(results.remove(0))
  }

  /// 批量检测，结果与输入一一对应
  pub fn batch_predict(&self, frames: &[BgrFrame]) -> Result<Vec<DetectResult>, ModelError> {
    self.check_batch()?;
    self.run(frames, &self.postprocessor)
  }

  pub fn batch_predict_with(
    &self,
    frames: &[BgrFrame],
    thresholds: Thresholds,
  ) -> Result<Vec<DetectResult>, ModelError> {
    self.check_batch()?;
    let postprocessor = self.scoped_postprocessor(thresholds)?;
    self.run(frames, &postprocessor)
  }

  fn check_batch(&self) -> Result<(), ModelError> {
    if self.variant.supports_batch {
      Ok(())
    } else {
      warn!("{} 模型不支持批量检测", self.variant.name);
      Err(ModelError::BatchNotSupported {
        model: self.variant.name,
      })
    }
  }

  fn scoped_postprocessor(&self, thresholds: Thresholds) -> Result<F::Postprocessor, ModelError> {
    check_unit("conf_threshold", thresholds.conf_threshold)?;
    check_unit("nms_threshold", thresholds.nms_threshold)?;
    Ok(self.postprocessor.with_thresholds(thresholds))
  }

  fn run(
    &self,
    frames: &[BgrFrame],
    postprocessor: &F::Postprocessor,
  ) -> Result<Vec<DetectResult>, ModelError> {
    if frames.is_empty() {
      return Ok(Vec::new());
    }
    if frames.iter().any(BgrFrame::is_empty) {
      warn!("{} 收到空图像", self.variant.name);
      return Err(ModelError::EmptyInput);
    }

    debug!("{} 预处理 {} 帧", self.variant.name, frames.len());
    let (inputs, metas) = self.preprocessor.run(frames)?;
    debug!("{} 执行推理", self.variant.name);
    let outputs = self.runtime.infer(&inputs)?;
    let results = postprocessor.run(&outputs, &metas)?;

    if results.len() != frames.len() {
      return Err(
        ProcessorError::BatchMismatch {
          expected: frames.len(),
          actual: results.len(),
        }
        .into(),
      );
    }
    debug!(
      "{} 检测完成: {:?}",
      self.variant.name,
      results.iter().map(DetectResult::len).collect::<Vec<_>>()
    );
    Ok(results)
  }

  pub fn name(&self) -> &'static str {
    self.variant.name
  }

  pub fn variant(&self) -> &'static Variant<F> {
    self.variant
  }

  /// 构造成功即已初始化
  pub fn initialized(&self) -> bool {
    true
  }

  pub fn runtime_option(&self) -> &RuntimeOption {
    &self.option
  }

  pub fn model_format(&self) -> ModelFormat {
    self.format
  }

  pub fn runtime(&self) -> &R {
    &self.runtime
  }

  pub fn preprocessor(&self) -> &F::Preprocessor {
    &self.preprocessor
  }

  pub fn preprocessor_mut(&mut self) -> &mut F::Preprocessor {
    &mut self.preprocessor
  }

  pub fn postprocessor(&self) -> &F::Postprocessor {
    &self.postprocessor
  }

  pub fn postprocessor_mut(&mut self) -> &mut F::Postprocessor {
    &mut self.postprocessor
  }
}

impl<F: Family, R: Runtime> Model for Detector<F, R> {
  type Input = BgrFrame;
  type Output = DetectResult;
  type Error = ModelError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    self.predict(input)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_paths_are_treated_as_absent() {
    let files = ModelFiles::paddle("model.rknn", "", "infer_cfg.yml");
    assert_eq!(files.params_file, None);
    assert_eq!(files.config_file, Some(PathBuf::from("infer_cfg.yml")));
  }
}
