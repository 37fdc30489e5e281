// 该文件是 Beifeng （北风） 项目的一部分。
// src/processor.rs - 预处理与后处理接口
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

use thiserror::Error;

use crate::{
  frame::BgrFrame,
  model::DetectResult,
  runtime::{RuntimeError, Tensor},
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProcessorError {
  #[error("`size` 必须包含 2 个元素 [width, height]，实际包含 {0} 个")]
  InvalidSize(usize),
  #[error("`size` 的元素必须大于零")]
  ZeroSize,
  #[error("`padding_value` 的长度必须等于通道数 {expected}，实际为 {actual}")]
  InvalidPaddingValue { expected: usize, actual: usize },
  #[error("`{name}` 必须位于 [0, 1] 区间，实际为 {value}")]
  ThresholdOutOfRange { name: &'static str, value: f32 },
  #[error("`class_num` 必须为正整数")]
  InvalidClassNum,
  #[error("`anchor` 必须包含 {branches} 组，每组为非空的偶数个元素")]
  InvalidAnchor { branches: usize },
  #[error("`{name}` 必须为正数，实际为 {value}")]
  NonPositive { name: &'static str, value: i64 },
  #[error("批大小不匹配: 期望 {expected}, 实际 {actual}")]
  BatchMismatch { expected: usize, actual: usize },
  #[error("不支持的预处理配置: {0}")]
  UnsupportedOp(String),
  #[error("模型输出无效: {0}")]
  InvalidOutput(String),
}

impl From<RuntimeError> for ProcessorError {
  fn from(err: RuntimeError) -> Self {
    ProcessorError::InvalidOutput(err.to_string())
  }
}

/// 单次调用的阈值，不修改检测器中保存的后处理配置
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
  pub conf_threshold: f32,
  pub nms_threshold: f32,
}

impl Default for Thresholds {
  fn default() -> Self {
    Self {
      conf_threshold: 0.25,
      nms_threshold: 0.5,
    }
  }
}

impl Thresholds {
  pub fn new(conf_threshold: f32, nms_threshold: f32) -> Result<Self, ProcessorError> {
    check_unit("conf_threshold", conf_threshold)?;
    check_unit("nms_threshold", nms_threshold)?;
    Ok(Self {
      conf_threshold,
      nms_threshold,
    })
  }
}

pub(crate) fn check_unit(name: &'static str, value: f32) -> Result<(), ProcessorError> {
  if (0.0..=1.0).contains(&value) {
    Ok(())
  } else {
    Err(ProcessorError::ThresholdOutOfRange { name, value })
  }
}

/// 预处理：把一批帧转为运行时输入，同时给出每帧的元信息供后处理使用
pub trait Preprocess: Clone + Send + Sync {
  type Meta: Send;

  fn run(&self, frames: &[BgrFrame]) -> Result<(Vec<Tensor>, Vec<Self::Meta>), ProcessorError>;
}

/// 后处理：把运行时输出解码为每帧一个检测结果
pub trait Postprocess: Clone + Send + Sync {
  type Meta;

  fn run(&self, outputs: &[Tensor], metas: &[Self::Meta])
  -> Result<Vec<DetectResult>, ProcessorError>;

  /// 返回应用了给定阈值的副本
  fn with_thresholds(&self, thresholds: Thresholds) -> Self;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn thresholds_are_range_checked() {
    assert!(Thresholds::new(0.25, 0.5).is_ok());
    assert_eq!(
      Thresholds::new(1.5, 0.5),
      Err(ProcessorError::ThresholdOutOfRange {
        name: "conf_threshold",
        value: 1.5
      })
    );
    assert!(Thresholds::new(0.2, -0.1).is_err());
    assert!(Thresholds::new(f32::NAN, 0.5).is_err());
  }
}
