// 该文件是 Beifeng （北风） 项目的一部分。
// src/postprocess.rs - 后处理
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

use std::borrow::Cow;

use crate::{
  processor::ProcessorError,
  runtime::{Tensor, TensorData},
};

mod nms;
mod paddle_det;
mod rkyolo;

pub use self::paddle_det::{NmsOption, PaddleDetPostprocessor};
pub use self::rkyolo::{RkYoloHead, RkYoloPostprocessor};

/// 以浮点读取张量，u8 数据按数值转换
fn values(tensor: &Tensor) -> Cow<'_, [f32]> {
  match &tensor.data {
    TensorData::F32(data) => Cow::Borrowed(data),
    TensorData::U8(data) => Cow::Owned(data.iter().map(|&v| v as f32).collect()),
  }
}

fn output_at(outputs: &[Tensor], index: usize) -> Result<&Tensor, ProcessorError> {
  outputs.get(index).ok_or_else(|| {
    ProcessorError::InvalidOutput(format!(
      "需要第 {} 个输出，实际只有 {} 个",
      index,
      outputs.len()
    ))
  })
}

/// 把框裁剪到 [0, width] x [0, height]
fn clip_box(bbox: [f32; 4], width: f32, height: f32) -> [f32; 4] {
  [
    bbox[0].clamp(0.0, width),
    bbox[1].clamp(0.0, height),
    bbox[2].clamp(0.0, width),
    bbox[3].clamp(0.0, height),
  ]
}
