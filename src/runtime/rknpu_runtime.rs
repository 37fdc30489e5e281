// 该文件是 Beifeng （北风） 项目的一部分。
// src/runtime/rknpu_runtime.rs - Rockchip NPU 运行时
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

use std::sync::Mutex;

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use tracing::{debug, error, info};

use crate::{
  option::{ModelFormat, RuntimeOption},
  runtime::{ModelBlob, Runtime, RuntimeError, Tensor, concat_batch_outputs, split_nhwc_batch},
};

impl From<rknpu::Error> for RuntimeError {
  fn from(err: rknpu::Error) -> Self {
    RuntimeError::Backend(err.to_string())
  }
}

/// RKNN 推理上下文
///
/// 输出张量以一维形状返回，后处理按已知的输入尺寸恢复其布局。
pub struct RknpuRuntime {
  blob: ModelBlob,
  context: Mutex<Context>,
  num_outputs: u32,
}

impl RknpuRuntime {
  fn create(blob: ModelBlob) -> Result<Self, RuntimeError> {
    info!("创建 RKNN 推理上下文");
    let context = Context::new(&blob.model, InitFlags::default())?;

    match context.sdk_version() {
      Ok(version) => {
        if let Ok(api_ver) = version.api_version() {
          debug!("模型 API 版本: {}", api_ver);
        }
        if let Ok(drv_ver) = version.driver_version() {
          debug!("模型驱动版本: {}", drv_ver);
        }
      }
      Err(e) => {
        error!("查询 SDK 版本失败: {}", e);
        return Err(RuntimeError::InvalidModel(format!("无法查询 SDK 版本: {}", e)));
      }
    }

    let num_inputs = context.num_inputs()?;
    let num_outputs = context.num_outputs()?;
    debug!("模型输入数量: {}", num_inputs);
    debug!("模型输出数量: {}", num_outputs);
    if num_inputs != 1 {
      return Err(RuntimeError::InvalidModel(format!(
        "预期模型输入数量为 1, 实际为 {}",
        num_inputs
      )));
    }

    Ok(Self {
      blob,
      context: Mutex::new(context),
      num_outputs,
    })
  }
}

impl Runtime for RknpuRuntime {
  fn supported_formats() -> &'static [ModelFormat] {
    &[ModelFormat::Rknn]
  }

  fn load(blob: &ModelBlob, option: &RuntimeOption) -> Result<Self, RuntimeError> {
    if blob.format != ModelFormat::Rknn {
      return Err(RuntimeError::UnsupportedFormat(blob.format));
    }
    debug!("RKNN 核心选择: {:?}", option.rknpu_core_mask);
    Self::create(blob.clone())
  }

  fn infer(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>, RuntimeError> {
    // 首个输入为图像，其余（scale_factor 等）由后处理使用
    let input = inputs
      .first()
      .ok_or_else(|| RuntimeError::InvalidInput("缺少图像输入".to_string()))?;
    // 模型输入的批大小为 1，逐张执行
    let images = split_nhwc_batch(input)?;

    let context = self
      .context
      .lock()
      .map_err(|_| RuntimeError::Backend("RKNN 上下文锁已失效".to_string()))?;

    let mut per_image = Vec::with_capacity(images.len());
    for (idx, image) in images.iter().enumerate() {
      debug!("设置模型输入: 第 {} 张", idx);
      context.set_input(0, image, TensorFormat::NHWC, TensorType::UInt8)?;
      debug!("执行模型推理");
      context.run()?;
      debug!("获取模型输出");
      let output = context.get_outputs()?;
      let tensors = (0..self.num_outputs as usize)
        .map(|out| {
          let data = output.get_f32(out)?.to_vec();
          Ok(Tensor::from_f32(&format!("output{}", out), &[data.len()], data))
        })
        .collect::<Result<Vec<_>, RuntimeError>>()?;
      per_image.push(tensors);
    }

    concat_batch_outputs(per_image)
  }

  fn clone_runtime(&self) -> Result<Self, RuntimeError> {
    // 权重来自内存中的共享副本
    Self::create(self.blob.clone())
  }
}
