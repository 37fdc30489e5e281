// 该文件是 Beifeng （北风） 项目的一部分。
// src/runtime.rs - 推理运行时边界
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

use std::{borrow::Cow, path::Path, sync::Arc};

use thiserror::Error;
use tracing::{debug, info};

use crate::option::{ModelFormat, RuntimeOption};

#[cfg(feature = "rknpu")]
mod rknpu_runtime;
#[cfg(feature = "rknpu")]
pub use self::rknpu_runtime::RknpuRuntime;

#[derive(Error, Debug)]
pub enum RuntimeError {
  #[error("模型文件读取失败: {path}: {source}")]
  ModelRead {
    path: String,
    source: std::io::Error,
  },
  #[error("运行时不支持模型格式 {0}")]
  UnsupportedFormat(ModelFormat),
  #[error("模型无效: {0}")]
  InvalidModel(String),
  #[error("输入无效: {0}")]
  InvalidInput(String),
  #[error("张量 {name} 类型不匹配，期望 {expected}")]
  DataType { name: String, expected: &'static str },
  #[error("后端错误: {0}")]
  Backend(String),
}

/// 张量数据
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
  U8(Box<[u8]>),
  F32(Box<[f32]>),
}

impl TensorData {
  pub fn len(&self) -> usize {
    match self {
      TensorData::U8(data) => data.len(),
      TensorData::F32(data) => data.len(),
    }
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// 运行时的输入输出张量
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  pub name: String,
  pub shape: Box<[usize]>,
  pub data: TensorData,
}

impl Tensor {
  pub fn from_f32(name: &str, shape: &[usize], data: Vec<f32>) -> Self {
    debug_assert_eq!(shape.iter().product::<usize>(), data.len());
    Self {
      name: name.to_string(),
      shape: shape.into(),
      data: TensorData::F32(data.into_boxed_slice()),
    }
  }

  pub fn from_u8(name: &str, shape: &[usize], data: Vec<u8>) -> Self {
    debug_assert_eq!(shape.iter().product::<usize>(), data.len());
    Self {
      name: name.to_string(),
      shape: shape.into(),
      data: TensorData::U8(data.into_boxed_slice()),
    }
  }

  pub fn numel(&self) -> usize {
    self.shape.iter().product()
  }

  pub fn as_f32(&self) -> Result<&[f32], RuntimeError> {
    match &self.data {
      TensorData::F32(data) => Ok(data),
      TensorData::U8(_) => Err(RuntimeError::DataType {
        name: self.name.clone(),
        expected: "f32",
      }),
    }
  }

  pub fn as_u8(&self) -> Result<&[u8], RuntimeError> {
    match &self.data {
      TensorData::U8(data) => Ok(data),
      TensorData::F32(_) => Err(RuntimeError::DataType {
        name: self.name.clone(),
        expected: "u8",
      }),
    }
  }
}

/// 已读入内存的模型文件，克隆时在各运行时实例之间共享
#[derive(Debug, Clone)]
pub struct ModelBlob {
  pub format: ModelFormat,
  pub model: Arc<[u8]>,
  pub params: Option<Arc<[u8]>>,
}

impl ModelBlob {
  pub fn read(
    model_file: &Path,
    params_file: Option<&Path>,
    format: ModelFormat,
  ) -> Result<Self, RuntimeError> {
    info!("加载模型文件: {}", model_file.display());
    let model = read_file(model_file)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model.len() as f64 / (1024.0 * 1024.0)
    );

    let params = match params_file {
      Some(path) if !format.is_single_file() => {
        info!("加载参数文件: {}", path.display());
        Some(read_file(path)?)
      }
      _ => None,
    };

    Ok(Self {
      format,
      model: model.into(),
      params: params.map(Into::into),
    })
  }
}

fn read_file(path: &Path) -> Result<Vec<u8>, RuntimeError> {
  std::fs::read(path).map_err(|source| RuntimeError::ModelRead {
    path: path.display().to_string(),
    source,
  })
}

/// 把 NHWC 图像批次沿第 0 维拆成逐张的 u8 数据
///
/// 关闭归一化后的浮点输入取值仍在 0~255，按此转换。
#[cfg_attr(not(feature = "rknpu"), allow(dead_code))]
pub(crate) fn split_nhwc_batch(input: &Tensor) -> Result<Vec<Cow<'_, [u8]>>, RuntimeError> {
  if input.shape.len() != 4 || input.shape[3] != 3 || input.shape[0] == 0 {
    return Err(RuntimeError::InvalidInput(format!(
      "需要非空的 NHWC 输入，实际形状 {:?}",
      input.shape
    )));
  }
  let per_image = input.shape[1..].iter().product::<usize>();
  if per_image == 0 || input.data.len() != input.shape[0] * per_image {
    return Err(RuntimeError::InvalidInput(format!(
      "输入数据长度 {} 与形状 {:?} 不符",
      input.data.len(),
      input.shape
    )));
  }

  Ok(match &input.data {
    TensorData::U8(data) => data.chunks(per_image).map(Cow::Borrowed).collect(),
    TensorData::F32(data) => data
      .chunks(per_image)
      .map(|image| {
        Cow::Owned(
          image
            .iter()
            .map(|&v| v.round().clamp(0.0, 255.0) as u8)
            .collect(),
        )
      })
      .collect(),
  })
}

/// 按图像顺序沿第 0 维拼接逐张推理得到的输出
#[cfg_attr(not(feature = "rknpu"), allow(dead_code))]
pub(crate) fn concat_batch_outputs(per_image: Vec<Vec<Tensor>>) -> Result<Vec<Tensor>, RuntimeError> {
  let Some(first) = per_image.first() else {
    return Ok(Vec::new());
  };
  let num_outputs = first.len();
  if per_image.iter().any(|outputs| outputs.len() != num_outputs) {
    return Err(RuntimeError::InvalidModel("各图像的输出数量不一致".to_string()));
  }

  (0..num_outputs)
    .map(|idx| {
      let head = &per_image[0][idx];
      let mut rows = 0;
      let mut data = Vec::with_capacity(head.numel() * per_image.len());
      for outputs in &per_image {
        let tensor = &outputs[idx];
        if tensor.shape.len() != head.shape.len() || tensor.shape.get(1..) != head.shape.get(1..) {
          return Err(RuntimeError::InvalidModel(format!(
            "输出 {} 的形状不一致: {:?} 与 {:?}",
            head.name, head.shape, tensor.shape
          )));
        }
        rows += tensor.shape.first().copied().unwrap_or(1);
        data.extend_from_slice(tensor.as_f32()?);
      }
      let mut shape = head.shape.to_vec();
      match shape.first_mut() {
        Some(dim) => *dim = rows,
        None => shape.push(rows),
      }
      Ok(Tensor::from_f32(&head.name, &shape, data))
    })
    .collect()
}

/// 推理运行时：加载模型、执行推理、共享权重地克隆
///
/// 检测器只依赖此接口，不依赖具体的后端实现。
pub trait Runtime: Sized + Send + Sync {
  fn supported_formats() -> &'static [ModelFormat];

  /// 只检查格式，不读取任何文件
  fn check_format(format: ModelFormat) -> Result<(), RuntimeError> {
    if Self::supported_formats().contains(&format) {
      Ok(())
    } else {
      Err(RuntimeError::UnsupportedFormat(format))
    }
  }

  fn load(blob: &ModelBlob, option: &RuntimeOption) -> Result<Self, RuntimeError>;

  fn infer(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>, RuntimeError>;

  /// 创建共享权重、拥有独立执行上下文的新实例，不得重新读取磁盘
  fn clone_runtime(&self) -> Result<Self, RuntimeError>;
}
