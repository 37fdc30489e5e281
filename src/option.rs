// 该文件是 Beifeng （北风） 项目的一部分。
// src/option.rs - 运行时选项
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

use std::{collections::HashMap, fmt, path::Path, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// 模型文件格式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelFormat {
  /// Paddle 原生格式，模型结构与参数分两个文件
  Paddle,
  /// ONNX 交换格式
  Onnx,
  /// TorchScript 格式
  TorchScript,
  /// Rockchip NPU 编译后的模型
  Rknn,
  /// Sophgo TPU 编译后的 bmodel
  Sophgo,
}

impl ModelFormat {
  /// 除 Paddle 外，其余格式均为单文件格式，参数文件会被忽略
  pub fn is_single_file(&self) -> bool {
    !matches!(self, ModelFormat::Paddle)
  }

  /// 按扩展名推断模型格式，`.pdmodel` 视为 Paddle
  pub fn from_path(path: &Path) -> Result<Self, OptionError> {
    match path.extension().and_then(|ext| ext.to_str()) {
      Some("pdmodel") => Ok(ModelFormat::Paddle),
      Some(ext) => ext.parse(),
      None => Err(OptionError::UnknownModelFormat(path.display().to_string())),
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      ModelFormat::Paddle => "paddle",
      ModelFormat::Onnx => "onnx",
      ModelFormat::TorchScript => "torchscript",
      ModelFormat::Rknn => "rknn",
      ModelFormat::Sophgo => "sophgo",
    }
  }
}

impl fmt::Display for ModelFormat {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ModelFormat {
  type Err = OptionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "paddle" => Ok(ModelFormat::Paddle),
      "onnx" => Ok(ModelFormat::Onnx),
      "torchscript" => Ok(ModelFormat::TorchScript),
      "rknn" => Ok(ModelFormat::Rknn),
      "sophgo" | "bmodel" => Ok(ModelFormat::Sophgo),
      other => Err(OptionError::UnknownModelFormat(other.to_string())),
    }
  }
}

/// 推理设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Device {
  Cpu,
  Gpu,
  KunlunXin,
  Rknpu,
  Sophgo,
}

impl FromStr for Device {
  type Err = OptionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "cpu" => Ok(Device::Cpu),
      "gpu" => Ok(Device::Gpu),
      "xpu" => Ok(Device::KunlunXin),
      "npu" | "rknpu" => Ok(Device::Rknpu),
      "sophgo" | "tpu" => Ok(Device::Sophgo),
      other => Err(OptionError::UnknownDevice(other.to_string())),
    }
  }
}

/// 推理后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Backend {
  /// 由运行时按模型格式与设备自行选择
  Default,
  Ort,
  OpenVino,
  PaddleInference,
  PaddleLite,
  TensorRt,
  Rknpu2,
  Sophgo,
}

impl FromStr for Backend {
  type Err = OptionError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "default" => Ok(Backend::Default),
      "ort" => Ok(Backend::Ort),
      "ov" | "openvino" => Ok(Backend::OpenVino),
      "paddle" => Ok(Backend::PaddleInference),
      "lite" => Ok(Backend::PaddleLite),
      "trt" => Ok(Backend::TensorRt),
      "rknpu2" => Ok(Backend::Rknpu2),
      "sophgo" => Ok(Backend::Sophgo),
      other => Err(OptionError::UnknownBackend(other.to_string())),
    }
  }
}

/// Rockchip NPU 核心选择
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RknpuCoreMask {
  #[default]
  Auto,
  Core0,
  Core1,
  Core2,
  Core01,
  Core012,
}

#[derive(Error, Debug)]
pub enum OptionError {
  #[error("未知的模型格式: {0}")]
  UnknownModelFormat(String),
  #[error("未知的设备: {0}")]
  UnknownDevice(String),
  #[error("未知的后端: {0}")]
  UnknownBackend(String),
  #[error("设备 {device:?} 不支持后端 {backend}")]
  UnsupportedBackend { device: Device, backend: String },
  #[error("配置项 {0} 缺失")]
  MissingKey(&'static str),
  #[error("配置项 {key} 的值无效: {value}")]
  InvalidValue { key: &'static str, value: String },
  #[error("读取配置文件失败: {0}")]
  Io(#[from] std::io::Error),
}

/// 运行时选项，传递给运行时加载器
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeOption {
  pub device: Device,
  pub device_id: u32,
  pub backend: Backend,
  /// CPU 线程数，`None` 表示由后端决定
  pub cpu_thread_num: Option<usize>,
  pub enable_fp16: bool,
  pub rknpu_core_mask: RknpuCoreMask,
  /// TensorRT 序列化缓存文件
  pub trt_serialize_file: Option<String>,
  pub enable_paddle_trt: bool,
  pub xpu_l3_cache: Option<u32>,
  pub profiling: Option<Profiling>,
}

/// 运行时性能分析参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profiling {
  pub include_h2d_d2h: bool,
  pub repeat: usize,
  pub warmup: usize,
}

impl Default for RuntimeOption {
  fn default() -> Self {
    Self {
      device: Device::Cpu,
      device_id: 0,
      backend: Backend::Default,
      cpu_thread_num: None,
      enable_fp16: false,
      rknpu_core_mask: RknpuCoreMask::Auto,
      trt_serialize_file: None,
      enable_paddle_trt: false,
      xpu_l3_cache: None,
      profiling: None,
    }
  }
}

impl RuntimeOption {
  pub fn use_cpu(mut self) -> Self {
    self.device = Device::Cpu;
    self
  }

  pub fn use_gpu(mut self, device_id: u32) -> Self {
    self.device = Device::Gpu;
    self.device_id = device_id;
    self
  }

  pub fn use_kunlunxin(mut self, device_id: u32, l3_cache: u32) -> Self {
    self.device = Device::KunlunXin;
    self.device_id = device_id;
    self.xpu_l3_cache = Some(l3_cache);
    self
  }

  pub fn use_rknpu2(mut self, core_mask: RknpuCoreMask) -> Self {
    self.device = Device::Rknpu;
    self.backend = Backend::Rknpu2;
    self.rknpu_core_mask = core_mask;
    self
  }

  pub fn use_sophgo(mut self) -> Self {
    self.device = Device::Sophgo;
    self.backend = Backend::Sophgo;
    self
  }

  pub fn use_backend(mut self, backend: Backend) -> Self {
    self.backend = backend;
    self
  }

  pub fn set_cpu_thread_num(mut self, num: usize) -> Self {
    self.cpu_thread_num = Some(num);
    self
  }

  pub fn enable_fp16(mut self) -> Self {
    self.enable_fp16 = true;
    self
  }

  pub fn enable_profiling(mut self, include_h2d_d2h: bool, repeat: usize, warmup: usize) -> Self {
    self.profiling = Some(Profiling {
      include_h2d_d2h,
      repeat,
      warmup,
    });
    self
  }

  /// 从基准测试配置文件构建运行时选项
  ///
  /// 文件每行一个 `key: value`，`#` 开头的行为注释。
  /// TensorRT 序列化缓存放在 `model_dir` 下。
  pub fn from_benchmark_config(
    path: impl AsRef<Path>,
    model_dir: impl AsRef<Path>,
  ) -> Result<BenchmarkConfig, OptionError> {
    let path = path.as_ref();
    info!("加载基准测试配置: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    BenchmarkConfig::parse(&content, model_dir.as_ref())
  }
}

const TRT_SERIALIZE_FILE: &str = "trt_serialized.trt";

/// 基准测试配置：运行时选项与预热/重复次数
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkConfig {
  pub option: RuntimeOption,
  pub warmup: usize,
  pub repeat: usize,
}

impl BenchmarkConfig {
  pub fn parse(content: &str, model_dir: &Path) -> Result<Self, OptionError> {
    let info: HashMap<&str, &str> = content
      .lines()
      .map(str::trim)
      .filter(|line| !line.is_empty() && !line.starts_with('#'))
      .filter_map(|line| line.split_once(':'))
      .map(|(k, v)| (k.trim(), v.trim()))
      .collect();
    debug!("基准测试配置项: {:?}", info);

    let get = |key: &'static str| info.get(key).copied().ok_or(OptionError::MissingKey(key));
    let parse_num = |key: &'static str| -> Result<usize, OptionError> {
      let value = get(key)?;
      value.parse().map_err(|_| OptionError::InvalidValue {
        key,
        value: value.to_string(),
      })
    };
    let flag = |key: &'static str| info.get(key).map(|v| *v == "true").unwrap_or(false);

    let warmup = parse_num("warmup")?;
    let repeat = parse_num("repeat")?;
    let device: Device = get("device")?.parse()?;
    let backend_name = get("backend")?;

    let mut option = RuntimeOption::default();
    match device {
      Device::Gpu => {
        option = option.use_gpu(parse_num("device_id")? as u32);
        match backend_name {
          "default" => {}
          "ort" => option.backend = Backend::Ort,
          "paddle" => option.backend = Backend::PaddleInference,
          "trt" | "paddle_trt" => {
            option.backend = Backend::TensorRt;
            option.trt_serialize_file = Some(
              model_dir
                .join(TRT_SERIALIZE_FILE)
                .to_string_lossy()
                .into_owned(),
            );
            if backend_name == "paddle_trt" {
              option.backend = Backend::PaddleInference;
              option.enable_paddle_trt = true;
            }
            option.enable_fp16 = flag("use_fp16");
          }
          other => return Err(unsupported(device, other)),
        }
      }
      Device::Cpu => {
        option = option.set_cpu_thread_num(parse_num("cpu_thread_nums")?);
        match backend_name {
          "default" => {}
          "ort" => option.backend = Backend::Ort,
          "ov" => option.backend = Backend::OpenVino,
          "paddle" => option.backend = Backend::PaddleInference,
          "lite" => {
            option.backend = Backend::PaddleLite;
            option.enable_fp16 = flag("use_fp16");
          }
          other => return Err(unsupported(device, other)),
        }
      }
      Device::KunlunXin => {
        option = option.use_kunlunxin(
          parse_num("device_id")? as u32,
          parse_num("xpu_l3_cache")? as u32,
        );
        match backend_name {
          "default" => {}
          "ort" => option.backend = Backend::Ort,
          "paddle" => option.backend = Backend::PaddleInference,
          "lite" => {
            option.backend = Backend::PaddleLite;
            option.enable_fp16 = flag("use_fp16");
          }
          other => return Err(unsupported(device, other)),
        }
      }
      Device::Rknpu => match backend_name {
        "default" | "rknpu2" => option = option.use_rknpu2(RknpuCoreMask::Auto),
        other => return Err(unsupported(device, other)),
      },
      Device::Sophgo => match backend_name {
        "default" | "sophgo" => option = option.use_sophgo(),
        other => return Err(unsupported(device, other)),
      },
    }

    if info.get("profile_mode") == Some(&"runtime") {
      option = option.enable_profiling(flag("include_h2d_d2h"), repeat, warmup);
    }

    Ok(BenchmarkConfig {
      option,
      warmup,
      repeat,
    })
  }
}

fn unsupported(device: Device, backend: &str) -> OptionError {
  OptionError::UnsupportedBackend {
    device,
    backend: backend.to_string(),
  }
}
