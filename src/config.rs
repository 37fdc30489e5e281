// 该文件是 Beifeng （北风） 项目的一部分。
// src/config.rs - 部署配置文件（infer_cfg.yml）
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

use std::path::Path;

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("读取配置文件失败: {path}: {source}")]
  Io {
    path: String,
    source: std::io::Error,
  },
  #[error("解析配置文件失败: {0}")]
  Parse(#[from] serde_yaml::Error),
  #[error("配置文件缺少预处理步骤")]
  NoPreprocess,
}

/// 预处理算子，对应配置文件 `Preprocess` 列表中的一项
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum PreprocessOp {
  Resize {
    /// [height, width]
    target_size: [u32; 2],
    #[serde(default)]
    keep_ratio: bool,
    #[serde(default = "default_interp")]
    interp: i32,
  },
  NormalizeImage {
    mean: [f32; 3],
    std: [f32; 3],
    #[serde(default = "default_true")]
    is_scale: bool,
    #[serde(default)]
    norm_type: Option<String>,
  },
  Permute,
  PadStride {
    stride: u32,
  },
  /// 右侧与下方填充到固定尺寸
  Pad {
    /// [height, width]，配置中也可写成单个整数
    #[serde(deserialize_with = "square_or_hw")]
    size: [u32; 2],
    /// RGB 顺序
    #[serde(default = "default_fill_value")]
    fill_value: [f32; 3],
  },
}

/// 配置文件中的 NMS 参数，缺省项沿用后处理器的默认值
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NmsSection {
  pub keep_top_k: Option<i64>,
  pub nms_threshold: Option<f32>,
  pub nms_top_k: Option<i64>,
  pub score_threshold: Option<f32>,
  pub normalized: Option<bool>,
  pub background_label: Option<i64>,
}

/// PaddleDetection 导出的部署配置
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DeployConfig {
  #[serde(default)]
  pub mode: Option<String>,
  #[serde(default)]
  pub arch: Option<String>,
  #[serde(default)]
  pub draw_threshold: Option<f32>,
  #[serde(rename = "Preprocess", default)]
  pub preprocess: Vec<PreprocessOp>,
  #[serde(default)]
  pub label_list: Vec<String>,
  #[serde(rename = "NMS", default)]
  pub nms: Option<NmsSection>,
}

fn default_true() -> bool {
  true
}

fn default_interp() -> i32 {
  1
}

fn default_fill_value() -> [f32; 3] {
  [114.0; 3]
}

fn square_or_hw<'de, D: Deserializer<'de>>(deserializer: D) -> Result<[u32; 2], D::Error> {
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum Size {
    Square(u32),
    Hw([u32; 2]),
  }
  Ok(match Size::deserialize(deserializer)? {
    Size::Square(side) => [side, side],
    Size::Hw(hw) => hw,
  })
}

impl DeployConfig {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    info!("加载部署配置: {}", path.display());
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.display().to_string(),
      source,
    })?;
    Self::from_yaml(&content)
  }

  pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
    let config: DeployConfig = serde_yaml::from_str(content)?;
    if config.preprocess.is_empty() {
      return Err(ConfigError::NoPreprocess);
    }
    debug!(
      "部署配置: arch={:?}, 预处理步骤 {} 个, 类别 {} 个",
      config.arch,
      config.preprocess.len(),
      config.label_list.len()
    );
    Ok(config)
  }

  pub fn label(&self, class_id: i32) -> Option<&str> {
    usize::try_from(class_id)
      .ok()
      .and_then(|idx| self.label_list.get(idx))
      .map(String::as_str)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const PPYOLOE_CFG: &str = r#"
mode: paddle
draw_threshold: 0.5
metric: COCO
use_dynamic_shape: false
arch: YOLO
min_subgraph_size: 3
Preprocess:
- interp: 2
  keep_ratio: false
  target_size:
  - 640
  - 640
  type: Resize
- is_scale: true
  mean: [0.0, 0.0, 0.0]
  std: [1.0, 1.0, 1.0]
  type: NormalizeImage
- type: Permute
label_list:
- person
- bicycle
NMS:
  keep_top_k: 100
  name: MultiClassNMS
  nms_threshold: 0.7
  nms_top_k: 1000
  score_threshold: 0.01
"#;

  #[test]
  fn parse_ppyoloe_config() {
    let cfg = DeployConfig::from_yaml(PPYOLOE_CFG).unwrap();
    assert_eq!(cfg.arch.as_deref(), Some("YOLO"));
    assert_eq!(cfg.preprocess.len(), 3);
    assert_eq!(
      cfg.preprocess[0],
      PreprocessOp::Resize {
        target_size: [640, 640],
        keep_ratio: false,
        interp: 2
      }
    );
    assert_eq!(cfg.preprocess[2], PreprocessOp::Permute);
    assert_eq!(cfg.label(1), Some("bicycle"));
    assert_eq!(cfg.label(-1), None);
    assert_eq!(cfg.nms.as_ref().and_then(|n| n.nms_threshold), Some(0.7));
  }

  const YOLOX_CFG: &str = r#"
mode: paddle
arch: YOLOX
Preprocess:
- interp: 1
  keep_ratio: true
  target_size: [640, 640]
  type: Resize
- fill_value: [114.0, 114.0, 114.0]
  size: [640, 640]
  type: Pad
- type: Permute
label_list:
- person
"#;

  #[test]
  fn parse_yolox_config_with_pad() {
    let cfg = DeployConfig::from_yaml(YOLOX_CFG).unwrap();
    assert_eq!(cfg.preprocess.len(), 3);
    assert_eq!(
      cfg.preprocess[1],
      PreprocessOp::Pad {
        size: [640, 640],
        fill_value: [114.0, 114.0, 114.0]
      }
    );
  }

  #[test]
  fn pad_accepts_scalar_size_and_default_fill() {
    let cfg = DeployConfig::from_yaml("Preprocess:
- type: Pad
  size: 320
").unwrap();
    assert_eq!(
      cfg.preprocess[0],
      PreprocessOp::Pad {
        size: [320, 320],
        fill_value: [114.0; 3]
      }
    );
  }

  #[test]
  fn unknown_operator_is_rejected() {
    let err = DeployConfig::from_yaml("Preprocess:\n- type: Mosaic\n").unwrap_err();
    assert!(matches!(err, ConfigError::Parse(_)));
  }

  #[test]
  fn empty_preprocess_is_rejected() {
    let err = DeployConfig::from_yaml("arch: YOLO\nlabel_list: []\n").unwrap_err();
    assert!(matches!(err, ConfigError::NoPreprocess));
  }
}
