// 该文件是 Beifeng （北风） 项目的一部分。
// src/model.rs - 模型
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

use std::fmt;

use serde::Serialize;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

impl<M: Model + ?Sized> Model for &M {
  type Input = M::Input;
  type Output = M::Output;
  type Error = M::Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    (**self).infer(input)
  }
}

/// 实例分割掩码，取值 0 或 1，尺寸与原图一致
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mask {
  pub height: usize,
  pub width: usize,
  #[serde(skip)]
  pub data: Box<[u8]>,
}

impl Mask {
  pub fn area(&self) -> usize {
    self.data.iter().filter(|&&v| v != 0).count()
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectItem {
  pub class_id: i32,
  pub score: f32,
  pub bbox: [f32; 4], // [x_min, y_min, x_max, y_max]，原图像素坐标
  #[serde(skip_serializing_if = "Option::is_none")]
  pub mask: Option<Mask>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectResult {
  pub items: Box<[DetectItem]>,
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }

  pub fn contain_masks(&self) -> bool {
    self.items.iter().any(|item| item.mask.is_some())
  }

  /// 分数高于阈值的检测项
  pub fn above(&self, score_threshold: f32) -> impl Iterator<Item = &DetectItem> {
    self
      .items
      .iter()
      .filter(move |item| item.score > score_threshold)
  }
}

impl From<Vec<DetectItem>> for DetectResult {
  fn from(items: Vec<DetectItem>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

impl fmt::Display for DetectResult {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "DetectionResult: [xmin, ymin, xmax, ymax, score, label_id]")?;
    for item in self.items.iter() {
      let [x1, y1, x2, y2] = item.bbox;
      write!(
        f,
        "{:.6},{:.6}, {:.6}, {:.6}, {:.6}, {}",
        x1, y1, x2, y2, item.score, item.class_id
      )?;
      if let Some(mask) = &item.mask {
        write!(f, ", mask [{}, {}]", mask.height, mask.width)?;
      }
      writeln!(f)?;
    }
    Ok(())
  }
}

mod detector;
mod variants;

pub use self::detector::{Detector, Family, InitError, ModelError, ModelFiles};
pub use self::variants::{
  Arch, PaddleDet, PaddleDetModel, RkYolo, RkYoloModel, Variant, paddle_det, rkyolo,
};

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn display_lists_one_line_per_item() {
    let result = DetectResult::from(vec![
      DetectItem {
        class_id: 0,
        score: 0.9,
        bbox: [1.0, 2.0, 3.0, 4.0],
        mask: None,
      },
      DetectItem {
        class_id: 2,
        score: 0.3,
        bbox: [5.0, 6.0, 7.0, 8.0],
        mask: None,
      },
    ]);
    let text = result.to_string();
    assert_eq!(text.lines().count(), 3);
    assert!(text.lines().nth(1).unwrap().ends_with("0.900000, 0"));
    assert_eq!(result.above(0.5).count(), 1);
  }

  #[test]
  fn serialize_skips_missing_mask() {
    let result = DetectResult::from(vec![DetectItem {
      class_id: 1,
      score: 0.5,
      bbox: [0.0, 0.0, 1.0, 1.0],
      mask: None,
    }]);
    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["items"][0]["class_id"], 1);
    assert!(json["items"][0].get("mask").is_none());
  }
}
