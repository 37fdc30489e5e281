// 该文件是 Beifeng （北风） 项目的一部分。
// src/postprocess/nms.rs - 非极大值抑制
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

use std::cmp::Ordering;

use crate::model::DetectItem;

/// 两个 [x1, y1, x2, y2] 框的 IoU
///
/// `normalized` 为 false 时按像素坐标计算，宽高各加 1。
pub(crate) fn iou(a: &[f32; 4], b: &[f32; 4], normalized: bool) -> f32 {
  let offset = if normalized { 0.0 } else { 1.0 };
  let area = |r: &[f32; 4]| {
    let w = r[2] - r[0] + offset;
    let h = r[3] - r[1] + offset;
    if w <= 0.0 || h <= 0.0 { 0.0 } else { w * h }
  };

  let w = (a[2].min(b[2]) - a[0].max(b[0]) + offset).max(0.0);
  let h = (a[3].min(b[3]) - a[1].max(b[1]) + offset).max(0.0);
  let intersection = w * h;
  let union = area(a) + area(b) - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

pub(crate) fn by_score_desc(a: &DetectItem, b: &DetectItem) -> Ordering {
  b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal)
}

/// 按类别进行的非极大值抑制，结果按分数降序
pub(crate) fn class_wise_nms(mut items: Vec<DetectItem>, iou_threshold: f32) -> Vec<DetectItem> {
  items.sort_by(by_score_desc);

  let mut kept: Vec<DetectItem> = Vec::with_capacity(items.len());
  for item in items {
    let suppressed = kept.iter().any(|best| {
      best.class_id == item.class_id && iou(&best.bbox, &item.bbox, true) > iou_threshold
    });
    if !suppressed {
      kept.push(item);
    }
  }
  kept
}

/// 单一类别内的 NMS，阈值随 `eta` 自适应衰减
///
/// 输入需按分数降序排列。
pub(crate) fn adaptive_nms(
  sorted: Vec<DetectItem>,
  iou_threshold: f32,
  eta: f32,
  normalized: bool,
) -> Vec<DetectItem> {
  let mut threshold = iou_threshold;
  let mut kept: Vec<DetectItem> = Vec::new();
  for item in sorted {
    let keep = kept
      .iter()
      .all(|best| iou(&best.bbox, &item.bbox, normalized) <= threshold);
    if keep {
      kept.push(item);
      if eta < 1.0 && threshold > 0.5 {
        threshold *= eta;
      }
    }
  }
  kept
}
