// 该文件是 Beifeng （北风） 项目的一部分。
// src/postprocess/rkyolo.rs - RKYOLO 后处理
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

use tracing::debug;

use super::{clip_box, nms::class_wise_nms, output_at, values};
use crate::{
  model::{Arch, DetectItem, DetectResult},
  preprocess::LetterboxInfo,
  processor::{Postprocess, ProcessorError, Thresholds, check_unit},
  runtime::Tensor,
};

/// 三个输出分支对应的下采样倍数
const STRIDES: [usize; 3] = [8, 16, 32];

/// 检测头的解码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RkYoloHead {
  /// YOLOv5 / YOLOv7：基于锚框
  Anchored,
  /// YOLOX：无锚框，每个格点一个预测
  AnchorFree,
}

impl RkYoloHead {
  pub fn for_arch(arch: Arch) -> Option<Self> {
    match arch {
      Arch::RkYoloV5 | Arch::RkYoloV7 => Some(Self::Anchored),
      Arch::RkYoloX => Some(Self::AnchorFree),
      _ => None,
    }
  }
}

fn default_anchors(arch: Arch) -> Vec<Vec<f32>> {
  let anchors: [[f32; 6]; 3] = match arch {
    Arch::RkYoloV7 => [
      [12.0, 16.0, 19.0, 36.0, 40.0, 28.0],
      [36.0, 75.0, 76.0, 55.0, 72.0, 146.0],
      [142.0, 110.0, 192.0, 243.0, 459.0, 401.0],
    ],
    Arch::RkYoloX => return vec![vec![1.0, 1.0]; 3],
    _ => [
      [10.0, 13.0, 16.0, 30.0, 33.0, 23.0],
      [30.0, 61.0, 62.0, 45.0, 59.0, 119.0],
      [116.0, 90.0, 156.0, 198.0, 373.0, 326.0],
    ],
  };
  anchors.iter().map(|branch| branch.to_vec()).collect()
}

/// RKYOLO 三分支检测头的解码
///
/// 每个分支的输出为 `[B, A * (5 + C), H, W]`，数值已经过 sigmoid。
#[derive(Debug, Clone, PartialEq)]
pub struct RkYoloPostprocessor {
  head: RkYoloHead,
  conf_threshold: f32,
  nms_threshold: f32,
  class_num: usize,
  anchors: Vec<Vec<f32>>,
  apply_nms: bool,
}

impl RkYoloPostprocessor {
  pub fn new(arch: Arch, head: RkYoloHead) -> Self {
    Self {
      head,
      conf_threshold: 0.25,
      nms_threshold: Thresholds::default().nms_threshold,
      class_num: 80,
      anchors: default_anchors(arch),
      apply_nms: true,
    }
  }

  pub fn head(&self) -> RkYoloHead {
    self.head
  }

  pub fn conf_threshold(&self) -> f32 {
    self.conf_threshold
  }

  pub fn nms_threshold(&self) -> f32 {
    self.nms_threshold
  }

  pub fn class_num(&self) -> usize {
    self.class_num
  }

  pub fn anchors(&self) -> &[Vec<f32>] {
    &self.anchors
  }

  pub fn set_conf_threshold(&mut self, conf_threshold: f32) -> Result<(), ProcessorError> {
    check_unit("conf_threshold", conf_threshold)?;
    self.conf_threshold = conf_threshold;
    Ok(())
  }

  pub fn set_nms_threshold(&mut self, nms_threshold: f32) -> Result<(), ProcessorError> {
    check_unit("nms_threshold", nms_threshold)?;
    self.nms_threshold = nms_threshold;
    Ok(())
  }

  pub fn set_class_num(&mut self, class_num: usize) -> Result<(), ProcessorError> {
    if class_num == 0 {
      return Err(ProcessorError::InvalidClassNum);
    }
    self.class_num = class_num;
    Ok(())
  }

  /// 每个分支一组 [w0, h0, w1, h1, ...]
  pub fn set_anchor(&mut self, anchors: Vec<Vec<f32>>) -> Result<(), ProcessorError> {
    let valid = anchors.len() == STRIDES.len()
      && anchors
        .iter()
        .all(|branch| !branch.is_empty() && branch.len() % 2 == 0);
    if !valid {
      return Err(ProcessorError::InvalidAnchor {
        branches: STRIDES.len(),
      });
    }
    self.anchors = anchors;
    Ok(())
  }

  pub fn apply_nms(&mut self) {
    self.apply_nms = true;
  }

  pub fn disable_nms(&mut self) {
    self.apply_nms = false;
  }

  pub fn nms_applied(&self) -> bool {
    self.apply_nms
  }

  fn anchors_per_branch(&self, branch: usize) -> usize {
    match self.head {
      RkYoloHead::Anchored => self.anchors[branch].len() / 2,
      RkYoloHead::AnchorFree => 1,
    }
  }

  /// 解码单张图在一个分支上的候选框，坐标位于网络输入空间
  fn decode_branch(
    &self,
    data: &[f32],
    branch: usize,
    grid_h: usize,
    grid_w: usize,
    items: &mut Vec<DetectItem>,
  ) {
    let stride = STRIDES[branch] as f32;
    let grid_len = grid_h * grid_w;
    let prob_size = 5 + self.class_num;
    let at = |channel: usize, cell: usize| data[channel * grid_len + cell];

    for a in 0..self.anchors_per_branch(branch) {
      let base = a * prob_size;
      for i in 0..grid_h {
        for j in 0..grid_w {
          let cell = i * grid_w + j;
          let objectness = at(base + 4, cell);
          if objectness < self.conf_threshold {
            continue;
          }

          let (class_id, class_score) = (0..self.class_num)
            .map(|c| (c, at(base + 5 + c, cell)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
          let score = objectness * class_score;
          if score < self.conf_threshold {
            continue;
          }

          let (dx, dy, dw, dh) = (
            at(base, cell),
            at(base + 1, cell),
            at(base + 2, cell),
            at(base + 3, cell),
          );
          let (cx, cy, w, h) = match self.head {
            RkYoloHead::Anchored => (
              (dx * 2.0 - 0.5 + j as f32) * stride,
              (dy * 2.0 - 0.5 + i as f32) * stride,
              (dw * 2.0).powi(2) * self.anchors[branch][a * 2],
              (dh * 2.0).powi(2) * self.anchors[branch][a * 2 + 1],
            ),
            RkYoloHead::AnchorFree => (
              (dx + j as f32) * stride,
              (dy + i as f32) * stride,
              dw.exp() * stride,
              dh.exp() * stride,
            ),
          };

          items.push(DetectItem {
            class_id: class_id as i32,
            score,
            bbox: [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
            mask: None,
          });
        }
      }
    }
  }
}

impl Postprocess for RkYoloPostprocessor {
  type Meta = LetterboxInfo;

  fn run(
    &self,
    outputs: &[Tensor],
    metas: &[Self::Meta],
  ) -> Result<Vec<DetectResult>, ProcessorError> {
    let batch = metas.len();
    if batch == 0 {
      return Ok(Vec::new());
    }

    // 输入尺寸在批内一致
    let (input_w, input_h) = (metas[0].input_width, metas[0].input_height);
    let mut candidates = vec![Vec::new(); batch];

    for (branch, &stride) in STRIDES.iter().enumerate() {
      let tensor = output_at(outputs, branch)?;
      let (grid_h, grid_w) = (input_h / stride, input_w / stride);
      let per_image = self.anchors_per_branch(branch) * (5 + self.class_num) * grid_h * grid_w;
      if per_image == 0 || tensor.numel() != batch * per_image {
        return Err(ProcessorError::InvalidOutput(format!(
          "第 {} 个分支期望 {} 个元素，实际为 {:?}",
          branch,
          batch * per_image,
          tensor.shape
        )));
      }

      let data = values(tensor);
      for (b, items) in candidates.iter_mut().enumerate() {
        let image = &data[b * per_image..(b + 1) * per_image];
        self.decode_branch(image, branch, grid_h, grid_w, items);
      }
    }

    let results = candidates
      .into_iter()
      .zip(metas)
      .map(|(items, info)| {
        debug!("RKYOLO 候选框数量: {}", items.len());
        let mut items = if self.apply_nms {
          class_wise_nms(items, self.nms_threshold)
        } else {
          items
        };
        for item in items.iter_mut() {
          let [x1, y1, x2, y2] = item.bbox;
          item.bbox = clip_box(
            [
              (x1 - info.pad_left) / info.scale,
              (y1 - info.pad_top) / info.scale,
              (x2 - info.pad_left) / info.scale,
              (y2 - info.pad_top) / info.scale,
            ],
            info.original_width as f32,
            info.original_height as f32,
          );
        }
        DetectResult::from(items)
      })
      .collect();
    Ok(results)
  }

  fn with_thresholds(&self, thresholds: Thresholds) -> Self {
    Self {
      conf_threshold: thresholds.conf_threshold,
      nms_threshold: thresholds.nms_threshold,
      ..self.clone()
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn info() -> LetterboxInfo {
    LetterboxInfo {
      scale: 0.5,
      pad_left: 0.0,
      pad_top: 8.0,
      original_width: 64,
      original_height: 32,
      input_width: 32,
      input_height: 32,
    }
  }

  /// 输入 32x32、单类别、YOLOX 头的三个分支
  fn yolox_outputs(cells: &[(usize, usize, [f32; 6])]) -> Vec<Tensor> {
    let mut outputs = Vec::new();
    for (branch, stride) in STRIDES.iter().enumerate() {
      let grid = 32 / stride;
      let mut data = vec![0.0f32; 6 * grid * grid];
      for &(b, cell, values) in cells {
        if b == branch {
          for (c, v) in values.iter().enumerate() {
            data[c * grid * grid + cell] = *v;
          }
        }
      }
      outputs.push(Tensor::from_f32("output", &[1, 6, grid, grid], data));
    }
    outputs
  }

  fn yolox() -> RkYoloPostprocessor {
    let mut post = RkYoloPostprocessor::new(Arch::RkYoloX, RkYoloHead::AnchorFree);
    post.set_class_num(1).unwrap();
    post
  }

  #[test]
  fn decode_and_undo_letterbox() {
    // 分支 2 (stride 32) 只有一个格点，中心 (16, 16)，宽高 32
    let outputs = yolox_outputs(&[(2, 0, [0.5, 0.5, 0.0, 0.0, 0.9, 1.0])]);
    let results = yolox().run(&outputs, &[info()]).unwrap();
    assert_eq!(results.len(), 1);
    let item = &results[0].items[0];
    assert!((item.score - 0.9).abs() < 1e-6);
    // 输入空间 [0, 0, 32, 32]，去掉上边 8 像素填充后放大 2 倍
    assert_eq!(item.bbox, [0.0, 0.0, 64.0, 32.0]);
  }

  #[test]
  fn nms_toggle_changes_count() {
    let cells = [
      (1, 3, [0.5, 0.5, 0.0, 0.0, 0.9, 1.0]),
      (0, 15, [0.0, 0.0, 0.7, 0.7, 0.8, 1.0]),
    ];
    let outputs = yolox_outputs(&cells);
    let mut post = yolox();
    assert_eq!(post.run(&outputs, &[info()]).unwrap()[0].len(), 1);
    post.disable_nms();
    assert_eq!(post.run(&outputs, &[info()]).unwrap()[0].len(), 2);
  }

  #[test]
  fn low_confidence_is_dropped() {
    let outputs = yolox_outputs(&[(2, 0, [0.5, 0.5, 0.0, 0.0, 0.9, 0.2])]);
    let post = yolox();
    assert!(post.run(&outputs, &[info()]).unwrap()[0].is_empty());
    let scoped = post.with_thresholds(Thresholds::new(0.1, 0.5).unwrap());
    assert_eq!(scoped.run(&outputs, &[info()]).unwrap()[0].len(), 1);
  }

  #[test]
  fn wrong_output_size_is_rejected() {
    let outputs = yolox_outputs(&[]);
    let post = RkYoloPostprocessor::new(Arch::RkYoloX, RkYoloHead::AnchorFree);
    assert!(matches!(
      post.run(&outputs, &[info()]),
      Err(ProcessorError::InvalidOutput(_))
    ));
  }

  #[test]
  fn setters_validate() {
    let mut post = RkYoloPostprocessor::new(Arch::RkYoloV5, RkYoloHead::Anchored);
    assert_eq!(post.conf_threshold(), 0.25);
    assert_eq!(post.nms_threshold(), 0.5);
    assert_eq!(post.nms_threshold(), Thresholds::default().nms_threshold);
    assert_eq!(post.class_num(), 80);
    assert_eq!(post.anchors()[0], vec![10.0, 13.0, 16.0, 30.0, 33.0, 23.0]);

    assert_eq!(post.set_class_num(0), Err(ProcessorError::InvalidClassNum));
    assert!(post.set_conf_threshold(-0.1).is_err());
    assert_eq!(
      post.set_anchor(vec![vec![1.0, 2.0]; 2]),
      Err(ProcessorError::InvalidAnchor { branches: 3 })
    );
    assert!(post.set_anchor(vec![vec![1.0, 2.0, 3.0]; 3]).is_err());
    post.set_anchor(vec![vec![1.0, 2.0]; 3]).unwrap();
    assert_eq!(post.anchors().len(), 3);
  }
}
