// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::{
  frame::BgrFrame,
  model::{DetectItem, DetectResult, Mask},
};

const BOX_THICKNESS: i32 = 2;
const MASK_ALPHA: f32 = 0.5;

/// 按类别循环取色
const PALETTE: [[u8; 3]; 8] = [
  [255, 56, 56],
  [255, 157, 151],
  [255, 112, 31],
  [255, 178, 29],
  [207, 210, 49],
  [72, 249, 10],
  [0, 194, 255],
  [52, 69, 147],
];

pub struct Draw {
  /// 低于该分数的检测项不绘制
  score_threshold: f32,
  thickness: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      score_threshold: 0.0,
      thickness: BOX_THICKNESS,
    }
  }
}

fn color_of(class_id: i32) -> Rgb<u8> {
  Rgb(PALETTE[class_id.unsigned_abs() as usize % PALETTE.len()])
}

impl Draw {
  pub fn with_score_threshold(mut self, score_threshold: f32) -> Self {
    self.score_threshold = score_threshold;
    self
  }

  /// 在帧的 RGB 副本上绘制检测结果
  pub fn draw_detection(&self, frame: &BgrFrame, result: &DetectResult) -> RgbImage {
    let mut image = frame.to_rgb_image();
    for item in result.above(self.score_threshold) {
      if let Some(mask) = &item.mask {
        blend_mask(&mut image, mask, color_of(item.class_id));
      }
      self.draw_bbox(&mut image, item);
    }
    image
  }

  fn draw_bbox(&self, image: &mut RgbImage, item: &DetectItem) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    let x_min = (item.bbox[0].floor() as i32).clamp(0, w - 1);
    let y_min = (item.bbox[1].floor() as i32).clamp(0, h - 1);
    let x_max = (item.bbox[2].ceil() as i32).clamp(0, w - 1);
    let y_max = (item.bbox[3].ceil() as i32).clamp(0, h - 1);
    if x_min >= x_max || y_min >= y_max {
      return;
    }

    let color = color_of(item.class_id);
    for t in 0..self.thickness {
      let (width, height) = (x_max - x_min - 2 * t, y_max - y_min - 2 * t);
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32 + 1, height as u32 + 1);
      draw_hollow_rect_mut(image, rect, color);
    }
  }
}

/// 掩码与原图尺寸一致时按透明度叠加颜色
fn blend_mask(image: &mut RgbImage, mask: &Mask, color: Rgb<u8>) {
  if (mask.width, mask.height) != (image.width() as usize, image.height() as usize) {
    return;
  }
  for (x, y, pixel) in image.enumerate_pixels_mut() {
    if mask.data[y as usize * mask.width + x as usize] == 0 {
      continue;
    }
    for c in 0..3 {
      let blended = pixel[c] as f32 * (1.0 - MASK_ALPHA) + color[c] as f32 * MASK_ALPHA;
      pixel[c] = blended.round() as u8;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn item(score: f32, bbox: [f32; 4]) -> DetectItem {
    DetectItem {
      class_id: 0,
      score,
      bbox,
      mask: None,
    }
  }

  #[test]
  fn draws_box_border_only() {
    let frame = BgrFrame::filled(20, 20, [0, 0, 0]).unwrap();
    let result = DetectResult::from(vec![item(0.9, [2.0, 2.0, 15.0, 15.0])]);
    let image = Draw::default().draw_detection(&frame, &result);
    assert_eq!(*image.get_pixel(2, 2), color_of(0));
    assert_eq!(*image.get_pixel(3, 3), color_of(0));
    assert_eq!(*image.get_pixel(8, 8), Rgb([0, 0, 0]));
  }

  #[test]
  fn low_scores_are_skipped() {
    let frame = BgrFrame::filled(10, 10, [0, 0, 0]).unwrap();
    let result = DetectResult::from(vec![item(0.2, [1.0, 1.0, 8.0, 8.0])]);
    let image = Draw::default()
      .with_score_threshold(0.5)
      .draw_detection(&frame, &result);
    assert!(image.pixels().all(|p| *p == Rgb([0, 0, 0])));
  }

  #[test]
  fn mask_is_blended() {
    let frame = BgrFrame::filled(2, 2, [0, 0, 0]).unwrap();
    let mut masked = item(0.9, [0.0, 0.0, 0.0, 0.0]);
    masked.mask = Some(Mask {
      height: 2,
      width: 2,
      data: vec![1, 0, 0, 0].into_boxed_slice(),
    });
    let image = Draw::default().draw_detection(&frame, &DetectResult::from(vec![masked]));
    assert_eq!(*image.get_pixel(0, 0), Rgb([128, 28, 28]));
    assert_eq!(*image.get_pixel(1, 1), Rgb([0, 0, 0]));
  }
}
