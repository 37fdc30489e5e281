// 该文件是 Beifeng （北风） 项目的一部分。
// src/preprocess.rs - 预处理
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

use image::{
  ImageBuffer, Rgb,
  imageops::{self, FilterType},
};

mod paddle_det;
mod rkyolo;

pub use self::paddle_det::{PaddleDetMeta, PaddleDetPreprocessor};
pub use self::rkyolo::{LetterboxInfo, RkYoloPreprocessor};

type RgbF32Image = ImageBuffer<Rgb<f32>, Vec<f32>>;
type RgbU8Image = ImageBuffer<Rgb<u8>, Vec<u8>>;

/// PaddleDetection 的插值编号（与 OpenCV 一致）转为 image 的滤波器
fn filter_for_interp(interp: i32) -> FilterType {
  match interp {
    0 => FilterType::Nearest,
    2 => FilterType::CatmullRom,
    4 => FilterType::Lanczos3,
    _ => FilterType::Triangle,
  }
}

/// 浮点图像缩放
///
/// image 的缩放会把浮点像素截断到 [0, 1]，这里先线性映射到该区间再映射回来。
fn resize_f32(image: &RgbF32Image, width: u32, height: u32, filter: FilterType) -> RgbF32Image {
  let lo = image.iter().copied().fold(f32::INFINITY, f32::min);
  let hi = image.iter().copied().fold(f32::NEG_INFINITY, f32::max);
  let range = (hi - lo).max(f32::EPSILON);

  let unit = ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
    let p = image.get_pixel(x, y);
    Rgb([(p[0] - lo) / range, (p[1] - lo) / range, (p[2] - lo) / range])
  });
  let mut resized = imageops::resize(&unit, width, height, filter);
  for v in resized.iter_mut() {
    *v = *v * range + lo;
  }
  resized
}

/// u8 图像转为浮点图像，取值仍为 0~255
fn to_f32(image: &RgbU8Image) -> RgbF32Image {
  ImageBuffer::from_fn(image.width(), image.height(), |x, y| {
    let p = image.get_pixel(x, y);
    Rgb([p[0] as f32, p[1] as f32, p[2] as f32])
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn float_resize_keeps_values_outside_unit_range() {
    let image = RgbF32Image::from_pixel(4, 4, Rgb([-2.0, 100.0, 255.0]));
    let resized = resize_f32(&image, 2, 2, FilterType::Triangle);
    let p = resized.get_pixel(1, 1);
    assert!((p[0] + 2.0).abs() < 1e-3);
    assert!((p[1] - 100.0).abs() < 1e-3);
    assert!((p[2] - 255.0).abs() < 1e-3);
  }

  #[test]
  fn u8_to_f32_keeps_range() {
    let image = RgbU8Image::from_pixel(1, 1, Rgb([0, 128, 255]));
    assert_eq!(to_f32(&image).get_pixel(0, 0).0, [0.0, 128.0, 255.0]);
  }
}
