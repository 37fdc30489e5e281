// 该文件是 Beifeng （北风） 项目的一部分。
// src/preprocess/rkyolo.rs - RKYOLO 预处理（letterbox）
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
  Rgb,
  imageops::{self, FilterType},
};
use tracing::debug;

use super::RgbU8Image;
use crate::{
  frame::{BGR_CHANNELS, BgrFrame},
  processor::{Preprocess, ProcessorError},
  runtime::Tensor,
};

/// letterbox 变换参数，后处理据此把坐标还原到原图
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxInfo {
  pub scale: f32,
  pub pad_left: f32,
  pub pad_top: f32,
  pub original_width: usize,
  pub original_height: usize,
  pub input_width: usize,
  pub input_height: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RkYoloPreprocessor {
  /// [width, height]
  size: [u32; 2],
  /// BGR 顺序，与输入帧一致
  padding_value: [f32; 3],
  is_scale_up: bool,
}

impl Default for RkYoloPreprocessor {
  fn default() -> Self {
    Self {
      size: [640, 640],
      padding_value: [114.0, 114.0, 114.0],
      is_scale_up: true,
    }
  }
}

impl RkYoloPreprocessor {
  pub fn size(&self) -> [u32; 2] {
    self.size
  }

  pub fn padding_value(&self) -> [f32; 3] {
    self.padding_value
  }

  pub fn is_scale_up(&self) -> bool {
    self.is_scale_up
  }

  /// 设置输入尺寸 [width, height]
  pub fn set_size(&mut self, size: &[u32]) -> Result<(), ProcessorError> {
    let size: [u32; 2] = size
      .try_into()
      .map_err(|_| ProcessorError::InvalidSize(size.len()))?;
    if size.contains(&0) {
      return Err(ProcessorError::ZeroSize);
    }
    self.size = size;
    Ok(())
  }

  pub fn set_padding_value(&mut self, value: &[f32]) -> Result<(), ProcessorError> {
    self.padding_value = value
      .try_into()
      .map_err(|_| ProcessorError::InvalidPaddingValue {
        expected: BGR_CHANNELS,
        actual: value.len(),
      })?;
    Ok(())
  }

  /// 为 false 时只缩小不放大
  pub fn set_is_scale_up(&mut self, is_scale_up: bool) {
    self.is_scale_up = is_scale_up;
  }

  fn letterbox(&self, frame: &BgrFrame) -> (RgbU8Image, LetterboxInfo) {
    let [target_w, target_h] = self.size;
    let (h, w) = (frame.height() as f32, frame.width() as f32);

    let mut scale = (target_h as f32 / h).min(target_w as f32 / w);
    if !self.is_scale_up {
      scale = scale.min(1.0);
    }
    let resize_w = ((w * scale).round() as u32).clamp(1, target_w);
    let resize_h = ((h * scale).round() as u32).clamp(1, target_h);

    let half_pad_w = (target_w - resize_w) as f32 / 2.0;
    let half_pad_h = (target_h - resize_h) as f32 / 2.0;
    let left = (half_pad_w - 0.1).round().max(0.0);
    let top = (half_pad_h - 0.1).round().max(0.0);

    let rgb = frame.to_rgb_image();
    let resized = if (resize_w, resize_h) == rgb.dimensions() {
      rgb
    } else {
      imageops::resize(&rgb, resize_w, resize_h, FilterType::Triangle)
    };

    let [b, g, r] = self.padding_value.map(|v| v.round().clamp(0.0, 255.0) as u8);
    let mut canvas = RgbU8Image::from_pixel(target_w, target_h, Rgb([r, g, b]));
    imageops::replace(&mut canvas, &resized, left as i64, top as i64);

    let info = LetterboxInfo {
      scale,
      pad_left: left,
      pad_top: top,
      original_width: frame.width(),
      original_height: frame.height(),
      input_width: target_w as usize,
      input_height: target_h as usize,
    };
    (canvas, info)
  }
}

impl Preprocess for RkYoloPreprocessor {
  type Meta = LetterboxInfo;

  fn run(&self, frames: &[BgrFrame]) -> Result<(Vec<Tensor>, Vec<Self::Meta>), ProcessorError> {
    let [width, height] = self.size.map(|v| v as usize);
    let mut data = Vec::with_capacity(frames.len() * height * width * BGR_CHANNELS);
    let mut metas = Vec::with_capacity(frames.len());

    for frame in frames {
      let (image, info) = self.letterbox(frame);
      debug!("letterbox: {:?}", info);
      data.extend_from_slice(image.as_raw());
      metas.push(info);
    }

    let tensor = Tensor::from_u8(
      "images",
      &[frames.len(), height, width, BGR_CHANNELS],
      data,
    );
    Ok((vec![tensor], metas))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults() {
    let pre = RkYoloPreprocessor::default();
    assert_eq!(pre.size(), [640, 640]);
    assert_eq!(pre.padding_value(), [114.0; 3]);
    assert!(pre.is_scale_up());
  }

  #[test]
  fn size_must_have_two_nonzero_elements() {
    let mut pre = RkYoloPreprocessor::default();
    assert_eq!(
      pre.set_size(&[640, 640, 3]),
      Err(ProcessorError::InvalidSize(3))
    );
    assert_eq!(pre.set_size(&[0, 320]), Err(ProcessorError::ZeroSize));
    assert_eq!(pre.size(), [640, 640]);
    pre.set_size(&[320, 256]).unwrap();
    assert_eq!(pre.size(), [320, 256]);
  }

  #[test]
  fn padding_value_length_matches_channels() {
    let mut pre = RkYoloPreprocessor::default();
    assert_eq!(
      pre.set_padding_value(&[0.0, 0.0]),
      Err(ProcessorError::InvalidPaddingValue {
        expected: 3,
        actual: 2
      })
    );
    pre.set_padding_value(&[1.0, 2.0, 3.0]).unwrap();
    assert_eq!(pre.padding_value(), [1.0, 2.0, 3.0]);
  }

  #[test]
  fn letterbox_pads_centred() {
    let mut pre = RkYoloPreprocessor::default();
    pre.set_size(&[8, 8]).unwrap();
    pre.set_padding_value(&[0.0, 0.0, 200.0]).unwrap();
    let frame = BgrFrame::filled(2, 4, [10, 20, 30]).unwrap();

    let (tensors, metas) = pre.run(std::slice::from_ref(&frame)).unwrap();
    assert_eq!(&*tensors[0].shape, &[1, 8, 8, 3]);
    let info = metas[0];
    assert_eq!(info.scale, 2.0);
    assert_eq!((info.pad_left, info.pad_top), (0.0, 2.0));

    let data = tensors[0].as_u8().unwrap();
    // 第 0 行为填充，RGB 顺序
    assert_eq!(&data[..3], &[200, 0, 0]);
    // 第 2 行开始为图像内容
    let row2 = 2 * 8 * 3;
    assert_eq!(&data[row2..row2 + 3], &[30, 20, 10]);
  }

  #[test]
  fn no_scale_up_keeps_small_images() {
    let mut pre = RkYoloPreprocessor::default();
    pre.set_size(&[16, 16]).unwrap();
    pre.set_is_scale_up(false);
    let frame = BgrFrame::filled(4, 4, [1, 2, 3]).unwrap();
    let (_, metas) = pre.run(&[frame.clone(), frame]).unwrap();
    assert_eq!(metas.len(), 2);
    assert_eq!(metas[0].scale, 1.0);
    assert_eq!((metas[0].pad_left, metas[0].pad_top), (6.0, 6.0));
  }
}
