// 该文件是 Beifeng （北风） 项目的一部分。
// src/frame.rs - HWC/BGR 帧定义
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

use image::{ImageBuffer, Rgb, RgbImage};
use thiserror::Error;

pub const BGR_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("帧尺寸不能为零: {width}x{height}")]
  EmptyShape { width: usize, height: usize },
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// 检测器的输入帧：三维、通道在后（HWC）、BGR 顺序的 8 位图像
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgrFrame {
  height: usize,
  width: usize,
  data: Box<[u8]>,
}

impl BgrFrame {
  pub fn new(height: usize, width: usize, data: Vec<u8>) -> Result<Self, FrameError> {
    if height == 0 || width == 0 {
      return Err(FrameError::EmptyShape { width, height });
    }
    let expected = height * width * BGR_CHANNELS;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }
    Ok(Self {
      height,
      width,
      data: data.into_boxed_slice(),
    })
  }

  /// 以单一颜色填充的帧，颜色按 BGR 给出
  pub fn filled(height: usize, width: usize, bgr: [u8; 3]) -> Result<Self, FrameError> {
    let data = bgr
      .iter()
      .copied()
      .cycle()
      .take(height * width * BGR_CHANNELS)
      .collect();
    Self::new(height, width, data)
  }

  pub fn height(&self) -> usize {
    self.height
  }

  pub fn width(&self) -> usize {
    self.width
  }

  pub fn channels(&self) -> usize {
    BGR_CHANNELS
  }

  pub fn is_empty(&self) -> bool {
    self.data.is_empty()
  }

  pub fn as_hwc(&self) -> &[u8] {
    &self.data
  }

  pub fn pixel(&self, y: usize, x: usize) -> [u8; 3] {
    let idx = (y * self.width + x) * BGR_CHANNELS;
    [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
  }

  /// 转换为 RGB 顺序的图像缓冲
  pub fn to_rgb_image(&self) -> RgbImage {
    let width = self.width;
    ImageBuffer::from_fn(self.width as u32, self.height as u32, |x, y| {
      let idx = (y as usize * width + x as usize) * BGR_CHANNELS;
      Rgb([self.data[idx + 2], self.data[idx + 1], self.data[idx]])
    })
  }
}

impl AsMut<[u8]> for BgrFrame {
  fn as_mut(&mut self) -> &mut [u8] {
    &mut self.data
  }
}

impl From<&RgbImage> for BgrFrame {
  fn from(image: &RgbImage) -> Self {
    let (width, height) = image.dimensions();
    let mut data = Vec::with_capacity((width * height) as usize * BGR_CHANNELS);
    for pixel in image.pixels() {
      data.extend_from_slice(&[pixel[2], pixel[1], pixel[0]]);
    }
    Self {
      height: height as usize,
      width: width as usize,
      data: data.into_boxed_slice(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reject_empty_and_mismatched_buffers() {
    assert_eq!(
      BgrFrame::new(0, 4, vec![]),
      Err(FrameError::EmptyShape {
        width: 4,
        height: 0
      })
    );
    assert_eq!(
      BgrFrame::new(2, 2, vec![0; 11]),
      Err(FrameError::LengthMismatch {
        expected: 12,
        actual: 11
      })
    );
  }

  #[test]
  fn rgb_conversion_swaps_channels() {
    let frame = BgrFrame::filled(2, 3, [10, 20, 30]).unwrap();
    let image = frame.to_rgb_image();
    assert_eq!(image.dimensions(), (3, 2));
    assert_eq!(image.get_pixel(2, 1).0, [30, 20, 10]);

    let back = BgrFrame::from(&image);
    assert_eq!(back, frame);
  }
}
