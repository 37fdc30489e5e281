// 该文件是 Beifeng （北风） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use image::ImageReader;
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::BgrFrame};

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像解码错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("图像为空: {0}")]
  EmptyImage(String),
}

/// 从文件读取的单帧输入，迭代一次后耗尽
pub struct ImageFileInput {
  frame: Option<BgrFrame>,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI 方案不匹配: 期望 '{}', 实际 '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemeMismatch(url.scheme().to_string()));
    }
    Self::open(url.path())
  }
}

impl ImageFileInput {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    Ok(Self {
      frame: Some(read_frame(path)?),
    })
  }
}

impl Iterator for ImageFileInput {
  type Item = BgrFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.frame.take()
  }
}

/// 解码图像文件并转为 BGR 帧
pub fn read_frame(path: impl AsRef<Path>) -> Result<BgrFrame, ImageFileInputError> {
  let path = path.as_ref();
  let image = ImageReader::open(path)?.decode()?.to_rgb8();
  if image.width() == 0 || image.height() == 0 {
    return Err(ImageFileInputError::EmptyImage(path.display().to_string()));
  }
  info!(
    "读取图像 {}: {}x{}",
    path.display(),
    image.width(),
    image.height()
  );
  Ok(BgrFrame::from(&image))
}

#[cfg(test)]
mod tests {
  use image::{Rgb, RgbImage};

  use super::*;

  #[test]
  fn reads_png_as_bgr() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pixel.png");
    RgbImage::from_pixel(3, 2, Rgb([10, 20, 30]))
      .save(&path)
      .unwrap();

    let url = Url::from_file_path(&path)
      .unwrap()
      .as_str()
      .replacen("file", "image", 1);
    let mut input = ImageFileInput::from_url(&Url::parse(&url).unwrap()).unwrap();
    let frame = input.next().unwrap();
    assert_eq!((frame.height(), frame.width()), (2, 3));
    assert_eq!(frame.pixel(1, 2), [30, 20, 10]);
    assert!(input.next().is_none());
  }

  #[test]
  fn wrong_scheme_is_rejected() {
    let url = Url::parse("video:///tmp/a.mp4").unwrap();
    assert!(matches!(
      ImageFileInput::from_url(&url),
      Err(ImageFileInputError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn missing_file_is_io_error() {
    assert!(matches!(
      read_frame("/nonexistent/beifeng.png"),
      Err(ImageFileInputError::IoError(_))
    ));
  }
}
