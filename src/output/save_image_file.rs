// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/save_image_file.rs - 保存可视化图像
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::BgrFrame,
  model::DetectResult,
  output::{Render, draw::Draw},
};

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// `image:///path/to/vis.png?threshold=0.5`
pub struct SaveImageFileOutput {
  path: PathBuf,
  draw: Draw,
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let mut draw = Draw::default();
    if let Some(threshold) = uri
      .query_pairs()
      .find(|(k, _)| k == "threshold")
      .and_then(|(_, v)| v.parse::<f32>().ok())
    {
      draw = draw.with_score_threshold(threshold);
    }

    Ok(SaveImageFileOutput {
      path: PathBuf::from(uri.path()),
      draw,
    })
  }
}

impl SaveImageFileOutput {
  pub fn new(path: impl Into<PathBuf>, draw: Draw) -> Self {
    Self {
      path: path.into(),
      draw,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  fn save_image(&self, image: image::RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    image.save(&self.path)?;
    info!("保存可视化结果到: {}", self.path.display());
    Ok(())
  }
}

impl Render<BgrFrame, DetectResult> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &BgrFrame, result: &DetectResult) -> Result<(), Self::Error> {
    let image = self.draw.draw_detection(frame, result);
    self.save_image(image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn saves_into_nested_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out/vis.png");
    let url = Url::parse(&format!("image://{}?threshold=0.5", path.display())).unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();
    assert_eq!(output.path(), path);

    let frame = BgrFrame::filled(4, 4, [0, 0, 255]).unwrap();
    output
      .render_result(&frame, &DetectResult::default())
      .unwrap();
    let saved = image::open(&path).unwrap().to_rgb8();
    assert_eq!(saved.get_pixel(0, 0).0, [255, 0, 0]);
  }

  #[test]
  fn rejects_other_schemes() {
    let url = Url::parse("json:///tmp/result.json").unwrap();
    assert!(SaveImageFileOutput::from_url(&url).is_err());
  }
}
