// 该文件是 Beifeng （北风） 项目的一部分。
// src/preprocess/paddle_det.rs - PaddleDetection 预处理
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
use tracing::{debug, info};

use super::{RgbF32Image, RgbU8Image, filter_for_interp, resize_f32, to_f32};
use crate::{
  config::{DeployConfig, PreprocessOp},
  frame::{BGR_CHANNELS, BgrFrame},
  processor::{Preprocess, ProcessorError},
  runtime::Tensor,
};

/// 每帧预处理后的元信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PaddleDetMeta {
  /// 原图高度
  pub height: usize,
  /// 原图宽度
  pub width: usize,
  /// [scale_y, scale_x]
  pub scale_factor: [f32; 2],
}

/// 按部署配置执行的预处理流水线
#[derive(Debug, Clone, PartialEq)]
pub struct PaddleDetPreprocessor {
  ops: Vec<PreprocessOp>,
  normalize: bool,
  permute: bool,
}

impl PaddleDetPreprocessor {
  pub fn from_config(config: &DeployConfig) -> Result<Self, ProcessorError> {
    for op in &config.preprocess {
      match op {
        PreprocessOp::Resize { target_size, .. } if target_size.contains(&0) => {
          return Err(ProcessorError::ZeroSize);
        }
        PreprocessOp::NormalizeImage { std, .. } if std.contains(&0.0) => {
          return Err(ProcessorError::UnsupportedOp(
            "NormalizeImage 的 std 不能为 0".to_string(),
          ));
        }
        PreprocessOp::PadStride { stride: 0 } => {
          return Err(ProcessorError::NonPositive {
            name: "stride",
            value: 0,
          });
        }
        PreprocessOp::Pad { size, .. } if size.contains(&0) => {
          return Err(ProcessorError::ZeroSize);
        }
        _ => {}
      }
    }
    info!("PaddleDet 预处理步骤: {:?}", config.preprocess);

    let permute = config
      .preprocess
      .iter()
      .any(|op| matches!(op, PreprocessOp::Permute));
    Ok(Self {
      ops: config.preprocess.clone(),
      normalize: true,
      permute,
    })
  }

  pub fn ops(&self) -> &[PreprocessOp] {
    &self.ops
  }

  /// 关闭归一化，输入保持 0~255
  pub fn disable_normalize(&mut self) {
    self.normalize = false;
  }

  pub fn enable_normalize(&mut self) {
    self.normalize = true;
  }

  /// 关闭 HWC 到 CHW 的转换
  pub fn disable_permute(&mut self) {
    self.permute = false;
  }

  /// 仅当配置中包含 Permute 步骤时生效
  pub fn enable_permute(&mut self) {
    self.permute = self
      .ops
      .iter()
      .any(|op| matches!(op, PreprocessOp::Permute));
  }

  pub fn normalize_enabled(&self) -> bool {
    self.normalize
  }

  pub fn permute_enabled(&self) -> bool {
    self.permute
  }

  /// 返回处理后的图像、scale_factor 与 im_shape
  ///
  /// im_shape 为缩放后、填充前的 [height, width]。
  fn apply(&self, frame: &BgrFrame) -> (RgbF32Image, [f32; 2], [f32; 2]) {
    let mut image = Stage::Bytes(frame.to_rgb_image());
    let mut scale_factor = [1.0f32, 1.0f32];
    let mut im_shape = [frame.height() as f32, frame.width() as f32];

    for op in &self.ops {
      match op {
        PreprocessOp::Resize {
          target_size,
          keep_ratio,
          interp,
        } => {
          let (w, h) = image.dimensions();
          let (h, w) = (h as f32, w as f32);
          let (scale_y, scale_x) = if *keep_ratio {
            let target_min = target_size[0].min(target_size[1]) as f32;
            let target_max = target_size[0].max(target_size[1]) as f32;
            let scale = (target_min / h.min(w)).min(target_max / h.max(w));
            (scale, scale)
          } else {
            (target_size[0] as f32 / h, target_size[1] as f32 / w)
          };
          let new_h = ((h * scale_y).round() as u32).max(1);
          let new_w = ((w * scale_x).round() as u32).max(1);
          image = image.resize(new_w, new_h, filter_for_interp(*interp));
          scale_factor = [scale_y, scale_x];
          im_shape = [new_h as f32, new_w as f32];
        }
        PreprocessOp::NormalizeImage {
          mean,
          std,
          is_scale,
          norm_type,
        } => {
          if !self.normalize {
            continue;
          }
          let mean_std = norm_type.as_deref() != Some("none");
          let mut floats = image.into_floats();
          for pixel in floats.pixels_mut() {
            for c in 0..BGR_CHANNELS {
              let mut v = pixel[c];
              if *is_scale {
                v /= 255.0;
              }
              if mean_std {
                v = (v - mean[c]) / std[c];
              }
              pixel[c] = v;
            }
          }
          image = Stage::Floats(floats);
        }
        PreprocessOp::PadStride { stride } => {
          let (w, h) = image.dimensions();
          let pad_w = w.div_ceil(*stride) * stride;
          let pad_h = h.div_ceil(*stride) * stride;
          if (pad_w, pad_h) != (w, h) {
            image = image.pad_to(pad_w, pad_h, [0.0; 3]);
          }
        }
        PreprocessOp::Pad { size, fill_value } => {
          let (w, h) = image.dimensions();
          let pad_w = size[1].max(w);
          let pad_h = size[0].max(h);
          if (pad_w, pad_h) != (w, h) {
            image = image.pad_to(pad_w, pad_h, *fill_value);
          }
        }
        // 在组装批次时执行
        PreprocessOp::Permute => {}
      }
    }

    (image.into_floats(), scale_factor, im_shape)
  }
}

/// 归一化之前保持 u8，之后转为浮点
enum Stage {
  Bytes(RgbU8Image),
  Floats(RgbF32Image),
}

impl Stage {
  fn dimensions(&self) -> (u32, u32) {
    match self {
      Stage::Bytes(image) => image.dimensions(),
      Stage::Floats(image) => image.dimensions(),
    }
  }

  fn resize(self, width: u32, height: u32, filter: FilterType) -> Self {
    match self {
      Stage::Bytes(image) => Stage::Bytes(imageops::resize(&image, width, height, filter)),
      Stage::Floats(image) => Stage::Floats(resize_f32(&image, width, height, filter)),
    }
  }

  /// 右侧与下方以 `fill` 填充
  fn pad_to(self, width: u32, height: u32, fill: [f32; 3]) -> Self {
    match self {
      Stage::Bytes(image) => {
        let fill = fill.map(|v| v.round().clamp(0.0, 255.0) as u8);
        let mut padded = RgbU8Image::from_pixel(width, height, Rgb(fill));
        imageops::replace(&mut padded, &image, 0, 0);
        Stage::Bytes(padded)
      }
      Stage::Floats(image) => {
        let mut padded = RgbF32Image::from_pixel(width, height, Rgb(fill));
        imageops::replace(&mut padded, &image, 0, 0);
        Stage::Floats(padded)
      }
    }
  }

  fn into_floats(self) -> RgbF32Image {
    match self {
      Stage::Bytes(image) => to_f32(&image),
      Stage::Floats(image) => image,
    }
  }
}

impl Preprocess for PaddleDetPreprocessor {
  type Meta = PaddleDetMeta;

  fn run(&self, frames: &[BgrFrame]) -> Result<(Vec<Tensor>, Vec<Self::Meta>), ProcessorError> {
    let processed: Vec<_> = frames.iter().map(|frame| self.apply(frame)).collect();

    // 批内尺寸不一致时补零到最大尺寸
    let max_h = processed.iter().map(|(img, ..)| img.height()).max().unwrap_or(0) as usize;
    let max_w = processed.iter().map(|(img, ..)| img.width()).max().unwrap_or(0) as usize;
    let batch = processed.len();
    let plane = max_h * max_w;
    let mut data = vec![0.0f32; batch * plane * BGR_CHANNELS];

    let mut scale_factors = Vec::with_capacity(batch * 2);
    let mut im_shapes = Vec::with_capacity(batch * 2);
    let mut metas = Vec::with_capacity(batch);

    for (b, ((image, scale_factor, im_shape), frame)) in processed.iter().zip(frames).enumerate() {
      let base = b * plane * BGR_CHANNELS;
      for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..BGR_CHANNELS {
          let idx = if self.permute {
            base + c * plane + y * max_w + x
          } else {
            base + (y * max_w + x) * BGR_CHANNELS + c
          };
          data[idx] = pixel[c];
        }
      }
      scale_factors.extend_from_slice(scale_factor);
      im_shapes.extend_from_slice(im_shape);
      metas.push(PaddleDetMeta {
        height: frame.height(),
        width: frame.width(),
        scale_factor: *scale_factor,
      });
    }

    let shape = if self.permute {
      [batch, BGR_CHANNELS, max_h, max_w]
    } else {
      [batch, max_h, max_w, BGR_CHANNELS]
    };
    debug!("PaddleDet 预处理输出形状: {:?}", shape);

    Ok((
      vec![
        Tensor::from_f32("image", &shape, data),
        Tensor::from_f32("scale_factor", &[batch, 2], scale_factors),
        Tensor::from_f32("im_shape", &[batch, 2], im_shapes),
      ],
      metas,
    ))
  }
}
