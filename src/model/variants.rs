// 该文件是 Beifeng （北风） 项目的一部分。
// src/model/variants.rs - 检测器变体能力表
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

use std::{fmt, marker::PhantomData};

use crate::{
  config::DeployConfig,
  model::{Detector, Family},
  option::ModelFormat,
  postprocess::{PaddleDetPostprocessor, RkYoloHead, RkYoloPostprocessor},
  preprocess::{LetterboxInfo, PaddleDetMeta, PaddleDetPreprocessor, RkYoloPreprocessor},
  processor::ProcessorError,
};

/// 模型结构标签，决定后处理的解码方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
  PPYOLOE,
  PPYOLO,
  YOLOX,
  PicoDet,
  FasterRCNN,
  YOLOv3,
  SOLOv2,
  MaskRCNN,
  SSD,
  YOLOv5,
  YOLOv6,
  YOLOv7,
  YOLOv8,
  RTMDet,
  CascadeRCNN,
  PSSDet,
  RetinaNet,
  PPYOLOESOD,
  FCOS,
  TTFNet,
  TOOD,
  GFL,
  RkYoloV5,
  RkYoloX,
  RkYoloV7,
}

/// 检测器变体描述：名称、结构、允许的模型格式、是否支持批量检测
pub struct Variant<F> {
  pub name: &'static str,
  pub arch: Arch,
  pub formats: &'static [ModelFormat],
  pub supports_batch: bool,
  _family: PhantomData<fn() -> F>,
}

impl<F> Variant<F> {
  const fn new(
    name: &'static str,
    arch: Arch,
    formats: &'static [ModelFormat],
    supports_batch: bool,
  ) -> Self {
    Self {
      name,
      arch,
      formats,
      supports_batch,
      _family: PhantomData,
    }
  }

  pub fn supports_format(&self, format: ModelFormat) -> bool {
    self.formats.contains(&format)
  }
}

impl<F> fmt::Debug for Variant<F> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Variant")
      .field("name", &self.name)
      .field("arch", &self.arch)
      .field("formats", &self.formats)
      .field("supports_batch", &self.supports_batch)
      .finish()
  }
}

/// PaddleDetection 导出的检测模型
#[derive(Debug, Clone, Copy)]
pub struct PaddleDet;

impl Family for PaddleDet {
  type Meta = PaddleDetMeta;
  type Preprocessor = PaddleDetPreprocessor;
  type Postprocessor = PaddleDetPostprocessor;

  const NEEDS_CONFIG: bool = true;

  fn processors(
    variant: &Variant<Self>,
    config: Option<&DeployConfig>,
  ) -> Result<(Self::Preprocessor, Self::Postprocessor), ProcessorError> {
    let config =
      config.ok_or_else(|| ProcessorError::UnsupportedOp("缺少部署配置".to_string()))?;
    Ok((
      PaddleDetPreprocessor::from_config(config)?,
      PaddleDetPostprocessor::from_config(variant.arch, config),
    ))
  }
}

/// Rockchip NPU 上的 YOLO 系列模型
#[derive(Debug, Clone, Copy)]
pub struct RkYolo;

impl Family for RkYolo {
  type Meta = LetterboxInfo;
  type Preprocessor = RkYoloPreprocessor;
  type Postprocessor = RkYoloPostprocessor;

  const NEEDS_CONFIG: bool = false;

  fn processors(
    variant: &Variant<Self>,
    _config: Option<&DeployConfig>,
  ) -> Result<(Self::Preprocessor, Self::Postprocessor), ProcessorError> {
    let head = RkYoloHead::for_arch(variant.arch)
      .ok_or_else(|| ProcessorError::UnsupportedOp(format!("{:?} 不是 RKYOLO 结构", variant.arch)))?;
    Ok((RkYoloPreprocessor::default(), RkYoloPostprocessor::new(variant.arch, head)))
  }
}

pub type PaddleDetModel<R> = Detector<PaddleDet, R>;
pub type RkYoloModel<R> = Detector<RkYolo, R>;

pub mod paddle_det {
  use super::{Arch, PaddleDet, Variant};
  use crate::option::ModelFormat;

  const PADDLE_ONLY: &[ModelFormat] = &[ModelFormat::Paddle];
  const ANY_FORMAT: &[ModelFormat] = &[
    ModelFormat::Paddle,
    ModelFormat::Onnx,
    ModelFormat::Rknn,
    ModelFormat::Sophgo,
  ];

  pub static PPYOLOE: Variant<PaddleDet> = Variant::new("PPYOLOE", Arch::PPYOLOE, ANY_FORMAT, true);
  pub static PPYOLO: Variant<PaddleDet> = Variant::new("PPYOLO", Arch::PPYOLO, PADDLE_ONLY, true);
  pub static PADDLE_YOLOX: Variant<PaddleDet> =
    Variant::new("PaddleYOLOX", Arch::YOLOX, PADDLE_ONLY, true);
  pub static PICODET: Variant<PaddleDet> = Variant::new("PicoDet", Arch::PicoDet, ANY_FORMAT, true);
  pub static FASTER_RCNN: Variant<PaddleDet> =
    Variant::new("FasterRCNN", Arch::FasterRCNN, PADDLE_ONLY, true);
  pub static YOLOV3: Variant<PaddleDet> = Variant::new("YOLOv3", Arch::YOLOv3, PADDLE_ONLY, true);
  pub static SOLOV2: Variant<PaddleDet> = Variant::new("SOLOv2", Arch::SOLOv2, PADDLE_ONLY, true);
  pub static MASK_RCNN: Variant<PaddleDet> =
    Variant::new("MaskRCNN", Arch::MaskRCNN, PADDLE_ONLY, false);
  pub static SSD: Variant<PaddleDet> = Variant::new("SSD", Arch::SSD, PADDLE_ONLY, true);
  pub static PADDLE_YOLOV5: Variant<PaddleDet> =
    Variant::new("PaddleYOLOv5", Arch::YOLOv5, PADDLE_ONLY, true);
  pub static PADDLE_YOLOV6: Variant<PaddleDet> =
    Variant::new("PaddleYOLOv6", Arch::YOLOv6, PADDLE_ONLY, true);
  pub static PADDLE_YOLOV7: Variant<PaddleDet> =
    Variant::new("PaddleYOLOv7", Arch::YOLOv7, PADDLE_ONLY, true);
  pub static PADDLE_YOLOV8: Variant<PaddleDet> =
    Variant::new("PaddleYOLOv8", Arch::YOLOv8, ANY_FORMAT, true);
  pub static RTMDET: Variant<PaddleDet> = Variant::new("RTMDet", Arch::RTMDet, PADDLE_ONLY, true);
  pub static CASCADE_RCNN: Variant<PaddleDet> =
    Variant::new("CascadeRCNN", Arch::CascadeRCNN, PADDLE_ONLY, true);
  pub static PSSDET: Variant<PaddleDet> = Variant::new("PSSDet", Arch::PSSDet, PADDLE_ONLY, true);
  pub static RETINANET: Variant<PaddleDet> =
    Variant::new("RetinaNet", Arch::RetinaNet, PADDLE_ONLY, true);
  pub static PPYOLOESOD: Variant<PaddleDet> =
    Variant::new("PPYOLOESOD", Arch::PPYOLOESOD, PADDLE_ONLY, true);
  pub static FCOS: Variant<PaddleDet> = Variant::new("FCOS", Arch::FCOS, PADDLE_ONLY, true);
  pub static TTFNET: Variant<PaddleDet> = Variant::new("TTFNet", Arch::TTFNet, PADDLE_ONLY, true);
  pub static TOOD: Variant<PaddleDet> = Variant::new("TOOD", Arch::TOOD, PADDLE_ONLY, true);
  pub static GFL: Variant<PaddleDet> = Variant::new("GFL", Arch::GFL, PADDLE_ONLY, true);

  static ALL: [&Variant<PaddleDet>; 22] = [
    &PPYOLOE,
    &PPYOLO,
    &PADDLE_YOLOX,
    &PICODET,
    &FASTER_RCNN,
    &YOLOV3,
    &SOLOV2,
    &MASK_RCNN,
    &SSD,
    &PADDLE_YOLOV5,
    &PADDLE_YOLOV6,
    &PADDLE_YOLOV7,
    &PADDLE_YOLOV8,
    &RTMDET,
    &CASCADE_RCNN,
    &PSSDET,
    &RETINANET,
    &PPYOLOESOD,
    &FCOS,
    &TTFNET,
    &TOOD,
    &GFL,
  ];

  pub fn all() -> &'static [&'static Variant<PaddleDet>] {
    &ALL
  }

  /// 按名称查找，不区分大小写
  pub fn by_name(name: &str) -> Option<&'static Variant<PaddleDet>> {
    ALL
      .iter()
      .copied()
      .find(|v| v.name.eq_ignore_ascii_case(name))
  }
}

pub mod rkyolo {
  use super::{Arch, RkYolo, Variant};
  use crate::option::ModelFormat;

  const RKNN_ONLY: &[ModelFormat] = &[ModelFormat::Rknn];

  pub static RKYOLOV5: Variant<RkYolo> = Variant::new("RKYOLOV5", Arch::RkYoloV5, RKNN_ONLY, true);
  pub static RKYOLOX: Variant<RkYolo> = Variant::new("RKYOLOX", Arch::RkYoloX, RKNN_ONLY, true);
  pub static RKYOLOV7: Variant<RkYolo> = Variant::new("RKYOLOV7", Arch::RkYoloV7, RKNN_ONLY, true);

  static ALL: [&Variant<RkYolo>; 3] = [&RKYOLOV5, &RKYOLOX, &RKYOLOV7];

  pub fn all() -> &'static [&'static Variant<RkYolo>] {
    &ALL
  }

  pub fn by_name(name: &str) -> Option<&'static Variant<RkYolo>> {
    ALL
      .iter()
      .copied()
      .find(|v| v.name.eq_ignore_ascii_case(name))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_mask_rcnn_declines_batching() {
    let restricted: Vec<_> = paddle_det::all()
      .iter()
      .filter(|v| !v.supports_batch)
      .map(|v| v.name)
      .collect();
    assert_eq!(restricted, vec!["MaskRCNN"]);
    assert!(rkyolo::all().iter().all(|v| v.supports_batch));
  }

  #[test]
  fn format_restrictions() {
    assert!(paddle_det::PPYOLOE.supports_format(ModelFormat::Sophgo));
    assert!(paddle_det::PICODET.supports_format(ModelFormat::Rknn));
    assert!(!paddle_det::PPYOLO.supports_format(ModelFormat::Onnx));
    assert!(!rkyolo::RKYOLOV5.supports_format(ModelFormat::Paddle));
  }

  #[test]
  fn lookup_by_name() {
    assert_eq!(paddle_det::by_name("ppyoloe").map(|v| v.arch), Some(Arch::PPYOLOE));
    assert_eq!(rkyolo::by_name("RKYOLOX").map(|v| v.arch), Some(Arch::RkYoloX));
    assert!(paddle_det::by_name("RKYOLOV5").is_none());
  }
}
