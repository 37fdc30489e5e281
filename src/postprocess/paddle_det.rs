// 该文件是 Beifeng （北风） 项目的一部分。
// src/postprocess/paddle_det.rs - PaddleDetection 后处理
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

use tracing::{debug, info};

use super::{
  clip_box,
  nms::{adaptive_nms, by_score_desc},
  output_at, values,
};
use crate::{
  config::{DeployConfig, NmsSection},
  model::{Arch, DetectItem, DetectResult, Mask},
  preprocess::PaddleDetMeta,
  processor::{Postprocess, ProcessorError, Thresholds, check_unit},
  runtime::Tensor,
};

/// 多类别 NMS 参数，默认值与 PaddleDetection 导出配置一致
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NmsOption {
  pub background_label: i32,
  /// 每张图最多保留的框数，-1 表示不限制
  pub keep_top_k: i64,
  pub nms_eta: f32,
  pub nms_threshold: f32,
  /// 每个类别参与 NMS 的候选数，-1 表示不限制
  pub nms_top_k: i64,
  pub normalized: bool,
  pub score_threshold: f32,
}

impl Default for NmsOption {
  fn default() -> Self {
    Self {
      background_label: -1,
      keep_top_k: 100,
      nms_eta: 1.0,
      nms_threshold: 0.5,
      nms_top_k: 1000,
      normalized: true,
      score_threshold: 0.3,
    }
  }
}

impl NmsOption {
  /// 以部署配置中的 NMS 段覆盖默认值
  pub fn from_section(section: &NmsSection) -> Self {
    let default = Self::default();
    Self {
      background_label: section
        .background_label
        .map_or(default.background_label, |v| v as i32),
      keep_top_k: section.keep_top_k.unwrap_or(default.keep_top_k),
      nms_eta: default.nms_eta,
      nms_threshold: section.nms_threshold.unwrap_or(default.nms_threshold),
      nms_top_k: section.nms_top_k.unwrap_or(default.nms_top_k),
      normalized: section.normalized.unwrap_or(default.normalized),
      score_threshold: section.score_threshold.unwrap_or(default.score_threshold),
    }
  }

  fn validate(&self) -> Result<(), ProcessorError> {
    check_unit("score_threshold", self.score_threshold)?;
    check_unit("nms_threshold", self.nms_threshold)?;
    check_unit("nms_eta", self.nms_eta)?;
    if self.nms_eta == 0.0 {
      return Err(ProcessorError::ThresholdOutOfRange {
        name: "nms_eta",
        value: 0.0,
      });
    }
    Ok(())
  }
}

/// 模型输出的组织形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
  /// 图内已完成 NMS：[M, 6] 检测行 + [B] 每图数量
  InGraphNms,
  /// 未做 NMS：[B, N, 4] 框 + [B, C, N] 分数
  Raw { anchors: usize, classes: usize },
  /// SOLOv2：[B] 数量、[M] 类别、[M] 分数、[M, H, W] 掩码
  Solov2,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PaddleDetPostprocessor {
  arch: Arch,
  nms_option: NmsOption,
  apply_nms: bool,
  /// 设置过置信度阈值后，图内 NMS 的结果也按该阈值过滤
  score_filter: Option<f32>,
}

impl PaddleDetPostprocessor {
  pub fn new(arch: Arch) -> Self {
    Self {
      arch,
      nms_option: NmsOption::default(),
      apply_nms: false,
      score_filter: None,
    }
  }

  pub fn from_config(arch: Arch, config: &DeployConfig) -> Self {
    let mut postprocessor = Self::new(arch);
    if let Some(section) = &config.nms {
      postprocessor.nms_option = NmsOption::from_section(section);
    }
    info!(
      "{:?} 后处理 NMS 参数: {:?}",
      arch, postprocessor.nms_option
    );
    postprocessor
  }

  pub fn arch(&self) -> Arch {
    self.arch
  }

  pub fn nms_option(&self) -> &NmsOption {
    &self.nms_option
  }

  /// 设置 NMS 参数，`None` 恢复默认值
  pub fn set_nms_option(&mut self, option: Option<NmsOption>) -> Result<(), ProcessorError> {
    let option = option.unwrap_or_default();
    option.validate()?;
    self.nms_option = option;
    Ok(())
  }

  /// 模型导出时未包含 NMS，由后处理完成
  pub fn apply_nms(&mut self) {
    self.apply_nms = true;
  }

  pub fn disable_nms(&mut self) {
    self.apply_nms = false;
  }

  pub fn nms_applied(&self) -> bool {
    self.apply_nms
  }

  pub fn set_conf_threshold(&mut self, conf_threshold: f32) -> Result<(), ProcessorError> {
    check_unit("conf_threshold", conf_threshold)?;
    self.nms_option.score_threshold = conf_threshold;
    self.score_filter = Some(conf_threshold);
    Ok(())
  }

  pub fn set_nms_threshold(&mut self, nms_threshold: f32) -> Result<(), ProcessorError> {
    check_unit("nms_threshold", nms_threshold)?;
    self.nms_option.nms_threshold = nms_threshold;
    Ok(())
  }

  fn layout(&self, outputs: &[Tensor], batch: usize) -> Result<Layout, ProcessorError> {
    if self.arch == Arch::SOLOv2 {
      return Ok(Layout::Solov2);
    }

    let first = output_at(outputs, 0)?;
    let second = output_at(outputs, 1)?;

    if second.numel() == batch && first.numel() % 6 == 0 {
      let rows: f32 = values(second).iter().sum();
      if rows as usize * 6 == first.numel() {
        return Ok(Layout::InGraphNms);
      }
    }

    let anchors = first.numel() / (batch * 4);
    if anchors > 0 && first.numel() == batch * anchors * 4 && second.numel() % (batch * anchors) == 0 {
      let classes = second.numel() / (batch * anchors);
      if classes > 0 {
        return Ok(Layout::Raw { anchors, classes });
      }
    }

    Err(ProcessorError::InvalidOutput(format!(
      "无法识别的输出: {:?} / {:?}",
      first.shape, second.shape
    )))
  }

  fn decode_in_graph(
    &self,
    outputs: &[Tensor],
    metas: &[PaddleDetMeta],
  ) -> Result<Vec<DetectResult>, ProcessorError> {
    let rows = values(output_at(outputs, 0)?);
    let counts = values(output_at(outputs, 1)?);
    let masks = match self.arch {
      Arch::MaskRCNN => outputs.get(2),
      _ => None,
    };

    let mut offset = 0usize;
    let mut results = Vec::with_capacity(metas.len());
    for (meta, &count) in metas.iter().zip(counts.iter()) {
      let count = count as usize;
      let mut items = Vec::with_capacity(count);
      for r in offset..offset + count {
        let row = &rows[r * 6..r * 6 + 6];
        let class_id = row[0] as i32;
        // 无检测时导出的模型会补一行 -1
        if class_id < 0 {
          continue;
        }
        let score = row[1];
        if self.score_filter.is_some_and(|th| score < th) {
          continue;
        }
        let mask = match masks {
          Some(tensor) => Some(instance_mask(tensor, r, meta)?),
          None => None,
        };
        items.push(DetectItem {
          class_id,
          score,
          bbox: [row[2], row[3], row[4], row[5]],
          mask,
        });
      }
      offset += count;
      results.push(DetectResult::from(items));
    }
    Ok(results)
  }

  fn decode_raw(
    &self,
    outputs: &[Tensor],
    metas: &[PaddleDetMeta],
    anchors: usize,
    classes: usize,
  ) -> Result<Vec<DetectResult>, ProcessorError> {
    let boxes = values(output_at(outputs, 0)?);
    let scores = values(output_at(outputs, 1)?);
    let option = &self.nms_option;

    let mut results = Vec::with_capacity(metas.len());
    for (b, meta) in metas.iter().enumerate() {
      let boxes = &boxes[b * anchors * 4..(b + 1) * anchors * 4];
      let scores = &scores[b * classes * anchors..(b + 1) * classes * anchors];
      let bbox = |n: usize| [boxes[n * 4], boxes[n * 4 + 1], boxes[n * 4 + 2], boxes[n * 4 + 3]];

      let mut items = if self.apply_nms {
        multiclass_nms(anchors, classes, bbox, scores, option)
      } else {
        // 不做抑制，每个锚点只保留最高分的类别
        (0..anchors)
          .filter_map(|n| {
            let (class, score) = (0..classes)
              .filter(|&c| c as i32 != option.background_label)
              .map(|c| (c, scores[c * anchors + n]))
              .max_by(|a, b| a.1.total_cmp(&b.1))?;
            (score > option.score_threshold).then(|| DetectItem {
              class_id: class as i32,
              score,
              bbox: bbox(n),
              mask: None,
            })
          })
          .collect()
      };

      let [scale_y, scale_x] = meta.scale_factor;
      for item in items.iter_mut() {
        let [x1, y1, x2, y2] = item.bbox;
        item.bbox = clip_box(
          [x1 / scale_x, y1 / scale_y, x2 / scale_x, y2 / scale_y],
          meta.width as f32,
          meta.height as f32,
        );
      }
      items.sort_by(by_score_desc);
      results.push(DetectResult::from(items));
    }
    Ok(results)
  }

  fn decode_solov2(
    &self,
    outputs: &[Tensor],
    metas: &[PaddleDetMeta],
  ) -> Result<Vec<DetectResult>, ProcessorError> {
    let counts = values(output_at(outputs, 0)?);
    let labels = values(output_at(outputs, 1)?);
    let scores = values(output_at(outputs, 2)?);
    let masks = output_at(outputs, 3)?;
    let threshold = self.score_filter.unwrap_or(0.0);

    let mut offset = 0usize;
    let mut results = Vec::with_capacity(metas.len());
    for (meta, &count) in metas.iter().zip(counts.iter()) {
      let count = count as usize;
      let mut items = Vec::with_capacity(count);
      for m in offset..offset + count {
        let (Some(&label), Some(&score)) = (labels.get(m), scores.get(m)) else {
          return Err(ProcessorError::InvalidOutput(format!(
            "SOLOv2 输出缺少第 {} 个实例",
            m
          )));
        };
        if label < 0.0 || score < threshold {
          continue;
        }
        let mask = instance_mask(masks, m, meta)?;
        // 空掩码没有可用的框
        let Some(bbox) = mask_extent(&mask) else {
          continue;
        };
        items.push(DetectItem {
          class_id: label as i32,
          score,
          bbox,
          mask: Some(mask),
        });
      }
      offset += count;
      results.push(DetectResult::from(items));
    }
    Ok(results)
  }
}

/// 第 `index` 个实例的二值掩码；三维输出取其形状，否则按原图尺寸切分
fn instance_mask(
  tensor: &Tensor,
  index: usize,
  meta: &PaddleDetMeta,
) -> Result<Mask, ProcessorError> {
  let (height, width) = match *tensor.shape {
    [_, h, w] => (h, w),
    _ => (meta.height, meta.width),
  };
  let size = height * width;
  let data = values(tensor);
  let plane = data.get(index * size..(index + 1) * size).ok_or_else(|| {
    ProcessorError::InvalidOutput(format!("掩码输出不足 {} 个实例", index + 1))
  })?;
  Ok(Mask {
    height,
    width,
    data: plane.iter().map(|&v| u8::from(v > 0.5)).collect(),
  })
}

/// 掩码非零区域的外接框
fn mask_extent(mask: &Mask) -> Option<[f32; 4]> {
  let mut extent: Option<[usize; 4]> = None;
  for y in 0..mask.height {
    for x in 0..mask.width {
      if mask.data[y * mask.width + x] == 0 {
        continue;
      }
      extent = Some(match extent {
        None => [x, y, x, y],
        Some([x1, y1, x2, y2]) => [x1.min(x), y1.min(y), x2.max(x), y2.max(y)],
      });
    }
  }
  extent.map(|[x1, y1, x2, y2]| [x1 as f32, y1 as f32, (x2 + 1) as f32, (y2 + 1) as f32])
}

fn multiclass_nms(
  anchors: usize,
  classes: usize,
  bbox: impl Fn(usize) -> [f32; 4],
  scores: &[f32],
  option: &NmsOption,
) -> Vec<DetectItem> {
  let mut kept = Vec::new();
  for class in 0..classes {
    if class as i32 == option.background_label {
      continue;
    }
    let class_scores = &scores[class * anchors..(class + 1) * anchors];
    let mut candidates: Vec<DetectItem> = class_scores
      .iter()
      .enumerate()
      .filter(|&(_, &score)| score > option.score_threshold)
      .map(|(n, &score)| DetectItem {
        class_id: class as i32,
        score,
        bbox: bbox(n),
        mask: None,
      })
      .collect();
    candidates.sort_by(by_score_desc);
    if option.nms_top_k > -1 {
      candidates.truncate(option.nms_top_k as usize);
    }
    kept.extend(adaptive_nms(
      candidates,
      option.nms_threshold,
      option.nms_eta,
      option.normalized,
    ));
  }

  kept.sort_by(by_score_desc);
  if option.keep_top_k > -1 {
    kept.truncate(option.keep_top_k as usize);
  }
  kept
}

impl Postprocess for PaddleDetPostprocessor {
  type Meta = PaddleDetMeta;

  fn run(
    &self,
    outputs: &[Tensor],
    metas: &[Self::Meta],
  ) -> Result<Vec<DetectResult>, ProcessorError> {
    let batch = metas.len();
    if batch == 0 {
      return Ok(Vec::new());
    }

    let layout = self.layout(outputs, batch)?;
    debug!("{:?} 输出形式: {:?}", self.arch, layout);
    match layout {
      Layout::InGraphNms => self.decode_in_graph(outputs, metas),
      Layout::Raw { anchors, classes } => self.decode_raw(outputs, metas, anchors, classes),
      Layout::Solov2 => {
        if values(output_at(outputs, 0)?).len() != batch {
          return Err(ProcessorError::BatchMismatch {
            expected: batch,
            actual: outputs[0].numel(),
          });
        }
        self.decode_solov2(outputs, metas)
      }
    }
  }

  fn with_thresholds(&self, thresholds: Thresholds) -> Self {
    let mut scoped = self.clone();
    scoped.nms_option.score_threshold = thresholds.conf_threshold;
    scoped.nms_option.nms_threshold = thresholds.nms_threshold;
    scoped.score_filter = Some(thresholds.conf_threshold);
    scoped
  }
}
