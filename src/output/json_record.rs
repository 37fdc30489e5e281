// 该文件是 Beifeng （北风） 项目的一部分。
// src/output/json_record.rs - 以 JSON 记录检测结果
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

use std::{
  fs::File,
  io::BufWriter,
  path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  config::{ConfigError, DeployConfig},
  frame::BgrFrame,
  model::DetectResult,
  output::Render,
};

#[derive(Error, Debug)]
pub enum JsonRecordError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("读取标签失败: {0}")]
  LabelError(#[from] ConfigError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

#[derive(Debug, Serialize)]
struct RecordItem<'a> {
  class_id: i32,
  #[serde(skip_serializing_if = "Option::is_none")]
  label: Option<&'a str>,
  score: f32,
  bbox: [f32; 4],
  #[serde(skip_serializing_if = "Option::is_none")]
  mask_area: Option<usize>,
}

#[derive(Debug, Serialize)]
struct Record<'a> {
  timestamp: DateTime<Utc>,
  width: usize,
  height: usize,
  items: Vec<RecordItem<'a>>,
}

/// `json:///path/to/result.json?config=/path/to/infer_cfg.yml`
///
/// 提供 `config` 时按其中的 `label_list` 解析类别名称。
pub struct JsonRecordOutput {
  path: PathBuf,
  labels: Vec<String>,
}

impl FromUrlWithScheme for JsonRecordOutput {
  const SCHEME: &'static str = "json";
}

impl FromUrl for JsonRecordOutput {
  type Error = JsonRecordError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(JsonRecordError::SchemeMismatch(uri.scheme().to_string()));
    }

    let labels = match uri.query_pairs().find(|(k, _)| k == "config") {
      Some((_, config)) => DeployConfig::from_file(&*config)?.label_list,
      None => Vec::new(),
    };

    Ok(Self::new(uri.path(), labels))
  }
}

impl JsonRecordOutput {
  pub fn new(path: impl Into<PathBuf>, labels: Vec<String>) -> Self {
    Self {
      path: path.into(),
      labels,
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

impl Render<BgrFrame, DetectResult> for JsonRecordOutput {
  type Error = JsonRecordError;

  fn render_result(&self, frame: &BgrFrame, result: &DetectResult) -> Result<(), Self::Error> {
    let items = result
      .items
      .iter()
      .map(|item| RecordItem {
        class_id: item.class_id,
        label: usize::try_from(item.class_id)
          .ok()
          .and_then(|id| self.labels.get(id))
          .map(String::as_str),
        score: item.score,
        bbox: item.bbox,
        mask_area: item.mask.as_ref().map(|mask| mask.area()),
      })
      .collect();
    let record = Record {
      timestamp: Utc::now(),
      width: frame.width(),
      height: frame.height(),
      items,
    };

    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    let writer = BufWriter::new(File::create(&self.path)?);
    serde_json::to_writer_pretty(writer, &record)?;
    info!("保存检测记录到: {}", self.path.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectItem;

  #[test]
  fn writes_labels_and_boxes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("result.json");
    let output = JsonRecordOutput::new(&path, vec!["person".into(), "car".into()]);

    let result = DetectResult::from(vec![
      DetectItem {
        class_id: 1,
        score: 0.8,
        bbox: [1.0, 2.0, 3.0, 4.0],
        mask: None,
      },
      DetectItem {
        class_id: 7,
        score: 0.4,
        bbox: [0.0, 0.0, 1.0, 1.0],
        mask: None,
      },
    ]);
    let frame = BgrFrame::filled(6, 8, [0, 0, 0]).unwrap();
    output.render_result(&frame, &result).unwrap();

    let json: serde_json::Value =
      serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(json["width"], 8);
    assert_eq!(json["items"][0]["label"], "car");
    assert!(json["items"][1].get("label").is_none());
    assert!(json["timestamp"].is_string());
  }

  #[test]
  fn labels_come_from_deploy_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("infer_cfg.yml");
    std::fs::write(
      &config,
      "Preprocess:\n  - type: Permute\nlabel_list:\n  - person\n",
    )
    .unwrap();
    let url = Url::parse(&format!(
      "json://{}?config={}",
      dir.path().join("r.json").display(),
      config.display()
    ))
    .unwrap();
    let output = JsonRecordOutput::from_url(&url).unwrap();
    assert_eq!(output.labels, vec!["person".to_string()]);
  }
}
