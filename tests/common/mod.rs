// 该文件是 Beifeng （北风） 项目的一部分。
// tests/common/mod.rs - 集成测试用的脚本化运行时
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

#![allow(dead_code)]

use std::{
  path::{Path, PathBuf},
  sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  },
};

use beifeng::{
  frame::BgrFrame,
  model::ModelFiles,
  option::{ModelFormat, RuntimeOption},
  runtime::{ModelBlob, Runtime, RuntimeError, Tensor},
};
use serde::{Deserialize, Serialize};

/// 单张图像对应的一个输出，批量推理时沿第 0 维重复
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptedOutput {
  pub name: String,
  pub shape: Vec<usize>,
  pub data: Vec<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Script {
  pub outputs: Vec<ScriptedOutput>,
}

/// 以 JSON 脚本作为“模型文件”的运行时
pub struct ScriptedRuntime {
  script: Arc<Script>,
  calls: AtomicUsize,
}

impl ScriptedRuntime {
  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  pub fn shares_weights_with(&self, other: &Self) -> bool {
    Arc::ptr_eq(&self.script, &other.script)
  }
}

impl Runtime for ScriptedRuntime {
  fn supported_formats() -> &'static [ModelFormat] {
    &[
      ModelFormat::Paddle,
      ModelFormat::Onnx,
      ModelFormat::Rknn,
      ModelFormat::Sophgo,
    ]
  }

  fn load(blob: &ModelBlob, _option: &RuntimeOption) -> Result<Self, RuntimeError> {
    let script: Script = serde_json::from_slice(&blob.model)
      .map_err(|e| RuntimeError::InvalidModel(e.to_string()))?;
    Ok(Self {
      script: Arc::new(script),
      calls: AtomicUsize::new(0),
    })
  }

  fn infer(&self, inputs: &[Tensor]) -> Result<Vec<Tensor>, RuntimeError> {
    let batch = inputs
      .first()
      .and_then(|t| t.shape.first().copied())
      .ok_or_else(|| RuntimeError::InvalidInput("缺少输入".to_string()))?;
    self.calls.fetch_add(1, Ordering::SeqCst);

    Ok(
      self
        .script
        .outputs
        .iter()
        .map(|out| {
          let mut shape = out.shape.clone();
          shape[0] *= batch;
          let data = out.data.repeat(batch);
          Tensor::from_f32(&out.name, &shape, data)
        })
        .collect(),
    )
  }

  fn clone_runtime(&self) -> Result<Self, RuntimeError> {
    Ok(Self {
      script: Arc::clone(&self.script),
      calls: AtomicUsize::new(0),
    })
  }
}

pub const PPYOLOE_CFG: &str = r#"
mode: paddle
arch: YOLO
Preprocess:
- type: Resize
  interp: 1
  keep_ratio: false
  target_size: [32, 32]
- type: NormalizeImage
  is_scale: true
  mean: [0.485, 0.456, 0.406]
  std: [0.229, 0.224, 0.225]
- type: Permute
label_list:
- person
- bicycle
NMS:
  keep_top_k: 100
  nms_threshold: 0.5
  nms_top_k: 1000
  score_threshold: 0.3
"#;

/// 三个锚点、两个类别的原始输出（未做 NMS）
///
/// 锚点 0 与 1 同属类别 0 且高度重叠，锚点 2 属于类别 1。
pub fn raw_ppyoloe_script() -> Script {
  Script {
    outputs: vec![
      ScriptedOutput {
        name: "boxes".to_string(),
        shape: vec![1, 3, 4],
        data: vec![
          0.0, 0.0, 10.0, 10.0, //
          1.0, 1.0, 11.0, 11.0, //
          20.0, 20.0, 30.0, 30.0,
        ],
      },
      ScriptedOutput {
        name: "scores".to_string(),
        shape: vec![1, 2, 3],
        data: vec![
          0.9, 0.8, 0.05, //
          0.1, 0.1, 0.6,
        ],
      },
    ],
  }
}

/// 图内已完成 NMS 的输出：每张图两个检测
pub fn in_graph_script() -> Script {
  Script {
    outputs: vec![
      ScriptedOutput {
        name: "bbox".to_string(),
        shape: vec![2, 6],
        data: vec![
          0.0, 0.92, 4.0, 4.0, 20.0, 20.0, //
          1.0, 0.35, 30.0, 30.0, 50.0, 50.0,
        ],
      },
      ScriptedOutput {
        name: "bbox_num".to_string(),
        shape: vec![1],
        data: vec![2.0],
      },
    ],
  }
}

/// 在临时目录中写入模型脚本、参数文件与部署配置
pub struct Fixture {
  pub dir: tempfile::TempDir,
}

impl Fixture {
  pub fn new(script: &Script) -> Self {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
      dir.path().join("model.json"),
      serde_json::to_vec(script).unwrap(),
    )
    .unwrap();
    std::fs::write(dir.path().join("model.pdiparams"), b"params").unwrap();
    std::fs::write(dir.path().join("infer_cfg.yml"), PPYOLOE_CFG).unwrap();
    Self { dir }
  }

  pub fn path(&self, name: &str) -> PathBuf {
    self.dir.path().join(name)
  }

  pub fn model_path(&self) -> PathBuf {
    self.path("model.json")
  }

  pub fn files(&self) -> ModelFiles {
    ModelFiles::paddle(
      self.model_path(),
      self.path("model.pdiparams"),
      self.path("infer_cfg.yml"),
    )
  }
}

pub fn missing_files(dir: &Path) -> ModelFiles {
  ModelFiles::paddle(
    dir.join("no_such_model"),
    dir.join("no_such_params"),
    dir.join("infer_cfg.yml"),
  )
}

/// 左上角为亮块的测试图
pub fn test_frame(height: usize, width: usize) -> BgrFrame {
  let mut data = vec![32u8; height * width * 3];
  for y in 0..height / 2 {
    for x in 0..width / 2 {
      let idx = (y * width + x) * 3;
      data[idx..idx + 3].copy_from_slice(&[200, 180, 160]);
    }
  }
  BgrFrame::new(height, width, data).unwrap()
}
