// 该文件是 Beifeng （北风） 项目的一部分。
// src/deploy/sophgo.rs - PPYOLOE 转换为算能 bmodel 的流水线
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

use super::{DeployError, Pipeline, ToolStep};

pub const MODEL_ZOO_ENV: &str = "MODEL_ZOO_PATH";
pub const MODEL_NAME: &str = "ppyoloe_crn_s_300e_coco";
pub const TEST_IMAGE: &str = "000000014439.jpg";
const TEST_IMAGE_URL: &str =
  "https://gitee.com/paddlepaddle/PaddleDetection/raw/release/2.4/demo/000000014439.jpg";
const WEIGHTS_URL: &str = "https://paddledet.bj.bcebos.com/models/ppyoloe_crn_s_300e_coco.pdparams";
const CHIP: &str = "bm1684x";

/// 流水线产物的位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifacts {
  pub model_file: PathBuf,
  pub config_file: PathBuf,
  pub image_file: PathBuf,
}

impl Artifacts {
  pub fn in_dir(work_dir: &Path) -> Self {
    Self {
      model_file: work_dir
        .join("ppyoloe/workspace")
        .join(format!("{MODEL_NAME}_1684x_f32.bmodel")),
      config_file: work_dir.join(MODEL_NAME).join("infer_cfg.yml"),
      image_file: work_dir.join(TEST_IMAGE),
    }
  }
}

/// 以 `$MODEL_ZOO_PATH` 定位 tpu-mlir 回归数据
pub fn ppyoloe_pipeline(pp_detect_path: &Path, work_dir: &Path) -> Result<Pipeline, DeployError> {
  let model_zoo = std::env::var_os(MODEL_ZOO_ENV).ok_or(DeployError::MissingEnv(MODEL_ZOO_ENV))?;
  ppyoloe_pipeline_with_zoo(pp_detect_path, work_dir, Path::new(&model_zoo))
}

/// 导出 → paddle2onnx → 固定输入形状 → 准备 MLIR 工作区 → model_transform → model_deploy
///
/// `model_zoo` 位于 tpu-mlir 根目录下，回归数据取自其同级的 `regression` 目录。
pub fn ppyoloe_pipeline_with_zoo(
  pp_detect_path: &Path,
  work_dir: &Path,
  model_zoo: &Path,
) -> Result<Pipeline, DeployError> {
  let mlir_root = model_zoo
    .parent()
    .ok_or_else(|| DeployError::InvalidPath(model_zoo.display().to_string()))?;
  let regression = mlir_root.join("regression");
  let onnx_file = format!("{MODEL_NAME}.onnx");
  let ppyoloe_dir = work_dir.join("ppyoloe");
  let workspace = ppyoloe_dir.join("workspace");

  let export = ToolStep::new("python3")
    .args([
      "tools/export_model.py",
      "-c",
      "configs/ppyoloe/ppyoloe_crn_s_300e_coco.yml",
      "-output_dir=output_inference",
      "-o",
    ])
    .arg(format!("weights={WEIGHTS_URL}"))
    .current_dir(pp_detect_path);

  let paddle2onnx = ToolStep::new("paddle2onnx")
    .args(["--model_dir", MODEL_NAME])
    .args(["--model_filename", "model.pdmodel"])
    .args(["--params_filename", "model.pdiparams"])
    .args(["--save_file", onnx_file.as_str()])
    .args(["--enable_dev_version", "True"])
    .current_dir(work_dir);

  let fix_shape = ToolStep::new("python3")
    .args(["-m", "paddle2onnx.optimize"])
    .args(["--input_model", onnx_file.as_str()])
    .args(["--output_model", onnx_file.as_str()])
    .args(["--input_shape_dict", "{'image':[1,3,640,640]}"])
    .current_dir(work_dir);

  let download_image = ToolStep::new("wget")
    .arg(TEST_IMAGE_URL)
    .current_dir(work_dir);

  let prepare_npz = ToolStep::new("python3")
    .arg("-c")
    .arg(format!(
      "from prepare_npz import prepare; prepare('{TEST_IMAGE}', [640, 640])"
    ))
    .current_dir(work_dir);

  let transform = ToolStep::new("model_transform.py")
    .args(["--model_name", MODEL_NAME])
    .arg("--model_def")
    .arg(format!("../{onnx_file}"))
    .args(["--input_shapes", "[[1,3,640,640],[1,2]]"])
    .arg("--keep_aspect_ratio")
    .args(["--pixel_format", "rgb"])
    .args(["--output_names", "p2o.Div.1,p2o.Concat.29"])
    .args(["--test_input", "../inputs.npz"])
    .arg("--test_result")
    .arg(format!("{MODEL_NAME}_top_outputs.npz"))
    .arg("--mlir")
    .arg(format!("{MODEL_NAME}.mlir"))
    .current_dir(&workspace);

  let deploy = ToolStep::new("model_deploy.py")
    .arg("--mlir")
    .arg(format!("{MODEL_NAME}.mlir"))
    .args(["--quantize", "F32"])
    .args(["--chip", CHIP])
    .arg("--test_input")
    .arg(format!("{MODEL_NAME}_in_f32.npz"))
    .arg("--test_reference")
    .arg(format!("{MODEL_NAME}_top_outputs.npz"))
    .arg("--model")
    .arg(format!("{MODEL_NAME}_1684x_f32.bmodel"))
    .current_dir(&workspace);

  Ok(
    Pipeline::new()
      .step(export)
      .copy(
        pp_detect_path.join("output_inference").join(MODEL_NAME),
        work_dir,
      )
      .step(paddle2onnx)
      .step(fix_shape)
      .create_dir(&workspace)
      .copy(regression.join("dataset/COCO2017"), &ppyoloe_dir)
      .copy(regression.join("image"), &ppyoloe_dir)
      .copy(work_dir.join(&onnx_file), &ppyoloe_dir)
      .step_unless_exists(work_dir.join(TEST_IMAGE), download_image)
      .step(prepare_npz)
      .copy(work_dir.join("inputs.npz"), &ppyoloe_dir)
      .step(transform)
      .step(deploy),
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::deploy::Action;

  #[test]
  fn pipeline_order_and_paths() {
    let pipeline = ppyoloe_pipeline_with_zoo(
      Path::new("/workspace/PaddleDetection"),
      Path::new("/work"),
      Path::new("/opt/tpu-mlir/model-zoo"),
    )
    .unwrap();

    let programs: Vec<_> = pipeline
      .actions()
      .iter()
      .filter_map(|action| match action {
        Action::Run(step) => Some(step.program()),
        _ => None,
      })
      .collect();
    assert_eq!(
      programs,
      vec![
        "python3",
        "paddle2onnx",
        "python3",
        "python3",
        "model_transform.py",
        "model_deploy.py"
      ]
    );

    assert!(pipeline.actions().contains(&Action::Copy {
      from: PathBuf::from("/opt/tpu-mlir/regression/image"),
      to: PathBuf::from("/work/ppyoloe"),
    }));
    let Some(Action::Run(export)) = pipeline.actions().first() else {
      panic!("第一步应为导出模型");
    };
    assert_eq!(
      export.working_dir(),
      Some(Path::new("/workspace/PaddleDetection"))
    );
  }

  #[test]
  fn artifacts_follow_work_dir() {
    let artifacts = Artifacts::in_dir(Path::new("/work"));
    assert_eq!(
      artifacts.model_file,
      PathBuf::from("/work/ppyoloe/workspace/ppyoloe_crn_s_300e_coco_1684x_f32.bmodel")
    );
    assert_eq!(
      artifacts.config_file,
      PathBuf::from("/work/ppyoloe_crn_s_300e_coco/infer_cfg.yml")
    );
  }

  #[test]
  fn root_model_zoo_is_rejected() {
    assert!(matches!(
      ppyoloe_pipeline_with_zoo(Path::new("/p"), Path::new("/w"), Path::new("/")),
      Err(DeployError::InvalidPath(_))
    ));
  }
}
