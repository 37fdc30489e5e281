// 该文件是 Beifeng （北风） 项目的一部分。
// src/bin/infer_ppyoloe.rs - PPYOLOE 单张图像推理
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

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use url::Url;

use beifeng::{
  FromUrl,
  deploy::sophgo,
  input::ImageFileInput,
  model::{ModelFiles, PaddleDetModel, paddle_det},
  option::{ModelFormat, RknpuCoreMask, RuntimeOption},
  output::OutputWrapper,
  runtime::{RknpuRuntime, Runtime},
  task::{OneShotTask, Task},
};
use tracing::info;

/// PPYOLOE 推理参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型文件路径（.rknn）
  #[arg(long = "model_file", value_name = "FILE")]
  pub model_file: Option<PathBuf>,
  /// 部署配置 infer_cfg.yml
  #[arg(long = "config_file", value_name = "FILE")]
  pub config_file: Option<PathBuf>,
  /// 测试图像
  #[arg(long, value_name = "FILE")]
  pub image: Option<PathBuf>,
  /// 仅执行模型导出与 BModel 转换流水线，产物写入当前目录，不做推理
  #[arg(long)]
  pub auto: bool,
  /// PaddleDetection 源码目录，仅在 --auto 时使用
  #[arg(
    long = "pp_detect_path",
    value_name = "DIR",
    default_value = "/workspace/PaddleDetection"
  )]
  pub pp_detect_path: PathBuf,
  /// 输出方式，例如 image:///tmp/vis.jpg 或 json:///tmp/result.json
  #[arg(long, value_name = "OUTPUT", default_value = "log://")]
  pub output: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  if args.auto {
    let work_dir = std::env::current_dir()?;
    info!("执行模型转换流水线，工作目录: {}", work_dir.display());
    sophgo::ppyoloe_pipeline(&args.pp_detect_path, &work_dir)?.run()?;
    let artifacts = sophgo::Artifacts::in_dir(&work_dir);
    info!("BModel: {}", artifacts.model_file.display());
    info!("部署配置: {}", artifacts.config_file.display());
    info!("测试图像: {}", artifacts.image_file.display());
    return Ok(());
  }

  let model_file = args.model_file.context("缺少 --model_file")?;
  let config_file = args.config_file.context("缺少 --config_file")?;
  let image = args.image.context("缺少 --image")?;

  let format = ModelFormat::from_path(&model_file)?;
  RknpuRuntime::check_format(format)
    .with_context(|| format!("仅支持 .rknn 模型: {}", model_file.display()))?;

  info!("模型文件路径: {}", model_file.display());
  info!("部署配置: {}", config_file.display());
  info!("输入图像: {}", image.display());
  info!("输出方式: {}", args.output);

  let mut model: PaddleDetModel<RknpuRuntime> = PaddleDetModel::from_files(
    &paddle_det::PPYOLOE,
    &ModelFiles::new(&model_file).with_config(&config_file),
    Some(RuntimeOption::default().use_rknpu2(RknpuCoreMask::Auto)),
    format,
  )?;
  // RKNN 模型在图内完成归一化，输入保持 HWC
  model.preprocessor_mut().disable_normalize();
  model.preprocessor_mut().disable_permute();
  model.postprocessor_mut().apply_nms();

  let input = ImageFileInput::open(&image)?;
  let output = OutputWrapper::from_url(&args.output)?;

  OneShotTask.run_task(input, &model, output)?;

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn auto_uses_default_paddle_detection_dir() {
    let args = Args::try_parse_from(["infer_ppyoloe", "--auto"]).unwrap();
    assert!(args.auto);
    assert_eq!(args.pp_detect_path, PathBuf::from("/workspace/PaddleDetection"));
    assert!(args.model_file.is_none());
    assert_eq!(args.output.scheme(), "log");
  }

  #[test]
  fn explicit_paddle_detection_dir_wins() {
    let args =
      Args::try_parse_from(["infer_ppyoloe", "--auto", "--pp_detect_path", "/opt/PaddleDetection"])
        .unwrap();
    assert_eq!(args.pp_detect_path, PathBuf::from("/opt/PaddleDetection"));
  }
}
