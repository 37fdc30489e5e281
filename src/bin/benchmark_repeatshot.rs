// 该文件是 Beifeng （北风） 项目的一部分。
// src/bin/benchmark_repeatshot.rs - 重复推理基准测试
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use beifeng::{
  FromUrl,
  input::ImageFileInput,
  model::{ModelFiles, PaddleDetModel, paddle_det},
  option::{ModelFormat, RuntimeOption},
  output::OutputWrapper,
  runtime::RknpuRuntime,
  task::{RepeatShotTask, Task},
};
use tracing::info;

/// 基准测试参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型目录，包含 model.rknn 与 infer_cfg.yml
  #[arg(long, value_name = "DIR")]
  pub model: PathBuf,
  /// 运行时配置文件 config.txt
  #[arg(long = "config_path", value_name = "FILE")]
  pub config_path: PathBuf,
  /// 测试图像
  #[arg(long, value_name = "FILE")]
  pub image: PathBuf,
  /// 覆盖配置文件中的预热次数
  #[arg(long, value_name = "COUNT")]
  pub warmup: Option<usize>,
  /// 覆盖配置文件中的计时次数
  #[arg(long, value_name = "COUNT")]
  pub repeat: Option<usize>,
  /// 最后一次结果的输出方式
  #[arg(long, value_name = "OUTPUT", default_value = "log://")]
  pub output: Url,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型目录: {}", args.model.display());
  info!("运行时配置: {}", args.config_path.display());
  info!("输入图像: {}", args.image.display());

  let benchmark = RuntimeOption::from_benchmark_config(&args.config_path, &args.model)?;
  let warmup = args.warmup.unwrap_or(benchmark.warmup);
  let repeat = args.repeat.unwrap_or(benchmark.repeat);
  info!("运行时选项: {:?}", benchmark.option);

  let files = ModelFiles::new(args.model.join("model.rknn"))
    .with_config(args.model.join("infer_cfg.yml"));
  let mut model: PaddleDetModel<RknpuRuntime> = PaddleDetModel::from_files(
    &paddle_det::PPYOLOE,
    &files,
    Some(benchmark.option),
    ModelFormat::Rknn,
  )?;
  model.preprocessor_mut().disable_normalize();
  model.preprocessor_mut().disable_permute();
  model.postprocessor_mut().apply_nms();

  let input = ImageFileInput::open(&args.image)?;
  let output = OutputWrapper::from_url(&args.output)?;

  RepeatShotTask::new(warmup, repeat).run_task(input, &model, output)?;

  Ok(())
}
