// 该文件是 Beifeng （北风） 项目的一部分。
// src/bin/patch_rpath.rs - 修正 Paddle Inference 共享库的 RPATH
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

use beifeng::deploy::rpath;
use tracing::info;

/// 使用 patchelf（可由 PATCHELF_EXE 指定）改写 RPATH
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// libpaddle_inference.so 路径
  #[arg(value_name = "SO_FILE")]
  pub so_file: PathBuf,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  if rpath::patch_paddle_inference(&args.so_file)? {
    info!("RPATH 已更新: {}", args.so_file.display());
  }

  Ok(())
}
