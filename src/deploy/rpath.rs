// 该文件是 Beifeng （北风） 项目的一部分。
// src/deploy/rpath.rs - 修正 Paddle Inference 共享库的 RPATH
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

use std::path::Path;

use tracing::info;

use super::{DeployError, ToolStep};

pub const PATCHELF_ENV: &str = "PATCHELF_EXE";

pub const PADDLE_INFERENCE_RPATHS: [&str; 4] = [
  "$ORIGIN",
  "$ORIGIN/../../third_party/install/mkldnn/lib/",
  "$ORIGIN/../../third_party/install/mklml/lib/",
  "$ORIGIN/../../../tensorrt/lib/",
];

/// 生成 patchelf 命令；非 Linux 或 sw_64/mips64 平台无需处理，返回 `None`
pub fn patch_command(so_file: &Path, os: &str, arch: &str, patchelf: &str) -> Option<ToolStep> {
  if os != "linux" || matches!(arch, "sw_64" | "mips64") {
    return None;
  }
  Some(
    ToolStep::new(patchelf)
      .args(["--force-rpath", "--set-rpath"])
      .arg(PADDLE_INFERENCE_RPATHS.join(":"))
      .arg(so_file.display().to_string()),
  )
}

/// 返回是否实际执行了修改
pub fn patch_paddle_inference(so_file: &Path) -> Result<bool, DeployError> {
  let patchelf = std::env::var(PATCHELF_ENV).unwrap_or_else(|_| "patchelf".to_string());
  match patch_command(
    so_file,
    std::env::consts::OS,
    std::env::consts::ARCH,
    &patchelf,
  ) {
    Some(step) => {
      step.run()?;
      Ok(true)
    }
    None => {
      info!("当前平台无需修改 RPATH，跳过 {}", so_file.display());
      Ok(false)
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn linux_command_sets_all_rpaths() {
    let step = patch_command(
      Path::new("/opt/paddle/lib/libpaddle_inference.so"),
      "linux",
      "x86_64",
      "patchelf",
    )
    .unwrap();
    assert_eq!(step.program(), "patchelf");
    assert_eq!(
      step.arguments(),
      [
        "--force-rpath",
        "--set-rpath",
        "$ORIGIN:$ORIGIN/../../third_party/install/mkldnn/lib/:$ORIGIN/../../third_party/install/mklml/lib/:$ORIGIN/../../../tensorrt/lib/",
        "/opt/paddle/lib/libpaddle_inference.so",
      ]
    );
  }

  #[test]
  fn skipped_platforms() {
    let so = Path::new("libpaddle_inference.so");
    assert!(patch_command(so, "macos", "aarch64", "patchelf").is_none());
    assert!(patch_command(so, "windows", "x86_64", "patchelf").is_none());
    assert!(patch_command(so, "linux", "mips64", "patchelf").is_none());
    assert!(patch_command(so, "linux", "sw_64", "patchelf").is_none());
  }

  #[test]
  fn custom_patchelf_binary() {
    let step = patch_command(Path::new("a.so"), "linux", "aarch64", "/usr/local/bin/patchelf").unwrap();
    assert_eq!(step.program(), "/usr/local/bin/patchelf");
  }
}
