// 该文件是 Beifeng （北风） 项目的一部分。
// tests/task.rs - 输入、检测器与输出串联的任务测试
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

#![cfg(all(feature = "read_image_file", feature = "json_record"))]

mod common;

use beifeng::{
  FromUrl,
  input::InputWrapper,
  model::{Detector, PaddleDet, paddle_det},
  option::ModelFormat,
  output::OutputWrapper,
  task::{OneShotTask, RepeatShotTask, Task},
};
use common::{Fixture, ScriptedRuntime};
use url::Url;

fn write_image(fixture: &Fixture) -> std::path::PathBuf {
  let path = fixture.path("input.png");
  common::test_frame(32, 48).to_rgb_image().save(&path).unwrap();
  path
}

#[test]
fn one_shot_writes_labelled_json_record() {
  let fixture = Fixture::new(&common::in_graph_script());
  let model: Detector<PaddleDet, ScriptedRuntime> = Detector::from_files(
    &paddle_det::PPYOLOE,
    &fixture.files(),
    None,
    ModelFormat::Paddle,
  )
  .unwrap();

  let image = write_image(&fixture);
  let record = fixture.path("out/result.json");
  let input_url = Url::parse(&format!("image://{}", image.display())).unwrap();
  let output_url = Url::parse(&format!(
    "json://{}?config={}",
    record.display(),
    fixture.path("infer_cfg.yml").display()
  ))
  .unwrap();

  OneShotTask
    .run_task(
      InputWrapper::from_url(&input_url).unwrap(),
      &model,
      OutputWrapper::from_url(&output_url).unwrap(),
    )
    .unwrap();

  let json: serde_json::Value =
    serde_json::from_str(&std::fs::read_to_string(&record).unwrap()).unwrap();
  assert_eq!(json["width"], 48);
  assert_eq!(json["height"], 32);
  assert_eq!(json["items"].as_array().unwrap().len(), 2);
  assert_eq!(json["items"][0]["label"], "person");
  assert_eq!(json["items"][1]["label"], "bicycle");
}

#[test]
fn repeat_shot_runs_warmup_and_repeat() {
  let fixture = Fixture::new(&common::in_graph_script());
  let model: Detector<PaddleDet, ScriptedRuntime> = Detector::from_files(
    &paddle_det::PPYOLOE,
    &fixture.files(),
    None,
    ModelFormat::Paddle,
  )
  .unwrap();
  let image = write_image(&fixture);
  let input_url = Url::parse(&format!("image://{}", image.display())).unwrap();

  RepeatShotTask::new(2, 3)
    .run_task(
      InputWrapper::from_url(&input_url).unwrap(),
      &model,
      OutputWrapper::from_url(&Url::parse("log://").unwrap()).unwrap(),
    )
    .unwrap();
  assert_eq!(model.runtime().calls(), 5);
}
