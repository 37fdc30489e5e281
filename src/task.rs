// 该文件是 Beifeng （北风） 项目的一部分。
// src/task.rs - 推理任务
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

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::{model::Model, output::Render};

pub trait Task<I, M, O>: Sized {
  type Error;
  fn run_task(self, input: I, model: M, output: O) -> Result<(), Self::Error>;
}

/// 取一帧，推理一次，输出一次
pub struct OneShotTask;

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for OneShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    info!("开始任务...");
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;
    info!("输入帧获取成功，开始推理...");
    let now = Instant::now();
    let result = model.infer(&frame)?;
    info!("推理完成，耗时: {:.2?}", now.elapsed());
    output.render_result(&frame, &result)?;
    info!("渲染完成");

    Ok(())
  }
}

/// 重复推理同一帧并统计耗时，预热轮次不计入统计，只输出最后一次结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepeatShotTask {
  warmup: usize,
  repeat: usize,
}

impl Default for RepeatShotTask {
  fn default() -> Self {
    Self {
      warmup: 10,
      repeat: 100,
    }
  }
}

impl RepeatShotTask {
  pub fn new(warmup: usize, repeat: usize) -> Self {
    Self { warmup, repeat }
  }

  pub fn warmup(&self) -> usize {
    self.warmup
  }

  pub fn repeat(&self) -> usize {
    self.repeat
  }
}

/// 耗时统计
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timing {
  pub mean: Duration,
  pub min: Duration,
  pub max: Duration,
}

impl Timing {
  pub fn from_samples(samples: &[Duration]) -> Option<Self> {
    let min = samples.iter().min().copied()?;
    let max = samples.iter().max().copied()?;
    let mean = samples.iter().sum::<Duration>() / samples.len() as u32;
    Some(Self { mean, min, max })
  }
}

impl<
  F,
  D,
  ME: std::error::Error + Sync + Send + 'static,
  RE: std::error::Error + Sync + Send + 'static,
  I: Iterator<Item = F>,
  M: Model<Input = F, Output = D, Error = ME>,
  O: Render<F, D, Error = RE>,
> Task<I, M, O> for RepeatShotTask
{
  type Error = anyhow::Error;

  fn run_task(self, mut input: I, model: M, output: O) -> Result<(), Self::Error> {
    if self.repeat == 0 {
      anyhow::bail!("repeat 必须大于 0");
    }

    info!("开始任务，预热 {} 次，计时 {} 次", self.warmup, self.repeat);
    let frame = input.next().ok_or_else(|| anyhow::anyhow!("没有输入帧"))?;

    for i in 0..self.warmup {
      model.infer(&frame)?;
      debug!("({}) 预热完成", i);
    }

    let mut times = Vec::with_capacity(self.repeat);
    let mut last = None;
    for i in 0..self.repeat {
      let now = Instant::now();
      let result = model.infer(&frame)?;
      let elapsed = now.elapsed();
      debug!("({}) 推理完成，耗时: {:.2?}", i, elapsed);
      times.push(elapsed);
      last = Some(result);
    }

    if let Some(timing) = Timing::from_samples(&times) {
      warn!(
        "平均推理时间: {:.2?}，最短 {:.2?}，最长 {:.2?}",
        timing.mean, timing.min, timing.max
      );
    }
    if let Some(result) = last {
      output.render_result(&frame, &result)?;
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;
  use std::convert::Infallible;

  use super::*;

  struct Counter {
    calls: Cell<usize>,
  }

  impl Model for Counter {
    type Input = u32;
    type Output = usize;
    type Error = Infallible;

    fn infer(&self, _input: &u32) -> Result<usize, Infallible> {
      self.calls.set(self.calls.get() + 1);
      Ok(self.calls.get())
    }
  }

  struct Last {
    seen: Cell<Option<usize>>,
  }

  impl Render<u32, usize> for &Last {
    type Error = Infallible;

    fn render_result(&self, _frame: &u32, result: &usize) -> Result<(), Infallible> {
      self.seen.set(Some(*result));
      Ok(())
    }
  }

  #[test]
  fn repeat_shot_counts_warmup_and_repeat() {
    let model = Counter {
      calls: Cell::new(0),
    };
    let sink = Last {
      seen: Cell::new(None),
    };
    RepeatShotTask::new(2, 5)
      .run_task(std::iter::once(7u32), &model, &sink)
      .unwrap();
    assert_eq!(model.calls.get(), 7);
    assert_eq!(sink.seen.get(), Some(7));
  }

  #[test]
  fn one_shot_needs_a_frame() {
    let model = Counter {
      calls: Cell::new(0),
    };
    let sink = Last {
      seen: Cell::new(None),
    };
    assert!(
      OneShotTask
        .run_task(std::iter::empty::<u32>(), &model, &sink)
        .is_err()
    );
  }

  #[test]
  fn timing_summary() {
    let samples = [Duration::from_millis(2), Duration::from_millis(4)];
    let timing = Timing::from_samples(&samples).unwrap();
    assert_eq!(timing.mean, Duration::from_millis(3));
    assert!(Timing::from_samples(&[]).is_none());
  }
}
