// 该文件是 Xianwei （显微） 项目的一部分。
// src/bin/detect_stack.rs - 图像栈检测
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

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use xianwei::{
  FromUrl,
  batch::CoordinateConvention,
  input::InputWrapper,
  model::{ModelPackage, OnnxBackend},
  output::OutputWrapper,
  task::{DetectOptions, Detector, StackTask, Task},
};

/// Xianwei 图像栈检测参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型包目录，maskrcnn:///path 或 file:///path
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源，image:///file.tif 或 folder:///dir
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出，folder:///dir 或 summary://
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,
  /// 不输出掩码
  #[arg(long)]
  pub no_masks: bool,
  /// 按旧版表格坐标输出
  #[arg(long)]
  pub legacy_coordinates: bool,
  /// 覆盖模型包中的掩码阈值
  #[arg(long, value_name = "T")]
  pub mask_threshold: Option<f32>,
  /// ONNX Runtime 线程数
  #[arg(long, value_name = "N")]
  pub threads: Option<usize>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .init();

  let args = Args::parse();

  info!("模型包: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  if let Some(threshold) = args.mask_threshold {
    anyhow::ensure!(
      (0.0..=1.0).contains(&threshold),
      "掩码阈值必须在 [0, 1] 之间: {}",
      threshold
    );
  }

  let package = Arc::new(ModelPackage::from_url(&args.model)?);
  let stack = InputWrapper::from_url(&args.input)?.into_stack()?;
  let output = OutputWrapper::from_url(&args.output)?;

  let backend = match args.threads {
    Some(n) => OnnxBackend::default().intra_threads(n),
    None => OnnxBackend::default(),
  };
  let options = DetectOptions {
    want_masks: !args.no_masks,
    convention: if args.legacy_coordinates {
      CoordinateConvention::Legacy
    } else {
      CoordinateConvention::Standard
    },
    mask_threshold: args.mask_threshold,
  };
  let detector = Detector::new(backend, package).with_options(options);

  StackTask.run_task(stack, detector, output)
}
