// 该文件是 Xianwei （显微） 项目的一部分。
// src/output.rs - 输出定义
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

use std::convert::Infallible;

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::ImageStack, task::DetectionOutput};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

#[cfg(feature = "directory_record")]
pub mod draw;

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError, RecordKind};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 只把汇总表写到日志，`summary://`
pub struct SummaryOutput;

impl FromUrlWithScheme for SummaryOutput {
  const SCHEME: &'static str = "summary";
}

impl FromUrl for SummaryOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(SummaryOutput)
  }
}

impl Render<ImageStack, DetectionOutput> for SummaryOutput {
  type Error = Infallible;

  fn render_result(&self, frame: &ImageStack, result: &DetectionOutput) -> Result<(), Self::Error> {
    info!(
      "{} 帧, {} 个检测",
      frame.len(),
      result.table.len()
    );
    for row in result.table.iter() {
      info!(
        "#{} 帧 {} {}({}) {:.4} x={} y={} w={} h={}",
        row.id, row.frame, row.class_label, row.class_id, row.score, row.x, row.y, row.width, row.height
      );
    }
    Ok(())
  }
}

pub enum OutputWrapper {
  Summary(SummaryOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      SummaryOutput::SCHEME => Ok(OutputWrapper::Summary(SummaryOutput::from_url(url)?)),
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => {
        let output = DirectoryRecordOutput::from_url(url)?;
        Ok(OutputWrapper::DirectoryRecordOutput(output))
      }
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Render<ImageStack, DetectionOutput> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &ImageStack, result: &DetectionOutput) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Summary(output) => match output.render_result(frame, result) {
        Ok(()) => Ok(()),
        Err(never) => match never {},
      },
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}
