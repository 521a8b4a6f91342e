// 该文件是 Xianwei （显微） 项目的一部分。
// src/output/draw.rs - 检测结果可视化
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

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use ndarray::{ArrayView3, Ix2, Ix3};

use crate::{
  decode::Detection,
  frame::{ImageBuffer, broadcast_rgb, to_model_order},
  tensor::ShapeError,
};

// 按类别轮换的边框颜色
const PALETTE: [[u8; 3]; 6] = [
  [255, 64, 64],
  [64, 255, 64],
  [64, 128, 255],
  [255, 200, 0],
  [255, 0, 255],
  [0, 255, 255],
];
const BORDER_THICKNESS: i32 = 2;

pub trait ToRgbImage {
  fn to_rgb_image(&self) -> Result<RgbImage, ShapeError>;
}

/// 原生顺序的帧线性拉伸到 8 位 RGB
impl ToRgbImage for ImageBuffer {
  fn to_rgb_image(&self) -> Result<RgbImage, ShapeError> {
    let rgb = broadcast_rgb(&to_model_order(self)?)?;
    let data = rgb.view().into_dimensionality::<Ix3>()?;
    Ok(stretch_to_rgb(data))
  }
}

fn stretch_to_rgb(data: ArrayView3<'_, f32>) -> RgbImage {
  let (height, width, _) = data.dim();
  let (min, max) = data
    .iter()
    .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
      (lo.min(*v), hi.max(*v))
    });
  let factor = if max > min { 255.0 / (max - min) } else { 0.0 };
  RgbImage::from_fn(width as u32, height as u32, |x, y| {
    let pixel = |c: usize| ((data[[y as usize, x as usize, c]] - min) * factor).round() as u8;
    Rgb([pixel(0), pixel(1), pixel(2)])
  })
}

/// 掩码转为 8 位灰度图，取值按 [0, 1] 映射
pub fn mask_to_gray(mask: &ImageBuffer) -> Result<GrayImage, ShapeError> {
  let data = mask.view().into_dimensionality::<Ix2>()?;
  let (height, width) = data.dim();
  Ok(GrayImage::from_fn(width as u32, height as u32, |x, y| {
    Luma([(data[[y as usize, x as usize]].clamp(0.0, 1.0) * 255.0).round() as u8])
  }))
}

#[derive(Debug, Clone)]
pub struct Draw {
  palette: Vec<[u8; 3]>,
  thickness: i32,
}

impl Default for Draw {
  fn default() -> Self {
    Draw {
      palette: PALETTE.to_vec(),
      thickness: BORDER_THICKNESS,
    }
  }
}

impl Draw {
  fn color(&self, class_id: u32) -> Rgb<u8> {
    Rgb(self.palette[class_id as usize % self.palette.len()])
  }

  pub fn draw_detections_on_image(&self, image: &mut RgbImage, detections: &[Detection]) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    for detection in detections {
      let b = &detection.bbox;
      let x_min = (b.x1.floor() as i32).clamp(0, w - 1);
      let y_min = (b.y1.floor() as i32).clamp(0, h - 1);
      let x_max = (b.x2.ceil() as i32).clamp(0, w - 1);
      let y_max = (b.y2.ceil() as i32).clamp(0, h - 1);
      if x_min >= x_max || y_min >= y_max {
        continue;
      }
      let color = self.color(detection.class_id);
      for t in 0..self.thickness {
        let (width, height) = (x_max - x_min - 2 * t, y_max - y_min - 2 * t);
        if width <= 0 || height <= 0 {
          break;
        }
        let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
        draw_hollow_rect_mut(image, rect, color);
      }
    }
  }

  pub fn draw_detection(
    &self,
    frame: &ImageBuffer,
    detections: &[Detection],
  ) -> Result<RgbImage, ShapeError> {
    let mut image = frame.to_rgb_image()?;
    self.draw_detections_on_image(&mut image, detections);
    Ok(image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::decode::BoundingBox;
  use ndarray::Array2;

  #[test]
  fn frame_is_stretched_to_byte_range() {
    let frame = ImageBuffer::from_yx(ndarray::arr2(&[[100.0, 300.0]]));
    let image = frame.to_rgb_image().unwrap();
    assert_eq!(image.dimensions(), (2, 1));
    assert_eq!(image.get_pixel(0, 0), &Rgb([0, 0, 0]));
    assert_eq!(image.get_pixel(1, 0), &Rgb([255, 255, 255]));
  }

  #[test]
  fn boxes_are_outlined() {
    let frame = ImageBuffer::from_yx(Array2::zeros((20, 20)));
    let detection = Detection {
      frame_index: 0,
      bbox: BoundingBox {
        y1: 5.0,
        x1: 5.0,
        y2: 15.0,
        x2: 15.0,
      },
      class_id: 1,
      class_label: "cell".into(),
      score: 0.9,
      mask: None,
    };
    let image = Draw::default().draw_detection(&frame, &[detection]).unwrap();
    assert_eq!(image.get_pixel(5, 5), &Rgb(PALETTE[1]));
    assert_eq!(image.get_pixel(10, 10), &Rgb([0, 0, 0]));
  }

  #[test]
  fn mask_is_scaled_to_gray() {
    let mask = ImageBuffer::from_yx(ndarray::arr2(&[[0.0, 1.0, 0.5]]));
    let gray = mask_to_gray(&mask).unwrap();
    assert_eq!(gray.get_pixel(1, 0), &Luma([255]));
    assert_eq!(gray.get_pixel(2, 0), &Luma([128]));
  }
}
