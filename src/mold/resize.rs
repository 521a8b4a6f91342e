// 该文件是 Xianwei （显微） 项目的一部分。
// src/mold/resize.rs - 双线性插值缩放（image::imageops）
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

use image::{
  ImageBuffer as RawImage, Luma,
  imageops::{self, FilterType},
};
use ndarray::{Array2, Array3, ArrayView2, ArrayView3, Axis};

/// 单通道双线性缩放，像素中心对齐
pub fn resize_bilinear_2d(image: ArrayView2<'_, f32>, height: usize, width: usize) -> Array2<f32> {
  let (src_h, src_w) = image.dim();
  if src_h == 0 || src_w == 0 || height == 0 || width == 0 {
    return Array2::zeros((height, width));
  }
  if (src_h, src_w) == (height, width) {
    return image.to_owned();
  }

  let (min, max) = image
    .iter()
    .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
      (lo.min(*v), hi.max(*v))
    });
  if max <= min {
    return Array2::from_elem((height, width), min);
  }

  // image 的浮点采样会把结果钳位到 [0, 1]，先线性映射到该区间，缩放后再还原
  let range = max - min;
  let plane: RawImage<Luma<f32>, Vec<f32>> =
    RawImage::from_fn(src_w as u32, src_h as u32, |x, y| {
      Luma([(image[[y as usize, x as usize]] - min) / range])
    });
  let resized = imageops::resize(&plane, width as u32, height as u32, FilterType::Triangle);

  Array2::from_shape_fn((height, width), |(y, x)| {
    resized.get_pixel(x as u32, y as u32)[0] * range + min
  })
}

/// HWC 图像逐通道双线性缩放
pub fn resize_bilinear(image: ArrayView3<'_, f32>, height: usize, width: usize) -> Array3<f32> {
  let channels = image.len_of(Axis(2));
  let mut out = Array3::zeros((height, width, channels));
  for c in 0..channels {
    let plane = resize_bilinear_2d(image.index_axis(Axis(2), c), height, width);
    out.index_axis_mut(Axis(2), c).assign(&plane);
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::{arr2, s};

  fn close(a: f32, b: f32) -> bool {
    (a - b).abs() < 1e-3
  }

  #[test]
  fn identity_size_is_a_copy() {
    let image = arr2(&[[1.0, 2.0], [3.0, 4.0]]);
    assert_eq!(resize_bilinear_2d(image.view(), 2, 2), image);
  }

  #[test]
  fn upscale_is_mirror_symmetric() {
    let ramp = arr2(&[[0.0, 10.0]]);
    let mirrored = arr2(&[[10.0, 0.0]]);
    let out = resize_bilinear_2d(ramp.view(), 1, 4);
    let out_mirrored = resize_bilinear_2d(mirrored.view(), 1, 4);
    for x in 0..4 {
      assert!(
        close(out[[0, x]], out_mirrored[[0, 3 - x]]),
        "{:?} vs {:?}",
        out,
        out_mirrored
      );
    }
    assert!(close(out[[0, 0]], 0.0) && close(out[[0, 3]], 10.0));
    assert!(out[[0, 1]] > 0.0 && out[[0, 1]] < 5.0);
  }

  #[test]
  fn values_outside_unit_range_survive() {
    let image = arr2(&[[-120.0, 300.0], [40.0, 2000.0]]);
    let out = resize_bilinear_2d(image.view(), 5, 5);
    let (lo, hi) = out
      .iter()
      .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    assert!(lo >= -120.0 - 1e-3 && hi <= 2000.0 + 1e-3);
    assert!(close(out[[0, 0]], -120.0));
    assert!(close(out[[4, 4]], 2000.0));
  }

  #[test]
  fn constant_planes_stay_constant() {
    let image = Array2::from_elem((3, 7), 0.8);
    let out = resize_bilinear_2d(image.view(), 10, 4);
    assert_eq!(out.dim(), (10, 4));
    assert!(out.iter().all(|v| *v == 0.8));
  }

  #[test]
  fn downscale_averages_neighbours() {
    let mut image = Array2::zeros((4, 4));
    image.slice_mut(s![.., 2..]).fill(1.0);
    let out = resize_bilinear_2d(image.view(), 2, 2);
    assert!(close(out[[0, 0]], out[[1, 0]]));
    assert!(out[[0, 0]] < 0.5 && out[[0, 1]] > 0.5);
  }

  #[test]
  fn channels_are_resized_independently() {
    let image = Array3::from_shape_fn((2, 2, 3), |(_, _, c)| c as f32);
    let out = resize_bilinear(image.view(), 5, 3);
    assert_eq!(out.dim(), (5, 3, 3));
    assert!(out.index_axis(Axis(2), 2).iter().all(|v| *v == 2.0));
  }
}
