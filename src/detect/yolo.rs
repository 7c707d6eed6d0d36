//! YOLOv8 pre- and post-processing.
//!
//! Exports take a `[1, 3, H, W]` float input in `0..1` and produce `[1, 4 + C, N]`
//! proposals: center-format boxes in input pixels followed by one score per class.
//! Some exports transpose the output to `[1, N, 4 + C]`; both layouts are accepted.

use anyhow::{anyhow, Result};
use image::{imageops, imageops::FilterType, ImageBuffer, Rgb};

use crate::detect::labels::label_for;
use crate::detect::result::{BoundingBox, Detection};
use crate::frame::Frame;

#[derive(Clone, Debug)]
pub struct YoloParams {
    pub input_width: u32,
    pub input_height: u32,
    pub conf_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for YoloParams {
    fn default() -> Self {
        Self {
            input_width: 640,
            input_height: 640,
            conf_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 300,
        }
    }
}

/// Resize a frame to the model input and lay it out as NCHW floats.
pub fn preprocess(frame: &Frame, params: &YoloParams) -> Result<Vec<f32>> {
    if frame.is_empty() {
        return Err(anyhow!("cannot run detection on an empty frame"));
    }
    let view = ImageBuffer::<Rgb<u8>, &[u8]>::from_raw(frame.width, frame.height, frame.pixels())
        .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))?;
    let resized = imageops::resize(
        &view,
        params.input_width,
        params.input_height,
        FilterType::Triangle,
    );

    let plane = (params.input_width * params.input_height) as usize;
    let mut input = vec![0f32; plane * 3];
    for (i, px) in resized.pixels().enumerate() {
        input[i] = px.0[0] as f32 / 255.0;
        input[plane + i] = px.0[1] as f32 / 255.0;
        input[2 * plane + i] = px.0[2] as f32 / 255.0;
    }
    Ok(input)
}

/// Turn raw proposals into detections in frame pixel coordinates.
pub fn decode(
    output: &[f32],
    shape: &[usize],
    params: &YoloParams,
    frame_width: u32,
    frame_height: u32,
) -> Result<Vec<Detection>> {
    let (rows, cols) = match shape {
        [1, rows, cols] => (*rows, *cols),
        other => return Err(anyhow!("unexpected detector output shape {:?}", other)),
    };
    if output.len() != rows * cols {
        return Err(anyhow!(
            "detector output has {} values, shape {:?} needs {}",
            output.len(),
            shape,
            rows * cols
        ));
    }
    // Attributes are usually the short axis: 4 box values plus class scores.
    let channels_first = rows <= cols || cols < 5;
    let (attrs, proposals) = if channels_first {
        (rows, cols)
    } else {
        (cols, rows)
    };
    if attrs < 5 {
        return Err(anyhow!(
            "detector output needs at least 5 attributes per proposal, got {}",
            attrs
        ));
    }
    let at = |proposal: usize, attr: usize| -> f32 {
        if channels_first {
            output[attr * proposals + proposal]
        } else {
            output[proposal * attrs + attr]
        }
    };

    let scale_x = frame_width as f32 / params.input_width as f32;
    let scale_y = frame_height as f32 / params.input_height as f32;
    let mut candidates = Vec::new();
    for i in 0..proposals {
        let (class_id, score) = (4..attrs)
            .map(|attr| (attr - 4, at(i, attr)))
            .fold((0usize, f32::NEG_INFINITY), |best, next| {
                if next.1 > best.1 {
                    next
                } else {
                    best
                }
            });
        if !score.is_finite() || score < params.conf_threshold {
            continue;
        }
        let bbox = BoundingBox::from_center(at(i, 0), at(i, 1), at(i, 2), at(i, 3))
            .scale(scale_x, scale_y)
            .clamp(frame_width, frame_height);
        if bbox.area() <= 0.0 {
            continue;
        }
        candidates.push(Detection {
            class_id,
            label: label_for(class_id),
            confidence: score,
            bbox,
        });
    }

    let mut kept = nms(candidates, params.iou_threshold);
    kept.truncate(params.max_detections);
    Ok(kept)
}

/// Class-aware non-maximum suppression. Output is sorted by descending confidence.
pub fn nms(mut candidates: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let suppressed = kept.iter().any(|k| {
            k.class_id == candidate.class_id && k.bbox.iou(&candidate.bbox) > iou_threshold
        });
        if !suppressed {
            kept.push(candidate);
        }
    }
    kept
}
