//! Mapping image-space boxes onto a letterboxed display.
//!
//! Images are shown "fit-inside": scaled to fit the container while keeping
//! their aspect ratio, and centered. Everything here is pure and cheap, so
//! callers should recompute on every layout change instead of caching.

use crate::model::{BoundingBox, ContainerSize, ImageDimensions, ProjectedRect};

/// Default padding, in display pixels, added on every side of an overlay so it
/// covers anti-aliased glyph edges.
pub const DEFAULT_PADDING: f64 = 2.0;

/// The part of a container actually covered by the image.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplayedRect {
    pub offset_x: f64,
    pub offset_y: f64,
    pub width: f64,
    pub height: f64,
}

/// Compute where an image lands inside a container under "contain" scaling.
///
/// If the image has a zero side, we return the whole container.
pub fn compute_displayed_rect(
    container: ContainerSize,
    image: ImageDimensions,
) -> DisplayedRect {
    if image.is_degenerate() {
        return DisplayedRect {
            offset_x: 0.0,
            offset_y: 0.0,
            width: container.width,
            height: container.height,
        };
    }

    let image_ratio = f64::from(image.width) / f64::from(image.height);
    let container_ratio = container.width / container.height;

    if image_ratio > container_ratio {
        // Wider than the container: bars above and below.
        let width = container.width;
        let height = width / image_ratio;
        DisplayedRect {
            offset_x: 0.0,
            offset_y: (container.height - height) / 2.0,
            width,
            height,
        }
    } else {
        // Taller (or same shape): bars left and right.
        let height = container.height;
        let width = height * image_ratio;
        DisplayedRect {
            offset_x: (container.width - width) / 2.0,
            offset_y: 0.0,
            width,
            height,
        }
    }
}

/// Project an image-space box into container coordinates, growing it by
/// `padding` on every side.
pub fn project_box(
    bbox: &BoundingBox,
    image: ImageDimensions,
    container: ContainerSize,
    padding: f64,
) -> ProjectedRect {
    let displayed = compute_displayed_rect(container, image);
    let (sx, sy) = if image.is_degenerate() {
        (1.0, 1.0)
    } else {
        (
            displayed.width / f64::from(image.width),
            displayed.height / f64::from(image.height),
        )
    };

    ProjectedRect {
        left: displayed.offset_x + bbox.x0 * sx - padding,
        top: displayed.offset_y + bbox.y0 * sy - padding,
        width: (bbox.width() * sx + 2.0 * padding).max(0.0),
        height: (bbox.height() * sy + 2.0 * padding).max(0.0),
    }
}
