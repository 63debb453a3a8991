//! Page fitting: where an image goes on a fixed-size page.
//!
//! Images are measured at one pixel per millimetre ([`MM_PER_PIXEL`]). An
//! image that already fits inside the margined area keeps its natural size;
//! a larger one is shrunk by the binding constraint (the smaller of the
//! width and height ratios) so both dimensions fit. Either way the result is
//! centred on the full page, not on the margined area.
//!
//! The geometry every job uses is the immutable [`A4_GEOMETRY`] constant.
//! It is deliberately not part of [`crate::PipelineConfig`].

use crate::error::StitchError;
use serde::{Deserialize, Serialize};

/// Physical size of one image pixel, in millimetres.
pub const MM_PER_PIXEL: f64 = 1.0;

/// PDF user-space points per millimetre.
pub const POINTS_PER_MM: f64 = 72.0 / 25.4;

/// A4 portrait (210 × 297 mm) with 10 mm margins on every side.
pub const A4_GEOMETRY: PageGeometry = PageGeometry::with_margin(210.0, 297.0, 10.0);

/// Page size and the usable area inside its margins, in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PageGeometry {
    pub page_width: f64,
    pub page_height: f64,
    pub margined_width: f64,
    pub margined_height: f64,
}

impl PageGeometry {
    /// A page with the same margin on all four sides.
    pub const fn with_margin(page_width: f64, page_height: f64, margin: f64) -> Self {
        Self {
            page_width,
            page_height,
            margined_width: page_width - 2.0 * margin,
            margined_height: page_height - 2.0 * margin,
        }
    }

    /// Page width in PDF points.
    pub fn page_width_pt(&self) -> f64 {
        self.page_width * POINTS_PER_MM
    }

    /// Page height in PDF points.
    pub fn page_height_pt(&self) -> f64 {
        self.page_height * POINTS_PER_MM
    }
}

/// Placement of an image on a page, in millimetres.
///
/// Offsets are measured from the page's top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FitResult {
    /// Uniform scale applied to the image's natural size, in `(0, 1]`.
    pub scale: f64,
    pub render_width: f64,
    pub render_height: f64,
    pub offset_x: f64,
    pub offset_y: f64,
}

/// Compute the scale and centred position of a `width_px` × `height_px`
/// image on `geometry`.
///
/// # Errors
/// [`StitchError::InvalidImage`] if either dimension is zero.
pub fn fit(width_px: u32, height_px: u32, geometry: &PageGeometry) -> Result<FitResult, StitchError> {
    if width_px == 0 || height_px == 0 {
        return Err(StitchError::InvalidImage {
            width: width_px,
            height: height_px,
        });
    }

    let width = f64::from(width_px) * MM_PER_PIXEL;
    let height = f64::from(height_px) * MM_PER_PIXEL;

    let scale = if width > geometry.margined_width || height > geometry.margined_height {
        let scale_x = geometry.margined_width / width;
        let scale_y = geometry.margined_height / height;
        scale_x.min(scale_y)
    } else {
        1.0
    };

    let render_width = width * scale;
    let render_height = height * scale;

    Ok(FitResult {
        scale,
        render_width,
        render_height,
        offset_x: (geometry.page_width - render_width) / 2.0,
        offset_y: (geometry.page_height - render_height) / 2.0,
    })
}
