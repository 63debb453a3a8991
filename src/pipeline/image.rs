//! Raster image → single-page PDF.
//!
//! The image is decoded, fitted onto the page with [`crate::geometry::fit`]
//! and embedded as an 8-bit `DeviceRGB` image XObject. Images with an alpha
//! channel get a `DeviceGray` soft mask so transparent regions stay
//! transparent. All streams are Flate-compressed on save.
//!
//! This is CPU-bound; async callers run it inside `spawn_blocking`. The
//! re-encoded pixel buffers only live in memory for the duration of the
//! call, so there is nothing on disk to clean up.

use crate::error::StitchError;
use crate::geometry::{fit, FitResult, PageGeometry, POINTS_PER_MM};
use image::DynamicImage;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use tracing::debug;

/// Resource name the page uses for its image.
const IMAGE_RESOURCE: &[u8] = b"Im0";

/// A converted image: the one-page PDF and where the image was placed.
#[derive(Debug, Clone)]
pub struct ConvertedImage {
    pub pdf: Vec<u8>,
    pub fit: FitResult,
    pub width_px: u32,
    pub height_px: u32,
}

/// Decode `bytes` and produce a one-page PDF with the image centred on
/// `geometry`.
///
/// # Errors
/// - [`StitchError::Decode`] if the bytes are not a decodable PNG/JPEG
/// - [`StitchError::InvalidImage`] if the decoded image has a zero dimension
pub fn image_to_pdf(
    name: &str,
    bytes: &[u8],
    geometry: &PageGeometry,
) -> Result<ConvertedImage, StitchError> {
    let img = image::load_from_memory(bytes).map_err(|e| StitchError::Decode {
        name: name.to_string(),
        detail: e.to_string(),
    })?;

    let (width_px, height_px) = (img.width(), img.height());
    let placement = fit(width_px, height_px, geometry)?;
    debug!(
        "{}: {}x{} px → {:.1}x{:.1} mm at ({:.1}, {:.1}), scale {:.4}",
        name,
        width_px,
        height_px,
        placement.render_width,
        placement.render_height,
        placement.offset_x,
        placement.offset_y,
        placement.scale
    );

    let pdf = build_page(&img, &placement, geometry).map_err(|e| {
        StitchError::Internal(format!("Failed to build page for '{}': {}", name, e))
    })?;

    Ok(ConvertedImage {
        pdf,
        fit: placement,
        width_px,
        height_px,
    })
}

/// Split pixels into an RGB plane and, if the image has one, an alpha plane.
fn pixel_planes(img: &DynamicImage) -> (Vec<u8>, Option<Vec<u8>>) {
    if !img.color().has_alpha() {
        return (img.to_rgb8().into_raw(), None);
    }

    let rgba = img.to_rgba8();
    let pixel_count = (rgba.width() * rgba.height()) as usize;
    let mut rgb = Vec::with_capacity(pixel_count * 3);
    let mut alpha = Vec::with_capacity(pixel_count);
    for pixel in rgba.pixels() {
        rgb.extend_from_slice(&pixel.0[..3]);
        alpha.push(pixel.0[3]);
    }
    (rgb, Some(alpha))
}

fn build_page(
    img: &DynamicImage,
    placement: &FitResult,
    geometry: &PageGeometry,
) -> Result<Vec<u8>, lopdf::Error> {
    let (width, height) = (i64::from(img.width()), i64::from(img.height()));
    let (rgb, alpha) = pixel_planes(img);

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();

    let mut image_dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width,
        "Height" => height,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
    };
    if let Some(alpha) = alpha {
        let smask_id = doc.add_object(Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width,
                "Height" => height,
                "ColorSpace" => "DeviceGray",
                "BitsPerComponent" => 8,
            },
            alpha,
        ));
        image_dict.set("SMask", smask_id);
    }
    let image_id = doc.add_object(Stream::new(image_dict, rgb));

    // PDF user space has its origin at the bottom-left; offsets are from the top.
    let w_pt = placement.render_width * POINTS_PER_MM;
    let h_pt = placement.render_height * POINTS_PER_MM;
    let x_pt = placement.offset_x * POINTS_PER_MM;
    let y_pt = (geometry.page_height - placement.offset_y - placement.render_height) * POINTS_PER_MM;

    let content = Content {
        operations: vec![
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    real(w_pt),
                    Object::Integer(0),
                    Object::Integer(0),
                    real(h_pt),
                    real(x_pt),
                    real(y_pt),
                ],
            ),
            Operation::new("Do", vec![Object::Name(IMAGE_RESOURCE.to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode()?));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![
            Object::Integer(0),
            Object::Integer(0),
            real(geometry.page_width_pt()),
            real(geometry.page_height_pt()),
        ],
        "Resources" => dictionary! {
            "XObject" => dictionary! {
                "Im0" => image_id,
            },
        },
        "Contents" => content_id,
    });

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![Object::Reference(page_id)],
            "Count" => 1,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);
    doc.compress();

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)?;
    Ok(buffer)
}

fn real(v: f64) -> Object {
    Object::Real(v as f32)
}
