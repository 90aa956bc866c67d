//! Raster image to single-page document conversion

use crate::error::MergeError;
use image::{GenericImageView, ImageFormat};
use lopdf::{Document, Object, Stream, dictionary};

/// A4 portrait, in points
const PAGE_WIDTH: f64 = 595.0;
const PAGE_HEIGHT: f64 = 842.0;
const MARGIN: f64 = 36.0;

/// Raster formats accepted as sources
pub const SUPPORTED_FORMATS: &[ImageFormat] = &[
    ImageFormat::Png,
    ImageFormat::Jpeg,
    ImageFormat::Gif,
    ImageFormat::Bmp,
    ImageFormat::Tiff,
    ImageFormat::WebP,
];

/// Raster format of `bytes`, if it is one we can place on a page
pub fn detect(bytes: &[u8]) -> Option<ImageFormat> {
    image::guess_format(bytes)
        .ok()
        .filter(|format| SUPPORTED_FORMATS.contains(format))
}

/// Build a one-page document with the image scaled to fit and centered
///
/// Three-component JPEGs are embedded as-is with `DCTDecode`; everything else
/// (CMYK and grayscale JPEGs included) is decoded and stored as raw 8-bit RGB
/// with alpha dropped.
pub fn image_to_document(bytes: &[u8], format: ImageFormat) -> Result<Document, MergeError> {
    let img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| MergeError::ImageConversion(format!("failed to decode {:?}: {}", format, e)))?;

    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(MergeError::ImageConversion("image has no pixels".to_string()));
    }

    let image_dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Image",
        "Width" => width as i64,
        "Height" => height as i64,
        "ColorSpace" => "DeviceRGB",
        "BitsPerComponent" => 8,
    };

    let image_stream = if embeds_as_dct(bytes, format) {
        let mut dict = image_dict;
        dict.set("Filter", "DCTDecode");
        Stream::new(dict, bytes.to_vec())
    } else {
        Stream::new(image_dict, img.to_rgb8().into_raw())
    };

    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let image_id = doc.add_object(Object::Stream(image_stream));
    let resources_id = doc.add_object(dictionary! {
        "XObject" => dictionary! {
            "Im1" => image_id,
        },
    });

    let placement = fit_on_page(width, height);
    let content = format!(
        "q\n{:.2} 0 0 {:.2} {:.2} {:.2} cm\n/Im1 Do\nQ\n",
        placement.width, placement.height, placement.x, placement.y
    );
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));

    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), (PAGE_WIDTH as i64).into(), (PAGE_HEIGHT as i64).into()],
        "Resources" => resources_id,
        "Contents" => content_id,
    });

    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    Ok(doc)
}

/// Whether the compressed JPEG stream can be used directly under `DeviceRGB`
fn embeds_as_dct(bytes: &[u8], format: ImageFormat) -> bool {
    format == ImageFormat::Jpeg && jpeg_component_count(bytes) == Some(3)
}

/// Component count declared by the first SOF segment of a JPEG stream
///
/// The decoder converts CMYK and YCCK to RGB on the fly, so the decoded
/// color type says nothing about what the raw stream holds.
fn jpeg_component_count(bytes: &[u8]) -> Option<u8> {
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return None;
    }

    let mut pos = 2;
    loop {
        if *bytes.get(pos)? != 0xFF {
            return None;
        }
        // Markers may be preceded by fill bytes
        while *bytes.get(pos + 1)? == 0xFF {
            pos += 1;
        }
        let marker = *bytes.get(pos + 1)?;
        pos += 2;

        match marker {
            // Standalone markers carry no length
            0x01 | 0xD0..=0xD7 => continue,
            // Start of scan or end of image before any frame header
            0xDA | 0xD9 => return None,
            _ => {}
        }

        let length = u16::from_be_bytes([*bytes.get(pos)?, *bytes.get(pos + 1)?]) as usize;
        if length < 2 {
            return None;
        }

        let is_frame_header = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_frame_header {
            // length(2) precision(1) height(2) width(2) components(1)
            return bytes.get(pos + 7).copied();
        }

        pos += length;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Placement {
    width: f64,
    height: f64,
    x: f64,
    y: f64,
}

fn fit_on_page(width: u32, height: u32) -> Placement {
    let available_width = PAGE_WIDTH - 2.0 * MARGIN;
    let available_height = PAGE_HEIGHT - 2.0 * MARGIN;

    let scale = (available_width / width as f64).min(available_height / height as f64);
    let drawn_width = width as f64 * scale;
    let drawn_height = height as f64 * scale;

    Placement {
        width: drawn_width,
        height: drawn_height,
        x: (PAGE_WIDTH - drawn_width) / 2.0,
        y: (PAGE_HEIGHT - drawn_height) / 2.0,
    }
}
