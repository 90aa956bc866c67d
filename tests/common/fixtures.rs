//! Source documents and a mock file host

use lopdf::{Document, Object, Stream, dictionary};
use rand::Rng;
use std::io::Cursor;
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// One-page PDF whose page shows `marker`
pub fn marked_pdf(marker: &str) -> Vec<u8> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Courier",
    });
    let content = format!("BT /F1 12 Tf 50 700 Td ({}) Tj ET", marker);
    let content_id = doc.add_object(Stream::new(dictionary! {}, content.into_bytes()));
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
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

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes).expect("save fixture pdf");
    bytes
}

/// Small solid-color PNG
pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([30, 90, 200]));
    let mut cursor = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut cursor, image::ImageFormat::Png)
        .expect("encode png");
    cursor.into_inner()
}

/// Text markers of every page, in page order
pub fn page_markers(bytes: &[u8]) -> Vec<String> {
    let doc = Document::load_mem(bytes).expect("merged output should parse");
    let mut markers = Vec::new();

    for page_id in doc.get_pages().into_values() {
        let content = doc.get_page_content(page_id).expect("page content");
        let text = String::from_utf8_lossy(&content);
        let mut rest = text.as_ref();
        while let Some(start) = rest.find('(') {
            let after = &rest[start + 1..];
            let Some(end) = after.find(')') else { break };
            markers.push(after[..end].to_string());
            rest = &after[end + 1..];
        }
    }

    markers
}

/// Number of pages in a PDF
pub fn page_count(bytes: &[u8]) -> usize {
    Document::load_mem(bytes)
        .expect("output should parse")
        .get_pages()
        .len()
}

/// Serve `body` at `route` after a random delay of up to `max_delay_ms`
///
/// Randomized latency makes sources complete out of submission order.
pub async fn serve_with_jitter(server: &MockServer, route: &str, body: Vec<u8>, max_delay_ms: u64) {
    let delay = rand::thread_rng().gen_range(0..=max_delay_ms);
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_bytes(body)
                .set_delay(Duration::from_millis(delay)),
        )
        .mount(server)
        .await;
}
