//! Document merge accumulator
//!
//! [`MergeAccumulator`] starts empty and has whole documents appended to it,
//! one buffer at a time, in the order the caller chooses. A buffer may be a
//! PDF or a raster image ([`image::SUPPORTED_FORMATS`]); images become a
//! single A4 page.
//!
//! The accumulator is not safe for concurrent mutation. Callers fetch in
//! parallel, sort, then append sequentially, usually from
//! `tokio::task::spawn_blocking` since parsing is CPU-bound.

pub mod image;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_fixtures;

use crate::error::MergeError;
use crate::types::JobMetadata;
use lopdf::{Dictionary, Document, Object, ObjectId, dictionary};
use std::path::Path;

/// Page attributes a page may inherit from its ancestors in the page tree
const INHERITABLE_ATTRIBUTES: &[&[u8]] = &[b"MediaBox", b"Resources", b"CropBox", b"Rotate"];

/// Guard against malformed, cyclic page trees
const MAX_TREE_DEPTH: usize = 64;

/// Producer string written into every output
pub const PRODUCER: &str = concat!("docbatch ", env!("CARGO_PKG_VERSION"));

/// Merged document under construction
pub struct MergeAccumulator {
    doc: Document,
    pages_id: ObjectId,
    page_ids: Vec<ObjectId>,
    info: Dictionary,
}

impl std::fmt::Debug for MergeAccumulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeAccumulator")
            .field("pages", &self.page_ids.len())
            .finish()
    }
}

impl Default for MergeAccumulator {
    fn default() -> Self {
        Self::new()
    }
}

impl MergeAccumulator {
    /// Create an empty accumulator
    pub fn new() -> Self {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();

        Self {
            doc,
            pages_id,
            page_ids: Vec::new(),
            info: dictionary! {
                "Producer" => Object::string_literal(PRODUCER),
            },
        }
    }

    /// Set the document info dictionary
    ///
    /// Empty values are left out. Keywords are joined with `", "`.
    pub fn set_info(&mut self, title: Option<&str>, metadata: &JobMetadata) {
        let fields = [
            ("Title", title),
            ("Author", metadata.author.as_deref()),
            ("Subject", metadata.subject.as_deref()),
        ];
        for (key, value) in fields {
            match value.filter(|v| !v.is_empty()) {
                Some(v) => self.info.set(key, Object::string_literal(v)),
                None => {
                    self.info.remove(key.as_bytes());
                }
            }
        }

        if metadata.keywords.is_empty() {
            self.info.remove(b"Keywords");
        } else {
            self.info
                .set("Keywords", Object::string_literal(metadata.keywords.join(", ")));
        }
    }

    /// Append every page of the document in `bytes`
    ///
    /// Returns the number of pages added. On error the accumulator is left
    /// exactly as it was.
    pub fn append_buffer(&mut self, bytes: &[u8]) -> Result<usize, MergeError> {
        let source = load_source(bytes)?;
        self.append_document(source)
    }

    /// Append every page of the document stored at `path`
    pub fn append_file(&mut self, path: &Path) -> Result<usize, MergeError> {
        let bytes = std::fs::read(path)
            .map_err(|e| MergeError::LoadFailed(format!("{}: {}", path.display(), e)))?;
        self.append_buffer(&bytes)
    }

    /// Append every page of an already-loaded document
    pub fn append_document(&mut self, mut source: Document) -> Result<usize, MergeError> {
        // Keep object ids disjoint from what we already hold
        source.renumber_objects_with(self.doc.max_id + 1);

        let source_pages: Vec<ObjectId> = source.get_pages().into_values().collect();
        if source_pages.is_empty() {
            return Err(MergeError::LoadFailed("document has no pages".to_string()));
        }

        for &page_id in &source_pages {
            flatten_inherited_attributes(&mut source, page_id)?;
        }

        // Everything fallible is done; from here on only the accumulator changes
        for &page_id in &source_pages {
            if let Some(Object::Dictionary(page)) = source.objects.get_mut(&page_id) {
                page.set("Parent", self.pages_id);
            }
        }

        for (id, object) in source.objects {
            if is_tree_node(&object) {
                continue;
            }
            self.doc.objects.insert(id, object);
        }
        self.doc.max_id = self.doc.max_id.max(source.max_id);
        self.page_ids.extend_from_slice(&source_pages);

        Ok(source_pages.len())
    }

    /// Pages appended so far
    pub fn page_count(&self) -> usize {
        self.page_ids.len()
    }

    /// Serialize the merged document with compressed streams
    pub fn finish(mut self) -> Result<Vec<u8>, MergeError> {
        let kids: Vec<Object> = self.page_ids.iter().map(|id| (*id).into()).collect();
        self.doc.objects.insert(
            self.pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => kids,
                "Count" => self.page_ids.len() as i64,
            }),
        );

        let catalog_id = self.doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => self.pages_id,
        });
        self.doc.trailer.set("Root", catalog_id);

        let info_id = self.doc.add_object(self.info);
        self.doc.trailer.set("Info", info_id);

        // Annotations and outlines of dropped catalogs may leave unreachable objects behind
        self.doc.prune_objects();
        self.doc.compress();

        let mut buffer = Vec::new();
        self.doc
            .save_to(&mut buffer)
            .map_err(|e| MergeError::SerializeFailed(e.to_string()))?;

        Ok(buffer)
    }
}

/// Parse a source buffer into a document
///
/// Raster images are converted. Documents encrypted with an empty user
/// password are decrypted on load and merge like any other; documents that
/// need a user password are rejected.
pub fn load_source(bytes: &[u8]) -> Result<Document, MergeError> {
    if let Some(format) = image::detect(bytes) {
        return image::image_to_document(bytes, format);
    }

    if !looks_like_pdf(bytes) {
        return Err(MergeError::UnsupportedFormat(describe_prefix(bytes)));
    }

    let doc = Document::load_mem(bytes).map_err(|e| MergeError::LoadFailed(e.to_string()))?;
    // The encryption dictionary survives loading only when decryption was not possible
    if doc.is_encrypted() {
        return Err(MergeError::LoadFailed("document requires a password".to_string()));
    }
    if doc.encryption_state.is_some() {
        tracing::debug!("source document decrypted with empty user password");
    }

    Ok(doc)
}

// The header must appear in the first 1024 bytes
fn looks_like_pdf(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(1024)];
    head.windows(5).any(|w| w == b"%PDF-")
}

fn describe_prefix(bytes: &[u8]) -> String {
    if bytes.is_empty() {
        return "empty body".to_string();
    }
    let head: String = String::from_utf8_lossy(&bytes[..bytes.len().min(16)])
        .chars()
        .map(|c| if c.is_control() { '.' } else { c })
        .collect();
    format!("not a PDF or supported image (starts with {:?})", head)
}

fn is_tree_node(object: &Object) -> bool {
    match object {
        Object::Dictionary(dict) => matches!(
            dict.get(b"Type").and_then(Object::as_name),
            Ok(b"Catalog") | Ok(b"Pages")
        ),
        _ => false,
    }
}

fn flatten_inherited_attributes(doc: &mut Document, page_id: ObjectId) -> Result<(), MergeError> {
    let inherited: Vec<(&[u8], Object)> = {
        let page = doc
            .get_object(page_id)
            .and_then(Object::as_dict)
            .map_err(|e| MergeError::LoadFailed(format!("page {:?}: {}", page_id, e)))?;

        INHERITABLE_ATTRIBUTES
            .iter()
            .filter(|key| !page.has(key))
            .filter_map(|key| find_inherited(doc, page, key).map(|value| (*key, value)))
            .collect()
    };

    if inherited.is_empty() {
        return Ok(());
    }

    let page = doc
        .get_object_mut(page_id)
        .and_then(Object::as_dict_mut)
        .map_err(|e| MergeError::LoadFailed(format!("page {:?}: {}", page_id, e)))?;
    for (key, value) in inherited {
        page.set(key, value);
    }

    Ok(())
}

fn find_inherited(doc: &Document, page: &Dictionary, key: &[u8]) -> Option<Object> {
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();

    for _ in 0..MAX_TREE_DEPTH {
        let node = doc.get_object(parent?).and_then(Object::as_dict).ok()?;
        if let Ok(value) = node.get(key) {
            return Some(value.clone());
        }
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
    }

    None
}
