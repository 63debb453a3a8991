//! Document assembly: concatenate PDFs in submission order.
//!
//! The algorithm:
//! 1. No documents → error
//! 2. One document → returned byte-for-byte, the merge engine is not used
//! 3. Otherwise load every input with lopdf's tolerant parser (all inputs are
//!    loaded before anything is merged, so a corrupt input fails the whole
//!    call and there is no partial merge). Encrypted inputs are opened with
//!    the empty user password; those that need a real one fail
//! 4. Start an empty destination document with a fresh catalog and page tree
//! 5. For each input, in order:
//!    a. push inherited page attributes (`MediaBox`, `CropBox`, `Resources`,
//!       `Rotate`) down onto each page so it survives re-parenting
//!    b. shift every object id past the destination's highest id
//!    c. import the objects and append the pages to the destination's `Kids`
//! 6. Drop objects no longer reachable from the new catalog, compress, save
//!
//! Pages are never reordered, deduplicated or inspected beyond this.

use crate::error::StitchError;
use lopdf::{dictionary, Document, Object, ObjectId};
use std::io::Write;
use tracing::{debug, warn};

/// Page attributes a page may inherit from its ancestors in the page tree.
const INHERITABLE: [&[u8]; 4] = [b"MediaBox", b"CropBox", b"Resources", b"Rotate"];

/// Guard against cyclic `Parent` chains in malformed files.
const MAX_TREE_DEPTH: usize = 64;

/// One input to [`assemble`].
#[derive(Debug, Clone, Copy)]
pub struct DocumentInput<'a> {
    /// Upload name, used in error messages.
    pub name: &'a str,
    pub bytes: &'a [u8],
}

/// The merged output.
#[derive(Debug, Clone)]
pub struct AssembledDocument {
    pub bytes: Vec<u8>,
    /// Page count, when known. The single-document copy path does not parse
    /// its input, so it reports `None` if the copy cannot be read leniently.
    pub page_count: Option<usize>,
}

/// Concatenate `documents` into one PDF, preserving order.
///
/// # Errors
/// - [`StitchError::NoFiles`] if `documents` is empty
/// - [`StitchError::Merge`] if any input cannot be loaded, or is encrypted
///   with a non-empty user password
/// - [`StitchError::Internal`] if the merged document cannot be written
pub fn assemble(documents: &[DocumentInput<'_>]) -> Result<AssembledDocument, StitchError> {
    match documents {
        [] => Err(StitchError::NoFiles),
        [single] => Ok(AssembledDocument {
            bytes: single.bytes.to_vec(),
            page_count: Document::load_mem(single.bytes)
                .ok()
                .map(|d| d.get_pages().len()),
        }),
        many => merge(many),
    }
}

fn merge(documents: &[DocumentInput<'_>]) -> Result<AssembledDocument, StitchError> {
    let mut loaded = Vec::with_capacity(documents.len());
    for (index, input) in documents.iter().enumerate() {
        let mut doc = Document::load_mem(input.bytes)
            .map_err(|e| merge_error(index, input, e.to_string()))?;
        if doc.is_encrypted() {
            doc.decrypt("").map_err(|e| {
                merge_error(index, input, format!("cannot open encrypted document: {e}"))
            })?;
            debug!("Decrypted document {} ('{}')", index, input.name);
        }
        loaded.push(doc);
    }

    let version = loaded
        .iter()
        .map(|d| d.version.clone())
        .max()
        .unwrap_or_else(|| "1.5".to_string());

    let mut dest = Document::with_version(version);
    let pages_id = dest.new_object_id();
    let mut kids: Vec<ObjectId> = Vec::new();

    for (index, mut source) in loaded.into_iter().enumerate() {
        let input = &documents[index];
        let source_pages =
            detach_pages(&mut source).map_err(|e| merge_error(index, input, e.to_string()))?;
        if source_pages.is_empty() {
            warn!("Document {} ('{}') has no pages", index, input.name);
        }

        let source_max = source
            .objects
            .keys()
            .map(|id| id.0)
            .max()
            .unwrap_or(0)
            .max(source.max_id);
        let offset = dest.max_id;

        for (id, object) in source.objects {
            dest.objects
                .insert((id.0 + offset, id.1), remap_refs(object, offset));
        }
        kids.extend(source_pages.iter().map(|id| (id.0 + offset, id.1)));
        dest.max_id = offset + source_max;

        debug!(
            "Imported document {} ('{}'): {} pages, ids shifted by {}",
            index,
            input.name,
            source_pages.len(),
            offset
        );
    }

    for &page_id in &kids {
        if let Ok(page) = dest.get_object_mut(page_id).and_then(Object::as_dict_mut) {
            page.set("Parent", pages_id);
        }
    }

    let page_count = kids.len();
    dest.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids.into_iter().map(Object::Reference).collect::<Vec<_>>(),
            "Count" => page_count as i64,
        }),
    );
    let catalog_id = dest.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    dest.trailer.set("Root", catalog_id);

    let pruned = dest.prune_objects();
    debug!("Pruned {} unreachable objects", pruned.len());
    dest.compress();

    let mut bytes = Vec::new();
    write_merged(&mut dest, &mut bytes)?;

    Ok(AssembledDocument {
        bytes,
        page_count: Some(page_count),
    })
}

/// Serialise the merged document. A failure here is not attributable to any
/// one input.
fn write_merged<W: Write>(dest: &mut Document, target: &mut W) -> Result<(), StitchError> {
    dest.save_to(target)
        .map_err(|e| StitchError::Internal(format!("failed to write merged document: {e}")))
}

fn merge_error(index: usize, input: &DocumentInput<'_>, detail: String) -> StitchError {
    StitchError::Merge {
        index,
        name: input.name.to_string(),
        detail,
    }
}

/// Make every page self-contained and cut it loose from its page tree.
///
/// Returns the page ids in document order.
fn detach_pages(doc: &mut Document) -> Result<Vec<ObjectId>, lopdf::Error> {
    let page_ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
    for &page_id in &page_ids {
        let inherited = inherited_attributes(doc, page_id);
        let page = doc.get_object_mut(page_id).and_then(Object::as_dict_mut)?;
        for (key, value) in inherited {
            page.set(key, value);
        }
        page.remove(b"Parent");
    }
    Ok(page_ids)
}

/// Inheritable attributes the page lacks but an ancestor defines.
///
/// The nearest ancestor wins.
fn inherited_attributes(doc: &Document, page_id: ObjectId) -> Vec<(Vec<u8>, Object)> {
    let mut found = Vec::new();
    let Ok(page) = doc.get_dictionary(page_id) else {
        return found;
    };

    let mut missing: Vec<&[u8]> = INHERITABLE
        .iter()
        .copied()
        .filter(|key| !page.has(key))
        .collect();
    let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
    let mut depth = 0;

    while let Some(id) = parent {
        if missing.is_empty() || depth >= MAX_TREE_DEPTH {
            break;
        }
        let Ok(node) = doc.get_dictionary(id) else {
            break;
        };
        missing.retain(|key| match node.get(key) {
            Ok(value) => {
                found.push((key.to_vec(), value.clone()));
                false
            }
            Err(_) => true,
        });
        parent = node.get(b"Parent").and_then(Object::as_reference).ok();
        depth += 1;
    }

    found
}

/// Shift every indirect reference inside `obj` by `offset`.
fn remap_refs(obj: Object, offset: u32) -> Object {
    match obj {
        Object::Reference(id) => Object::Reference((id.0 + offset, id.1)),
        Object::Array(items) => {
            Object::Array(items.into_iter().map(|o| remap_refs(o, offset)).collect())
        }
        Object::Dictionary(mut dict) => {
            for (_, value) in dict.iter_mut() {
                *value = remap_refs(std::mem::replace(value, Object::Null), offset);
            }
            Object::Dictionary(dict)
        }
        Object::Stream(mut stream) => {
            for (_, value) in stream.dict.iter_mut() {
                *value = remap_refs(std::mem::replace(value, Object::Null), offset);
            }
            Object::Stream(stream)
        }
        other => other,
    }
}
