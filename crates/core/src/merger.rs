//! Duplex merge collaborator: two scan passes in, one interleaved document out.

use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("input not found: {0}")]
    MissingInput(PathBuf),
    #[error("output already exists: {0}")]
    OutputExists(PathBuf),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "pdf")]
    #[error("pdf error: {0}")]
    Pdf(#[from] lopdf::Error),
    #[error("pdf support not compiled in")]
    Unsupported,
    #[error("merge task failed: {0}")]
    Task(String),
}

#[derive(Debug, Clone)]
pub struct MergeRequest {
    pub first: PathBuf,
    pub second: PathBuf,
    pub output: PathBuf,
    pub delete_sources: bool,
    pub drop_blank_pages: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub pages_written: usize,
    pub blank_pages_dropped: usize,
}

/// Produces `request.output` from the two inputs. Implementations must leave
/// no partial output on failure.
pub trait DocumentMerger: Send + Sync {
    fn merge(&self, request: &MergeRequest) -> Result<MergeStats, MergeError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Front,
    Back,
}

pub fn interleave(front_pages: usize, back_pages: usize) -> Vec<(Side, usize)> {
    let mut order = Vec::with_capacity(front_pages + back_pages);
    for i in 0..front_pages.max(back_pages) {
        if i < front_pages {
            order.push((Side::Front, i));
        }
        if i < back_pages {
            order.push((Side::Back, back_pages - 1 - i));
        }
    }
    order
}

fn check_inputs(request: &MergeRequest) -> Result<(), MergeError> {
    for input in [&request.first, &request.second] {
        if !input.exists() {
            return Err(MergeError::MissingInput(input.clone()));
        }
    }
    if request.output.exists() {
        return Err(MergeError::OutputExists(request.output.clone()));
    }
    Ok(())
}

fn remove_sources(request: &MergeRequest) {
    for source in [&request.first, &request.second] {
        match fs::remove_file(source) {
            Ok(()) => info!("Deleted source file: {}", source.display()),
            Err(e) => warn!("Failed to delete {}: {}", source.display(), e),
        }
    }
}

fn output_dir(output: &Path) -> &Path {
    output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PdfMerger;

impl PdfMerger {
    pub fn new() -> Self {
        Self
    }
}

#[cfg(feature = "pdf")]
mod pdf {
    use super::*;
    use lopdf::content::Content;
    use lopdf::{Document, Object, ObjectId};

    const INHERITABLE: [&[u8]; 4] = [b"Resources", b"MediaBox", b"CropBox", b"Rotate"];

    // Text show, path paint, shading, XObject and inline image operators.
    const PAINTING_OPERATORS: [&str; 16] = [
        "Tj", "TJ", "'", "\"", "f", "F", "f*", "B", "B*", "b", "b*", "S", "s", "sh", "Do", "BI",
    ];

    pub(super) fn is_blank_page(doc: &Document, page_id: ObjectId) -> bool {
        let Ok(raw) = doc.get_page_content(page_id) else {
            return false;
        };
        match Content::decode(&raw) {
            Ok(content) => !content
                .operations
                .iter()
                .any(|op| PAINTING_OPERATORS.contains(&op.operator.as_str())),
            Err(_) => false,
        }
    }

    /// Copies attributes a page inherits from its `Pages` ancestors onto the
    /// page itself so it can be re-parented.
    fn flatten_inherited(doc: &mut Document, page_id: ObjectId) -> Result<(), lopdf::Error> {
        let mut inherited: Vec<(Vec<u8>, Object)> = Vec::new();
        {
            let page = doc.get_dictionary(page_id)?;
            let mut parent = page.get(b"Parent").and_then(Object::as_reference).ok();
            let mut depth = 0;
            while let Some(parent_id) = parent {
                let node = doc.get_dictionary(parent_id)?;
                for key in INHERITABLE {
                    if page.has(key) || inherited.iter().any(|(k, _)| k.as_slice() == key) {
                        continue;
                    }
                    if let Ok(value) = node.get(key) {
                        inherited.push((key.to_vec(), value.clone()));
                    }
                }
                parent = node.get(b"Parent").and_then(Object::as_reference).ok();
                depth += 1;
                if depth > 64 {
                    break;
                }
            }
        }
        let page = doc.get_object_mut(page_id)?.as_dict_mut()?;
        for (key, value) in inherited {
            page.set(key, value);
        }
        Ok(())
    }

    fn page_ids(doc: &mut Document) -> Result<Vec<ObjectId>, lopdf::Error> {
        let ids: Vec<ObjectId> = doc.get_pages().into_values().collect();
        for id in &ids {
            flatten_inherited(doc, *id)?;
        }
        Ok(ids)
    }

    pub(super) fn merge_documents(
        first: &Path,
        second: &Path,
        drop_blank_pages: bool,
    ) -> Result<(Document, MergeStats), MergeError> {
        let mut front = Document::load(first)?;
        let mut back = Document::load(second)?;
        back.renumber_objects_with(front.max_id + 1);

        let front_pages = page_ids(&mut front)?;
        let back_pages = page_ids(&mut back)?;

        let mut stats = MergeStats::default();
        let mut kids = Vec::new();
        for (side, index) in interleave(front_pages.len(), back_pages.len()) {
            let (doc, id) = match side {
                Side::Front => (&front, front_pages[index]),
                Side::Back => (&back, back_pages[index]),
            };
            if drop_blank_pages && is_blank_page(doc, id) {
                debug!("Skipping blank page {:?} at index {}", side, index);
                stats.blank_pages_dropped += 1;
                continue;
            }
            kids.push(id);
        }

        let root_id = front.trailer.get(b"Root")?.as_reference()?;
        let pages_id = front.get_dictionary(root_id)?.get(b"Pages")?.as_reference()?;

        front.max_id = front.max_id.max(back.max_id);
        front.objects.extend(std::mem::take(&mut back.objects));

        for id in &kids {
            front
                .get_object_mut(*id)?
                .as_dict_mut()?
                .set("Parent", pages_id);
        }
        let pages = front.get_object_mut(pages_id)?.as_dict_mut()?;
        pages.set("Count", kids.len() as i64);
        pages.set(
            "Kids",
            kids.iter()
                .map(|id| Object::Reference(*id))
                .collect::<Vec<_>>(),
        );
        stats.pages_written = kids.len();

        front.prune_objects();
        front.renumber_objects();
        front.compress();
        Ok((front, stats))
    }
}

#[cfg(feature = "pdf")]
impl DocumentMerger for PdfMerger {
    fn merge(&self, request: &MergeRequest) -> Result<MergeStats, MergeError> {
        check_inputs(request)?;
        info!(
            "Merging: {} + {}",
            request.first.display(),
            request.second.display()
        );
        let (mut doc, stats) =
            pdf::merge_documents(&request.first, &request.second, request.drop_blank_pages)?;

        let dir = output_dir(&request.output);
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        doc.save_to(tmp.as_file_mut())?;
        tmp.as_file().sync_all()?;
        tmp.persist_noclobber(&request.output).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::AlreadyExists {
                MergeError::OutputExists(request.output.clone())
            } else {
                MergeError::Io(e.error)
            }
        })?;
        info!(
            "Created merged document {} ({} pages, {} blank dropped)",
            request.output.display(),
            stats.pages_written,
            stats.blank_pages_dropped
        );

        if request.delete_sources {
            remove_sources(request);
        }
        Ok(stats)
    }
}

#[cfg(not(feature = "pdf"))]
impl DocumentMerger for PdfMerger {
    fn merge(&self, request: &MergeRequest) -> Result<MergeStats, MergeError> {
        check_inputs(request)?;
        Err(MergeError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interleave_reverses_back_side() {
        let order = interleave(3, 3);
        assert_eq!(
            order,
            vec![
                (Side::Front, 0),
                (Side::Back, 2),
                (Side::Front, 1),
                (Side::Back, 1),
                (Side::Front, 2),
                (Side::Back, 0),
            ]
        );
    }

    #[test]
    fn interleave_appends_leftovers() {
        let order = interleave(1, 3);
        assert_eq!(
            order,
            vec![(Side::Front, 0), (Side::Back, 2), (Side::Back, 1), (Side::Back, 0)]
        );
        assert!(interleave(0, 0).is_empty());
    }

    #[test]
    fn missing_input_is_rejected_before_work() {
        let temp = tempfile::tempdir().unwrap();
        let request = MergeRequest {
            first: temp.path().join("missing_1.pdf"),
            second: temp.path().join("missing_2.pdf"),
            output: temp.path().join("out.pdf"),
            delete_sources: true,
            drop_blank_pages: true,
        };
        let err = PdfMerger::new().merge(&request).unwrap_err();
        assert!(matches!(err, MergeError::MissingInput(_)));
        assert!(!request.output.exists());
    }
}
