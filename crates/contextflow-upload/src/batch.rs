//! Upload batch: the set of files queued for one project.

use std::path::Path;

use contextflow_core::{DocCategory, FileType, UploadConfig, ValidationError};
use tracing::debug;
use uuid::Uuid;

use crate::category::detect_category;
use crate::entry::{FileEntry, FileState};
use crate::error::{PipelineError, Result};

/// Files queued for upload into one project.
#[derive(Debug, Clone)]
pub struct UploadBatch {
    project_id: String,
    entries: Vec<FileEntry>,
    max_file_bytes: u64,
    default_category: DocCategory,
}

impl UploadBatch {
    pub fn new(project_id: impl Into<String>, config: &UploadConfig) -> Self {
        Self {
            project_id: project_id.into(),
            entries: Vec::new(),
            max_file_bytes: config.max_file_bytes,
            default_category: config.default_category,
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Queue a file from disk. The name is the path's final component.
    pub async fn add_file(&mut self, path: &Path) -> Result<Uuid> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or(ValidationError::MissingField("filename"))?;
        // Check the type before touching the disk.
        FileType::from_file_name(&name)?;

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| PipelineError::Acquisition(format!("cannot stat {name}: {e}")))?;
        if !metadata.is_file() {
            return Err(PipelineError::Acquisition(format!("{name} is not a file")));
        }
        self.add_entry(name, path, metadata.len())
    }

    /// Queue a file whose name and size are already known.
    pub fn add_entry(&mut self, name: impl Into<String>, path: &Path, size: u64) -> Result<Uuid> {
        let name = name.into();
        let file_type = FileType::from_file_name(&name)?;
        if size > self.max_file_bytes {
            return Err(ValidationError::FileTooLarge {
                name,
                size,
                limit: self.max_file_bytes,
            }
            .into());
        }

        let category = detect_category(&name, self.default_category);
        let entry = FileEntry::new(name, path, size, file_type, category);
        let id = entry.id();
        debug!(file = %entry.name(), category = %category, size, "Queued file");
        self.entries.push(entry);
        Ok(id)
    }

    /// Drop an entry that is not in flight or already uploaded.
    pub fn remove(&mut self, id: Uuid) -> Result<FileEntry> {
        let index = self.index_of(id)?;
        let state = self.entries[index].state();
        if !state.is_eligible() {
            return Err(PipelineError::EntryBusy { id, state });
        }
        Ok(self.entries.remove(index))
    }

    /// Override the detected category. Not allowed once uploaded.
    pub fn set_category(&mut self, id: Uuid, category: DocCategory) -> Result<()> {
        let index = self.index_of(id)?;
        let entry = &mut self.entries[index];
        if entry.state() == FileState::Done {
            return Err(PipelineError::EntryBusy {
                id,
                state: entry.state(),
            });
        }
        entry.set_category(category);
        Ok(())
    }

    pub fn get(&self, id: Uuid) -> Option<&FileEntry> {
        self.entries.iter().find(|e| e.id() == id)
    }

    pub fn entries(&self) -> &[FileEntry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [FileEntry] {
        &mut self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries the next pass would drive.
    pub fn pending(&self) -> usize {
        self.count(FileState::Waiting) + self.count(FileState::Failed)
    }

    pub fn count(&self, state: FileState) -> usize {
        self.entries.iter().filter(|e| e.state() == state).count()
    }

    fn index_of(&self, id: Uuid) -> Result<usize> {
        self.entries
            .iter()
            .position(|e| e.id() == id)
            .ok_or(PipelineError::EntryNotFound(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contextflow_core::TEN_MIB;

    fn batch() -> UploadBatch {
        UploadBatch::new("p-1", &UploadConfig::default())
    }

    #[test]
    fn test_admission_checks_type_and_size() {
        let mut b = batch();
        let err = b.add_entry("diagram.png", Path::new("/x/diagram.png"), 10).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::UnsupportedFileType(_))
        ));

        let err = b
            .add_entry("huge.pdf", Path::new("/x/huge.pdf"), TEN_MIB + 1)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Validation(ValidationError::FileTooLarge { .. })
        ));

        b.add_entry("edge.pdf", Path::new("/x/edge.pdf"), TEN_MIB).unwrap();
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_category_detected_on_admission() {
        let mut b = batch();
        let id = b.add_entry("Payments-PRD.md", Path::new("/x/p.md"), 1).unwrap();
        assert_eq!(b.get(id).unwrap().category(), DocCategory::Prd);
    }

    #[test]
    fn test_set_category_and_remove() {
        let mut b = batch();
        let id = b.add_entry("notes.md", Path::new("/x/notes.md"), 1).unwrap();
        b.set_category(id, DocCategory::Brd).unwrap();
        assert_eq!(b.get(id).unwrap().category(), DocCategory::Brd);

        let removed = b.remove(id).unwrap();
        assert_eq!(removed.name(), "notes.md");
        assert!(b.is_empty());
        assert_eq!(b.remove(id).unwrap_err(), PipelineError::EntryNotFound(id));
    }

    #[test]
    fn test_busy_entries_cannot_be_removed() {
        let mut b = batch();
        let id = b.add_entry("notes.md", Path::new("/x/notes.md"), 1).unwrap();
        b.entries_mut()[0]
            .transition(FileState::AcquiringContent)
            .unwrap();

        let err = b.remove(id).unwrap_err();
        assert_eq!(
            err,
            PipelineError::EntryBusy {
                id,
                state: FileState::AcquiringContent
            }
        );
        assert_eq!(b.len(), 1);
    }

    #[tokio::test]
    async fn test_add_file_reads_size_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("team-conversation.txt");
        std::fs::write(&path, "hello there").unwrap();

        let mut b = batch();
        let id = b.add_file(&path).await.unwrap();
        let entry = b.get(id).unwrap();
        assert_eq!(entry.size(), 11);
        assert_eq!(entry.file_type(), FileType::Txt);
        assert_eq!(entry.category(), DocCategory::Chat);
    }
}
