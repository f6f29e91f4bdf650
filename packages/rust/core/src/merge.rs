//! Merging extracted page metadata into a stored record.

use linkshelf_shared::{ExtractedMetadata, Record, UpdateRecord};

/// Build the update for `record` from freshly extracted metadata.
///
/// The title is replaced only by a non-empty extracted title. Extracted tags
/// are appended after the existing ones without deduplication. Every other
/// field is carried over unchanged.
pub fn merge(record: &Record, extracted: &ExtractedMetadata) -> UpdateRecord {
    let mut update = UpdateRecord::from(record);
    if !extracted.title.is_empty() {
        update.title = extracted.title.clone();
    }
    update.tags.extend(extracted.tags.iter().cloned());
    update
}

#[cfg(test)]
mod tests {
    use super::*;
    use linkshelf_shared::RecordId;

    fn record(title: &str, tags: &[&str]) -> Record {
        let now = chrono::Utc::now();
        Record {
            id: RecordId::new(),
            url: "https://example.com".into(),
            title: title.into(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            images: vec!["cover.png".into()],
            user_id: "u1".into(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn title_replaced_and_tags_appended() {
        let existing = record("old", &["x"]);
        let extracted = ExtractedMetadata {
            title: "New".into(),
            description: "ignored".into(),
            tags: vec!["a".into(), "b".into()],
        };

        let update = merge(&existing, &extracted);
        assert_eq!(update.id, existing.id);
        assert_eq!(update.title, "New");
        assert_eq!(update.tags, vec!["x", "a", "b"]);
        assert_eq!(update.url, existing.url);
        assert_eq!(update.images, existing.images);
        assert_eq!(update.user_id, existing.user_id);
    }

    #[test]
    fn empty_extraction_changes_nothing() {
        let existing = record("kept", &["x"]);
        let update = merge(&existing, &ExtractedMetadata::default());
        assert_eq!(update, UpdateRecord::from(&existing));
    }

    #[test]
    fn tags_are_not_deduplicated() {
        let existing = record("", &["a"]);
        let extracted = ExtractedMetadata {
            tags: vec!["a".into()],
            ..Default::default()
        };
        let once = merge(&existing, &extracted);
        assert_eq!(once.tags, vec!["a", "a"]);
        assert!(once.title.is_empty());
    }
}
