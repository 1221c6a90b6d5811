//! Document store.
//!
//! Routes every document to the public or the secret bucket according to its
//! `restricted` flag. Secret-bucket values are the [`TextCipher`] output of
//! the document JSON; public-bucket values are the JSON itself.
//!
//! Storage layout:
//! - `wiki/{id}.json`: public documents
//! - `secrets/{id}.json`: restricted documents (cipher text)
//! - `sys/document_seq`: last allocated document id
//! - `sys/tags.json`: tag registry
//!
//! # Bucket moves
//!
//! Flipping `restricted` moves the record with
//! [`StorageBackend::transfer`]. On backends where that is two steps, an
//! interruption leaves a copy in each bucket. Readers resolve such a pair by
//! taking the copy with the newer `updatedAt`; listings that exclude
//! restricted documents hide the pair entirely; [`DocumentStore::reconcile`]
//! deletes the stale copy when the store is opened.
//!
//! Mutations hold a store-wide mutex, so id allocation, tag edits, and moves
//! never interleave within one process. The store does not consult the
//! access gate; callers decide what a locked session may see.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use portal_storage::StorageBackend;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::crypto::TextCipher;
use crate::document::{
    Bucket, Document, DocumentPatch, NewDocument, NewTag, Tag, normalize_category,
    normalize_tag, normalize_title,
};
use crate::error::DocumentError;

/// Storage key of the id sequence.
const SEQUENCE_KEY: &str = "sys/document_seq";

/// Storage key of the tag registry.
const TAGS_KEY: &str = "sys/tags.json";

/// Result of [`DocumentStore::list`].
#[derive(Debug, Clone, Default)]
pub struct Listing {
    /// Readable documents, newest `updatedAt` first, then by id.
    pub documents: Vec<Document>,
    /// Ids with no readable copy: every record for them failed to decrypt
    /// or parse.
    pub unreadable: Vec<u64>,
}

/// Result of [`DocumentStore::reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Ids that had a copy in both buckets and were repaired.
    pub repaired: Vec<u64>,
    /// Ids still present in both buckets because one copy is unreadable.
    pub unresolved: Vec<u64>,
}

/// A document found by id, with where it was found.
struct Located {
    doc: Document,
    bucket: Bucket,
    /// A second copy exists in the other bucket.
    duplicated: bool,
}

/// CRUD over documents and tags.
pub struct DocumentStore {
    storage: Arc<dyn StorageBackend>,
    cipher: TextCipher,
    writes: Mutex<()>,
}

impl DocumentStore {
    /// Create a store over `storage`, encrypting restricted documents with
    /// `cipher`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, cipher: TextCipher) -> Self {
        Self {
            storage,
            cipher,
            writes: Mutex::new(()),
        }
    }

    /// Create a store and repair any interrupted bucket moves.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Storage`] if the buckets cannot be scanned.
    pub async fn open(
        storage: Arc<dyn StorageBackend>,
        cipher: TextCipher,
    ) -> Result<Self, DocumentError> {
        let store = Self::new(storage, cipher);
        let report = store.reconcile().await?;
        if !report.unresolved.is_empty() {
            error!(
                ids = ?report.unresolved,
                "documents present in both buckets could not be repaired"
            );
        }
        Ok(store)
    }

    /// List documents, optionally including restricted ones.
    ///
    /// A record that fails to decrypt or parse is reported in
    /// [`Listing::unreadable`] and does not hide the others.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Storage`] if a bucket cannot be read.
    pub async fn list(&self, include_restricted: bool) -> Result<Listing, DocumentError> {
        let secret_ids = self.bucket_ids(Bucket::Secret).await?;

        let mut found: BTreeMap<u64, Document> = BTreeMap::new();
        let mut unreadable = BTreeSet::new();

        for id in self.bucket_ids(Bucket::Public).await? {
            // Half-moved documents stay hidden until the secret copy is
            // known to be stale.
            if !include_restricted && secret_ids.contains(&id) {
                continue;
            }
            self.collect(Bucket::Public, id, &mut found, &mut unreadable)
                .await?;
        }
        if include_restricted {
            for &id in &secret_ids {
                self.collect(Bucket::Secret, id, &mut found, &mut unreadable)
                    .await?;
            }
        }

        let mut documents: Vec<Document> = found.into_values().collect();
        documents.sort_by_key(|d| (Reverse(d.updated_at), d.id));

        Ok(Listing {
            documents,
            unreadable: unreadable.into_iter().collect(),
        })
    }

    /// Fetch a document from whichever bucket holds it.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::NotFound`] if neither bucket has it.
    /// - [`DocumentError::Crypto`] / [`DocumentError::Corrupted`] if the record is unreadable.
    pub async fn get(&self, id: u64) -> Result<Document, DocumentError> {
        self.locate(id)
            .await?
            .map(|found| found.doc)
            .ok_or(DocumentError::NotFound { id })
    }

    /// Which bucket holds document `id`, without decrypting anything.
    ///
    /// When an interrupted move left two copies this reports
    /// [`Bucket::Secret`].
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Storage`] if the backend fails.
    pub async fn bucket_of(&self, id: u64) -> Result<Option<Bucket>, DocumentError> {
        if self.storage.exists(&Bucket::Secret.key(id)).await? {
            return Ok(Some(Bucket::Secret));
        }
        if self.storage.exists(&Bucket::Public.key(id)).await? {
            return Ok(Some(Bucket::Public));
        }
        Ok(None)
    }

    /// Create a document.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::Validation`] for an empty or oversized title or category.
    /// - [`DocumentError::TagNotFound`] for an unknown tag id.
    /// - [`DocumentError::Storage`] if the write fails.
    pub async fn create(&self, new: NewDocument) -> Result<Document, DocumentError> {
        let title = normalize_title(&new.title)?;
        let category = normalize_category(&new.category)?;

        let _guard = self.writes.lock().await;
        let tags = self.resolve_tags(&new.tags).await?;
        let id = self.allocate_id().await?;
        let now = Utc::now();

        let doc = Document {
            id,
            title,
            content: new.content,
            category,
            restricted: new.restricted,
            created_at: now,
            updated_at: now,
            tags,
        };

        let bytes = self.encode(&doc)?;
        self.storage.put(&doc.bucket().key(id), &bytes).await?;

        info!(id, restricted = doc.restricted, "document created");
        Ok(doc)
    }

    /// Apply a partial update, moving the document between buckets when
    /// `restricted` changes.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::Validation`] for an empty patch or invalid fields.
    /// - [`DocumentError::NotFound`] if the document does not exist.
    /// - [`DocumentError::TagNotFound`] for an unknown tag id.
    /// - [`DocumentError::Crypto`] if the current record cannot be decrypted.
    /// - [`DocumentError::Storage`] if a write fails.
    pub async fn update(&self, id: u64, patch: DocumentPatch) -> Result<Document, DocumentError> {
        if patch.is_empty() {
            return Err(DocumentError::Validation {
                reason: "update names no fields".to_owned(),
            });
        }
        let title = patch.title.as_deref().map(normalize_title).transpose()?;
        let category = patch
            .category
            .as_deref()
            .map(normalize_category)
            .transpose()?;

        let _guard = self.writes.lock().await;
        let Located {
            mut doc,
            bucket,
            duplicated,
        } = self
            .locate(id)
            .await?
            .ok_or(DocumentError::NotFound { id })?;

        if let Some(tag_ids) = &patch.tags {
            doc.tags = self.resolve_tags(tag_ids).await?;
        }
        if let Some(title) = title {
            doc.title = title;
        }
        if let Some(content) = patch.content {
            doc.content = content;
        }
        if let Some(category) = category {
            doc.category = category;
        }
        if let Some(restricted) = patch.restricted {
            doc.restricted = restricted;
        }
        doc.updated_at = advance(doc.updated_at);

        let target = doc.bucket();
        let bytes = self.encode(&doc)?;
        if target == bucket {
            self.storage.put(&target.key(id), &bytes).await?;
        } else {
            self.storage
                .transfer(&bucket.key(id), &target.key(id), &bytes)
                .await?;
            info!(id, from = ?bucket, to = ?target, "document moved between buckets");
        }
        if duplicated && target == bucket {
            self.storage.delete(&target.other().key(id)).await?;
        }

        debug!(id, "document updated");
        Ok(doc)
    }

    /// Delete a document from whichever bucket holds it.
    ///
    /// Returns the bucket it was removed from.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::NotFound`] if neither bucket has it.
    /// - [`DocumentError::Storage`] if the delete fails.
    pub async fn delete(&self, id: u64) -> Result<Bucket, DocumentError> {
        let _guard = self.writes.lock().await;

        let mut removed = None;
        for bucket in Bucket::ALL {
            let key = bucket.key(id);
            if self.storage.exists(&key).await? {
                self.storage.delete(&key).await?;
                removed = Some(bucket);
            }
        }

        let bucket = removed.ok_or(DocumentError::NotFound { id })?;
        info!(id, ?bucket, "document deleted");
        Ok(bucket)
    }

    /// Distinct categories, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Storage`] if a bucket cannot be read.
    pub async fn categories(&self, include_restricted: bool) -> Result<Vec<String>, DocumentError> {
        let listing = self.list(include_restricted).await?;
        let categories: BTreeSet<String> =
            listing.documents.into_iter().map(|d| d.category).collect();
        Ok(categories.into_iter().collect())
    }

    /// All tags, sorted by id.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Corrupted`] if the registry cannot be parsed.
    pub async fn list_tags(&self) -> Result<Vec<Tag>, DocumentError> {
        self.load_tags().await
    }

    /// Register a tag.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::Validation`] for a bad name or color.
    /// - [`DocumentError::TagConflict`] if the name is taken (case-insensitive).
    pub async fn create_tag(&self, new: NewTag) -> Result<Tag, DocumentError> {
        let (name, color) = normalize_tag(&new)?;

        let _guard = self.writes.lock().await;
        let mut tags = self.load_tags().await?;
        if tags.iter().any(|t| t.name.eq_ignore_ascii_case(&name)) {
            return Err(DocumentError::TagConflict { name });
        }

        let id = tags.iter().map(|t| t.id).max().unwrap_or(0).saturating_add(1);
        let tag = Tag { id, name, color };
        tags.push(tag.clone());
        self.save_tags(&tags).await?;

        info!(id, name = %tag.name, "tag created");
        Ok(tag)
    }

    /// Remove a tag from the registry and from every document carrying it.
    ///
    /// Only the copy a reader would see is rewritten; a stale duplicate left
    /// by an interrupted move is deleted. Documents that cannot be decrypted
    /// keep the stale tag; it is logged. With `include_restricted` unset,
    /// nothing is written if a restricted document carries the tag.
    ///
    /// # Errors
    ///
    /// - [`DocumentError::TagNotFound`] if no such tag exists.
    /// - [`DocumentError::Restricted`] if a restricted document carries the
    ///   tag and `include_restricted` is unset.
    /// - [`DocumentError::Storage`] if a write fails.
    pub async fn delete_tag(
        &self,
        tag_id: u64,
        include_restricted: bool,
    ) -> Result<(), DocumentError> {
        let _guard = self.writes.lock().await;
        let mut tags = self.load_tags().await?;
        let before = tags.len();
        tags.retain(|t| t.id != tag_id);
        if tags.len() == before {
            return Err(DocumentError::TagNotFound { id: tag_id });
        }

        let mut ids = self.bucket_ids(Bucket::Public).await?;
        ids.extend(self.bucket_ids(Bucket::Secret).await?);

        let mut tagged = Vec::new();
        for id in ids {
            let found = match self.locate(id).await {
                Ok(Some(found)) => found,
                Ok(None) => continue,
                Err(e @ (DocumentError::Crypto { .. } | DocumentError::Corrupted { .. })) => {
                    warn!(id, tag_id, error = %e, "cannot strip tag from unreadable document");
                    continue;
                }
                Err(e) => return Err(e),
            };
            if !found.doc.tags.iter().any(|t| t.id == tag_id) {
                continue;
            }
            if found.doc.restricted && !include_restricted {
                return Err(DocumentError::Restricted { id });
            }
            tagged.push(found);
        }

        let stripped = tagged.len();
        for Located {
            mut doc,
            bucket,
            duplicated,
        } in tagged
        {
            doc.tags.retain(|t| t.id != tag_id);
            doc.updated_at = advance(doc.updated_at);
            let bytes = self.encode(&doc)?;
            self.storage.put(&bucket.key(doc.id), &bytes).await?;
            if duplicated {
                self.storage.delete(&bucket.other().key(doc.id)).await?;
            }
        }

        self.save_tags(&tags).await?;
        info!(tag_id, documents = stripped, "tag deleted");
        Ok(())
    }

    /// Remove the stale copy of every document present in both buckets.
    ///
    /// The copy with the newer `updatedAt` is kept (the secret one on a tie).
    /// Pairs where either copy is unreadable are left alone and reported.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError::Storage`] if a bucket cannot be scanned or a
    /// stale copy cannot be deleted.
    pub async fn reconcile(&self) -> Result<ReconcileReport, DocumentError> {
        let _guard = self.writes.lock().await;

        let public = self.bucket_ids(Bucket::Public).await?;
        let secret = self.bucket_ids(Bucket::Secret).await?;

        let mut report = ReconcileReport::default();
        for &id in public.intersection(&secret) {
            let (public_doc, secret_doc) =
                match (self.read(Bucket::Public, id).await, self.read(Bucket::Secret, id).await) {
                    (Ok(Some(p)), Ok(Some(s))) => (p, s),
                    (Ok(_), Ok(_)) => continue,
                    (Err(e), _) | (_, Err(e)) => {
                        error!(id, error = %e, "document in both buckets has an unreadable copy");
                        report.unresolved.push(id);
                        continue;
                    }
                };

            let stale = if public_doc.updated_at > secret_doc.updated_at {
                Bucket::Secret
            } else {
                Bucket::Public
            };
            self.storage.delete(&stale.key(id)).await?;
            warn!(id, removed = ?stale, "repaired document left in both buckets");
            report.repaired.push(id);
        }

        Ok(report)
    }

    // ── Internals ─────────────────────────────────────────────────────

    /// Serialize a document for its bucket.
    fn encode(&self, doc: &Document) -> Result<Vec<u8>, DocumentError> {
        let json = serde_json::to_string_pretty(doc).map_err(|e| DocumentError::Corrupted {
            key: doc.bucket().key(doc.id),
            reason: format!("serialization failed: {e}"),
        })?;
        match doc.bucket() {
            Bucket::Public => Ok(json.into_bytes()),
            Bucket::Secret => {
                let sealed = self
                    .cipher
                    .encrypt(&json)
                    .map_err(|source| DocumentError::Crypto { id: doc.id, source })?;
                Ok(sealed.into_bytes())
            }
        }
    }

    /// Parse a stored value back into a document.
    fn decode(&self, bucket: Bucket, id: u64, bytes: Vec<u8>) -> Result<Document, DocumentError> {
        let key = bucket.key(id);
        let text = String::from_utf8(bytes).map_err(|e| DocumentError::Corrupted {
            key: key.clone(),
            reason: format!("not UTF-8: {e}"),
        })?;
        let json = match bucket {
            Bucket::Public => text,
            Bucket::Secret => self
                .cipher
                .decrypt(&text)
                .map_err(|source| DocumentError::Crypto { id, source })?,
        };

        let mut doc: Document =
            serde_json::from_str(&json).map_err(|e| DocumentError::Corrupted {
                key: key.clone(),
                reason: e.to_string(),
            })?;
        if doc.id != id {
            return Err(DocumentError::Corrupted {
                key,
                reason: format!("record carries id {}", doc.id),
            });
        }
        // The bucket is authoritative for the flag.
        doc.restricted = bucket == Bucket::Secret;
        Ok(doc)
    }

    async fn read(&self, bucket: Bucket, id: u64) -> Result<Option<Document>, DocumentError> {
        match self.storage.get(&bucket.key(id)).await? {
            Some(bytes) => self.decode(bucket, id, bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn locate(&self, id: u64) -> Result<Option<Located>, DocumentError> {
        let public = self.read(Bucket::Public, id).await?;
        let secret = self.read(Bucket::Secret, id).await?;

        Ok(match (public, secret) {
            (None, None) => None,
            (Some(doc), None) => Some(Located {
                doc,
                bucket: Bucket::Public,
                duplicated: false,
            }),
            (None, Some(doc)) => Some(Located {
                doc,
                bucket: Bucket::Secret,
                duplicated: false,
            }),
            (Some(p), Some(s)) => {
                let (doc, bucket) = if p.updated_at > s.updated_at {
                    (p, Bucket::Public)
                } else {
                    (s, Bucket::Secret)
                };
                Some(Located {
                    doc,
                    bucket,
                    duplicated: true,
                })
            }
        })
    }

    /// Read one record into `found`, keeping the newer copy of an id.
    ///
    /// An id with a readable copy is never reported in `unreadable`.
    async fn collect(
        &self,
        bucket: Bucket,
        id: u64,
        found: &mut BTreeMap<u64, Document>,
        unreadable: &mut BTreeSet<u64>,
    ) -> Result<(), DocumentError> {
        match self.read(bucket, id).await {
            Ok(Some(doc)) => {
                unreadable.remove(&id);
                let newer = found
                    .get(&id)
                    .is_none_or(|existing| doc.updated_at >= existing.updated_at);
                if newer {
                    found.insert(id, doc);
                }
                Ok(())
            }
            // Deleted between listing and reading.
            Ok(None) => Ok(()),
            Err(e @ (DocumentError::Crypto { .. } | DocumentError::Corrupted { .. })) => {
                warn!(id, ?bucket, error = %e, "skipping unreadable document");
                if !found.contains_key(&id) {
                    unreadable.insert(id);
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn bucket_ids(&self, bucket: Bucket) -> Result<BTreeSet<u64>, DocumentError> {
        let keys = self.storage.list(bucket.prefix()).await?;
        Ok(keys
            .iter()
            .filter_map(|key| {
                let id = bucket.parse_key(key);
                if id.is_none() {
                    debug!(key = %key, "ignoring foreign key in document bucket");
                }
                id
            })
            .collect())
    }

    /// Next id: above both the persisted sequence and every stored id.
    async fn allocate_id(&self) -> Result<u64, DocumentError> {
        let persisted = match self.storage.get(SEQUENCE_KEY).await? {
            Some(bytes) => String::from_utf8_lossy(&bytes).trim().parse::<u64>().map_err(|e| {
                DocumentError::Corrupted {
                    key: SEQUENCE_KEY.to_owned(),
                    reason: e.to_string(),
                }
            })?,
            None => 0,
        };

        let mut highest = persisted;
        for bucket in Bucket::ALL {
            if let Some(&max) = self.bucket_ids(bucket).await?.last() {
                highest = highest.max(max);
            }
        }

        let id = highest.saturating_add(1);
        self.storage
            .put(SEQUENCE_KEY, id.to_string().as_bytes())
            .await?;
        Ok(id)
    }

    async fn load_tags(&self) -> Result<Vec<Tag>, DocumentError> {
        match self.storage.get(TAGS_KEY).await? {
            Some(bytes) => {
                let mut tags: Vec<Tag> =
                    serde_json::from_slice(&bytes).map_err(|e| DocumentError::Corrupted {
                        key: TAGS_KEY.to_owned(),
                        reason: e.to_string(),
                    })?;
                tags.sort_by_key(|t| t.id);
                Ok(tags)
            }
            None => Ok(Vec::new()),
        }
    }

    async fn save_tags(&self, tags: &[Tag]) -> Result<(), DocumentError> {
        let json = serde_json::to_vec_pretty(tags).map_err(|e| DocumentError::Corrupted {
            key: TAGS_KEY.to_owned(),
            reason: format!("serialization failed: {e}"),
        })?;
        self.storage.put(TAGS_KEY, &json).await?;
        Ok(())
    }

    /// Resolve tag ids against the registry, deduplicated and sorted.
    async fn resolve_tags(&self, ids: &[u64]) -> Result<Vec<Tag>, DocumentError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let registry = self.load_tags().await?;
        let wanted: BTreeSet<u64> = ids.iter().copied().collect();
        wanted
            .into_iter()
            .map(|id| {
                registry
                    .iter()
                    .find(|t| t.id == id)
                    .cloned()
                    .ok_or(DocumentError::TagNotFound { id })
            })
            .collect()
    }
}

impl std::fmt::Debug for DocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentStore").finish_non_exhaustive()
    }
}

/// A timestamp strictly after `previous`, normally "now".
fn advance(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now > previous {
        now
    } else {
        previous + TimeDelta::microseconds(1)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use portal_storage::MemoryBackend;

    use super::*;
    use crate::crypto::{CipherPurpose, EncryptionKey};
    use crate::keyfile::KeyMaterial;

    fn cipher() -> TextCipher {
        KeyMaterial::generate()
            .cipher(CipherPurpose::Documents)
            .unwrap()
    }

    fn make_store() -> (MemoryBackend, DocumentStore) {
        let backend = MemoryBackend::new();
        let store = DocumentStore::new(Arc::new(backend.clone()), cipher());
        (backend, store)
    }

    fn new_doc(title: &str, content: &str, category: &str, restricted: bool) -> NewDocument {
        NewDocument {
            title: title.to_owned(),
            content: content.to_owned(),
            category: category.to_owned(),
            restricted,
            tags: Vec::new(),
        }
    }

    fn ids(listing: &Listing) -> Vec<u64> {
        let mut ids: Vec<u64> = listing.documents.iter().map(|d| d.id).collect();
        ids.sort_unstable();
        ids
    }

    // ── create / get ─────────────────────────────────────────────────

    #[tokio::test]
    async fn create_sets_fields_and_timestamps() {
        let (_backend, store) = make_store();
        let doc = store
            .create(new_doc(" Onboarding ", "# Hello", "HR", false))
            .await
            .unwrap();

        assert_eq!(doc.title, "Onboarding");
        assert_eq!(doc.category, "HR");
        assert!(!doc.restricted);
        assert_eq!(doc.created_at, doc.updated_at);
        assert_eq!(store.get(doc.id).await.unwrap(), doc);
    }

    #[tokio::test]
    async fn ids_are_unique_across_buckets_and_never_reused() {
        let (_backend, store) = make_store();
        let a = store.create(new_doc("A", "", "", false)).await.unwrap();
        let b = store.create(new_doc("B", "", "", true)).await.unwrap();
        store.delete(b.id).await.unwrap();
        let c = store.create(new_doc("C", "", "", false)).await.unwrap();

        assert!(a.id < b.id);
        assert!(b.id < c.id);
    }

    #[tokio::test]
    async fn empty_title_is_rejected_without_writing() {
        let (backend, store) = make_store();
        let err = store.create(new_doc("  ", "x", "IT", true)).await.unwrap_err();
        assert!(matches!(err, DocumentError::Validation { .. }));
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn public_document_is_plain_json() {
        let (backend, store) = make_store();
        let doc = store.create(new_doc("Doc", "x", "General", false)).await.unwrap();

        let raw = backend.get(&Bucket::Public.key(doc.id)).await.unwrap().unwrap();
        let parsed: Document = serde_json::from_slice(&raw).unwrap();
        assert_eq!(parsed, doc);
        assert!(!backend.exists(&Bucket::Secret.key(doc.id)).await.unwrap());
    }

    #[tokio::test]
    async fn restricted_document_is_encrypted_at_rest() {
        let (backend, store) = make_store();
        let doc = store
            .create(new_doc("Secret", "launch codes", "IT", true))
            .await
            .unwrap();
        assert!(doc.restricted);

        let raw = backend.get(&Bucket::Secret.key(doc.id)).await.unwrap().unwrap();
        let text = String::from_utf8(raw).unwrap();
        assert!(!text.contains("launch codes"));
        assert!(!text.contains("Secret"));
        assert!(!backend.exists(&Bucket::Public.key(doc.id)).await.unwrap());

        assert_eq!(store.get(doc.id).await.unwrap().content, "launch codes");
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let (_backend, store) = make_store();
        assert!(matches!(
            store.get(42).await,
            Err(DocumentError::NotFound { id: 42 })
        ));
    }

    // ── list ─────────────────────────────────────────────────────────

    #[tokio::test]
    async fn list_filters_restricted_unless_asked() {
        let (_backend, store) = make_store();
        let public = store.create(new_doc("Public", "", "", false)).await.unwrap();
        let secret = store.create(new_doc("Secret", "", "", true)).await.unwrap();

        let open = store.list(false).await.unwrap();
        assert_eq!(ids(&open), vec![public.id]);
        assert!(open.documents.iter().all(|d| !d.restricted));

        let all = store.list(true).await.unwrap();
        assert_eq!(ids(&all), vec![public.id, secret.id]);
        assert!(all.unreadable.is_empty());
    }

    #[tokio::test]
    async fn list_orders_newest_first() {
        let (_backend, store) = make_store();
        let first = store.create(new_doc("First", "", "", false)).await.unwrap();
        let second = store.create(new_doc("Second", "", "", false)).await.unwrap();
        store
            .update(
                first.id,
                DocumentPatch {
                    content: Some("edited".to_owned()),
                    ..DocumentPatch::default()
                },
            )
            .await
            .unwrap();

        let listing = store.list(false).await.unwrap();
        let order: Vec<u64> = listing.documents.iter().map(|d| d.id).collect();
        assert_eq!(order, vec![first.id, second.id]);
    }

    // ── update ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn update_changes_only_named_fields() {
        let (_backend, store) = make_store();
        let doc = store.create(new_doc("Old", "body", "IT", false)).await.unwrap();

        let updated = store
            .update(
                doc.id,
                DocumentPatch {
                    title: Some("X".to_owned()),
                    ..DocumentPatch::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.title, "X");
        assert_eq!(updated.content, "body");
        assert_eq!(updated.category, "IT");
        assert!(!updated.restricted);
        assert_eq!(updated.created_at, doc.created_at);
        assert!(updated.updated_at > doc.updated_at);
    }

    #[tokio::test]
    async fn update_moves_document_into_secret_bucket() {
        let (backend, store) = make_store();
        let doc = store.create(new_doc("Doc", "x", "General", false)).await.unwrap();

        let moved = store
            .update(
                doc.id,
                DocumentPatch {
                    restricted: Some(true),
                    ..DocumentPatch::default()
                },
            )
            .await
            .unwrap();
        assert!(moved.restricted);

        assert!(!backend.exists(&Bucket::Public.key(doc.id)).await.unwrap());
        assert!(backend.exists(&Bucket::Secret.key(doc.id)).await.unwrap());
        assert!(ids(&store.list(false).await.unwrap()).is_empty());
        assert_eq!(ids(&store.list(true).await.unwrap()), vec![doc.id]);
    }

    #[tokio::test]
    async fn update_moves_document_back_to_public_bucket() {
        let (backend, store) = make_store();
        let doc = store.create(new_doc("Doc", "x", "", true)).await.unwrap();

        store
            .update(
                doc.id,
                DocumentPatch {
                    restricted: Some(false),
                    content: Some("declassified".to_owned()),
                    ..DocumentPatch::default()
                },
            )
            .await
            .unwrap();

        assert!(!backend.exists(&Bucket::Secret.key(doc.id)).await.unwrap());
        let listed = store.list(false).await.unwrap();
        assert_eq!(listed.documents.len(), 1);
        assert_eq!(listed.documents[0].content, "declassified");
    }

    #[tokio::test]
    async fn empty_patch_is_rejected() {
        let (_backend, store) = make_store();
        let doc = store.create(new_doc("Doc", "", "", false)).await.unwrap();
        let err = store
            .update(doc.id, DocumentPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::Validation { .. }));
    }

    #[tokio::test]
    async fn update_unknown_id_is_not_found() {
        let (_backend, store) = make_store();
        let err = store
            .update(
                9,
                DocumentPatch {
                    title: Some("x".to_owned()),
                    ..DocumentPatch::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::NotFound { id: 9 }));
    }

    // ── delete ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn delete_removes_restricted_document_from_secret_bucket() {
        let (backend, store) = make_store();
        let doc = store.create(new_doc("Secret", "body", "IT", true)).await.unwrap();

        assert_eq!(store.delete(doc.id).await.unwrap(), Bucket::Secret);
        assert!(!backend.exists(&Bucket::Secret.key(doc.id)).await.unwrap());
        assert!(matches!(
            store.get(doc.id).await,
            Err(DocumentError::NotFound { .. })
        ));
        assert!(matches!(
            store.delete(doc.id).await,
            Err(DocumentError::NotFound { .. })
        ));
    }

    // ── failures ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn storage_failures_propagate() {
        let (backend, store) = make_store();
        backend.fail_writes(true);
        let err = store.create(new_doc("Doc", "", "", false)).await.unwrap_err();
        assert!(matches!(err, DocumentError::Storage(_)));
    }

    #[tokio::test]
    async fn lost_key_makes_restricted_documents_unreadable() {
        let backend = MemoryBackend::new();
        let old = DocumentStore::new(Arc::new(backend.clone()), cipher());
        let public = old.create(new_doc("Public", "", "", false)).await.unwrap();
        let secret = old.create(new_doc("Secret", "body", "", true)).await.unwrap();

        let regenerated = DocumentStore::new(
            Arc::new(backend.clone()),
            TextCipher::new(EncryptionKey::generate()),
        );

        assert!(matches!(
            regenerated.get(secret.id).await,
            Err(DocumentError::Crypto { .. })
        ));

        let listing = regenerated.list(true).await.unwrap();
        assert_eq!(ids(&listing), vec![public.id]);
        assert_eq!(listing.unreadable, vec![secret.id]);
    }

    // ── interrupted moves ────────────────────────────────────────────

    /// Put a copy of `doc` in both buckets, the secret one newer.
    async fn half_moved(backend: &MemoryBackend, store: &DocumentStore) -> Document {
        let doc = store.create(new_doc("Doc", "old", "", false)).await.unwrap();
        let mut newer = doc.clone();
        newer.restricted = true;
        newer.content = "new".to_owned();
        newer.updated_at = advance(doc.updated_at);
        backend
            .put(&Bucket::Secret.key(doc.id), &store.encode(&newer).unwrap())
            .await
            .unwrap();
        newer
    }

    #[tokio::test]
    async fn duplicate_copies_resolve_to_the_newer_one() {
        let (backend, store) = make_store();
        let newer = half_moved(&backend, &store).await;

        assert_eq!(store.get(newer.id).await.unwrap(), newer);
        assert!(ids(&store.list(false).await.unwrap()).is_empty());

        let all = store.list(true).await.unwrap();
        assert_eq!(all.documents.len(), 1);
        assert_eq!(all.documents[0].content, "new");
    }

    #[tokio::test]
    async fn reconcile_deletes_the_stale_copy() {
        let (backend, store) = make_store();
        let newer = half_moved(&backend, &store).await;

        let report = store.reconcile().await.unwrap();
        assert_eq!(report.repaired, vec![newer.id]);
        assert!(!backend.exists(&Bucket::Public.key(newer.id)).await.unwrap());
        assert!(backend.exists(&Bucket::Secret.key(newer.id)).await.unwrap());
    }

    #[tokio::test]
    async fn update_of_duplicated_document_cleans_up() {
        let (backend, store) = make_store();
        let newer = half_moved(&backend, &store).await;

        store
            .update(
                newer.id,
                DocumentPatch {
                    title: Some("Fixed".to_owned()),
                    ..DocumentPatch::default()
                },
            )
            .await
            .unwrap();
        assert!(!backend.exists(&Bucket::Public.key(newer.id)).await.unwrap());
        assert!(backend.exists(&Bucket::Secret.key(newer.id)).await.unwrap());
    }

    #[tokio::test]
    async fn deleting_a_tag_keeps_the_newer_duplicate() {
        let (backend, store) = make_store();
        let ops = store.create_tag(tag("Ops")).await.unwrap();

        let mut stale = new_doc("Doc", "old", "", true);
        stale.tags = vec![ops.id];
        let stale = store.create(stale).await.unwrap();
        let mut published = stale.clone();
        published.restricted = false;
        published.content = "new".to_owned();
        published.updated_at = advance(stale.updated_at);
        backend
            .put(
                &Bucket::Public.key(stale.id),
                &store.encode(&published).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(store.get(stale.id).await.unwrap().content, "new");

        store.delete_tag(ops.id, true).await.unwrap();

        let after = store.get(stale.id).await.unwrap();
        assert_eq!(after.content, "new");
        assert!(!after.restricted);
        assert!(after.tags.is_empty());
        assert!(!backend.exists(&Bucket::Secret.key(stale.id)).await.unwrap());
    }

    #[tokio::test]
    async fn list_does_not_report_a_readable_id_as_unreadable() {
        let (backend, store) = make_store();
        let doc = store.create(new_doc("Doc", "public", "", false)).await.unwrap();

        let foreign = DocumentStore::new(Arc::new(backend.clone()), cipher());
        let mut other = doc.clone();
        other.restricted = true;
        backend
            .put(
                &Bucket::Secret.key(doc.id),
                &foreign.encode(&other).unwrap(),
            )
            .await
            .unwrap();

        let listing = store.list(true).await.unwrap();
        assert_eq!(ids(&listing), vec![doc.id]);
        assert!(listing.unreadable.is_empty());
    }

    #[tokio::test]
    async fn reconcile_leaves_unreadable_pairs() {
        let backend = MemoryBackend::new();
        let store = DocumentStore::new(Arc::new(backend.clone()), cipher());
        half_moved(&backend, &store).await;

        let other = DocumentStore::new(Arc::new(backend.clone()), cipher());
        let report = other.reconcile().await.unwrap();
        assert!(report.repaired.is_empty());
        assert_eq!(report.unresolved.len(), 1);
        assert_eq!(backend.list("").await.unwrap().len(), 3);
    }

    // ── tags & categories ────────────────────────────────────────────

    fn tag(name: &str) -> NewTag {
        NewTag {
            name: name.to_owned(),
            color: "#336699".to_owned(),
        }
    }

    #[tokio::test]
    async fn tags_attach_and_reject_unknown_ids() {
        let (_backend, store) = make_store();
        let ops = store.create_tag(tag("Ops")).await.unwrap();
        let hr = store.create_tag(tag("HR")).await.unwrap();

        let mut new = new_doc("Runbook", "", "", false);
        new.tags = vec![hr.id, ops.id, ops.id];
        let doc = store.create(new).await.unwrap();
        assert_eq!(doc.tags, vec![ops.clone(), hr.clone()]);

        let mut bad = new_doc("Bad", "", "", false);
        bad.tags = vec![99];
        assert!(matches!(
            store.create(bad).await,
            Err(DocumentError::TagNotFound { id: 99 })
        ));
    }

    #[tokio::test]
    async fn tag_names_are_unique_ignoring_case() {
        let (_backend, store) = make_store();
        store.create_tag(tag("Ops")).await.unwrap();
        assert!(matches!(
            store.create_tag(tag("OPS")).await,
            Err(DocumentError::TagConflict { .. })
        ));
    }

    #[tokio::test]
    async fn deleting_a_tag_strips_it_everywhere() {
        let (_backend, store) = make_store();
        let ops = store.create_tag(tag("Ops")).await.unwrap();

        let mut public = new_doc("Public", "", "", false);
        public.tags = vec![ops.id];
        let public = store.create(public).await.unwrap();
        let mut secret = new_doc("Secret", "", "", true);
        secret.tags = vec![ops.id];
        let secret = store.create(secret).await.unwrap();

        store.delete_tag(ops.id, true).await.unwrap();

        assert!(store.list_tags().await.unwrap().is_empty());
        assert!(store.get(public.id).await.unwrap().tags.is_empty());
        assert!(store.get(secret.id).await.unwrap().tags.is_empty());
        assert!(matches!(
            store.delete_tag(ops.id, true).await,
            Err(DocumentError::TagNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn tag_on_restricted_document_needs_restricted_access() {
        let (_backend, store) = make_store();
        let ops = store.create_tag(tag("Ops")).await.unwrap();
        let mut public = new_doc("Public", "", "", false);
        public.tags = vec![ops.id];
        let public = store.create(public).await.unwrap();
        let mut secret = new_doc("Secret", "", "", true);
        secret.tags = vec![ops.id];
        let secret = store.create(secret).await.unwrap();

        assert!(matches!(
            store.delete_tag(ops.id, false).await,
            Err(DocumentError::Restricted { id }) if id == secret.id
        ));
        assert_eq!(store.list_tags().await.unwrap(), vec![ops.clone()]);
        assert_eq!(store.get(public.id).await.unwrap(), public);
        assert_eq!(store.get(secret.id).await.unwrap(), secret);

        let unused = store.create_tag(tag("HR")).await.unwrap();
        store.delete_tag(unused.id, false).await.unwrap();
        assert_eq!(store.list_tags().await.unwrap(), vec![ops]);
    }

    #[tokio::test]
    async fn categories_are_distinct_and_respect_visibility() {
        let (_backend, store) = make_store();
        store.create(new_doc("A", "", "IT", false)).await.unwrap();
        store.create(new_doc("B", "", "IT", false)).await.unwrap();
        store.create(new_doc("C", "", "", false)).await.unwrap();
        store.create(new_doc("D", "", "Legal", true)).await.unwrap();

        assert_eq!(store.categories(false).await.unwrap(), vec!["General", "IT"]);
        assert_eq!(
            store.categories(true).await.unwrap(),
            vec!["General", "IT", "Legal"]
        );
    }

    #[tokio::test]
    async fn open_repairs_on_startup() {
        let backend = MemoryBackend::new();
        let material = KeyMaterial::generate();
        let store = DocumentStore::new(
            Arc::new(backend.clone()),
            material.cipher(CipherPurpose::Documents).unwrap(),
        );
        let newer = half_moved(&backend, &store).await;

        let reopened = DocumentStore::open(
            Arc::new(backend.clone()),
            material.cipher(CipherPurpose::Documents).unwrap(),
        )
        .await
        .unwrap();
        assert_eq!(reopened.get(newer.id).await.unwrap().content, "new");
        assert!(!backend.exists(&Bucket::Public.key(newer.id)).await.unwrap());
    }
}
