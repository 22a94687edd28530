use std::sync::Arc;

use crate::db::{DbService, FileEntry, UploadRecord};
use crate::error::{AppError, Result};
use crate::storage::ObjectStore;

/// Binds a binary upload or delete to the object store and the record
/// store, as a two-phase sequence: talk to the backend first, then
/// read-modify-write the user's record. The record mutation runs under the
/// per-user lock so concurrent transfers for one user cannot lose each
/// other's append.
///
/// Repeating an upload with identical inputs produces two objects and two
/// entries, there is no idempotency key.
#[derive(Debug, Clone)]
pub struct FileTransferService {
    store: Arc<dyn ObjectStore>,
    db: DbService,
    directory: String,
}

impl FileTransferService {
    pub fn new<S>(store: Arc<dyn ObjectStore>, db: DbService, directory: S) -> Self
    where
        S: Into<String>,
    {
        FileTransferService {
            store,
            db,
            directory: directory.into(),
        }
    }

    /// Stores the payload, then appends the returned reference to the
    /// user's record. A user without a record gets one created. If the
    /// record write fails the just-stored object is deleted again so it
    /// doesn't end up orphaned. Object keys are `{directory}/{file_name}`
    /// with no per-user component, so that cleanup can remove an object a
    /// concurrent request just stored under the same name.
    pub async fn upload_file(
        &self,
        user_id: &str,
        category: &str,
        file_name: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String> {
        let url = self
            .store
            .upload(&self.directory, file_name, bytes, content_type)
            .await?;

        let entry = FileEntry {
            source: self.store.backend_tag().to_owned(),
            kind: category.to_owned(),
            url: url.clone(),
        };

        if let Err(err) = self.append_entry(user_id, entry).await {
            if let Err(cleanup_err) = self.store.delete(&self.directory, file_name).await {
                tracing::error!(
                    "could not clean up object {file_name} after failed record write \
                     for user {user_id}: {cleanup_err:?}"
                );
            }
            return Err(err);
        }

        Ok(url)
    }

    async fn append_entry(&self, user_id: &str, entry: FileEntry) -> Result<()> {
        let _guard = self.db.lock_user(user_id).await;

        match self.db.load_files(user_id).await {
            Ok(mut files) => {
                files.push(entry);
                self.db
                    .update(&UploadRecord {
                        user_id: user_id.to_owned(),
                        files,
                    })
                    .await?;
            }
            Err(AppError::RecordNotFound { .. }) => {
                self.db
                    .create(&UploadRecord {
                        user_id: user_id.to_owned(),
                        files: vec![entry],
                    })
                    .await?;
            }
            Err(err) => return Err(err),
        }
        Ok(())
    }

    /// Deletes the object named by the trailing path segment of `url` from
    /// the backend, then prunes matching entries from the user's record.
    /// The storage deletion strictly precedes the record mutation: a
    /// record write failing afterwards leaves a dangling reference, the
    /// deletion is not undone.
    pub async fn delete_file(&self, user_id: &str, url: &str) -> Result<bool> {
        let name = file_name_of(url);
        let deleted = self.store.delete(&self.directory, name).await?;

        let _guard = self.db.lock_user(user_id).await;
        let files = match self.db.load_files(user_id).await {
            Ok(files) => files,
            // object already gone from the backend, nothing left to prune
            Err(AppError::RecordNotFound { .. }) => return Ok(deleted),
            Err(err) => return Err(err),
        };

        let remaining: Vec<FileEntry> = files
            .into_iter()
            .filter(|f| file_name_of(&f.url) != name)
            .collect();

        self.db
            .update(&UploadRecord {
                user_id: user_id.to_owned(),
                files: remaining,
            })
            .await?;

        Ok(deleted)
    }
}

fn file_name_of(url: &str) -> &str {
    // rsplit yields at least one segment even when there is no '/'
    url.rsplit('/').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::testing::MemoryStore;

    fn entry(url: &str, kind: &str) -> FileEntry {
        FileEntry {
            source: "memory".to_owned(),
            kind: kind.to_owned(),
            url: url.to_owned(),
        }
    }

    async fn service() -> (Arc<MemoryStore>, DbService, FileTransferService) {
        let store = Arc::new(MemoryStore::default());
        let db = DbService::in_memory().await;
        let transfer = FileTransferService::new(store.clone(), db.clone(), "sub");
        (store, db, transfer)
    }

    #[tokio::test]
    async fn upload_appends_one_entry_with_the_backend_url() {
        let (store, db, transfer) = service().await;
        db.create(&UploadRecord {
            user_id: "u1".to_owned(),
            files: vec![entry("a.png", "image")],
        })
        .await
        .unwrap();

        let url = transfer
            .upload_file("u1", "image", "b.png", b"png bytes".to_vec(), "image/png")
            .await
            .unwrap();
        assert_eq!(url, "https://store/sub/b.png");
        assert!(store.contains("sub/b.png"));

        let files = db.load_files("u1").await.unwrap();
        assert_eq!(
            files,
            vec![
                entry("a.png", "image"),
                entry("https://store/sub/b.png", "image")
            ]
        );
    }

    #[tokio::test]
    async fn upload_without_record_creates_one() {
        let (_store, db, transfer) = service().await;

        let url = transfer
            .upload_file("fresh", "video", "clip.mp4", b"mp4".to_vec(), "video/mp4")
            .await
            .unwrap();

        assert_eq!(
            db.load_files("fresh").await.unwrap(),
            vec![entry(&url, "video")]
        );
    }

    #[tokio::test]
    async fn concurrent_uploads_for_one_user_keep_every_entry() {
        let (_store, db, transfer) = service().await;

        let mut handles = Vec::new();
        for i in 0..8 {
            let transfer = transfer.clone();
            handles.push(tokio::spawn(async move {
                transfer
                    .upload_file(
                        "u1",
                        "image",
                        &format!("f{i}.png"),
                        b"png".to_vec(),
                        "image/png",
                    )
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        // without the per-user lock the interleaved read-modify-writes
        // drop appends (last writer wins on the whole row)
        let files = db.load_files("u1").await.unwrap();
        assert_eq!(files.len(), 8);
        for i in 0..8 {
            let url = format!("https://store/sub/f{i}.png");
            assert!(files.iter().any(|f| f.url == url), "missing {url}");
        }
    }

    #[tokio::test]
    async fn delete_prunes_entries_matching_the_file_name() {
        let (store, db, transfer) = service().await;
        db.create(&UploadRecord {
            user_id: "u1".to_owned(),
            files: vec![entry("a.png", "image")],
        })
        .await
        .unwrap();
        transfer
            .upload_file("u1", "image", "b.png", b"png".to_vec(), "image/png")
            .await
            .unwrap();

        let deleted = transfer
            .delete_file("u1", "https://store/sub/b.png")
            .await
            .unwrap();
        assert!(deleted);
        assert!(!store.contains("sub/b.png"));
        assert_eq!(
            db.load_files("u1").await.unwrap(),
            vec![entry("a.png", "image")]
        );
    }

    #[tokio::test]
    async fn delete_of_an_absent_url_keeps_the_list() {
        let (_store, db, transfer) = service().await;
        let files = vec![entry("a.png", "image")];
        db.create(&UploadRecord {
            user_id: "u1".to_owned(),
            files: files.clone(),
        })
        .await
        .unwrap();

        let deleted = transfer
            .delete_file("u1", "https://elsewhere/c.png")
            .await
            .unwrap();
        assert!(!deleted);
        assert_eq!(db.load_files("u1").await.unwrap(), files);
    }

    #[tokio::test]
    async fn delete_with_missing_record_still_removes_the_object() {
        let (store, _db, transfer) = service().await;
        store
            .objects
            .lock()
            .insert("sub/ghost.png".to_owned(), b"png".to_vec());

        let deleted = transfer
            .delete_file("nobody", "https://store/sub/ghost.png")
            .await
            .unwrap();
        assert!(deleted);
        assert!(!store.contains("sub/ghost.png"));
    }

    #[tokio::test]
    async fn failed_backend_upload_propagates_and_writes_nothing() {
        let store = Arc::new(MemoryStore::failing());
        let db = DbService::in_memory().await;
        let transfer = FileTransferService::new(store.clone(), db.clone(), "sub");

        let res = transfer
            .upload_file("u1", "image", "a.png", b"png".to_vec(), "image/png")
            .await;
        assert!(matches!(res, Err(AppError::StorageBackendError { .. })));
        assert!(matches!(
            db.load_files("u1").await,
            Err(AppError::RecordNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn failed_record_write_deletes_the_stored_object() {
        let (store, db, transfer) = service().await;

        // longer than the 40 char limit enforced by the schema, so the
        // create path fails after the object was stored
        let user_id = "u".repeat(41);
        let res = transfer
            .upload_file(&user_id, "image", "a.png", b"png".to_vec(), "image/png")
            .await;

        assert!(matches!(res, Err(AppError::DBError { .. })));
        assert_eq!(store.len(), 0);
        assert!(matches!(
            db.load_files(&user_id).await,
            Err(AppError::RecordNotFound { .. })
        ));
    }
}
