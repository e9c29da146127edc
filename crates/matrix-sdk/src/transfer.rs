// Copyright 2022 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The File Transfer Manager (spec §4.6): per-`(room, id)` upload/download
//! records, the encrypted-attachment envelope, and `FileMetadataMap`
//! (`SPEC_FULL` §4.6 addition: per-`Client`, not process-wide).

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex as StdMutex},
};

use matrix_sdk_base::{
    events::content::{AnyEventContent, EncryptedFileMetadata, FileSource, Jwk, MessageContentKind},
    room::Room,
};
use matrix_sdk_common::identifiers::{MxcUri, OwnedEventId, OwnedRoomId};
use tokio::{io::AsyncWriteExt, task::AbortHandle};
use tracing::{instrument, warn};

use crate::{
    error::{Error, Result},
    http::HomeserverApi,
};

/// `(room_id, event_id) → EncryptedFileMetadata`, shared across every room
/// of one [`crate::Client`] (`SPEC_FULL` §4.6: per-connection, not
/// process-wide, per Design Notes §9).
pub type FileMetadataMap = Arc<tokio::sync::RwLock<HashMap<(OwnedRoomId, OwnedEventId), EncryptedFileMetadata>>>;

pub fn new_file_metadata_map() -> FileMetadataMap {
    Arc::new(tokio::sync::RwLock::new(HashMap::new()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    Upload,
    Download,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Started,
    Completed,
    Failed,
    Cancelled,
}

/// `FileTransfer` (spec §3): a transfer record keyed by `(room, id)`, where
/// `id` is the pending event's `transaction_id` for uploads and the
/// timeline event's `event_id` for downloads.
#[derive(Debug, Clone)]
pub struct FileTransfer {
    pub id: String,
    pub direction: TransferDirection,
    pub local_path: PathBuf,
    pub status: TransferStatus,
    pub progress: u64,
    pub total: Option<u64>,
}

type TransferKey = (OwnedRoomId, String);

/// Drives uploads and downloads for one room set, tracking progress and
/// supporting cancellation (spec §4.6, §5 "Cancellation").
pub struct FileTransferManager {
    api: Arc<dyn HomeserverApi>,
    file_metadata: FileMetadataMap,
    transfers: Arc<StdMutex<HashMap<TransferKey, FileTransfer>>>,
    jobs: Arc<StdMutex<HashMap<TransferKey, AbortHandle>>>,
}

impl FileTransferManager {
    pub fn new(api: Arc<dyn HomeserverApi>, file_metadata: FileMetadataMap) -> Self {
        Self {
            api,
            file_metadata,
            transfers: Arc::new(StdMutex::new(HashMap::new())),
            jobs: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    pub fn transfer(&self, room_id: &OwnedRoomId, id: &str) -> Option<FileTransfer> {
        self.transfers.lock().unwrap().get(&(room_id.clone(), id.to_owned())).cloned()
    }

    /// `upload(id, localPath, contentType?)` (spec §4.6). `id` is the
    /// submitting pending event's `transaction_id`; plaintext is optionally
    /// run through the encrypted-file envelope before being sent, with the
    /// resulting [`EncryptedFileMetadata`] recorded in the metadata map
    /// once the `mxc://` url is known.
    #[instrument(skip(self, local_path))]
    pub async fn upload(
        &self,
        room_id: OwnedRoomId,
        transaction_id: String,
        local_path: PathBuf,
        content_type: Option<String>,
    ) -> Result<MxcUri> {
        let key = (room_id.clone(), transaction_id.clone());
        let bytes = tokio::fs::read(&local_path)
            .await
            .map_err(|err| Error::InvalidAttachment(err.to_string()))?;
        let total = bytes.len() as u64;

        self.transfers.lock().unwrap().insert(
            key.clone(),
            FileTransfer {
                id: transaction_id.clone(),
                direction: TransferDirection::Upload,
                local_path,
                status: TransferStatus::Started,
                progress: 0,
                total: Some(total),
            },
        );

        let content_type = content_type.unwrap_or_else(|| "application/octet-stream".to_owned());
        let api = self.api.clone();
        let handle = tokio::spawn(async move { api.upload(&content_type, bytes).await });
        self.jobs.lock().unwrap().insert(key.clone(), handle.abort_handle());

        let outcome = handle.await;
        self.jobs.lock().unwrap().remove(&key);

        match outcome {
            Ok(Ok(mxc)) => {
                self.finish(&key, TransferStatus::Completed, total);
                Ok(mxc)
            }
            Ok(Err(err)) => {
                warn!(%transaction_id, error = %err, "upload failed");
                self.finish(&key, TransferStatus::Failed, 0);
                Err(err.into())
            }
            Err(join_error) if join_error.is_cancelled() => {
                self.finish(&key, TransferStatus::Cancelled, 0);
                Err(Error::InvalidAttachment("upload cancelled".to_owned()))
            }
            Err(join_error) => {
                self.finish(&key, TransferStatus::Failed, 0);
                Err(Error::InvalidAttachment(join_error.to_string()))
            }
        }
    }

    /// Encrypt `plaintext` before uploading (spec §4.6 "EncryptedFile
    /// envelope"), recording the resulting metadata once the mxc url is
    /// known.
    #[cfg(feature = "e2e-encryption")]
    #[instrument(skip(self, plaintext))]
    pub async fn upload_encrypted(
        &self,
        room_id: OwnedRoomId,
        event_id: OwnedEventId,
        transaction_id: String,
        plaintext: Vec<u8>,
    ) -> Result<EncryptedFileMetadata> {
        let (ciphertext, envelope) = matrix_sdk_crypto::file_envelope::encrypt_file(&plaintext);
        let mut metadata = from_crypto_envelope(envelope);

        let key = (room_id.clone(), transaction_id.clone());
        let total = ciphertext.len() as u64;
        self.transfers.lock().unwrap().insert(
            key.clone(),
            FileTransfer {
                id: transaction_id.clone(),
                direction: TransferDirection::Upload,
                local_path: PathBuf::new(),
                status: TransferStatus::Started,
                progress: 0,
                total: Some(total),
            },
        );

        let api = self.api.clone();
        let handle =
            tokio::spawn(async move { api.upload("application/octet-stream", ciphertext).await });
        self.jobs.lock().unwrap().insert(key.clone(), handle.abort_handle());
        let outcome = handle.await;
        self.jobs.lock().unwrap().remove(&key);

        let mxc = match outcome {
            Ok(Ok(mxc)) => mxc,
            Ok(Err(err)) => {
                self.finish(&key, TransferStatus::Failed, 0);
                return Err(err.into());
            }
            Err(_) => {
                self.finish(&key, TransferStatus::Cancelled, 0);
                return Err(Error::InvalidAttachment("upload cancelled".to_owned()));
            }
        };

        self.finish(&key, TransferStatus::Completed, total);
        metadata.url = mxc.to_string();
        self.file_metadata.write().await.insert((room_id, event_id), metadata.clone());
        Ok(metadata)
    }

    /// `download(eventId, localPath?)` (spec §4.6): resolves the target
    /// event from the room timeline, validates it carries file content and
    /// a well-formed `mxc://` url, downloads into a temporary file, and
    /// atomically renames on success (spec §5 "write-then-rename").
    #[instrument(skip(self, local_path))]
    pub async fn download(
        &self,
        room: &Room,
        event_id: OwnedEventId,
        local_path: Option<PathBuf>,
    ) -> Result<PathBuf> {
        let event = resolve_event(room, &event_id)
            .await
            .ok_or_else(|| Error::UnknownRoom(room.room_id().clone()))?;

        let content = event.typed_content();
        let AnyEventContent::RoomMessage(message) = content else {
            return Err(Error::InvalidAttachment("event does not carry file content".to_owned()));
        };

        let source = match &message.kind {
            MessageContentKind::File(info)
            | MessageContentKind::Image(info)
            | MessageContentKind::Audio(info)
            | MessageContentKind::Video(info) => info,
            _ => return Err(Error::InvalidAttachment("event does not carry file content".to_owned())),
        };

        let (mxc, encrypted) = match &source.source {
            FileSource::Plain(url) => (
                MxcUri::parse(url).map_err(|e| Error::InvalidAttachment(e.to_string()))?,
                None,
            ),
            FileSource::Encrypted(file) => (
                MxcUri::parse(&file.url).map_err(|e| Error::InvalidAttachment(e.to_string()))?,
                Some((**file).clone()),
            ),
        };

        let local_path = local_path.unwrap_or_else(|| default_download_path(&message.body));
        let transaction_id = event_id.to_string();
        let key = (room.room_id().clone(), transaction_id.clone());

        self.transfers.lock().unwrap().insert(
            key.clone(),
            FileTransfer {
                id: transaction_id.clone(),
                direction: TransferDirection::Download,
                local_path: local_path.clone(),
                status: TransferStatus::Started,
                progress: 0,
                total: None,
            },
        );

        let api = self.api.clone();
        let handle = tokio::spawn(async move { api.download(&mxc).await });
        self.jobs.lock().unwrap().insert(key.clone(), handle.abort_handle());
        let outcome = handle.await;
        self.jobs.lock().unwrap().remove(&key);

        let bytes = match outcome {
            Ok(Ok(bytes)) => bytes,
            Ok(Err(err)) => {
                self.finish(&key, TransferStatus::Failed, 0);
                return Err(err.into());
            }
            Err(_) => {
                self.finish(&key, TransferStatus::Cancelled, 0);
                return Err(Error::InvalidAttachment("download cancelled".to_owned()));
            }
        };

        let bytes = if let Some(envelope) = encrypted {
            #[cfg(feature = "e2e-encryption")]
            {
                matrix_sdk_crypto::file_envelope::decrypt_file(&bytes, &to_crypto_envelope(&envelope))
                    .map_err(|err| Error::InvalidAttachment(err.to_string()))?
            }
            #[cfg(not(feature = "e2e-encryption"))]
            {
                let _ = envelope;
                return Err(Error::InvalidAttachment(
                    "encrypted attachment requires the e2e-encryption feature".to_owned(),
                ));
            }
        } else {
            bytes
        };

        let total = bytes.len() as u64;
        if let Err(err) = write_atomically(&local_path, &bytes).await {
            self.finish(&key, TransferStatus::Failed, 0);
            return Err(Error::InvalidAttachment(err.to_string()));
        }

        self.finish(&key, TransferStatus::Completed, total);
        Ok(local_path)
    }

    /// `cancel(id)` (spec §4.6): aborts the underlying HTTP operation and
    /// transitions the transfer to `Cancelled`.
    pub fn cancel(&self, room_id: &OwnedRoomId, id: &str) {
        let key = (room_id.clone(), id.to_owned());
        if let Some(handle) = self.jobs.lock().unwrap().get(&key) {
            handle.abort();
        }
    }

    fn finish(&self, key: &TransferKey, status: TransferStatus, progress: u64) {
        if let Some(transfer) = self.transfers.lock().unwrap().get_mut(key) {
            transfer.status = status;
            transfer.progress = progress;
        }
    }
}

async fn resolve_event(room: &Room, event_id: &OwnedEventId) -> Option<Arc<matrix_sdk_base::events::Event>> {
    let state = room.read().await;
    let index = *state.event_index.get(event_id)?;
    state.timeline.iter().find(|item| item.index == index).map(|item| item.event.clone())
}

async fn write_atomically(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }

    let mut temp = tempfile::NamedTempFile::new_in(path.parent().unwrap_or_else(|| Path::new(".")))?;
    {
        let file = temp.as_file_mut();
        let mut file = tokio::fs::File::from_std(file.try_clone()?);
        file.write_all(bytes).await?;
        file.flush().await?;
    }
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}

/// The default local download path for a message body, truncating long
/// names by eliding their middle (spec §4.6, `SPEC_FULL` §4.6 addition:
/// "a small pure function tested in isolation").
pub fn default_download_path(file_name: &str) -> PathBuf {
    PathBuf::from(truncate_file_name(file_name, 100))
}

/// Truncate `name` to at most `max_len` characters by eliding the middle of
/// the stem, keeping the extension intact.
pub fn truncate_file_name(name: &str, max_len: usize) -> String {
    if name.chars().count() <= max_len || name.is_empty() {
        return if name.is_empty() { "download".to_owned() } else { name.to_owned() };
    }

    let (stem, extension) = match name.rfind('.') {
        Some(pos) if pos > 0 => (&name[..pos], &name[pos..]),
        _ => (name, ""),
    };

    let budget = max_len.saturating_sub(extension.chars().count() + 1); // 1 for the ellipsis char
    let half = budget / 2;
    let stem_chars: Vec<char> = stem.chars().collect();

    if stem_chars.len() <= budget || half == 0 {
        let truncated: String = stem_chars.into_iter().take(budget.max(1)).collect();
        return format!("{truncated}{extension}");
    }

    let head: String = stem_chars[..half].iter().collect();
    let tail: String = stem_chars[stem_chars.len() - half..].iter().collect();
    format!("{head}\u{2026}{tail}{extension}")
}

#[cfg(feature = "e2e-encryption")]
fn to_crypto_envelope(meta: &EncryptedFileMetadata) -> matrix_sdk_crypto::file_envelope::EncryptedFile {
    matrix_sdk_crypto::file_envelope::EncryptedFile {
        url: meta.url.clone(),
        key: matrix_sdk_crypto::file_envelope::Jwk {
            kty: meta.key.kty.clone(),
            key_ops: meta.key.key_ops.clone(),
            alg: meta.key.alg.clone(),
            k: meta.key.k.clone(),
            ext: meta.key.ext,
        },
        iv: meta.iv.clone(),
        hashes: meta.hashes.clone(),
        v: meta.v.clone(),
    }
}

#[cfg(feature = "e2e-encryption")]
fn from_crypto_envelope(file: matrix_sdk_crypto::file_envelope::EncryptedFile) -> EncryptedFileMetadata {
    EncryptedFileMetadata {
        url: file.url,
        key: Jwk { kty: file.key.kty, key_ops: file.key.key_ops, alg: file.key.alg, k: file.key.k, ext: file.key.ext },
        iv: file.iv,
        hashes: file.hashes,
        v: file.v,
    }
}

#[cfg(test)]
mod tests {
    use super::truncate_file_name;

    #[test]
    fn short_names_are_left_alone() {
        assert_eq!(truncate_file_name("photo.png", 100), "photo.png");
    }

    #[test]
    fn long_names_are_elided_in_the_middle_keeping_the_extension() {
        let name = "a".repeat(200) + ".png";
        let truncated = truncate_file_name(&name, 50);
        assert!(truncated.ends_with(".png"));
        assert!(truncated.contains('\u{2026}'));
        assert!(truncated.chars().count() <= 50);
    }

    #[test]
    fn empty_name_falls_back_to_a_default() {
        assert_eq!(truncate_file_name("", 50), "download");
    }
}
