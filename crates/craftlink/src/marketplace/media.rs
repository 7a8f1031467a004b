//! Object storage for job and profile images.

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use google_drive3::{api::File, api::Scope, DriveHub};
use mime::Mime;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("upload is empty")]
    Empty,
    #[error("unsupported content type '{0}', expected an image")]
    UnsupportedContentType(String),
    #[error("object storage failed: {0}")]
    Backend(String),
}

/// Upload surface consumed by the marketplace; returns a public URL for the stored object.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        folder: &str,
        content_type: Mime,
    ) -> Result<String, MediaError>;
}

pub(crate) fn ensure_image(bytes: &[u8], content_type: &Mime) -> Result<(), MediaError> {
    if bytes.is_empty() {
        return Err(MediaError::Empty);
    }
    if content_type.type_() != mime::IMAGE {
        return Err(MediaError::UnsupportedContentType(content_type.to_string()));
    }
    Ok(())
}

/// Google Drive backed storage. Objects are created under a single root folder, named
/// after their logical folder so they can be located from the Drive UI.
pub struct DriveObjectStorage<C>
where
    C: google_drive3::common::Connector + Send + Sync + 'static,
{
    hub: DriveHub<C>,
    root_folder_id: String,
}

impl<C> DriveObjectStorage<C>
where
    C: google_drive3::common::Connector + Send + Sync + 'static,
{
    pub fn new(hub: DriveHub<C>, root_folder_id: impl Into<String>) -> Self {
        Self {
            hub,
            root_folder_id: root_folder_id.into(),
        }
    }
}

impl<C> std::fmt::Debug for DriveObjectStorage<C>
where
    C: google_drive3::common::Connector + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriveObjectStorage")
            .field("root_folder_id", &self.root_folder_id)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<C> ObjectStorage for DriveObjectStorage<C>
where
    C: google_drive3::common::Connector + Send + Sync + 'static,
{
    async fn upload(
        &self,
        bytes: Vec<u8>,
        folder: &str,
        content_type: Mime,
    ) -> Result<String, MediaError> {
        let metadata = File {
            name: Some(format!("{}/{}", folder.trim_matches('/'), Uuid::new_v4())),
            mime_type: Some(content_type.to_string()),
            parents: Some(vec![self.root_folder_id.clone()]),
            ..File::default()
        };

        let (_, file) = self
            .hub
            .files()
            .create(metadata)
            .param("fields", "id,webViewLink")
            .supports_all_drives(true)
            .add_scope(Scope::File)
            .upload(Cursor::new(bytes), content_type)
            .await
            .map_err(|err| MediaError::Backend(err.to_string()))?;

        match (file.web_view_link, file.id) {
            (Some(link), _) => Ok(link),
            (None, Some(id)) => Ok(format!("https://drive.google.com/file/d/{id}/view")),
            (None, None) => Err(MediaError::Backend(
                "drive returned no file id".to_string(),
            )),
        }
    }
}

/// Stored object captured by [`MemoryObjectStorage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub url: String,
    pub folder: String,
    pub content_type: String,
    pub size: usize,
}

/// In-process storage used by the CLI demo and tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryObjectStorage {
    objects: Arc<Mutex<Vec<StoredObject>>>,
}

impl MemoryObjectStorage {
    pub fn objects(&self) -> Vec<StoredObject> {
        self.objects
            .lock()
            .map(|objects| objects.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn upload(
        &self,
        bytes: Vec<u8>,
        folder: &str,
        content_type: Mime,
    ) -> Result<String, MediaError> {
        let folder = folder.trim_matches('/').to_string();
        let url = format!("memory://{folder}/{}", Uuid::new_v4());
        let mut objects = self
            .objects
            .lock()
            .map_err(|_| MediaError::Backend("storage lock poisoned".to_string()))?;
        objects.push(StoredObject {
            url: url.clone(),
            folder,
            content_type: content_type.to_string(),
            size: bytes.len(),
        });
        Ok(url)
    }
}
