use std::collections::HashMap;
use std::path::{Path, PathBuf};

use axum::extract::Multipart;
use bytes::Bytes;
use tokio::fs;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};

/// 3 MiB per image
pub const MAX_IMAGE_SIZE: usize = 3 * 1024 * 1024;

const ALLOWED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// URL prefix under which the upload directory is served.
pub const PUBLIC_PREFIX: &str = "/uploads/";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadKind {
    Profile,
    Gallery,
    News,
    Market,
    Badges,
}

impl UploadKind {
    pub fn dir(&self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Gallery => "gallery",
            Self::News => "news",
            Self::Market => "market",
            Self::Badges => "badges",
        }
    }
}

/// One file part of a multipart form.
#[derive(Debug)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: String,
    pub data: Bytes,
}

/// A multipart form split into files and text fields.
#[derive(Debug, Default)]
pub struct Form {
    pub files: Vec<UploadedFile>,
    pub fields: HashMap<String, String>,
}

impl Form {
    pub async fn read(mut multipart: Multipart) -> ApiResult<Self> {
        let mut form = Form::default();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ApiError::bad_request(format!("Malformed multipart body: {}", e)))?
        {
            let name = field.name().unwrap_or_default().to_string();
            match field.file_name().map(str::to_string) {
                Some(file_name) => {
                    let data = field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("Failed to read upload: {}", e)))?;
                    form.files.push(UploadedFile {
                        field: name,
                        file_name,
                        data,
                    });
                }
                None => {
                    let text = field
                        .text()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("Failed to read field: {}", e)))?;
                    form.fields.insert(name, text);
                }
            }
        }
        Ok(form)
    }

    pub fn take_file(&mut self, field: &str) -> Option<UploadedFile> {
        let idx = self.files.iter().position(|f| f.field == field)?;
        Some(self.files.remove(idx))
    }

    pub fn text(&self, field: &str) -> Option<&str> {
        self.fields.get(field).map(String::as_str)
    }
}

/// Image storage on local disk at `{root}/{kind}/{uuid}.{ext}`.
#[derive(Debug, Clone)]
pub struct Uploads {
    root: PathBuf,
}

impl Uploads {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Validate an image and write it to disk. Returns its public URL.
    pub async fn save_image(&self, kind: UploadKind, file: &UploadedFile) -> ApiResult<String> {
        let ext = validate_image(file)?;
        self.write_image(kind, file, &ext).await
    }

    async fn write_image(&self, kind: UploadKind, file: &UploadedFile, ext: &str) -> ApiResult<String> {
        let dir = self.root.join(kind.dir());
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to create {}: {}", dir.display(), e))?;

        let name = format!("{}.{}", Uuid::new_v4(), ext);
        let path = dir.join(&name);
        fs::write(&path, &file.data)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to write {}: {}", path.display(), e))?;

        info!("Stored {} ({} bytes)", path.display(), file.data.len());
        Ok(format!("{}{}/{}", PUBLIC_PREFIX, kind.dir(), name))
    }

    /// Save every file of the form, all or nothing: nothing is written
    /// unless every file is valid, and a failed write removes the others.
    pub async fn save_images(&self, kind: UploadKind, files: &[UploadedFile]) -> ApiResult<Vec<String>> {
        if files.is_empty() {
            return Err(ApiError::bad_request("No file uploaded"));
        }
        let exts = files.iter().map(validate_image).collect::<ApiResult<Vec<_>>>()?;

        let mut urls = Vec::with_capacity(files.len());
        for (file, ext) in files.iter().zip(&exts) {
            match self.write_image(kind, file, ext).await {
                Ok(url) => urls.push(url),
                Err(e) => {
                    for url in &urls {
                        self.remove(url).await;
                    }
                    return Err(e);
                }
            }
        }
        Ok(urls)
    }

    /// Map a public URL back to a path inside the upload root.
    pub fn path_of(&self, url: &str) -> Option<PathBuf> {
        let relative = url.strip_prefix(PUBLIC_PREFIX)?;
        let mut parts = relative.split('/');
        let (Some(dir), Some(name), None) = (parts.next(), parts.next(), parts.next()) else {
            return None;
        };
        let safe = |s: &str| !s.is_empty() && s != "." && s != ".." && !s.contains('\\');
        (safe(dir) && safe(name)).then(|| self.root.join(dir).join(name))
    }

    /// Delete a previously stored file. Missing files are not an error.
    pub async fn remove(&self, url: &str) {
        let Some(path) = self.path_of(url) else {
            return;
        };
        match fs::remove_file(&path).await {
            Ok(()) => info!("Deleted {}", path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
        }
    }
}

/// Check type and size. Returns the lowercased extension.
fn validate_image(file: &UploadedFile) -> ApiResult<String> {
    let ext = image_extension(&file.file_name)?;
    if file.data.is_empty() {
        return Err(ApiError::bad_request("Uploaded file is empty"));
    }
    if file.data.len() > MAX_IMAGE_SIZE {
        return Err(ApiError::bad_request("Images must be at most 3 MiB"));
    }
    Ok(ext)
}

fn image_extension(file_name: &str) -> ApiResult<String> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    if ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(ext)
    } else {
        Err(ApiError::bad_request("Only jpg, jpeg and png images are allowed"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str, size: usize) -> UploadedFile {
        UploadedFile {
            field: "image".into(),
            file_name: name.into(),
            data: Bytes::from(vec![7u8; size]),
        }
    }

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("quartier-uploads-{}", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn images_are_stored_and_removed() {
        let root = temp_root();
        let uploads = Uploads::new(&root);

        let url = uploads.save_image(UploadKind::Gallery, &upload("Photo.PNG", 10)).await.unwrap();
        assert!(url.starts_with("/uploads/gallery/"));
        assert!(url.ends_with(".png"));

        let path = uploads.path_of(&url).unwrap();
        assert!(path.exists());
        uploads.remove(&url).await;
        assert!(!path.exists());

        let _ = std::fs::remove_dir_all(root);
    }

    #[tokio::test]
    async fn rejects_bad_images() {
        let uploads = Uploads::new(temp_root());
        assert!(uploads.save_image(UploadKind::News, &upload("doc.pdf", 10)).await.is_err());
        assert!(uploads.save_image(UploadKind::News, &upload("noext", 10)).await.is_err());
        assert!(uploads
            .save_image(UploadKind::News, &upload("big.jpg", MAX_IMAGE_SIZE + 1))
            .await
            .is_err());
        assert!(uploads.save_images(UploadKind::News, &[]).await.is_err());
    }

    #[tokio::test]
    async fn one_bad_image_stores_nothing() {
        let root = temp_root();
        let uploads = Uploads::new(&root);

        for bad in [upload("empty.png", 0), upload("huge.jpg", MAX_IMAGE_SIZE + 1), upload("x.gif", 10)] {
            let files = [upload("ok.png", 10), bad];
            assert!(uploads.save_images(UploadKind::Market, &files).await.is_err());
        }
        assert!(!root.join(UploadKind::Market.dir()).exists());

        let urls = uploads
            .save_images(UploadKind::Market, &[upload("a.png", 10), upload("b.jpg", 10)])
            .await
            .unwrap();
        assert_eq!(urls.len(), 2);

        let _ = std::fs::remove_dir_all(root);
    }

    #[test]
    fn urls_never_escape_the_root() {
        let uploads = Uploads::new("/srv/uploads");
        assert_eq!(
            uploads.path_of("/uploads/badges/a.png"),
            Some(PathBuf::from("/srv/uploads/badges/a.png"))
        );
        assert_eq!(uploads.path_of("/uploads/../etc/passwd"), None);
        assert_eq!(uploads.path_of("/uploads/badges/../../x"), None);
        assert_eq!(uploads.path_of("/elsewhere/a.png"), None);
    }
}
