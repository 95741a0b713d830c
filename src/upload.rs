use std::{
    io,
    path::{Path, PathBuf},
};

use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Local};
use serde_json::json;
use tokio::{fs, io::AsyncWriteExt};
use unicode_normalization::UnicodeNormalization;

const ALLOWED_EXTENSIONS: [&str; 4] = ["png", "jpg", "jpeg", "gif"];
const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const MAX_NAME_ATTEMPTS: u32 = 100;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("No file uploaded.")]
    NoFileProvided,
    #[error("File type not allowed.")]
    DisallowedFileType,
    #[error("Failed to save uploaded file.")]
    Storage(#[source] io::Error),
    #[error("Malformed upload: {0}")]
    Multipart(#[from] MultipartError),
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        // validation failures still complete as a normal request
        let status = match self {
            Self::NoFileProvided | Self::DisallowedFileType => StatusCode::OK,
            Self::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Multipart(_) => StatusCode::BAD_REQUEST,
        };
        let body = json!({ "success": false, "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// File part of a `/predict` form as received.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredFile {
    pub file_name: String,
    pub path: PathBuf,
    pub url: String,
}

/// Writes accepted images below the static tree so they can be served back.
#[derive(Debug, Clone)]
pub struct UploadStore {
    root: PathBuf,
    url_prefix: String,
}

impl UploadStore {
    pub fn new(root: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            url_prefix: url_prefix.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> io::Result<()> {
        fs::create_dir_all(&self.root).await
    }

    pub async fn accept(&self, file: Option<UploadedFile>) -> Result<StoredFile, UploadError> {
        self.accept_at(Local::now(), file).await
    }

    pub async fn accept_at(
        &self,
        now: DateTime<Local>,
        file: Option<UploadedFile>,
    ) -> Result<StoredFile, UploadError> {
        let file = match file {
            Some(file) if !file.file_name.is_empty() => file,
            _ => return Err(UploadError::NoFileProvided),
        };
        if !allowed_file(&file.file_name) {
            return Err(UploadError::DisallowedFileType);
        }

        let timestamp = now.format(TIMESTAMP_FORMAT).to_string();
        let name = secure_filename(&file.file_name);

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let file_name = match attempt {
                0 => format!("{timestamp}_{name}"),
                n => format!("{timestamp}_{n}_{name}"),
            };
            let path = self.root.join(&file_name);

            match write_new(&path, &file.bytes).await {
                Ok(()) => {
                    let url = format!("{}/{}", self.url_prefix, file_name);
                    return Ok(StoredFile {
                        file_name,
                        path,
                        url,
                    });
                }
                Err(err) if err.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(err) => return Err(UploadError::Storage(err)),
            }
        }

        Err(UploadError::Storage(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("no free name for {name} at {timestamp}"),
        )))
    }
}

async fn write_new(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await
}

pub fn allowed_file(file_name: &str) -> bool {
    match file_name.rsplit_once('.') {
        Some((_, ext)) => ALLOWED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()),
        None => false,
    }
}

/// Reduces a client supplied name to a safe single path component.
pub fn secure_filename(file_name: &str) -> String {
    let spaced: String = file_name
        .nfkd()
        .filter(char::is_ascii)
        .map(|c| if c == '/' || c == '\\' { ' ' } else { c })
        .collect();

    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();

    match cleaned.trim_matches(|c| c == '.' || c == '_') {
        "" => "upload".to_string(),
        name => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn file(name: &str) -> Option<UploadedFile> {
        Some(UploadedFile {
            file_name: name.to_string(),
            bytes: b"\x89PNG fake".to_vec(),
        })
    }

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap()
    }

    fn stored_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn extension_check_ignores_case() {
        assert!(allowed_file("photo.JPG"));
        assert!(allowed_file("a.b.jpeg"));
        assert!(allowed_file("anim.Gif"));
        assert!(!allowed_file("malware.exe"));
        assert!(!allowed_file("png"));
        assert!(!allowed_file("photo.png.exe"));
        assert!(!allowed_file("photo."));
    }

    #[test]
    fn secure_filename_strips_traversal_and_unsafe_chars() {
        assert_eq!(secure_filename("photo.JPG"), "photo.JPG");
        assert_eq!(secure_filename("../../etc/passwd.png"), "etc_passwd.png");
        assert_eq!(secure_filename("my lunch (1).jpg"), "my_lunch_1.jpg");
        assert_eq!(secure_filename("..\\win\\pic.gif"), "win_pic.gif");
        assert_eq!(secure_filename("café.png"), "cafe.png");
        assert_eq!(secure_filename("ﬁsh ＆ chips.jpg"), "fish__chips.jpg");
        assert_eq!(secure_filename("..."), "upload");
    }

    #[tokio::test]
    async fn accepted_file_gets_timestamp_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path(), "/static/uploads/");

        let stored = store.accept_at(fixed_time(), file("photo.JPG")).await.unwrap();

        assert_eq!(stored.file_name, "20240309140507_photo.JPG");
        assert_eq!(stored.url, "/static/uploads/20240309140507_photo.JPG");
        assert_eq!(std::fs::read(&stored.path).unwrap(), b"\x89PNG fake");
    }

    #[tokio::test]
    async fn same_second_uploads_do_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path(), "/static/uploads");

        let first = store.accept_at(fixed_time(), file("a.png")).await.unwrap();
        let second = store.accept_at(fixed_time(), file("a.png")).await.unwrap();

        assert_eq!(first.file_name, "20240309140507_a.png");
        assert_eq!(second.file_name, "20240309140507_1_a.png");
        assert_eq!(stored_names(dir.path()).len(), 2);
    }

    #[tokio::test]
    async fn rejected_uploads_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path(), "/static/uploads");

        let err = store.accept(file("malware.exe")).await.unwrap_err();
        assert!(matches!(err, UploadError::DisallowedFileType));

        let err = store.accept(file("")).await.unwrap_err();
        assert!(matches!(err, UploadError::NoFileProvided));

        let err = store.accept(None).await.unwrap_err();
        assert!(matches!(err, UploadError::NoFileProvided));

        assert!(stored_names(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn unwritable_root_is_a_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = UploadStore::new(dir.path().join("missing"), "/static/uploads");

        let err = store.accept(file("a.png")).await.unwrap_err();
        assert!(matches!(err, UploadError::Storage(_)));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn validation_errors_answer_ok() {
        assert_eq!(UploadError::NoFileProvided.into_response().status(), StatusCode::OK);
        assert_eq!(UploadError::DisallowedFileType.into_response().status(), StatusCode::OK);
    }
}
