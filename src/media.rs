//! Photo and export directory helpers used by the frontend.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use base64::Engine as _;
use tracing::{error, info};

use crate::error::{BridgeError, BridgeResult};
use crate::settings::Settings;

/// `.jpg` files directly inside `dir`, sorted by path.
pub async fn list_photos(dir: &Path) -> BridgeResult<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut photos = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let path = entry.path();
        let is_jpg = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg"));
        if is_jpg {
            photos.push(path);
        }
    }
    photos.sort();
    Ok(photos)
}

/// The file as a `data:image/jpeg;base64,...` URL, or `None` if it cannot be read.
pub async fn read_file_as_data_url(path: &Path) -> Option<String> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Some(format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(bytes)
        )),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            error!(path = %path.display(), error = %e, "unexpected error reading file");
            None
        }
    }
}

/// Write `data` to `file_name` inside the stored export directory.
pub async fn write_export_file(settings: &Settings, file_name: &str, data: &[u8]) -> BridgeResult<PathBuf> {
    let dir = settings.directory_path();
    if dir.is_empty() {
        return Err(BridgeError::PathRejected("Directory path is not set".into()));
    }
    let path = contained_path(Path::new(&dir), file_name)
        .ok_or_else(|| BridgeError::PathRejected("Unauthorized file path".into()))?;
    tokio::fs::write(&path, data).await?;
    info!(path = %path.display(), bytes = data.len(), "export file written");
    Ok(path)
}

/// `dir/name` when `name` is relative and never climbs out of `dir`.
fn contained_path(dir: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name);
    let mut components = relative.components().peekable();
    components.peek()?;
    if components.all(|c| matches!(c, Component::Normal(_) | Component::CurDir)) {
        Some(dir.join(relative))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_list_photos_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.jpg", "a.JPG", "c.png", "notes.txt"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        std::fs::create_dir(dir.path().join("album.jpg")).unwrap();

        let photos = list_photos(dir.path()).await.unwrap();
        let names: Vec<_> = photos
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.JPG", "b.jpg"]);
    }

    #[tokio::test]
    async fn test_list_photos_missing_dir_is_error() {
        assert!(list_photos(Path::new("/nonexistent/photos")).await.is_err());
    }

    #[tokio::test]
    async fn test_data_url() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.jpg");
        std::fs::write(&path, [0xFF, 0xD8, 0xFF]).unwrap();
        assert_eq!(
            read_file_as_data_url(&path).await.unwrap(),
            "data:image/jpeg;base64,/9j/"
        );
        assert!(read_file_as_data_url(&dir.path().join("gone.jpg")).await.is_none());
    }

    #[tokio::test]
    async fn test_write_requires_directory() {
        let settings = Settings::in_memory();
        let err = write_export_file(&settings, "a.csv", b"x").await.unwrap_err();
        assert_eq!(err.to_string(), "Directory path is not set");
    }

    #[tokio::test]
    async fn test_write_rejects_escaping_names() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings::in_memory();
        settings.set_directory_path(dir.path()).unwrap();

        for name in ["../evil.csv", "/etc/passwd", "sub/../../x", ""] {
            let err = write_export_file(&settings, name, b"x").await.unwrap_err();
            assert_eq!(err.to_string(), "Unauthorized file path", "{name}");
        }

        let path = write_export_file(&settings, "report.csv", b"a,b\n").await.unwrap();
        assert_eq!(path, dir.path().join("report.csv"));
        assert_eq!(std::fs::read(path).unwrap(), b"a,b\n");
    }
}
