//! Request path resolution.
//!
//! Every client-supplied path goes through [`resolve`] before the filesystem
//! is touched for it. Containment is decided on canonical (symlink-resolved)
//! paths, so a link inside the served root that points elsewhere cannot be
//! used to read outside of it.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use axum::http::Uri;
use tracing::{debug, warn};

use crate::error::FileServerError;

/// The directory exposed over HTTP, canonicalized once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServedRoot(PathBuf);

impl ServedRoot {
    pub fn new(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let canonical = path.as_ref().canonicalize()?;
        if !canonical.is_dir() {
            return Err(std::io::Error::new(
                ErrorKind::InvalidInput,
                format!("Root path is not a directory: {}", canonical.display()),
            ));
        }
        Ok(Self(canonical))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Path of `full` relative to the root, with `/` separators. Empty for the
    /// root itself.
    pub fn relative(&self, full: &Path) -> String {
        full.strip_prefix(&self.0)
            .map(|p| {
                p.components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default()
    }

    /// Owned path of `full` relative to the root, byte-exact.
    pub fn relative_path(&self, full: &Path) -> PathBuf {
        full.strip_prefix(&self.0)
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    pub fn contains(&self, canonical: &Path) -> bool {
        canonical.starts_with(&self.0)
    }
}

/// Outcome of resolving a request path that stayed inside the root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    Missing(PathBuf),
    Directory(PathBuf),
    File(PathBuf),
}

/// Percent-decode a URI path or query value into a filesystem path.
///
/// Decoding is byte-exact on unix so names that are not valid UTF-8 can
/// still be addressed.
pub fn percent_decode(encoded: &str) -> PathBuf {
    let bytes = urlencoding::decode_binary(encoded.as_bytes());

    #[cfg(unix)]
    {
        use std::os::unix::ffi::OsStrExt;
        PathBuf::from(std::ffi::OsStr::from_bytes(&bytes))
    }
    #[cfg(not(unix))]
    {
        PathBuf::from(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Percent-encode a relative path for use in a URL, one segment at a time.
pub fn percent_encode(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|component| match component {
            Component::Normal(name) => {
                Some(urlencoding::encode_binary(name.as_encoded_bytes()).into_owned())
            }
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// The request path named by `uri`, decoded.
///
/// Scheme, authority, query and fragment are split off by the URI parser
/// before anything is decoded, so a `%3F` inside a name stays part of the
/// name.
pub fn request_path(uri: &Uri) -> PathBuf {
    percent_decode(uri.path())
}

/// Find and decode the `name` parameter of a raw (still encoded) query
/// string. `+` is read as a space, as in form encoding.
pub fn query_path(query: &str, name: &str) -> Option<PathBuf> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let key = urlencoding::decode_binary(key.replace('+', " ").as_bytes()).into_owned();
        (key == name.as_bytes()).then(|| percent_decode(&value.replace('+', " ")))
    })
}

/// Turn a decoded request path into a clean relative path.
///
/// Leading slashes are stripped and `.`/`..` are collapsed lexically. A `..`
/// that would climb above the root is rejected.
pub fn normalize_request_path(request: &Path) -> Result<PathBuf, FileServerError> {
    if request.as_os_str().as_encoded_bytes().contains(&0) {
        warn!("Request path contains null byte: {:?}", request);
        return Err(FileServerError::PathTraversal);
    }

    let mut normalized = PathBuf::new();
    for component in request.components() {
        match component {
            Component::Normal(name) => normalized.push(name),
            Component::CurDir | Component::RootDir => continue,
            Component::ParentDir => {
                if !normalized.pop() {
                    warn!("Path traversal attempt detected: {:?}", request);
                    return Err(FileServerError::PathTraversal);
                }
            }
            Component::Prefix(_) => {
                warn!("Absolute path component in request path: {:?}", request);
                return Err(FileServerError::PathTraversal);
            }
        }
    }

    Ok(normalized)
}

/// Resolve `request` against `root` and classify what it points at, off the
/// async worker threads.
pub async fn resolve(root: &ServedRoot, request: PathBuf) -> Result<Resolved, FileServerError> {
    let root = root.clone();
    tokio::task::spawn_blocking(move || resolve_blocking(&root, &request))
        .await
        .map_err(|err| FileServerError::Io(std::io::Error::new(ErrorKind::Other, err)))?
}

/// Resolve `request` against `root` and classify what it points at.
///
/// Fails with [`FileServerError::PathTraversal`] when the canonical target
/// (or, for a missing target, its deepest existing ancestor) lies outside the
/// root.
pub fn resolve_blocking(root: &ServedRoot, request: &Path) -> Result<Resolved, FileServerError> {
    let relative = normalize_request_path(request)?;
    let joined = root.path().join(&relative);

    match joined.canonicalize() {
        Ok(canonical) => {
            ensure_contained(root, &joined, &canonical)?;
            let metadata = std::fs::metadata(&canonical)
                .map_err(|err| FileServerError::from_io(err, &relative.to_string_lossy()))?;
            debug!("Resolved {:?} to {}", request, canonical.display());
            if metadata.is_dir() {
                Ok(Resolved::Directory(canonical))
            } else {
                Ok(Resolved::File(canonical))
            }
        }
        Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::NotADirectory) => {
            let mut ancestor = joined.parent();
            while let Some(dir) = ancestor {
                if let Ok(canonical) = dir.canonicalize() {
                    ensure_contained(root, &joined, &canonical)?;
                    break;
                }
                ancestor = dir.parent();
            }
            Ok(Resolved::Missing(joined))
        }
        Err(err) => Err(FileServerError::from_io(err, &relative.to_string_lossy())),
    }
}

fn ensure_contained(
    root: &ServedRoot,
    requested: &Path,
    canonical: &Path,
) -> Result<(), FileServerError> {
    if root.contains(canonical) {
        return Ok(());
    }
    warn!(
        "Symlink escape attempt: {:?} resolved to {:?} which is outside {:?}",
        requested,
        canonical,
        root.path()
    );
    Err(FileServerError::PathTraversal)
}
