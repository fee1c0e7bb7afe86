//! HTML directory index.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::FileServerError;
use crate::paths::{percent_encode, ServedRoot};

/// Route of the plain-text viewer that listing rows link to.
pub const VIEW_PLAIN_ROUTE: &str = "/_special/view_plain";

const STYLE: &str = "<style>\
table tr { white-space: nowrap; } \
td.size { text-align: right; padding-left: 1em; } \
td.name, td.modified { padding-left: 1em; padding-right: 1em; }\
</style>";

/// One immediate child of a listed directory.
#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    /// Display name; lossy when the on-disk name is not valid UTF-8
    pub name: String,
    /// Path relative to the served root, byte-exact so links address the
    /// real file
    pub relative_path: PathBuf,
    pub is_dir: bool,
    pub size: Option<u64>,
    pub modified: Option<SystemTime>,
}

/// Read the immediate children of `dir`.
///
/// Children whose metadata cannot be read are still listed, without size or
/// modification time. Symlinks are described by their target only when the
/// target stays inside the root; otherwise the link itself is described.
pub fn read_entries(
    root: &ServedRoot,
    dir: &Path,
    show_hidden: bool,
) -> Result<Vec<DirectoryEntry>, FileServerError> {
    let relative_dir = root.relative(dir);
    let mut entries = Vec::new();

    for entry in std::fs::read_dir(dir).map_err(|e| FileServerError::from_io(e, &relative_dir))? {
        let entry = entry.map_err(|e| FileServerError::from_io(e, &relative_dir))?;
        let name = entry.file_name().to_string_lossy().to_string();

        if !show_hidden && name.starts_with('.') {
            continue;
        }

        let entry_path = dir.join(entry.file_name());
        let is_symlink = entry.file_type().is_ok_and(|t| t.is_symlink());
        let metadata = if is_symlink {
            match entry_path.canonicalize() {
                Ok(target) if root.contains(&target) => {
                    std::fs::metadata(&target).or_else(|_| entry.metadata())
                }
                _ => entry.metadata(),
            }
        } else {
            entry.metadata()
        }
        .ok();

        entries.push(DirectoryEntry {
            relative_path: root.relative_path(&entry_path),
            name,
            is_dir: metadata.as_ref().is_some_and(|m| m.is_dir()),
            size: metadata.as_ref().map(|m| m.len()),
            modified: metadata.and_then(|m| m.modified().ok()),
        });
    }

    // Directories first, then by name
    entries.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.name.cmp(&b.name))
    });

    Ok(entries)
}

/// Render the index page for `dir` from already-read `entries`.
pub fn render(root: &ServedRoot, dir: &Path, entries: &[DirectoryEntry]) -> String {
    let relative_dir = root.relative(dir);
    let title = html_escape(&format!("/{}", relative_dir));

    let mut html = String::with_capacity(512 + entries.len() * 256);
    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"UTF-8\">\n");
    html.push_str(&format!("<title>Index of {}</title>{}\n</head>\n<body>\n", title, STYLE));
    html.push_str(&format!("<h1>Files in {}:</h1>\n", title));

    if !relative_dir.is_empty() {
        let relative = root.relative_path(dir);
        let parent = relative.parent().unwrap_or(Path::new(""));
        html.push_str(&format!(
            "<p><a href=\"{}\">Parent directory</a></p>\n",
            html_escape(&entry_href(parent, true))
        ));
    }

    html.push_str("<table>\n<thead><tr><th>Name</th><th>Last modified</th><th>Size</th></tr></thead>\n<tbody>\n");
    for entry in entries {
        html.push_str(&render_row(entry));
        html.push('\n');
    }
    html.push_str("</tbody>\n</table>\n</body>\n</html>\n");

    html
}

/// Read and render `dir` in one go.
pub fn render_directory(
    root: &ServedRoot,
    dir: &Path,
    show_hidden: bool,
) -> Result<String, FileServerError> {
    let entries = read_entries(root, dir, show_hidden)?;
    debug!("Listing {} entries in {}", entries.len(), dir.display());
    Ok(render(root, dir, &entries))
}

fn render_row(entry: &DirectoryEntry) -> String {
    let display_name = if entry.is_dir {
        format!("{}/", entry.name)
    } else {
        entry.name.clone()
    };

    let raw_link = if entry.is_dir {
        String::new()
    } else {
        format!(
            " (<a href=\"{}\">View Raw</a>)",
            html_escape(&view_plain_href(&entry.relative_path))
        )
    };

    format!(
        "<tr class=\"entry\"><td class=\"name\"><a href=\"{href}\">{name}</a>{raw}</td>\
<td class=\"modified\">{modified}</td><td class=\"size\"><code>{size}</code></td></tr>",
        href = html_escape(&entry_href(&entry.relative_path, entry.is_dir)),
        name = html_escape(&display_name),
        raw = raw_link,
        modified = format_timestamp(entry.modified),
        size = entry.size.map(human_size).unwrap_or_else(|| "-".to_string()),
    )
}

/// Absolute, percent-encoded link to a path below the root.
fn entry_href(relative_path: &Path, is_dir: bool) -> String {
    let encoded = percent_encode(relative_path);

    match (encoded.is_empty(), is_dir) {
        (true, _) => "/".to_string(),
        (false, true) => format!("/{}/", encoded),
        (false, false) => format!("/{}", encoded),
    }
}

pub fn view_plain_href(relative_path: &Path) -> String {
    format!(
        "{}?path={}",
        VIEW_PLAIN_ROUTE,
        urlencoding::encode_binary(relative_path.as_os_str().as_encoded_bytes())
    )
}

/// Escape text for use in HTML content and quoted attributes.
pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Size with binary prefixes, one decimal place above 1 KiB.
pub fn human_size(bytes: u64) -> String {
    const UNITS: [&str; 6] = ["KiB", "MiB", "GiB", "TiB", "PiB", "EiB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}", value, UNITS[unit])
}

pub fn format_timestamp(modified: Option<SystemTime>) -> String {
    match modified {
        Some(time) => DateTime::<Utc>::from(time)
            .format("%Y-%m-%d %H:%M:%S UTC")
            .to_string(),
        None => "-".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;

    fn root_with(files: &[(&str, usize)], dirs: &[&str]) -> (TempDir, ServedRoot) {
        let temp_dir = TempDir::new().unwrap();
        for dir in dirs {
            std::fs::create_dir_all(temp_dir.path().join(dir)).unwrap();
        }
        for (name, len) in files {
            std::fs::write(temp_dir.path().join(name), vec![b'x'; *len]).unwrap();
        }
        let root = ServedRoot::new(temp_dir.path()).unwrap();
        (temp_dir, root)
    }

    #[test]
    fn test_human_size() {
        assert_eq!(human_size(0), "0 B");
        assert_eq!(human_size(100), "100 B");
        assert_eq!(human_size(1023), "1023 B");
        assert_eq!(human_size(1024), "1.0 KiB");
        assert_eq!(human_size(1536), "1.5 KiB");
        assert_eq!(human_size(5 * 1024 * 1024), "5.0 MiB");
        assert_eq!(human_size(3 * 1024 * 1024 * 1024), "3.0 GiB");
        assert_eq!(human_size(u64::MAX), "16.0 EiB");
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(Some(UNIX_EPOCH)), "1970-01-01 00:00:00 UTC");
        assert_eq!(
            format_timestamp(Some(UNIX_EPOCH + Duration::from_secs(86_400 + 3_661))),
            "1970-01-02 01:01:01 UTC"
        );
        assert_eq!(format_timestamp(None), "-");
    }

    #[test]
    fn test_html_escape() {
        assert_eq!(html_escape("normal text"), "normal text");
        assert_eq!(html_escape("<script>"), "&lt;script&gt;");
        assert_eq!(html_escape("&amp;"), "&amp;amp;");
        assert_eq!(html_escape("a\"b'c"), "a&quot;b&#x27;c");
    }

    #[test]
    fn test_entry_href_encodes_segments() {
        assert_eq!(entry_href(Path::new(""), true), "/");
        assert_eq!(entry_href(Path::new("sub"), true), "/sub/");
        assert_eq!(entry_href(Path::new("sub/a b.txt"), false), "/sub/a%20b.txt");
        assert_eq!(entry_href(Path::new("100%.txt"), false), "/100%25.txt");
        assert_eq!(entry_href(Path::new("what?.txt"), false), "/what%3F.txt");
        assert_eq!(
            view_plain_href(Path::new("sub/a b.txt")),
            "/_special/view_plain?path=sub%2Fa%20b.txt"
        );
        assert_eq!(
            view_plain_href(Path::new("what?#.txt")),
            "/_special/view_plain?path=what%3F%23.txt"
        );
    }

    #[test]
    fn test_listing_file_and_directory() {
        let (_temp_dir, root) = root_with(&[("a.txt", 100)], &["sub"]);
        let html = render_directory(&root, root.path(), true).unwrap();

        assert_eq!(html.matches("<tr class=\"entry\">").count(), 2);
        assert!(html.contains("<a href=\"/a.txt\">a.txt</a>"));
        assert!(html.contains("/_special/view_plain?path=a.txt"));
        assert!(html.contains("<a href=\"/sub/\">sub/</a>"));
        assert!(!html.contains("view_plain?path=sub"));
        assert!(html.contains("100 B"));
        assert!(!html.contains("Parent directory"));
    }

    #[test]
    fn test_listing_escapes_names() {
        let (_temp_dir, root) = root_with(&[("<script>alert(1)<b>.txt", 1)], &[]);
        let html = render_directory(&root, root.path(), true).unwrap();

        assert!(html.contains("&lt;script&gt;alert(1)&lt;b&gt;.txt"));
        assert!(!html.contains("<script>"));
        assert!(!html.contains("<b>"));
    }

    #[test]
    fn test_listing_nested_directory_has_parent_link() {
        let (_temp_dir, root) = root_with(&[("sub/inner/c.txt", 3)], &["sub/inner"]);
        let dir = root.path().join("sub/inner");
        let html = render_directory(&root, &dir, true).unwrap();

        assert!(html.contains("Files in /sub/inner:"));
        assert!(html.contains("<a href=\"/sub/\">Parent directory</a>"));
        assert!(html.contains("<a href=\"/sub/inner/c.txt\">c.txt</a>"));
        assert!(html.contains("path=sub%2Finner%2Fc.txt"));
    }

    #[test]
    fn test_entries_sorted_directories_first() {
        let (_temp_dir, root) = root_with(&[("b.txt", 1), ("A.txt", 1)], &["zdir", "adir"]);
        let entries = read_entries(&root, root.path(), true).unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["adir", "zdir", "A.txt", "b.txt"]);
    }

    #[test]
    fn test_hidden_entries_filtered_on_request() {
        let (_temp_dir, root) = root_with(&[(".env", 1), ("visible.txt", 1)], &[]);

        let all = read_entries(&root, root.path(), true).unwrap();
        assert_eq!(all.len(), 2);

        let visible = read_entries(&root, root.path(), false).unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].name, "visible.txt");
    }

    #[cfg(unix)]
    #[test]
    fn test_broken_symlink_still_listed() {
        use std::os::unix::fs::symlink;

        let (_temp_dir, root) = root_with(&[], &[]);
        symlink(root.path().join("gone"), root.path().join("dangling")).unwrap();

        let entries = read_entries(&root, root.path(), true).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "dangling");
        assert!(!entries[0].is_dir);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_leaving_root_is_not_followed() {
        use std::os::unix::fs::symlink;

        let (_temp_dir, root) = root_with(&[("inside.txt", 7)], &[]);
        let outside = TempDir::new().unwrap();
        let target = outside.path().join("big.bin");
        std::fs::write(&target, vec![0u8; 5000]).unwrap();
        symlink(&target, root.path().join("outside-link")).unwrap();
        symlink(root.path().join("inside.txt"), root.path().join("inside-link")).unwrap();

        let entries = read_entries(&root, root.path(), true).unwrap();
        let outside_link = entries.iter().find(|e| e.name == "outside-link").unwrap();
        let link_size = std::fs::symlink_metadata(root.path().join("outside-link"))
            .unwrap()
            .len();
        assert_eq!(outside_link.size, Some(link_size));
        assert_ne!(outside_link.size, Some(5000));

        let inside_link = entries.iter().find(|e| e.name == "inside-link").unwrap();
        assert_eq!(inside_link.size, Some(7));

        let html = render(&root, root.path(), &entries);
        assert!(!html.contains("4.9 KiB"));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_name_links_are_byte_exact() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let (_temp_dir, root) = root_with(&[], &[]);
        let name = OsStr::from_bytes(b"bad\xff.txt");
        if std::fs::write(root.path().join(name), "x").is_err() {
            // Filesystem insists on UTF-8 names
            return;
        }

        let entries = read_entries(&root, root.path(), true).unwrap();
        assert_eq!(entries[0].name, "bad\u{FFFD}.txt");
        assert_eq!(entries[0].relative_path.as_os_str(), name);

        let html = render(&root, root.path(), &entries);
        assert!(html.contains("<a href=\"/bad%FF.txt\">"));
        assert!(html.contains("/_special/view_plain?path=bad%FF.txt"));
    }
}
