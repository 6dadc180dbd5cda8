//! OCI layer extraction utilities.
//!
//! Applies a layer tarball (gzip or plain tar) onto a root directory,
//! honoring whiteout entries:
//!
//! - `.wh.<name>` deletes `<name>` from the directory holding the marker
//! - `.wh..wh..opq` empties the directory holding the marker of everything
//!   this layer did not write itself, wherever the marker sits in the archive
//!
//! Every path the layer created, modified or deleted is reported back.

use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use strata_core::error::{Result, StrataError};
use tar::Archive;

/// Prefix of a whiteout entry.
const WHITEOUT_PREFIX: &str = ".wh.";

/// Opaque directory marker.
const WHITEOUT_OPAQUE: &str = ".wh..wh..opq";

/// Extract a single layer onto `target_dir`.
///
/// Returns the absolute paths touched, in archive order. Deleted paths
/// are included.
pub fn extract_layer(layer_path: &Path, target_dir: &Path) -> Result<Vec<PathBuf>> {
    if !layer_path.exists() {
        return Err(StrataError::NotFound(format!(
            "Layer file not found: {}",
            layer_path.display()
        )));
    }

    std::fs::create_dir_all(target_dir)
        .map_err(|e| StrataError::io_at("creating target directory", target_dir, e))?;

    let mut file =
        File::open(layer_path).map_err(|e| StrataError::io_at("opening layer", layer_path, e))?;

    let touched = if is_gzip(&mut file)? {
        apply_tar(GzDecoder::new(BufReader::new(file)), target_dir)
    } else {
        apply_tar(BufReader::new(file), target_dir)
    }
    .map_err(|e| match e {
        StrataError::Io { context, source } => StrataError::Io {
            context: format!("extracting {}: {}", layer_path.display(), context),
            source,
        },
        other => other,
    })?;

    tracing::debug!(
        layer = %layer_path.display(),
        target = %target_dir.display(),
        entries = touched.len(),
        "Extracted OCI layer"
    );

    Ok(touched)
}

/// Peek at the gzip magic bytes and rewind.
fn is_gzip(file: &mut File) -> Result<bool> {
    let mut magic = [0u8; 2];
    let read = file.read(&mut magic)?;
    file.rewind()?;
    Ok(read == 2 && magic == [0x1f, 0x8b])
}

fn apply_tar<R: Read>(reader: R, target_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_preserve_ownerships(true);
    archive.set_overwrite(true);

    let mut touched = Vec::new();
    let mut written: HashSet<PathBuf> = HashSet::new();
    let entries = archive
        .entries()
        .map_err(|e| StrataError::io("reading layer entries", e))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| StrataError::io("reading layer entry", e))?;
        let rel = entry
            .path()
            .map_err(|e| StrataError::io("reading entry path", e))?
            .into_owned();
        let rel = sanitize(&rel)?;
        let file_name = rel
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parent = rel.parent().map(Path::to_path_buf).unwrap_or_default();

        if file_name == WHITEOUT_OPAQUE {
            let dir = target_dir.join(&parent);
            tracing::trace!(dir = %dir.display(), "Opaque whiteout");
            clear_directory(&dir, &written)?;
            if written.insert(dir.clone()) {
                touched.push(dir);
            }
            continue;
        }

        if let Some(name) = file_name.strip_prefix(WHITEOUT_PREFIX) {
            let victim = target_dir.join(&parent).join(name);
            tracing::trace!(path = %victim.display(), "Whiteout");
            remove_path(&victim)?;
            touched.push(victim);
            continue;
        }

        let dest = target_dir.join(&rel);
        if let Ok(meta) = std::fs::symlink_metadata(&dest) {
            // A non-directory entry replaces whatever is there
            if meta.is_dir() && !entry.header().entry_type().is_dir() {
                remove_path(&dest)?;
            }
        }
        entry
            .unpack_in(target_dir)
            .map_err(|e| StrataError::io_at("unpacking", &dest, e))?;
        written.insert(dest.clone());
        touched.push(dest);
    }

    Ok(touched)
}

/// Reject entries that would escape the target directory.
fn sanitize(path: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => {
                return Err(StrataError::CacheIntegrity(format!(
                    "layer entry escapes root: {}",
                    path.display()
                )))
            }
        }
    }
    Ok(out)
}

fn remove_path(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StrataError::io_at("stat", path, e)),
    }
    .map_err(|e| StrataError::io_at("removing", path, e))
}

/// Remove everything under `dir` except the paths in `keep`. Kept
/// directories are cleared the same way.
fn clear_directory(dir: &Path, keep: &HashSet<PathBuf>) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(StrataError::io_at("reading directory", dir, e)),
    };
    for entry in entries {
        let entry = entry.map_err(|e| StrataError::io_at("reading directory", dir, e))?;
        let path = entry.path();
        if !keep.contains(&path) {
            remove_path(&path)?;
            continue;
        }
        let file_type = entry
            .file_type()
            .map_err(|e| StrataError::io_at("stat", &path, e))?;
        if file_type.is_dir() {
            clear_directory(&path, keep)?;
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::MetadataExt;
    use tempfile::TempDir;

    /// Entry kinds for test layers.
    pub(crate) enum TestEntry<'a> {
        File(&'a str, &'a [u8]),
        Dir(&'a str),
        Symlink(&'a str, &'a str),
    }

    /// Build a test layer owned by the caller's uid/gid so ownership
    /// preservation works without root.
    pub(crate) fn create_test_layer(path: &Path, entries: &[TestEntry<'_>], gzip: bool) {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use tar::Builder;

        let owner = fs::metadata(path.parent().unwrap()).unwrap();
        let mut data = Vec::new();
        {
            let mut builder = Builder::new(&mut data);
            for entry in entries {
                let mut header = tar::Header::new_gnu();
                header.set_uid(owner.uid() as u64);
                header.set_gid(owner.gid() as u64);
                header.set_mtime(1_700_000_000);
                match entry {
                    TestEntry::File(name, content) => {
                        header.set_entry_type(tar::EntryType::Regular);
                        header.set_size(content.len() as u64);
                        header.set_mode(0o644);
                        header.set_cksum();
                        builder.append_data(&mut header, name, *content).unwrap();
                    }
                    TestEntry::Dir(name) => {
                        header.set_entry_type(tar::EntryType::Directory);
                        header.set_size(0);
                        header.set_mode(0o755);
                        header.set_cksum();
                        builder.append_data(&mut header, name, std::io::empty()).unwrap();
                    }
                    TestEntry::Symlink(name, target) => {
                        header.set_entry_type(tar::EntryType::Symlink);
                        header.set_size(0);
                        header.set_mode(0o777);
                        builder.append_link(&mut header, name, target).unwrap();
                    }
                }
            }
            builder.finish().unwrap();
        }

        if gzip {
            use std::io::Write;
            let mut encoder = GzEncoder::new(fs::File::create(path).unwrap(), Compression::default());
            encoder.write_all(&data).unwrap();
            encoder.finish().unwrap();
        } else {
            fs::write(path, data).unwrap();
        }
    }

    #[test]
    fn test_extract_layer_extracts_files() {
        let temp_dir = TempDir::new().unwrap();
        let layer_path = temp_dir.path().join("layer.tar.gz");
        let target_dir = temp_dir.path().join("extracted");

        create_test_layer(
            &layer_path,
            &[
                TestEntry::Dir("dir/"),
                TestEntry::File("dir/file2.txt", b"content2"),
                TestEntry::File("file1.txt", b"content1"),
            ],
            true,
        );

        let touched = extract_layer(&layer_path, &target_dir).unwrap();

        assert_eq!(
            touched,
            vec![
                target_dir.join("dir"),
                target_dir.join("dir/file2.txt"),
                target_dir.join("file1.txt"),
            ]
        );
        assert_eq!(
            fs::read_to_string(target_dir.join("dir/file2.txt")).unwrap(),
            "content2"
        );
        assert_eq!(
            fs::read_to_string(target_dir.join("file1.txt")).unwrap(),
            "content1"
        );
    }

    #[test]
    fn test_extract_uncompressed_layer() {
        let temp_dir = TempDir::new().unwrap();
        let layer_path = temp_dir.path().join("layer.tar");
        let target_dir = temp_dir.path().join("extracted");

        create_test_layer(
            &layer_path,
            &[
                TestEntry::File("a.txt", b"a"),
                TestEntry::Symlink("link", "a.txt"),
            ],
            false,
        );

        extract_layer(&layer_path, &target_dir).unwrap();
        assert_eq!(
            fs::read_link(target_dir.join("link")).unwrap(),
            PathBuf::from("a.txt")
        );
    }

    #[test]
    fn test_extract_layer_nonexistent_file() {
        let temp_dir = TempDir::new().unwrap();
        let result = extract_layer(
            &temp_dir.path().join("nonexistent.tar.gz"),
            &temp_dir.path().join("extracted"),
        );

        let err = result.unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("Layer file not found"));
    }

    #[test]
    fn test_whiteout_removes_and_reports_path() {
        let temp_dir = TempDir::new().unwrap();
        let target_dir = temp_dir.path().join("root");
        fs::create_dir_all(target_dir.join("etc/old.d")).unwrap();
        fs::write(target_dir.join("etc/stale.conf"), "x").unwrap();
        fs::write(target_dir.join("etc/old.d/a"), "x").unwrap();

        let layer_path = temp_dir.path().join("layer.tar.gz");
        create_test_layer(
            &layer_path,
            &[
                TestEntry::File("etc/.wh.stale.conf", b""),
                TestEntry::File("etc/.wh.old.d", b""),
                TestEntry::File("etc/new.conf", b"new"),
            ],
            true,
        );

        let touched = extract_layer(&layer_path, &target_dir).unwrap();

        assert_eq!(
            touched,
            vec![
                target_dir.join("etc/stale.conf"),
                target_dir.join("etc/old.d"),
                target_dir.join("etc/new.conf"),
            ]
        );
        assert!(!target_dir.join("etc/stale.conf").exists());
        assert!(!target_dir.join("etc/old.d").exists());
        assert!(!target_dir.join("etc/.wh.stale.conf").exists());
        assert!(target_dir.join("etc/new.conf").exists());
    }

    #[test]
    fn test_opaque_whiteout_clears_directory() {
        let temp_dir = TempDir::new().unwrap();
        let target_dir = temp_dir.path().join("root");
        fs::create_dir_all(target_dir.join("app/sub")).unwrap();
        fs::write(target_dir.join("app/old.txt"), "x").unwrap();

        let layer_path = temp_dir.path().join("layer.tar.gz");
        create_test_layer(
            &layer_path,
            &[
                TestEntry::File("app/.wh..wh..opq", b""),
                TestEntry::File("app/fresh.txt", b"fresh"),
            ],
            true,
        );

        extract_layer(&layer_path, &target_dir).unwrap();

        assert!(target_dir.join("app").is_dir());
        assert!(!target_dir.join("app/old.txt").exists());
        assert!(!target_dir.join("app/sub").exists());
        assert!(target_dir.join("app/fresh.txt").exists());
    }

    #[test]
    fn test_opaque_whiteout_keeps_own_entries() {
        let temp_dir = TempDir::new().unwrap();
        let target_dir = temp_dir.path().join("root");
        fs::create_dir_all(target_dir.join("app/lib")).unwrap();
        fs::write(target_dir.join("app/old.txt"), "x").unwrap();
        fs::write(target_dir.join("app/lib/stale.so"), "x").unwrap();

        let layer_path = temp_dir.path().join("layer.tar.gz");
        create_test_layer(
            &layer_path,
            &[
                TestEntry::Dir("app/"),
                TestEntry::File("app/new", b"new"),
                TestEntry::Dir("app/lib/"),
                TestEntry::File("app/lib/fresh.so", b"so"),
                TestEntry::File("app/.wh..wh..opq", b""),
            ],
            true,
        );

        let touched = extract_layer(&layer_path, &target_dir).unwrap();

        assert_eq!(
            touched,
            vec![
                target_dir.join("app"),
                target_dir.join("app/new"),
                target_dir.join("app/lib"),
                target_dir.join("app/lib/fresh.so"),
            ]
        );
        for path in &touched {
            assert!(path.exists(), "{} was removed", path.display());
        }
        assert_eq!(fs::read_to_string(target_dir.join("app/new")).unwrap(), "new");
        assert!(!target_dir.join("app/old.txt").exists());
        assert!(!target_dir.join("app/lib/stale.so").exists());
    }

    #[test]
    fn test_file_replaces_directory() {
        let temp_dir = TempDir::new().unwrap();
        let target_dir = temp_dir.path().join("root");
        fs::create_dir_all(target_dir.join("thing/inner")).unwrap();

        let layer_path = temp_dir.path().join("layer.tar.gz");
        create_test_layer(&layer_path, &[TestEntry::File("thing", b"file now")], true);

        extract_layer(&layer_path, &target_dir).unwrap();
        assert_eq!(
            fs::read_to_string(target_dir.join("thing")).unwrap(),
            "file now"
        );
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(
            sanitize(Path::new("./usr/bin/tool")).unwrap(),
            PathBuf::from("usr/bin/tool")
        );
        assert_eq!(sanitize(Path::new("/etc/x")).unwrap(), PathBuf::from("etc/x"));
        assert!(sanitize(Path::new("../escape")).is_err());
    }
}
