//! Canonical content hashing
//!
//! A layer's identity is the SHA-256 digest of a canonical tar stream of
//! its directory: members in sorted path order, uid/gid zeroed, mtime
//! zeroed. Two directories with identical contents therefore hash
//! identically regardless of creation order or filesystem timestamps.

use crate::error::{StrataError, StrataResult};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{self, Read, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Digest of zero content. Returned when the canonical archive would
/// contain no entries; the engine maps it to "no layer produced".
pub const EMPTY_LAYER_DIGEST: &str =
    "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Whether a digest is the empty-content sentinel
pub fn is_empty_digest(digest: &str) -> bool {
    digest == EMPTY_LAYER_DIGEST
}

/// Compute the canonical digest of a directory's contents.
///
/// An empty directory (no entries at any depth) yields
/// [`EMPTY_LAYER_DIGEST`].
pub fn canonical_digest(dir: &Path) -> StrataResult<String> {
    let entries = walk_sorted(dir)?;
    if entries.is_empty() {
        return Ok(EMPTY_LAYER_DIGEST.to_string());
    }
    digest_entries(&entries)
}

/// Compute the canonical digest of a COPY source, which may be a single
/// file or a directory.
pub fn source_digest(path: &Path) -> StrataResult<String> {
    let meta = fs::symlink_metadata(path)
        .map_err(|e| StrataError::io(format!("reading {}", path.display()), e))?;

    if meta.is_dir() {
        return canonical_digest(path);
    }

    let name = path
        .file_name()
        .ok_or_else(|| StrataError::Internal(format!("no file name in {}", path.display())))?;
    let entry = WalkEntry {
        rel: PathBuf::from(name),
        abs: path.to_path_buf(),
        meta,
    };
    digest_entries(&[entry])
}

struct WalkEntry {
    rel: PathBuf,
    abs: PathBuf,
    meta: fs::Metadata,
}

/// Collect every entry under `dir`, sorted by relative path. The root
/// directory itself is not an entry.
fn walk_sorted(dir: &Path) -> StrataResult<Vec<WalkEntry>> {
    let mut out = Vec::new();
    walk_into(dir, Path::new(""), &mut out)?;
    Ok(out)
}

fn walk_into(abs: &Path, rel: &Path, out: &mut Vec<WalkEntry>) -> StrataResult<()> {
    let mut names: Vec<_> = fs::read_dir(abs)
        .map_err(|e| StrataError::io(format!("listing {}", abs.display()), e))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| StrataError::io(format!("listing {}", abs.display()), e))?
        .into_iter()
        .map(|e| e.file_name())
        .collect();
    names.sort();

    for name in names {
        let child_abs = abs.join(&name);
        let child_rel = rel.join(&name);
        let meta = fs::symlink_metadata(&child_abs)
            .map_err(|e| StrataError::io(format!("reading {}", child_abs.display()), e))?;
        let is_dir = meta.is_dir() && !meta.file_type().is_symlink();
        out.push(WalkEntry {
            rel: child_rel.clone(),
            abs: child_abs.clone(),
            meta,
        });
        if is_dir {
            walk_into(&child_abs, &child_rel, out)?;
        }
    }
    Ok(())
}

/// Stream the canonical tar of `entries` through SHA-256
fn digest_entries(entries: &[WalkEntry]) -> StrataResult<String> {
    let mut builder = tar::Builder::new(DigestWriter::new());
    builder.follow_symlinks(false);

    for entry in entries {
        let mut header = tar::Header::new_gnu();
        header.set_uid(0);
        header.set_gid(0);
        header.set_mtime(0);
        header.set_mode(entry.meta.permissions().mode());

        let file_type = entry.meta.file_type();
        if file_type.is_symlink() {
            let target = fs::read_link(&entry.abs)
                .map_err(|e| StrataError::io(format!("reading link {}", entry.abs.display()), e))?;
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            builder
                .append_link(&mut header, &entry.rel, &target)
                .map_err(|e| StrataError::io(format!("archiving {}", entry.rel.display()), e))?;
        } else if file_type.is_dir() {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            builder
                .append_data(&mut header, &entry.rel, io::empty())
                .map_err(|e| StrataError::io(format!("archiving {}", entry.rel.display()), e))?;
        } else {
            let file = fs::File::open(&entry.abs)
                .map_err(|e| StrataError::io(format!("opening {}", entry.abs.display()), e))?;
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(entry.meta.len());
            builder
                .append_data(&mut header, &entry.rel, BoundedReader::new(file, entry.meta.len()))
                .map_err(|e| StrataError::io(format!("archiving {}", entry.rel.display()), e))?;
        }
    }

    let writer = builder
        .into_inner()
        .map_err(|e| StrataError::io("finalizing canonical archive".to_string(), e))?;
    Ok(writer.finish())
}

/// io::Write adapter feeding SHA-256
struct DigestWriter {
    hasher: Sha256,
}

impl DigestWriter {
    fn new() -> Self {
        Self {
            hasher: Sha256::new(),
        }
    }

    fn finish(self) -> String {
        hex::encode(self.hasher.finalize())
    }
}

impl Write for DigestWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.hasher.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Caps a reader at the length recorded in the tar header, so a file that
/// grows mid-archive cannot desync the stream.
struct BoundedReader<R> {
    inner: R,
    remaining: u64,
}

impl<R> BoundedReader<R> {
    fn new(inner: R, len: u64) -> Self {
        Self {
            inner,
            remaining: len,
        }
    }
}

impl<R: Read> Read for BoundedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Ok(0);
        }
        let cap = buf.len().min(self.remaining as usize);
        let n = self.inner.read(&mut buf[..cap])?;
        self.remaining -= n as u64;
        Ok(n)
    }
}
