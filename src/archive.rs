use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tar::EntryType;

use crate::error::LoadError;
use crate::session::PAGE_EXTENSION;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Extracts `archive` into `target`, keeping the stored directory layout and
/// permission bits. Accepts gzip-compressed or plain tar. Returns the number
/// of directories and files written.
pub fn unpack(archive: &Path, target: &Path) -> Result<usize, LoadError> {
    unpack_inner(archive, target).map_err(|err| LoadError::Extract {
        path: archive.to_path_buf(),
        message: err.to_string(),
    })
}

fn unpack_inner(archive: &Path, target: &Path) -> io::Result<usize> {
    let mut reader = BufReader::new(File::open(archive)?);
    let compressed = reader.fill_buf()?.starts_with(&GZIP_MAGIC);
    let reader: Box<dyn Read> = if compressed {
        Box::new(GzDecoder::new(reader))
    } else {
        Box::new(reader)
    };

    let mut tarball = tar::Archive::new(reader);
    let mut written = 0;
    for entry in tarball.entries()? {
        let mut entry = entry?;
        let kind = entry.header().entry_type();
        let mode = entry.header().mode().ok().map(|mode| mode & 0o7777);
        let relative = entry.path()?.into_owned();
        let Some(dest) = contained_path(target, &relative) else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("entry {} escapes the target directory", relative.display()),
            ));
        };

        match kind {
            EntryType::Directory => {
                fs::create_dir_all(&dest)?;
                apply_mode(&dest, mode)?;
            }
            EntryType::Regular | EntryType::Continuous | EntryType::GNUSparse => {
                if let Some(parent) = dest.parent() {
                    fs::create_dir_all(parent)?;
                }
                let mut file = open_for_entry(&dest, mode)?;
                io::copy(&mut entry, &mut file).map_err(|err| {
                    io::Error::new(err.kind(), format!("{}: {err}", relative.display()))
                })?;
                apply_mode(&dest, mode)?;
            }
            other => {
                tracing::debug!(entry = %relative.display(), kind = ?other, "skipping archive entry");
                continue;
            }
        }
        written += 1;
    }
    Ok(written)
}

fn contained_path(target: &Path, relative: &Path) -> Option<PathBuf> {
    let mut dest = target.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => dest.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(dest)
}

#[cfg(unix)]
fn open_for_entry(path: &Path, mode: Option<u32>) -> io::Result<File> {
    use std::os::unix::fs::OpenOptionsExt;

    let mut options = OpenOptions::new();
    options.create(true).truncate(true).write(true);
    if let Some(mode) = mode {
        options.mode(mode);
    }
    options.open(path)
}

#[cfg(not(unix))]
fn open_for_entry(path: &Path, _mode: Option<u32>) -> io::Result<File> {
    OpenOptions::new()
        .create(true)
        .truncate(true)
        .write(true)
        .open(path)
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: Option<u32>) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    match mode {
        Some(mode) => fs::set_permissions(path, fs::Permissions::from_mode(mode)),
        None => Ok(()),
    }
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: Option<u32>) -> io::Result<()> {
    Ok(())
}

/// Counts the immediate entries of `dir` that look like text pages.
pub fn count_pages(dir: &Path) -> io::Result<usize> {
    let mut pages = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().ends_with(PAGE_EXTENSION) {
            pages += 1;
        }
    }
    Ok(pages)
}
