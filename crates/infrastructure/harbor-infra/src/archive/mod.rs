use std::fs::File;
use std::io;

use camino::{Utf8Path, Utf8PathBuf};
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("walking {dir} failed: {source}")]
    Walk {
        dir: Utf8PathBuf,
        source: walkdir::Error,
    },
    #[error("non UTF-8 path under {0}")]
    NonUtf8Path(Utf8PathBuf),
    #[error("zip write failed: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Zip the `input` directory recursively into the `output` file.
///
/// Entry names are relative to `input` and always use forward slashes, so
/// the archive extracts identically on every platform. Entries are walked in
/// file-name order to keep the archive layout stable between runs.
///
/// No locking is taken on `input`; the caller is responsible for making sure
/// writers of the directory have finished before archiving.
pub fn zip_directory(input: &Utf8Path, output: &Utf8Path) -> Result<(), ArchiveError> {
    let file = File::create(output.as_std_path())?;
    let mut writer = ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(input.as_std_path()).sort_by_file_name() {
        let entry = entry.map_err(|source| ArchiveError::Walk {
            dir: input.to_owned(),
            source,
        })?;

        let Ok(rel) = entry.path().strip_prefix(input.as_std_path()) else {
            continue;
        };
        if rel.as_os_str().is_empty() {
            // The root directory itself.
            continue;
        }
        let rel = Utf8Path::from_path(rel).ok_or_else(|| ArchiveError::NonUtf8Path(input.to_owned()))?;
        let name = rel.as_str().replace('\\', "/");

        if entry.file_type().is_dir() {
            writer.add_directory(format!("{name}/"), options)?;
        } else if entry.file_type().is_file() {
            writer.start_file(name, options)?;
            let mut src = File::open(entry.path())?;
            io::copy(&mut src, &mut writer)?;
        }
        // Symlinks and other special files are not part of a build output
        // directory; skip them rather than failing the whole bundle.
    }

    writer.finish()?;
    Ok(())
}
