//! Scratch space and archive extraction.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tempfile::TempDir;
use tracing::debug;

use crate::error::{ChartError, Result};

/// Per-pass scratch directory, removed on drop whatever the outcome.
pub struct Scratch {
    dir: TempDir,
}

impl Scratch {
    pub fn new(prefix: &str) -> Result<Self> {
        Ok(Self { dir: tempfile::Builder::new().prefix(prefix).tempdir()? })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

fn is_gzip(file: &mut File) -> Result<bool> {
    let mut magic = [0u8; 2];
    let n = file.read(&mut magic)?;
    file.seek(SeekFrom::Start(0))?;
    Ok(n == 2 && magic == [0x1f, 0x8b])
}

/// Extract a tar archive (gzip-compressed or not) into `dest`.
pub fn unpack(archive: &Path, dest: &Path) -> Result<()> {
    let mut file = File::open(archive)?;
    let gzip = is_gzip(&mut file)?;
    let reader: Box<dyn Read> = if gzip { Box::new(GzDecoder::new(BufReader::new(file))) } else { Box::new(BufReader::new(file)) };
    std::fs::create_dir_all(dest)?;
    tar::Archive::new(reader).unpack(dest)?;
    debug!(archive = %archive.display(), dest = %dest.display(), gzip, "archive unpacked");
    Ok(())
}

/// [`unpack`] on the blocking pool; completes before returning.
pub async fn unpack_blocking(archive: PathBuf, dest: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || unpack(&archive, &dest))
        .await
        .map_err(|e| ChartError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unpacks_gzip_and_plain_tar() {
        let scratch = Scratch::new("odg-test-").unwrap();
        let files: &[(&str, &[u8])] = &[("postgresql/values.yaml", b"a: 1\n"), ("postgresql/Chart.yaml", b"name: postgresql\n")];

        std::fs::write(scratch.join("chart.tgz"), odg_testkit::tar_gz(files)).unwrap();
        unpack_blocking(scratch.join("chart.tgz"), scratch.join("gz")).await.unwrap();
        assert_eq!(std::fs::read_to_string(scratch.join("gz/postgresql/values.yaml")).unwrap(), "a: 1\n");

        std::fs::write(scratch.join("chart.tar"), odg_testkit::tar(files)).unwrap();
        unpack(&scratch.join("chart.tar"), &scratch.join("plain")).unwrap();
        assert!(scratch.join("plain/postgresql/Chart.yaml").exists());
    }

    #[test]
    fn scratch_is_removed_on_drop() {
        let scratch = Scratch::new("odg-test-").unwrap();
        let path = scratch.path().to_path_buf();
        std::fs::write(scratch.join("x"), b"x").unwrap();
        drop(scratch);
        assert!(!path.exists());
    }

    #[test]
    fn garbage_is_an_error() {
        let scratch = Scratch::new("odg-test-").unwrap();
        std::fs::write(scratch.join("junk"), [0x1f, 0x8b, 0, 1, 2, 3]).unwrap();
        assert!(unpack(&scratch.join("junk"), &scratch.join("out")).is_err());
    }
}
