//! Record storage in a file, for hosted targets.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use log::debug;

use super::StateStorage;

/// Stores the record in a single file.
///
/// Writes go to a sibling temporary file that is synced and then renamed over the
/// record, so an interrupted write never leaves a truncated record behind.
pub struct FileStorage {
    path: PathBuf,
    temporary: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut temporary = path.clone().into_os_string();
        temporary.push(".tmp");

        Self {
            path,
            temporary: PathBuf::from(temporary),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StateStorage for FileStorage {
    type Error = io::Error;

    fn read(&mut self, buffer: &mut [u8]) -> Result<Option<usize>, Self::Error> {
        let contents = match fs::read(&self.path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!("No state file at {}", self.path.display());
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        if contents.len() > buffer.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "state file is larger than the read buffer",
            ));
        }

        buffer[..contents.len()].copy_from_slice(&contents);
        Ok(Some(contents.len()))
    }

    fn write(&mut self, record: &[u8]) -> Result<(), Self::Error> {
        {
            let mut file = fs::File::create(&self.temporary)?;
            file.write_all(record)?;
            file.sync_all()?;
        }
        fs::rename(&self.temporary, &self.path)?;

        debug!("Wrote {} bytes to {}", record.len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_path(name: &str) -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!(
            "temperature-node-{}-{}.json",
            name,
            std::process::id()
        ));
        let _ = fs::remove_file(&path);
        path
    }

    #[test]
    fn test_missing_file_holds_no_record() {
        let mut storage = FileStorage::new(scratch_path("missing"));
        let mut buffer = [0_u8; 32];
        assert_eq!(storage.read(&mut buffer).unwrap(), None);
    }

    #[test]
    fn test_written_record_reads_back() {
        let path = scratch_path("roundtrip");
        let mut storage = FileStorage::new(&path);
        storage.write(b"{\"count\":4}").unwrap();

        let mut buffer = [0_u8; 32];
        let length = storage.read(&mut buffer).unwrap().unwrap();
        assert_eq!(&buffer[..length], b"{\"count\":4}");
        assert!(!storage.temporary.exists(), "The temporary file must be renamed");

        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_oversized_file_is_an_error() {
        let path = scratch_path("oversized");
        fs::write(&path, [b' '; 64]).unwrap();

        let mut storage = FileStorage::new(&path);
        let mut buffer = [0_u8; 16];
        assert!(storage.read(&mut buffer).is_err());

        fs::remove_file(path).unwrap();
    }
}
