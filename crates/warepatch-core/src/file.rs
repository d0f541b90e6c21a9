//! Ware files on disk

use crate::container::Image;
use crate::error::WareError;
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// A ware file opened for patching in place
#[derive(Debug)]
pub struct WareFile {
    path: PathBuf,
    file: File,
}

impl WareFile {
    /// Open read-write; the file is not modified until `commit`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, WareError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| WareError::access(&path, e))?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole file and probe its format
    pub fn read_image(&mut self) -> Result<Image, WareError> {
        let mut data = Vec::new();
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| self.file.read_to_end(&mut data))
            .map_err(|e| WareError::access(&self.path, e))?;
        debug!("read {} bytes from {}", data.len(), self.path.display());
        Image::parse(data)
    }

    /// Replace the file contents with the image and flush to disk
    pub fn commit(&mut self, image: &Image) -> Result<(), WareError> {
        let data = image.data();
        self.file
            .set_len(data.len() as u64)
            .and_then(|_| self.file.seek(SeekFrom::Start(0)))
            .and_then(|_| self.file.write_all(data))
            .and_then(|_| self.file.sync_all())
            .map_err(|e| WareError::access(&self.path, e))?;
        debug!("wrote {} bytes to {}", data.len(), self.path.display());
        Ok(())
    }
}

/// Read a ware image without opening it for writing
pub fn read_image(path: impl AsRef<Path>) -> Result<Image, WareError> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| WareError::access(path, e))?;
    Image::parse(data)
}

/// Write an image to a new or existing file
pub fn write_image(path: impl AsRef<Path>, image: &Image) -> Result<(), WareError> {
    let path = path.as_ref();
    let mut file = File::create(path).map_err(|e| WareError::access(path, e))?;
    file.write_all(image.data())
        .and_then(|_| file.sync_all())
        .map_err(|e| WareError::access(path, e))
}
