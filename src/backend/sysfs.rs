use std::io;
use std::path::Path;

use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::gpio::SysfsBackend;

#[derive(Debug, Default, Clone, Copy)]
pub struct KernelSysfs;

impl KernelSysfs {
    pub fn new() -> Self {
        Self
    }
}

impl SysfsBackend for KernelSysfs {
    async fn exists(&self, path: &Path) -> io::Result<bool> {
        fs::try_exists(path).await
    }

    async fn write(&self, path: &Path, contents: &str) -> io::Result<()> {
        let mut file = OpenOptions::new().write(true).open(path).await?;
        file.write_all(contents.as_bytes()).await?;
        // sysfs reports rejected values on write completion
        file.flush().await
    }

    async fn read_to_string(&self, path: &Path) -> io::Result<String> {
        fs::read_to_string(path).await
    }
}
