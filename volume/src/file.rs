use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use spin::Mutex;

use crate::{Error, Result, Volume, check_range};

/// 以镜像文件为介质的卷
///
/// 卷的逻辑大小在打开时确定，之后的写入不会让文件增长。
#[derive(Debug)]
pub struct FileVolume {
    file: Mutex<File>,
    size: u64,
}

impl FileVolume {
    /// 创建（或截断）镜像文件，并将其长度设为 `size` 字节
    pub fn create(path: impl AsRef<Path>, size: u64) -> io::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(size)?;

        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }

    /// 打开已有的镜像文件，卷大小即文件长度
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// 把缓冲写入到底层存储
    pub fn sync_all(&self) -> io::Result<()> {
        self.file.lock().sync_all()
    }
}

impl Volume for FileVolume {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let len = buf.len();
        check_range(offset, len, self.size)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.read_exact(buf))
            .map_err(|source| match source.kind() {
                io::ErrorKind::UnexpectedEof => Error::EndOfMedium {
                    offset,
                    len,
                    size: self.size,
                },
                _ => Error::Io { offset, source },
            })
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        check_range(offset, buf.len(), self.size)?;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))
            .and_then(|_| file.write_all(buf))
            .map_err(|source| Error::Io { offset, source })
    }
}
