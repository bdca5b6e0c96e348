use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use crate::{Result, Volume, check_range};

/// 内存中的卷，大小在创建时固定
#[derive(Debug)]
pub struct MemVolume {
    data: Mutex<Box<[u8]>>,
}

impl MemVolume {
    /// 创建 `size` 字节、内容全零的卷
    #[inline]
    pub fn new(size: usize) -> Self {
        Self::from_vec(vec![0; size])
    }

    #[inline]
    pub fn from_vec(data: Vec<u8>) -> Self {
        Self {
            data: Mutex::new(data.into_boxed_slice()),
        }
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.data.lock().len() as u64
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 取出卷的全部内容
    pub fn into_inner(self) -> Vec<u8> {
        self.data.into_inner().into_vec()
    }
}

impl Volume for MemVolume {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let data = self.data.lock();
        check_range(offset, buf.len(), data.len() as u64)?;
        let start = offset as usize;
        buf.copy_from_slice(&data[start..start + buf.len()]);
        Ok(())
    }

    fn write_at(&self, offset: u64, buf: &[u8]) -> Result<()> {
        let mut data = self.data.lock();
        check_range(offset, buf.len(), data.len() as u64)?;
        let start = offset as usize;
        data[start..start + buf.len()].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    #[test]
    fn read_back() {
        let volume = MemVolume::new(64);
        volume.write_at(10, b"abc").unwrap();

        let mut buf = [0; 5];
        volume.read_at(9, &mut buf).unwrap();
        assert_eq!(&buf, b"\0abc\0");
    }

    #[test]
    fn end_of_medium() {
        let volume = MemVolume::new(64);
        let mut buf = [0xff; 8];

        let err = volume.read_at(60, &mut buf).unwrap_err();
        assert!(matches!(
            err,
            Error::EndOfMedium {
                offset: 60,
                len: 8,
                size: 64
            }
        ));
        // 失败的读取不会补零
        assert_eq!(buf, [0xff; 8]);

        assert!(volume.write_at(64, &[1]).is_err());
        assert!(volume.write_at(u64::MAX, &[1]).is_err());
        volume.read_at(64, &mut []).unwrap();
    }
}
