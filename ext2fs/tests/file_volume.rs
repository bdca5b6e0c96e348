use std::env;
use std::fs;
use std::process;

use ext2fs::{DEFAULT_CACHE_CAPACITY, Filesystem, FormatOptions};
use volume::FileVolume;

#[test]
fn image_file() {
    let _ = env_logger::builder().is_test(true).try_init();
    let path = env::temp_dir().join(format!("ext2fs-image-{}.img", process::id()));

    let volume = FileVolume::create(&path, 1024 * 1024).unwrap();
    let mut fs = Filesystem::format(&volume, FormatOptions::new(1024, 128)).unwrap();
    let dir = fs.mkdir(fs.root(), "etc").unwrap();
    let ino = fs.create(dir, "motd").unwrap();
    let file = fs.open(ino).unwrap();
    fs.write(&file, 0, b"welcome").unwrap();
    fs.close(file).unwrap();
    fs.unmount().unwrap();
    volume.sync_all().unwrap();
    drop(volume);

    let volume = FileVolume::open(&path).unwrap();
    let mut fs = Filesystem::mount(&volume, DEFAULT_CACHE_CAPACITY).unwrap();
    let ino = fs.lookup_path("/etc/motd").unwrap();
    let file = fs.open(ino).unwrap();
    let mut buf = [0; 16];
    let read = fs.read(&file, 0, &mut buf).unwrap();
    assert_eq!(b"welcome", &buf[..read]);
    fs.unmount().unwrap();

    drop(volume);
    fs::remove_file(&path).unwrap();
}
