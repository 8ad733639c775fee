use compound_fs::{FileDevice, FileSystem, OpenMode, Whence};
use test_log::test;

#[test]
fn image_on_a_real_file_round_trips() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("store.cfs");

    let payload = (0..60_000u32).map(|i| (i % 253) as u8).collect::<Vec<_>>();

    {
        let dev = FileDevice::create(&image_path, 8 * 1024 * 1024).unwrap();
        let mut fs = FileSystem::format(dev, 3, 9, 6).unwrap();

        assert!(fs.mkdir("data"));
        let fd = fs
            .open("data/blob", OpenMode::CREATE | OpenMode::READ)
            .unwrap();
        assert_eq!(payload.len(), fs.write(fd, &payload));
        assert!(fs.close(fd));
        fs.sync();
    }

    {
        let dev = FileDevice::open(&image_path).unwrap();
        let mut fs = FileSystem::open_device(dev).unwrap();

        assert_eq!(Some(payload.len() as u64), fs.filesize("data/blob"));

        let fd = fs.open("data/blob", OpenMode::READ).unwrap();
        assert!(fs.seek(fd, 0, Whence::Set));
        let mut back = vec![0u8; payload.len()];
        assert_eq!(payload.len(), fs.read(fd, &mut back));
        assert_eq!(payload, back);
        assert!(fs.close(fd));
    }
}

#[test]
fn signature_survives_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let image_path = dir.path().join("sig.cfs");

    {
        let dev = FileDevice::create(&image_path, 1024 * 1024).unwrap();
        let fs = FileSystem::format(dev, 3, 9, 6).unwrap();
        drop(fs.into_device());
    }

    let raw = std::fs::read(&image_path).unwrap();
    assert_eq!(
        [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1],
        raw[0..8],
        "compound file signature"
    );
    // little-endian byte-order marker
    assert_eq!([0xFE, 0xFF], raw[28..30]);
}
