use compound_fs::{FileSystem, MemDevice, OpenMode, Whence};
use test_log::test;

/// Threshold below which streams live in the mini-stream, as written by
/// `format`.
const THRESHOLD: usize = 4096;

#[test]
fn small_streams_round_trip_through_the_mini_stream() {
    let mut fs = FileSystem::format(MemDevice::new(10 * 1024 * 1024), 3, 9, 6).unwrap();

    // well below the threshold: short-sector territory
    let fd = fs.open("tiny", OpenMode::CREATE | OpenMode::READ).unwrap();
    let payload = (0..100u32).map(|i| i as u8).collect::<Vec<_>>();
    assert_eq!(payload.len(), fs.write(fd, &payload));

    assert!(fs.seek(fd, 0, Whence::Set));
    let mut back = vec![0u8; payload.len()];
    assert_eq!(payload.len(), fs.read(fd, &mut back));
    assert_eq!(payload, back);
    assert!(fs.close(fd));

    // survives a reopen
    let mut fs = FileSystem::open_device(fs.into_device()).unwrap();
    let fd = fs.open("tiny", OpenMode::READ).unwrap();
    let mut back = vec![0u8; payload.len()];
    assert_eq!(payload.len(), fs.read(fd, &mut back));
    assert_eq!(payload, back);
    assert!(fs.close(fd));
}

#[test]
fn growth_across_the_threshold_migrates_to_regular_sectors() {
    let mut fs = FileSystem::format(MemDevice::new(10 * 1024 * 1024), 3, 9, 6).unwrap();

    let fd = fs.open("grow", OpenMode::CREATE | OpenMode::READ).unwrap();

    // start short
    let first = vec![0x11u8; THRESHOLD - 100];
    assert_eq!(first.len(), fs.write(fd, &first));

    // this write crosses the threshold
    let second = vec![0x22u8; 4096];
    assert_eq!(second.len(), fs.write(fd, &second));

    let mut expected = first;
    expected.extend_from_slice(&second);
    assert_eq!(Some(expected.len() as u64), fs.filesize("grow"));

    assert!(fs.seek(fd, 0, Whence::Set));
    let mut back = vec![0u8; expected.len()];
    assert_eq!(expected.len(), fs.read(fd, &mut back));
    assert_eq!(expected, back);
    assert!(fs.close(fd));
}

#[test]
fn truncate_crosses_the_threshold_back_down() {
    let mut fs = FileSystem::format(MemDevice::new(10 * 1024 * 1024), 3, 9, 6).unwrap();

    let fd = fs.open("cross", OpenMode::CREATE | OpenMode::READ).unwrap();

    let payload = (0..THRESHOLD + 4096)
        .map(|i| (i % 251) as u8)
        .collect::<Vec<_>>();
    assert_eq!(payload.len(), fs.write(fd, &payload));

    // shrink below the threshold: content moves into the mini-stream
    assert!(fs.truncate(fd, THRESHOLD as u64 - 1));
    assert_eq!(Some(THRESHOLD as u64 - 1), fs.filesize("cross"));

    assert!(fs.seek(fd, 0, Whence::Set));
    let mut back = vec![0u8; THRESHOLD - 1];
    assert_eq!(back.len(), fs.read(fd, &mut back));
    assert_eq!(&payload[..THRESHOLD - 1], &back[..]);
    assert!(fs.close(fd));

    // and the short rendition survives a reopen
    let mut fs = FileSystem::open_device(fs.into_device()).unwrap();
    let fd = fs.open("cross", OpenMode::READ).unwrap();
    let mut back = vec![0u8; THRESHOLD - 1];
    assert_eq!(back.len(), fs.read(fd, &mut back));
    assert_eq!(&payload[..THRESHOLD - 1], &back[..]);
    assert!(fs.close(fd));
}

#[test]
fn many_small_files_share_the_mini_stream() {
    let mut fs = FileSystem::format(MemDevice::new(10 * 1024 * 1024), 3, 9, 6).unwrap();

    for i in 0..50 {
        let path = format!("file{i}");
        let fd = fs
            .open(path.as_str(), OpenMode::CREATE | OpenMode::READ)
            .unwrap();
        let payload = vec![i as u8; 70 + i];
        assert_eq!(payload.len(), fs.write(fd, &payload));
        assert!(fs.close(fd));
    }

    let mut fs = FileSystem::open_device(fs.into_device()).unwrap();
    for i in 0..50 {
        let path = format!("file{i}");
        let fd = fs.open(path.as_str(), OpenMode::READ).unwrap();
        let mut back = vec![0u8; 70 + i];
        assert_eq!(back.len(), fs.read(fd, &mut back));
        assert!(back.iter().all(|b| *b == i as u8), "file{i}");
        assert!(fs.close(fd));
    }
}

#[test]
fn truncate_to_zero_and_regrow() {
    let mut fs = FileSystem::format(MemDevice::new(10 * 1024 * 1024), 3, 9, 6).unwrap();

    let fd = fs.open("re", OpenMode::CREATE | OpenMode::READ).unwrap();
    let big = vec![7u8; THRESHOLD * 2];
    assert_eq!(big.len(), fs.write(fd, &big));

    assert!(fs.truncate(fd, 0));
    assert_eq!(Some(0), fs.filesize("re"));

    assert!(fs.seek(fd, 0, Whence::Set));
    assert_eq!(3, fs.write(fd, b"new"));
    assert_eq!(Some(3), fs.filesize("re"));

    assert!(fs.seek(fd, 0, Whence::Set));
    let mut back = [0u8; 3];
    assert_eq!(3, fs.read(fd, &mut back));
    assert_eq!(b"new", &back);
    assert!(fs.close(fd));
}
