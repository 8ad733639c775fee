use compound_fs::{FileSystem, MemDevice, OpenMode, Whence};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use test_log::test;

/// Reference tracker: path -> `Some(content)` for files, `None` for
/// directories.
type Tracker = BTreeMap<String, Option<Vec<u8>>>;

fn parent_of(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(p, _)| p)
}

fn dir_exists(tracker: &Tracker, path: &str) -> bool {
    path.is_empty() || matches!(tracker.get(path), Some(None))
}

fn has_children(tracker: &Tracker, path: &str) -> bool {
    let prefix = format!("{path}/");
    tracker.keys().any(|k| k.starts_with(&prefix))
}

#[test]
fn random_operations_match_reference_tracker() {
    let mut rng = StdRng::seed_from_u64(0xF5_2026);
    let mut fs = FileSystem::format(MemDevice::new(32 * 1024 * 1024), 3, 9, 6).unwrap();
    let mut tracker: Tracker = Tracker::new();

    let dir_names = ["d0", "d1", "d2"];
    let file_names = ["f0", "f1", "f2", "f3"];

    let random_dir = |rng: &mut StdRng| -> String {
        match rng.random_range(0..4) {
            0 => String::new(),
            1 => dir_names[rng.random_range(0..dir_names.len())].to_owned(),
            _ => format!(
                "{}/{}",
                dir_names[rng.random_range(0..dir_names.len())],
                dir_names[rng.random_range(0..dir_names.len())]
            ),
        }
    };
    let random_file = |rng: &mut StdRng| -> String {
        let dir = random_dir(rng);
        let file = file_names[rng.random_range(0..file_names.len())];
        if dir.is_empty() {
            file.to_owned()
        } else {
            format!("{dir}/{file}")
        }
    };

    for step in 0..800 {
        match rng.random_range(0..7) {
            // mkdir
            0 => {
                let path = random_dir(&mut rng);
                if path.is_empty() {
                    continue;
                }
                let ok = dir_exists(&tracker, parent_of(&path).unwrap_or(""))
                    && !tracker.contains_key(&path);
                assert_eq!(ok, fs.mkdir(path.as_str()), "step {step}: mkdir {path}");
                if ok {
                    tracker.insert(path, None);
                }
            }
            // touch / write
            1 | 2 => {
                let path = random_file(&mut rng);
                let parent_ok = dir_exists(&tracker, parent_of(&path).unwrap_or(""));
                let is_dir = matches!(tracker.get(&path), Some(None));

                let expect = parent_ok && !is_dir;
                let opened = fs.open(path.as_str(), OpenMode::CREATE | OpenMode::READ);
                assert_eq!(expect, opened.is_some(), "step {step}: open {path}");

                if let Some(fd) = opened {
                    let content = tracker.entry(path).or_insert_with(|| Some(Vec::new()));
                    let data = (0..rng.random_range(1..2_000))
                        .map(|_| rng.random::<u8>())
                        .collect::<Vec<_>>();
                    let at = rng.random_range(0..=content.as_ref().unwrap().len());

                    assert!(fs.seek(fd, at as i64, Whence::Set));
                    assert_eq!(data.len(), fs.write(fd, &data));
                    assert!(fs.close(fd));

                    let content = content.as_mut().unwrap();
                    if at + data.len() > content.len() {
                        content.resize(at + data.len(), 0);
                    }
                    content[at..at + data.len()].copy_from_slice(&data);
                }
            }
            // unlink
            3 => {
                let path = random_file(&mut rng);
                let ok = matches!(tracker.get(&path), Some(Some(_)));
                assert_eq!(ok, fs.unlink(path.as_str()), "step {step}: unlink {path}");
                if ok {
                    tracker.remove(&path);
                }
            }
            // rmdir
            4 => {
                let path = random_dir(&mut rng);
                if path.is_empty() {
                    continue;
                }
                let ok = dir_exists(&tracker, &path) && !has_children(&tracker, &path);
                assert_eq!(ok, fs.rmdir(path.as_str()), "step {step}: rmdir {path}");
                if ok {
                    tracker.remove(&path);
                }
            }
            // move a file
            5 => {
                let from = random_file(&mut rng);
                let to = random_file(&mut rng);
                let ok = matches!(tracker.get(&from), Some(Some(_)))
                    && dir_exists(&tracker, parent_of(&to).unwrap_or(""))
                    && !tracker.contains_key(&to)
                    && from != to;
                assert_eq!(
                    ok,
                    fs.r#move(from.as_str(), to.as_str()),
                    "step {step}: move {from} -> {to}"
                );
                if ok {
                    let content = tracker.remove(&from).unwrap();
                    tracker.insert(to, content);
                }
            }
            // probe
            _ => {
                let path = random_file(&mut rng);
                match tracker.get(&path) {
                    Some(Some(content)) => {
                        assert!(fs.is_file(path.as_str()), "step {step}: {path}");
                        assert_eq!(Some(content.len() as u64), fs.filesize(path.as_str()));
                    }
                    Some(None) => {
                        assert!(fs.is_directory(path.as_str()), "step {step}: {path}");
                    }
                    None => {
                        assert!(!fs.exists(path.as_str()), "step {step}: {path}");
                    }
                }
            }
        }
    }

    // final audit: every tracked file reads back exactly
    for (path, content) in &tracker {
        match content {
            Some(content) => {
                let fd = fs.open(path.as_str(), OpenMode::READ).unwrap();
                let mut back = vec![0u8; content.len()];
                assert_eq!(content.len(), fs.read(fd, &mut back), "{path}");
                assert_eq!(content, &back, "{path}");
                assert!(fs.close(fd));
            }
            None => assert!(fs.is_directory(path.as_str()), "{path}"),
        }
    }

    // and the whole state survives a reopen
    let mut fs = FileSystem::open_device(fs.into_device()).unwrap();
    for (path, content) in &tracker {
        match content {
            Some(content) => {
                assert_eq!(Some(content.len() as u64), fs.filesize(path.as_str()));
                let fd = fs.open(path.as_str(), OpenMode::READ).unwrap();
                let mut back = vec![0u8; content.len()];
                assert_eq!(content.len(), fs.read(fd, &mut back));
                assert_eq!(content, &back, "{path} after reopen");
                assert!(fs.close(fd));
            }
            None => assert!(fs.is_directory(path.as_str()), "{path} after reopen"),
        }
    }
}
