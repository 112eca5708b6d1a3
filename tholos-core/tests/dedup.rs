use std::fs;
use std::path::{Path, PathBuf};
use tholos_core::cache::{CacheEntry, HashCache};
use tholos_core::dedup::{dedup_tree, DedupIndex, DedupOptions};
use tholos_core::digest::Fingerprint;
use tholos_core::progress::Progress;
use tholos_core::scan::{list_files, ListOptions};
use tholos_core::{Blake3Backend, Config, Error, FileRecord, MasterPolicy};

fn fp(seed: u8) -> Fingerprint {
    Fingerprint::from_bytes(&[seed; 32])
}

fn native() -> Config {
    Config { blake3: Blake3Backend::Native, workers: 3, ..Config::default() }
}

#[test]
fn shorter_path_becomes_master_regardless_of_order() {
    for order in [["a/longer_name_b.rom", "a/b.rom"], ["a/b.rom", "a/longer_name_b.rom"]] {
        let mut idx = DedupIndex::new(DedupOptions::default());
        for p in order {
            idx.insert(PathBuf::from(p), fp(1));
        }
        assert_eq!(idx.master[&fp(1)], PathBuf::from("a/b.rom"));
        assert_eq!(idx.duplicate[Path::new("a/longer_name_b.rom")], fp(1));
        assert_eq!(idx.duplicate.len(), 1);
    }
}

#[test]
fn equal_length_ties_break_by_byte_order() {
    let mut idx = DedupIndex::new(DedupOptions::default());
    idx.insert("x/b.rom".into(), fp(1));
    idx.insert("x/a.rom".into(), fp(1));
    assert_eq!(idx.master[&fp(1)], PathBuf::from("x/a.rom"));
}

#[test]
fn lexicographic_policy_ignores_length() {
    let opts = DedupOptions { policy: MasterPolicy::Lexicographic, ..DedupOptions::default() };
    let mut idx = DedupIndex::new(opts);
    idx.insert("b.rom".into(), fp(1));
    idx.insert("a/very/deep/copy.rom".into(), fp(1));
    assert_eq!(idx.master[&fp(1)], PathBuf::from("a/very/deep/copy.rom"));
}

#[test]
fn protected_paths_always_stay_master() {
    let opts = DedupOptions { protected_roots: vec!["library".into()], ..DedupOptions::default() };
    let mut idx = DedupIndex::new(opts);
    idx.insert("library/sets/full/name.rom".into(), fp(1));
    idx.insert("x.rom".into(), fp(1));
    assert_eq!(idx.master[&fp(1)], PathBuf::from("library/sets/full/name.rom"));
    assert!(idx.duplicate.contains_key(Path::new("x.rom")));
}

#[test]
fn report_groups_and_skips_singletons() {
    let mut idx = DedupIndex::new(DedupOptions::default());
    for (p, s) in [("p1", 1), ("p22", 1), ("p333", 1), ("p4", 2)] {
        idx.insert(p.into(), fp(s));
    }
    let reverse: std::collections::HashSet<_> = idx.duplicate.keys().cloned().collect();
    assert!(reverse.is_disjoint(&idx.master.values().cloned().collect()));

    let report = idx.report();
    assert_eq!(report.files_indexed, 4);
    assert_eq!(report.groups.len(), 1);
    let g = &report.groups[0];
    assert_eq!(g.master, PathBuf::from("p1"));
    assert_eq!(g.duplicates, vec![PathBuf::from("p22"), PathBuf::from("p333")]);
    assert_eq!(report.duplicate_count(), 2);

    let text = report.to_string();
    assert!(text.starts_with("File duplication list:"));
    assert!(text.contains("Master file: p1"));
    assert!(text.contains("  * Duplicate: p333"));
}

#[test]
fn tree_dedup_finds_identical_files() {
    let td = tempfile::tempdir().unwrap();
    let root = td.path();
    fs::create_dir_all(root.join("a/deep")).unwrap();
    fs::write(root.join("a/x.bin"), b"same").unwrap();
    fs::write(root.join("a/deep/x-copy.bin"), b"same").unwrap();
    fs::write(root.join("other.bin"), b"different").unwrap();
    let files = list_files(root, &ListOptions::default()).unwrap();

    let report = dedup_tree(&native(), DedupOptions::default(), &files, None, &Progress::new(false)).unwrap();
    assert_eq!(report.files_indexed, 3);
    assert_eq!(report.groups.len(), 1);
    assert_eq!(report.groups[0].master, root.join("a/x.bin"));
    assert_eq!(report.groups[0].duplicates, vec![root.join("a/deep/x-copy.bin")]);
    assert_eq!(
        report.groups[0].fingerprint.as_str(),
        blake3::hash(b"same").to_hex().to_uppercase()
    );
    assert!(report.failed.is_empty());
}

#[test]
fn cache_hit_is_trusted_even_when_stale() {
    let td = tempfile::tempdir().unwrap();
    let f = td.path().join("a.bin");
    fs::write(&f, b"new content").unwrap();
    let rec = FileRecord::stat(&f).unwrap();
    let cache_path = td.path().join("hashes.cache");

    let mut cache = HashCache::new();
    cache.insert(&f, CacheEntry::new(&rec, fp(0x42)));
    cache.save(&cache_path).unwrap();

    // The external backend cannot run; a miss would fail the file.
    let cfg = Config { blake3: Blake3Backend::External { program: "/nonexistent/b3sum".into() }, ..native() };
    let mut idx_cache = HashCache::load(&cache_path).unwrap();
    let (idx, failed) = tholos_core::dedup::build_index(
        &cfg,
        DedupOptions::default(),
        &[rec],
        &mut idx_cache,
        &Progress::new(false),
    )
    .unwrap();
    assert!(failed.is_empty());
    assert_eq!(idx.master[&fp(0x42)], f);
    assert!(!idx_cache.is_dirty());
}

#[test]
fn new_fingerprints_are_persisted() {
    let td = tempfile::tempdir().unwrap();
    let data = td.path().join("data");
    fs::create_dir(&data).unwrap();
    for i in 0..10 {
        fs::write(data.join(format!("{i}.bin")), format!("{}", i % 4)).unwrap();
    }
    let files = list_files(&data, &ListOptions::default()).unwrap();
    let cache_path = td.path().join("hashes.cache");

    let first =
        dedup_tree(&native(), DedupOptions::default(), &files, Some(cache_path.as_path()), &Progress::new(false)).unwrap();
    let cache = HashCache::load(&cache_path).unwrap();
    assert_eq!(cache.len(), 10);
    assert_eq!(first.duplicate_count(), 6);

    // Everything is served from the cache on the second run.
    let cfg = Config { blake3: Blake3Backend::External { program: "/nonexistent/b3sum".into() }, ..native() };
    let second =
        dedup_tree(&cfg, DedupOptions::default(), &files, Some(cache_path.as_path()), &Progress::new(false)).unwrap();
    assert_eq!(second.groups, first.groups);
}

#[test]
fn unreadable_files_are_reported_not_fatal() {
    let td = tempfile::tempdir().unwrap();
    let f = td.path().join("gone.bin");
    fs::write(&f, b"x").unwrap();
    let rec = FileRecord::stat(&f).unwrap();
    fs::remove_file(&f).unwrap();
    let report = dedup_tree(&native(), DedupOptions::default(), &[rec], None, &Progress::new(false)).unwrap();
    assert_eq!(report.failed, vec![f]);
    assert_eq!(report.files_indexed, 0);
}

#[test]
fn corrupt_cache_is_ignored() {
    let td = tempfile::tempdir().unwrap();
    let p = td.path().join("hashes.cache");
    fs::write(&p, b"definitely not a cache").unwrap();
    assert!(HashCache::load(&p).unwrap().is_empty());

    let mut cache = HashCache::new();
    let rec = FileRecord { path: "a".into(), size: 1, ctime_ns: 1, mtime_ns: 1, inode: 1 };
    cache.insert(Path::new("a"), CacheEntry::new(&rec, fp(1)));
    cache.save(&p).unwrap();
    let mut bytes = fs::read(&p).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xFF;
    fs::write(&p, bytes).unwrap();
    assert!(HashCache::load(&p).unwrap().is_empty());
}

#[test]
fn cache_round_trips_through_disk() {
    let td = tempfile::tempdir().unwrap();
    let p = td.path().join("hashes.cache");
    assert!(HashCache::load(&p).unwrap().is_empty());
    let mut cache = HashCache::new();
    for i in 0..50u8 {
        let rec = FileRecord { path: format!("f{i}").into(), size: i as u64, ctime_ns: 0, mtime_ns: 0, inode: 0 };
        cache.insert(&rec.path, CacheEntry::new(&rec, fp(i)));
    }
    cache.save(&p).unwrap();
    let back = HashCache::load(&p).unwrap();
    assert_eq!(back.len(), 50);
    assert_eq!(back.get(Path::new("f7")).unwrap().blake3, fp(7));
    let names: Vec<_> = fs::read_dir(td.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
    assert_eq!(names, vec![std::ffi::OsString::from("hashes.cache")]);
}

#[test]
fn directory_at_cache_path_is_a_precondition_failure() {
    let td = tempfile::tempdir().unwrap();
    let p = td.path().join("hashes.cache");
    fs::create_dir(&p).unwrap();
    assert!(matches!(HashCache::load(&p), Err(Error::Precondition(_))));
    assert!(matches!(HashCache::new().save(&p), Err(Error::Precondition(_))));
}
