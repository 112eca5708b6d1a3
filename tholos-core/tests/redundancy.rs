#![cfg(unix)]

mod common;

use std::fs;
use std::path::Path;
use tholos_core::progress::Progress;
use tholos_core::redundancy::{ensure_all, recovery_path, Creation, Redundancy, Verification};
use tholos_core::{Config, FileRecord};

/// Fake par2: `create` writes `<file>.vol000+01.par2`, `verify` fails when the
/// recovery file contains BAD. Every invocation is appended to `calls.log`.
fn fake_par2(dir: &Path) -> std::path::PathBuf {
    let log = dir.join("calls.log");
    common::script(
        dir,
        "par2",
        &format!(
            r#"echo "$@" >> "{log}"
for a in "$@"; do last="$a"; done
case "$1" in
  create)
    case "$last" in *refuse*) exit 1 ;; esac
    echo recovery > "$last.vol000+01.par2" ;;
  verify)
    grep -q BAD "$last" && exit 1
    [ -f "$last" ] || exit 1
    exit 0 ;;
esac"#,
            log = log.display()
        ),
    )
}

fn setup() -> (tempfile::TempDir, Config) {
    let td = tempfile::tempdir().unwrap();
    let tools = td.path().join("tools");
    fs::create_dir(&tools).unwrap();
    let cfg = Config { par2: fake_par2(&tools), redundancy_percent: 7, ..Config::default() };
    (td, cfg)
}

fn calls(td: &tempfile::TempDir) -> String {
    fs::read_to_string(td.path().join("tools/calls.log")).unwrap_or_default()
}

#[test]
fn creates_single_renamed_volume_then_verifies() {
    let (td, cfg) = setup();
    let f = td.path().join("game.bin");
    fs::write(&f, b"data").unwrap();

    let st = Redundancy::new(&cfg).ensure(&f).unwrap();
    assert_eq!(st.creation, Creation::Created);
    assert_eq!(st.verification, Verification::Verified);
    assert!(recovery_path(&f).is_file());
    assert!(!td.path().join("game.bin.vol000+01.par2").exists());

    let log = calls(&td);
    assert!(log.contains("create -r7 -n1 -q -q"));
    assert!(log.contains(&format!("verify -q -q {}", recovery_path(&f).display())));
}

#[test]
fn existing_recovery_file_is_only_verified() {
    let (td, cfg) = setup();
    let f = td.path().join("game.bin");
    fs::write(&f, b"data").unwrap();
    fs::write(recovery_path(&f), b"existing").unwrap();

    let st = Redundancy::new(&cfg).ensure(&f).unwrap();
    assert_eq!(st.creation, Creation::AlreadyPresent);
    assert_eq!(st.verification, Verification::Verified);
    assert!(!calls(&td).contains("create"));
}

#[test]
fn recreate_replaces_existing_recovery_file() {
    let (td, cfg) = setup();
    let f = td.path().join("game.bin");
    fs::write(&f, b"data").unwrap();
    fs::write(recovery_path(&f), b"BAD").unwrap();
    let cfg = Config { recreate_redundancy: true, ..cfg };

    let st = Redundancy::new(&cfg).ensure(&f).unwrap();
    assert_eq!(st.creation, Creation::Created);
    assert_eq!(st.verification, Verification::Verified);
    assert_eq!(fs::read_to_string(recovery_path(&f)).unwrap().trim(), "recovery");
}

#[test]
fn creation_failure_still_runs_verification() {
    let (td, cfg) = setup();
    let f = td.path().join("refuse.bin");
    fs::write(&f, b"data").unwrap();

    let st = Redundancy::new(&cfg).ensure(&f).unwrap();
    assert_eq!(st.creation, Creation::Failed);
    assert_eq!(st.verification, Verification::Failed);
    assert!(calls(&td).contains("verify"));
}

#[test]
fn summary_over_a_file_list() {
    let (td, cfg) = setup();
    let data = td.path().join("data");
    fs::create_dir(&data).unwrap();
    let names = ["a.bin", "b.bin", "refuse.bin", "c.bin"];
    for n in names {
        fs::write(data.join(n), n).unwrap();
    }
    fs::write(recovery_path(&data.join("b.bin")), b"fine").unwrap();
    fs::write(recovery_path(&data.join("c.bin")), b"BAD").unwrap();
    let files: Vec<FileRecord> = names.iter().map(|n| FileRecord::stat(&data.join(n)).unwrap()).collect();

    let s = ensure_all(&cfg, &files, &Progress::new(false)).unwrap();
    assert_eq!(s.total, 4);
    assert_eq!(s.created, 1);
    assert_eq!(s.already_present, 2);
    assert_eq!(s.create_failed, 1);
    assert_eq!(s.verified, 2);
    assert_eq!(s.failed, 2);
    assert_eq!(s.failed_paths, vec![data.join("refuse.bin"), data.join("c.bin")]);
}

#[test]
fn neighbouring_split_volume_recovery_files_are_left_alone() {
    let (td, cfg) = setup();
    let f = td.path().join("game.7z");
    fs::write(&f, b"data").unwrap();
    let neighbour = td.path().join("game.7z.001.par2");
    fs::write(&neighbour, b"neighbour").unwrap();

    let st = Redundancy::new(&cfg).ensure(&f).unwrap();
    assert_eq!(st.creation, Creation::Created);
    assert_eq!(fs::read_to_string(&neighbour).unwrap(), "neighbour");

    let cfg = Config { recreate_redundancy: true, ..cfg };
    let st = Redundancy::new(&cfg).ensure(&f).unwrap();
    assert_eq!(st.creation, Creation::Created);
    assert_eq!(fs::read_to_string(&neighbour).unwrap(), "neighbour");
    assert!(recovery_path(&f).is_file());
}
