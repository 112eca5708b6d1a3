use std::fs;
use std::path::PathBuf;
use tholos_core::scan::{list_files, ListOptions};
use tholos_core::{Config, Error};

fn tree() -> tempfile::TempDir {
    let td = tempfile::tempdir().unwrap();
    let r = td.path();
    fs::create_dir_all(r.join("roms/nes")).unwrap();
    for p in ["top.7z", "top.7z.rscf", "top.7z.par2", "roms/a.7z", "roms/nes/b.7z", "roms/nes/readme.txt"] {
        fs::write(r.join(p), p).unwrap();
    }
    td
}

fn rel(td: &tempfile::TempDir, opts: &ListOptions) -> Vec<PathBuf> {
    list_files(td.path(), opts)
        .unwrap()
        .into_iter()
        .map(|f| f.path.strip_prefix(td.path()).unwrap().to_path_buf())
        .collect()
}

#[test]
fn default_listing_skips_sidecars_and_recovery_files() {
    let td = tree();
    let got = rel(&td, &ListOptions::default());
    let want: Vec<PathBuf> =
        ["roms/a.7z", "roms/nes/b.7z", "roms/nes/readme.txt", "top.7z"].iter().map(PathBuf::from).collect();
    assert_eq!(got, want);
}

#[test]
fn include_glob_is_relative_to_root() {
    let td = tree();
    let opts = ListOptions { include_glob: "roms/**/*.7z".into(), ..ListOptions::default() };
    let got = rel(&td, &opts);
    assert_eq!(got, vec![PathBuf::from("roms/a.7z"), PathBuf::from("roms/nes/b.7z")]);
}

#[test]
fn non_recursive_stays_at_top_level() {
    let td = tree();
    let opts = ListOptions { recursive: false, ..ListOptions::default() };
    assert_eq!(rel(&td, &opts), vec![PathBuf::from("top.7z")]);
}

#[test]
fn records_carry_stat_fields() {
    let td = tree();
    let files = list_files(td.path(), &ListOptions::default()).unwrap();
    let top = files.iter().find(|f| f.path.ends_with("top.7z")).unwrap();
    assert_eq!(top.size, "top.7z".len() as u64);
    assert!(top.mtime_ns > 0);
}

#[test]
fn root_must_be_a_directory() {
    let td = tree();
    let err = list_files(&td.path().join("top.7z"), &ListOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Precondition(_)));
}

#[test]
fn bad_glob_is_reported() {
    let td = tree();
    let opts = ListOptions { include_glob: "roms/[".into(), ..ListOptions::default() };
    assert!(matches!(list_files(td.path(), &opts), Err(Error::Glob(_))));
}

#[test]
fn custom_sidecar_extension_is_never_listed() {
    let td = tempfile::tempdir().unwrap();
    fs::write(td.path().join("a.7z"), "a").unwrap();
    fs::write(td.path().join("a.7z.side"), "s").unwrap();
    let cfg = Config { sidecar_extension: "side".into(), ..Config::default() };
    assert_eq!(rel(&td, &ListOptions::from(&cfg)), vec![PathBuf::from("a.7z")]);
}
