#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tholos_core::{Blake3Backend, Config};

/// Config using in-process BLAKE3 and the given scratch directory.
pub fn native_config(scratch: &Path) -> Config {
    Config { scratch_dir: Some(scratch.to_path_buf()), blake3: Blake3Backend::Native, ..Config::default() }
}

/// Write an executable shell script standing in for an external tool.
#[cfg(unix)]
pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;
    let p = dir.join(name);
    std::fs::write(&p, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perm = std::fs::metadata(&p).unwrap().permissions();
    perm.set_mode(0o755);
    std::fs::set_permissions(&p, perm).unwrap();
    p
}

/// Fake 7z: `x -y -o<dir> <archive>` copies the archive to `rom.bin` and adds
/// a second member in a subdirectory.
#[cfg(unix)]
pub fn fake_7z(dir: &Path) -> PathBuf {
    script(
        dir,
        "fake7z",
        r#"out=""
for a in "$@"; do
  case "$a" in -o*) out="${a#-o}" ;; esac
  last="$a"
done
mkdir -p "$out/sub"
cp "$last" "$out/rom.bin"
printf 'track data' > "$out/sub/track01.bin""#,
    )
}

/// Fake 7z that leaves a partial member behind and fails.
#[cfg(unix)]
pub fn broken_7z(dir: &Path) -> PathBuf {
    script(
        dir,
        "broken7z",
        r#"for a in "$@"; do
  case "$a" in -o*) out="${a#-o}" ;; esac
done
mkdir -p "$out/half"
printf 'partial' > "$out/half/partial.bin"
echo "ERROR: Data Error in encrypted file" >&2
exit 2"#,
    )
}

/// Move the mtime of `path` by `secs` seconds without changing content.
pub fn touch_forward(path: &Path, secs: u64) {
    let f = std::fs::OpenOptions::new().write(true).open(path).unwrap();
    let now = std::fs::metadata(path).unwrap().modified().unwrap_or(SystemTime::now());
    f.set_modified(now + Duration::from_secs(secs)).unwrap();
}
