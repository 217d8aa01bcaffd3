//! Shared helpers for unit tests: fake executables and archives.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use bzip2::write::BzEncoder;
use bzip2::Compression;

/// Writes an executable shell script standing in for an external tool.
pub fn write_script(path: &Path, body: &str) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, format!("#!/bin/bash\n{}\n", body)).unwrap();

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    path.to_path_buf()
}

/// A fake tool that answers `--version` with `version`.
pub fn write_versioned_tool(path: &Path, version: &str) -> PathBuf {
    write_script(
        path,
        &format!(
            "if [ \"$1\" = \"--version\" ]; then echo {}; exit 0; fi\nexit 0",
            version
        ),
    )
}

/// Builds an in-memory `.tar.bz2` holding the given `(entry, contents)` pairs.
pub fn tar_bz2(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let encoder = BzEncoder::new(Vec::new(), Compression::fast());
    let mut builder = tar::Builder::new(encoder);

    for (name, contents) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *contents).unwrap();
    }

    let mut encoder = builder.into_inner().unwrap();
    encoder.flush().unwrap();
    encoder.finish().unwrap()
}
