//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::io::{Cursor, Write};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Build a zip archive in memory; `None` content makes a directory entry
pub fn build_zip(entries: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
    build_zip_with(entries, CompressionMethod::Deflated)
}

/// Like `build_zip`, with file bodies kept verbatim so tests can tamper with them
pub fn build_stored_zip(entries: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
    build_zip_with(entries, CompressionMethod::Stored)
}

fn build_zip_with(entries: &[(&str, Option<&[u8]>)], method: CompressionMethod) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = ZipWriter::new(&mut cursor);
        let options = SimpleFileOptions::default().compression_method(method);
        for (name, content) in entries {
            match content {
                Some(bytes) => {
                    writer.start_file(*name, options).unwrap();
                    writer.write_all(bytes).unwrap();
                }
                None => {
                    writer.add_directory(*name, options).unwrap();
                }
            }
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

/// A deployable bundle with a nested directory tree
pub fn complete_bundle() -> Vec<u8> {
    build_zip(&[
        ("appjail-director.yml", Some(b"options:\n  - alias:\nservices:\n  web:\n    name: web\n")),
        ("info.json", Some(b"{\"description\": \"nginx site\"}")),
        ("web/", None),
        ("web/Makejail", Some(b"INCLUDE gh+AppJail-makejails/nginx\n")),
        ("web/files/", None),
        ("web/files/nginx.conf", Some(b"worker_processes 1;\n")),
        ("empty/", None),
    ])
}

/// Replace every occurrence of `from` with `to`; both must be the same length
pub fn patch_bytes(bytes: &mut [u8], from: &[u8], to: &[u8]) {
    assert_eq!(from.len(), to.len());
    let mut start = 0;
    while let Some(pos) = bytes[start..].windows(from.len()).position(|w| w == from) {
        let at = start + pos;
        bytes[at..at + to.len()].copy_from_slice(to);
        start = at + to.len();
    }
}
