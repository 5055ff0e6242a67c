//! Archive extraction and sanitising

#![cfg(feature = "archive")]

use modmigrate::archive::{DOCUMENT_NAME, README_NAME};
use modmigrate::config::ImportConfig;
use modmigrate::import::{ArchiveUnpacker, ImportError};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

fn build_zip(path: &Path, entries: &[(&str, &[u8])]) {
    let mut zip = zip::ZipWriter::new(std::fs::File::create(path).unwrap());
    for (name, data) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(data).unwrap();
    }
    zip.finish().unwrap();
}

#[test]
fn test_unpack_removes_disallowed_files_only() {
    let temp = TempDir::new().unwrap();
    let upload = temp.path().join("module.zip");
    build_zip(
        &upload,
        &[
            (DOCUMENT_NAME, b"<archive/>"),
            (README_NAME, b"readme"),
            ("2024/05/photo.jpg", b"jpeg"),
            ("2024/05/handout.pdf", b"pdf"),
            ("2024/05/shell.php", b"<?php"),
            ("tools/run.exe", b"MZ"),
            ("2024/05/.htaccess", b"deny"),
        ],
    );

    let dest = temp.path().join("run");
    let unpacked = ArchiveUnpacker::new(&ImportConfig::default())
        .unpack(&upload, &dest)
        .unwrap();

    assert_eq!(unpacked.files_extracted, 7);
    let mut removed = unpacked.files_removed.clone();
    removed.sort();
    assert_eq!(
        removed,
        vec![
            PathBuf::from("2024/05/.htaccess"),
            PathBuf::from("2024/05/shell.php"),
            PathBuf::from("tools/run.exe"),
        ]
    );
    assert!(dest.join(DOCUMENT_NAME).is_file());
    assert!(dest.join(README_NAME).is_file());
    assert!(dest.join("2024/05/photo.jpg").is_file());
    assert!(dest.join("2024/05/handout.pdf").is_file());
    assert!(!dest.join("2024/05/shell.php").exists());
    assert_eq!(unpacked.readme, Some(dest.join(README_NAME)));
}

#[test]
fn test_unpack_requires_document() {
    let temp = TempDir::new().unwrap();
    let upload = temp.path().join("module.zip");
    build_zip(&upload, &[("2024/05/photo.jpg", b"jpeg")]);

    let err = ArchiveUnpacker::new(&ImportConfig::default())
        .unpack(&upload, &temp.path().join("run"))
        .unwrap_err();
    assert!(matches!(err, ImportError::InvalidFormat(_)));
}

#[test]
fn test_failed_extraction_leaves_no_disallowed_files() {
    let temp = TempDir::new().unwrap();
    let upload = temp.path().join("module.zip");
    let photo: &[u8] = b"photo bytes that get damaged in transit";
    {
        let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let mut zip = zip::ZipWriter::new(std::fs::File::create(&upload).unwrap());
        for (name, data) in [
            (DOCUMENT_NAME, &b"<archive/>"[..]),
            ("2024/05/shell.php", &b"<?php"[..]),
            ("2024/05/photo.jpg", photo),
        ] {
            zip.start_file(name, stored).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    // Flip one byte of the stored photo so its checksum no longer matches
    let mut bytes = std::fs::read(&upload).unwrap();
    let at = bytes
        .windows(photo.len())
        .position(|w| w == photo)
        .unwrap();
    bytes[at] ^= 0xff;
    std::fs::write(&upload, bytes).unwrap();

    let dest = temp.path().join("run");
    let err = ArchiveUnpacker::new(&ImportConfig::default())
        .unpack(&upload, &dest)
        .unwrap_err();
    assert!(matches!(err, ImportError::CorruptArchive(_)), "{:?}", err);
    assert!(!dest.join("2024/05/shell.php").exists());
}
