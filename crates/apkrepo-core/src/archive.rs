//! Index archive codec.
//!
//! An index archive is a gzip compressed tar with a single `APKINDEX` text
//! member. `abuild-sign` prepends a second gzip stream holding the signature
//! member, so reading goes through a multi-member decoder and tolerates the
//! zero blocks between the two tar segments.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use apkrepo_schema::INDEX_MEMBER_NAME;
use flate2::Compression;
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;

use crate::error::{IndexError, IndexResult};

/// Read the `APKINDEX` member of the archive at `archive_path`.
///
/// # Errors
///
/// Returns [`IndexError::CorruptArchive`] if the file cannot be opened, is not
/// a gzip tar, has no `APKINDEX` member or the member is not UTF-8.
pub fn extract_text(archive_path: &Path) -> IndexResult<String> {
    let corrupt = |reason: String| IndexError::corrupt(archive_path, reason);

    let file = File::open(archive_path).map_err(|e| corrupt(format!("cannot open: {e}")))?;
    let mut archive = tar::Archive::new(MultiGzDecoder::new(BufReader::new(file)));
    archive.set_ignore_zeros(true);

    let entries = archive
        .entries()
        .map_err(|e| corrupt(format!("cannot read tar stream: {e}")))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| corrupt(format!("bad tar entry: {e}")))?;
        let is_index = entry
            .path()
            .is_ok_and(|p| &*p == Path::new(INDEX_MEMBER_NAME));
        if !is_index {
            continue;
        }

        // The header size is untrusted; let the buffer grow with the data.
        let declared = entry.size();
        let mut bytes = Vec::new();
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| corrupt(format!("truncated {INDEX_MEMBER_NAME} member: {e}")))?;
        if bytes.len() as u64 != declared {
            return Err(corrupt(format!(
                "truncated {INDEX_MEMBER_NAME} member: {} of {declared} bytes",
                bytes.len()
            )));
        }
        return String::from_utf8(bytes)
            .map_err(|e| corrupt(format!("{INDEX_MEMBER_NAME} is not valid UTF-8: {e}")));
    }

    Err(corrupt(format!("no {INDEX_MEMBER_NAME} member")))
}

/// Atomically replace `archive_path` with an archive holding `text`.
///
/// The archive is written to a temporary file in the same directory, synced,
/// and renamed over the destination. On any error the destination is left as
/// it was and the temporary file is removed.
///
/// # Errors
///
/// Returns [`IndexError::Io`] if the temporary file cannot be created,
/// written, synced or renamed.
pub fn write_text(archive_path: &Path, text: &str) -> IndexResult<()> {
    let dir = archive_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));

    let tmp = tempfile::Builder::new()
        .prefix(".APKINDEX-")
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|e| IndexError::io(format!("create temp archive in {}", dir.display()), e))?;

    encode(tmp.as_file(), text.as_bytes())
        .map_err(|e| IndexError::io(format!("write {}", tmp.path().display()), e))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o644))
            .map_err(|e| IndexError::io(format!("chmod {}", tmp.path().display()), e))?;
    }

    tmp.as_file()
        .sync_all()
        .map_err(|e| IndexError::io(format!("fsync {}", tmp.path().display()), e))?;

    tmp.persist(archive_path)
        .map_err(|e| IndexError::io(format!("replace {}", archive_path.display()), e.error))?;

    // Best effort: the rename is already visible, only its durability is at stake.
    if let Ok(dir) = File::open(dir) {
        let _ = dir.sync_all();
    }

    Ok(())
}

fn encode(file: &File, data: &[u8]) -> std::io::Result<()> {
    let gz = GzEncoder::new(BufWriter::new(file), Compression::default());
    let mut builder = tar::Builder::new(gz);

    let mut header = tar::Header::new_ustar();
    header.set_entry_type(tar::EntryType::Regular);
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs()),
    );
    builder.append_data(&mut header, INDEX_MEMBER_NAME, data)?;

    let gz = builder.into_inner()?;
    let mut writer = gz.finish()?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const SAMPLE: &str = "C:Q1abc=\nP:musl\nV:1.2.4-r2\nA:x86_64\n\nC:Q1def=\nP:busybox\nV:1.36.1-r5\nA:x86_64\n\n";

    #[test]
    fn test_round_trip_preserves_blank_lines() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("APKINDEX.tar.gz");

        write_text(&path, SAMPLE).unwrap();
        assert_eq!(extract_text(&path).unwrap(), SAMPLE);

        let odd = "\n\nP:ünïcødé\n\n\n\nP:tail";
        write_text(&path, odd).unwrap();
        assert_eq!(extract_text(&path).unwrap(), odd);
    }

    #[test]
    fn test_empty_text_round_trips() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("APKINDEX.tar.gz");
        write_text(&path, "").unwrap();
        assert_eq!(extract_text(&path).unwrap(), "");
    }

    #[test]
    fn test_member_size_is_encoded_length() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("APKINDEX.tar.gz");
        let text = "P:naïve-€\n";
        write_text(&path, text).unwrap();

        let file = File::open(&path).unwrap();
        let mut archive = tar::Archive::new(MultiGzDecoder::new(file));
        let entries: Vec<_> = archive.entries().unwrap().map(Result::unwrap).collect::<Vec<_>>();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path().unwrap().to_str(), Some(INDEX_MEMBER_NAME));
        assert_eq!(entries[0].size(), text.len() as u64);
        assert!(text.len() > text.chars().count());
    }

    #[test]
    fn test_reads_signed_archive() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("APKINDEX.tar.gz");
        write_text(&path, SAMPLE).unwrap();
        let unsigned = std::fs::read(&path).unwrap();

        // Signature segment the way abuild-sign builds it: a tar without the
        // end-of-archive blocks, gzipped on its own and prepended.
        let mut sig_tar = tar::Builder::new(Vec::new());
        let payload = b"not a real signature";
        let mut header = tar::Header::new_ustar();
        header.set_size(payload.len() as u64);
        header.set_mode(0o644);
        sig_tar
            .append_data(&mut header, ".SIGN.RSA.test.rsa.pub", &payload[..])
            .unwrap();
        let mut sig_bytes = sig_tar.into_inner().unwrap();
        sig_bytes.truncate(sig_bytes.len() - 1024);

        let mut gz = GzEncoder::new(Vec::new(), Compression::default());
        gz.write_all(&sig_bytes).unwrap();
        let mut signed = gz.finish().unwrap();
        signed.extend_from_slice(&unsigned);
        std::fs::write(&path, signed).unwrap();

        assert_eq!(extract_text(&path).unwrap(), SAMPLE);
    }

    #[test]
    fn test_missing_member_is_corrupt() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("APKINDEX.tar.gz");

        let mut builder = tar::Builder::new(GzEncoder::new(
            File::create(&path).unwrap(),
            Compression::default(),
        ));
        let mut header = tar::Header::new_ustar();
        header.set_size(3);
        builder.append_data(&mut header, "DESCRIPTION", &b"abc"[..]).unwrap();
        builder.into_inner().unwrap().finish().unwrap();

        let err = extract_text(&path).unwrap_err();
        assert!(matches!(err, IndexError::CorruptArchive { .. }), "{err}");
    }

    #[test]
    fn test_oversized_member_header_is_corrupt() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("APKINDEX.tar.gz");

        let mut header = tar::Header::new_gnu();
        header.set_path(INDEX_MEMBER_NAME).unwrap();
        header.set_mode(0o644);
        header.set_size(1 << 62);
        header.set_cksum();

        let mut gz = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        gz.write_all(header.as_bytes()).unwrap();
        gz.write_all(b"P:a\n").unwrap();
        gz.finish().unwrap();

        let err = extract_text(&path).unwrap_err();
        assert!(matches!(err, IndexError::CorruptArchive { .. }), "{err}");
        assert!(err.to_string().contains("truncated"), "{err}");
    }

    #[test]
    fn test_garbage_and_missing_files_are_corrupt() {
        let tmp = tempdir().unwrap();
        let garbage = tmp.path().join("garbage.tar.gz");
        std::fs::write(&garbage, b"definitely not gzip").unwrap();
        assert!(matches!(
            extract_text(&garbage),
            Err(IndexError::CorruptArchive { .. })
        ));
        assert!(matches!(
            extract_text(&tmp.path().join("absent.tar.gz")),
            Err(IndexError::CorruptArchive { .. })
        ));
    }

    #[test]
    fn test_failed_replace_leaves_destination_and_no_temp_files() {
        let tmp = tempdir().unwrap();
        // A non-empty directory cannot be replaced by a file.
        let path = tmp.path().join("APKINDEX.tar.gz");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), b"x").unwrap();

        let err = write_text(&path, SAMPLE).unwrap_err();
        assert!(matches!(err, IndexError::Io { .. }), "{err}");
        assert!(path.join("keep").is_file());

        let names: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("APKINDEX.tar.gz")]);
    }

    #[test]
    fn test_missing_parent_is_io_error() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("missing").join("APKINDEX.tar.gz");
        assert!(matches!(
            write_text(&path, SAMPLE),
            Err(IndexError::Io { .. })
        ));
        assert!(!path.exists());
    }
}
