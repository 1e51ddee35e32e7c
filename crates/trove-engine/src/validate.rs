//! Record content validation and content-merge helpers.

use std::collections::{BTreeMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use sha2::{Digest, Sha256};
use trove_log::merkle;
use trove_types::{
    ContentError, ContentErrorCode, File, MetadataStream, RecordMetadata, State, Status, Token,
};

use crate::mime;

/// Verify that all provided metadata streams are sane: every field present,
/// no duplicate `(plugin_id, stream_id)` pairs.
pub(crate) fn metadata_streams_verify(streams: &[MetadataStream]) -> Result<(), ContentError> {
    let mut seen: HashSet<(String, u32)> = HashSet::with_capacity(streams.len());
    for (i, stream) in streams.iter().enumerate() {
        if stream.plugin_id.is_empty() {
            return Err(ContentError::new(
                ContentErrorCode::MetadataStreamInvalid,
                format!("plugin id missing at index {i}"),
            ));
        }
        if stream.stream_id == 0 {
            return Err(ContentError::new(
                ContentErrorCode::MetadataStreamInvalid,
                format!("stream id missing at index {i}"),
            ));
        }
        if stream.payload.is_empty() {
            return Err(ContentError::new(
                ContentErrorCode::MetadataStreamInvalid,
                format!("payload missing on {} {}", stream.plugin_id, stream.stream_id),
            ));
        }
        if !seen.insert((stream.plugin_id.clone(), stream.stream_id)) {
            return Err(ContentError::new(
                ContentErrorCode::MetadataStreamDuplicate,
                format!("{} {}", stream.plugin_id, stream.stream_id),
            ));
        }
    }
    Ok(())
}

/// Merge the current streams with appends and overwrites.
///
/// Overwrites replace the stream payload; appends concatenate onto it (or
/// become the full stream when none exists yet). Returns streams sorted by
/// `(plugin_id, stream_id)`.
pub(crate) fn metadata_streams_update(
    curr: &[MetadataStream],
    md_append: &[MetadataStream],
    md_overwrite: &[MetadataStream],
) -> Vec<MetadataStream> {
    let mut merged: BTreeMap<(String, u32), MetadataStream> = curr
        .iter()
        .map(|s| ((s.plugin_id.clone(), s.stream_id), s.clone()))
        .collect();

    for stream in md_overwrite {
        merged.insert((stream.plugin_id.clone(), stream.stream_id), stream.clone());
    }

    for stream in md_append {
        merged
            .entry((stream.plugin_id.clone(), stream.stream_id))
            .and_modify(|existing| existing.payload.push_str(&stream.payload))
            .or_insert_with(|| stream.clone());
    }

    merged.into_values().collect()
}

/// Whether a file name is its own sanitized basename.
fn filename_is_clean(name: &str) -> bool {
    if name.is_empty() || name == "." || name == ".." {
        return false;
    }
    if name.contains('/') || name.contains('\\') {
        return false;
    }
    if name.starts_with(['.', ' ']) || name.ends_with(['.', ' ']) {
        return false;
    }
    name.chars()
        .all(|c| !c.is_control() && !matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*'))
}

/// Verify that all provided file adds and deletes are sane.
pub(crate) fn files_verify(files: &[File], files_del: &[String]) -> Result<(), ContentError> {
    if files.is_empty() && files_del.is_empty() {
        return Err(ContentError::new(ContentErrorCode::FilesEmpty, ""));
    }

    // Names must be clean basenames, unique across adds and deletes.
    let mut names: HashSet<&str> = HashSet::with_capacity(files.len() + files_del.len());
    for name in files.iter().map(|f| f.name.as_str()).chain(files_del.iter().map(String::as_str)) {
        if !filename_is_clean(name) {
            return Err(ContentError::new(
                ContentErrorCode::FileNameInvalid,
                format!("{name} is not a sanitized file name"),
            ));
        }
        if !names.insert(name) {
            return Err(ContentError::new(
                ContentErrorCode::FileNameDuplicate,
                name,
            ));
        }
    }

    for file in files {
        let digest = match hex::decode(&file.digest) {
            Ok(d) if d.len() == 32 => d,
            _ => {
                return Err(ContentError::new(
                    ContentErrorCode::FileDigestInvalid,
                    &file.name,
                ))
            }
        };

        if file.payload.is_empty() {
            return Err(ContentError::new(
                ContentErrorCode::FilePayloadInvalid,
                format!("{} payload empty", file.name),
            ));
        }
        let payload = BASE64.decode(&file.payload).map_err(|_| {
            ContentError::new(
                ContentErrorCode::FilePayloadInvalid,
                format!("{} invalid base64", file.name),
            )
        })?;

        let computed = Sha256::digest(&payload);
        if computed.as_slice() != digest.as_slice() {
            return Err(ContentError::new(
                ContentErrorCode::FileDigestInvalid,
                format!(
                    "{} digest got {}, want {}",
                    file.name,
                    file.digest,
                    hex::encode(computed)
                ),
            ));
        }

        let detected = mime::detect_mime(&payload);
        if detected != file.mime {
            return Err(ContentError::new(
                ContentErrorCode::FileMimeInvalid,
                format!("{} mime got {}, want {detected}", file.name, file.mime),
            ));
        }
        if !mime::mime_valid(&file.mime) {
            return Err(ContentError::new(
                ContentErrorCode::FileMimeUnsupported,
                &file.name,
            ));
        }
    }

    Ok(())
}

/// Apply file deletes then adds to the current file set. Adds replace
/// same-name files. Returns files sorted by name.
pub(crate) fn files_update(curr: &[File], files_add: &[File], files_del: &[String]) -> Vec<File> {
    let mut merged: BTreeMap<String, File> = curr
        .iter()
        .map(|f| (f.name.clone(), f.clone()))
        .collect();

    for name in files_del {
        merged.remove(name);
    }
    for file in files_add {
        merged.insert(file.name.clone(), file.clone());
    }

    merged.into_values().collect()
}

/// Build the record metadata for a new iteration.
///
/// The merkle field is the root over the record's file digests, hex-sorted
/// so the root is independent of file order.
pub fn record_metadata_new(
    token: &Token,
    files: &[File],
    state: State,
    status: Status,
    version: u32,
    iteration: u32,
) -> RecordMetadata {
    let mut digests: Vec<String> = files.iter().map(|f| f.digest.clone()).collect();
    digests.sort();
    let leaves: Vec<Vec<u8>> = digests
        .iter()
        .filter_map(|d| hex::decode(d).ok())
        .collect();

    RecordMetadata {
        token: token.to_string(),
        version,
        iteration,
        state,
        status,
        timestamp: unix_now(),
        merkle: hex::encode(merkle::merkle_root(&leaves)),
    }
}

/// Current unix time in seconds.
pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(plugin_id: &str, stream_id: u32, payload: &str) -> MetadataStream {
        MetadataStream {
            plugin_id: plugin_id.to_string(),
            stream_id,
            payload: payload.to_string(),
        }
    }

    fn text_file(name: &str, contents: &str) -> File {
        File {
            name: name.to_string(),
            mime: mime::MIME_TEXT.to_string(),
            digest: hex::encode(Sha256::digest(contents.as_bytes())),
            payload: BASE64.encode(contents.as_bytes()),
        }
    }

    // -----------------------------------------------------------------------
    // Metadata streams
    // -----------------------------------------------------------------------

    #[test]
    fn test_streams_verify_ok() {
        let streams = vec![stream("usermd", 1, "{}\n"), stream("usermd", 2, "{}\n")];
        metadata_streams_verify(&streams).unwrap();
    }

    #[test]
    fn test_streams_verify_missing_fields() {
        for bad in [stream("", 1, "{}"), stream("p", 0, "{}"), stream("p", 1, "")] {
            let err = metadata_streams_verify(&[bad]).unwrap_err();
            assert_eq!(err.code, ContentErrorCode::MetadataStreamInvalid);
        }
    }

    #[test]
    fn test_streams_verify_duplicate() {
        let streams = vec![stream("p", 1, "a"), stream("p", 1, "b")];
        let err = metadata_streams_verify(&streams).unwrap_err();
        assert_eq!(err.code, ContentErrorCode::MetadataStreamDuplicate);
    }

    #[test]
    fn test_streams_update_overwrite_and_append() {
        let curr = vec![stream("p", 1, "one\n"), stream("p", 2, "x\n")];
        let merged = metadata_streams_update(
            &curr,
            &[stream("p", 1, "two\n"), stream("q", 1, "new\n")],
            &[stream("p", 2, "replaced\n")],
        );

        let get = |pid: &str, sid: u32| {
            merged
                .iter()
                .find(|s| s.plugin_id == pid && s.stream_id == sid)
                .unwrap()
                .payload
                .clone()
        };
        assert_eq!(get("p", 1), "one\ntwo\n", "append concatenates");
        assert_eq!(get("p", 2), "replaced\n", "overwrite replaces");
        assert_eq!(get("q", 1), "new\n", "append creates missing stream");
    }

    // -----------------------------------------------------------------------
    // Files
    // -----------------------------------------------------------------------

    #[test]
    fn test_files_verify_ok() {
        files_verify(&[text_file("index.md", "# hello")], &[]).unwrap();
    }

    #[test]
    fn test_files_verify_empty() {
        let err = files_verify(&[], &[]).unwrap_err();
        assert_eq!(err.code, ContentErrorCode::FilesEmpty);
    }

    #[test]
    fn test_files_verify_rejects_paths() {
        let mut f = text_file("a.md", "x");
        f.name = "../a.md".to_string();
        let err = files_verify(&[f], &[]).unwrap_err();
        assert_eq!(err.code, ContentErrorCode::FileNameInvalid);

        let err = files_verify(&[], &["dir/b.md".to_string()]).unwrap_err();
        assert_eq!(err.code, ContentErrorCode::FileNameInvalid);
    }

    #[test]
    fn test_files_verify_rejects_duplicates() {
        let err = files_verify(&[text_file("a.md", "x"), text_file("a.md", "y")], &[]).unwrap_err();
        assert_eq!(err.code, ContentErrorCode::FileNameDuplicate);

        let err = files_verify(&[text_file("a.md", "x")], &["a.md".to_string()]).unwrap_err();
        assert_eq!(err.code, ContentErrorCode::FileNameDuplicate);
    }

    #[test]
    fn test_files_verify_digest_mismatch() {
        let mut f = text_file("a.md", "contents");
        f.digest = hex::encode(Sha256::digest(b"other" as &[u8]));
        let err = files_verify(&[f], &[]).unwrap_err();
        assert_eq!(err.code, ContentErrorCode::FileDigestInvalid);
    }

    #[test]
    fn test_files_verify_bad_base64() {
        let mut f = text_file("a.md", "contents");
        f.payload = "not base64!!!".to_string();
        let err = files_verify(&[f], &[]).unwrap_err();
        assert_eq!(err.code, ContentErrorCode::FilePayloadInvalid);
    }

    #[test]
    fn test_files_verify_mime_mismatch() {
        let mut f = text_file("a.md", "contents");
        f.mime = "image/png".to_string();
        let err = files_verify(&[f], &[]).unwrap_err();
        assert_eq!(err.code, ContentErrorCode::FileMimeInvalid);
    }

    #[test]
    fn test_files_verify_mime_unsupported() {
        // A real PDF payload detects as application/pdf, which is not in
        // the allowed set.
        let payload = b"%PDF-1.4 fake".to_vec();
        let f = File {
            name: "doc.pdf".to_string(),
            mime: "application/pdf".to_string(),
            digest: hex::encode(Sha256::digest(&payload)),
            payload: BASE64.encode(&payload),
        };
        let err = files_verify(&[f], &[]).unwrap_err();
        assert_eq!(err.code, ContentErrorCode::FileMimeUnsupported);
    }

    #[test]
    fn test_files_update_add_replace_delete() {
        let curr = vec![text_file("a.md", "one"), text_file("b.md", "two")];
        let updated = files_update(
            &curr,
            &[text_file("a.md", "replaced"), text_file("c.md", "three")],
            &["b.md".to_string()],
        );

        let names: Vec<&str> = updated.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a.md", "c.md"]);
        assert_eq!(
            updated[0].digest,
            hex::encode(Sha256::digest(b"replaced" as &[u8]))
        );
    }

    // -----------------------------------------------------------------------
    // Record metadata
    // -----------------------------------------------------------------------

    #[test]
    fn test_record_metadata_merkle_order_independent() {
        let token = Token::from([1u8; 32]);
        let a = text_file("a.md", "one");
        let b = text_file("b.md", "two");

        let rm1 = record_metadata_new(
            &token,
            &[a.clone(), b.clone()],
            State::Unvetted,
            Status::Unreviewed,
            1,
            1,
        );
        let rm2 = record_metadata_new(&token, &[b, a], State::Unvetted, Status::Unreviewed, 1, 1);
        assert_eq!(rm1.merkle, rm2.merkle);
    }

    #[test]
    fn test_record_metadata_merkle_changes_with_files() {
        let token = Token::from([1u8; 32]);
        let rm1 = record_metadata_new(
            &token,
            &[text_file("a.md", "one")],
            State::Unvetted,
            Status::Unreviewed,
            1,
            1,
        );
        let rm2 = record_metadata_new(
            &token,
            &[text_file("a.md", "two")],
            State::Unvetted,
            Status::Unreviewed,
            2,
            2,
        );
        assert_ne!(rm1.merkle, rm2.merkle);
    }
}
