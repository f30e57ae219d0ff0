use std::io::{Cursor, Read};

use crate::error::ExtractError;

/// A job's full result bundle, downloaded once and indexed in memory.
///
/// The whole archive is pulled in a single GET; entries are then listed and
/// extracted lazily from the local index. No range requests are made against
/// the remote server.
#[derive(Debug)]
pub struct RemoteArchive {
    archive: zip::ZipArchive<Cursor<Vec<u8>>>,
}

impl RemoteArchive {
    /// Download `{base}/task/{job_id}/download/all.zip` and index it.
    pub async fn fetch(
        client: &reqwest::Client,
        base_url: &str,
        job_id: &str,
    ) -> Result<Self, ExtractError> {
        let url = format!("{}/task/{}/download/all.zip", base_url, job_id);

        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|e| ExtractError::RemoteUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::RemoteUnavailable(format!(
                "HTTP {} from {}",
                status, url
            )));
        }

        let body: bytes::Bytes = response
            .bytes()
            .await
            .map_err(|e| ExtractError::RemoteUnavailable(e.to_string()))?;

        tracing::debug!(job_id, bytes = body.len(), "Downloaded result archive");
        Self::from_bytes(body.to_vec())
    }

    /// Index an already-downloaded bundle.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ExtractError> {
        let archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| ExtractError::Decode(format!("unreadable archive: {}", e)))?;
        Ok(Self { archive })
    }

    /// Paths of every file entry in the bundle.
    pub fn entry_names(&self) -> Vec<String> {
        self.archive.file_names().map(|n| n.to_string()).collect()
    }

    /// Uncompressed size of one entry, if present.
    pub fn entry_size(&mut self, path: &str) -> Option<u64> {
        self.archive.by_name(path).ok().map(|entry| entry.size())
    }

    /// Extract one entry's bytes.
    pub fn read(&mut self, path: &str) -> Result<Vec<u8>, ExtractError> {
        let mut entry = self
            .archive
            .by_name(path)
            .map_err(|e| ExtractError::Decode(format!("cannot open {}: {}", path, e)))?;
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        entry
            .read_to_end(&mut bytes)
            .map_err(|e| ExtractError::Decode(format!("cannot extract {}: {}", path, e)))?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = zip::write::FileOptions::default();
        for (name, bytes) in entries {
            writer.start_file(*name, options).unwrap();
            writer.write_all(bytes).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn lists_and_reads_entries() {
        let bytes = make_zip(&[("a/x.txt", b"hello"), ("b/y.bin", &[1, 2, 3])]);
        let mut archive = RemoteArchive::from_bytes(bytes).unwrap();

        let mut names = archive.entry_names();
        names.sort();
        assert_eq!(names, vec!["a/x.txt", "b/y.bin"]);

        assert_eq!(archive.entry_size("a/x.txt"), Some(5));
        assert_eq!(archive.read("b/y.bin").unwrap(), vec![1, 2, 3]);
        assert!(archive.read("missing").is_err());
    }

    #[test]
    fn garbage_bytes_are_a_decode_failure() {
        let err = RemoteArchive::from_bytes(vec![0; 64]).unwrap_err();
        assert!(matches!(err, ExtractError::Decode(_)));
    }
}
