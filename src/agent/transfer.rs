//! Agent-side receive state for a single in-flight file pull. Grounded on
//! `Client/agent.cpp`'s `handleFileTransferStart/Data/End`.

use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::error::TransferError;

const PROGRESS_GRANULARITY_BYTES: u64 = 1024 * 1024;

pub(crate) struct ReceivingFile {
    pub(crate) path: PathBuf,
    pub(crate) install_args: String,
    file: File,
    expected_size: u64,
    received_size: u64,
    last_reported_unit: u64,
}

impl ReceivingFile {
    pub(crate) async fn create(
        path: PathBuf,
        expected_size: u64,
        install_args: String,
    ) -> Result<Self, TransferError> {
        let file = File::create(&path)
            .await
            .map_err(TransferError::DestinationOpenFailed)?;
        Ok(Self {
            path,
            install_args,
            file,
            expected_size,
            received_size: 0,
            last_reported_unit: 0,
        })
    }

    pub(crate) async fn write_chunk(&mut self, bytes: &[u8]) -> Result<(), TransferError> {
        self.file
            .write_all(bytes)
            .await
            .map_err(TransferError::WriteFailed)?;
        self.received_size += bytes.len() as u64;
        Ok(())
    }

    pub(crate) fn received_size(&self) -> u64 {
        self.received_size
    }

    pub(crate) fn expected_size(&self) -> u64 {
        self.expected_size
    }

    pub(crate) fn is_size_match(&self) -> bool {
        self.received_size == self.expected_size
    }

    /// Returns a progress percentage the first time `received_size` crosses
    /// another 1 MiB boundary since the last report, `None` otherwise.
    pub(crate) fn progress_on_boundary_cross(&mut self) -> Option<u8> {
        let unit = self.received_size / PROGRESS_GRANULARITY_BYTES;
        if unit > self.last_reported_unit || self.is_size_match() {
            self.last_reported_unit = unit;
            let percent = if self.expected_size == 0 {
                100
            } else {
                ((self.received_size * 100) / self.expected_size) as u8
            };
            Some(percent)
        } else {
            None
        }
    }

    pub(crate) async fn finish(mut self) -> Result<(), TransferError> {
        self.file.flush().await.map_err(TransferError::WriteFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_chunk_tracks_received_size() {
        let path = std::env::temp_dir().join("lanmgr-test-write-chunk.bin");
        let mut receiving = ReceivingFile::create(path.clone(), 6, String::new())
            .await
            .unwrap();
        receiving.write_chunk(b"abc").await.unwrap();
        receiving.write_chunk(b"def").await.unwrap();
        assert_eq!(receiving.received_size(), 6);
        assert!(receiving.is_size_match());
        receiving.finish().await.unwrap();
        let _ = tokio::fs::remove_file(&path).await;
    }

    #[tokio::test]
    async fn progress_reports_once_per_mib_boundary() {
        let path = std::env::temp_dir().join("lanmgr-test-progress.bin");
        let expected = PROGRESS_GRANULARITY_BYTES * 2;
        let mut receiving = ReceivingFile::create(path.clone(), expected, String::new())
            .await
            .unwrap();

        let half_mib = vec![0u8; (PROGRESS_GRANULARITY_BYTES / 2) as usize];
        receiving.write_chunk(&half_mib).await.unwrap();
        assert_eq!(receiving.progress_on_boundary_cross(), None);

        receiving.write_chunk(&half_mib).await.unwrap();
        assert_eq!(receiving.progress_on_boundary_cross(), Some(50));

        receiving.finish().await.unwrap();
        let _ = tokio::fs::remove_file(&path).await;
    }
}
