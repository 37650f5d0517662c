//! Controller-side sender state for a single in-flight file push. Grounded on
//! `Server/tcpserver.cpp`'s `continueFileTransfer`, which re-queues itself
//! after every 64 KiB chunk instead of looping synchronously.

use crate::config::FILE_CHUNK_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TransferStage {
    AwaitingStartAck,
    Streaming,
    Finalizing,
}

/// A file read fully into memory (matching the original's full-buffer
/// approach, see Design Notes) plus a send cursor.
#[derive(Debug)]
pub(crate) struct ActiveTransfer {
    pub(crate) stage: TransferStage,
    pub(crate) file_name: String,
    pub(crate) install_args: String,
    data: Vec<u8>,
    sent: usize,
}

impl ActiveTransfer {
    pub(crate) fn new(file_name: String, install_args: String, data: Vec<u8>) -> Self {
        Self {
            stage: TransferStage::AwaitingStartAck,
            file_name,
            install_args,
            data,
            sent: 0,
        }
    }

    pub(crate) fn file_size(&self) -> u64 {
        self.data.len() as u64
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.sent >= self.data.len()
    }

    /// Returns the next chunk to send and advances the cursor. Panics if
    /// called after completion; callers must check `is_complete` first.
    pub(crate) fn next_chunk(&mut self) -> &[u8] {
        let end = (self.sent + FILE_CHUNK_SIZE).min(self.data.len());
        let chunk = &self.data[self.sent..end];
        self.sent = end;
        chunk
    }

    pub(crate) fn percent(&self) -> u8 {
        if self.data.is_empty() {
            100
        } else {
            ((self.sent as u64 * 100) / self.data.len() as u64) as u8
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_cover_the_whole_file_without_overlap() {
        let data = vec![7u8; FILE_CHUNK_SIZE + 10];
        let mut transfer = ActiveTransfer::new("pkg.msi".into(), "/quiet".into(), data.clone());
        let mut collected = Vec::new();
        while !transfer.is_complete() {
            collected.extend_from_slice(transfer.next_chunk());
        }
        assert_eq!(collected, data);
    }

    #[test]
    fn percent_reaches_100_on_completion() {
        let mut transfer = ActiveTransfer::new("pkg.msi".into(), String::new(), vec![1, 2, 3, 4]);
        assert_eq!(transfer.percent(), 0);
        transfer.next_chunk();
        assert_eq!(transfer.percent(), 100);
    }

    #[test]
    fn empty_file_reports_complete_immediately() {
        let transfer = ActiveTransfer::new("empty.bin".into(), String::new(), Vec::new());
        assert!(transfer.is_complete());
        assert_eq!(transfer.percent(), 100);
    }
}
