//! Error propagation from a medium that can be told to fail

use blockfile::{BlockFile, BlockFileConfig, BlockFileError, Medium, MediumReadError, MemMedium};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Wraps a `MemMedium` and fails on demand
#[derive(Clone, Default)]
struct FlakyMedium {
    inner: MemMedium,
    fail_writes: Arc<AtomicBool>,
    fail_reads: Arc<AtomicBool>,
    fail_close: Arc<AtomicBool>,
}

impl Medium for FlakyMedium {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), MediumReadError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, "read refused").into());
        }
        self.inner.read_at(offset, buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "disk full"));
        }
        self.inner.write_at(offset, data)
    }

    fn extent(&self) -> io::Result<u64> {
        self.inner.extent()
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn close(self) -> io::Result<()> {
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(io::Error::other("handle already gone"));
        }
        Ok(())
    }
}

fn flaky_file(block_length: u32) -> (BlockFile<FlakyMedium>, FlakyMedium) {
    let medium = FlakyMedium::default();
    let file = BlockFile::with_medium(medium.clone(), BlockFileConfig::new(block_length)).unwrap();
    (file, medium)
}

#[test]
fn test_write_failure_is_returned_verbatim() {
    let (file, medium) = flaky_file(4);
    medium.fail_writes.store(true, Ordering::SeqCst);

    match file.write(b"data") {
        Err(BlockFileError::StorageIo(e)) => {
            assert_eq!(e.kind(), io::ErrorKind::WriteZero);
            assert_eq!(e.to_string(), "disk full");
        }
        other => panic!("Expected StorageIo, got {other:?}"),
    }
    // The failed write still consumed its sequence number
    assert_eq!(file.write_sequence_number().unwrap(), 1);
    assert_eq!(file.written_blocks().unwrap(), 0);

    medium.fail_writes.store(false, Ordering::SeqCst);
    assert_eq!(file.write(b"next").unwrap(), 1);
}

#[test]
fn test_read_failure_is_not_retried() {
    let (file, medium) = flaky_file(4);
    file.write(b"data").unwrap();
    medium.fail_reads.store(true, Ordering::SeqCst);

    match file.read() {
        Err(BlockFileError::StorageIo(e)) => {
            assert_eq!(e.kind(), io::ErrorKind::PermissionDenied);
        }
        other => panic!("Expected StorageIo, got {other:?}"),
    }
}

#[test]
fn test_close_failure_is_surfaced() {
    let (file, medium) = flaky_file(4);
    medium.fail_close.store(true, Ordering::SeqCst);

    assert!(matches!(file.close(), Err(BlockFileError::StorageIo(_))));
    // Still closed afterwards: no partial teardown
    assert!(file.is_closed());
    assert!(matches!(file.write(b"data"), Err(BlockFileError::Closed)));
}

#[test]
fn test_progress_keeps_moving_after_failed_write() {
    let (file, medium) = flaky_file(4);
    medium.fail_writes.store(true, Ordering::SeqCst);
    assert!(file.write(b"lost").is_err());
    medium.fail_writes.store(false, Ordering::SeqCst);

    for _ in 0..1000 {
        file.write(b"good").unwrap();
    }

    assert_eq!(file.written_blocks().unwrap(), 1000);
    // Nothing is left parked ahead of the watermark
    let state = format!("{file:?}");
    assert!(
        state.contains("watermark=1001, ahead=0, failed=1"),
        "unexpected state: {state}"
    );
}

#[test]
fn test_reader_of_failed_block_gets_write_failed() {
    let (file, medium) = flaky_file(4);
    medium.fail_writes.store(true, Ordering::SeqCst);
    assert!(file.write(b"lost").is_err());
    medium.fail_writes.store(false, Ordering::SeqCst);
    file.write(b"kept").unwrap();

    assert!(matches!(
        file.read(),
        Err(BlockFileError::WriteFailed { sequence: 0 })
    ));
    let block = file.read().unwrap();
    assert_eq!(block.sequence, 1);
    assert_eq!(block.data, b"kept");
}

#[test]
fn test_waiting_reader_is_woken_by_failed_write() {
    let (file, medium) = flaky_file(4);
    let file = Arc::new(file);

    let reader = {
        let file = Arc::clone(&file);
        std::thread::spawn(move || file.read())
    };
    std::thread::sleep(std::time::Duration::from_millis(20));

    medium.fail_writes.store(true, Ordering::SeqCst);
    assert!(file.write(b"lost").is_err());

    assert!(matches!(
        reader.join().unwrap(),
        Err(BlockFileError::WriteFailed { sequence: 0 })
    ));
}
