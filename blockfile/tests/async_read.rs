//! Async readers waiting on blocking writers

use blockfile::{BlockFile, BlockFileConfig, BlockFileError, MemMedium, ReadWait};
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

fn shared_file(config: BlockFileConfig) -> Arc<BlockFile<MemMedium>> {
    Arc::new(BlockFile::with_medium(MemMedium::new(), config).unwrap())
}

#[tokio::test]
async fn test_read_async_after_write() {
    let file = shared_file(BlockFileConfig::new(4));
    file.write(b"Hello").unwrap();

    let block = file.read_async().await.unwrap();
    assert_eq!(block.sequence, 0);
    assert_eq!(block.data, b"Hell");
}

#[tokio::test]
async fn test_read_async_waits_for_write() {
    let file = shared_file(BlockFileConfig::new(4));

    let reader = {
        let file = Arc::clone(&file);
        tokio::spawn(async move { file.read_async().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!reader.is_finished());

    let writer = {
        let file = Arc::clone(&file);
        std::thread::spawn(move || file.write(b"late").unwrap())
    };
    assert_eq!(writer.join().unwrap(), 0);

    let block = reader.await.unwrap().unwrap();
    assert_eq!(block.sequence, 0);
    assert_eq!(block.data, b"late");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_many_async_readers() {
    const BLOCKS: u64 = 64;
    let file = shared_file(BlockFileConfig::new(8));

    let readers: Vec<_> = (0..BLOCKS)
        .map(|_| {
            let file = Arc::clone(&file);
            async move { file.read_async().await }
        })
        .collect();

    let writer = {
        let file = Arc::clone(&file);
        tokio::task::spawn_blocking(move || {
            for i in 0..BLOCKS {
                file.write(format!("blk{i:05}").as_bytes()).unwrap();
            }
        })
    };

    let blocks = join_all(readers).await;
    writer.await.unwrap();

    let mut seen = BTreeSet::new();
    for block in blocks {
        let block = block.unwrap();
        assert_eq!(block.data, format!("blk{:05}", block.sequence).as_bytes());
        assert!(seen.insert(block.sequence));
    }
    assert_eq!(seen, (0..BLOCKS).collect());
}

#[tokio::test]
async fn test_spinning_async_reader() {
    let file = shared_file(BlockFileConfig::new(4).with_read_wait(ReadWait::Spin));

    let reader = {
        let file = Arc::clone(&file);
        tokio::spawn(async move { file.read_async().await })
    };
    // Let the reader start spinning before the write lands
    tokio::task::yield_now().await;

    file.write(b"spun").unwrap();
    let block = reader.await.unwrap().unwrap();
    assert_eq!(block.data, b"spun");
}

#[tokio::test]
async fn test_read_async_timeout() {
    let config = BlockFileConfig::new(4).with_read_timeout(Some(Duration::from_millis(20)));
    let file = shared_file(config);

    let result = file.read_async().await;
    assert!(matches!(
        result,
        Err(BlockFileError::TimedOut { sequence: 0 })
    ));
    assert_eq!(file.read_sequence_number().unwrap(), 1);
}

#[tokio::test]
async fn test_read_async_cancel() {
    let file = shared_file(BlockFileConfig::new(4));
    let token = file.cancel_token();

    let reader = {
        let file = Arc::clone(&file);
        let token = token.clone();
        tokio::spawn(async move { file.read_cancellable_async(&token).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    token.cancel();
    assert!(matches!(
        reader.await.unwrap(),
        Err(BlockFileError::Cancelled { sequence: 0 })
    ));
}

#[tokio::test]
async fn test_read_async_rejects_token_from_another_file() {
    let file = shared_file(BlockFileConfig::new(4));
    let other = shared_file(BlockFileConfig::new(4));

    let result = file.read_cancellable_async(&other.cancel_token()).await;
    assert!(matches!(result, Err(BlockFileError::ForeignToken)));
    assert_eq!(file.read_sequence_number().unwrap(), 0);
}

#[tokio::test]
async fn test_close_wakes_async_reader() {
    let file = shared_file(BlockFileConfig::new(4));

    let reader = {
        let file = Arc::clone(&file);
        tokio::spawn(async move { file.read_async().await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    file.close().unwrap();
    assert!(matches!(
        reader.await.unwrap(),
        Err(BlockFileError::Closed)
    ));
}
