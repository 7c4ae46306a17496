//! Block file demo
//!
//! Runs concurrent writer and reader threads against one block file and
//! prints what each reader got.
//!
//! ```text
//! blockfile_demo --path /tmp/demo.blocks --block 8 --writers 3 --readers 2 --blocks 4
//! ```
//!
//! Every flag falls back to a `BLOCKFILE_DEMO_*` environment variable, and
//! the `BLOCKFILE_*` variables understood by `BlockFileConfig::from_env`
//! apply as usual.

use std::env;
use std::sync::Arc;
use std::thread;

use blockfile::{BlockFile, BlockFileConfig, BlockFileError};
use tracing::info;

struct DemoConfig {
    path: String,
    block_length: u32,
    writers: u64,
    readers: u64,
    blocks_per_writer: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let demo = parse_config()?;
    let config = BlockFileConfig::from_env(demo.block_length);
    let file = Arc::new(BlockFile::open_with(&demo.path, config)?);
    info!("opened {} with block length {}", demo.path, file.length());

    let total = demo.writers * demo.blocks_per_writer;
    let (per_reader, extra) = match demo.readers {
        0 => (0, 0),
        n => (total / n, total % n),
    };

    let writers: Vec<_> = (0..demo.writers)
        .map(|w| {
            let file = Arc::clone(&file);
            let blocks = demo.blocks_per_writer;
            thread::spawn(move || write_all(&file, w, blocks))
        })
        .collect();

    let readers: Vec<_> = (0..demo.readers)
        .map(|r| {
            let file = Arc::clone(&file);
            let count = per_reader + u64::from(r < extra);
            thread::spawn(move || read_all(&file, r, count))
        })
        .collect();

    for writer in writers {
        writer.join().map_err(|_| "writer thread panicked")??;
    }
    let mut read = 0;
    for reader in readers {
        read += reader.join().map_err(|_| "reader thread panicked")??;
    }

    println!(
        "Done: {} blocks written, {read} blocks read",
        file.write_sequence_number()?
    );
    file.close()?;
    Ok(())
}

fn write_all(file: &BlockFile, writer: u64, blocks: u64) -> Result<(), BlockFileError> {
    for i in 0..blocks {
        let text = format!("w{writer}#{i}");
        let sequence = file.write(text.as_bytes())?;
        info!("(w{writer}) wrote {text:?} as block {sequence}");
    }
    Ok(())
}

fn read_all(file: &BlockFile, reader: u64, count: u64) -> Result<u64, BlockFileError> {
    for _ in 0..count {
        let block = file.read()?;
        let text = String::from_utf8_lossy(&block.data);
        println!(
            "(r{reader}) block {}: {}",
            block.sequence,
            text.trim_end_matches('\0')
        );
    }
    Ok(count)
}

fn parse_config() -> Result<DemoConfig, Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let path = setting(&args, "--path", "BLOCKFILE_DEMO_PATH")
        .unwrap_or_else(|| env::temp_dir().join("blockfile_demo.blocks").display().to_string());

    Ok(DemoConfig {
        path,
        block_length: numeric(&args, "--block", "BLOCKFILE_DEMO_BLOCK", 8)?,
        writers: numeric(&args, "--writers", "BLOCKFILE_DEMO_WRITERS", 3)?,
        readers: numeric(&args, "--readers", "BLOCKFILE_DEMO_READERS", 2)?,
        blocks_per_writer: numeric(&args, "--blocks", "BLOCKFILE_DEMO_BLOCKS", 4)?,
    })
}

fn numeric<T>(
    args: &[String],
    flag: &str,
    var: &str,
    default: T,
) -> Result<T, Box<dyn std::error::Error>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + 'static,
{
    match setting(args, flag, var) {
        Some(raw) => Ok(raw.parse()?),
        None => Ok(default),
    }
}

fn setting(args: &[String], flag: &str, var: &str) -> Option<String> {
    arg_value(args, flag).or_else(|| env::var(var).ok())
}

fn arg_value(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1).cloned())
}
