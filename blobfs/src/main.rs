use std::sync::Arc;

use anyhow::Context;
use blobfs::storage::backend::filesystem::FilesystemBlobStore;
use blobfs::{BlobDriver, DriverConfig, FileInfo, FileWriter, StorageDriver, WalkControl};
use bytes::Bytes;
use clap::Parser;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing_subscriber::EnvFilter;

use crate::cli::{Args, Commands};

mod cli;

const UPLOAD_READ_SIZE: usize = 1024 * 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = DriverConfig::new(args.container.clone())
        .with_root_directory(args.root_directory.clone())
        .with_max_chunk_size(args.chunk_size);
    config.validate()?;

    let store = Arc::new(FilesystemBlobStore::new(&args.storage_dir, &config.container));
    let driver = BlobDriver::new(store, &config)
        .await
        .with_context(|| format!("failed to open storage at {}", args.storage_dir))?;

    run(&driver, args.command).await
}

async fn run(driver: &BlobDriver, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Stat { path } => {
            let info = driver.stat(&path).await?;
            print_info(&info);
        }
        Commands::Ls { path } => {
            for entry in driver.list(&path).await? {
                println!("{entry}");
            }
        }
        Commands::Cat { path, offset } => {
            let mut reader = driver.reader(&path, offset).await?;
            let mut stdout = tokio::io::stdout();
            tokio::io::copy(&mut reader, &mut stdout).await?;
            stdout.flush().await?;
        }
        Commands::Put { path, file } => {
            let content = tokio::fs::read(&file)
                .await
                .with_context(|| format!("failed to read {file}"))?;
            driver.put_content(&path, Bytes::from(content)).await?;
        }
        Commands::Upload { path, file, append } => {
            let mut writer = driver.writer(&path, append).await?;
            match upload(writer.as_mut(), &file).await {
                Ok(()) => {
                    writer.commit().await?;
                    writer.close().await?;
                    println!("{path}: {} bytes", writer.size());
                }
                Err(err) => {
                    eprintln!("upload of {file} failed at {} bytes, cancelling", writer.size());
                    writer.cancel().await?;
                    writer.close().await?;
                    return Err(err);
                }
            }
        }
        Commands::Mv { source, dest } => driver.move_path(&source, &dest).await?,
        Commands::Rm { path } => driver.delete(&path).await?,
        Commands::Tree { path } => {
            driver
                .walk(&path, &mut |info: &FileInfo| -> blobfs::error::Result<WalkControl> {
                    print_info(info);
                    Ok(WalkControl::Continue)
                })
                .await?;
        }
    }
    Ok(())
}

async fn upload(writer: &mut dyn FileWriter, file: &str) -> anyhow::Result<()> {
    let mut source = tokio::fs::File::open(file)
        .await
        .with_context(|| format!("failed to open {file}"))?;
    let mut buf = vec![0u8; UPLOAD_READ_SIZE];
    loop {
        let n = source.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        writer.write(&buf[..n]).await?;
    }
}

fn print_info(info: &FileInfo) {
    match info {
        FileInfo::File {
            path,
            size,
            modified,
        } => println!("file\t{size}\t{}\t{path}", modified.to_rfc3339()),
        FileInfo::Directory { path } => println!("dir\t-\t-\t{path}"),
    }
}
