use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;
use tracing_subscriber::EnvFilter;

use bucketfs_common::{FileSystem, DEFAULT_PRESIGN_EXPIRY};
use bucketfs_storage::backend;
use bucketfs_storage::config::BucketfsConfig;

const DEFAULT_CONFIG_PATH: &str = "bucketfs.toml";

const USAGE: &str = "\
usage: bucketfs [-c config.toml] <command> [args]

commands:
  write <path> [text]       create an object (reads stdin without text)
  append <path> [text]      append to an object (reads stdin without text)
  cat <path>                print an object
  cp <source> <dest>        copy an object
  mv <source> <dest>        move an object
  put <local-file> <dest>   upload a local file
  rm <path>                 delete an object
  mkdir <path>              create a directory marker
  stat <path>               print size and modification time as JSON
  ls <prefix>               list the first page of keys
  ls-all <prefix>           list every key
  presign <path> [seconds]  print a presigned download URL
  exists <path>             print true or false";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .with_writer(std::io::stderr)
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let mut config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
    if args.first().map(|s| s.as_str()) == Some("-c") {
        if args.len() < 2 {
            bail!("-c requires a path\n\n{}", USAGE);
        }
        config_path = PathBuf::from(args.remove(1));
        args.remove(0);
    }
    let Some(command) = args.first().cloned() else {
        bail!("{}", USAGE);
    };
    if command == "help" || command == "--help" || command == "-h" {
        println!("{}", USAGE);
        return Ok(());
    }

    let config = BucketfsConfig::load(&config_path)?;
    let fs = backend::from_config(&config.backend, config.to_map())?;
    info!(backend = %config.backend, config = %config_path.display(), "bucketfs starting");

    run(fs.as_ref(), &command, &args[1..]).await
}

async fn run(fs: &dyn FileSystem, command: &str, args: &[String]) -> anyhow::Result<()> {
    let arg = |i: usize| required_arg(args, i, command);

    match command {
        "write" => {
            let path = arg(0)?;
            let content = content_arg(args.get(1)).await?;
            fs.write(path, content).await?;
            print_last_uri(fs);
        }
        "append" => {
            let path = arg(0)?;
            let content = content_arg(args.get(1)).await?;
            fs.append(path, content).await?;
            print_last_uri(fs);
        }
        "cat" => {
            let data = fs.read(arg(0)?).await?;
            let mut stdout = tokio::io::stdout();
            stdout.write_all(&data).await?;
            stdout.flush().await?;
        }
        "cp" => {
            fs.copy(arg(0)?, arg(1)?).await?;
            print_last_uri(fs);
        }
        "mv" => {
            fs.move_to(arg(0)?, arg(1)?).await?;
            print_last_uri(fs);
        }
        "put" => {
            fs.upload(Path::new(arg(0)?), arg(1)?).await?;
            print_last_uri(fs);
        }
        "rm" => {
            fs.delete(arg(0)?).await?;
            print_last_uri(fs);
        }
        "mkdir" => {
            fs.mkdir(arg(0)?).await?;
            print_last_uri(fs);
        }
        "stat" => {
            let key = arg(0)?;
            let size = fs.file_size(key).await?;
            let last_modified = fs.last_modified(key).await?;
            let stat = serde_json::json!({
                "key": key,
                "size": size,
                "last_modified": last_modified,
                "url": fs.public_url(key),
            });
            println!("{}", serde_json::to_string_pretty(&stat)?);
        }
        "ls" | "ls-all" => {
            let prefix = args.first().map(String::as_str).unwrap_or("");
            let keys = if command == "ls" {
                fs.read_dir(prefix).await?
            } else {
                fs.read_dir_all(prefix).await?
            };
            for key in keys {
                println!("{}", key);
            }
        }
        "presign" => {
            let expires_in = match args.get(1) {
                Some(secs) => Duration::from_secs(
                    secs.parse()
                        .with_context(|| format!("invalid expiry in seconds: {}", secs))?,
                ),
                None => DEFAULT_PRESIGN_EXPIRY,
            };
            println!("{}", fs.presigned_url(arg(0)?, expires_in).await?);
        }
        "exists" => {
            println!("{}", fs.exists(arg(0)?).await?);
        }
        other => bail!("unknown command: {}\n\n{}", other, USAGE),
    }
    Ok(())
}

/// Inline text, or all of stdin when no text is given.
async fn content_arg(text: Option<&String>) -> anyhow::Result<Bytes> {
    match text {
        Some(text) => Ok(Bytes::from(text.clone())),
        None => {
            let mut buf = Vec::new();
            tokio::io::stdin().read_to_end(&mut buf).await?;
            Ok(Bytes::from(buf))
        }
    }
}

fn required_arg<'a>(args: &'a [String], index: usize, command: &str) -> anyhow::Result<&'a str> {
    args.get(index)
        .map(String::as_str)
        .with_context(|| format!("'{}' is missing an argument\n\n{}", command, USAGE))
}

fn print_last_uri(fs: &dyn FileSystem) {
    if let Some(uri) = fs.last_uri() {
        println!("{}", uri);
    }
}
