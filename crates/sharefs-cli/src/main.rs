//! ShareFS CLI
//!
//! Access+/ShareFS peer: serve local shares and printers, or browse and
//! transfer files on remote shares. Remote paths are RISC OS style,
//! `Share.dir.file`.

mod config;
mod progress;

use clap::{Parser, Subcommand};
use sharefs_core::{Peer, RemoteEntry, ShareClient};
use sharefs_files::{FiletypeMapper, ObjectType, ShareKind, StaticMimeMap};
use sharefs_wire::riscos::{
    ACCESS_OWNER_READ, ACCESS_OWNER_WRITE, ACCESS_PUBLIC_READ, ACCESS_PUBLIC_WRITE,
};
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::{TransferProgress, format_bytes};

/// Locked bit of a RISC OS access word
const ACCESS_LOCKED: u32 = 0x08;

/// ShareFS - RISC OS LAN file and printer sharing
#[derive(Parser)]
#[command(name = "sharefs")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Address of the remote host; skips share discovery
    #[arg(long, global = true)]
    host: Option<Ipv4Addr>,

    /// Seconds to listen for adverts before giving up
    #[arg(long, global = true, default_value_t = 3.0)]
    wait: f64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the configured shares and printers
    Serve,

    /// List shares and printers advertised on the LAN
    Shares,

    /// List peers on the LAN
    Peers,

    /// Catalogue a remote directory
    Ls {
        /// Remote directory (`Share` or `Share.dir`)
        path: String,
    },

    /// Print a remote file to stdout
    Cat {
        /// Remote file
        path: String,
    },

    /// Fetch a remote file
    Get {
        /// Remote file
        path: String,

        /// Local destination; the leaf name when omitted
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Use pipelined reads
        #[arg(short, long)]
        pipelined: bool,
    },

    /// Store a local file on a remote share
    Put {
        /// Local file
        file: PathBuf,

        /// Remote destination
        path: String,

        /// Use pipelined writes
        #[arg(short, long)]
        pipelined: bool,
    },

    /// Delete a remote object
    Rm {
        /// Remote path
        path: String,
    },

    /// Rename a remote object
    Mv {
        /// Current path
        from: String,

        /// New path on the same share
        to: String,
    },

    /// Create a remote directory
    Mkdir {
        /// Remote path
        path: String,
    },

    /// Set access of a remote object (`WR/r` or hex)
    Chmod {
        /// Access string
        access: String,

        /// Remote path
        path: String,
    },

    /// Set the filetype of a remote file
    Settype {
        /// Remote file
        path: String,

        /// Hex filetype
        filetype: String,
    },

    /// Look up secure shares by key
    FindSecure {
        /// Hex share key
        key: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    // Validate configuration
    config.validate()?;

    init_logging(cli.verbose, &config)?;

    if let Commands::Serve = cli.command {
        return serve(&config).await;
    }

    let peer = client_peer(&config).await?;
    let result = run_client(&peer, &cli).await;
    peer.shutdown().await;
    result
}

fn init_logging(verbose: bool, config: &Config) -> anyhow::Result<()> {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(config.logging.level.to_lowercase()))
    };

    match &config.logging.file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(std::sync::Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

fn mapper() -> Arc<dyn FiletypeMapper> {
    Arc::new(StaticMimeMap::default())
}

/// Run the share daemon until Ctrl+C
async fn serve(config: &Config) -> anyhow::Result<()> {
    let peer_config = config.to_peer_config()?;
    tracing::info!(
        "Starting ShareFS peer {} on {}",
        peer_config.hostname,
        peer_config.network.host_addr
    );

    let peer = Peer::start(peer_config, mapper()).await?;

    println!("ShareFS Peer");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Host: {} ({})", peer.hostname(), peer.host_addr());
    println!("Identity: {}", hex::encode(peer.identity()));
    println!();

    println!("Shares:");
    for share in peer.shares() {
        let access = if share.is_secure() { "secure" } else { "public" };
        println!(
            "  {:<20} {:<8} {:<10} {}",
            share.name(),
            access,
            share.kind(),
            share.root().display()
        );
    }
    println!("Printers:");
    for printer in peer.printers() {
        println!("  {:<20} {}", printer.name, printer.path.display());
    }

    println!("\nPress Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");

    peer.shutdown().await;
    Ok(())
}

/// A silent peer for one-shot client commands
async fn client_peer(config: &Config) -> anyhow::Result<Peer> {
    let mut peer_config = config.to_peer_config()?.client_only();
    peer_config.shares.clear();
    peer_config.printers.clear();
    Ok(Peer::start(peer_config, mapper()).await?)
}

async fn run_client(peer: &Peer, cli: &Cli) -> anyhow::Result<()> {
    let wait = Duration::try_from_secs_f64(cli.wait)
        .map_err(|_| anyhow::anyhow!("Invalid --wait: {}", cli.wait))?;
    match &cli.command {
        Commands::Serve => Ok(()),
        Commands::Shares => list_shares(peer, wait).await,
        Commands::Peers => list_peers(peer, wait).await,
        Commands::FindSecure { key } => find_secure(peer, key).await,
        Commands::Ls { path } => {
            let client = connect(peer, cli.host, path, wait).await?;
            list_directory(&client, path).await
        }
        Commands::Cat { path } => {
            let client = connect(peer, cli.host, path, wait).await?;
            let data = client.get(path).await?;
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&data)?;
            stdout.flush()?;
            Ok(())
        }
        Commands::Get {
            path,
            output,
            pipelined,
        } => {
            let client = connect(peer, cli.host, path, wait).await?;
            let output = match output {
                Some(output) => output.clone(),
                None => PathBuf::from(leaf_name(path)?),
            };
            get_file(&client, path, output, *pipelined).await
        }
        Commands::Put {
            file,
            path,
            pipelined,
        } => {
            let client = connect(peer, cli.host, path, wait).await?;
            put_file(&client, file, path, *pipelined).await
        }
        Commands::Rm { path } => {
            let client = connect(peer, cli.host, path, wait).await?;
            client.delete(path).await?;
            println!("Deleted {}", path);
            Ok(())
        }
        Commands::Mv { from, to } => {
            let client = connect(peer, cli.host, from, wait).await?;
            client.rename(from, to).await?;
            println!("Renamed {} to {}", from, to);
            Ok(())
        }
        Commands::Mkdir { path } => {
            let client = connect(peer, cli.host, path, wait).await?;
            client.create_directory(path).await?;
            println!("Created {}", path);
            Ok(())
        }
        Commands::Chmod { access, path } => {
            let bits = parse_access(access)?;
            let client = connect(peer, cli.host, path, wait).await?;
            let info = client.setmode(path, bits).await?;
            println!("{} {}", format_access(info.access), path);
            Ok(())
        }
        Commands::Settype { path, filetype } => {
            let ft = parse_filetype(filetype)?;
            let client = connect(peer, cli.host, path, wait).await?;
            client.settype(path, ft).await?;
            println!("Set type of {} to &{:03X}", path, ft);
            Ok(())
        }
    }
}

/// Share name of a remote path
fn share_of(path: &str) -> anyhow::Result<&str> {
    match path.split('.').next() {
        Some(share) if !share.is_empty() => Ok(share),
        _ => anyhow::bail!("Remote path {:?} does not name a share", path),
    }
}

/// Last element of a remote path, as a local file name
fn leaf_name(path: &str) -> anyhow::Result<String> {
    match path.rsplit('.').next() {
        Some(leaf) if !leaf.is_empty() && leaf != "$" => Ok(leaf.replace('/', ".")),
        _ => anyhow::bail!("Remote path {:?} has no leaf name; use --output", path),
    }
}

/// Client for the host serving the share `path` lives on
async fn connect(
    peer: &Peer,
    host: Option<Ipv4Addr>,
    path: &str,
    wait: Duration,
) -> anyhow::Result<ShareClient> {
    if let Some(host) = host {
        return Ok(peer.client(host));
    }

    let share = share_of(path)?;
    peer.query().await;
    let deadline = Instant::now() + wait;
    loop {
        match peer.client_for_share(share) {
            Ok(client) => {
                tracing::debug!("Share {} is on {}", share, client.host());
                return Ok(client);
            }
            Err(e) if Instant::now() >= deadline => return Err(e.into()),
            Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
        }
    }
}

async fn list_shares(peer: &Peer, wait: Duration) -> anyhow::Result<()> {
    peer.query().await;
    tokio::time::sleep(wait).await;

    let mut shares = peer.remote_shares();
    shares.sort_by(|a, b| a.name.cmp(&b.name));
    println!("Shares:");
    if shares.is_empty() {
        println!("  (none)");
    }
    for share in shares {
        println!(
            "  {:<20} {:<16} {}",
            share.name,
            share.host,
            ShareKind::from_bits(share.kind)
        );
    }

    let printers = peer.remote_printers();
    if !printers.is_empty() {
        println!("Printers:");
        for printer in printers {
            println!(
                "  {:<20} {:<16} {}",
                printer.name, printer.host, printer.description
            );
        }
    }
    Ok(())
}

async fn list_peers(peer: &Peer, wait: Duration) -> anyhow::Result<()> {
    peer.query().await;
    tokio::time::sleep(wait).await;

    let mut peers = peer.remote_peers();
    peers.sort_by_key(|p| p.addr);
    println!("Peers:");
    if peers.is_empty() {
        println!("  (none)");
    }
    for entry in peers {
        println!(
            "  {:<20} {:<16} {}",
            entry.hostname,
            entry.addr,
            hex::encode(entry.identity)
        );
    }
    Ok(())
}

async fn find_secure(peer: &Peer, key: &str) -> anyhow::Result<()> {
    let key = u32::from_str_radix(key.trim_start_matches("0x"), 16)
        .map_err(|_| anyhow::anyhow!("Invalid share key: {:?}", key))?;
    let shares = peer.find_secure_shares(key).await?;
    if shares.is_empty() {
        println!("No shares for key {:08x}", key);
    }
    for share in shares {
        println!(
            "  {:<20} {:<16} {}",
            share.name,
            share.host,
            ShareKind::from_bits(share.kind)
        );
    }
    Ok(())
}

async fn list_directory(client: &ShareClient, path: &str) -> anyhow::Result<()> {
    let mut entries = client.catalogue(path).await?;
    entries.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
    for entry in &entries {
        println!("{}", format_entry(entry));
    }
    println!("{} objects", entries.len());
    Ok(())
}

async fn get_file(
    client: &ShareClient,
    path: &str,
    output: PathBuf,
    pipelined: bool,
) -> anyhow::Result<()> {
    let progress = TransferProgress::new(format!("Fetching {}", path));
    let fetched = if pipelined {
        client.pget(path).await
    } else {
        client.get(path).await
    };
    let data = match fetched {
        Ok(data) => data,
        Err(e) => {
            progress.abandon();
            return Err(e.into());
        }
    };
    tokio::fs::write(&output, &data).await?;
    progress.finish(data.len() as u64);
    println!("Saved {} to {}", path, output.display());
    Ok(())
}

async fn put_file(
    client: &ShareClient,
    file: &Path,
    path: &str,
    pipelined: bool,
) -> anyhow::Result<()> {
    let data = tokio::fs::read(file).await?;
    if data.len() > u32::MAX as usize {
        anyhow::bail!("{} is too large ({})", file.display(), format_bytes(data.len() as u64));
    }
    let progress = TransferProgress::new(format!("Storing {}", path));
    let stored = if pipelined {
        client.pput(path, &data).await
    } else {
        client.put(path, &data).await
    };
    match stored {
        Ok(written) => {
            progress.finish(u64::from(written));
            Ok(())
        }
        Err(e) => {
            progress.abandon();
            Err(e.into())
        }
    }
}

fn format_entry(entry: &RemoteEntry) -> String {
    let info = &entry.info;
    let kind = match info.object_type {
        ObjectType::Directory => "Dir".to_string(),
        ObjectType::ShareRoot => "Share".to_string(),
        ObjectType::File => match info.stamp().filetype() {
            Some(ft) => format!("&{:03X}", ft),
            None => format!("{:08X}", info.ft_word),
        },
    };
    format!(
        "{:<24} {:<9} {:>10} {}",
        entry.name,
        kind,
        info.length,
        format_access(info.access)
    )
}

/// RISC OS attribute string, e.g. `LWR/r`
fn format_access(access: u32) -> String {
    let mut s = String::new();
    for (bit, c) in [
        (ACCESS_LOCKED, 'L'),
        (ACCESS_OWNER_WRITE, 'W'),
        (ACCESS_OWNER_READ, 'R'),
    ] {
        if access & bit != 0 {
            s.push(c);
        }
    }
    s.push('/');
    for (bit, c) in [(ACCESS_PUBLIC_WRITE, 'w'), (ACCESS_PUBLIC_READ, 'r')] {
        if access & bit != 0 {
            s.push(c);
        }
    }
    s
}

/// Parse `WR/r` style attributes, or a hex word (`0x33`, `&33`)
fn parse_access(s: &str) -> anyhow::Result<u32> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix('&')) {
        return u32::from_str_radix(hex, 16)
            .map_err(|_| anyhow::anyhow!("Invalid access word: {:?}", s));
    }
    let (owner, public) = s.split_once('/').unwrap_or((s, ""));
    let mut access = 0;
    for c in owner.chars() {
        access |= match c.to_ascii_uppercase() {
            'R' => ACCESS_OWNER_READ,
            'W' => ACCESS_OWNER_WRITE,
            'L' => ACCESS_LOCKED,
            _ => anyhow::bail!("Invalid owner attribute {:?} in {:?}", c, s),
        };
    }
    for c in public.chars() {
        access |= match c.to_ascii_lowercase() {
            'r' => ACCESS_PUBLIC_READ,
            'w' => ACCESS_PUBLIC_WRITE,
            _ => anyhow::bail!("Invalid public attribute {:?} in {:?}", c, s),
        };
    }
    Ok(access)
}

fn parse_filetype(s: &str) -> anyhow::Result<u16> {
    let digits = s.trim_start_matches("0x").trim_start_matches('&');
    match u16::from_str_radix(digits, 16) {
        Ok(ft) if ft <= 0xFFF => Ok(ft),
        _ => anyhow::bail!("Invalid filetype: {:?}", s),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sharefs_files::ObjectInfo;

    #[test]
    fn test_access_strings() {
        assert_eq!(format_access(0x33), "WR/wr");
        assert_eq!(format_access(0x0B), "LWR/");
        assert_eq!(parse_access("WR/r").unwrap(), 0x13);
        assert_eq!(parse_access("lwr/wr").unwrap(), 0x3B);
        assert_eq!(parse_access("&33").unwrap(), 0x33);
        assert!(parse_access("WX/r").is_err());
    }

    #[test]
    fn test_paths() {
        assert_eq!(share_of("Public.docs.readme").unwrap(), "Public");
        assert!(share_of(".docs").is_err());
        assert_eq!(leaf_name("Public.docs.notes/txt").unwrap(), "notes.txt");
        assert!(leaf_name("Public.").is_err());
    }

    #[test]
    fn test_parse_filetype() {
        assert_eq!(parse_filetype("fff").unwrap(), 0xFFF);
        assert_eq!(parse_filetype("&FF9").unwrap(), 0xFF9);
        assert!(parse_filetype("1000").is_err());
    }

    #[test]
    fn test_format_entry() {
        let entry = RemoteEntry {
            name: "Notes".to_string(),
            info: ObjectInfo {
                ft_word: 0xFFFF_FF12,
                date_word: 0x3456_7890,
                length: 42,
                access: 0x13,
                object_type: ObjectType::File,
            },
        };
        let line = format_entry(&entry);
        assert!(line.starts_with("Notes"));
        assert!(line.contains("&FFF"));
        assert!(line.contains("42"));
        assert!(line.ends_with("WR/r"));
    }
}
