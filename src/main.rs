use clap::{Parser, Subcommand};
use std::path::PathBuf;

use altpow::core::chain::{ChainError, HeaderChain};
use altpow::core::params::{ChainParameters, Network};
use altpow::core::types::*;
use altpow::pow::{compact, Target};

#[derive(Parser)]
#[command(name = "altpow", version = "0.3.1")]
#[command(about = "AltPoW - difficulty retargeting and proof-of-work target validation")]
struct Cli {
    /// Network whose consensus parameters apply (mainnet, testnet, regtest)
    #[arg(long, global = true, default_value = "mainnet")]
    network: Network,
    /// Header database directory (default depends on the network)
    #[arg(long, global = true)]
    data_dir: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the network's parameter table as JSON
    Params,
    /// Expand compact bits (hex) into a full target
    Decode { bits: String },
    /// Encode a target (hex) into compact bits
    Encode { target: String },
    /// Validate and store headers from a JSON array
    Import { file: PathBuf },
    /// Show the stored chain tip
    Info,
    /// Re-run the difficulty rules over the stored active chain
    Verify,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("altpow=info".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    let params = ChainParameters::for_network(cli.network);
    if let Err(e) = params.check() {
        eprintln!("❌ Invalid {} parameters: {}", cli.network, e);
        std::process::exit(1);
    }

    let data_dir = cli.data_dir.unwrap_or_else(|| cli.network.default_data_dir().to_string());

    match cli.command {
        Commands::Params => {
            match serde_json::to_string_pretty(&params) {
                Ok(json) => println!("{}", json),
                Err(e) => { eprintln!("❌ {}", e); std::process::exit(1); }
            }
        }

        Commands::Decode { bits } => {
            let bits = parse_bits(&bits).unwrap_or_else(|e| { eprintln!("❌ {}", e); std::process::exit(1); });
            match compact::decode(bits) {
                Ok(target) => {
                    println!("🎯 Bits {:08x}", bits);
                    println!("  Target:    {:064x}", target);
                    println!("  Canonical: {:08x}", compact::encode(&target));
                    println!("  Within {} limit: {}", params.network, target <= params.max_target());
                }
                Err(e) => { eprintln!("❌ {:08x}: {}", bits, e); std::process::exit(1); }
            }
        }

        Commands::Encode { target } => {
            let value = parse_target(&target).unwrap_or_else(|e| { eprintln!("❌ {}", e); std::process::exit(1); });
            let bits = compact::encode(&value);
            println!("🎯 Bits {:08x}", bits);
            match compact::decode(bits) {
                Ok(reduced) if reduced != value => println!("  Truncated to: {:064x}", reduced),
                _ => {}
            }
        }

        Commands::Import { file } => {
            let json = std::fs::read_to_string(&file).unwrap_or_else(|e| {
                eprintln!("❌ Cannot read {}: {}", file.display(), e);
                std::process::exit(1);
            });
            let headers: Vec<BlockHeader> = serde_json::from_str(&json).unwrap_or_else(|e| {
                eprintln!("❌ {} is not a JSON array of headers: {}", file.display(), e);
                std::process::exit(1);
            });

            let mut chain = open_chain(&data_dir, params);
            println!("📥 Importing {} headers into {} ({})", headers.len(), data_dir, chain.params().network);

            let start = std::time::Instant::now();
            let mut imported = 0u64;
            let mut known = 0u64;
            for (i, header) in headers.into_iter().enumerate() {
                let hash = header.hash();
                match chain.add_header(header) {
                    Ok(_) => {
                        imported += 1;
                        if imported % 1000 == 0 {
                            println!("  📥 Imported {} headers (height {})...", imported, chain.height());
                        }
                    }
                    Err(ChainError::Duplicate) => known += 1,
                    Err(e) => {
                        eprintln!("❌ Header {} ({}) rejected: {}", i, hash_to_hex(&hash), e);
                        if let Err(e) = chain.flush() { eprintln!("❌ {}", e); }
                        std::process::exit(1);
                    }
                }
            }
            if let Err(e) = chain.flush() {
                eprintln!("❌ {}", e);
                std::process::exit(1);
            }

            println!("\n  ✅ Imported {} headers in {:.1}s ({} already known)",
                imported, start.elapsed().as_secs_f64(), known);
            println!("  📊 Chain height: {} | Tip: {}", chain.height(), &hash_to_hex(&chain.tip_hash())[..16]);
        }

        Commands::Info => {
            let chain = open_chain(&data_dir, params);
            let tip = chain.tip();
            println!("📊 AltPoW ({})", chain.params().network);
            println!("  Data:       {}", data_dir);
            println!("  Height:     {}", tip.height);
            println!("  Tip:        {}", hash_to_hex(&tip.hash()));
            println!("  Bits:       {:08x}", tip.header.bits);
            println!("  AuxPoW:     {}", tip.header.is_auxpow());
            println!("  Headers:    {}", chain.total_known_headers());
            println!("  Retarget:   in {} blocks", chain.blocks_to_retarget());
            match chain.next_required_bits(tip.header.timestamp + chain.params().target_spacing) {
                Ok(bits) => println!("  Next bits:  {:08x}", bits),
                Err(e) => println!("  Next bits:  unavailable ({})", e),
            }
        }

        Commands::Verify => {
            let chain = open_chain(&data_dir, params);
            println!("🔍 Verifying {} headers on the active chain...", chain.height());
            let start = std::time::Instant::now();
            match chain.verify_active_chain() {
                Ok(count) => println!("  ✅ {} headers valid ({:.1}s)", count, start.elapsed().as_secs_f64()),
                Err(e) => { eprintln!("  ❌ {}", e); std::process::exit(1); }
            }
        }
    }
}

fn open_chain(data_dir: &str, params: ChainParameters) -> HeaderChain {
    if let Err(e) = std::fs::create_dir_all(data_dir) {
        eprintln!("❌ Cannot create {}: {}", data_dir, e);
        std::process::exit(1);
    }
    HeaderChain::open(data_dir, params).unwrap_or_else(|e| { eprintln!("❌ {}", e); std::process::exit(1); })
}

fn strip_hex_prefix(s: &str) -> &str {
    let s = s.trim();
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s)
}

fn parse_bits(s: &str) -> Result<u32, String> {
    u32::from_str_radix(strip_hex_prefix(s), 16).map_err(|e| format!("invalid compact bits '{}': {}", s, e))
}

fn parse_target(s: &str) -> Result<Target, String> {
    let digits = strip_hex_prefix(s);
    let target = Target::parse_bytes(digits.as_bytes(), 16).ok_or_else(|| format!("invalid hex target '{}'", s))?;
    if target.bits() > 256 {
        return Err(format!("target '{}' exceeds 256 bits", s));
    }
    Ok(target)
}
