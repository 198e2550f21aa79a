use std::path::PathBuf;

use clap::{Parser, Subcommand};
use eyre::WrapErr;
use tracing::info;

use pmcp_config_data::{default_config_path, parse_config_file, PmcpConfig};

#[derive(Debug, Parser)]
#[command(name = "pmcp", version, about = "physical-mcp ambient perception engine")]
struct Cli {
    /// Config file path (defaults to the per-user location).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the engine (the default).
    Run,
    /// Print platform, provider, LAN IP and mDNS status.
    Doctor,
    /// Print a starter configuration file.
    DefaultConfig,
}

fn load_config(path: Option<PathBuf>) -> eyre::Result<PmcpConfig> {
    let path = path.unwrap_or_else(default_config_path);
    if path.exists() {
        parse_config_file(&path).wrap_err_with(|| format!("loading config {}", path.display()))
    } else {
        info!("no config at {}; using defaults", path.display());
        let mut cfg = PmcpConfig::default();
        cfg.apply_env_overrides();
        cfg.validate().wrap_err("validating default config")?;
        Ok(cfg)
    }
}

fn main() -> eyre::Result<()> {
    color_eyre::install()?;
    dotenv::dotenv().ok();

    let cli = Cli::parse();

    match cli.command.unwrap_or(Command::Run) {
        Command::DefaultConfig => {
            print!("{}", pmcp_config_data::default_config_yaml());
            Ok(())
        }
        Command::Doctor => doctor(cli.config),
        Command::Run => {
            if let Err(e) = pmcp::tracing_logger::init(cli.log_file.as_deref()) {
                eprintln!("logging setup failed: {e}");
            }
            std::panic::set_hook(Box::new(tracing_panic::panic_hook));

            // Config errors are fatal and must exit nonzero with a clear
            // message; eyre takes care of both.
            let config = load_config(cli.config)?;

            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .wrap_err("starting tokio runtime")?;
            runtime.block_on(pmcp::run(config))
        }
    }
}

fn doctor(config_path: Option<PathBuf>) -> eyre::Result<()> {
    println!("physical-mcp {}", env!("CARGO_PKG_VERSION"));
    println!("platform: {}-{}", std::env::consts::OS, std::env::consts::ARCH);

    let path = config_path.unwrap_or_else(default_config_path);
    println!(
        "config: {} ({})",
        path.display(),
        if path.exists() { "present" } else { "missing" }
    );

    match load_config(Some(path)) {
        Ok(cfg) => {
            println!("provider: {:?}", cfg.reasoning.provider);
            println!("cameras: {}", cfg.cameras.len());
            println!(
                "vision api: {}:{}",
                cfg.vision_api.host, cfg.vision_api.port
            );
            match pmcp::mdns::lan_ip() {
                Some(ip) => println!("lan ip: {ip}"),
                None => println!("lan ip: none found"),
            }
            match pmcp::mdns::MdnsAdvertiser::start(cfg.vision_api.port) {
                Ok(adv) => println!("mdns: ok ({})", adv.fullname()),
                Err(e) => println!("mdns: unavailable ({e})"),
            }
        }
        Err(e) => println!("config error: {e}"),
    }
    Ok(())
}
