use anyhow::Context as _;
use clap::{Parser, Subcommand};

use lumina::DeviceRegistry;

#[derive(Parser, Debug)]
#[command(name = "lumina", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every usable render device.
    Devices(DevicesArgs),
    /// List the usable backend kinds.
    Kinds,
    /// Print the per-backend capability report.
    Capabilities,
}

#[derive(Parser, Debug)]
struct DevicesArgs {
    /// Emit machine-readable JSON instead of one line per device.
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let registry = DeviceRegistry::new();
    match cli.cmd {
        Command::Devices(args) => cmd_devices(&registry, args),
        Command::Kinds => cmd_kinds(&registry),
        Command::Capabilities => cmd_capabilities(&registry),
    }
}

fn cmd_devices(registry: &DeviceRegistry, args: DevicesArgs) -> anyhow::Result<()> {
    let devices = registry.available_devices();
    if args.json {
        let out = serde_json::to_string_pretty(&devices).context("serialize device list")?;
        println!("{out}");
        return Ok(());
    }
    for device in devices {
        println!("{}\t{}\t{}", device.kind, device.id, device.description);
    }
    Ok(())
}

fn cmd_kinds(registry: &DeviceRegistry) -> anyhow::Result<()> {
    for kind in registry.available_kinds() {
        println!("{kind}");
    }
    Ok(())
}

fn cmd_capabilities(registry: &DeviceRegistry) -> anyhow::Result<()> {
    print!("{}", registry.capabilities_report());
    Ok(())
}
