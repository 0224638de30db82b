use anyhow::Context;
use clap::{Parser, Subcommand};
use gbpak_core::{Cartridge, LoadOptions};
use std::path::{Path, PathBuf};

#[derive(Parser)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the cartridge header fields this tool understands
    Info {
        #[arg(short = 'f', long = "gb_file_path")]
        gb_file_path: PathBuf,
    },
    /// Load a cartridge together with its save data, report any degraded
    /// conditions, then write the save back out
    CheckSave {
        #[arg(short = 'f', long = "gb_file_path")]
        gb_file_path: PathBuf,
        /// Defaults to the ROM path with a .sav extension
        #[arg(short = 's', long = "save_file_path")]
        save_file_path: Option<PathBuf>,
        #[arg(short = 'r', long = "rtc_file_path")]
        rtc_file_path: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Cli::parse();
    match args.command {
        Command::Info { gb_file_path } => info(&gb_file_path),
        Command::CheckSave { gb_file_path, save_file_path, rtc_file_path } => {
            let save_file_path =
                save_file_path.unwrap_or_else(|| gb_file_path.with_extension("sav"));
            check_save(&gb_file_path, save_file_path, rtc_file_path)
        }
    }
}

fn info(gb_file_path: &Path) -> anyhow::Result<()> {
    let outcome = Cartridge::load(gb_file_path, LoadOptions::default())
        .with_context(|| format!("failed to load {}", gb_file_path.display()))?;
    let header = outcome.cartridge.header();

    println!("Title:      {}", header.title_str());
    println!("Mapper:     {:?}", header.mapper_type);
    println!("Features:   {}", header.features);
    println!("ROM banks:  {} ({} bytes)", header.rom_bank_count, header.rom_size());
    println!(
        "RAM:        {} bank(s), {} quarter-block(s) ({} bytes battery-backed)",
        header.ram_bank_count,
        header.ram_quarter_blocks,
        header.save_ram_len()
    );

    Ok(())
}

fn check_save(
    gb_file_path: &Path,
    save_file_path: PathBuf,
    rtc_file_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let options = LoadOptions {
        ram_path: Some(save_file_path.clone()),
        rtc_path: rtc_file_path,
        lock_container: true,
        ..LoadOptions::default()
    };
    let outcome = Cartridge::load(gb_file_path, options)
        .with_context(|| format!("failed to load {}", gb_file_path.display()))?;
    log::info!(
        "Loaded \"{}\" with a {} byte battery-backed RAM image",
        outcome.cartridge.header().title_str(),
        outcome.cartridge.header().save_ram_len()
    );

    if outcome.warnings.is_empty() {
        println!("Save data loaded cleanly from {}", save_file_path.display());
    } else {
        for warning in &outcome.warnings {
            println!("WARNING: {warning}");
        }
    }

    outcome
        .cartridge
        .unload()
        .context("failed to write save data back")?;
    println!("Save data written back successfully");

    Ok(())
}
