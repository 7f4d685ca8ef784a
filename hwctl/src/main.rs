// SPDX-FileCopyrightText: Copyright © 2025 Serpent OS Developers
//
// SPDX-License-Identifier: MPL-2.0

//! Operator CLI over the shared hardware context

use clap::{Parser, Subcommand};
use hwcontext::{format_size, Context, EspFileFlags};

#[derive(Parser)]
#[command(name = "hwctl", about = "Inspect the firmware update hardware context", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// ESP discovery and election
    Esp {
        #[command(subcommand)]
        action: EspAction,
    },

    /// Walk the firmware boot order and list the PE boot chain
    BootFiles {
        /// Include the loader the firmware starts directly, e.g. shim
        #[arg(long)]
        first_stage: bool,

        /// Include the chained loader, e.g. grub
        #[arg(long)]
        second_stage: bool,

        /// Include shim revocation payloads
        #[arg(long)]
        revocations: bool,
    },

    /// Show the host state known to the context
    State,
}

#[derive(Subcommand)]
enum EspAction {
    /// List every candidate volume
    List,

    /// Elect the default ESP
    Default,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    pretty_env_logger::init();

    let cli = Cli::parse();
    let context = Context::with_system();

    match cli.command {
        Command::Esp { action: EspAction::List } => {
            let candidates = context.esp_volumes()?;
            log::debug!("{} candidate volume(s)", candidates.len());
            for volume in candidates {
                let kind = match volume.partition_kind() {
                    volumes::PartitionKind::Esp => "esp",
                    volumes::PartitionKind::BasicData => "bdp",
                    volumes::PartitionKind::Other => "other",
                    volumes::PartitionKind::Unknown => "unknown",
                };
                println!(
                    "{}\tkind={kind}\tfs={}\tsize={}\tinternal={}",
                    volume.id(),
                    volume.filesystem_type(),
                    format_size(volume.size()),
                    volume.is_internal(),
                );
            }
        }
        Command::Esp {
            action: EspAction::Default,
        } => {
            let esp = context.default_esp()?;
            println!("{}", esp.id());
        }
        Command::BootFiles {
            first_stage,
            second_stage,
            revocations,
        } => {
            let mut flags = EspFileFlags::empty();
            if first_stage {
                flags |= EspFileFlags::INCLUDE_FIRST_STAGE;
            }
            if second_stage {
                flags |= EspFileFlags::INCLUDE_SECOND_STAGE;
            }
            if revocations {
                flags |= EspFileFlags::INCLUDE_REVOCATIONS;
            }
            if flags.is_empty() {
                flags = EspFileFlags::all();
            }
            for image in context.esp_files(flags)? {
                println!(
                    "Boot{:04X}\t{}\tmachine={:#06x}\tsections={}",
                    image.idx(),
                    image.filename().display(),
                    image.machine(),
                    image.num_sections(),
                );
            }
        }
        Command::State => {
            println!("flags:             {:?}", context.flags());
            println!("power state:       {}", context.power_state());
            println!("lid state:         {}", context.lid_state());
            println!("display state:     {}", context.display_state());
            println!("battery level:     {}", context.battery_level());
            println!("battery threshold: {}", context.battery_threshold());
            println!("chassis kind:      {:?}", context.chassis_kind());
        }
    }

    Ok(())
}
