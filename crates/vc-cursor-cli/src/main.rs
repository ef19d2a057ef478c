#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use vc_cursor::{CursorConfig, CursorController, CursorImage};
use vc_mailbox::{
    call, firmware_version, overscan, videocore_alloc, videocore_free, EmulatedVideoCore,
    PropertyTag, VideoCore, VideoCoreDevice,
};

/// Size of the built-in arrow cursor.
const ARROW_SIZE: u32 = 16;
const TRANSFER_BUFFER_BYTES: u32 = 64 * 64 * 4;

#[derive(Debug, Parser)]
#[command(
    name = "vc-cursor",
    about = "Inspect and drive the VideoCore hardware cursor through the firmware mailbox"
)]
struct Args {
    /// Mailbox device node (created if missing). Defaults to $VC_MAILBOX_DEVICE or /dev/vc4mail.
    #[arg(long, global = true, value_name = "PATH")]
    device: Option<PathBuf>,

    /// Physical memory device used to map GPU memory. Defaults to $VC_MEM_DEVICE or /dev/mem.
    #[arg(long, global = true, value_name = "PATH")]
    mem_device: Option<PathBuf>,

    /// Talk to an in-process emulated firmware instead of the hardware.
    #[arg(long, global = true, action = clap::ArgAction::SetTrue)]
    emulated: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print firmware version, overscan and whether the hardware cursor is supported.
    Info,
    /// Show the built-in arrow at a position for a while, then release it.
    Show {
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        x: i32,
        #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
        y: i32,
        /// How long to keep the cursor up.
        #[arg(long, default_value_t = 5)]
        seconds: u64,
    },
    /// Disable the hardware cursor.
    Hide,
    /// Upload the built-in arrow and sweep it across the screen.
    Demo {
        #[arg(long, default_value_t = 64)]
        steps: u32,
        /// Delay between moves.
        #[arg(long, default_value_t = 16)]
        step_ms: u64,
    },
    /// Allocate, write, verify and release a transfer buffer repeatedly.
    AllocTest {
        #[arg(long, default_value_t = 16)]
        cycles: u32,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = CursorConfig::from_env().context("invalid environment configuration")?;
    if let Some(device) = &args.device {
        config.mailbox.device = device.clone();
    }
    if let Some(mem_device) = &args.mem_device {
        config.mailbox.mem_device = mem_device.clone();
    }

    let device: Box<dyn VideoCore> = if args.emulated {
        info!("using emulated firmware");
        Box::new(EmulatedVideoCore::new())
    } else {
        let device = VideoCoreDevice::open(&config.mailbox).with_context(|| {
            format!(
                "failed to open mailbox device {}",
                config.mailbox.device.display()
            )
        })?;
        Box::new(device)
    };

    match args.command {
        Command::Info => info(device, &config),
        Command::Show { x, y, seconds } => show(device, config, x, y, seconds),
        Command::Hide => hide(device),
        Command::Demo { steps, step_ms } => demo(device, config, steps, step_ms),
        Command::AllocTest { cycles } => alloc_test(device, cycles),
    }
}

fn info(mut device: Box<dyn VideoCore>, config: &CursorConfig) -> Result<()> {
    let version = firmware_version(&mut device).context("firmware version query failed")?;
    let borders = overscan(&mut device).context("overscan query failed")?;
    let supported = version >= config.min_firmware;

    println!("firmware version: {version}");
    println!(
        "overscan: top {} bottom {} left {} right {}",
        borders.top, borders.bottom, borders.left, borders.right
    );
    println!(
        "hardware cursor: {} (minimum firmware {})",
        if supported { "supported" } else { "unsupported" },
        config.min_firmware
    );
    Ok(())
}

fn ready_controller(
    device: Box<dyn VideoCore>,
    config: CursorConfig,
) -> Result<CursorController<Box<dyn VideoCore>>> {
    let mut cursor = CursorController::new(device, config);
    cursor
        .init()
        .context("hardware cursor initialisation failed")?;

    let arrow = arrow_pixels();
    cursor
        .load_image(&CursorImage::Argb {
            width: ARROW_SIZE,
            height: ARROW_SIZE,
            pixels: &arrow,
        })
        .context("cursor image upload failed")?;
    Ok(cursor)
}

fn show(
    device: Box<dyn VideoCore>,
    config: CursorConfig,
    x: i32,
    y: i32,
    seconds: u64,
) -> Result<()> {
    let mut cursor = ready_controller(device, config)?;
    cursor.move_to(x, y).context("cursor move failed")?;
    cursor.show().context("cursor show failed")?;
    println!("cursor shown at ({x}, {y})");

    thread::sleep(Duration::from_secs(seconds));
    cursor.close().context("cursor release failed")?;
    Ok(())
}

fn hide(mut device: Box<dyn VideoCore>) -> Result<()> {
    let [status] = call::<_, 1>(&mut device, PropertyTag::SetCursorState, &[0, 0, 0])
        .context("cursor state update failed")?;
    if status != 0 {
        bail!("firmware rejected cursor hide (status {status:#x})");
    }
    println!("cursor hidden");
    Ok(())
}

fn demo(device: Box<dyn VideoCore>, config: CursorConfig, steps: u32, step_ms: u64) -> Result<()> {
    let mut cursor = ready_controller(device, config)?;
    cursor.show().context("cursor show failed")?;

    for step in 0..steps {
        let pos = i32::try_from(step * 8).context("demo sweep too long")?;
        cursor.move_to(pos, pos).context("cursor move failed")?;
        if step_ms > 0 {
            thread::sleep(Duration::from_millis(step_ms));
        }
    }

    let surface = *cursor.surface();
    cursor.close().context("cursor release failed")?;
    println!(
        "demo finished: {steps} moves, last position ({}, {})",
        surface.x, surface.y
    );
    Ok(())
}

fn alloc_test(mut device: Box<dyn VideoCore>, cycles: u32) -> Result<()> {
    for cycle in 0..cycles {
        let mut block = videocore_alloc(&mut device, TRANSFER_BUFFER_BYTES)
            .with_context(|| format!("allocation failed in cycle {cycle}"))?;

        let pattern = (cycle as u8).wrapping_mul(31) | 1;
        block.as_mut_slice().fill(pattern);
        let intact = block.as_slice().iter().all(|&b| b == pattern);
        let bus = block.bus_address();

        videocore_free(&mut device, block)
            .with_context(|| format!("release failed in cycle {cycle}"))?;
        if !intact {
            bail!("readback mismatch in cycle {cycle} (bus {bus})");
        }
    }
    println!("alloc-test: {cycles} cycles ok");
    Ok(())
}

/// White arrow with a black outline, pointing up-left.
fn arrow_pixels() -> Vec<u32> {
    const OPAQUE_BLACK: u32 = 0xff00_0000;
    const OPAQUE_WHITE: u32 = 0xffff_ffff;
    let tip_rows = ARROW_SIZE - 4;

    let mut pixels = vec![0u32; (ARROW_SIZE * ARROW_SIZE) as usize];
    for y in 0..ARROW_SIZE {
        for x in 0..ARROW_SIZE {
            let head = y < tip_rows && x <= y;
            let stem = (y / 2 + 1)..=(y / 2 + 3);
            let tail = !head && y >= tip_rows / 2 && stem.contains(&x);
            if !(head || tail) {
                continue;
            }
            let edge = if head {
                x == 0 || x == y || y == tip_rows - 1
            } else {
                x == *stem.start() || x == *stem.end() || y == ARROW_SIZE - 1
            };
            pixels[(y * ARROW_SIZE + x) as usize] = if edge { OPAQUE_BLACK } else { OPAQUE_WHITE };
        }
    }
    pixels
}
