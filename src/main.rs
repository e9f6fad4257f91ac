use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use argh::FromArgs;
use image::GenericImageView;
use log::{error, info};

use hub75_rpi_painter::{Display, Frame, Rgba, HEIGHT, WIDTH};

/// Drive a 32x32 HUB75 RGB LED matrix panel from a PNG image over the
/// Raspberry Pi's memory-mapped GPIO register block.
#[derive(FromArgs)]
struct Args {
    /// path to a PNG image, exactly 32x32 pixels
    #[argh(positional)]
    image: PathBuf,

    /// best-effort SCHED_FIFO real-time priority (requires CAP_SYS_NICE)
    #[argh(option)]
    realtime_priority: Option<i32>,
}

fn load_frame(path: &PathBuf) -> anyhow::Result<Frame> {
    let img = image::open(path)?;
    let (w, h) = img.dimensions();
    if w as usize != WIDTH || h as usize != HEIGHT {
        anyhow::bail!(
            "image is {w}x{h}, expected exactly {WIDTH}x{HEIGHT} (not resized, per the panel's \
             fixed geometry)"
        );
    }

    let rgba = img.to_rgba8();
    let pixels = rgba
        .pixels()
        .map(|p| Rgba::new(p[0], p[1], p[2], p[3]));
    Ok(Frame::from_pixels(pixels))
}

fn run() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    let frame = load_frame(&args.image)?;

    let display = Display::new()?;
    if let Some(priority) = args.realtime_priority {
        display.set_realtime_priority(priority);
    }

    display.frame(frame);
    info!("frame submitted, running until interrupted");

    let terminate = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(&terminate))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&terminate))?;

    while !terminate.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(100));
    }

    info!("shutting down");
    display.stop();
    Ok(())
}

fn main() -> ExitCode {
    env_logger::init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err:#}");
            ExitCode::FAILURE
        }
    }
}
