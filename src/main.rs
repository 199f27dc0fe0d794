//! Drive Octoscroller panels through the PRU, or a simulated one.
//!
//! Usage:
//!   hub75-pru                                    # real hardware
//!   hub75-pru --offline --pace-ms 5 --frames 500 # no hardware needed

use std::error::Error;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{Circle, PrimitiveStyle, Rectangle};
use log::info;

use hub75_pru::bridge::{Bridge, BridgeConfig, DEFAULT_DEVICE, DEFAULT_MEMORY};
use hub75_pru::buffer::PixelBuffer;
use hub75_pru::encoder::{Encoder, EncoderConfig, DEFAULT_ROW_SELECT_OFFSET};
use hub75_pru::offline::OfflineFrameset;
use hub75_pru::render::{monitor_throughput, PatternSource, RenderLoop, MONITOR_INTERVAL};
use hub75_pru::sync::{BankSynchronizer, FramesetStorage};
use hub75_pru::tables::DEVICE_GAMMA;
use hub75_pru::{Color, HEIGHT, WIDTH};

#[derive(Parser, Debug)]
#[command(author, version, about = "Temporal-dither HUB75 driver for the BeagleBone PRU")]
struct Args {
    /// Messaging device of the PRU firmware
    #[arg(long, default_value = DEFAULT_DEVICE)]
    device: PathBuf,

    /// Physical memory device
    #[arg(long, default_value = DEFAULT_MEMORY)]
    memory: PathBuf,

    /// Display gamma
    #[arg(long, default_value_t = DEVICE_GAMMA)]
    gamma: f64,

    /// Offset added to the row index to form the row-select value
    #[arg(long, default_value_t = DEFAULT_ROW_SELECT_OFFSET)]
    row_select_offset: usize,

    /// Use a heap frameset and a simulated coprocessor instead of the PRU
    #[arg(long)]
    offline: bool,

    /// Milliseconds the simulated coprocessor spends on each bank
    #[arg(long, default_value_t = 0)]
    pace_ms: u64,

    /// Seconds between throughput reports, 0 to disable
    #[arg(long, default_value_t = MONITOR_INTERVAL.as_secs())]
    monitor_secs: u64,

    /// Stop after publishing this many frames
    #[arg(long)]
    frames: Option<u64>,
}

/// A bordered frame with a circle orbiting the centre, slowly changing hue.
#[derive(Debug, Default)]
struct Demo {
    tick: u32,
}

impl Demo {
    fn color(&self, phase: u32) -> Color {
        let wave = |offset: u32| {
            let t = (self.tick / 2 + phase + offset) % 512;
            (if t < 256 { t } else { 511 - t }) as u8
        };
        Color::new(wave(0), wave(170), wave(340))
    }
}

impl PatternSource for Demo {
    fn next_frame(&mut self, buffer: &mut PixelBuffer) {
        self.tick = self.tick.wrapping_add(1);
        buffer.fill(Color::BLACK);

        let Ok(()) = Rectangle::new(Point::zero(), Size::new(WIDTH as u32, HEIGHT as u32))
            .into_styled(PrimitiveStyle::with_stroke(self.color(0), 2))
            .draw(buffer);

        let angle = f64::from(self.tick) * 0.04;
        let center = Point::new(WIDTH as i32 / 2, HEIGHT as i32 / 2);
        let offset = Point::new((angle.cos() * 36.0) as i32, (angle.sin() * 36.0) as i32);
        let Ok(()) = Circle::with_center(center + offset, 30)
            .into_styled(PrimitiveStyle::with_fill(self.color(256)))
            .draw(buffer);
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let encoder = Encoder::new(EncoderConfig {
        gamma: args.gamma,
        row_select_offset: args.row_select_offset,
    });
    let stop = Arc::new(AtomicBool::new(false));

    if args.offline {
        info!("offline mode, simulated coprocessor paced at {} ms per bank", args.pace_ms);
        let mut frames = OfflineFrameset::new();
        let coprocessor = frames
            .coprocessor()
            .with_pace(Duration::from_millis(args.pace_ms))
            .spawn(Arc::clone(&stop));

        let published = drive(&mut frames, encoder, &args, &stop);
        stop.store(true, Ordering::Release);
        let stats = coprocessor
            .join()
            .map_err(|_| "coprocessor simulator panicked")?;
        info!(
            "published {published} frames; simulator replayed {} banks, {} switches, {} torn",
            stats.banks, stats.switches, stats.torn
        );
    } else {
        let config = BridgeConfig {
            device: args.device.clone(),
            memory: args.memory.clone(),
            ..BridgeConfig::default()
        };
        let mut bridge = Bridge::connect(&config)?;
        info!("{bridge:?}");
        let published = drive(&mut bridge, encoder, &args, &stop);
        info!("published {published} frames");
    }
    Ok(())
}

fn drive<S: FramesetStorage>(storage: &mut S, encoder: Encoder, args: &Args, stop: &AtomicBool) -> u64 {
    let interval = Duration::from_secs(args.monitor_secs);
    let monitor_stop = AtomicBool::new(false);
    let (control, frameset) = storage.split();

    thread::scope(|scope| {
        if !interval.is_zero() {
            scope.spawn(|| monitor_throughput(control, interval, &monitor_stop));
        }

        let sync = BankSynchronizer::new(control, frameset);
        let mut render = RenderLoop::new(sync, encoder, Demo::default());
        let published = render.run(stop, args.frames);
        monitor_stop.store(true, Ordering::Release);
        published
    })
}
