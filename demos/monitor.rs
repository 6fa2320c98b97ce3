//! Live monitor for the sound device manager
//!
//! Lists every device, activates the startup device (or the one given on the
//! command line) and prints buffer statistics once per second.
//!
//! ```text
//! cargo run --example monitor -- [config.toml] [device name] [seconds]
//! ```

use std::time::{Duration, Instant};

use crossbeam_channel::{select, tick};
use sound_devices::{logging, DeviceKind, ManagerConfig, SoundDeviceManager};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1).peekable();

    let config = match args.next_if(|a| a.ends_with(".toml")) {
        Some(path) => ManagerConfig::load(path)?,
        None => ManagerConfig::default(),
    };
    logging::init(&config.log);

    println!("=== Sound Device Monitor ===\n");

    let manager = SoundDeviceManager::new(config);
    let buffers = manager.subscribe_buffers();
    let errors = manager.subscribe_errors();

    for device in manager.list_devices(DeviceKind::None) {
        println!("  {}", serde_json::to_string(&device)?);
    }

    if let Some(name) = args.next() {
        match manager
            .list_devices(DeviceKind::None)
            .into_iter()
            .find(|d| d.name() == name)
        {
            Some(device) => {
                manager.select(&device)?;
            }
            None => println!("No device named {name}, keeping the startup device"),
        }
    }
    let seconds: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(10);

    println!("\nMonitoring {} ({:?})\n", manager.current(), manager.active_format());

    let deadline = Instant::now() + Duration::from_secs(seconds);
    let ticker = tick(Duration::from_secs(1));
    let (mut count, mut frames, mut peak) = (0usize, 0usize, 0.0f32);

    while Instant::now() < deadline {
        select! {
            recv(buffers) -> buffer => {
                let Ok(buffer) = buffer else { break };
                count += 1;
                frames += buffer.frames;
                peak = buffer.to_f32().iter().fold(peak, |m, s| m.max(s.abs()));
            }
            recv(errors) -> event => {
                if let Ok(event) = event {
                    println!("  ✗ {}", event.message);
                }
            }
            recv(ticker) -> _ => {
                println!("  {count:4} buffers  {frames:7} frames  peak {peak:.3}");
                (count, frames, peak) = (0, 0, 0.0);
            }
        }
    }

    manager.shutdown();
    Ok(())
}
