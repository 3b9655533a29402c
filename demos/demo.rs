//! Demo application: worker threads hold a device while it is shut down.
//!
//! Run with:
//! ```bash
//! RUST_LOG=debug cargo run --example demo --features demo -- --help
//! ```

use clap::{Parser, ValueEnum};
use riferimenti::percpu::{InitFlags, PercpuRef};
use riferimenti::reclaim::{DeferredReclamation, Epoch};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Initial representation of the device reference.
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
enum StartMode {
    #[default]
    Percpu,
    Atomic,
}

#[derive(Parser, Debug)]
#[command(about = "Percpu reference shutdown demo")]
struct Args {
    /// Number of worker threads
    #[arg(short, long, default_value_t = 4)]
    threads: usize,

    /// How long the workers run before the device is killed, in milliseconds
    #[arg(short, long, default_value_t = 200)]
    millis: u64,

    /// Initial representation
    #[arg(long, value_enum, default_value_t = StartMode::Percpu)]
    start: StartMode,

    /// Pretty-print snapshots
    #[arg(long)]
    pretty: bool,
}

fn print_snapshot(device: &PercpuRef, pretty: bool) {
    let snapshot = device.snapshot();
    let json = if pretty {
        snapshot.to_json_pretty()
    } else {
        snapshot.to_json()
    };
    match json {
        Ok(json) => println!("{json}"),
        Err(e) => eprintln!("snapshot error: {e}"),
    }
}

fn main() -> riferimenti::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let released = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&released);

    let flags = match args.start {
        StartMode::Percpu => InitFlags::empty(),
        StartMode::Atomic => InitFlags::START_ATOMIC,
    };

    let device = Arc::new(
        PercpuRef::builder()
            .with_name("device")
            .with_flags(flags)
            .build(move || {
                println!("device released");
                flag.store(true, Ordering::Release);
            })?,
    );

    let served = Arc::new(AtomicUsize::new(0));
    let refused = Arc::new(AtomicUsize::new(0));
    let mut handles = vec![];

    for _ in 0..args.threads {
        let device = Arc::clone(&device);
        let served = Arc::clone(&served);
        let refused = Arc::clone(&refused);
        handles.push(thread::spawn(move || loop {
            if device.tryget_live() {
                served.fetch_add(1, Ordering::Relaxed);
                device.put();
            } else {
                refused.fetch_add(1, Ordering::Relaxed);
                break;
            }
        }));
    }

    thread::sleep(Duration::from_millis(args.millis));
    print_snapshot(&device, args.pretty);

    let confirmed = Arc::new(AtomicBool::new(false));
    let c = Arc::clone(&confirmed);
    device.kill_and_confirm(move || {
        println!("kill confirmed");
        c.store(true, Ordering::Release);
    });

    for handle in handles {
        let _ = handle.join();
    }

    while !released.load(Ordering::Acquire) {
        Epoch.flush();
        thread::yield_now();
    }

    print_snapshot(&device, args.pretty);
    println!(
        "served {} requests, {} workers refused after kill (confirmed: {})",
        served.load(Ordering::Relaxed),
        refused.load(Ordering::Relaxed),
        confirmed.load(Ordering::Acquire)
    );

    if let Ok(device) = Arc::try_unwrap(device) {
        device.exit();
    }
    Ok(())
}
