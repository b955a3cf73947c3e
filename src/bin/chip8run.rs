//! A thin external demonstrator, not a GUI: reads a ROM path from the command line,
//! runs it on the interpreter backend, and dumps each fresh frame to stdout as a grid
//! of `█`/` ` characters. No windowing toolkit, no persistent window, no event loop -
//! just a poll-and-print driver, grounded on `ltungv-chip8.rs/src/main.rs`'s
//! `std::env::args().skip(1)` convention for reading the ROM path.

use std::fs;
use std::thread;
use std::time::Duration;

use chip8vm::{Backend, Engine, EngineConfig, Frame, DISPLAY_HEIGHT, DISPLAY_WIDTH};

/// How many frames to render before exiting; this is a demonstrator, not a
/// persistent emulator front-end, so it runs for a bounded span rather than forever.
const MAX_FRAMES: usize = 600;

fn render(frame: &Frame) {
    print!("\x1B[2J\x1B[H"); // clear screen, home cursor
    let mut out = String::with_capacity((DISPLAY_WIDTH + 1) * DISPLAY_HEIGHT);
    for row in frame.iter() {
        for column in 0..DISPLAY_WIDTH {
            let bit = DISPLAY_WIDTH - 1 - column;
            out.push(if row & (1u64 << bit) != 0 { '█' } else { ' ' });
        }
        out.push('\n');
    }
    print!("{out}");
}

fn main() {
    env_logger::init();

    let path = match std::env::args().nth(1) {
        Some(path) => path,
        None => {
            eprintln!("usage: chip8run <path-to-rom>");
            std::process::exit(1);
        }
    };
    let rom = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("failed to read {path}: {err}");
            std::process::exit(1);
        }
    };

    let mut engine = Engine::new();
    if let Err(err) = engine.run(&rom, Backend::Interpreter, EngineConfig::default()) {
        eprintln!("failed to start engine: {err}");
        std::process::exit(1);
    }

    let mut frames_rendered = 0;
    while frames_rendered < MAX_FRAMES {
        let mut fresh = None;
        engine.consume_frame_buffer(|frame| fresh = Some(*frame));
        if let Some(frame) = fresh {
            render(&frame);
            frames_rendered += 1;
        }
        thread::sleep(Duration::from_millis(16));
    }

    if let Err(err) = engine.stop() {
        log::warn!("engine stopped with error: {err}");
    }
}
