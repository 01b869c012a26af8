//! Check external tools and directories.

use std::path::Path;
use std::process::Command;

use reelcast_common::config::AppConfig;
use reelcast_render_engine::ffmpeg::command_exists;

pub fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Reelcast System Check");
    println!("{}", "=".repeat(50));

    let mut ok = true;

    for tool in ["ffmpeg", "ffprobe"] {
        if command_exists(tool) {
            println!("[OK] {tool}");
        } else {
            println!("[FAIL] {tool} not found in PATH");
            ok = false;
        }
    }

    if command_exists("ffmpeg") {
        if encoder_available(&config.render.encoder) {
            println!("[OK] Encoder: {}", config.render.encoder);
        } else {
            println!(
                "[WARN] Encoder {} not listed by ffmpeg; renders will fail",
                config.render.encoder
            );
        }
    }

    let recognizer = config.detection.text_cue.recognizer.as_str();
    if !config.detection.text_cue.enabled {
        println!("[OK] Text cues disabled");
    } else if recognizer == "tesseract" && !command_exists("tesseract") {
        println!("[WARN] tesseract not found; text cues will never fire");
    } else {
        println!("[OK] Text recognizer: {recognizer}");
    }

    println!();
    let paths = &config.paths;
    for (label, dir) in [
        ("Matches", &paths.matches_dir),
        ("Queue", &paths.queue_dir),
        ("Output", &paths.output_dir),
        ("Registry", &paths.registry_dir),
    ] {
        match writable_dir(dir) {
            Ok(()) => println!("[OK] {label}: {}", dir.display()),
            Err(e) => {
                println!("[FAIL] {label}: {} ({e})", dir.display());
                ok = false;
            }
        }
    }
    for (label, dir) in [("Assets", &paths.assets_dir), ("Logos", &paths.logos_dir)] {
        if dir.is_dir() {
            println!("[OK] {label}: {}", dir.display());
        } else {
            println!("[WARN] {label}: {} missing; branding will skip it", dir.display());
        }
    }

    println!();
    if ok {
        println!("All required tools and directories are available. Reelcast is ready.");
    } else {
        println!("Some requirements are missing. See above for fixes.");
    }
    Ok(())
}

fn encoder_available(encoder: &str) -> bool {
    Command::new("ffmpeg")
        .args(["-hide_banner", "-encoders"])
        .output()
        .map(|out| {
            String::from_utf8_lossy(&out.stdout)
                .split_whitespace()
                .any(|word| word == encoder)
        })
        .unwrap_or(false)
}

fn writable_dir(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let probe = dir.join(".reelcast-check");
    std::fs::write(&probe, b"")?;
    std::fs::remove_file(&probe)
}
