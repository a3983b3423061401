use std::path::{Path, PathBuf};

use animseq::Frame;

fn exe() -> PathBuf {
    std::env::var_os("CARGO_BIN_EXE_animseq")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            let mut p = PathBuf::from("target").join("debug");
            p.push(if cfg!(windows) {
                "animseq.exe"
            } else {
                "animseq"
            });
            p
        })
}

fn fresh_dir(name: &str) -> PathBuf {
    let dir = PathBuf::from("target").join("cli_smoke").join(name);
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

fn write_frames(dir: &Path, count: usize) {
    for i in 0..count {
        let v = (i * 40) as u8;
        Frame::solid(2, 2, [v, v, v, 255])
            .save(&dir.join(format!("frame_{i:05}.png")), 95)
            .unwrap();
    }
}

#[test]
fn cli_index_prints_sequence_json() {
    let dir = fresh_dir("index");
    write_frames(&dir, 3);

    let out = std::process::Command::new(exe())
        .args(["index", "--fps", "12", "--dir"])
        .arg(&dir)
        .output()
        .unwrap();

    assert!(out.status.success());
    let json: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(json["frame_counter"]["total_frames"], 3);
    assert_eq!(json["frame_counter"]["frames_per_second"], 12.0);
    assert_eq!(json["num_batches"], 1);
}

#[test]
fn cli_tween_rewrites_directory() {
    let dir = fresh_dir("tween");
    write_frames(&dir, 3);
    let config = dir.join("config.json");

    let status = std::process::Command::new(exe())
        .arg("--config")
        .arg(&config)
        .args(["tween", "--multiplier", "2", "--dir"])
        .arg(&dir)
        .status()
        .unwrap();

    assert!(status.success());
    assert!(config.is_file());
    let frames = std::fs::read_dir(&dir)
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with("seq_"))
        .count();
    assert_eq!(frames, 6);
}

#[test]
fn cli_rejects_out_of_range_multiplier() {
    let dir = fresh_dir("bad_multiplier");
    write_frames(&dir, 2);

    let status = std::process::Command::new(exe())
        .args(["tween", "--multiplier", "11", "--dir"])
        .arg(&dir)
        .status()
        .unwrap();

    assert!(!status.success());
    assert!(dir.join("frame_00000.png").is_file());
}
