//! Show the tracks of a video and the crop an edit would use.

use std::path::PathBuf;

use squarecut_common::EditConfig;
use squarecut_edit_engine::backend::GstBackend;
use squarecut_edit_engine::codec::MediaBackend;
use squarecut_edit_engine::track_select::select_tracks;
use squarecut_media_model::{CropRect, MediaType};

pub fn run(config: &EditConfig, input: PathBuf) -> anyhow::Result<()> {
    let backend = GstBackend::new()?;
    let mut demuxer = backend
        .open_demuxer(&input)
        .map_err(|e| anyhow::anyhow!("Failed to open {}: {e}", input.display()))?;
    let tracks = demuxer.tracks().to_vec();
    demuxer.release();

    println!("Source: {}", input.display());
    println!();
    println!("Tracks:");
    for track in &tracks {
        let f = &track.format;
        let mut line = format!("  #{} {:?} {}", track.index, track.media_type, f.mime);
        match track.media_type {
            MediaType::Video => {
                if let (Some(w), Some(h)) = (f.width, f.height) {
                    line.push_str(&format!(" {w}x{h}"));
                }
                if f.rotation_degrees != 0 {
                    line.push_str(&format!(" rotated {}°", f.rotation_degrees));
                }
            }
            MediaType::Audio => {
                if let Some(rate) = f.sample_rate {
                    line.push_str(&format!(" {rate}Hz"));
                }
                if let Some(channels) = f.channels {
                    line.push_str(&format!(" {channels}ch"));
                }
            }
            MediaType::Other => {}
        }
        if let Some(duration) = f.duration_us {
            line.push_str(&format!(" ({:.2}s)", duration as f64 / 1_000_000.0));
        }
        println!("{line}");
    }
    println!();

    let selection = select_tracks(&tracks);
    let Some(video) = selection
        .video
        .and_then(|index| tracks.iter().find(|t| t.index == index))
    else {
        println!("No video track: trim would produce no output.");
        return Ok(());
    };

    println!("Edit geometry:");
    println!("  Video track: #{}", video.index);
    match selection.audio {
        Some(index) => println!("  Audio track: #{index}"),
        None => println!("  Audio track: none"),
    }
    if let Some((w, h)) = video.format.display_size() {
        let side = config.encoder.output_side(w, h);
        println!("  Display size: {w}x{h}");
        println!("  Default crop: {}", CropRect::centered_square(w, h));
        println!("  Output: {side}x{side} @ {}fps", config.encoder.fps);
    }
    Ok(())
}
