//! Trim and square-crop a video.

use std::path::PathBuf;

use squarecut_common::EditConfig;
use squarecut_edit_engine::backend::GstBackend;
use squarecut_edit_engine::{spawn_edit, CancelToken, EditRequest, VideoEditor};
use squarecut_media_model::{CropRect, TimeRange};

pub async fn run(
    config: EditConfig,
    input: PathBuf,
    output: PathBuf,
    start: f64,
    end: f64,
    crop: Option<CropRect>,
    json: bool,
) -> anyhow::Result<()> {
    let range = TimeRange::new(start, end)?;
    let request = EditRequest {
        source: input,
        output,
        range,
        crop,
    };

    println!("Trimming: {}", request.source.display());
    println!("  Output: {}", request.output.display());
    println!("  Range: {start:.3}s - {end:.3}s");
    match &request.crop {
        Some(crop) => println!("  Crop: {crop}"),
        None => println!("  Crop: centered square"),
    }

    let editor = VideoEditor::new(GstBackend::new()?, config);
    let cancel = CancelToken::new();
    let handle = spawn_edit(editor, request, cancel.clone())?;

    let outcome = handle.wait();
    tokio::pin!(outcome);
    let result = tokio::select! {
        result = &mut outcome => result,
        _ = tokio::signal::ctrl_c() => {
            println!("\nCancelling...");
            cancel.cancel();
            outcome.await
        }
    };

    match result {
        Ok(summary) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
            } else {
                println!("\nEdit complete: {}", summary.output.display());
                println!(
                    "  {}x{} from crop {}",
                    summary.output_side, summary.output_side, summary.crop
                );
                println!(
                    "  Video chunks: {} ({} dropped)",
                    summary.video_chunks_written, summary.video_chunks_discarded
                );
                if summary.has_audio {
                    println!("  Audio samples: {}", summary.audio_samples_written);
                } else {
                    println!("  Audio: none");
                }
                println!("  Took {:.2}s", summary.elapsed_secs);
            }
            Ok(())
        }
        Err(e) if e.is_transient() => {
            println!("\nNo output written: {e}");
            Ok(())
        }
        Err(e) => Err(anyhow::anyhow!("Edit failed: {e}")),
    }
}
