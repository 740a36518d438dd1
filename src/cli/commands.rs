//! CLI command implementations.

use crate::config::Settings;
use crate::search::SearchOptions;
use crate::server::AppState;
use std::time::Duration;

/// Register new files from the video directory, optionally processing them.
pub async fn run_scan(process: bool, settings: Settings) -> anyhow::Result<()> {
    let state = AppState::build(settings)?;

    let video_dir = state.settings.video_dir();
    let mut added = Vec::new();
    let mut already = 0usize;

    if video_dir.exists() {
        for entry in std::fs::read_dir(&video_dir)?.flatten() {
            let path = entry.path();
            if !path.is_file() || !state.settings.is_video_file(&path) {
                continue;
            }
            let video_id = match path.file_stem().and_then(|s| s.to_str()) {
                Some(stem) => stem.to_string(),
                None => continue,
            };
            if state.catalog.insert_video(&video_id, &video_id, path.to_str())? {
                added.push(video_id);
            } else {
                already += 1;
            }
        }
    }

    println!("Added {} videos ({} already known)", added.len(), already);

    if process && !added.is_empty() {
        for video_id in &added {
            state.scheduler.enqueue(video_id, video_id);
        }
        wait_for_queue(&state).await;
    }

    Ok(())
}

/// Queue everything without a transcript and wait for the pipeline.
pub async fn run_process_pending(settings: Settings) -> anyhow::Result<()> {
    let state = AppState::build(settings)?;

    let pending = state.catalog.pending_videos()?;
    if pending.is_empty() {
        println!("Nothing to process.");
        return Ok(());
    }

    println!("Processing {} videos...", pending.len());
    for video in &pending {
        state.scheduler.enqueue(&video.video_id, &video.title);
    }
    wait_for_queue(&state).await;
    Ok(())
}

/// Search the index and print results.
pub async fn run_search(
    query: &str,
    top_k: usize,
    use_fts: bool,
    settings: Settings,
) -> anyhow::Result<()> {
    let state = AppState::build(settings)?;

    let opts = SearchOptions {
        top_k,
        video_ids: None,
        use_lexical: use_fts,
    };
    let hits = state.searcher.search(query, &opts).await?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{:2}. [{}] {:>8.1}s-{:<8.1}s score {:.4}",
            i + 1,
            hit.video_id,
            hit.start_sec,
            hit.end_sec,
            hit.score
        );
        println!("    {}", hit.text);
    }
    Ok(())
}

/// Check external tools and configuration.
pub async fn run_doctor(settings: &Settings) -> anyhow::Result<()> {
    let mut ok = true;

    for tool in ["ffmpeg", "yt-dlp"] {
        match tokio::process::Command::new(tool)
            .arg("--version")
            .output()
            .await
        {
            Ok(out) if out.status.success() => println!("  [ok] {}", tool),
            _ => {
                println!("  [!!] {} not found in PATH", tool);
                ok = false;
            }
        }
    }

    if std::env::var("OPENAI_API_KEY").is_ok() {
        println!("  [ok] OPENAI_API_KEY is set");
    } else {
        println!("  [!!] OPENAI_API_KEY is not set");
        ok = false;
    }

    match settings.ensure_dirs() {
        Ok(()) => println!("  [ok] data dir {}", settings.data_dir().display()),
        Err(e) => {
            println!("  [!!] data dir {}: {}", settings.data_dir().display(), e);
            ok = false;
        }
    }

    if !ok {
        anyhow::bail!("some checks failed");
    }
    Ok(())
}

/// Poll the queue until every entry is terminal, printing transitions.
async fn wait_for_queue(state: &AppState) {
    loop {
        let snapshot = state.scheduler.snapshot();
        if snapshot.iter().all(|e| e.status.is_terminal()) {
            for entry in &snapshot {
                match &entry.error {
                    Some(err) => println!("  {} failed: {}", entry.video_id, err),
                    None => println!("  {} done", entry.video_id),
                }
            }
            return;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
}
