use std::path::{Path, PathBuf};

use crate::{
    error::{PipelineError, Result},
    metadata::{ArtifactValue, MetadataStore},
    paths,
    stages::Capabilities,
};

/// Fetch a remote video into `output_dir` so it can enter the pipeline.
pub async fn download_video(caps: &Capabilities, url: &str, output_dir: &Path) -> Result<PathBuf> {
    let url = url.trim();
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(PipelineError::invalid_input(url, "not an http(s) URL"));
    }

    paths::ensure_dir(output_dir).await?;
    tracing::info!(%url, dir = %output_dir.display(), "downloading");
    let video = caps.media.download(url, output_dir).await?;

    if !video.is_file() {
        return Err(PipelineError::external(
            "yt-dlp",
            format!("reported {} but no file is there", video.display()),
        ));
    }

    MetadataStore::merge_many(
        output_dir,
        vec![
            ("source_url".to_string(), ArtifactValue::text(url)),
            ("downloaded_video".to_string(), ArtifactValue::path(&video)),
        ],
    )
    .await?;
    Ok(video)
}
