use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::RenderError;

use super::{RenderRequest, Renderer, Strategy};

/// Which strategy produced the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderOutcome {
    pub strategy: Strategy,
    /// True when stream copy failed and re-encode was used instead.
    pub fell_back: bool,
}

/// Overlays and slideshows need pixel compositing, so they go straight to
/// re-encode. Everything else tries stream copy first.
pub fn select_strategy(request: &RenderRequest) -> Strategy {
    if request.needs_pixels() {
        Strategy::Reencode
    } else {
        Strategy::StreamCopy
    }
}

/// Render with the selected strategy. A failed stream copy is retried
/// exactly once with re-encode; a failed re-encode is final.
pub async fn render_with_fallback(
    renderer: &dyn Renderer,
    request: &RenderRequest,
    progress: &(dyn Fn(f64) + Send + Sync),
) -> Result<RenderOutcome, RenderError> {
    let strategy = select_strategy(request);
    info!("Rendering with {} via {}", strategy, renderer.name());

    match renderer.render(request, strategy, progress).await {
        Ok(()) => Ok(RenderOutcome {
            strategy,
            fell_back: false,
        }),
        Err(err) if strategy == Strategy::StreamCopy => {
            warn!("Stream copy failed, falling back to re-encode: {}", err);
            remove_partial_output(request).await;
            renderer.render(request, Strategy::Reencode, progress).await?;
            Ok(RenderOutcome {
                strategy: Strategy::Reencode,
                fell_back: true,
            })
        }
        Err(err) => Err(err),
    }
}

async fn remove_partial_output(request: &RenderRequest) {
    if tokio::fs::try_exists(&request.output).await.unwrap_or(false) {
        if let Err(e) = tokio::fs::remove_file(&request.output).await {
            warn!(
                "Failed to remove partial output {}: {}",
                request.output.display(),
                e
            );
        }
    }
}
