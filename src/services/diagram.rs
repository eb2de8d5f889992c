use resvg::{tiny_skia, usvg};
use thiserror::Error;

/// Rasterize at twice the SVG's nominal size so text stays sharp on HiDPI.
const RENDER_SCALE: f32 = 2.0;
const MAX_EDGE_PX: f32 = 4096.0;

#[derive(Debug, Error)]
pub enum DiagramError {
    #[error("Invalid diagram syntax: {0}")]
    Syntax(String),

    #[error("Failed to rasterize diagram: {0}")]
    Raster(String),

    #[error("Diagram task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// A diagram rendered to PNG, plus the logical size it should be shown at.
#[derive(Debug, Clone)]
pub struct RenderedDiagram {
    pub png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

pub fn mermaid_to_svg(source: &str) -> Result<String, DiagramError> {
    if source.trim().is_empty() {
        return Err(DiagramError::Syntax("empty diagram".to_string()));
    }
    mermaid_rs_renderer::render(source).map_err(|e| DiagramError::Syntax(e.to_string()))
}

pub fn rasterize_svg(svg: &str) -> Result<RenderedDiagram, DiagramError> {
    let mut opts = usvg::Options::default();
    opts.fontdb_mut().load_system_fonts();

    let tree = usvg::Tree::from_str(svg, &opts).map_err(|e| DiagramError::Raster(e.to_string()))?;

    let size = tree.size();
    let scale = RENDER_SCALE.min(MAX_EDGE_PX / size.width().max(size.height()).max(1.0));
    let px_w = (size.width() * scale).ceil() as u32;
    let px_h = (size.height() * scale).ceil() as u32;

    let mut pixmap = tiny_skia::Pixmap::new(px_w.max(1), px_h.max(1))
        .ok_or_else(|| DiagramError::Raster(format!("invalid size {}x{}", px_w, px_h)))?;
    pixmap.fill(tiny_skia::Color::WHITE);

    resvg::render(
        &tree,
        tiny_skia::Transform::from_scale(scale, scale),
        &mut pixmap.as_mut(),
    );

    let png = pixmap
        .encode_png()
        .map_err(|e| DiagramError::Raster(e.to_string()))?;

    Ok(RenderedDiagram {
        png,
        width: size.width().ceil() as u32,
        height: size.height().ceil() as u32,
    })
}

/// Render Mermaid source to a PNG on the blocking pool.
pub async fn render_diagram(source: String) -> Result<RenderedDiagram, DiagramError> {
    tokio::task::spawn_blocking(move || {
        let svg = mermaid_to_svg(&source)?;
        rasterize_svg(&svg)
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = r#"<svg xmlns="http://www.w3.org/2000/svg" width="40" height="20">
        <rect x="0" y="0" width="40" height="20" fill="red"/></svg>"#;

    #[test]
    fn test_rasterize_svg_scales_up() {
        let out = rasterize_svg(SQUARE).unwrap();
        assert_eq!((out.width, out.height), (40, 20));
        let decoded = image::load_from_memory(&out.png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (80, 40));
    }

    #[test]
    fn test_rasterize_rejects_garbage() {
        assert!(matches!(
            rasterize_svg("not svg at all"),
            Err(DiagramError::Raster(_))
        ));
    }

    #[test]
    fn test_empty_source_is_syntax_error() {
        assert!(matches!(mermaid_to_svg("  \n"), Err(DiagramError::Syntax(_))));
    }

    #[tokio::test]
    async fn test_render_flowchart() {
        let out = render_diagram("flowchart LR\n  A-->B".to_string()).await.unwrap();
        assert!(out.width > 0 && out.height > 0);
        assert!(out.png.starts_with(&[0x89, b'P', b'N', b'G']));
    }
}
