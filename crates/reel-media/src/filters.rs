//! FFmpeg filter builders for segment composition and assembly.

use std::path::Path;

use reel_models::{CompositionConfig, LetterboxMode, OverlayPosition, TextOverlay, Transition};

/// Scale a visual into the output frame following the letterbox rule,
/// then normalize pixel format, sample aspect and frame rate.
pub fn frame_filter(config: &CompositionConfig) -> String {
    let (w, h) = (config.width, config.height);
    let fit = match config.letterbox {
        LetterboxMode::Pad => format!(
            "scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color={}",
            config.pad_color
        ),
        LetterboxMode::Crop => {
            format!("scale={w}:{h}:force_original_aspect_ratio=increase,crop={w}:{h}")
        }
    };
    format!("{fit},setsar=1,fps={},format=yuv420p", config.fps)
}

/// Escape a path for use inside a quoted filter option.
pub fn escape_filter_path(path: &Path) -> String {
    path.to_string_lossy()
        .replace('\\', "/")
        .replace(':', "\\:")
        .replace('\'', "\\'")
}

/// Wrap overlay text so each line fits inside the frame width.
pub fn wrap_overlay_text(text: &str, frame_width: u32, font_size: u32) -> String {
    // Average glyph width is roughly 0.55 of the font size
    let max_chars = ((frame_width as f64 * 0.85) / (font_size.max(1) as f64 * 0.55)).floor() as usize;
    let max_chars = max_chars.max(8);

    let mut lines: Vec<String> = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        let candidate_len = current.chars().count() + word.chars().count() + usize::from(!current.is_empty());
        if !current.is_empty() && candidate_len > max_chars {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines.join("\n")
}

/// `drawtext` filter reading the overlay text from `text_file`.
///
/// Text is read from a file so that arbitrary script content never has to
/// survive filtergraph escaping.
pub fn drawtext_filter(overlay: &TextOverlay, text_file: &Path) -> String {
    let style = &overlay.style;
    let y = match overlay.position {
        OverlayPosition::Top => "h*0.08",
        OverlayPosition::Center => "(h-text_h)/2",
        OverlayPosition::Bottom => "h-text_h-h*0.12",
    };

    let mut filter = format!(
        "drawtext=textfile='{}':fontsize={}:fontcolor={}:line_spacing=12:x=(w-text_w)/2:y={}",
        escape_filter_path(text_file),
        style.font_size,
        style.font_color,
        y
    );
    if let Some(box_color) = &style.box_color {
        filter.push_str(&format!(":box=1:boxcolor={}:boxborderw=24", box_color));
    }
    if let Some(font_file) = &style.font_file {
        filter.push_str(&format!(":fontfile='{}'", escape_filter_path(font_file)));
    }
    filter
}

/// Cross-blend between two labelled video streams.
pub fn xfade_filter(kind: Transition, blend_secs: f64, offset_secs: f64) -> String {
    format!(
        "xfade=transition={}:duration={:.3}:offset={:.3}",
        kind.xfade_name().unwrap_or("fade"),
        blend_secs,
        offset_secs.max(0.0)
    )
}

/// Cross-blend between two labelled audio streams.
pub fn acrossfade_filter(blend_secs: f64) -> String {
    format!("acrossfade=d={:.3}:c1=tri:c2=tri", blend_secs)
}

/// Thumbnail scale filter.
pub fn thumbnail_filter(width: u32) -> String {
    format!("scale={}:-2", width)
}
