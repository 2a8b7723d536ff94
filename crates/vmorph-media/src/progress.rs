//! FFmpeg progress parsing.

use serde::{Deserialize, Serialize};

/// Progress information from FFmpeg's `-progress` output.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FfmpegProgress {
    /// Current frame number
    pub frame: u64,
    /// Output time in milliseconds
    pub out_time_ms: i64,
    /// Encoding speed (e.g., 1.5 = 1.5x realtime)
    pub speed: f64,
    /// Whether encoding is complete
    pub is_complete: bool,
}

/// Classification of one stderr line.
#[derive(Debug, Clone, PartialEq)]
pub enum StderrLine {
    /// A `progress=` line closing a block; carries the accumulated snapshot.
    Block(FfmpegProgress),
    /// Any other `key=value` progress field.
    Field,
    /// Free-form output, i.e. FFmpeg's own diagnostics.
    Diagnostic(String),
}

/// Parse one stderr line, folding progress fields into `current`.
pub fn parse_stderr_line(line: &str, current: &mut FfmpegProgress) -> StderrLine {
    let line = line.trim();

    let Some((key, value)) = line.split_once('=') else {
        return StderrLine::Diagnostic(line.to_string());
    };
    if key.is_empty() || !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return StderrLine::Diagnostic(line.to_string());
    }

    match key {
        "out_time_us" => {
            if let Ok(us) = value.parse::<i64>() {
                current.out_time_ms = us / 1000;
            }
        }
        "frame" => {
            if let Ok(frame) = value.parse() {
                current.frame = frame;
            }
        }
        "speed" => {
            // "1.5x" or "N/A"
            if let Some(speed) = value.strip_suffix('x').and_then(|s| s.trim().parse().ok()) {
                current.speed = speed;
            }
        }
        "progress" => {
            if value == "end" {
                current.is_complete = true;
            }
            return StderrLine::Block(current.clone());
        }
        _ => {}
    }

    StderrLine::Field
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_block() {
        let mut progress = FfmpegProgress::default();

        assert_eq!(parse_stderr_line("frame=120", &mut progress), StderrLine::Field);
        parse_stderr_line("out_time_us=5000000", &mut progress);
        parse_stderr_line("speed=1.5x", &mut progress);

        match parse_stderr_line("progress=end", &mut progress) {
            StderrLine::Block(snapshot) => {
                assert_eq!(snapshot.frame, 120);
                assert_eq!(snapshot.out_time_ms, 5000);
                assert!((snapshot.speed - 1.5).abs() < 0.01);
                assert!(snapshot.is_complete);
            }
            other => panic!("expected progress block, got {:?}", other),
        }
    }

    #[test]
    fn test_speed_not_available() {
        let mut progress = FfmpegProgress::default();
        parse_stderr_line("speed=N/A", &mut progress);
        assert_eq!(progress.speed, 0.0);
    }

    #[test]
    fn test_diagnostics() {
        let mut progress = FfmpegProgress::default();
        assert_eq!(
            parse_stderr_line("in.mp4: Invalid data found when processing input", &mut progress),
            StderrLine::Diagnostic("in.mp4: Invalid data found when processing input".to_string())
        );
        assert!(matches!(
            parse_stderr_line("[libx264 @ 0x1] width not divisible by 2 (w=101)", &mut progress),
            StderrLine::Diagnostic(_)
        ));
    }
}
