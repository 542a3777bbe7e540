//! Stage bands and monotonic progress reporting.

use std::sync::{Arc, Mutex, PoisonError};

use reel_media::MediaProgress;

/// Receives `(fraction, message)` updates for one job.
pub type ProgressCallback = Arc<dyn Fn(f64, String) + Send + Sync>;

/// Pipeline stages in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Segmenting,
    Resolving,
    Composing,
    Assembling,
    Finalizing,
}

impl Stage {
    /// Slice of overall progress owned by this stage.
    pub fn band(&self) -> (f64, f64) {
        match self {
            Stage::Segmenting => (0.0, 0.10),
            Stage::Resolving => (0.10, 0.40),
            Stage::Composing => (0.40, 0.80),
            Stage::Assembling => (0.80, 0.95),
            Stage::Finalizing => (0.95, 1.0),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Segmenting => "segmenting",
            Stage::Resolving => "resolving",
            Stage::Composing => "composing",
            Stage::Assembling => "assembling",
            Stage::Finalizing => "finalizing",
        }
    }

    /// Map progress within the stage to overall progress.
    pub fn fraction(&self, within: f64) -> f64 {
        let (start, end) = self.band();
        start + (end - start) * within.clamp(0.0, 1.0)
    }
}

/// Forwards progress to a callback, never letting the fraction go backwards.
pub struct ProgressReporter {
    callback: ProgressCallback,
    last: Mutex<f64>,
}

impl ProgressReporter {
    pub fn new(callback: ProgressCallback) -> Self {
        Self {
            callback,
            last: Mutex::new(0.0),
        }
    }

    pub fn stage(&self, stage: Stage, within: f64, message: impl Into<String>) {
        self.report(stage.fraction(within), message);
    }

    pub fn report(&self, fraction: f64, message: impl Into<String>) {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let fraction = fraction.clamp(0.0, 1.0).max(*last);
        *last = fraction;
        (self.callback)(fraction, message.into());
    }

    /// Sink for a media step covering `[from, to]` of `stage`.
    pub fn media_sink(self: &Arc<Self>, stage: Stage, from: f64, to: f64, message: impl Into<String>) -> MediaProgress {
        let reporter = Arc::clone(self);
        let message = message.into();
        Arc::new(move |done: f64| {
            let within = from + (to - from) * done.clamp(0.0, 1.0);
            reporter.stage(stage, within, message.clone());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bands_are_contiguous() {
        let stages = [
            Stage::Segmenting,
            Stage::Resolving,
            Stage::Composing,
            Stage::Assembling,
            Stage::Finalizing,
        ];
        assert_eq!(stages[0].band().0, 0.0);
        assert_eq!(stages[4].band().1, 1.0);
        for pair in stages.windows(2) {
            assert_eq!(pair[0].band().1, pair[1].band().0);
        }
        assert!((Stage::Composing.fraction(0.5) - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_reporter_is_monotonic() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reporter = ProgressReporter::new(Arc::new(move |f, _| sink.lock().unwrap().push(f)));

        reporter.stage(Stage::Composing, 0.5, "half");
        reporter.stage(Stage::Resolving, 1.0, "late update");
        reporter.report(2.0, "overflow");

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.len(), 3);
        assert!((seen[0] - 0.6).abs() < 1e-9);
        assert_eq!(seen[1], seen[0]);
        assert_eq!(seen[2], 1.0);
    }

    #[test]
    fn test_media_sink_maps_into_scene_slice() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let reporter = Arc::new(ProgressReporter::new(Arc::new(move |f, m| {
            sink.lock().unwrap().push((f, m))
        })));

        // second of four scenes
        let media = reporter.media_sink(Stage::Composing, 0.25, 0.5, "Composing scene 2/4");
        media(0.0);
        media(0.5);
        media(1.0);

        let seen = seen.lock().unwrap().clone();
        let fractions: Vec<f64> = seen.iter().map(|(f, _)| *f).collect();
        assert!((fractions[0] - Stage::Composing.fraction(0.25)).abs() < 1e-9);
        assert!((fractions[1] - Stage::Composing.fraction(0.375)).abs() < 1e-9);
        assert!((fractions[2] - Stage::Composing.fraction(0.5)).abs() < 1e-9);
        assert!(seen.iter().all(|(_, m)| m == "Composing scene 2/4"));
    }
}
