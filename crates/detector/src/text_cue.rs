//! Text-Cue channel: keyword spotting on the broadcast scorebar.
//!
//! At most once per `interval_secs` of stream time the channel crops the
//! scorebar region, binarizes it, runs the recognizer, and fires when the
//! recognized text contains a configured keyword. Numeric keywords ("4",
//! "6") only match whole tokens so that a score like "146/3" does not count
//! as a boundary.

use reelcast_common::clock::Cadence;
use reelcast_common::config::{RollConfig, TextCueConfig};
use reelcast_job_model::{ChannelId, TriggerSignal};

use crate::channel::{FrameChannel, TriggerChannel};
use crate::recognizer::TextRecognizer;
use crate::sample::FrameSample;

/// Case-insensitive keyword matcher.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    keywords: Vec<String>,
}

impl KeywordMatcher {
    pub fn new(keywords: &[String]) -> Self {
        Self {
            keywords: keywords
                .iter()
                .map(|k| k.trim().to_uppercase())
                .filter(|k| !k.is_empty())
                .collect(),
        }
    }

    /// First configured keyword present in `text`, in configuration order.
    pub fn find(&self, text: &str) -> Option<&str> {
        let upper = text.to_uppercase();
        let tokens: Vec<&str> = upper
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        self.keywords
            .iter()
            .find(|keyword| {
                if keyword.chars().all(|c| c.is_ascii_digit()) {
                    tokens.iter().any(|t| t == *keyword)
                } else {
                    upper.contains(keyword.as_str())
                }
            })
            .map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.keywords.is_empty()
    }
}

pub struct TextCueChannel {
    config: TextCueConfig,
    recognizer: Box<dyn TextRecognizer>,
    matcher: KeywordMatcher,
    cadence: Cadence,
    misses: u64,
}

impl TextCueChannel {
    pub fn new(config: TextCueConfig, recognizer: Box<dyn TextRecognizer>) -> Self {
        let matcher = KeywordMatcher::new(&config.keywords);
        let cadence = Cadence::new(config.interval_secs);
        Self {
            config,
            recognizer,
            matcher,
            cadence,
            misses: 0,
        }
    }

    /// Recognition failures since creation.
    pub fn recognition_failures(&self) -> u64 {
        self.misses
    }
}

impl TriggerChannel for TextCueChannel {
    fn id(&self) -> ChannelId {
        ChannelId::TextCue
    }

    fn expected_period_secs(&self) -> f64 {
        self.config.interval_secs
    }

    fn roll(&self) -> RollConfig {
        self.config.roll
    }
}

impl FrameChannel for TextCueChannel {
    fn on_frame(&mut self, frame: &FrameSample) -> Option<TriggerSignal> {
        if !self.cadence.should_tick(frame.pts) {
            return None;
        }
        if self.matcher.is_empty() {
            return Some(TriggerSignal::idle(ChannelId::TextCue, frame.pts));
        }

        let mut crop = frame.scorebar(&self.config.roi);
        crop.binarize(self.config.binarize_threshold);

        let recognition = match self.recognizer.recognize(&crop) {
            Ok(r) => r,
            Err(e) => {
                self.misses += 1;
                // Log the first failure and then sparsely; OCR runs every tick.
                if self.misses == 1 || self.misses % 100 == 0 {
                    tracing::warn!(
                        recognizer = self.recognizer.name(),
                        failures = self.misses,
                        error = %e,
                        "Text recognition failed"
                    );
                }
                return Some(TriggerSignal::idle(ChannelId::TextCue, frame.pts));
            }
        };

        match self.matcher.find(&recognition.text) {
            Some(keyword) => {
                tracing::debug!(
                    keyword,
                    pts = frame.pts,
                    text = %recognition.text,
                    "Text cue matched"
                );
                Some(TriggerSignal::fire(
                    ChannelId::TextCue,
                    frame.pts,
                    recognition.confidence,
                    keyword,
                ))
            }
            None => Some(TriggerSignal::idle(ChannelId::TextCue, frame.pts)),
        }
    }

    fn reset(&mut self) {
        self.cadence.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::recognizer::{Recognition, RecognitionError};
    use crate::sample::GrayImage;
    use std::sync::{Arc, Mutex};

    /// Returns scripted texts in order and records crop sizes.
    struct ScriptedRecognizer {
        texts: Vec<&'static str>,
        calls: Arc<Mutex<Vec<(u32, u32)>>>,
    }

    impl TextRecognizer for ScriptedRecognizer {
        fn name(&self) -> &str {
            "scripted"
        }

        fn recognize(&mut self, image: &GrayImage) -> Result<Recognition, RecognitionError> {
            let mut calls = self.calls.lock().unwrap();
            let text = self.texts.get(calls.len()).copied().unwrap_or("");
            calls.push((image.width, image.height));
            Ok(Recognition {
                text: text.to_string(),
                confidence: 0.9,
            })
        }
    }

    struct FailingRecognizer;

    impl TextRecognizer for FailingRecognizer {
        fn name(&self) -> &str {
            "failing"
        }

        fn recognize(&mut self, _image: &GrayImage) -> Result<Recognition, RecognitionError> {
            Err(RecognitionError::Failed("boom".to_string()))
        }
    }

    fn frame(pts: f64, index: u64) -> FrameSample {
        FrameSample::new(pts, index, GrayImage::filled(100, 40, 200))
    }

    fn keywords() -> Vec<String> {
        TextCueConfig::default().keywords
    }

    #[test]
    fn test_numeric_keywords_match_whole_tokens() {
        let matcher = KeywordMatcher::new(&keywords());
        assert_eq!(matcher.find("IND 146/3"), None);
        assert_eq!(matcher.find("FOUR 4 runs"), Some("4"));
        assert_eq!(matcher.find("ind 6"), Some("6"));
        assert_eq!(matcher.find("Caught behind"), Some("CAUGHT"));
    }

    #[test]
    fn test_word_keywords_match_substrings() {
        let matcher = KeywordMatcher::new(&keywords());
        assert_eq!(matcher.find("DRS:REVIEW"), Some("REVIEW"));
        assert_eq!(matcher.find("nothing here"), None);
    }

    #[test]
    fn test_channel_rate_limits_by_stream_time() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let recognizer = ScriptedRecognizer {
            texts: vec!["", "WICKET"],
            calls: calls.clone(),
        };
        let mut channel = TextCueChannel::new(TextCueConfig::default(), Box::new(recognizer));

        // 25 fps for one second: ticks at 0.0, 0.4, 0.8.
        let signals: Vec<TriggerSignal> = (0..25)
            .filter_map(|i| channel.on_frame(&frame(i as f64 / 25.0, i)))
            .collect();
        assert_eq!(signals.len(), 3);
        assert!(!signals[0].fired);
        assert!(signals[1].fired);
        assert_eq!(signals[1].detail.as_deref(), Some("WICKET"));
        assert!((signals[1].timestamp - 0.4).abs() < 1e-9);

        // Crop is the scorebar strip: 70% width, bottom 25%.
        assert_eq!(calls.lock().unwrap()[0], (70, 10));
    }

    #[test]
    fn test_recognition_failure_is_no_match() {
        let mut channel = TextCueChannel::new(TextCueConfig::default(), Box::new(FailingRecognizer));
        let signal = channel.on_frame(&frame(0.0, 0)).unwrap();
        assert!(!signal.fired);
        assert_eq!(channel.recognition_failures(), 1);
    }
}
