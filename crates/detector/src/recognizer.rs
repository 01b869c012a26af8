//! Text recognition boundary used by the Text-Cue channel.
//!
//! Recognition is the only part of detection that leaves the process. The
//! default engine shells out to the `tesseract` CLI with the scorebar crop
//! piped on stdin as PGM, asking for TSV output so per-word confidences are
//! available.

use std::io::Write;
use std::process::{Command, Stdio};

use crate::sample::GrayImage;

/// Recognized text with an aggregate confidence in `[0.0, 1.0]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Recognition {
    pub text: String,
    pub confidence: f64,
}

/// Recognition failure. The channel treats it as "no match" for the tick.
#[derive(Debug, thiserror::Error)]
pub enum RecognitionError {
    #[error("recognizer unavailable: {0}")]
    Unavailable(String),

    #[error("recognizer failed: {0}")]
    Failed(String),
}

/// OCR engine seam.
pub trait TextRecognizer: Send {
    fn name(&self) -> &str;

    fn recognize(&mut self, image: &GrayImage) -> Result<Recognition, RecognitionError>;
}

/// Build the recognizer named in config. Unknown names disable recognition.
pub fn recognizer_from_name(name: &str) -> Box<dyn TextRecognizer> {
    match name {
        "tesseract" => Box::new(TesseractRecognizer::default()),
        other => {
            if other != "none" {
                tracing::warn!(recognizer = other, "Unknown text recognizer, disabling text cues");
            }
            Box::new(DisabledRecognizer)
        }
    }
}

/// Always returns empty text.
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledRecognizer;

impl TextRecognizer for DisabledRecognizer {
    fn name(&self) -> &str {
        "none"
    }

    fn recognize(&mut self, _image: &GrayImage) -> Result<Recognition, RecognitionError> {
        Ok(Recognition {
            text: String::new(),
            confidence: 0.0,
        })
    }
}

/// `tesseract` CLI recognizer.
#[derive(Debug, Clone)]
pub struct TesseractRecognizer {
    program: String,
    /// Page segmentation mode. 6 = single uniform block of text.
    psm: u8,
    language: String,
}

impl Default for TesseractRecognizer {
    fn default() -> Self {
        Self {
            program: "tesseract".to_string(),
            psm: 6,
            language: "eng".to_string(),
        }
    }
}

impl TesseractRecognizer {
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Check the binary can be launched.
    pub fn is_available(&self) -> bool {
        Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }
}

impl TextRecognizer for TesseractRecognizer {
    fn name(&self) -> &str {
        "tesseract"
    }

    fn recognize(&mut self, image: &GrayImage) -> Result<Recognition, RecognitionError> {
        let mut child = Command::new(&self.program)
            .args(["stdin", "stdout", "--psm"])
            .arg(self.psm.to_string())
            .args(["-l", &self.language, "tsv"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| RecognitionError::Unavailable(format!("{}: {e}", self.program)))?;

        // tesseract reads the whole image before writing anything.
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&image.to_pgm())
                .map_err(|e| RecognitionError::Failed(format!("write image: {e}")))?;
        }

        let output = child
            .wait_with_output()
            .map_err(|e| RecognitionError::Failed(e.to_string()))?;
        if !output.status.success() {
            return Err(RecognitionError::Failed(format!(
                "exit status {}",
                output.status
            )));
        }
        Ok(parse_tsv(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// Parse tesseract TSV: words at level 5, confidence in column 10, text in 11.
pub fn parse_tsv(tsv: &str) -> Recognition {
    let mut words = Vec::new();
    let mut conf_sum = 0.0;
    for line in tsv.lines().skip(1) {
        let cols: Vec<&str> = line.split('\t').collect();
        if cols.len() < 12 || cols[0] != "5" {
            continue;
        }
        let conf: f64 = cols[10].trim().parse().unwrap_or(-1.0);
        let word = cols[11].trim();
        if conf < 0.0 || word.is_empty() {
            continue;
        }
        conf_sum += conf;
        words.push(word.to_string());
    }

    let confidence = if words.is_empty() {
        0.0
    } else {
        (conf_sum / words.len() as f64 / 100.0).clamp(0.0, 1.0)
    };
    Recognition {
        text: words.join(" "),
        confidence,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tsv_words() {
        let tsv = "level\tpage_num\tblock_num\tpar_num\tline_num\tword_num\tleft\ttop\twidth\theight\tconf\ttext\n\
                   1\t1\t0\t0\t0\t0\t0\t0\t672\t135\t-1\t\n\
                   5\t1\t1\t1\t1\t1\t10\t10\t40\t20\t90.0\tIND\n\
                   5\t1\t1\t1\t1\t2\t60\t10\t40\t20\t70.0\tWICKET\n";
        let rec = parse_tsv(tsv);
        assert_eq!(rec.text, "IND WICKET");
        assert!((rec.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_parse_tsv_empty() {
        let rec = parse_tsv("level\tpage_num\n");
        assert!(rec.text.is_empty());
        assert_eq!(rec.confidence, 0.0);
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let mut rec = TesseractRecognizer::default().with_program("/nonexistent/tesseract-bin");
        let result = rec.recognize(&GrayImage::filled(4, 4, 0));
        assert!(matches!(result, Err(RecognitionError::Unavailable(_))));
    }

    #[test]
    fn test_unknown_name_disables() {
        let rec = recognizer_from_name("none");
        assert_eq!(rec.name(), "none");
    }
}
