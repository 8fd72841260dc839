//! Language identification used by the cleaning gate.

/// A predicted language label. `code` is whatever scheme the identifier uses;
/// the gate compares it verbatim against the configured target.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub code: String,
    pub confidence: f64,
}

pub trait LanguageIdentifier: Send + Sync {
    /// `None` when the text carries too little signal to classify.
    fn classify(&self, text: &str) -> Option<Detection>;
}

/// Trigram detector from `whatlang`, reporting ISO 639-3 codes (`tur`, `eng`, ...).
#[derive(Debug, Clone, Copy, Default)]
pub struct WhatlangIdentifier;

impl LanguageIdentifier for WhatlangIdentifier {
    fn classify(&self, text: &str) -> Option<Detection> {
        whatlang::detect(text).map(|info| Detection {
            code: info.lang().code().to_owned(),
            confidence: info.confidence(),
        })
    }
}
