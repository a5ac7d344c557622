//! Conversion request parameters.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestType {
    /// Multi-segment kana-to-kanji conversion.
    #[default]
    Conversion,
    /// Explicitly triggered prediction (tab completion).
    Prediction,
    /// Automatic suggestion while typing.
    Suggestion,
    /// Surface-to-reading conversion.
    ReverseConversion,
}

#[derive(Debug, Clone)]
pub struct ConversionRequest {
    pub request_type: RequestType,
    /// Upper bound for candidates generated per segment.
    pub max_conversion_candidates_size: usize,
    /// Mobile realtime conversion: emit whole-path candidates plus partial
    /// candidates built from the first inner segment.
    pub create_partial_candidates: bool,
    /// Mobile mixed conversion mode (suggestion and conversion share one
    /// candidate list).
    pub mixed_conversion: bool,
    /// Desktop partial suggestion: append cost-rebased first-segment
    /// candidates after the single-segment results.
    pub auto_partial_suggestion: bool,
    /// Allow the key corrector to add misspelling-corrected nodes.
    pub use_key_corrector: bool,
}

impl Default for ConversionRequest {
    fn default() -> Self {
        Self {
            request_type: RequestType::Conversion,
            max_conversion_candidates_size: 200,
            create_partial_candidates: false,
            mixed_conversion: false,
            auto_partial_suggestion: false,
            use_key_corrector: true,
        }
    }
}

impl ConversionRequest {
    pub fn new(request_type: RequestType) -> Self {
        Self {
            request_type,
            ..Self::default()
        }
    }

    pub fn is_prediction(&self) -> bool {
        matches!(
            self.request_type,
            RequestType::Prediction | RequestType::Suggestion
        )
    }

    pub fn is_reverse(&self) -> bool {
        self.request_type == RequestType::ReverseConversion
    }

    pub fn is_mobile(&self) -> bool {
        self.mixed_conversion
    }
}
