use crate::converter::request::{ConversionRequest, RequestType};
use crate::converter::segments::{Segment, SegmentType, Segments};
use crate::converter::testutil::TestHarness;
use crate::converter::ConvertError;

fn conversion_segments(keys: &[&str]) -> Segments {
    let mut segments = Segments::default();
    for key in keys {
        segments.add_segment(Segment::new(*key, SegmentType::Free));
    }
    segments
}

#[test]
fn test_convert_basic() {
    let harness = TestHarness::default();
    let converter = harness.converter();
    let mut segments = conversion_segments(&["きょうはいいてんき"]);

    converter
        .convert_for_request(&ConversionRequest::default(), &mut segments)
        .unwrap();

    // Bunsetsu split after the particle: 今日は | いい天気
    assert_eq!(segments.conversion_segments_size(), 2);
    let first = segments.conversion_segment(0);
    assert_eq!(first.key, "きょうは");
    assert_eq!(first.candidate(0).value, "今日は");
    let second = segments.conversion_segment(1);
    assert_eq!(second.key, "いいてんき");
    assert_eq!(second.candidate(0).value, "いい天気");
}

#[test]
fn test_convert_single_word() {
    let harness = TestHarness::default();
    let converter = harness.converter();
    let mut segments = conversion_segments(&["きょう"]);

    converter
        .convert_for_request(&ConversionRequest::default(), &mut segments)
        .unwrap();

    assert_eq!(segments.conversion_segments_size(), 1);
    let segment = segments.conversion_segment(0);
    assert_eq!(segment.candidate(0).value, "今日");
    // The runner-up reading is present too.
    assert!(segment.candidates.iter().any(|c| c.value == "京"));
}

#[test]
fn test_candidate_values_are_distinct() {
    let mut harness = TestHarness::default();
    // A second dictionary source producing the same surface.
    harness.dictionary.add("きょう", "今日", 5200, crate::converter::testutil::NOUN, crate::converter::testutil::NOUN);
    let converter = harness.converter();
    let mut segments = conversion_segments(&["きょう"]);

    converter
        .convert_for_request(&ConversionRequest::default(), &mut segments)
        .unwrap();

    let values: Vec<&str> = segments.conversion_segment(0)
        .candidates
        .iter()
        .map(|c| c.value.as_str())
        .collect();
    let mut deduped = values.clone();
    deduped.sort_unstable();
    deduped.dedup();
    assert_eq!(values.len(), deduped.len(), "duplicate values in {values:?}");
}

#[test]
fn test_dummy_candidates_present() {
    let harness = TestHarness::default();
    let converter = harness.converter();
    let mut segments = conversion_segments(&["きょうはいいてんき"]);

    converter
        .convert_for_request(&ConversionRequest::default(), &mut segments)
        .unwrap();

    let first = segments.conversion_segment(0);
    let values: Vec<&str> = first.candidates.iter().map(|c| c.value.as_str()).collect();
    // The reading itself and its katakana form are guaranteed fallbacks.
    assert!(values.contains(&"きょうは"), "missing hiragana dummy in {values:?}");
    assert!(values.contains(&"キョウハ"), "missing katakana dummy in {values:?}");
    // Katakana content + functional suffix.
    assert!(values.contains(&"キョウは"), "missing katakana content dummy in {values:?}");
}

#[test]
fn test_dummy_candidates_never_copy_inner_segments() {
    let harness = TestHarness::default();
    let converter = harness.converter();
    let mut segments = conversion_segments(&["わたしのなまえはなかのです"]);
    let mut request = ConversionRequest::new(RequestType::Prediction);
    request.max_conversion_candidates_size = 20;

    converter.convert_for_request(&request, &mut segments).unwrap();

    let segment = segments.conversion_segment(0);
    let top = segment.candidate(0);
    assert!(!top.inner_segment_boundary.is_empty());
    for c in &segment.candidates {
        if c.value == segment.key || c.value == crate::unicode::hiragana_to_katakana(&segment.key) {
            assert!(
                c.inner_segment_boundary.is_empty(),
                "dummy candidate must not carry inner segments: {}",
                c.value
            );
        }
    }
}

#[test]
fn test_empty_conversion_key_fails() {
    let harness = TestHarness::default();
    let converter = harness.converter();
    let mut segments = Segments::default();

    let err = converter
        .convert_for_request(&ConversionRequest::default(), &mut segments)
        .unwrap_err();
    assert!(matches!(err, ConvertError::InvalidInput(_)));
}

#[test]
fn test_too_long_conversion_key_fails() {
    let harness = TestHarness::default();
    let converter = harness.converter();
    let long_key = "か".repeat(400); // 1200 bytes
    let mut segments = conversion_segments(&[&long_key]);

    let err = converter
        .convert_for_request(&ConversionRequest::default(), &mut segments)
        .unwrap_err();
    assert!(matches!(err, ConvertError::InvalidInput(_)));
}

#[test]
fn test_too_many_segments_fails() {
    let harness = TestHarness::default();
    let converter = harness.converter();
    let mut segments = Segments::default();
    for _ in 0..256 {
        segments.add_segment(Segment::new("か", SegmentType::Free));
    }

    let err = converter
        .convert_for_request(&ConversionRequest::default(), &mut segments)
        .unwrap_err();
    assert!(matches!(err, ConvertError::InvalidInput(_)));
}

#[test]
fn test_failure_leaves_candidates_untouched() {
    let harness = TestHarness::default();
    let converter = harness.converter();
    let mut segments = Segments::default();
    segments.add_segment(Segment::new("きょう", SegmentType::Free));
    segments.add_segment(Segment::new("は", SegmentType::Free));

    // Prediction rejects multi-segment requests; candidates stay empty.
    let err = converter
        .convert_for_request(&ConversionRequest::new(RequestType::Prediction), &mut segments)
        .unwrap_err();
    assert!(matches!(err, ConvertError::InvalidInput(_)));
    assert_eq!(segments.segments_size(), 2);
    assert!(segments.segment(0).candidates.is_empty());
}

#[test]
fn test_reverse_conversion() {
    let harness = TestHarness::default();
    let converter = harness.converter();
    let mut segments = conversion_segments(&["今日"]);

    converter
        .convert_for_request(
            &ConversionRequest::new(RequestType::ReverseConversion),
            &mut segments,
        )
        .unwrap();

    assert_eq!(segments.conversion_segments_size(), 1);
    assert_eq!(segments.conversion_segment(0).candidate(0).value, "きょう");
}

#[test]
fn test_unknown_input_falls_back_to_character_nodes() {
    let harness = TestHarness::default();
    let converter = harness.converter();
    let mut segments = conversion_segments(&["ぬ"]);

    converter
        .convert_for_request(&ConversionRequest::default(), &mut segments)
        .unwrap();

    // No dictionary entry; the character-type node (plus the hiragana
    // dummy) still yields the reading.
    let segment = segments.conversion_segment(0);
    assert!(segment.candidates.iter().any(|c| c.value == "ぬ"));
}
