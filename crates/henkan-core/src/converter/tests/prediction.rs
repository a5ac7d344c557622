use crate::converter::request::{ConversionRequest, RequestType};
use crate::converter::segments::{CandidateAttributes, Segment, SegmentType, Segments};
use crate::converter::testutil::{TestHarness, SUFFIX_WORD};

fn prediction_request() -> ConversionRequest {
    ConversionRequest::new(RequestType::Prediction)
}

fn single_free_segment(key: &str) -> Segments {
    let mut segments = Segments::default();
    segments.add_segment(Segment::new(key, SegmentType::Free));
    segments
}

#[test]
fn test_prediction_single_segment_with_inner_boundaries() {
    let harness = TestHarness::default();
    let converter = harness.converter();
    let mut segments = single_free_segment("わたしのなまえはなかのです");
    let mut request = prediction_request();
    request.max_conversion_candidates_size = 1;

    converter.convert_for_request(&request, &mut segments).unwrap();

    assert_eq!(segments.conversion_segments_size(), 1);
    let segment = segments.conversion_segment(0);
    assert_eq!(segment.candidates.len(), 1);
    let candidate = segment.candidate(0);
    assert_eq!(candidate.value, "私の名前は中ノです");

    // Inner segments pair each content word with its trailing functional
    // suffix; content lengths freeze at the first functional node.
    let spans: Vec<(&str, &str, &str, &str)> = {
        let mut result = Vec::new();
        let (mut key_pos, mut value_pos) = (0, 0);
        for b in &candidate.inner_segment_boundary {
            let key = &candidate.key[key_pos..key_pos + b.key_len];
            let value = &candidate.value[value_pos..value_pos + b.value_len];
            let content_key = &candidate.key[key_pos..key_pos + b.content_key_len];
            let content_value = &candidate.value[value_pos..value_pos + b.content_value_len];
            key_pos += b.key_len;
            value_pos += b.value_len;
            result.push((key, value, content_key, content_value));
        }
        result
    };
    assert_eq!(
        spans,
        vec![
            ("わたしの", "私の", "わたし", "私"),
            ("なまえは", "名前は", "なまえ", "名前"),
            ("なかのです", "中ノです", "なかの", "中ノ"),
        ]
    );

    // Coverage: the inner segment keys tile the whole candidate key.
    let total: usize = candidate.inner_segment_boundary.iter().map(|b| b.key_len).sum();
    assert_eq!(total, candidate.key.len());
}

#[test]
fn test_prediction_requires_single_free_segment() {
    let harness = TestHarness::default();
    let converter = harness.converter();
    let mut segments = Segments::default();
    segments.add_segment(Segment::new("わたし", SegmentType::FixedBoundary));

    assert!(converter
        .convert_for_request(&prediction_request(), &mut segments)
        .is_err());
}

#[test]
fn test_predictive_augmentation_lookup_ranges() {
    let harness = TestHarness::default();
    let converter = harness.converter();
    // 8 characters triggers predictive lookups.
    let mut segments = single_free_segment("わたしのなまえは");

    converter
        .convert_for_request(&prediction_request(), &mut segments)
        .unwrap();

    // Suffix dictionary: suffix lengths 1..=6.
    let suffix_lookups = harness.suffix_dictionary.predictive_lookups.borrow();
    assert_eq!(suffix_lookups.len(), 6);
    assert_eq!(suffix_lookups[0], "は");
    assert_eq!(suffix_lookups[5], "しのなまえは");

    // System dictionary: suffix lengths 5..=8.
    let system_lookups = harness.dictionary.predictive_lookups.borrow();
    assert_eq!(system_lookups.len(), 4);
    assert_eq!(system_lookups[0], "のなまえは");
    assert_eq!(system_lookups[3], "わたしのなまえは");
}

#[test]
fn test_no_predictive_augmentation_for_short_keys() {
    let harness = TestHarness::default();
    let converter = harness.converter();
    let mut segments = single_free_segment("わたしの");

    converter
        .convert_for_request(&prediction_request(), &mut segments)
        .unwrap();

    assert!(harness.suffix_dictionary.predictive_lookups.borrow().is_empty());
    assert!(harness.dictionary.predictive_lookups.borrow().is_empty());
}

#[test]
fn test_no_predictive_augmentation_for_mobile() {
    let harness = TestHarness::default();
    let converter = harness.converter();
    let mut segments = single_free_segment("わたしのなまえは");
    let mut request = prediction_request();
    request.mixed_conversion = true;

    converter.convert_for_request(&request, &mut segments).unwrap();

    assert!(harness.suffix_dictionary.predictive_lookups.borrow().is_empty());
}

#[test]
fn test_predictive_nodes_carry_suffix_attribute() {
    let mut harness = TestHarness::default();
    // A suffix-dictionary completion for the tail of the key.
    harness.suffix_dictionary.add("はず", "はず", 2000, SUFFIX_WORD, SUFFIX_WORD);
    let converter = harness.converter();
    let mut segments = single_free_segment("わたしのなまえは");
    let mut request = prediction_request();
    request.max_conversion_candidates_size = 30;

    converter.convert_for_request(&request, &mut segments).unwrap();

    // The lookup ran; whether the completion wins depends on costs, so just
    // check the pipeline accepted the suffix dictionary stream.
    assert!(!harness.suffix_dictionary.predictive_lookups.borrow().is_empty());
}

#[test]
fn test_mobile_partial_candidates() {
    let harness = TestHarness::default();
    let converter = harness.converter();
    let mut segments = single_free_segment("わたしのなまえは");
    let mut request = prediction_request();
    request.mixed_conversion = true;
    request.create_partial_candidates = true;
    request.max_conversion_candidates_size = 20;

    converter.convert_for_request(&request, &mut segments).unwrap();

    let segment = segments.conversion_segment(0);
    assert!(!segment.candidates.is_empty());
    // The whole-path candidate comes first.
    assert_eq!(segment.candidate(0).value, "私の名前は");

    // A partial candidate built from the first inner segment, with its
    // consumed key length in characters.
    let partial = segment
        .candidates
        .iter()
        .find(|c| c.attributes.contains(CandidateAttributes::PARTIALLY_KEY_CONSUMED))
        .expect("partial candidate expected");
    assert_eq!(partial.value, "私の");
    assert_eq!(partial.consumed_key_size, 4);
}

#[test]
fn test_incremental_prediction_reuses_lattice() {
    let harness = TestHarness::default();
    let converter = harness.converter();

    let mut segments = single_free_segment("わたしの");
    converter
        .convert_for_request(&prediction_request(), &mut segments)
        .unwrap();
    assert_eq!(segments.conversion_segment(0).candidate(0).value, "私の");

    // Extend the key; the cached lattice keeps nodes from the common
    // prefix and the conversion still succeeds.
    segments.conversion_segment_mut(0).candidates.clear();
    segments.conversion_segment_mut(0).key = "わたしのなまえ".to_string();
    converter
        .convert_for_request(&prediction_request(), &mut segments)
        .unwrap();
    assert_eq!(segments.conversion_segment(0).candidate(0).value, "私の名前");
}

#[test]
fn test_desktop_partial_suggestion() {
    let harness = TestHarness::default();
    let converter = harness.converter();
    let mut segments = single_free_segment("わたしのなまえは");
    let mut request = prediction_request();
    request.auto_partial_suggestion = true;
    request.max_conversion_candidates_size = 30;

    converter.convert_for_request(&request, &mut segments).unwrap();

    let segment = segments.conversion_segment(0);
    // After the single-segment results, first-segment candidates appear
    // with rebased costs and the partial flag.
    let partial = segment
        .candidates
        .iter()
        .find(|c| c.attributes.contains(CandidateAttributes::PARTIALLY_KEY_CONSUMED));
    assert!(partial.is_some(), "expected a partial candidate");
}
