use crate::converter::lattice::Lattice;
use crate::converter::node::{NodeId, NodeType};
use crate::converter::segments::{Segment, SegmentType, Segments};
use crate::converter::viterbi::{prediction_viterbi, viterbi};
use crate::dict::connection::Connector;

const NUM_IDS: u16 = 8;
const TRANS: i32 = 10;

fn connector() -> Connector {
    Connector::uniform(NUM_IDS, TRANS as i16)
}

fn insert_word(lattice: &mut Lattice, pos: usize, key: &str, lid: u16, rid: u16, wcost: i32) -> NodeId {
    let id = lattice.new_node();
    {
        let node = lattice.node_mut(id);
        node.key = key.to_string();
        node.value = key.to_string();
        node.lid = lid;
        node.rid = rid;
        node.wcost = wcost;
        node.node_type = NodeType::Normal;
        node.bnext = None;
    }
    lattice.insert(pos, id);
    id
}

fn free_segments(keys: &[&str]) -> Segments {
    let mut segments = Segments::default();
    for key in keys {
        segments.add_segment(Segment::new(*key, SegmentType::Free));
    }
    segments
}

#[test]
fn test_viterbi_picks_min_cost_path() {
    let conn = connector();
    let mut lattice = Lattice::default();
    lattice.set_key("かき".to_string());
    let _ka = insert_word(&mut lattice, 0, "か", 1, 1, 1000);
    let _ki = insert_word(&mut lattice, "か".len(), "き", 1, 1, 1000);
    let kaki = insert_word(&mut lattice, 0, "かき", 2, 2, 1500);
    let segments = free_segments(&["かき"]);

    assert!(viterbi(&segments, &mut lattice, &conn));

    // Single word beats two words: 1500 + one transition vs 2000 + two.
    let eos = lattice.eos_node().unwrap();
    assert_eq!(lattice.node(eos).prev, Some(kaki));

    // Forward links reconstructed from the back-walk.
    let bos = lattice.bos_node().unwrap();
    assert_eq!(lattice.node(bos).next, Some(kaki));
    assert_eq!(lattice.node(kaki).next, Some(eos));
}

#[test]
fn test_viterbi_cost_recurrence() {
    let conn = connector();
    let mut lattice = Lattice::default();
    lattice.set_key("かき".to_string());
    insert_word(&mut lattice, 0, "か", 1, 1, 1000);
    insert_word(&mut lattice, "か".len(), "き", 3, 3, 800);
    let segments = free_segments(&["かき"]);

    assert!(viterbi(&segments, &mut lattice, &conn));

    // Each node on the path satisfies
    // cost == prev.cost + transition(prev.rid, lid) + wcost.
    let eos = lattice.eos_node().unwrap();
    let mut id = eos;
    while let Some(prev) = lattice.node(id).prev {
        let node = lattice.node(id);
        let prev_node = lattice.node(prev);
        assert_eq!(
            node.cost,
            prev_node.cost + conn.transition_cost(prev_node.rid, node.lid) + node.wcost,
            "cost recurrence broken at {}",
            node.value
        );
        id = prev;
    }
    assert_eq!(Some(id), lattice.bos_node());
}

#[test]
fn test_viterbi_fails_on_disconnected_lattice() {
    let conn = connector();
    let mut lattice = Lattice::default();
    lattice.set_key("かき".to_string());
    // Only the first character is covered; nothing reaches the key end.
    insert_word(&mut lattice, 0, "か", 1, 1, 1000);
    let segments = free_segments(&["かき"]);

    assert!(!viterbi(&segments, &mut lattice, &conn));
}

#[test]
fn test_viterbi_respects_segment_boundary() {
    let conn = connector();
    let mut lattice = Lattice::default();
    lattice.set_key("かき".to_string());
    let ka = insert_word(&mut lattice, 0, "か", 1, 1, 1000);
    let ki = insert_word(&mut lattice, "か".len(), "き", 1, 1, 1000);
    let kaki = insert_word(&mut lattice, 0, "かき", 2, 2, 1);
    // Two declared segments force a boundary inside かき.
    let segments = free_segments(&["か", "き"]);

    assert!(viterbi(&segments, &mut lattice, &conn));

    // The cheap spanning word is masked out by the boundary.
    assert!(lattice.node(kaki).prev.is_none());
    let eos = lattice.eos_node().unwrap();
    assert_eq!(lattice.node(eos).prev, Some(ki));
    assert_eq!(lattice.node(ki).prev, Some(ka));
}

#[test]
fn test_viterbi_constrained_prev() {
    let conn = connector();
    let mut lattice = Lattice::default();
    lattice.set_key("かき".to_string());
    let expensive_ka = insert_word(&mut lattice, 0, "か", 1, 1, 5000);
    let _cheap_ka = insert_word(&mut lattice, 0, "か", 2, 2, 10);
    let ki = insert_word(&mut lattice, "か".len(), "き", 1, 1, 1000);
    lattice.node_mut(ki).constrained_prev = Some(expensive_ka);
    let segments = free_segments(&["かき"]);

    assert!(viterbi(&segments, &mut lattice, &conn));

    // The constraint overrides the cheaper predecessor.
    assert_eq!(lattice.node(ki).prev, Some(expensive_ka));
}

#[test]
fn test_prediction_viterbi_matches_exact_search() {
    let conn = connector();

    let build = |lattice: &mut Lattice| {
        lattice.set_key("かきく".to_string());
        insert_word(lattice, 0, "か", 1, 1, 1000);
        insert_word(lattice, "か".len(), "き", 2, 2, 700);
        insert_word(lattice, "かき".len(), "く", 3, 3, 900);
        insert_word(lattice, 0, "かき", 4, 4, 1500);
    };

    let mut exact = Lattice::default();
    build(&mut exact);
    let segments = free_segments(&["かきく"]);
    assert!(viterbi(&segments, &mut exact, &conn));

    let mut contracted = Lattice::default();
    build(&mut contracted);
    assert!(prediction_viterbi(&segments, &mut contracted, &conn));

    // No two nodes share a POS id here, so the contraction is lossless and
    // both searches must agree on the best path cost.
    let exact_cost = exact.node(exact.eos_node().unwrap()).cost;
    let contracted_cost = contracted.node(contracted.eos_node().unwrap()).cost;
    assert_eq!(exact_cost, contracted_cost);
}

#[test]
fn test_prediction_viterbi_with_history_range() {
    let conn = connector();
    let mut lattice = Lattice::default();
    lattice.set_key("ふゆかき".to_string());
    // History range [0, 6), conversion range [6, 12).
    let history = {
        let id = lattice.new_node();
        {
            let node = lattice.node_mut(id);
            node.key = "ふゆ".to_string();
            node.value = "冬".to_string();
            node.lid = 1;
            node.rid = 1;
            node.node_type = NodeType::History;
            node.bnext = None;
        }
        lattice.insert(0, id);
        id
    };
    insert_word(&mut lattice, "ふゆ".len(), "かき", 2, 2, 1200);

    let mut segments = Segments::default();
    let mut history_segment = Segment::new("ふゆ", SegmentType::History);
    history_segment.candidates.push(Default::default());
    segments.add_segment(history_segment);
    segments.add_segment(Segment::new("かき", SegmentType::Free));

    assert!(prediction_viterbi(&segments, &mut lattice, &conn));
    let eos = lattice.eos_node().unwrap();
    let kaki = lattice.node(eos).prev.unwrap();
    assert_eq!(lattice.node(kaki).value, "かき");
    assert_eq!(lattice.node(kaki).prev, Some(history));
}
