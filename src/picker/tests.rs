use super::*;
use crate::bitfield::Bitfield;
use proptest::prelude::*;
use std::collections::HashSet;

const BLOCK: u64 = 16384;

fn bits(len: usize, set: &[usize]) -> Bitfield {
    let mut bf = Bitfield::new(len);
    for &i in set {
        bf.set(i, true);
    }
    bf
}

fn ordered() -> PieceRequesterSettings {
    PieceRequesterSettings::default().with_randomised(false)
}

fn view<'a>(index: usize, bitfield: &'a Bitfield, none: &'a HashSet<u32>) -> PeerView<'a> {
    PeerView {
        index: PeerIndex::new(index),
        bitfield,
        choking_us: false,
        allowed_fast: none,
        suggested: &[],
    }
}

fn pieces(reqs: &[BlockRequest]) -> Vec<u32> {
    reqs.iter().map(|r| r.piece).collect()
}

#[test]
fn test_rarest_first_scenario() {
    let mut picker = PiecePicker::new(PieceLayout::new(BLOCK, BLOCK * 10), ordered());
    let a = bits(10, &[0, 1, 2, 3, 4]);
    let b = bits(10, &[3, 4, 5, 6, 7]);
    let c = bits(10, &[5, 6, 7, 8, 9]);
    for bf in [&a, &b, &c] {
        picker.peer_bitfield_added(bf);
    }
    assert_eq!(picker.availability(5), 2);
    assert_eq!(picker.availability(0), 1);

    let none = HashSet::new();
    let picked = picker.pick(&view(0, &a, &none), 10);
    assert_eq!(pieces(&picked), vec![0, 1, 2, 3, 4]);

    let picked = picker.pick(&view(1, &b, &none), 10);
    assert_eq!(pieces(&picked), vec![5, 6, 7]);
    assert!(!picker.is_endgame());
}

#[test]
fn test_single_holder_piece_before_shared() {
    let mut picker = PiecePicker::new(PieceLayout::new(BLOCK, BLOCK * 2), ordered());
    let a = bits(2, &[0, 1]);
    picker.peer_bitfield_added(&a);
    picker.peer_bitfield_added(&bits(2, &[0]));

    let none = HashSet::new();
    let picked = picker.pick(&view(0, &a, &none), 1);
    assert_eq!(pieces(&picked), vec![1]);
}

#[test]
fn test_index_order_without_rarest_first() {
    let settings = ordered().with_rarest_first(false);
    let mut picker = PiecePicker::new(PieceLayout::new(BLOCK, BLOCK * 2), settings);
    let a = bits(2, &[0, 1]);
    picker.peer_bitfield_added(&a);
    picker.peer_bitfield_added(&bits(2, &[0]));

    let none = HashSet::new();
    assert_eq!(pieces(&picker.pick(&view(0, &a, &none), 2)), vec![0, 1]);
}

#[test]
fn test_randomised_pick_covers_all_pieces() {
    let mut picker = PiecePicker::new(
        PieceLayout::new(BLOCK, BLOCK * 8),
        PieceRequesterSettings::default(),
    );
    let a = Bitfield::full(8);
    picker.peer_bitfield_added(&a);

    let none = HashSet::new();
    let mut got = pieces(&picker.pick(&view(0, &a, &none), 8));
    got.sort_unstable();
    assert_eq!(got, (0..8).collect::<Vec<_>>());
}

#[test]
fn test_priority_tiers() {
    let settings = ordered().with_endgame_duplicates(1);
    let mut picker = PiecePicker::new(PieceLayout::new(BLOCK, BLOCK * 4), settings);
    picker.set_piece_priority(3, Priority::High);
    picker.set_piece_priority(2, Priority::DoNotDownload);
    picker.set_piece_priority(0, Priority::Low);
    let a = Bitfield::full(4);
    picker.peer_bitfield_added(&a);

    let none = HashSet::new();
    assert_eq!(pieces(&picker.pick(&view(0, &a, &none), 10)), vec![3, 1, 0]);
    assert!(picker.pick(&view(1, &a, &none), 10).is_empty());
}

#[test]
fn test_prioritisation_disabled() {
    let settings = ordered().with_prioritisation(false);
    let mut picker = PiecePicker::new(PieceLayout::new(BLOCK, BLOCK * 3), settings);
    picker.set_piece_priority(2, Priority::Immediate);
    let a = Bitfield::full(3);
    picker.peer_bitfield_added(&a);

    let none = HashSet::new();
    assert_eq!(pieces(&picker.pick(&view(0, &a, &none), 3)), vec![0, 1, 2]);
}

#[test]
fn test_partial_piece_first() {
    let mut picker = PiecePicker::new(PieceLayout::new(BLOCK * 2, BLOCK * 4), ordered());
    let a = bits(2, &[0]);
    let b = bits(2, &[0, 1]);
    picker.peer_bitfield_added(&a);
    picker.peer_bitfield_added(&b);

    let none = HashSet::new();
    let first = picker.pick(&view(0, &a, &none), 1);
    assert_eq!(first, vec![BlockRequest::new(0, 0, 16384)]);

    let second = picker.pick(&view(1, &b, &none), 1);
    assert_eq!(second, vec![BlockRequest::new(0, 16384, 16384)]);
}

#[test]
fn test_choked_peer_only_allowed_fast() {
    let mut picker = PiecePicker::new(PieceLayout::new(BLOCK, BLOCK * 4), ordered());
    let a = Bitfield::full(4);
    picker.peer_bitfield_added(&a);

    let allowed: HashSet<u32> = [2].into_iter().collect();
    let peer = PeerView {
        index: PeerIndex::new(0),
        bitfield: &a,
        choking_us: true,
        allowed_fast: &allowed,
        suggested: &[],
    };
    assert_eq!(pieces(&picker.pick(&peer, 10)), vec![2]);
}

#[test]
fn test_suggested_piece_breaks_ties() {
    let mut picker = PiecePicker::new(PieceLayout::new(BLOCK, BLOCK * 4), ordered());
    let a = Bitfield::full(4);
    picker.peer_bitfield_added(&a);

    let none = HashSet::new();
    let suggested = [3u32];
    let peer = PeerView {
        suggested: &suggested,
        ..view(0, &a, &none)
    };
    assert_eq!(pieces(&picker.pick(&peer, 2)), vec![3, 0]);
}

#[test]
fn test_max_requests_per_peer() {
    let settings = ordered().with_max_requests_per_peer(3);
    let mut picker = PiecePicker::new(PieceLayout::new(BLOCK * 2, BLOCK * 8), settings);
    let a = Bitfield::full(4);
    picker.peer_bitfield_added(&a);

    let none = HashSet::new();
    assert_eq!(picker.pick(&view(0, &a, &none), 10).len(), 3);
    assert!(picker.pick(&view(0, &a, &none), 10).is_empty());
    assert_eq!(picker.outstanding(PeerIndex::new(0)), 3);
}

#[test]
fn test_nothing_to_request_is_empty() {
    let mut picker = PiecePicker::new(PieceLayout::new(BLOCK, BLOCK * 4), ordered());
    let empty = Bitfield::new(4);
    let none = HashSet::new();
    assert!(picker.pick(&view(0, &empty, &none), 10).is_empty());
}

#[test]
fn test_no_duplicates_between_peers_outside_endgame() {
    let mut picker = PiecePicker::new(PieceLayout::new(BLOCK * 2, BLOCK * 8), ordered());
    let all = Bitfield::full(4);
    picker.peer_bitfield_added(&all);
    picker.peer_bitfield_added(&all);

    let none = HashSet::new();
    let a: HashSet<_> = picker.pick(&view(0, &all, &none), 4).into_iter().collect();
    let b: HashSet<_> = picker.pick(&view(1, &all, &none), 4).into_iter().collect();
    assert_eq!(a.len(), 4);
    assert_eq!(b.len(), 4);
    assert!(a.is_disjoint(&b));
    assert_eq!(picker.free_blocks(), 0);
}

#[test]
fn test_endgame_duplicates_and_cancels() {
    let mut picker = PiecePicker::new(PieceLayout::new(BLOCK * 2, BLOCK * 2), ordered());
    let all = Bitfield::full(1);
    for _ in 0..3 {
        picker.peer_bitfield_added(&all);
    }

    let none = HashSet::new();
    let a = picker.pick(&view(0, &all, &none), 10);
    assert_eq!(a.len(), 2);
    // Every block is now requested.
    assert!(picker.is_endgame());

    let b = picker.pick(&view(1, &all, &none), 10);
    assert_eq!(b, a);

    // Two holders per block at most.
    assert!(picker.pick(&view(2, &all, &none), 10).is_empty());

    let got = picker.on_block_received(PeerIndex::new(0), &a[0]);
    assert!(got.accepted);
    assert_eq!(got.cancels, vec![(PeerIndex::new(1), a[0])]);
    assert_eq!(got.piece_complete, None);
    assert!(!picker.is_requested_from(PeerIndex::new(1), &a[0]));

    let got = picker.on_block_received(PeerIndex::new(1), &a[1]);
    assert!(got.accepted);
    assert_eq!(got.cancels, vec![(PeerIndex::new(0), a[1])]);
    assert_eq!(got.piece_complete, Some(0));
    assert_eq!(picker.outstanding(PeerIndex::new(0)), 0);
    assert_eq!(picker.outstanding(PeerIndex::new(1)), 0);
}

#[test]
fn test_duplicate_block_not_accepted() {
    let mut picker = PiecePicker::new(PieceLayout::new(BLOCK * 2, BLOCK * 2), ordered());
    let all = Bitfield::full(1);
    picker.peer_bitfield_added(&all);
    let none = HashSet::new();
    let reqs = picker.pick(&view(0, &all, &none), 10);

    assert!(picker.on_block_received(PeerIndex::new(0), &reqs[0]).accepted);
    assert!(!picker.on_block_received(PeerIndex::new(0), &reqs[0]).accepted);
    assert!(!picker
        .on_block_received(PeerIndex::new(0), &BlockRequest::new(0, 5, 16384))
        .accepted);
}

#[test]
fn test_piece_verification() {
    let mut picker = PiecePicker::new(PieceLayout::new(BLOCK * 2, BLOCK * 2), ordered());
    let all = Bitfield::full(1);
    picker.peer_bitfield_added(&all);
    let none = HashSet::new();

    let reqs = picker.pick(&view(0, &all, &none), 10);
    for req in &reqs {
        picker.on_block_received(PeerIndex::new(0), req);
        picker.block_written(req);
    }
    assert_eq!(picker.completed_blocks(), 2);

    picker.piece_verified(0, false);
    assert_eq!(picker.completed_blocks(), 0);
    assert_eq!(picker.free_blocks(), 2);
    assert!(!picker.have_piece(0));

    let again = picker.pick(&view(0, &all, &none), 10);
    assert_eq!(again, reqs);
    for req in &again {
        picker.on_block_received(PeerIndex::new(0), req);
    }
    picker.piece_verified(0, true);
    assert!(picker.have_piece(0));
    assert!(picker.is_complete());
    assert!(!picker.is_interesting(&all));
    assert_eq!(picker.free_blocks(), 0);
}

#[test]
fn test_cancel_peer_releases_everything() {
    let mut picker = PiecePicker::new(PieceLayout::new(BLOCK * 2, BLOCK * 8), ordered());
    let all = Bitfield::full(4);
    picker.peer_bitfield_added(&all);
    let none = HashSet::new();

    let mut reqs = picker.pick(&view(0, &all, &none), 5);
    reqs.sort_unstable();
    assert_eq!(picker.cancel_peer(PeerIndex::new(0)), reqs);
    assert_eq!(picker.outstanding(PeerIndex::new(0)), 0);
    assert_eq!(picker.free_blocks(), picker.total_blocks());
    assert!(picker.cancel_peer(PeerIndex::new(0)).is_empty());
}

#[test]
fn test_cancel_choked_keeps_allowed_fast() {
    let mut picker = PiecePicker::new(PieceLayout::new(BLOCK, BLOCK * 3), ordered());
    let all = Bitfield::full(3);
    picker.peer_bitfield_added(&all);
    let none = HashSet::new();
    picker.pick(&view(0, &all, &none), 3);

    let allowed: HashSet<u32> = [1].into_iter().collect();
    let released = picker.cancel_choked(PeerIndex::new(0), &allowed);
    assert_eq!(pieces(&released), vec![0, 2]);
    assert_eq!(picker.outstanding(PeerIndex::new(0)), 1);
    assert!(picker.is_requested_from(PeerIndex::new(0), &BlockRequest::new(1, 0, 16384)));
}

#[test]
fn test_reject_releases_one() {
    let mut picker = PiecePicker::new(PieceLayout::new(BLOCK, BLOCK * 2), ordered());
    let all = Bitfield::full(2);
    picker.peer_bitfield_added(&all);
    let none = HashSet::new();
    let reqs = picker.pick(&view(0, &all, &none), 2);

    assert!(picker.reject(PeerIndex::new(0), &reqs[0]));
    assert!(!picker.reject(PeerIndex::new(0), &reqs[0]));
    assert_eq!(picker.outstanding(PeerIndex::new(0)), 1);
    assert_eq!(picker.free_blocks(), 1);

    // The released block goes to the next peer that asks.
    assert_eq!(picker.pick(&view(1, &all, &none), 1), vec![reqs[0]]);
}

#[test]
fn test_disconnect_updates_availability() {
    let mut picker = PiecePicker::new(PieceLayout::new(BLOCK, BLOCK * 2), ordered());
    let a = bits(2, &[1]);
    picker.peer_bitfield_added(&a);
    picker.peer_have(0);
    assert_eq!(picker.availability(0), 1);

    let none = HashSet::new();
    picker.pick(&view(0, &a, &none), 1);
    let released = picker.peer_disconnected(PeerIndex::new(0), &a);
    assert_eq!(released.len(), 1);
    assert_eq!(picker.availability(1), 0);
}

#[test]
fn test_is_interesting() {
    let mut picker = PiecePicker::new(PieceLayout::new(BLOCK, BLOCK * 2), ordered())
        .with_have(bits(2, &[0]))
        .unwrap();
    assert!(!picker.is_interesting(&bits(2, &[0])));
    assert!(picker.is_interesting(&bits(2, &[1])));
    picker.set_piece_priority(1, Priority::DoNotDownload);
    assert!(!picker.is_interesting(&bits(2, &[1])));
    assert!(picker.is_complete());
}

#[test]
fn test_initial_seed_offers_in_bit_order() {
    let mut seed = InitialSeed::new(3);
    let empty = Bitfield::new(3);
    assert!(seed.advertised_bitfield().all_false());

    assert_eq!(seed.offer(PeerIndex::new(0), &empty), Some(0));
    assert_eq!(seed.offer(PeerIndex::new(1), &empty), Some(1));
    // Peer 0 waits until piece 0 spreads.
    assert_eq!(seed.offer(PeerIndex::new(0), &empty), None);

    // Peer 0 downloading its own offer is not a sighting.
    seed.on_peer_have(PeerIndex::new(0), 0);
    assert_eq!(seed.offer(PeerIndex::new(0), &bits(3, &[0])), None);

    // Peer 1 obtaining piece 0 from the swarm is.
    seed.on_peer_have(PeerIndex::new(1), 0);
    assert!(seed.is_seen(0));
    assert_eq!(seed.offer(PeerIndex::new(0), &bits(3, &[0])), Some(2));
}

#[test]
fn test_initial_seed_reoffers_first_unseen() {
    let mut seed = InitialSeed::new(2);
    let empty = Bitfield::new(2);
    assert_eq!(seed.offer(PeerIndex::new(0), &empty), Some(0));
    assert_eq!(seed.offer(PeerIndex::new(1), &empty), Some(1));
    assert_eq!(seed.offer(PeerIndex::new(2), &empty), Some(0));
    // A peer that already has the unseen piece gets the next one.
    assert_eq!(seed.offer(PeerIndex::new(3), &bits(2, &[0])), Some(1));
}

#[test]
fn test_initial_seed_disables_when_all_seen() {
    let mut seed = InitialSeed::new(2);
    let empty = Bitfield::new(2);
    seed.offer(PeerIndex::new(0), &empty);
    seed.on_not_initial_peer_have(0);
    assert!(seed.is_enabled());
    seed.on_not_initial_peer_have(1);
    assert!(!seed.is_enabled());
    assert_eq!(seed.offer(PeerIndex::new(0), &empty), None);
    assert_eq!(seed.offer_of(PeerIndex::new(0)), None);
}

#[test]
fn test_initial_seed_disconnect_drops_offer() {
    let mut seed = InitialSeed::new(2);
    let empty = Bitfield::new(2);
    seed.offer(PeerIndex::new(0), &empty);
    seed.peer_disconnected(PeerIndex::new(0));
    assert_eq!(seed.offer_of(PeerIndex::new(0)), None);
    assert_eq!(seed.offer(PeerIndex::new(0), &empty), Some(1));
}

#[derive(Debug, Clone)]
enum Op {
    Pick(usize, usize),
    Receive(usize, bool),
    Reject(usize),
    Cancel(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..3, 1usize..6).prop_map(|(p, n)| Op::Pick(p, n)),
        (0usize..3, any::<bool>()).prop_map(|(p, ok)| Op::Receive(p, ok)),
        (0usize..3).prop_map(Op::Reject),
        (0usize..3).prop_map(Op::Cancel),
    ]
}

fn first_outstanding(picker: &PiecePicker, peer: PeerIndex) -> Option<BlockRequest> {
    picker.requests_of(peer).min().copied()
}

fn run_ops(picker: &mut PiecePicker, peers: &[Bitfield], ops: &[Op]) -> Result<(), TestCaseError> {
    let none = HashSet::new();
    for op in ops {
        match *op {
            Op::Pick(p, n) => {
                let peer = PeerIndex::new(p);
                let before: Vec<HashSet<BlockRequest>> = (0..peers.len())
                    .map(|i| picker.requests_of(PeerIndex::new(i)).copied().collect())
                    .collect();
                let picked = picker.pick(&view(p, &peers[p], &none), n);

                let unique: HashSet<_> = picked.iter().collect();
                prop_assert_eq!(unique.len(), picked.len());
                for req in &picked {
                    prop_assert!(!before[p].contains(req));
                    let elsewhere = before
                        .iter()
                        .enumerate()
                        .any(|(i, set)| i != p && set.contains(req));
                    if elsewhere {
                        prop_assert!(picker.is_endgame());
                    }
                    prop_assert!(picker.is_requested_from(peer, req));
                }
            }
            Op::Receive(p, ok) => {
                if let Some(req) = first_outstanding(picker, PeerIndex::new(p)) {
                    let got = picker.on_block_received(PeerIndex::new(p), &req);
                    if let Some(piece) = got.piece_complete {
                        picker.piece_verified(piece, ok);
                    }
                }
            }
            Op::Reject(p) => {
                if let Some(req) = first_outstanding(picker, PeerIndex::new(p)) {
                    prop_assert!(picker.reject(PeerIndex::new(p), &req));
                }
            }
            Op::Cancel(p) => {
                picker.cancel_peer(PeerIndex::new(p));
            }
        }
    }
    Ok(())
}

fn swarm(peers: &[Vec<bool>]) -> (PiecePicker, Vec<Bitfield>) {
    // Six pieces, the last one a single short block.
    let layout = PieceLayout::new(BLOCK * 2, BLOCK * 10 + 100);
    let mut picker = PiecePicker::new(layout, PieceRequesterSettings::default());
    let bitfields: Vec<Bitfield> = peers
        .iter()
        .map(|has| {
            let set: Vec<usize> = has
                .iter()
                .enumerate()
                .filter(|(_, b)| **b)
                .map(|(i, _)| i)
                .collect();
            bits(6, &set)
        })
        .collect();
    for bf in &bitfields {
        picker.peer_bitfield_added(bf);
    }
    (picker, bitfields)
}

proptest! {
    #[test]
    fn prop_no_duplicate_requests_outside_endgame(
        peers in prop::collection::vec(prop::collection::vec(any::<bool>(), 6), 3),
        ops in prop::collection::vec(op_strategy(), 1..60),
    ) {
        let (mut picker, bitfields) = swarm(&peers);
        run_ops(&mut picker, &bitfields, &ops)?;
    }

    #[test]
    fn prop_free_blocks_after_all_disconnect(
        peers in prop::collection::vec(prop::collection::vec(any::<bool>(), 6), 3),
        ops in prop::collection::vec(op_strategy(), 1..60),
    ) {
        let (mut picker, bitfields) = swarm(&peers);
        run_ops(&mut picker, &bitfields, &ops)?;
        for (i, bf) in bitfields.iter().enumerate() {
            picker.peer_disconnected(PeerIndex::new(i), bf);
        }
        prop_assert_eq!(
            picker.free_blocks(),
            picker.total_blocks() - picker.completed_blocks()
        );
        for p in 0..6 {
            prop_assert_eq!(picker.availability(p), 0);
        }
    }
}
