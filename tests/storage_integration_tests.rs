//! Integration tests for the piece storage façade
//!
//! These tests drive full checkout/complete/cancel lifecycles over a tiny
//! scaled download (4-byte pieces, 2-byte blocks, 15 bytes total) plus
//! selective-download, advertisement, and restore scenarios.


use std::sync::Arc;
use std::time::Duration;

use piece_store::{
    Clock, LowestIndexSelector, ManualClock, Piece, PieceStorage, RarestFirstSelector,
    StoreOptions,
};
use test_helpers::{bits, peer_with_pieces, scaled_context, TestContextBuilder};

fn options_with_threshold(end_game_threshold: usize) -> StoreOptions {
    StoreOptions {
        end_game_threshold,
        ..StoreOptions::default()
    }
}

/// A store over the scaled geometry that never enters end-game
fn scaled_store() -> PieceStorage {
    PieceStorage::new(scaled_context(), &options_with_threshold(0))
}

#[test]
fn test_empty_start() {
    let store = scaled_store();

    assert_eq!(store.total_length(), 15);
    assert_eq!(store.completed_length(), 0);
    assert_eq!(store.bitfield_length(), 1);
    assert!(!store.is_end_game());
    assert!(!store.download_finished());
    assert!(store.has_missing_unused_piece());
}

#[test]
fn test_bitfield_restore_credits_completion_and_stats() {
    let mut store = scaled_store();
    store.set_bitfield(&[0b1010_0000]).unwrap();

    assert!(store.has_piece(0) && store.has_piece(2));
    assert!(!store.has_piece(1) && !store.has_piece(3));
    assert_eq!(store.completed_length(), 8);
    assert_eq!(store.piece_stats().lock().counts(), &[1, 0, 1, 0]);
}

#[test]
fn test_checkout_and_block_progress() {
    let mut store = scaled_store();
    store.set_bitfield(&[0b1010_0000]).unwrap();

    let piece = store.check_out_piece(1);
    piece.complete_block(0);

    assert!(store.is_piece_used(1));
    assert_eq!(store.completed_length(), 10);
}

#[test]
fn test_complete_piece_updates_state_length_and_stats() {
    let mut store = scaled_store();
    store.set_bitfield(&[0b1010_0000]).unwrap();

    let piece = store.check_out_piece(1);
    piece.complete_block(0);
    piece.complete_block(1);
    let stats_before = store.piece_stats().lock().counts()[1];

    store.complete_piece(&piece);

    assert!(store.has_piece(1));
    assert!(!store.is_piece_used(1));
    assert_eq!(store.completed_length(), 12);
    assert_eq!(store.piece_stats().lock().counts()[1], stats_before + 1);
}

#[test]
fn test_rarest_first_prefers_scarce_piece() {
    let mut store = scaled_store();

    let peer_a = peer_with_pieces(4, &[1, 3]);
    let peer_b = peer_with_pieces(4, &[3]);
    store.add_piece_stats(peer_a.bitfield());
    store.add_piece_stats(peer_b.bitfield());
    assert_eq!(store.piece_stats().lock().counts(), &[0, 1, 0, 2]);

    // piece 1 is held by one peer, piece 3 by two: pick the scarce one
    let piece = store.get_missing_piece(&peer_a).unwrap();
    assert_eq!(piece.index(), 1);
}

#[test]
fn test_advert_window() {
    let clock = Arc::new(ManualClock::new());
    let mut store =
        PieceStorage::with_clock(scaled_context(), &options_with_threshold(0), clock.clone());

    clock.advance(Duration::from_secs(10));
    store.advertise_piece(1, 0);
    clock.advance(Duration::from_secs(5));
    let cutoff = clock.now();
    clock.advance(Duration::from_secs(5));
    store.advertise_piece(2, 1);

    assert_eq!(store.advertised_piece_indexes(3, cutoff), vec![1]);
}

#[test]
fn test_advert_self_filter() {
    let clock = Arc::new(ManualClock::new());
    let mut store =
        PieceStorage::with_clock(scaled_context(), &options_with_threshold(0), clock.clone());

    let before = clock.now();
    clock.advance(Duration::from_secs(1));
    store.advertise_piece(7, 2);

    assert!(store.advertised_piece_indexes(7, before).is_empty());
    assert_eq!(store.advertised_piece_indexes(8, before), vec![2]);
}

#[test]
fn test_advert_expiry() {
    let clock = Arc::new(ManualClock::new());
    let mut store =
        PieceStorage::with_clock(scaled_context(), &options_with_threshold(0), clock.clone());

    let start = clock.now();
    store.advertise_piece(1, 0);
    clock.advance(Duration::from_secs(120));
    store.advertise_piece(1, 1);

    store.remove_advertised_piece(Duration::from_secs(60));
    assert_eq!(store.advertised_piece_indexes(2, start), vec![1]);
}

#[test]
fn test_have_and_use_bits_stay_disjoint() {
    let mut store = scaled_store();
    let peer = peer_with_pieces(4, &[0, 1, 2, 3]);

    let assert_disjoint = |store: &PieceStorage| {
        for i in 0..4 {
            assert!(
                !(store.has_piece(i) && store.is_piece_used(i)),
                "piece {} both have and in-use",
                i
            );
        }
    };

    let first = store.get_missing_piece(&peer).unwrap();
    assert_disjoint(&store);

    let second = store.get_missing_piece(&peer).unwrap();
    assert_disjoint(&store);

    store.complete_piece(&first);
    assert_disjoint(&store);

    store.cancel_piece(&second);
    assert_disjoint(&store);

    store.mark_piece_missing(first.index());
    assert_disjoint(&store);
}

#[test]
fn test_in_flight_count_tracks_use_bits() {
    let mut store = scaled_store();

    let count_used = |store: &PieceStorage| (0..4).filter(|&i| store.is_piece_used(i)).count();

    let a = store.check_out_piece(0);
    let b = store.check_out_piece(2);
    assert_eq!(store.count_in_flight_pieces(), count_used(&store));

    store.complete_piece(&a);
    assert_eq!(store.count_in_flight_pieces(), count_used(&store));

    store.cancel_piece(&b);
    assert_eq!(store.count_in_flight_pieces(), count_used(&store));
}

#[test]
fn test_completed_length_capped_at_total() {
    let mut store = scaled_store();

    // progress on an in-flight piece that the restored bitmap also covers
    let piece = store.check_out_piece(0);
    piece.complete_block(0);
    piece.complete_block(1);
    store.set_bitfield(&[0b1111_0000]).unwrap();

    assert_eq!(store.completed_length(), 15);
    assert!(store.all_download_finished());
}

#[test]
fn test_bitfield_round_trip_with_zero_padding() {
    let mut store = scaled_store();
    store.set_bitfield(&[0b0110_0000]).unwrap();
    assert_eq!(store.bitfield(), &[0b0110_0000]);

    // padding bits in the input are masked off
    store.set_bitfield(&[0b0110_1111]).unwrap();
    assert_eq!(store.bitfield(), &[0b0110_0000]);
}

#[test]
fn test_mark_pieces_done_lengths() {
    for (restore_len, expect_completed) in [(0, 0), (2, 2), (4, 4), (9, 8), (10, 10), (15, 15)] {
        let mut store = scaled_store();
        store.mark_pieces_done(restore_len);
        assert_eq!(
            store.completed_length(),
            expect_completed,
            "restore length {}",
            restore_len
        );
    }
}

#[test]
fn test_mark_pieces_done_total_finishes() {
    let mut store = scaled_store();
    store.mark_pieces_done(15);
    assert!(store.download_finished());
    assert!(store.all_download_finished());
}

#[test]
fn test_partial_restore_piece_resumes_checkout() {
    let mut store = scaled_store();
    store.mark_pieces_done(10); // pieces 0-1 plus one block of piece 2

    let piece = store.check_out_piece(2);
    assert_eq!(piece.count_complete_blocks(), 1);
    piece.complete_block(1);
    store.complete_piece(&piece);
    assert_eq!(store.completed_length(), 12);
}

#[test]
fn test_last_piece_is_short() {
    let store = scaled_store();
    assert_eq!(store.piece_length(3), 3);
    assert_eq!(store.piece_length(0), 4);
}

#[test]
fn test_filter_with_zero_requested_files_is_finished() {
    let context = TestContextBuilder::new()
        .file("a.bin", 0, 8, false)
        .file("b.bin", 8, 7, false)
        .build();
    let mut store = PieceStorage::new(context, &options_with_threshold(0));

    store.setup_file_filter();
    assert!(store.is_selective_download());
    assert!(store.download_finished());
    assert!(!store.all_download_finished());
    assert_eq!(store.filtered_total_length(), 0);
}

#[test]
fn test_selective_download_lifecycle() {
    // file b covers bytes [8, 15): pieces 2 and 3
    let context = TestContextBuilder::new()
        .file("a.bin", 0, 8, false)
        .file("b.bin", 8, 7, true)
        .build();
    let mut store = PieceStorage::new(context, &options_with_threshold(0));
    store.set_piece_selector(Box::new(LowestIndexSelector));
    store.setup_file_filter();

    assert!(store.is_selective_download());
    assert_eq!(store.filtered_total_length(), 7);

    // unfiltered pieces are never selected
    let peer = peer_with_pieces(4, &[0, 1, 2, 3]);
    let first = store.get_missing_piece(&peer).unwrap();
    assert_eq!(first.index(), 2);
    store.complete_piece(&first);
    assert!(!store.download_finished());

    let second = store.get_missing_piece(&peer).unwrap();
    assert_eq!(second.index(), 3);
    store.complete_piece(&second);

    assert!(store.download_finished());
    assert!(!store.all_download_finished());
    assert!(store.get_missing_piece(&peer).is_none());
    assert_eq!(store.filtered_completed_length(), 7);
    assert!(store.context().download_stop_time().is_some());
}

#[test]
fn test_all_files_requested_keeps_filter_disabled() {
    let context = TestContextBuilder::new()
        .file("a.bin", 0, 8, true)
        .file("b.bin", 8, 7, true)
        .build();
    let mut store = PieceStorage::new(context, &options_with_threshold(0));

    store.setup_file_filter();
    assert!(!store.is_selective_download());
    assert_eq!(store.filtered_total_length(), 15);
}

#[test]
fn test_checkout_idempotence_round_trip() {
    let mut store = scaled_store();
    let first = store.check_out_piece(3);
    let second = store.check_out_piece(3);

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(store.count_in_flight_pieces(), 1);
    assert!(store.is_piece_used(3));
}

#[test]
fn test_selection_order_follows_rarity() {
    let mut store = scaled_store();
    store.set_piece_selector(Box::new(RarestFirstSelector::with_seed(
        store.piece_stats().clone(),
        11,
    )));

    // availability: piece0=3 peers, piece1=1, piece2=2, piece3=1
    store.add_piece_stats(&bits(4, &[0, 1, 2, 3]));
    store.add_piece_stats(&bits(4, &[0, 2]));
    store.add_piece_stats(&bits(4, &[0]));

    let peer = peer_with_pieces(4, &[0, 1, 2, 3]);
    let mut order = Vec::new();
    while let Some(piece) = store.get_missing_piece(&peer) {
        order.push(piece.index());
        store.complete_piece(&piece);
    }

    // every selection takes a rarest remaining piece; counts along the
    // order are nondecreasing
    let counts = [3u32, 1, 2, 1];
    assert_eq!(order.len(), 4);
    for pair in order.windows(2) {
        assert!(counts[pair[0]] <= counts[pair[1]], "order {:?}", order);
    }
    assert_eq!(order[3], 0);
}

#[test]
fn test_end_game_hands_out_duplicates() {
    let context = scaled_context();
    let mut store = PieceStorage::new(context, &options_with_threshold(20));
    let peer = peer_with_pieces(4, &[2]);

    let first = store.get_missing_piece(&peer).unwrap();
    let second = store.get_missing_piece(&peer).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.index(), 2);
}

#[test]
fn test_end_game_cancel_salvages_partial_piece() {
    let mut store = PieceStorage::new(scaled_context(), &options_with_threshold(20));

    let piece = store.check_out_piece(1);
    piece.complete_block(0);
    store.cancel_piece(&piece);

    // partial work survives for the next peer
    assert!(!store.is_piece_used(1));
    let again = store.check_out_piece(1);
    assert!(Arc::ptr_eq(&piece, &again));
    assert_eq!(again.count_complete_blocks(), 1);
}

#[test]
fn test_sparse_selection_spreads_checkouts() {
    let context = TestContextBuilder::new().geometry(4, 40, 2).build();
    let mut store = PieceStorage::new(context, &options_with_threshold(0));

    let ignore = bits(10, &[]);
    let first = store.get_sparse_missing_unused_piece(&ignore).unwrap();
    assert_eq!(first.index(), 4);

    // runs around the claim: [0,3] and [5,9]; the longer one wins
    let second = store.get_sparse_missing_unused_piece(&ignore).unwrap();
    assert_eq!(second.index(), 7);
}

#[test]
fn test_in_flight_restore_round_trip() {
    let mut store = scaled_store();
    let partial = Arc::new(Piece::new(2, 4, 2));
    partial.complete_block(0);
    store.add_in_flight_pieces(vec![partial, Arc::new(Piece::new(0, 4, 2))]);

    assert_eq!(store.count_in_flight_pieces(), 2);
    let saved = store.in_flight_pieces();
    assert_eq!(saved[0].index(), 0);
    assert_eq!(saved[1].index(), 2);
    assert_eq!(store.completed_length(), 2);

    // checkout finds the restored partial piece
    let piece = store.check_out_piece(2);
    assert_eq!(piece.count_complete_blocks(), 1);
}

#[test]
fn test_piece_snapshot_reports_have_as_complete() {
    let mut store = scaled_store();
    store.set_bitfield(&[0b1000_0000]).unwrap();

    let have_piece = store.piece(0);
    assert!(have_piece.is_complete());
    assert_eq!(store.count_in_flight_pieces(), 0);

    let missing_piece = store.piece(1);
    assert_eq!(missing_piece.count_complete_blocks(), 0);
}

#[test]
fn test_hash_algo_tag_propagates_to_pieces() {
    let context = TestContextBuilder::new().hash_algo("sha-1").build();
    let mut store = PieceStorage::new(context, &options_with_threshold(0));

    let piece = store.check_out_piece(0);
    assert_eq!(piece.hash_algo(), Some("sha-1"));
}

#[test]
fn test_peer_availability_join_update_leave() {
    let mut store = scaled_store();
    let mut peer = peer_with_pieces(4, &[0, 1]);

    store.add_piece_stats(peer.bitfield());
    assert_eq!(store.piece_stats().lock().counts(), &[1, 1, 0, 0]);

    let old = peer.bitfield().to_bitvec();
    peer.set_piece(3);
    store.update_piece_stats(peer.bitfield(), &old);
    assert_eq!(store.piece_stats().lock().counts(), &[1, 1, 0, 1]);

    store.subtract_piece_stats(peer.bitfield());
    assert_eq!(store.piece_stats().lock().counts(), &[0, 0, 0, 0]);
}

#[test]
fn test_hash_failure_marks_piece_missing() {
    let mut store = scaled_store();
    let piece = store.check_out_piece(1);
    store.complete_piece(&piece);
    assert!(store.has_piece(1));

    store.mark_piece_missing(1);
    assert!(!store.has_piece(1));
    assert!(store.get_missing_piece_at(1).is_some());
}
