#![no_main]
use libfuzzer_sys::fuzz_target;
use piece_store::{DownloadContext, PieceStorage, StoreOptions};
use std::sync::Arc;

fuzz_target!(|data: &[u8]| {
    // set_bitfield() should never panic on arbitrary wire input; a wrong
    // byte length must surface as Err, and padding bits must be masked
    let context = Arc::new(DownloadContext::new(16384, 16384 * 100 - 1).unwrap());
    let mut store = PieceStorage::new(context, &StoreOptions::default());
    if store.set_bitfield(data).is_ok() {
        assert_eq!(store.bitfield().len(), store.bitfield_length());
    }
});
