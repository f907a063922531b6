#![no_main]

use libfuzzer_sys::fuzz_target;
use scoreboard_sync::{decode_game_status, encode_game_status};

fuzz_target!(|data: &[u8]| {
    let Ok(document) = std::str::from_utf8(data) else {
        return;
    };

    // Anything that decodes must re-encode into a document that decodes again.
    if let Ok(status) = decode_game_status(document) {
        if let Ok(encoded) = encode_game_status(&status) {
            let again = decode_game_status(&encoded).expect("re-encoded snapshot decodes");
            assert_eq!(again.status_code, status.status_code);
            assert_eq!(again.teams.len(), status.teams.len());
        }
    }
});
