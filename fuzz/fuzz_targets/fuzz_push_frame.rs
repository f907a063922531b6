#![no_main]

use libfuzzer_sys::fuzz_target;
use scoreboard_sync::{InboundFrame, StatusPublisher};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Frame classification on its own.
    let _ = InboundFrame::parse(text);

    // The full receive path: classify, decode, fan out. Nothing here may panic
    // and nothing but a decoded snapshot may become the latest state.
    let publisher = StatusPublisher::new();
    let _ = publisher.publish(text);
});
