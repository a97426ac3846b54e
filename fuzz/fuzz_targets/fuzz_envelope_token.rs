// SPDX-License-Identifier: MIT OR Apache-2.0
//! Fuzz the secret envelope's `iv:tag:ciphertext` token parser with arbitrary
//! bytes.
//!
//! `decrypt`/`is_encrypted` must never panic on malformed input — a corrupt
//! or adversarial token is a `Malformed`/`AuthenticationFailed` error, never
//! a crash. `ENCRYPTION_SECRET` is fixed for the process lifetime of the
//! fuzzer so every call exercises the same cached key.
#![no_main]
use libfuzzer_sys::fuzz_target;
use std::sync::Once;

static INIT: Once = Once::new();

fn ensure_secret() {
    INIT.call_once(|| {
        // SAFETY: single-threaded fuzzer init, runs once before any decrypt.
        unsafe {
            std::env::set_var(
                "ENCRYPTION_SECRET",
                "fuzz-target-secret-value-at-least-32-bytes-long",
            );
        }
    });
}

fuzz_target!(|data: &[u8]| {
    ensure_secret();

    if let Ok(s) = std::str::from_utf8(data) {
        let _ = bkd_secret::is_encrypted(s);
        let _ = bkd_secret::is_masked(s);
        let _ = bkd_secret::decrypt(s);

        // A token that round-trips through is_encrypted() as structurally
        // valid must still never panic on decrypt, success or failure.
        if bkd_secret::is_encrypted(s) {
            let _ = bkd_secret::decrypt(s);
        }
    }
});
