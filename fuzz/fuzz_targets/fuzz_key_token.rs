#![no_main]

use keyjoin::KeyNormalizer;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|input: (bool, bool, String)| {
    let (ignore_case, clean_whitespace, raw) = input;
    let normalizer = KeyNormalizer::new(ignore_case, clean_whitespace);
    let token = normalizer.token(&raw);
    assert_eq!(normalizer.token(&token), token);
    if clean_whitespace {
        assert_eq!(token.trim(), token);
    }
});
