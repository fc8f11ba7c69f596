#![no_main]

use std::sync::Arc;

use jsscope::deobfuscation::{DeobfuscateOptions, DeobfuscationEngine, NoopCache};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(code) = std::str::from_utf8(data) else {
        return;
    };

    let engine = DeobfuscationEngine::with_defaults().with_cache(Arc::new(NoopCache));
    let options = DeobfuscateOptions::new(code)
        .aggressive(true)
        .aggressive_vm(true)
        .extract_instructions(true);

    // Input-driven failures are reported in the result, never as errors.
    let result = engine.deobfuscate(&options).unwrap();
    assert!((0.0..=1.0).contains(&result.confidence));
});
