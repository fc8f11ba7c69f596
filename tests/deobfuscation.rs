//! End-to-end pipeline tests through the public entry points.
//!
//! Each test feeds source text to `DeobfuscationEngine`, then checks the
//! printed output and the reported log, signatures and confidence.
//! Outputs are compared with whitespace removed so the printer's layout
//! choices do not leak into the assertions.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use jsscope::{
    deobfuscation::{
        calculate_confidence, ChatMessage, ChatResponse, Collaborator, CollaboratorChoice,
        DeobfuscateOptions, DeobfuscationEngine, DeobfuscationResult, NoopCache, Technique,
        TransformationKind,
    },
    Result,
};

const FLATTENED: &str = "function main() { var state = 1; while (true) { switch (state) { \
                         case 1: a(); state = 2; break; \
                         case 2: b(); return; } } }";

const INTERPRETER: &str = r#"
    var code = [0, "a", 0, "14", 1, 5, "total", 4, "print", 4, "total", 2, 1, 6, 4, "total", 3];
    function run(env, ctx) {
        var pc = 0;
        var stack = [];
        while (pc < code.length) {
            var op = code[pc++];
            switch (op) {
                case 0: stack.push(parseInt(code[pc++], 16)); break;
                case 1: var b = stack.pop(); var a = stack.pop(); stack.push(a + b); break;
                case 2: var argc = code[pc++]; var args = stack.splice(stack.length - argc, argc); var f = stack.pop(); stack.push(f.apply(ctx, args)); break;
                case 3: return stack.pop();
                case 4: stack.push(env[code[pc++]]); break;
                case 5: env[code[pc++]] = stack.pop(); break;
                case 6: stack.pop(); break;
            }
        }
    }
"#;

fn compact(code: &str) -> String {
    code.split_whitespace().collect()
}

fn deobfuscate(options: DeobfuscateOptions) -> Arc<DeobfuscationResult> {
    DeobfuscationEngine::with_defaults()
        .with_cache(Arc::new(NoopCache))
        .deobfuscate(&options)
        .unwrap()
}

fn assert_confidence_bounds(result: &DeobfuscationResult) {
    assert!(
        (0.0..=1.0).contains(&result.confidence),
        "confidence {} out of range",
        result.confidence
    );
}

struct CountingCollaborator {
    calls: AtomicUsize,
}

impl Collaborator for CountingCollaborator {
    fn chat(&self, _messages: &[ChatMessage]) -> Result<ChatResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ChatResponse {
            content: "Renamed nothing.\n```js\nuse(\"beta\");\n```".to_string(),
        })
    }
}

#[test]
fn test_constant_expression_is_folded() {
    let result = deobfuscate(DeobfuscateOptions::new("const x = 1 + 2; log(x);"));
    let code = compact(&result.code);
    assert!(code.contains("constx=3;"), "{code}");
    assert!(!code.contains("1+2"));
    assert!(result
        .transformations
        .iter()
        .any(|t| t.kind == TransformationKind::ConstantFolding && t.succeeded));
    assert_confidence_bounds(&result);
}

#[test]
fn test_constant_true_branch_is_kept() {
    let result = deobfuscate(DeobfuscateOptions::new(
        "if (true) { keep(); also(); } else { drop(); }",
    ));
    let code = compact(&result.code);
    assert!(code.contains("keep();also();"), "{code}");
    assert!(!code.contains("drop"));
    assert!(!code.contains("if"));
}

#[test]
fn test_constant_false_branch_takes_alternate() {
    let result = deobfuscate(DeobfuscateOptions::new(
        "if (![]) { drop(); } else { keep(); }",
    ));
    let code = compact(&result.code);
    assert!(code.contains("keep();"), "{code}");
    assert!(!code.contains("drop"));
}

#[test]
fn test_string_array_access_is_inlined() {
    let result = deobfuscate(DeobfuscateOptions::new(
        r#"var arr = ["alpha", "beta"]; use(arr[1]);"#,
    ));
    let code = compact(&result.code);
    assert!(code.contains(r#"use("beta")"#), "{code}");
    assert!(!code.contains("arr[1]"));
    assert!(result.has_technique(&Technique::StringArray));
}

#[test]
fn test_string_decryption_can_be_disabled() {
    let result = deobfuscate(
        DeobfuscateOptions::new(r#"var arr = ["alpha", "beta"]; use(arr[1]);"#)
            .decrypt_strings(false),
    );
    assert!(compact(&result.code).contains("arr[1]"));
}

#[test]
fn test_flattened_dispatch_is_restored_in_order() {
    let result = deobfuscate(DeobfuscateOptions::new(FLATTENED));
    let code = compact(&result.code);
    assert_eq!(code, "functionmain(){a();b();return;}");
    assert!(result.has_technique(&Technique::ControlFlowFlattening));
    assert!(result
        .transformations
        .iter()
        .any(|t| t.kind == TransformationKind::ControlFlowRestoration && t.succeeded));
}

#[test]
fn test_flattened_dispatch_kept_when_disabled() {
    let result =
        deobfuscate(DeobfuscateOptions::new(FLATTENED).restore_control_flow(false));
    assert!(result.code.contains("switch"));
}

#[test]
fn test_second_pass_is_idempotent() {
    for source in [
        "const x = 1 + 2; if (true) { a(x); } else { b(); }",
        r#"var arr = ["alpha", "beta"]; use(arr[1]);"#,
        FLATTENED,
    ] {
        let first = deobfuscate(DeobfuscateOptions::new(source));
        let second = deobfuscate(DeobfuscateOptions::new(first.code.clone()));
        assert!(
            second.transformations.is_empty(),
            "second pass over {source:?} changed {:?}",
            second.transformations
        );
        assert_eq!(compact(&first.code), compact(&second.code));
    }
}

#[test]
fn test_cached_calls_share_result_and_collaborator_runs_once() {
    let collaborator = Arc::new(CountingCollaborator {
        calls: AtomicUsize::new(0),
    });
    let mut engine = DeobfuscationEngine::with_defaults();
    engine.register_collaborator(CollaboratorChoice::Anthropic, collaborator.clone());

    let options = DeobfuscateOptions::new(r#"var arr = ["alpha", "beta"]; use(arr[1]);"#)
        .collaborator(CollaboratorChoice::Anthropic);
    let first = engine.deobfuscate(&options).unwrap();
    let second = engine.deobfuscate(&options).unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(collaborator.calls.load(Ordering::SeqCst), 1);
    assert_eq!(compact(&first.code), r#"use("beta");"#);
    assert_eq!(
        first
            .analysis
            .as_ref()
            .and_then(|a| a.collaborator_notes.as_deref()),
        None
    );
}

#[test]
fn test_cache_key_covers_options() {
    let engine = DeobfuscationEngine::with_defaults();
    let plain = engine
        .deobfuscate(&DeobfuscateOptions::new(FLATTENED))
        .unwrap();
    let disabled = engine
        .deobfuscate(&DeobfuscateOptions::new(FLATTENED).restore_control_flow(false))
        .unwrap();
    assert!(!Arc::ptr_eq(&plain, &disabled));
    assert_ne!(plain.code, disabled.code);
    assert_eq!(engine.cache().len(), 2);
}

#[test]
fn test_batch_matches_sequential_results() {
    let sources = [
        "const x = 1 + 2;",
        FLATTENED,
        r#"var arr = ["alpha", "beta"]; use(arr[1]);"#,
        "function ( {",
    ];
    let requests: Vec<DeobfuscateOptions> =
        sources.iter().map(|s| DeobfuscateOptions::new(*s)).collect();

    let engine = DeobfuscationEngine::with_defaults().with_cache(Arc::new(NoopCache));
    let batch = engine.deobfuscate_batch(&requests);
    assert_eq!(batch.len(), sources.len());
    for (request, result) in requests.iter().zip(batch) {
        let result = result.unwrap();
        let sequential = engine.deobfuscate(request).unwrap();
        assert_eq!(*result, *sequential);
    }
}

#[test]
fn test_confidence_function_shape() {
    assert_eq!(calculate_confidence(0), 0.0);
    let mut previous = 0.0;
    for n in 1..20 {
        let value = calculate_confidence(n);
        assert!(value >= previous);
        assert!(value <= 1.0);
        previous = value;
    }
    assert_eq!(calculate_confidence(5), 1.0);
    assert_eq!(calculate_confidence(1_000), 1.0);
}

#[test]
fn test_malformed_input_reports_zero_confidence() {
    for source in ["function ( {", "var = ;", "}}}{{{", "\u{feff}let 1x = 2"] {
        let result = deobfuscate(DeobfuscateOptions::new(source));
        assert_eq!(result.confidence, 0.0, "{source:?}");
        assert!(!result.warnings.is_empty(), "{source:?}");
        assert!(!result.ast_optimized);
        assert!(result.transformations.is_empty());
    }
}

#[test]
fn test_interpreter_left_in_place_without_aggressive_vm() {
    let result = deobfuscate(DeobfuscateOptions::new(INTERPRETER));
    let vm = result.vm_detected.as_ref().expect("interpreter detected");
    assert_eq!(vm.tier, "tree");
    assert!(!vm.deobfuscated);
    assert!(vm.restoration.is_none());
    assert!(vm.instructions.is_none());
    assert!(result.has_technique(&Technique::VmInterpreter));
    assert!(result.warnings.iter().any(|w| w.contains("aggressiveVM")));
    assert!(result.confidence <= 0.5);
    assert_confidence_bounds(&result);
}

#[test]
fn test_interpreter_restoration() {
    let result = deobfuscate(
        DeobfuscateOptions::new(INTERPRETER)
            .aggressive_vm(true)
            .extract_instructions(true),
    );
    let vm = result.vm_detected.as_ref().expect("interpreter detected");
    let restoration = vm.restoration.as_ref().expect("restoration attempted");
    assert!(vm.instructions.as_ref().is_some_and(|i| i.len() == 7));
    assert!((0.0..=1.0).contains(&restoration.confidence));

    if vm.deobfuscated {
        assert!(restoration.is_complete());
        assert!(compact(&restoration.code).contains("print(total)"));
    } else {
        assert!(!restoration.unresolved_parts.is_empty());
        assert!(result.confidence < 1.0);
    }
    assert_confidence_bounds(&result);
}

#[test]
fn test_vm_report_tracks_signature() {
    for source in [INTERPRETER, FLATTENED, "const x = 1 + 2;"] {
        let result = deobfuscate(DeobfuscateOptions::new(source));
        assert_eq!(
            result.vm_detected.is_some(),
            result.has_technique(&Technique::VmInterpreter),
            "{source:?}"
        );
    }
}

#[test]
fn test_vendor_traps_are_removed() {
    let result = deobfuscate(DeobfuscateOptions::new(
        "debugger; setInterval(function () { debugger; }, 1000); main();",
    ));
    let code = compact(&result.code);
    assert!(!code.contains("debugger"), "{code}");
    assert!(code.contains("main();"));
    assert!(result.has_technique(&Technique::SelfDefending));
}

#[test]
fn test_detect_omits_code() {
    let engine = DeobfuscationEngine::with_defaults();
    let report = engine.detect(FLATTENED).unwrap();
    assert!(report.parsed);
    assert!(report
        .detected_techniques
        .contains(&Technique::ControlFlowFlattening));
    let json = serde_json::to_value(&report).unwrap();
    assert!(json.get("code").is_none());
    assert_eq!(json["parsed"], true);
}
