//! Main deobfuscation engine.
//!
//! The [`DeobfuscationEngine`] is the main entry point for deobfuscating
//! JavaScript. It orchestrates normalisation, parsing, pass execution,
//! interpreter analysis, vendor identification and printing.

use std::{collections::HashMap, sync::Arc, time::Instant};

use rayon::prelude::*;

use crate::{
    deobfuscation::{
        cache::{CacheKey, MemoryCache, ResultCache},
        changes::TransformationKind,
        collaborator::{build_messages, chat_with_timeout, interpret_reply, Collaborator},
        confidence::ConfidenceScorer,
        config::{CollaboratorChoice, DeobfuscateOptions, EngineConfig, OptionFlags},
        detection::{DetectionResult, DetectionSignature, Technique},
        obfuscators::{Obfuscator, ObfuscatorRegistry},
        pass::{AstPass, PassContext},
        passes::{
            calculate_confidence, declared_names, utils::is_hash_name, ConstantFoldingPass,
            ControlFlowPass, DeadBranchPass, RenamePass, SimplifyPass, StringArrayPass,
            VendorSignaturePass,
        },
        result::{Analysis, DeobfuscationResult, DetectionReport, VmDetected},
        scheduler::PassScheduler,
        vm::{extract_instructions, VmDetector, VmRestorer, CUSTOM_VM},
    },
    source::{normalize, SourceUnit, SyntaxTree},
    Error, Result,
};

/// Minimum number of hash-style declared names before they count as a technique.
const HEX_IDENTIFIER_MIN: usize = 3;

/// Main deobfuscation engine.
///
/// The engine runs the complete pipeline for one request:
///
/// 1. **Normalisation**: decode safe escapes, strip invisible characters
/// 2. **Parsing**: a parse failure returns the input unchanged with zero confidence
/// 3. **Generic passes**: folding, dead branches, simplification, renaming, to a fixed point
/// 4. **Structure recovery**: string arrays and flattened control flow, then generic passes again
/// 5. **Interpreter analysis**: detection, instruction extraction, optional restoration
/// 6. **Vendor signatures**: debugger traps, decrypt helpers, vendor identification
/// 7. **Printing and scoring**, then optional collaborator cleanup
///
/// Finished results are stored in the injected [`ResultCache`]; identical
/// requests return the same `Arc`.
///
/// # Example
///
/// ```rust
/// use jsscope::deobfuscation::{DeobfuscateOptions, DeobfuscationEngine};
///
/// let engine = DeobfuscationEngine::with_defaults();
/// let options = DeobfuscateOptions::new("if (true) { a(); } else { b(); }");
///
/// let result = engine.deobfuscate(&options)?;
/// assert!(result.code.contains("a()"));
/// assert!(!result.code.contains("b()"));
/// # Ok::<(), jsscope::Error>(())
/// ```
pub struct DeobfuscationEngine {
    /// Configuration.
    config: EngineConfig,
    /// Vendor identification.
    registry: ObfuscatorRegistry,
    /// Pass scheduler.
    scheduler: PassScheduler,
    /// Generic passes, run to a fixed point before and after structure recovery.
    generic_passes: Vec<Box<dyn AstPass>>,
    /// String-array and control-flow recovery.
    structure_passes: Vec<Box<dyn AstPass>>,
    /// Self-defending traps and decrypt helpers.
    vendor_passes: Vec<Box<dyn AstPass>>,
    /// Aggregate confidence.
    scorer: ConfidenceScorer,
    /// Result memoisation.
    cache: Arc<dyn ResultCache>,
    /// Registered cleanup collaborators.
    collaborators: HashMap<CollaboratorChoice, Arc<dyn Collaborator>>,
}

impl Default for DeobfuscationEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl DeobfuscationEngine {
    /// Creates a new engine with the given configuration.
    ///
    /// The engine starts with an unbounded [`MemoryCache`], the built-in
    /// vendor detectors and no collaborators.
    ///
    /// # Arguments
    ///
    /// * `config` - Engine configuration controlling iteration limits, thresholds, etc.
    #[must_use]
    pub fn new(config: EngineConfig) -> Self {
        let mut registry = ObfuscatorRegistry::new();
        registry.set_threshold(config.detection_threshold);

        let generic_passes: Vec<Box<dyn AstPass>> = vec![
            Box::new(ConstantFoldingPass::new()),
            Box::new(DeadBranchPass::new()),
            Box::new(SimplifyPass::new()),
            Box::new(RenamePass::new()),
        ];
        let structure_passes: Vec<Box<dyn AstPass>> = vec![
            Box::new(StringArrayPass::new()),
            Box::new(ControlFlowPass::new()),
        ];
        let vendor_passes: Vec<Box<dyn AstPass>> = vec![Box::new(VendorSignaturePass::new())];

        Self {
            scheduler: PassScheduler::new(config.max_iterations),
            scorer: ConfidenceScorer::new(&config),
            config,
            registry,
            generic_passes,
            structure_passes,
            vendor_passes,
            cache: Arc::new(MemoryCache::new()),
            collaborators: HashMap::new(),
        }
    }

    /// Creates an engine with the default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Replaces the result cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = cache;
        self
    }

    /// The engine configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The result cache.
    #[must_use]
    pub fn cache(&self) -> &Arc<dyn ResultCache> {
        &self.cache
    }

    /// The vendor registry.
    #[must_use]
    pub fn registry(&self) -> &ObfuscatorRegistry {
        &self.registry
    }

    /// Registers an obfuscator with the engine.
    ///
    /// # Arguments
    ///
    /// * `obfuscator` - The obfuscator to register, wrapped in an `Arc` for shared ownership.
    pub fn register_obfuscator(&mut self, obfuscator: Arc<dyn Obfuscator>) {
        self.registry.register(obfuscator);
    }

    /// Registers the collaborator used when a request selects `choice`.
    pub fn register_collaborator(
        &mut self,
        choice: CollaboratorChoice,
        collaborator: Arc<dyn Collaborator>,
    ) {
        if choice == CollaboratorChoice::None {
            log::warn!("ignoring collaborator registered for `none`");
            return;
        }
        self.collaborators.insert(choice, collaborator);
    }

    /// Deobfuscates one request.
    ///
    /// Input that does not parse is not an error: the result carries the input
    /// unchanged, zero confidence and a warning.
    ///
    /// # Errors
    ///
    /// Returns an error only for internal failures (a pass violating an
    /// invariant, the printer failing). Such results are not cached.
    pub fn deobfuscate(&self, options: &DeobfuscateOptions) -> Result<Arc<DeobfuscationResult>> {
        let key = CacheKey::new(options);
        if let Some(hit) = self.cache.get(&key) {
            log::debug!("cache hit {key}");
            return Ok(hit);
        }

        let start = Instant::now();
        let result = Arc::new(self.run(options)?);
        log::info!(
            "processed {} bytes in {:.2?}: {}",
            options.code.len(),
            start.elapsed(),
            result.summary()
        );

        self.cache.insert(key, Arc::clone(&result));
        Ok(result)
    }

    /// Deobfuscates independent requests in parallel on the rayon pool.
    ///
    /// Results are returned in request order.
    #[must_use]
    pub fn deobfuscate_batch(
        &self,
        requests: &[DeobfuscateOptions],
    ) -> Vec<Result<Arc<DeobfuscationResult>>> {
        requests.par_iter().map(|options| self.deobfuscate(options)).collect()
    }

    /// Reports what a default run finds in `code`, without handing out code.
    ///
    /// # Errors
    ///
    /// Returns an error only for internal failures.
    pub fn detect(&self, code: &str) -> Result<DetectionReport> {
        let result = self.deobfuscate(&DeobfuscateOptions::new(code))?;
        Ok(DetectionReport::from(result.as_ref()))
    }

    fn run(&self, options: &DeobfuscateOptions) -> Result<DeobfuscationResult> {
        let ctx = PassContext::new(self.config.clone(), options.flags());
        let unit = normalize(&options.code);
        Self::note_normalization(&unit, &ctx);

        let mut tree = match SyntaxTree::parse(&unit.normalized) {
            Ok(tree) => tree,
            Err(e) => return Ok(self.unparsed(&unit, &ctx, &e)),
        };

        if unit.hints.changed() {
            ctx.log.success(
                TransformationKind::EscapeNormalization,
                format!(
                    "decoded {} escapes, stripped {} invisible characters",
                    unit.hints.decoded_escapes, unit.hints.invisible_characters
                ),
            );
        }
        Self::note_hex_identifiers(&tree, &ctx);
        let vendors = self.registry.detect(&unit, Some(&tree));

        let mut iterations = self
            .scheduler
            .run_to_fixpoint(&self.generic_passes, &mut tree, &ctx)?;
        if self.scheduler.run_once(&self.structure_passes, &mut tree, &ctx)? {
            iterations += self
                .scheduler
                .run_to_fixpoint(&self.generic_passes, &mut tree, &ctx)?;
        }

        let vm_detected = self.analyse_vm(&unit, &tree, &ctx)?;

        self.scheduler.run_once(&self.vendor_passes, &mut tree, &ctx)?;
        let vendor = Self::note_vendors(&vendors, &ctx);

        let mut code = tree.print()?;
        let confidence = self
            .scorer
            .score(true, ctx.log.failed_count(), vm_detected.as_ref());

        let signatures: Vec<DetectionSignature> = ctx.signatures().cloned().collect();
        let collaborator_notes =
            self.consult_collaborator(options.collaborator, &mut code, &signatures, &ctx);

        Ok(DeobfuscationResult {
            code,
            transformations: ctx.log.to_vec(),
            detected_techniques: techniques(&signatures),
            vm_detected,
            ast_optimized: true,
            confidence,
            analysis: Some(Analysis {
                signatures,
                vendor,
                normalization: unit.hints,
                iterations,
                collaborator_notes,
            }),
            warnings: ctx.warnings().cloned().collect(),
        })
    }

    /// The result for text that did not parse.
    ///
    /// Only text-level detection runs; nothing is transformed or recorded.
    fn unparsed(&self, unit: &SourceUnit, ctx: &PassContext, error: &Error) -> DeobfuscationResult {
        ctx.warn(format!("input did not parse, returning it unchanged: {error}"));

        let vm_detected = VmDetector::detect(unit, None).map(|(detection, _, score)| {
            ctx.add_signature_once(DetectionSignature::from_score(
                Technique::VmInterpreter,
                &score,
            ));
            ctx.warn("bytecode interpreter found by text patterns only; restoration needs a parsed script");
            VmDetected::new(&detection)
        });
        let vendor = Self::note_vendors(&self.registry.detect(unit, None), ctx);

        let signatures: Vec<DetectionSignature> = ctx.signatures().cloned().collect();
        DeobfuscationResult {
            code: unit.original.clone(),
            transformations: Vec::new(),
            detected_techniques: techniques(&signatures),
            vm_detected,
            ast_optimized: false,
            confidence: 0.0,
            analysis: Some(Analysis {
                signatures,
                vendor,
                normalization: unit.hints,
                iterations: 0,
                collaborator_notes: None,
            }),
            warnings: ctx.warnings().cloned().collect(),
        }
    }

    fn note_normalization(unit: &SourceUnit, ctx: &PassContext) {
        let hints = &unit.hints;
        if hints.hex_escaped || hints.unicode_escaped {
            let mut evidence = Vec::new();
            if hints.hex_escaped {
                evidence.push("\\xHH escapes".to_string());
            }
            if hints.unicode_escaped {
                evidence.push("\\u escapes".to_string());
            }
            evidence.push(format!("{} escapes decoded", hints.decoded_escapes));
            ctx.add_signature(DetectionSignature::new(
                Technique::EncodedLiterals,
                evidence,
                calculate_confidence(hints.decoded_escapes.max(1)),
            ));
        }
        if hints.invisible_characters > 0 {
            ctx.add_signature(DetectionSignature::new(
                Technique::InvisibleCharacters,
                vec![format!(
                    "{} invisible characters stripped",
                    hints.invisible_characters
                )],
                calculate_confidence(hints.invisible_characters),
            ));
        }
    }

    fn note_hex_identifiers(tree: &SyntaxTree, ctx: &PassContext) {
        let names = declared_names(tree.script())
            .into_iter()
            .filter(|name| is_hash_name(name))
            .count();
        if names >= HEX_IDENTIFIER_MIN {
            ctx.add_signature(DetectionSignature::new(
                Technique::HexIdentifiers,
                vec![format!("{names} hash-style declared names")],
                calculate_confidence(names),
            ));
        }
    }

    /// Adds one signature per identified vendor and returns the primary id.
    fn note_vendors(vendors: &DetectionResult, ctx: &PassContext) -> Option<String> {
        for signature in vendors.signatures() {
            ctx.add_signature_once(signature);
        }
        vendors.primary().map(|o| o.id())
    }

    /// Detects an interpreter and, on request, describes and restores it.
    fn analyse_vm(
        &self,
        unit: &SourceUnit,
        tree: &SyntaxTree,
        ctx: &PassContext,
    ) -> Result<Option<VmDetected>> {
        let Some((detection, interpreter, score)) = VmDetector::detect(unit, Some(tree)) else {
            return Ok(None);
        };
        ctx.add_signature_once(DetectionSignature::from_score(
            Technique::VmInterpreter,
            &score,
        ));

        let mut detected = VmDetected::new(&detection);
        if ctx.has(OptionFlags::EXTRACT_INSTRUCTIONS) {
            if let Some(interpreter) = &interpreter {
                detected.instructions = Some(extract_instructions(interpreter));
            }
        }

        if !ctx.has(OptionFlags::AGGRESSIVE_VM) {
            ctx.warn(format!(
                "bytecode interpreter at {} left in place; enable aggressiveVM to attempt restoration",
                detected.profile.interpreter_location
            ));
            return Ok(Some(detected));
        }

        let source = tree.print()?;
        let restoration = VmRestorer::new(self.config.vm_max_steps).restore_code(
            &source,
            &detection,
            interpreter.as_ref(),
        );
        for warning in &restoration.warnings {
            ctx.warn(warning.clone());
        }

        let profile = &detected.profile;
        if restoration.is_complete() && profile.vm_type != CUSTOM_VM {
            ctx.log.success(
                TransformationKind::VmRestoration,
                format!(
                    "restored {} program from the interpreter at {}",
                    profile.vm_type, profile.interpreter_location
                ),
            );
            detected.deobfuscated = true;
        } else {
            ctx.unresolved(
                TransformationKind::VmRestoration,
                format!(
                    "{} interpreter at {} only partially restored: {} unresolved parts",
                    profile.vm_type,
                    profile.interpreter_location,
                    restoration.unresolved_parts.len()
                ),
            );
        }
        detected.restoration = Some(restoration);
        Ok(Some(detected))
    }

    /// Runs the requested collaborator over `code`.
    ///
    /// Returns the reply when it was kept as notes instead of replacing `code`.
    fn consult_collaborator(
        &self,
        choice: CollaboratorChoice,
        code: &mut String,
        signatures: &[DetectionSignature],
        ctx: &PassContext,
    ) -> Option<String> {
        if choice == CollaboratorChoice::None || signatures.is_empty() {
            return None;
        }
        let Some(collaborator) = self.collaborators.get(&choice) else {
            ctx.warn(format!(
                "collaborator `{choice}` was requested but none is registered"
            ));
            return None;
        };

        let (messages, complete) =
            build_messages(code, signatures, self.config.collaborator_excerpt_chars);
        let reply = match chat_with_timeout(
            Arc::clone(collaborator),
            messages,
            self.config.collaborator_timeout,
        ) {
            Ok(reply) => interpret_reply(reply, complete),
            Err(e) => {
                ctx.unresolved(
                    TransformationKind::CollaboratorCleanup,
                    format!("{choice} cleanup skipped: {e}"),
                );
                return None;
            }
        };

        if let Some(warning) = reply.warning {
            ctx.unresolved(TransformationKind::CollaboratorCleanup, warning);
        }
        if let Some(cleaned) = reply.code {
            *code = cleaned;
            ctx.log.success(
                TransformationKind::CollaboratorCleanup,
                format!("{choice} rewrote the program"),
            );
        }
        reply.notes
    }
}

/// Techniques of `signatures`, deduplicated in firing order.
fn techniques(signatures: &[DetectionSignature]) -> Vec<Technique> {
    let mut out: Vec<Technique> = Vec::new();
    for signature in signatures {
        if !out.contains(&signature.technique) {
            out.push(signature.technique.clone());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::deobfuscation::{
        cache::NoopCache,
        collaborator::{ChatMessage, ChatResponse},
    };

    fn flat(code: &str) -> String {
        code.split_whitespace().collect()
    }

    fn run(options: DeobfuscateOptions) -> Arc<DeobfuscationResult> {
        DeobfuscationEngine::with_defaults()
            .deobfuscate(&options)
            .unwrap()
    }

    struct Scripted {
        reply: String,
        calls: AtomicUsize,
    }

    impl Scripted {
        fn new(reply: &str) -> Self {
            Self {
                reply: reply.to_string(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl Collaborator for Scripted {
        fn chat(&self, messages: &[ChatMessage]) -> Result<ChatResponse> {
            assert_eq!(messages.len(), 2);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ChatResponse {
                content: self.reply.clone(),
            })
        }
    }

    #[test]
    fn test_clean_input_has_empty_log() {
        let result = run(DeobfuscateOptions::new("function add(a, b) { return a + b; }"));
        assert!(result.ast_optimized);
        assert!(result.transformations.is_empty());
        assert!(result.detected_techniques.is_empty());
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_parse_failure_passes_through() {
        let result = run(DeobfuscateOptions::new("function ( {"));
        assert_eq!(result.code, "function ( {");
        assert!(!result.ast_optimized);
        assert!(result.transformations.is_empty());
        assert_eq!(result.confidence, 0.0);
        assert!(!result.warnings.is_empty());
    }

    #[test]
    fn test_escapes_are_recorded() {
        let result = run(DeobfuscateOptions::new(r#"var s = "\x68\x69";"#));
        assert!(result.code.contains("\"hi\""));
        assert!(result.has_technique(&Technique::EncodedLiterals));
        assert_eq!(
            result.transformations[0].kind,
            TransformationKind::EscapeNormalization
        );
    }

    #[test]
    fn test_hex_identifiers_detected() {
        let result = run(DeobfuscateOptions::new(
            "var _0x1a = 1; var _0x2b = 2; var _0x3c = _0x1a + _0x2b; log(_0x3c);",
        ));
        assert!(result.has_technique(&Technique::HexIdentifiers));
    }

    #[test]
    fn test_string_array_then_folding() {
        let result = run(DeobfuscateOptions::new(
            r#"var arr = ["alpha", "beta"]; use(arr[1]);"#,
        ));
        assert!(flat(&result.code).contains(r#"use("beta")"#));
        assert!(result.has_technique(&Technique::StringArray));
    }

    #[test]
    fn test_cache_returns_same_arc() {
        let engine = DeobfuscationEngine::with_defaults();
        let options = DeobfuscateOptions::new("var x = 1 + 2;");
        let first = engine.deobfuscate(&options).unwrap();
        let second = engine.deobfuscate(&options).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(engine.cache().len(), 1);

        let uncached = DeobfuscationEngine::with_defaults().with_cache(Arc::new(NoopCache));
        let a = uncached.deobfuscate(&options).unwrap();
        let b = uncached.deobfuscate(&options).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a, b);
    }

    #[test]
    fn test_collaborator_needs_signature_and_registration() {
        let collaborator = Arc::new(Scripted::new("```js\nuse(\"beta\");\n```"));
        let mut engine = DeobfuscationEngine::with_defaults();
        engine.register_collaborator(CollaboratorChoice::Anthropic, collaborator.clone());

        let clean = DeobfuscateOptions::new("run();").collaborator(CollaboratorChoice::Anthropic);
        engine.deobfuscate(&clean).unwrap();
        assert_eq!(collaborator.calls.load(Ordering::SeqCst), 0);

        let unregistered = DeobfuscateOptions::new(r#"var arr = ["alpha", "beta"]; use(arr[1]);"#)
            .collaborator(CollaboratorChoice::OpenAi);
        let result = engine.deobfuscate(&unregistered).unwrap();
        assert!(result.warnings.iter().any(|w| w.contains("none is registered")));

        let options = DeobfuscateOptions::new(r#"var arr = ["alpha", "beta"]; use(arr[1]);"#)
            .collaborator(CollaboratorChoice::Anthropic);
        let result = engine.deobfuscate(&options).unwrap();
        engine.deobfuscate(&options).unwrap();
        assert_eq!(collaborator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(flat(&result.code), r#"use("beta");"#);
        assert!(result
            .transformations
            .iter()
            .any(|t| t.kind == TransformationKind::CollaboratorCleanup && t.succeeded));
    }

    #[test]
    fn test_batch_keeps_order() {
        let engine = DeobfuscationEngine::with_defaults();
        let requests: Vec<DeobfuscateOptions> = (0..8)
            .map(|i| DeobfuscateOptions::new(format!("var v = {i} + 1;")))
            .collect();
        let results = engine.deobfuscate_batch(&requests);
        for (i, result) in results.into_iter().enumerate() {
            let result = result.unwrap();
            assert!(result.code.contains(&(i + 1).to_string()));
        }
    }

    #[test]
    fn test_detect_reports_without_code() {
        let engine = DeobfuscationEngine::with_defaults();
        let report = engine.detect("debugger; debugger; run();").unwrap();
        assert!(report.parsed);
        assert!(report
            .detected_techniques
            .contains(&Technique::SelfDefending));
        assert!(report.vm_detected.is_none());
    }
}
