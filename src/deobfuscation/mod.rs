//! Deobfuscation framework for JavaScript.
//!
//! This module provides a static deobfuscation pipeline over `swc` syntax
//! trees. Nothing is ever executed: every transformation is either a pure
//! rewrite of literal expressions or a bounded simulation over a whitelisted
//! subset of the language.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Deobfuscation Pipeline                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │  Input: DeobfuscateOptions (source text + flags)                        │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  ResultCache lookup ──── hit ───────────────────────────────► Arc<..>   │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Normalise escapes / invisible characters → parse (swc)                 │
//! │           │                   └─ failure: pass-through, confidence 0    │
//! │           ▼                                                             │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │  Generic passes (fixed point): folding, dead branches,          │   │
//! │  │  simplification, renaming                                       │   │
//! │  └────────────────────────────┬────────────────────────────────────┘   │
//! │                               ▼                                         │
//! │  String arrays → flattened control flow → generic passes again          │
//! │                               ▼                                         │
//! │  Interpreter detection (tree tier, then pattern tier) → restoration     │
//! │                               ▼                                         │
//! │  Vendor signatures → print → confidence → collaborator (optional)       │
//! │                               ▼                                         │
//! │  Output: Arc<DeobfuscationResult>, written back to the cache            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Components
//!
//! ## Engine
//!
//! [`DeobfuscationEngine`] owns the passes, the vendor registry and the
//! injected [`ResultCache`]. One engine serves any number of concurrent
//! requests; [`DeobfuscationEngine::deobfuscate_batch`] spreads them over the
//! rayon pool.
//!
//! ## Pass System
//!
//! - [`AstPass`] - A transformation over the whole tree
//! - [`PassScheduler`] - Bounded fixed-point execution
//! - [`PassContext`] - Per-run audit trail, warnings and signatures
//!
//! The passes themselves live in [`passes`]. Interpreter handling lives in
//! [`vm`].
//!
//! ## Detection
//!
//! Detectors accumulate [`DetectionEvidence`] into a [`DetectionScore`] and
//! publish a [`DetectionSignature`] once enough evidence agrees. Vendor
//! identification runs the registered [`Obfuscator`]s through the
//! [`ObfuscatorRegistry`].
//!
//! # Usage
//!
//! ```rust
//! use jsscope::deobfuscation::{DeobfuscateOptions, DeobfuscationEngine, EngineConfig};
//!
//! let engine = DeobfuscationEngine::new(EngineConfig::default());
//! let options = DeobfuscateOptions::new(r#"var arr = ["alpha", "beta"]; use(arr[1]);"#)
//!     .rename_variables(true);
//!
//! let result = engine.deobfuscate(&options)?;
//! assert!(result.code.contains("\"beta\""));
//! println!("{}", result.summary());
//! # Ok::<(), jsscope::Error>(())
//! ```
//!
//! ## Adding Custom Obfuscators
//!
//! ```rust,ignore
//! use jsscope::deobfuscation::{DeobfuscationEngine, Obfuscator};
//!
//! let mut engine = DeobfuscationEngine::with_defaults();
//! engine.register_obfuscator(Arc::new(MyVendor::new()));
//! ```

// Infrastructure
mod cache;
mod changes;
mod collaborator;
mod confidence;
mod config;
mod detection;
mod pass;
mod result;
mod scheduler;

// Engine
mod engine;

// Built-in passes
pub mod passes;

// Bytecode interpreters
pub mod vm;

// Obfuscator support
mod obfuscators;

pub use cache::{CacheKey, MemoryCache, NoopCache, ResultCache};
pub use changes::{TransformationKind, TransformationLog, TransformationRecord};
pub use collaborator::{ChatMessage, ChatResponse, ChatRole, Collaborator};
pub use confidence::ConfidenceScorer;
pub use config::{CollaboratorChoice, DeobfuscateOptions, EngineConfig, OptionFlags};
pub use detection::{
    DetectionEvidence, DetectionResult, DetectionScore, DetectionSignature, Technique,
};
pub use engine::DeobfuscationEngine;
pub use obfuscators::{
    JavascriptObfuscator, Jscrambler, Obfuscator, ObfuscatorInfo, ObfuscatorRegistry,
};
pub use pass::{AstPass, PassContext, PassReport};
pub use passes::calculate_confidence;
pub use result::{Analysis, DeobfuscationResult, DetectionReport, VmDetected};
pub use scheduler::PassScheduler;
