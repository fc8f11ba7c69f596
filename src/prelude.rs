//! # jsscope Prelude
//!
//! This module provides a convenient prelude for the most commonly used types and traits
//! from the jsscope library. Import this module to get quick access to the essential
//! types for deobfuscating scripts.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all jsscope operations
pub use crate::Error;

/// The result type used throughout jsscope
pub use crate::Result;

// ================================================================================================
// Main Entry Points
// ================================================================================================

/// The pipeline entry point and its request type
pub use crate::deobfuscation::{DeobfuscateOptions, DeobfuscationEngine, EngineConfig};

/// Source handling
pub use crate::source::{normalize, NormalizationHints, SourceUnit, SyntaxTree};

// ================================================================================================
// Results
// ================================================================================================

/// Run results and their parts
pub use crate::deobfuscation::{
    Analysis, DeobfuscationResult, DetectionReport, TransformationKind, TransformationRecord,
    VmDetected,
};

/// Detection
pub use crate::deobfuscation::{DetectionSignature, Technique};

/// Interpreter findings
pub use crate::deobfuscation::vm::{
    Complexity, InstructionDescriptor, InstructionType, RestorationResult, UnresolvedPart,
    VmDetection, VmProfile,
};

// ================================================================================================
// Extension Points
// ================================================================================================

/// Caching
pub use crate::deobfuscation::{MemoryCache, NoopCache, ResultCache};

/// External cleanup collaborators
pub use crate::deobfuscation::{ChatMessage, ChatResponse, Collaborator, CollaboratorChoice};

/// Custom passes and vendor detectors
pub use crate::deobfuscation::{AstPass, Obfuscator, PassContext, PassReport};
