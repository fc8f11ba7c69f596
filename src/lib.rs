// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

//! # jsscope
//!
//! A static, deterministic deobfuscation pipeline for JavaScript. `jsscope`
//! takes obfuscated script text and recovers a readable, semantically
//! equivalent version together with a confidence score and an append-only
//! audit trail of everything it changed.
//!
//! ## Features
//!
//! - **Generic cleanup** - Constant folding, dead-branch elimination, trivial-expression
//!   simplification and optional renaming of `_0x...` identifiers, run to a bounded fixed point
//! - **String arrays** - Inlining of string-table lookups and accessor wrappers, including
//!   tables rotated at load time (resolved by a bounded simulator, never by execution)
//! - **Control-flow flattening** - `while`/`switch` dispatchers rebuilt into straight-line code
//! - **Bytecode interpreters** - Two-tier detection of embedded VMs, instruction
//!   classification and symbolic restoration of recognised interpreters
//! - **Vendor signatures** - Self-defending debugger traps, decrypt helpers and identification
//!   of javascript-obfuscator and Jscrambler output
//! - **Graceful degradation** - Input that does not parse is returned unchanged with zero
//!   confidence and a warning, never an error
//!
//! ## Quick Start
//!
//! ```rust
//! use jsscope::prelude::*;
//!
//! let engine = DeobfuscationEngine::with_defaults();
//! let result = engine.deobfuscate(&DeobfuscateOptions::new("const x = 1 + 2;"))?;
//!
//! assert!(result.code.contains('3'));
//! assert!((0.0..=1.0).contains(&result.confidence));
//! for record in &result.transformations {
//!     println!("{record}");
//! }
//! # Ok::<(), jsscope::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`source`] - Normalisation and the parser/printer adapter around `swc`
//! - [`deobfuscation`] - Engine, passes, interpreter analysis, detection, caching
//! - [`prelude`] - Convenient re-exports of commonly used types
//! - [`Error`] and [`Result`] - Error handling
//!
//! The library logs through the `log` facade: `debug!` per pass, `info!` per
//! run and `warn!` for everything recorded as a warning. Install any logger to
//! see it.

#[macro_use]
pub(crate) mod error;

/// Convenient re-exports of the most commonly used types and traits.
///
/// # Example
///
/// ```rust
/// use jsscope::prelude::*;
///
/// let engine = DeobfuscationEngine::with_defaults();
/// let report = engine.detect("debugger; debugger; start();")?;
/// assert!(report.detected_techniques.contains(&Technique::SelfDefending));
/// # Ok::<(), jsscope::Error>(())
/// ```
pub mod prelude;

/// Source text handling.
///
/// Normalisation of literal encodings and invisible characters, and the
/// [`SyntaxTree`](source::SyntaxTree) adapter that parses and prints scripts.
///
/// # Examples
///
/// ```rust
/// use jsscope::source::{normalize, SyntaxTree};
///
/// let unit = normalize(r#"var s = "\x41";"#);
/// assert_eq!(unit.hints.decoded_escapes, 1);
///
/// let tree = SyntaxTree::parse(&unit.normalized)?;
/// assert!(tree.print()?.contains("\"A\""));
/// # Ok::<(), jsscope::Error>(())
/// ```
pub mod source;

/// The deobfuscation pipeline.
///
/// See [`deobfuscation::DeobfuscationEngine`] for the entry point.
pub mod deobfuscation;

/// `jsscope` Result type
///
/// A type alias for [`std::result::Result<T, Error>`] where the error type is always [`Error`].
/// This is used consistently throughout the crate for all fallible operations.
pub type Result<T> = std::result::Result<T, Error>;

/// `jsscope` Error type
///
/// The main error type for all operations in this crate.
///
/// # Examples
///
/// ```rust
/// use jsscope::{source::SyntaxTree, Error};
///
/// match SyntaxTree::parse("function (") {
///     Ok(_) => println!("parsed"),
///     Err(Error::Parse { message, location }) => println!("{location}: {message}"),
///     Err(e) => println!("Error: {e}"),
/// }
/// ```
pub use error::Error;
