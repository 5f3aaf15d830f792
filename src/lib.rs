//! LiveTemplate: a server-side HTML templating runtime that, given a parsed
//! template and successive data snapshots, emits minimal JSON fragments
//! sufficient for a browser client to patch the DOM in place instead of
//! re-transmitting unchanged markup.
//!
//! The pipeline, leaves first:
//!
//! 1. [`path`] / [`analysis::extractor`] — field paths a template span reads.
//! 2. [`analysis::analyzer`] — per-template dependency sets, transitively
//!    through `{{template}}` invocations, with invocation-cycle rejection.
//! 3. [`fragment`] — splits a template into minimal disjoint-dependency
//!    spans, each assigned a stable ID.
//! 4. [`tree`] — executes a template against data into a `TreeNode`: the
//!    static/dynamic interleaving that reconstructs the rendered HTML.
//! 5. [`diff`] — compares two `TreeNode`s for the same fragment into a
//!    sparse `TreeUpdate`.
//! 6. [`strategy`] — classifies a fragment Tree-Based vs Fallback, and
//!    decides per-update whether to ship a tree diff or full HTML.
//! 7. [`session`] — per-page state (`Page`), the `Application` container,
//!    and the independent `SessionManager`.
//! 8. [`token`] — HS256 page tokens with nonce-based replay protection.
//! 9. [`wire`] — the JSON envelope shape crossing the transport boundary.
//!
//! [`TemplateSet`] ties template parsing, analysis, and fragment extraction
//! together into the immutable "Template Handle" of spec §3; [`Application`]
//! and [`Page`] are the entry points most callers use directly.

pub mod analysis;
pub mod ast;
pub mod data;
pub mod diff;
pub mod error;
pub mod fragment;
pub mod path;
pub mod session;
pub mod strategy;
pub mod template_parser;
mod template_set;
pub mod token;
pub mod tree;
pub mod wire;

pub use ast::{Node, Pipeline, TemplateDef};
pub use data::FuncMap;
pub use error::{Error, Result};
pub use fragment::{Fragment, FragmentId};
pub use path::FieldPath;
pub use session::{Application, Page, Session, SessionManager, SessionManagerConfig};
pub use strategy::{Decision, FragmentCapability};
pub use template_set::{TemplateSet, TemplateSetBuilder};
pub use token::{Claims, TokenService, TokenServiceConfig};
pub use tree::TreeNode;
pub use wire::{Action, UpdateEnvelope};
