//! # Command-Line Interface
//!
//! User-facing CLI commands and output formatting.
//!
//! ## Command Groups
//!
//! | Group | Purpose | Examples |
//! |-------|---------|----------|
//! | Core | Hub management | `init` |
//! | Dataset | Dataset lifecycle | `dataset create`, `dataset list`, `dataset edit` |
//! | Version | Concept versions | `version new`, `version list` |
//! | Registry | Publication | `publish`, `prepare`, `deposition versions` |
//!
//! ## Output Formats
//!
//! All commands support `--format` flag:
//! - `text` (default) - Human-readable output
//! - `json` - Machine-parseable JSON
//!
//! ## Verbose Mode
//!
//! Use `--verbose` (or `-v`) for debug logs on stderr; `RUST_LOG` takes
//! precedence when set:
//! ```bash
//! dshub --verbose version new 3 --changelog "fix typo"
//! ```

mod app;
mod dataset;
mod deposition;
mod output;
mod session;
mod version;

pub use app::{run, Cli, Commands};
pub use output::{Output, OutputFormat};
