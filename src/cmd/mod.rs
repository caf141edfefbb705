//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `webhook` | `Webhook`        |
//! | `exec`    | `Exec`           |
//! | `stubs`   | `Stubs`          |
//! | `config`  | `Config`         |

pub mod config;
pub mod exec;
pub mod stubs;
pub mod webhook;

pub use config::cmd_config;
pub use exec::cmd_exec;
pub use stubs::cmd_stubs;
pub use webhook::cmd_webhook;
