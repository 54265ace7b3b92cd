//! CLI command implementations.
//!
//! Each submodule owns one or more related `Commands` variants:
//!
//! | Module     | Commands handled            |
//! |------------|-----------------------------|
//! | `converge` | `Plan`, `Converge`, `Lift`  |
//! | `nodes`    | `Nodes`                     |
//! | `config`   | `Config`                    |

pub mod config;
pub mod converge;
pub mod nodes;

pub use config::cmd_config;
pub use converge::{cmd_converge, cmd_lift, cmd_plan};
pub use nodes::cmd_nodes;
