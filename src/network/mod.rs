//! Remote side of a striped download
//!
//! - `netspec`: `[user@]host:path` addressing and remote-shell escaping
//! - `remote`: the remote-execution primitive (`ssh`, or a local agent)
//! - `pty` and [`negotiate`]: the interactive control session that logs
//!   in and fetches the manifest
//! - `channel`: one data channel per stripe
//! - [`agent`]: what runs on the far end
//!
//! ## Data path
//!
//! ```text
//! local                                   remote
//! ─────                                   ──────
//! Negotiator ── pty ── ssh ─────────────▶ stripecp agent manifest 'dir/*'
//! RemoteChannel 0 ◀── fifo ◀── ssh ◀──── stripecp agent stripe 4 0 10000 dir/a
//! RemoteChannel 1 ◀── fifo ◀── ssh ◀──── stripecp agent stripe 4 1 10000 dir/a
//! ...
//! ```

pub mod agent;
mod channel;
pub mod negotiate;
mod netspec;
mod pty;
mod remote;

pub use channel::*;
pub use negotiate::{
    ConsolePrompt, Negotiated, NegotiationConfig, Negotiator, SecretPrompt, SessionEvent, SessionIo,
};
pub use netspec::*;
pub use pty::*;
pub use remote::*;
