//! Process-wide logging setup shared by every binary in the workspace.

pub mod subscriber;

pub use subscriber::DEFAULT_DIRECTIVE;

/// Install the JSON tracing subscriber.
///
/// Safe to call more than once; only the first call takes effect.
pub fn init() {
    subscriber::init(DEFAULT_DIRECTIVE);
}
