//! IMAP hook traits and extension points.
//!
//! Both points accept any number of hooks; neither is a singleton.

use hookwire_core::{ExtensionPoint, HookOutcome, Session};

/// Verifies LOGIN credentials.
pub trait LoginHook: Send + Sync {
    /// `Ok` authenticates the session as `username`. When every hook
    /// declines, the login fails.
    fn do_login(&self, session: &Session, username: &str, password: &str) -> HookOutcome;
}

/// Handles commands the server does not implement itself.
///
/// Pair it with a capability on the handler so clients learn about the
/// command from CAPABILITY.
pub trait CommandHook: Send + Sync {
    /// `Ok` completes the command with a tagged OK; when every hook
    /// declines the client gets BAD.
    fn do_command(&self, session: &Session, name: &str, args: &str) -> HookOutcome;
}

/// Extension point for [`LoginHook`].
pub const LOGIN_HOOKS: ExtensionPoint<dyn LoginHook> = ExtensionPoint::new("imap.login");
/// Extension point for [`CommandHook`].
pub const COMMAND_HOOKS: ExtensionPoint<dyn CommandHook> = ExtensionPoint::new("imap.command");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_points_accept_many_hooks() {
        assert!(!LOGIN_HOOKS.is_singleton());
        assert!(!COMMAND_HOOKS.is_singleton());
    }
}
