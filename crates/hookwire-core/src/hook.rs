//! Hook results and their aggregation.
//!
//! Every extension point follows the same rule: hooks run in registration
//! order and the first result that is not [`HookReturnCode::Declined`] wins.
//! When every hook declines, [`HookList::run`] returns `None` and the
//! protocol applies the command's default.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::executor::Executor;
use crate::response::Response;

/// Outcome code of a single hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookReturnCode {
    /// Accept.
    Ok,
    /// Permanent rejection.
    Deny,
    /// Temporary rejection; the client should retry later.
    DenySoft,
    /// No opinion; continue with the next hook.
    Declined,
}

impl fmt::Display for HookReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Ok => "OK",
            Self::Deny => "DENY",
            Self::DenySoft => "DENYSOFT",
            Self::Declined => "DECLINED",
        };
        f.write_str(name)
    }
}

/// Result produced by a hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookResult {
    code: HookReturnCode,
    reply_code: Option<u16>,
    message: Option<String>,
}

impl HookResult {
    /// Creates a result with the given code.
    #[must_use]
    pub const fn new(code: HookReturnCode) -> Self {
        Self {
            code,
            reply_code: None,
            message: None,
        }
    }

    /// Accept.
    #[must_use]
    pub const fn ok() -> Self {
        Self::new(HookReturnCode::Ok)
    }

    /// Permanent rejection.
    #[must_use]
    pub const fn deny() -> Self {
        Self::new(HookReturnCode::Deny)
    }

    /// Temporary rejection.
    #[must_use]
    pub const fn deny_soft() -> Self {
        Self::new(HookReturnCode::DenySoft)
    }

    /// No opinion.
    #[must_use]
    pub const fn declined() -> Self {
        Self::new(HookReturnCode::Declined)
    }

    /// Replaces the stage's default response text.
    ///
    /// Multi-line text is split on `\n` by the protocol.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Replaces the stage's default numeric reply code, for protocols that
    /// have one.
    #[must_use]
    pub const fn with_reply_code(mut self, code: u16) -> Self {
        self.reply_code = Some(code);
        self
    }

    /// Returns the outcome code.
    #[must_use]
    pub const fn code(&self) -> HookReturnCode {
        self.code
    }

    /// Returns the override reply code, if any.
    #[must_use]
    pub const fn reply_code(&self) -> Option<u16> {
        self.reply_code
    }

    /// Returns the override text, if any.
    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    /// Returns `true` if the hook expressed no opinion.
    #[must_use]
    pub const fn is_declined(&self) -> bool {
        matches!(self.code, HookReturnCode::Declined)
    }
}

/// Error a hook may return instead of a result.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

/// What a hook invocation returns.
pub type HookOutcome = Result<HookResult, HookError>;

/// Hooks registered at one extension point, in registration order.
pub struct HookList<H: ?Sized> {
    point: &'static str,
    hooks: Vec<Arc<H>>,
}

impl<H: ?Sized> Clone for HookList<H> {
    fn clone(&self) -> Self {
        Self {
            point: self.point,
            hooks: self.hooks.clone(),
        }
    }
}

impl<H: ?Sized> fmt::Debug for HookList<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookList")
            .field("point", &self.point)
            .field("hooks", &self.hooks.len())
            .finish()
    }
}

impl<H: ?Sized> HookList<H> {
    /// Creates a list for the named extension point.
    #[must_use]
    pub const fn new(point: &'static str, hooks: Vec<Arc<H>>) -> Self {
        Self { point, hooks }
    }

    /// Returns the extension point name.
    #[must_use]
    pub const fn point(&self) -> &'static str {
        self.point
    }

    /// Returns the number of hooks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    /// Returns `true` if no hook is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Iterates over the hooks in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<H>> {
        self.hooks.iter()
    }

    /// Runs the hooks until one does not decline.
    ///
    /// Returns the first non-declined result, or `None` when every hook
    /// declined. A hook that returns an error or panics counts as
    /// [`HookReturnCode::DenySoft`].
    pub fn run<F>(&self, mut invoke: F) -> Option<HookResult>
    where
        F: FnMut(&H) -> HookOutcome,
    {
        for (index, hook) in self.hooks.iter().enumerate() {
            let result = match panic::catch_unwind(AssertUnwindSafe(|| invoke(hook))) {
                Ok(Ok(result)) => result,
                Ok(Err(error)) => {
                    tracing::warn!(point = self.point, index, %error, "hook failed");
                    HookResult::deny_soft()
                }
                Err(payload) => {
                    tracing::error!(
                        point = self.point,
                        index,
                        panic = panic_message(payload.as_ref()),
                        "hook panicked"
                    );
                    HookResult::deny_soft()
                }
            };

            if !result.is_declined() {
                tracing::debug!(point = self.point, index, code = %result.code(), "hook decided");
                return Some(result);
            }
        }
        None
    }

    /// Runs the hooks once per target, in target order.
    ///
    /// Each target gets its own aggregate; the returned vector is aligned
    /// with `targets`.
    pub fn fan_out<T, F>(&self, targets: &[T], mut invoke: F) -> Vec<Option<HookResult>>
    where
        F: FnMut(&H, &T) -> HookOutcome,
    {
        targets
            .iter()
            .map(|target| self.run(|hook| invoke(hook, target)))
            .collect()
    }
}

impl<H: ?Sized + Send + Sync + 'static> HookList<H> {
    /// Fans the hooks out over `targets` on `executor`.
    ///
    /// Returns one deferred response per target, in target order, so the
    /// replies reach the client in declaration order whichever evaluation
    /// finishes first. `respond` maps each target's aggregate to its reply;
    /// `fallback` is written for a target whose evaluation never completes.
    pub fn fan_out_deferred<T, F, R, B>(
        &self,
        executor: &dyn Executor,
        targets: Vec<T>,
        invoke: F,
        respond: R,
        fallback: B,
    ) -> Vec<Response>
    where
        T: Send + 'static,
        F: Fn(&H, &T) -> HookOutcome + Send + Sync + 'static,
        R: Fn(&T, Option<HookResult>) -> Response + Send + Sync + 'static,
        B: Fn(&T) -> Response,
    {
        let invoke = Arc::new(invoke);
        let respond = Arc::new(respond);

        targets
            .into_iter()
            .map(|target| {
                let (response, completer) = Response::deferred_with_fallback(fallback(&target));
                let hooks = self.clone();
                let invoke = Arc::clone(&invoke);
                let respond = Arc::clone(&respond);
                executor.execute(Box::new(move || {
                    let result = hooks.run(|hook| invoke(hook, &target));
                    completer.complete(respond(&target, result));
                }));
                response
            })
            .collect()
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;
    use crate::executor::InlineExecutor;
    use std::sync::atomic::{AtomicUsize, Ordering};

    trait Check: Send + Sync {
        fn check(&self, target: &str) -> HookOutcome;
    }

    struct Fixed {
        result: HookResult,
        calls: AtomicUsize,
    }

    impl Fixed {
        fn new(result: HookResult) -> Arc<Self> {
            Arc::new(Self {
                result,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Check for Fixed {
        fn check(&self, _target: &str) -> HookOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.clone())
        }
    }

    struct Failing;

    impl Check for Failing {
        fn check(&self, _target: &str) -> HookOutcome {
            Err("lookup backend unreachable".into())
        }
    }

    struct Panicking;

    impl Check for Panicking {
        fn check(&self, _target: &str) -> HookOutcome {
            panic!("hook bug");
        }
    }

    struct DenyTarget(&'static str);

    impl Check for DenyTarget {
        fn check(&self, target: &str) -> HookOutcome {
            if target == self.0 {
                Ok(HookResult::deny())
            } else {
                Ok(HookResult::ok())
            }
        }
    }

    fn list(hooks: Vec<Arc<dyn Check>>) -> HookList<dyn Check> {
        HookList::new("check", hooks)
    }

    #[test]
    fn test_first_non_declined_wins() {
        let fourth = Fixed::new(HookResult::ok());
        let hooks = list(vec![
            Fixed::new(HookResult::declined()),
            Fixed::new(HookResult::declined()),
            Fixed::new(HookResult::deny()),
            fourth.clone(),
        ]);

        let result = hooks.run(|hook| hook.check("x")).unwrap();
        assert_eq!(result.code(), HookReturnCode::Deny);
        assert_eq!(fourth.calls(), 0);
    }

    #[test]
    fn test_all_declined_has_no_opinion() {
        let first = Fixed::new(HookResult::declined());
        let second = Fixed::new(HookResult::declined());
        let hooks = list(vec![first.clone(), second.clone()]);

        assert!(hooks.run(|hook| hook.check("x")).is_none());
        assert_eq!(first.calls(), 1);
        assert_eq!(second.calls(), 1);
    }

    #[test]
    fn test_empty_list_has_no_opinion() {
        assert!(list(Vec::new()).run(|hook| hook.check("x")).is_none());
    }

    #[test]
    fn test_error_becomes_deny_soft() {
        let after = Fixed::new(HookResult::ok());
        let hooks = list(vec![Arc::new(Failing), after.clone()]);

        let result = hooks.run(|hook| hook.check("x")).unwrap();
        assert_eq!(result.code(), HookReturnCode::DenySoft);
        assert_eq!(after.calls(), 0);
    }

    // A faulty hook is not treated like a declining one: it stops the chain.
    #[test]
    fn test_panic_becomes_deny_soft() {
        let after = Fixed::new(HookResult::ok());
        let hooks = list(vec![Arc::new(Panicking), after.clone()]);

        let result = hooks.run(|hook| hook.check("x")).unwrap();
        assert_eq!(result.code(), HookReturnCode::DenySoft);
        assert_eq!(after.calls(), 0);
    }

    #[test]
    fn test_result_overrides() {
        let result = HookResult::deny()
            .with_reply_code(554)
            .with_message("Relaying denied");
        assert_eq!(result.reply_code(), Some(554));
        assert_eq!(result.message(), Some("Relaying denied"));
        assert_eq!(result.code().to_string(), "DENY");
    }

    #[test]
    fn test_fan_out_per_target() {
        let hooks = list(vec![
            Fixed::new(HookResult::declined()),
            Arc::new(DenyTarget("b")),
        ]);

        let results = hooks.fan_out(&["a", "b", "c"], |hook, target| hook.check(target));
        let codes: Vec<_> = results.iter().map(|r| r.as_ref().unwrap().code()).collect();
        assert_eq!(
            codes,
            [HookReturnCode::Ok, HookReturnCode::Deny, HookReturnCode::Ok]
        );
    }

    #[test]
    fn test_fan_out_deferred_resolves_in_target_order() {
        let hooks = list(vec![Arc::new(DenyTarget("b"))]);
        let responses = hooks.fan_out_deferred(
            &InlineExecutor,
            vec!["a".to_string(), "b".to_string()],
            |hook, target| hook.check(target),
            |target, result| {
                let code = result.map_or(HookReturnCode::Ok, |r| r.code());
                Response::line(format!("{target} {code}"))
            },
            |target| Response::line(format!("{target} failed")),
        );

        assert_eq!(responses.len(), 2);
        assert!(responses.iter().all(Response::is_deferred));
        for response in &responses {
            match response.kind() {
                crate::response::ResponseKind::Deferred(deferred) => assert!(deferred.is_ready()),
                _ => panic!("expected deferred"),
            }
        }
    }
}
